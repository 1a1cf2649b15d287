use portable_pty::PtySize;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

impl TermSize {
    /// Build a size, clamping both dimensions to at least one cell.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            rows: rows.max(1),
            cols: cols.max(1),
        }
    }

    pub(crate) fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Mapping from display pixels to character cells.
///
/// The right values depend on the display font, so they are configuration
/// rather than constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellMetrics {
    pub cell_width_px: u32,
    pub cell_height_px: u32,
}

impl CellMetrics {
    pub fn new(cell_width_px: u32, cell_height_px: u32) -> Self {
        Self {
            cell_width_px: cell_width_px.max(1),
            cell_height_px: cell_height_px.max(1),
        }
    }

    /// How many whole cells fit in a `width_px` x `height_px` surface.
    pub fn cells_for(&self, width_px: u32, height_px: u32) -> TermSize {
        let cols = width_px / self.cell_width_px.max(1);
        let rows = height_px / self.cell_height_px.max(1);
        TermSize::new(
            u16::try_from(rows).unwrap_or(u16::MAX),
            u16::try_from(cols).unwrap_or(u16::MAX),
        )
    }
}

impl Default for CellMetrics {
    /// A 24pt monospace font: 18px wide, 36px tall.
    fn default() -> Self {
        Self {
            cell_width_px: 18,
            cell_height_px: 36,
        }
    }
}
