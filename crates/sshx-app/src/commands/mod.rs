pub mod presets;
pub mod settings;
pub mod terminal;
