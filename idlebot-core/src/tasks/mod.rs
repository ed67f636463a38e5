pub mod autostart;

pub use autostart::run_autostart;
