//! Tile map rendering core for a handheld GPS/variometer

pub mod app;
pub mod config;
pub mod error;
pub mod map;
pub mod state;

pub use app::{RenderLoop, Signal, Signals};
pub use config::MapConfig;
pub use error::MapError;
pub use map::MapSystem;
pub use state::{PositionFix, SharedState};

/// Initialise the `env_logger` backend; later calls are no-ops
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
