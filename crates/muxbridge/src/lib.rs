// muxbridge application library
//
// Browser-facing WebSocket gateway over the tmux control bridge, plus the
// CLI, configuration and logging setup used by the binary.

pub mod cli;
pub mod config;
pub mod logging;
pub mod web;

// Re-export commonly used types
pub use cli::Cli;
pub use config::AppConfig;
pub use web::{create_router, AppState, WebServer};
