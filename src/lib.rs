#![warn(rust_2018_idioms)]

pub mod agent;
pub mod app;
pub mod batch;
pub mod cleanup;
pub mod domain;
pub mod events;
pub mod gate;
pub mod lifecycle;
pub mod reader;
pub mod sender;
pub mod state;

// Re-export main types for easy access
pub use app::service::Walship;
pub use app::{App, Config};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
