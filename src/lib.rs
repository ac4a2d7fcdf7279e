pub mod agent;
pub mod commands;
pub mod config;
pub mod db;
pub mod diary;
pub mod error;
pub mod index;
pub mod models;
pub mod resolver;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};

/// Library version from Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
