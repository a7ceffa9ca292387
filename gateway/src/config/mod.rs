//! Configuration management for the gateway: loading the TOML config file, applying
//! environment overrides and validating everything the auth core needs at startup.

mod error;
mod loader;
mod types;

pub use error::*;
pub use loader::*;
pub use types::*;
