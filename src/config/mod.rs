//! Configuration
//!
//! Configuration is read from an optional TOML file. Every section falls back
//! to its defaults, so a file only needs the keys it overrides.

mod schema;
mod store;

pub use schema::*;
pub use store::{load_config, validate, validate_ball};
