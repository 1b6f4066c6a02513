//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the hub's TOML file and turns
//! it into the option types the application layer is constructed with.
//! A missing file is not an error; the hub then starts with defaults.

pub mod config;
