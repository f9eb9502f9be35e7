pub mod cli;
pub mod connection;
pub mod load_config;
pub mod summary;

pub use cli::{run, Cli, Commands};
