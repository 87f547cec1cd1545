//! `mobisync` command-line interface

pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod output;
pub mod profiles;
pub mod resolve;

pub use app::run;
pub use env::CliArgs;
