#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod cache;
pub mod config;
pub mod content;
pub mod feed;
pub mod layout;
pub mod media;
pub mod pipeline;
pub mod render;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, Options};
