#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod guard;
pub mod history;
pub mod http;
pub mod logging;
pub mod paging;
pub mod route;
pub mod source;
pub mod text;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
