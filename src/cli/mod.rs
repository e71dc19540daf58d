pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod cpi;
pub mod dispatch;
pub mod env;
pub mod info;
pub mod notebook;
pub mod output;
pub mod runtime;
pub mod summary;
pub mod watch;
