pub mod bootstrap;
pub mod config;
pub mod danmaku;
pub mod error;
pub mod logging;
pub mod models;
pub mod provider;
pub mod repository;
pub mod search;
pub mod service;
pub mod task;

pub use config::Config;
pub use error::{Error, Result};
