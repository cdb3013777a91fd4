pub mod config;
pub mod error;
pub mod filter;
pub mod format;
pub mod render;
pub mod stream;
pub mod transcript;

pub use error::{Error, Result};
