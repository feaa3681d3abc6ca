pub mod config;
pub mod detail;
pub mod emitter;
pub mod error;
pub mod fixture;
pub mod format;
pub mod hierarchy;
pub mod logger;
pub mod ordering;
pub mod process;
pub mod prompt;
pub mod reporter;
pub mod runner;
pub mod setup;
pub mod suites;
pub mod summary;

pub use error::{Error, Result};
