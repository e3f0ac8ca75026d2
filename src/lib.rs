pub mod cancel;
pub mod config;
pub mod copy;
pub mod error;
pub mod fat;
pub mod format;
pub mod logger;
pub mod os;
pub mod progress;
pub mod render;
pub mod report;
pub mod write;
