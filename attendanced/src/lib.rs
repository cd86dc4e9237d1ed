pub mod config;
pub mod daemon;
pub mod sharing;
pub mod sync;
