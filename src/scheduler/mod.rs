//! Background scheduling of archive cycles and the history they leave behind.

pub mod engine;
pub mod history;

pub use self::engine::{run_archive_loop, Trigger};
