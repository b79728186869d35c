//! Foundational utilities shared across xchat crates.
//!
//! Provides the state-file writer and the millisecond clock used by relay
//! persistence and trigger bookkeeping.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp_ms, elapsed_since_ms};
