//! Network subsystem for TCP audio transport

pub mod tcp;

pub use tcp::{connect, read_full, Listener};
