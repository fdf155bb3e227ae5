//! Data-plane receiver for capture artifacts.
//!
//! One [`server::TransferServer`] per channel (artifact kind) accepts a single connection at a
//! time, decodes framed messages, and hands payloads to a background writer thread.

pub mod cli;
pub mod client;
pub mod config;
pub mod runtime;
pub mod server;

mod writer;

pub use server::{ChannelMode, ServeSummary, TransferServer};
pub use writer::WriterStats;
