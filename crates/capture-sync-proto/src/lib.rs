//! Shared wire formats for `artifact-receiver` and `capture-hub`.
//!
//! - [`transfer`]: the data plane. Length-prefixed messages over a TCP stream that carry
//!   either a control command (`COMMAND:VERB!ARG`) or raw artifact bytes.
//! - [`osc`]: the control plane. OSC 1.0 datagrams exchanged with the mobile capture device.
//! - [`control`]: the operator-facing `verb:argument` line protocol.

pub mod control;
pub mod osc;
pub mod transfer;

pub use control::{Reply, SessionCommand};
pub use osc::{OscArg, OscMessage};
pub use transfer::{TransferMessage, Verb, read_message, write_command, write_message};
