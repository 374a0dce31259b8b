//! Inter-process communication for Nimbus
//!
//! This crate provides the IPC protocol and transport abstractions used for
//! communication between the master process and per-project workers.

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{
    MessageEnvelope, WorkerCommand, WorkerReply, IPC_PROTOCOL_VERSION,
};
pub use transport::{ChildProcessTransport, IpcTransport, StdioTransport};
