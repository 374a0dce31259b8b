//! IPC transport implementations
//!
//! Frames are newline-delimited JSON envelopes. Line reads go through
//! [`tokio::io::Lines`], whose `next_line` is cancellation safe, so a
//! receive that times out never loses a partially read frame. The master
//! polls the response channel with a timeout to interleave liveness checks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

use crate::error::IpcError;
use crate::protocol::MessageEnvelope;

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end, waiting indefinitely
    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;

    /// Receive a message, giving up with [`IpcError::Timeout`] after `wait`
    async fn receive_timeout<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
        wait: Duration,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        match tokio::time::timeout(wait, self.receive()).await {
            Ok(result) => result,
            Err(_) => Err(IpcError::Timeout),
        }
    }

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

fn encode<T: Serialize>(message: &MessageEnvelope<T>) -> Result<String, IpcError> {
    let json = serde_json::to_string(message).map_err(|e| IpcError::SerializationError(e.to_string()))?;
    Ok(format!("{}\n", json))
}

fn decode<T: for<'de> Deserialize<'de>>(line: &str) -> Result<MessageEnvelope<T>, IpcError> {
    let envelope: MessageEnvelope<T> =
        serde_json::from_str(line.trim_end()).map_err(|e| IpcError::DeserializationError(e.to_string()))?;

    if envelope.protocol_version != crate::protocol::IPC_PROTOCOL_VERSION {
        return Err(IpcError::ProtocolVersionMismatch {
            expected: crate::protocol::IPC_PROTOCOL_VERSION,
            actual: envelope.protocol_version,
        });
    }

    Ok(envelope)
}

/// Stdin/stdout IPC transport, used on the worker side of the channel
pub struct StdioTransport {
    lines: Lines<BufReader<tokio::io::Stdin>>,
    stdout: tokio::io::Stdout,
}

impl StdioTransport {
    /// Create a new stdio transport over this process's stdin/stdout
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IpcTransport for StdioTransport {
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let frame = encode(message)?;
        self.stdout
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;
        self.stdout
            .flush()
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;
        Ok(())
    }

    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?
            .ok_or(IpcError::ConnectionClosed)?;

        decode(&line)
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        // Stdin/stdout don't need explicit closing
        Ok(())
    }
}

/// Master-side transport over a spawned worker's piped stdin/stdout
pub struct ChildProcessTransport {
    stdin: Option<tokio::process::ChildStdin>,
    lines: Option<Lines<BufReader<tokio::process::ChildStdout>>>,
}

impl ChildProcessTransport {
    /// Create a new child process transport
    pub fn new(stdin: tokio::process::ChildStdin, stdout: tokio::process::ChildStdout) -> Self {
        Self {
            stdin: Some(stdin),
            lines: Some(BufReader::new(stdout).lines()),
        }
    }
}

#[async_trait]
impl IpcTransport for ChildProcessTransport {
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let stdin = self.stdin.as_mut().ok_or(IpcError::NotConnected)?;

        let frame = encode(message)?;
        stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;
        Ok(())
    }

    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        let lines = self.lines.as_mut().ok_or(IpcError::NotConnected)?;

        let line = lines
            .next_line()
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?
            .ok_or(IpcError::ConnectionClosed)?;

        decode(&line)
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        // Take ownership and drop to close the pipes
        let _ = self.stdin.take();
        let _ = self.lines.take();
        Ok(())
    }
}
