//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Commands sent from the master to a project worker
///
/// A worker consumes its command channel strictly in send order; there is
/// no pipelining within one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Invoke a function with a JSON payload
    Execute {
        function_name: String,
        payload: JsonValue,
        correlation_id: Uuid,
    },

    /// Shutdown sentinel; the worker exits its loop after reading this
    Stop,
}

/// Replies sent from a project worker back to the master
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Sent exactly once, as the last step of worker initialization,
    /// even when initialization failed, so the master never hangs on a
    /// readiness wait. `functions` is the number of registered functions.
    Ready {
        project: String,
        pid: u32,
        functions: usize,
    },

    /// Function invocation completed
    Success {
        correlation_id: Uuid,
        result: JsonValue,
    },

    /// Function invocation failed; `error` carries the handler-reported
    /// message verbatim
    Error {
        correlation_id: Uuid,
        error: String,
    },
}

impl WorkerReply {
    /// Correlation id of an execution reply; readiness frames have none
    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            WorkerReply::Ready { .. } => None,
            WorkerReply::Success { correlation_id, .. } => Some(*correlation_id),
            WorkerReply::Error { correlation_id, .. } => Some(*correlation_id),
        }
    }
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_command_wire_shape() {
        let cmd = WorkerCommand::Execute {
            function_name: "echo".to_string(),
            payload: json!({"x": 1}),
            correlation_id: Uuid::new_v4(),
        };

        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], "execute");
        assert_eq!(value["function_name"], "echo");
        assert_eq!(value["payload"], json!({"x": 1}));
    }

    #[test]
    fn test_stop_command_wire_shape() {
        let value = serde_json::to_value(WorkerCommand::Stop).unwrap();
        assert_eq!(value["type"], "stop");
    }

    #[test]
    fn test_reply_status_tags() {
        let id = Uuid::new_v4();

        let ok = WorkerReply::Success {
            correlation_id: id,
            result: json!(42),
        };
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(ok.correlation_id(), Some(id));

        let err = WorkerReply::Error {
            correlation_id: id,
            error: "boom".to_string(),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "boom");

        let ready = WorkerReply::Ready {
            project: "demo".to_string(),
            pid: 4242,
            functions: 2,
        };
        let value = serde_json::to_value(&ready).unwrap();
        assert_eq!(value["status"], "ready");
        assert_eq!(ready.correlation_id(), None);
    }

    #[test]
    fn test_message_envelope() {
        let envelope = MessageEnvelope::new(WorkerCommand::Stop);
        assert_eq!(envelope.protocol_version, IPC_PROTOCOL_VERSION);
        assert!(envelope.is_compatible());

        let json = serde_json::to_string(&envelope).unwrap();
        let deserialized: MessageEnvelope<WorkerCommand> = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.protocol_version, envelope.protocol_version);
    }
}
