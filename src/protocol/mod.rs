// Copyright 2025 Pulsewatch contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire protocol for dashboard channels.
//!
//! Frames are newline-delimited JSON envelopes tagged by `kind`. A session
//! opens with a client `handshake` carrying the channel path and bearer
//! token, answered by a server `welcome` carrying the connection id. After
//! that the server pushes `event` frames and answers `invocation` frames
//! with `completion` frames matched by id. `ping`/`pong` keep the session
//! alive; `close` ends it (an error string marks the close as unexpected).

mod events;

pub use events::{
    AlertNotification, AlertSeverity, AlertStatus, AnnouncementPriority, CheckRequested,
    ConnectionStatus,
    EndpointDownNotification, EndpointRecoveredNotification, EndpointState, EndpointStatusUpdate,
    EventPayload, HealthCheckResult, MetricsUpdate, Notification, NotificationMarkedAsRead,
    OutboundCall, ServerError, SystemNotification, UnreadCount,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol version sent in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Frame {
    /// Client opener: protocol version, channel path, optional bearer token.
    Handshake {
        version: u32,
        channel: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Server acceptance of a handshake.
    Welcome { connection_id: String },

    /// Server-pushed named event with a JSON payload.
    Event { target: String, payload: Value },

    /// Client method call. A frame without an id is fire-and-forget and
    /// receives no completion.
    Invocation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        target: String,
        args: Vec<Value>,
    },

    /// Server answer to an invocation, matched by id.
    Completion {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Keepalive probe.
    Ping,

    /// Keepalive answer.
    Pong,

    /// Session end. An error string marks the close as unexpected.
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Frame {
    /// Decode a single frame from one line of input.
    pub fn decode(line: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Encode the frame as a single JSON line (without the trailing newline).
    pub fn encode(&self) -> Result<String, ParseError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_frame_round_trip() {
        let frame = Frame::Event {
            target: "UnreadCount".to_string(),
            payload: json!({ "count": 3 }),
        };

        let line = frame.encode().unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(Frame::decode(&line).unwrap(), frame);
    }

    #[test]
    fn test_fire_and_forget_invocation_omits_id() {
        let frame = Frame::Invocation {
            id: None,
            target: "JoinUserGroup".to_string(),
            args: vec![json!("user-1")],
        };

        let line = frame.encode().unwrap();
        assert!(!line.contains("\"id\""));

        match Frame::decode(&line).unwrap() {
            Frame::Invocation { id, target, args } => {
                assert!(id.is_none());
                assert_eq!(target, "JoinUserGroup");
                assert_eq!(args, vec![json!("user-1")]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_completion_with_error() {
        let line = r#"{"kind":"completion","id":"abc","error":"no such endpoint"}"#;
        match Frame::decode(line).unwrap() {
            Frame::Completion { id, result, error } => {
                assert_eq!(id, "abc");
                assert!(result.is_none());
                assert_eq!(error.as_deref(), Some("no such endpoint"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(Frame::decode(r#"{"kind":"subscribe"}"#).is_err());
        assert!(Frame::decode("not json at all").is_err());
    }
}
