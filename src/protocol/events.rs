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

//! Typed event payloads and outbound method calls.
//!
//! Every server-pushed event carries a name (`target`) and a JSON payload.
//! [`EventPayload`] ties a payload struct to its event name so subscriptions
//! are checked at compile time instead of dispatching on loose strings.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// A server event payload with its wire-level event name.
pub trait EventPayload: DeserializeOwned + Send + 'static {
    /// Event name as it appears in the frame's `target` field.
    const NAME: &'static str;
}

/// Reachability of a monitored endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    Up,
    Down,
    Degraded,
    Unknown,
}

/// Latest status of one monitored endpoint (monitoring channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatusUpdate {
    pub endpoint_id: String,
    pub status: EndpointState,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl EventPayload for EndpointStatusUpdate {
    const NAME: &'static str = "EndpointStatusUpdate";
}

/// Fleet-wide rollup pushed periodically on the monitoring channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub total_endpoints: u32,
    pub endpoints_up: u32,
    pub endpoints_down: u32,
    pub avg_response_time_ms: Option<f64>,
    pub generated_at: DateTime<Utc>,
}

impl EventPayload for MetricsUpdate {
    const NAME: &'static str = "MetricsUpdate";
}

/// Outcome of a single health check probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub endpoint_id: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl EventPayload for HealthCheckResult {
    const NAME: &'static str = "HealthCheckResult";
}

/// Acknowledgement that an on-demand check was queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequested {
    pub endpoint_id: String,
    pub requested_by: Option<String>,
}

impl EventPayload for CheckRequested {
    const NAME: &'static str = "CheckRequested";
}

/// Server-side error surfaced on the monitoring channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
}

impl EventPayload for ServerError {
    const NAME: &'static str = "Error";
}

/// A per-user notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub action_url: Option<String>,
}

impl EventPayload for Notification {
    const NAME: &'static str = "Notification";
}

/// Priority of a system-wide announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementPriority {
    Info,
    Warning,
    Critical,
}

/// System-wide announcement, optionally expiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub priority: AnnouncementPriority,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl EventPayload for SystemNotification {
    const NAME: &'static str = "SystemNotification";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
}

/// An alert raised or resolved by a monitoring rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub id: String,
    pub rule_id: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    #[serde(default)]
    pub endpoint_id: Option<String>,
    pub triggered_at: DateTime<Utc>,
}

impl EventPayload for AlertNotification {
    const NAME: &'static str = "AlertNotification";
}

/// An endpoint stopped responding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDownNotification {
    pub endpoint_id: String,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl EventPayload for EndpointDownNotification {
    const NAME: &'static str = "EndpointDownNotification";
}

/// An endpoint came back after an outage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecoveredNotification {
    pub endpoint_id: String,
    pub downtime_seconds: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

impl EventPayload for EndpointRecoveredNotification {
    const NAME: &'static str = "EndpointRecoveredNotification";
}

/// Server-reported view of the subscription (sent after joining a group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl EventPayload for ConnectionStatus {
    const NAME: &'static str = "ConnectionStatus";
}

/// Confirmation that a notification was marked as read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMarkedAsRead {
    pub id: String,
}

impl EventPayload for NotificationMarkedAsRead {
    const NAME: &'static str = "NotificationMarkedAsRead";
}

/// Current number of unread notifications for the joined user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: u32,
}

impl EventPayload for UnreadCount {
    const NAME: &'static str = "UnreadCount";
}

/// Methods the client can invoke on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCall {
    JoinUserGroup { user_id: String },
    GetUnreadCount,
    MarkNotificationAsRead { id: String },
    RequestEndpointCheck { endpoint_id: String },
}

impl OutboundCall {
    /// Wire-level method name.
    #[must_use]
    pub fn target(&self) -> &'static str {
        match self {
            Self::JoinUserGroup { .. } => "JoinUserGroup",
            Self::GetUnreadCount => "GetUnreadCount",
            Self::MarkNotificationAsRead { .. } => "MarkNotificationAsRead",
            Self::RequestEndpointCheck { .. } => "RequestEndpointCheck",
        }
    }

    /// Positional arguments for the invocation frame.
    #[must_use]
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::JoinUserGroup { user_id } => vec![Value::String(user_id.clone())],
            Self::GetUnreadCount => Vec::new(),
            Self::MarkNotificationAsRead { id } => vec![Value::String(id.clone())],
            Self::RequestEndpointCheck { endpoint_id } => {
                vec![Value::String(endpoint_id.clone())]
            }
        }
    }
}
