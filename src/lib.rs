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

//! Client library for the Pulsewatch monitoring dashboard.
//!
//! The library maintains persistent, reconnecting connections to the
//! dashboard's real-time channels and mirrors server-pushed traffic into
//! bounded in-memory state. It is built from layers that can be used
//! independently or composed together:
//!
//! - **Protocol layer**: frame model and typed event payloads
//! - **Transport layer**: async connection with schedule-driven reconnection
//! - **Client layer**: lifecycle, typed subscriptions, invocations
//! - **State layer**: bounded notification feeds and the endpoint board
//! - **Logging**: shipping log rows to the hosted logs table
//!
//! # Quick Start
//!
//! Use [`DashboardClient`] for full-stack operation:
//!
//! ```no_run
//! use pulsewatch::{DashboardClient, DashboardConfig, RegistryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pulsewatch::ClientError> {
//!     let client = DashboardClient::new(DashboardConfig {
//!         registry: RegistryConfig {
//!             base_url: "pulse://dashboard.example.com:7420".to_string(),
//!             access_token: Some("token".to_string()),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     });
//!
//!     client.connect().await?;
//!     client.join_user_group("user-1").await?;
//!
//!     for n in client.notifications() {
//!         println!("{}: {}", n.title, n.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! A single channel can be driven directly:
//!
//! ```no_run
//! use pulsewatch::protocol::UnreadCount;
//! use pulsewatch::{ChannelClient, ConnectionConfig};
//!
//! # async fn example() -> Result<(), pulsewatch::ClientError> {
//! let client = ChannelClient::new(ConnectionConfig {
//!     host: "dashboard.example.com".to_string(),
//!     channel: "/hubs/notifications".to_string(),
//!     ..Default::default()
//! });
//!
//! client.on::<UnreadCount, _>(|event| println!("{} unread", event.count));
//! client.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod feeds;
pub mod logging;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde_json::Value;

pub use client::{ChannelClient, ClientError, HandlerId};
pub use feeds::{FeedConfig, FeedEvent, NotificationFeeds};
pub use logging::{LogClient, LogEntry, LogError};
pub use monitor::{BoardConfig, BoardEvent, EndpointBoard, EndpointSnapshot};
pub use registry::{Channel, ChannelRegistry, RegistryConfig};
pub use transport::{BackoffSchedule, ConnectionConfig, ConnectionState};

use protocol::{
    AlertNotification, CheckRequested, ConnectionStatus, EndpointDownNotification,
    EndpointRecoveredNotification, EndpointStatusUpdate, HealthCheckResult, MetricsUpdate,
    Notification, NotificationMarkedAsRead, OutboundCall, ServerError, SystemNotification,
    UnreadCount,
};

/// Configuration for the composed dashboard client.
#[derive(Debug, Clone, Default)]
pub struct DashboardConfig {
    pub registry: RegistryConfig,
    pub feeds: FeedConfig,
    pub board: BoardConfig,
}

/// Full-stack dashboard client wiring all layers together.
///
/// Owns the channel registry, routes typed events from the monitoring and
/// notifications channels into the feed and board state, and exposes the
/// user-facing actions as server invocations.
pub struct DashboardClient {
    registry: ChannelRegistry,
    feeds: Arc<Mutex<NotificationFeeds>>,
    board: Arc<Mutex<EndpointBoard>>,
    wired: AtomicBool,
}

impl std::fmt::Debug for DashboardClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardClient")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl DashboardClient {
    #[must_use]
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            registry: ChannelRegistry::new(config.registry),
            feeds: Arc::new(Mutex::new(NotificationFeeds::new(config.feeds))),
            board: Arc::new(Mutex::new(EndpointBoard::new(config.board))),
            wired: AtomicBool::new(false),
        }
    }

    /// Connect the monitoring and notifications channels.
    ///
    /// Event handlers are attached once; calling this again after a `stop`
    /// just restarts the connections.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let monitoring = self.registry.get(Channel::Monitoring)?;
        let notifications = self.registry.get(Channel::Notifications)?;

        if !self.wired.swap(true, Ordering::SeqCst) {
            self.wire_monitoring(&monitoring);
            self.wire_notifications(&notifications);
        }

        let (a, b) = tokio::join!(monitoring.start(), notifications.start());
        a?;
        b?;
        Ok(())
    }

    /// Stop every channel connection. The client can connect again later.
    pub fn shutdown(&self) {
        self.registry.stop_all();
    }

    /// Access a raw channel client (e.g. the logs channel for a log viewer).
    pub fn channel(&self, channel: Channel) -> Result<ChannelClient, ClientError> {
        self.registry.get(channel)
    }

    /// Subscribe this session to a user's notification group.
    pub async fn join_user_group(&self, user_id: &str) -> Result<(), ClientError> {
        let client = self.registry.get(Channel::Notifications)?;
        client
            .call(OutboundCall::JoinUserGroup {
                user_id: user_id.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Mark a notification as read on the server and mirror it locally.
    pub async fn mark_notification_read(&self, id: &str) -> Result<(), ClientError> {
        let client = self.registry.get(Channel::Notifications)?;
        client
            .call(OutboundCall::MarkNotificationAsRead { id: id.to_string() })
            .await?;
        // The server also pushes NotificationMarkedAsRead; mark_read is
        // idempotent so applying both is safe.
        self.feeds
            .lock()
            .expect("feeds mutex poisoned")
            .mark_read(id);
        Ok(())
    }

    /// Ask the server to run a check for one endpoint now.
    pub async fn request_endpoint_check(&self, endpoint_id: &str) -> Result<(), ClientError> {
        let client = self.registry.get(Channel::Monitoring)?;
        client
            .call(OutboundCall::RequestEndpointCheck {
                endpoint_id: endpoint_id.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Fetch the authoritative unread count and store it.
    pub async fn refresh_unread_count(&self) -> Result<u32, ClientError> {
        let client = self.registry.get(Channel::Notifications)?;
        let result = client.call(OutboundCall::GetUnreadCount).await?;

        let count = match result {
            Value::Number(ref n) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| ClientError::BadResult(result.to_string()))?,
            other => return Err(ClientError::BadResult(other.to_string())),
        };

        self.feeds
            .lock()
            .expect("feeds mutex poisoned")
            .set_unread(count);
        Ok(count)
    }

    /// Retained notifications, newest first.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.feeds
            .lock()
            .expect("feeds mutex poisoned")
            .notifications()
    }

    /// Unexpired announcements, newest first.
    #[must_use]
    pub fn announcements(&self) -> Vec<SystemNotification> {
        self.feeds
            .lock()
            .expect("feeds mutex poisoned")
            .announcements()
    }

    /// Retained alerts, newest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<AlertNotification> {
        self.feeds.lock().expect("feeds mutex poisoned").alerts()
    }

    #[must_use]
    pub fn unread_count(&self) -> u32 {
        self.feeds
            .lock()
            .expect("feeds mutex poisoned")
            .unread_count()
    }

    /// All endpoint snapshots on the board.
    #[must_use]
    pub fn endpoints(&self) -> Vec<EndpointSnapshot> {
        self.board.lock().expect("board mutex poisoned").endpoints()
    }

    /// Latest snapshot for one endpoint.
    #[must_use]
    pub fn endpoint(&self, endpoint_id: &str) -> Option<EndpointSnapshot> {
        self.board
            .lock()
            .expect("board mutex poisoned")
            .endpoint(endpoint_id)
            .cloned()
    }

    /// Recent health check results, newest first.
    #[must_use]
    pub fn recent_checks(&self) -> Vec<HealthCheckResult> {
        self.board
            .lock()
            .expect("board mutex poisoned")
            .recent_checks()
    }

    /// Last fleet-wide metrics rollup.
    #[must_use]
    pub fn last_metrics(&self) -> Option<MetricsUpdate> {
        self.board
            .lock()
            .expect("board mutex poisoned")
            .last_metrics()
            .cloned()
    }

    /// Subscribe to feed change events.
    #[must_use]
    pub fn feed_events(&self) -> tokio::sync::broadcast::Receiver<FeedEvent> {
        self.feeds.lock().expect("feeds mutex poisoned").subscribe()
    }

    /// Subscribe to endpoint board change events.
    #[must_use]
    pub fn board_events(&self) -> tokio::sync::broadcast::Receiver<BoardEvent> {
        self.board.lock().expect("board mutex poisoned").subscribe()
    }

    fn wire_monitoring(&self, client: &ChannelClient) {
        let board = Arc::clone(&self.board);
        client.on::<EndpointStatusUpdate, _>(move |event| {
            board
                .lock()
                .expect("board mutex poisoned")
                .apply_status(event);
        });

        let board = Arc::clone(&self.board);
        client.on::<MetricsUpdate, _>(move |event| {
            board
                .lock()
                .expect("board mutex poisoned")
                .apply_metrics(event);
        });

        let board = Arc::clone(&self.board);
        client.on::<HealthCheckResult, _>(move |event| {
            board
                .lock()
                .expect("board mutex poisoned")
                .apply_health_check(event);
        });

        client.on::<CheckRequested, _>(|event| {
            debug!("Check queued for endpoint {}", event.endpoint_id);
        });

        client.on::<ServerError, _>(|event| {
            warn!("Monitoring channel error: {}", event.message);
        });
    }

    fn wire_notifications(&self, client: &ChannelClient) {
        let feeds = Arc::clone(&self.feeds);
        client.on::<Notification, _>(move |event| {
            feeds
                .lock()
                .expect("feeds mutex poisoned")
                .push_notification(event);
        });

        let feeds = Arc::clone(&self.feeds);
        client.on::<SystemNotification, _>(move |event| {
            feeds
                .lock()
                .expect("feeds mutex poisoned")
                .push_announcement(event);
        });

        let feeds = Arc::clone(&self.feeds);
        client.on::<AlertNotification, _>(move |event| {
            feeds
                .lock()
                .expect("feeds mutex poisoned")
                .push_alert(event);
        });

        let feeds = Arc::clone(&self.feeds);
        client.on::<NotificationMarkedAsRead, _>(move |event| {
            feeds
                .lock()
                .expect("feeds mutex poisoned")
                .mark_read(&event.id);
        });

        let feeds = Arc::clone(&self.feeds);
        client.on::<UnreadCount, _>(move |event| {
            feeds
                .lock()
                .expect("feeds mutex poisoned")
                .set_unread(event.count);
        });

        let board = Arc::clone(&self.board);
        client.on::<EndpointDownNotification, _>(move |event| {
            board
                .lock()
                .expect("board mutex poisoned")
                .apply_down(&event);
        });

        let board = Arc::clone(&self.board);
        client.on::<EndpointRecoveredNotification, _>(move |event| {
            board
                .lock()
                .expect("board mutex poisoned")
                .apply_recovered(&event);
        });

        client.on::<ConnectionStatus, _>(|event| {
            info!(
                "Notifications channel subscription: connected={} {}",
                event.connected,
                event.message.as_deref().unwrap_or_default()
            );
        });
    }
}
