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

//! Bounded, most-recent-first feed state.
//!
//! Mirrors server-pushed notification traffic into capped in-memory lists:
//! newest item at the head, oldest evicted once a feed is at capacity.
//! Nothing here persists; identity is whatever id the server supplied.

use std::collections::VecDeque;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::protocol::{AlertNotification, Notification, SystemNotification};

/// Feed capacities and event channel sizing.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Retained per-user notifications.
    pub notification_cap: usize,
    /// Retained system announcements.
    pub announcement_cap: usize,
    /// Retained alerts.
    pub alert_cap: usize,
    /// Broadcast channel capacity for change events.
    pub event_channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            notification_cap: 100,
            announcement_cap: 10,
            alert_cap: 50,
            event_channel_capacity: 256,
        }
    }
}

/// Change events emitted as feed state mutates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A notification was added (by id).
    NotificationAdded(String),
    /// A notification's read flag flipped to read (by id).
    NotificationRead(String),
    /// The unread count changed.
    UnreadCountChanged(u32),
    /// A system announcement was added (by id).
    AnnouncementAdded(String),
    /// An alert was added (by id).
    AlertAdded(String),
}

/// In-memory state for the three notification feeds.
pub struct NotificationFeeds {
    notifications: VecDeque<Notification>,
    announcements: VecDeque<SystemNotification>,
    alerts: VecDeque<AlertNotification>,
    unread: u32,
    config: FeedConfig,
    event_tx: broadcast::Sender<FeedEvent>,
}

impl std::fmt::Debug for NotificationFeeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFeeds")
            .field("notifications", &self.notifications.len())
            .field("announcements", &self.announcements.len())
            .field("alerts", &self.alerts.len())
            .field("unread", &self.unread)
            .finish()
    }
}

impl NotificationFeeds {
    #[must_use]
    pub fn new(config: FeedConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            notifications: VecDeque::new(),
            announcements: VecDeque::new(),
            alerts: VecDeque::new(),
            unread: 0,
            config,
            event_tx,
        }
    }

    /// Subscribe to feed change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.event_tx.subscribe()
    }

    /// Insert a notification at the head, evicting past capacity.
    pub fn push_notification(&mut self, notification: Notification) {
        let id = notification.id.clone();
        if !notification.read {
            self.unread = self.unread.saturating_add(1);
            let _ = self.event_tx.send(FeedEvent::UnreadCountChanged(self.unread));
        }
        self.notifications.push_front(notification);
        self.notifications.truncate(self.config.notification_cap);
        let _ = self.event_tx.send(FeedEvent::NotificationAdded(id));
    }

    /// Insert a system announcement, dropping any that have expired.
    pub fn push_announcement(&mut self, announcement: SystemNotification) {
        let id = announcement.id.clone();
        self.announcements.push_front(announcement);
        self.prune_expired_announcements();
        self.announcements.truncate(self.config.announcement_cap);
        let _ = self.event_tx.send(FeedEvent::AnnouncementAdded(id));
    }

    /// Insert an alert at the head, evicting past capacity.
    pub fn push_alert(&mut self, alert: AlertNotification) {
        let id = alert.id.clone();
        self.alerts.push_front(alert);
        self.alerts.truncate(self.config.alert_cap);
        let _ = self.event_tx.send(FeedEvent::AlertAdded(id));
    }

    /// Mark one notification as read.
    ///
    /// Flips exactly the matching item's read flag; the unread count only
    /// decrements when the flag actually changes, so repeated calls are
    /// idempotent and the count never goes negative.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(item) = self.notifications.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        if item.read {
            return false;
        }
        item.read = true;
        self.unread = self.unread.saturating_sub(1);
        let _ = self.event_tx.send(FeedEvent::NotificationRead(id.to_string()));
        let _ = self.event_tx.send(FeedEvent::UnreadCountChanged(self.unread));
        true
    }

    /// Replace the unread count with the server's authoritative value.
    pub fn set_unread(&mut self, count: u32) {
        if self.unread != count {
            self.unread = count;
            let _ = self.event_tx.send(FeedEvent::UnreadCountChanged(count));
        }
    }

    #[must_use]
    pub fn unread_count(&self) -> u32 {
        self.unread
    }

    /// Retained notifications, newest first.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.iter().cloned().collect()
    }

    /// Unexpired announcements, newest first.
    #[must_use]
    pub fn announcements(&mut self) -> Vec<SystemNotification> {
        self.prune_expired_announcements();
        self.announcements.iter().cloned().collect()
    }

    /// Retained alerts, newest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<AlertNotification> {
        self.alerts.iter().cloned().collect()
    }

    fn prune_expired_announcements(&mut self) {
        let now = Utc::now();
        self.announcements
            .retain(|a| a.expires_at.map_or(true, |expiry| expiry > now));
    }
}
