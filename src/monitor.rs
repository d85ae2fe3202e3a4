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

//! Endpoint status board fed by the monitoring channel.
//!
//! Keeps the latest snapshot per endpoint, a bounded list of recent health
//! check results, and the last fleet-wide metrics rollup. Emits change
//! events so observers can mirror the board without polling.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::protocol::{
    EndpointDownNotification, EndpointRecoveredNotification, EndpointState, EndpointStatusUpdate,
    HealthCheckResult, MetricsUpdate,
};

/// Board sizing.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Retained recent health check results.
    pub recent_checks_cap: usize,
    /// Broadcast channel capacity for change events.
    pub event_channel_capacity: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            recent_checks_cap: 50,
            event_channel_capacity: 256,
        }
    }
}

/// Latest known state of one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSnapshot {
    pub endpoint_id: String,
    pub status: EndpointState,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Change events emitted by the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    /// An endpoint's snapshot changed (by id).
    EndpointChanged(String),
    /// An endpoint transitioned to down (by id).
    EndpointDown(String),
    /// An endpoint recovered (by id).
    EndpointRecovered(String),
    /// A new metrics rollup arrived.
    MetricsUpdated,
}

/// In-memory mirror of the monitoring channel.
pub struct EndpointBoard {
    endpoints: HashMap<String, EndpointSnapshot>,
    recent_checks: VecDeque<HealthCheckResult>,
    last_metrics: Option<MetricsUpdate>,
    config: BoardConfig,
    event_tx: broadcast::Sender<BoardEvent>,
}

impl std::fmt::Debug for EndpointBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointBoard")
            .field("endpoints", &self.endpoints.len())
            .field("recent_checks", &self.recent_checks.len())
            .finish()
    }
}

impl EndpointBoard {
    #[must_use]
    pub fn new(config: BoardConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            endpoints: HashMap::new(),
            recent_checks: VecDeque::new(),
            last_metrics: None,
            config,
            event_tx,
        }
    }

    /// Subscribe to board change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.event_tx.subscribe()
    }

    /// Apply a status update from the monitoring channel.
    pub fn apply_status(&mut self, update: EndpointStatusUpdate) {
        let snapshot = EndpointSnapshot {
            endpoint_id: update.endpoint_id.clone(),
            status: update.status,
            status_code: update.status_code,
            response_time_ms: update.response_time_ms,
            error: update.error,
            checked_at: update.checked_at,
        };
        self.endpoints.insert(update.endpoint_id.clone(), snapshot);
        let _ = self
            .event_tx
            .send(BoardEvent::EndpointChanged(update.endpoint_id));
    }

    /// Record a health check result, evicting past capacity.
    pub fn apply_health_check(&mut self, result: HealthCheckResult) {
        self.recent_checks.push_front(result);
        self.recent_checks.truncate(self.config.recent_checks_cap);
    }

    /// Replace the fleet-wide metrics rollup.
    pub fn apply_metrics(&mut self, metrics: MetricsUpdate) {
        self.last_metrics = Some(metrics);
        let _ = self.event_tx.send(BoardEvent::MetricsUpdated);
    }

    /// Flip an endpoint to down from an outage notification.
    pub fn apply_down(&mut self, event: &EndpointDownNotification) {
        let snapshot = self
            .endpoints
            .entry(event.endpoint_id.clone())
            .or_insert_with(|| EndpointSnapshot {
                endpoint_id: event.endpoint_id.clone(),
                status: EndpointState::Unknown,
                status_code: None,
                response_time_ms: None,
                error: None,
                checked_at: event.occurred_at,
            });
        snapshot.status = EndpointState::Down;
        snapshot.status_code = event.status_code;
        snapshot.error = event.error.clone();
        snapshot.checked_at = event.occurred_at;
        let _ = self
            .event_tx
            .send(BoardEvent::EndpointDown(event.endpoint_id.clone()));
    }

    /// Flip an endpoint back to up from a recovery notification.
    pub fn apply_recovered(&mut self, event: &EndpointRecoveredNotification) {
        let snapshot = self
            .endpoints
            .entry(event.endpoint_id.clone())
            .or_insert_with(|| EndpointSnapshot {
                endpoint_id: event.endpoint_id.clone(),
                status: EndpointState::Unknown,
                status_code: None,
                response_time_ms: None,
                error: None,
                checked_at: event.occurred_at,
            });
        snapshot.status = EndpointState::Up;
        snapshot.error = None;
        snapshot.checked_at = event.occurred_at;
        let _ = self
            .event_tx
            .send(BoardEvent::EndpointRecovered(event.endpoint_id.clone()));
    }

    /// Latest snapshot for one endpoint.
    #[must_use]
    pub fn endpoint(&self, endpoint_id: &str) -> Option<&EndpointSnapshot> {
        self.endpoints.get(endpoint_id)
    }

    /// All endpoint snapshots.
    #[must_use]
    pub fn endpoints(&self) -> Vec<EndpointSnapshot> {
        self.endpoints.values().cloned().collect()
    }

    /// Recent health check results, newest first.
    #[must_use]
    pub fn recent_checks(&self) -> Vec<HealthCheckResult> {
        self.recent_checks.iter().cloned().collect()
    }

    /// Last fleet-wide metrics rollup, if any arrived yet.
    #[must_use]
    pub fn last_metrics(&self) -> Option<&MetricsUpdate> {
        self.last_metrics.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(endpoint_id: &str, status: EndpointState) -> EndpointStatusUpdate {
        EndpointStatusUpdate {
            endpoint_id: endpoint_id.to_string(),
            status,
            status_code: Some(200),
            response_time_ms: Some(42),
            error: None,
            checked_at: Utc::now(),
        }
    }

    fn check(endpoint_id: &str) -> HealthCheckResult {
        HealthCheckResult {
            endpoint_id: endpoint_id.to_string(),
            success: true,
            status_code: Some(200),
            response_time_ms: Some(12),
            error: None,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_updates_replace_snapshots() {
        let mut board = EndpointBoard::new(BoardConfig::default());
        board.apply_status(status("ep-1", EndpointState::Up));
        board.apply_status(status("ep-1", EndpointState::Degraded));
        board.apply_status(status("ep-2", EndpointState::Up));

        assert_eq!(board.len(), 2);
        assert_eq!(
            board.endpoint("ep-1").unwrap().status,
            EndpointState::Degraded
        );
    }

    #[test]
    fn test_down_and_recovered_flip_status() {
        let mut board = EndpointBoard::new(BoardConfig::default());
        let mut rx = board.subscribe();
        board.apply_status(status("ep-1", EndpointState::Up));
        let _ = rx.try_recv();

        board.apply_down(&EndpointDownNotification {
            endpoint_id: "ep-1".to_string(),
            status_code: Some(503),
            error: Some("gateway timeout".to_string()),
            occurred_at: Utc::now(),
        });
        assert_eq!(board.endpoint("ep-1").unwrap().status, EndpointState::Down);
        assert_eq!(
            rx.try_recv().unwrap(),
            BoardEvent::EndpointDown("ep-1".to_string())
        );

        board.apply_recovered(&EndpointRecoveredNotification {
            endpoint_id: "ep-1".to_string(),
            downtime_seconds: Some(90),
            occurred_at: Utc::now(),
        });
        let snapshot = board.endpoint("ep-1").unwrap();
        assert_eq!(snapshot.status, EndpointState::Up);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_down_notification_for_unknown_endpoint_creates_snapshot() {
        let mut board = EndpointBoard::new(BoardConfig::default());
        board.apply_down(&EndpointDownNotification {
            endpoint_id: "ep-new".to_string(),
            status_code: None,
            error: Some("connection refused".to_string()),
            occurred_at: Utc::now(),
        });
        assert_eq!(
            board.endpoint("ep-new").unwrap().status,
            EndpointState::Down
        );
    }

    #[test]
    fn test_recent_checks_are_bounded() {
        let mut board = EndpointBoard::new(BoardConfig {
            recent_checks_cap: 5,
            ..Default::default()
        });
        for i in 0..8 {
            let mut c = check("ep-1");
            c.response_time_ms = Some(i);
            board.apply_health_check(c);
        }

        let checks = board.recent_checks();
        assert_eq!(checks.len(), 5);
        assert_eq!(checks[0].response_time_ms, Some(7));
    }

    #[test]
    fn test_metrics_rollup_is_replaced() {
        let mut board = EndpointBoard::new(BoardConfig::default());
        assert!(board.last_metrics().is_none());

        board.apply_metrics(MetricsUpdate {
            total_endpoints: 10,
            endpoints_up: 9,
            endpoints_down: 1,
            avg_response_time_ms: Some(120.5),
            generated_at: Utc::now(),
        });
        assert_eq!(board.last_metrics().unwrap().endpoints_up, 9);
    }
}
