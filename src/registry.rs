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

//! Registry of channel clients.
//!
//! One [`ChannelRegistry`] owns the clients for the three logical channels.
//! It is a plain value held by whatever owns the session (no process-wide
//! singleton); dropping it stops every connection.

use std::collections::HashMap;
use std::sync::Mutex;

use url::Url;

use crate::client::{ChannelClient, ClientError};
use crate::transport::{BackoffSchedule, ConnectionConfig};

/// Default port when the base URL does not carry one.
pub const DEFAULT_PORT: u16 = 7420;

/// Logical real-time channels exposed by the dashboard server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Monitoring,
    Logs,
    Notifications,
}

impl Channel {
    /// Path of this channel under the base URL.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Monitoring => "/hubs/monitoring",
            Self::Logs => "/hubs/logs",
            Self::Notifications => "/hubs/notifications",
        }
    }
}

/// Shared settings for every channel built by the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL of the dashboard server, e.g. "pulse://dashboard.example.com:7420".
    pub base_url: String,
    /// Bearer token attached to every handshake.
    pub access_token: Option<String>,
    /// Reconnection schedule shared by all channels.
    pub backoff: BackoffSchedule,
    /// Channel buffer size passed through to the transport.
    pub buffer_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "pulse://localhost:7420".to_string(),
            access_token: None,
            backoff: BackoffSchedule::default(),
            buffer_size: 256,
        }
    }
}

/// Explicitly owned set of channel clients keyed by [`Channel`].
///
/// Clients are created lazily on first use and shared afterwards, so every
/// caller asking for the same channel gets the same connection.
pub struct ChannelRegistry {
    config: RegistryConfig,
    channels: Mutex<HashMap<Channel, ChannelClient>>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Get the client for a channel, creating it on first use.
    pub fn get(&self, channel: Channel) -> Result<ChannelClient, ClientError> {
        let mut channels = self.channels.lock().expect("registry mutex poisoned");
        if let Some(client) = channels.get(&channel) {
            return Ok(client.clone());
        }

        let config = self.connection_config(channel)?;
        let client = ChannelClient::new(config);
        channels.insert(channel, client.clone());
        Ok(client)
    }

    /// Number of channels created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.lock().expect("registry mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every channel. Clients can be started again afterwards.
    pub fn stop_all(&self) {
        let channels = self.channels.lock().expect("registry mutex poisoned");
        for client in channels.values() {
            client.stop();
        }
    }

    fn connection_config(&self, channel: Channel) -> Result<ConnectionConfig, ClientError> {
        let url = Url::parse(&self.config.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", self.config.base_url)))?;
        let host = url
            .host_str()
            .ok_or_else(|| {
                ClientError::InvalidUrl(format!("{}: missing host", self.config.base_url))
            })?
            .to_string();
        let port = url.port().unwrap_or(DEFAULT_PORT);

        // Channel paths hang off whatever path the base URL carries.
        let base_path = url.path().trim_end_matches('/');
        let channel_path = format!("{base_path}{}", channel.path());

        Ok(ConnectionConfig {
            host,
            port,
            channel: channel_path,
            token: self.config.access_token.clone(),
            backoff: self.config.backoff.clone(),
            buffer_size: self.config.buffer_size,
            ..Default::default()
        })
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(RegistryConfig {
            base_url: "pulse://dash.example.com:9100".to_string(),
            access_token: Some("tok".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_same_channel_returns_same_client() {
        let registry = registry();
        let a = registry.get(Channel::Notifications).unwrap();
        let b = registry.get(Channel::Notifications).unwrap();
        assert_eq!(a.channel(), b.channel());
        assert_eq!(registry.len(), 1);

        registry.get(Channel::Monitoring).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_channel_paths_hang_off_base_url() {
        let registry = ChannelRegistry::new(RegistryConfig {
            base_url: "pulse://dash.example.com/api".to_string(),
            ..Default::default()
        });
        let client = registry.get(Channel::Logs).unwrap();
        assert_eq!(client.channel(), "/api/hubs/logs");
    }

    #[tokio::test]
    async fn test_default_port_applies() {
        let registry = ChannelRegistry::new(RegistryConfig {
            base_url: "pulse://dash.example.com".to_string(),
            ..Default::default()
        });
        let client = registry.get(Channel::Monitoring).unwrap();
        assert_eq!(client.channel(), "/hubs/monitoring");
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_rejected() {
        let registry = ChannelRegistry::new(RegistryConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            registry.get(Channel::Monitoring),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
