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

//! Log shipping to the hosted logs table.
//!
//! [`LogClient`] inserts rows into the remote logs table, singly or in
//! batches. Levels are normalized to upper case and validated before any
//! request goes out; a missing access token is an error raised without
//! touching the network; remote insert failures propagate unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Accepted log levels after upper-casing.
pub const VALID_LEVELS: [&str; 4] = ["DEBUG", "INFO", "WARN", "ERROR"];

const INSERT_PATH: &str = "/rest/v1/logs";

/// One row in the remote logs table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Create an entry with the current timestamp.
    #[must_use]
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
            service: None,
            source: None,
            meta: None,
            endpoint_id: None,
            user_id: None,
            timestamp: Utc::now(),
        }
    }
}

/// Errors raised by the log client.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invalid logs url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("not authenticated: an access token is required to write logs")]
    Unauthenticated,

    #[error("invalid log level '{0}': expected DEBUG, INFO, WARN or ERROR")]
    InvalidLevel(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Client for the remote logs table.
#[derive(Debug, Clone)]
pub struct LogClient {
    http: reqwest::Client,
    insert_url: Url,
    access_token: Option<String>,
}

impl LogClient {
    /// Build a client against the logs endpoint under `base_url`.
    pub fn new(base_url: &str, access_token: Option<String>) -> Result<Self, LogError> {
        let base = Url::parse(base_url)?;
        let insert_url = base.join(INSERT_PATH)?;
        Ok(Self {
            http: reqwest::Client::new(),
            insert_url,
            access_token,
        })
    }

    /// Insert a single row.
    pub async fn insert(&self, entry: LogEntry) -> Result<(), LogError> {
        self.insert_batch(vec![entry]).await
    }

    /// Insert a batch of rows in one request.
    ///
    /// The whole batch is validated before anything is sent; an empty batch
    /// is a no-op.
    pub async fn insert_batch(&self, entries: Vec<LogEntry>) -> Result<(), LogError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or(LogError::Unauthenticated)?;

        let rows = entries
            .into_iter()
            .map(normalize)
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Ok(());
        }

        self.http
            .post(self.insert_url.clone())
            .bearer_auth(token)
            .json(&rows)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Upper-case the level and reject anything outside the accepted set.
fn normalize(mut entry: LogEntry) -> Result<LogEntry, LogError> {
    let level = entry.level.to_uppercase();
    if !VALID_LEVELS.contains(&level.as_str()) {
        return Err(LogError::InvalidLevel(entry.level));
    }
    entry.level = level;
    Ok(entry)
}
