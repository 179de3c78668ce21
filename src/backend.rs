//! A reference `BackendClient` implementation talking to a Jellyfin-family
//! (Jellyfin/Emby) HTTP API, plus a logging-only `ActionQueue`.
//!
//! This is deliberately thin: a real deployment would want per-backend-kind
//! wire handling (Plex's API differs from Jellyfin/Emby's) and a durable,
//! retrying outbound queue. Both are out of scope here; this module exists
//! so the `export` command has something concrete to run against.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use watchstate_core::ItemType;
use watchstate_export::{Action, ActionQueue, BackendClient, BackendPlayState};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpBackendClient {
    client: Client,
    base_url: String,
    api_key: String,
    name: String,
}

impl HttpBackendClient {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder().timeout(CONNECTION_TIMEOUT).build().unwrap_or_else(|e| {
            tracing::warn!("failed to build http client: {e}");
            Client::new()
        });

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ItemResponse {
    #[serde(rename = "UserData")]
    user_data: Option<UserData>,
    #[serde(rename = "DateCreated")]
    date_created: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct UserData {
    #[serde(rename = "Played")]
    played: bool,
    #[serde(rename = "LastPlayedDate")]
    last_played_date: Option<String>,
}

fn parse_timestamp(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp())
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_play_state(
        &self,
        backend_id: &str,
        _kind: ItemType,
    ) -> watchstate_common::Result<Option<BackendPlayState>> {
        let url = format!("{}/Items/{backend_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Emby-Token", &self.api_key)
            .send()
            .await
            .map_err(|e| watchstate_common::Error::transient(format!("request to {}: {e}", self.name)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(watchstate_common::Error::database(format!(
                "{} returned {}",
                self.name,
                response.status()
            )));
        }

        let body: ItemResponse = response
            .json()
            .await
            .map_err(|e| watchstate_common::Error::internal(format!("decoding {} response: {e}", self.name)))?;

        let user_data = body.user_data.unwrap_or(UserData {
            played: false,
            last_played_date: None,
        });

        Ok(Some(BackendPlayState {
            watched: user_data.played,
            last_played_date: user_data.last_played_date.as_deref().and_then(parse_timestamp),
            date_created: body.date_created.as_deref().and_then(parse_timestamp),
        }))
    }
}

/// An `ActionQueue` that only logs what would be dispatched. Standing in
/// for the real outbound-request queue, which is out of scope.
#[derive(Default)]
pub struct LoggingActionQueue;

impl ActionQueue for LoggingActionQueue {
    fn enqueue(&self, action: Action) -> watchstate_common::Result<()> {
        tracing::info!(backend = action.backend(), action = ?action, "export action queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_queue_accepts_actions() {
        let queue = LoggingActionQueue;
        let action = Action::MarkUnplayed {
            backend: "jellyfin".to_string(),
            backend_id: "42".to_string(),
            kind: ItemType::Movie,
        };
        assert!(queue.enqueue(action).is_ok());
    }
}
