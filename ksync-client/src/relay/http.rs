//! HTTP relay client.
//!
//! Talks JSON to the relay API with a bearer token:
//!
//! | Operation | Route |
//! |-----------|-------|
//! | list messages | `GET /projects/{project}/messages/{device_uid}` |
//! | upload batch | `POST /messages` |
//! | acknowledge | `DELETE /messages/{id}` |
//! | environment readers | `GET /environments/{id}/public-keys` |
//! | user key | `GET /users/{user}/public-key[?device_id=N]` |

use super::{Relay, TransportError};
use async_trait::async_trait;
use ksync_types::{
    DeviceId, DeviceKey, EnvironmentId, EnvironmentMessages, MessageBatch, MessageId, PublicKey,
    SendReceipt, UserId,
};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Relay reached over HTTPS.
#[derive(Clone)]
pub struct HttpRelay {
    client: Client,
    base_url: Url,
    token: String,
}

#[derive(Deserialize)]
struct UserKeyResponse {
    public_key: PublicKey,
}

impl HttpRelay {
    /// Create a client for the relay at `base_url`.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportError::Unavailable(format!("invalid relay url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::Unavailable(format!(
                "invalid relay url: {}",
                base_url
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    /// Build an endpoint URL from path segments, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, TransportError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(map_reqwest)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, body))
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, TransportError> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

// Never print the token
impl std::fmt::Debug for HttpRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRelay")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Map a non-success HTTP status to a transport error.
pub(crate) fn map_status(status: StatusCode, body: String) -> TransportError {
    match status {
        StatusCode::UNAUTHORIZED => TransportError::Unauthorized,
        StatusCode::NOT_FOUND => TransportError::NotFound(body),
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::CONFLICT => {
            TransportError::Rejected(body)
        }
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            TransportError::Unavailable(format!("status {}", status.as_u16()))
        }
        _ => TransportError::Status {
            code: status.as_u16(),
            body,
        },
    }
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn get_messages(
        &self,
        project_id: &str,
        device_uid: &str,
    ) -> Result<Vec<EnvironmentMessages>, TransportError> {
        let url = self.endpoint(&["projects", project_id, "messages", device_uid]);
        debug!(%url, "listing messages");
        self.execute_json(self.client.get(url)).await
    }

    async fn send_messages(&self, batch: &MessageBatch) -> Result<SendReceipt, TransportError> {
        let url = self.endpoint(&["messages"]);
        debug!(%url, count = batch.len(), "uploading messages");
        self.execute_json(self.client.post(url).json(batch)).await
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), TransportError> {
        let id = id.to_string();
        let url = self.endpoint(&["messages", &id]);
        debug!(%url, "deleting message");
        self.execute(self.client.delete(url)).await.map(|_| ())
    }

    async fn get_environment_public_keys(
        &self,
        environment: &EnvironmentId,
    ) -> Result<Vec<DeviceKey>, TransportError> {
        let url = self.endpoint(&["environments", environment.as_str(), "public-keys"]);
        self.execute_json(self.client.get(url)).await
    }

    async fn get_user_public_key(
        &self,
        user: &UserId,
        device: Option<DeviceId>,
    ) -> Result<PublicKey, TransportError> {
        let mut url = self.endpoint(&["users", user.as_str(), "public-key"]);
        if let Some(device) = device {
            url.query_pairs_mut()
                .append_pair("device_id", &device.to_string());
        }
        let response: UserKeyResponse = self.execute_json(self.client.get(url)).await?;
        Ok(response.public_key)
    }
}
