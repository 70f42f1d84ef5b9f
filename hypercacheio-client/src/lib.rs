//! A small `reqwest`-based client for talking to a running hypercacheio
//! node, used by the integration tests and available to operators as a
//! library: one HTTP call per method, errors translated into a typed enum
//! rather than bubbling up `reqwest::Error` directly.

use hypercacheio_common::{ErrorResponse, TransportError};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), token: token.into() }
    }
}

pub struct Client {
    config: ClientConfig,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ValueBody<'a> {
    value: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DataResponse {
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AddedResponse {
    added: bool,
}

#[derive(Debug, Deserialize)]
struct AcquiredResponse {
    acquired: bool,
}

#[derive(Debug, Deserialize)]
struct ReleasedResponse {
    released: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingInfo {
    pub hostname: String,
    pub peers: Vec<String>,
    pub items: usize,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config, http: reqwest::Client::new() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// `GET /cache/<key>` — `None` means the key is absent (or its stored
    /// bytes failed to decode); the server never distinguishes the two.
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let response = self
            .http
            .get(self.url(&format!("/cache/{key}")))
            .header("X-Hypercacheio-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error(status, response).await);
        }
        let body: DataResponse = response.json().await.map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(body.data)
    }

    /// `POST /cache/<key>`. `ttl <= 0` or `None` stores the value forever.
    pub async fn put(&self, key: &str, value: &serde_json::Value, ttl: Option<i64>) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/cache/{key}")))
            .header("X-Hypercacheio-Token", &self.config.token)
            .json(&ValueBody { value, ttl })
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error(status, response).await);
        }
        Ok(())
    }

    /// `DELETE /cache/<key>` — idempotent.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/cache/{key}")))
            .header("X-Hypercacheio-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error(status, response).await);
        }
        Ok(())
    }

    /// `DELETE /cache/` — flushes the entire cache.
    pub async fn flush(&self) -> Result<()> {
        let response = self
            .http
            .delete(self.url("/cache/"))
            .header("X-Hypercacheio-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error(status, response).await);
        }
        Ok(())
    }

    /// `POST /add/<key>` — returns whether this call created the entry.
    pub async fn add(&self, key: &str, value: &serde_json::Value, ttl: Option<i64>) -> Result<bool> {
        let response = self
            .http
            .post(self.url(&format!("/add/{key}")))
            .header("X-Hypercacheio-Token", &self.config.token)
            .json(&ValueBody { value, ttl })
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error(status, response).await);
        }
        let body: AddedResponse = response.json().await.map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(body.added)
    }

    /// `POST /lock/<name>` — returns whether `owner` now holds the lock.
    pub async fn lock_acquire(&self, name: &str, owner: &serde_json::Value, ttl: Option<i64>) -> Result<bool> {
        #[derive(Serialize)]
        struct Body<'a> {
            owner: &'a serde_json::Value,
            #[serde(skip_serializing_if = "Option::is_none")]
            ttl: Option<i64>,
        }
        let response = self
            .http
            .post(self.url(&format!("/lock/{name}")))
            .header("X-Hypercacheio-Token", &self.config.token)
            .json(&Body { owner, ttl })
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error(status, response).await);
        }
        let body: AcquiredResponse = response.json().await.map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(body.acquired)
    }

    /// `DELETE /lock/<name>` — returns whether `owner` actually held (and
    /// thus released) the lock.
    pub async fn lock_release(&self, name: &str, owner: &serde_json::Value) -> Result<bool> {
        #[derive(Serialize)]
        struct Body<'a> {
            owner: &'a serde_json::Value,
        }
        let response = self
            .http
            .delete(self.url(&format!("/lock/{name}")))
            .header("X-Hypercacheio-Token", &self.config.token)
            .json(&Body { owner })
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error(status, response).await);
        }
        let body: ReleasedResponse = response.json().await.map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(body.released)
    }

    /// `GET /ping` — the node's hostname, current peer list, and item count.
    pub async fn ping(&self) -> Result<PingInfo> {
        let response = self
            .http
            .get(self.url("/ping"))
            .header("X-Hypercacheio-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(parse_error(status, response).await);
        }
        response.json().await.map_err(|e| TransportError::Network(e.to_string()))
    }
}

async fn parse_error(status: reqwest::StatusCode, response: reqwest::Response) -> TransportError {
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return TransportError::Unauthorized;
    }
    let message = response.json::<ErrorResponse>().await.map(|r| r.error).unwrap_or_else(|_| status.to_string());
    TransportError::Http(status.as_u16(), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_null_data_as_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/cache/missing")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": null}"#)
            .create_async()
            .await;
        let client = Client::new(ClientConfig::new(server.url(), "secret"));
        assert_eq!(client.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unauthorized_response_maps_to_unauthorized_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/cache/k")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "Unauthorized"}"#)
            .create_async()
            .await;
        let client = Client::new(ClientConfig::new(server.url(), "wrong"));
        assert_eq!(client.get("k").await.unwrap_err(), TransportError::Unauthorized);
    }

    #[tokio::test]
    async fn put_sends_the_authorization_header() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/cache/k")
            .match_header("X-Hypercacheio-Token", "secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;
        let client = Client::new(ClientConfig::new(server.url(), "secret"));
        client.put("k", &serde_json::json!("v"), None).await.unwrap();
    }
}
