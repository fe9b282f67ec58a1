//! Stateless request functions against the matchmaker and gateway.

use async_trait::async_trait;
use ffb_shared::{
    Car, ClaimRequest, ClaimResponse, CreateSessionRequest, ReleaseRequest, ReleaseResponse,
    SessionResponse, ROUTE_CLAIM, ROUTE_RELEASE, ROUTE_ROOMS, ROUTE_SESSION_CREATE,
};
use reqwest::Client;

use crate::api_client::ApiClient;
use crate::config::EndpointConfig;
use crate::error::{require, SyncError};

/// Opaque play-session credential minted by the gateway.
///
/// Only presence is checked here; the value is handed to the game client
/// untouched and never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Result<Self, SyncError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SyncError::Decode(
                "gateway returned an empty session token".into(),
            ));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionToken(<{} bytes>)", self.0.len())
    }
}

/// The four calls the sync client makes. Each invocation is exactly one
/// attempt; retrying is left to whoever invoked it.
#[async_trait]
pub trait ResourceTransport: Send + Sync {
    /// `GET /rooms`, in server order.
    async fn list_resources(&self) -> Result<Vec<Car>, SyncError>;

    /// `POST /claim`. The returned car is RESERVED for `user_id`.
    async fn claim(&self, user_id: &str, ttl_seconds: u32) -> Result<Car, SyncError>;

    /// `POST /release`.
    async fn release(&self, user_id: &str, car_id: &str) -> Result<ReleaseResponse, SyncError>;

    /// `POST /session/create` on the gateway.
    async fn create_session(&self, user_id: &str, car_id: &str) -> Result<SessionToken, SyncError>;
}

/// [`ResourceTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    matchmaker: ApiClient,
    gateway: ApiClient,
}

impl HttpTransport {
    pub fn new(config: &EndpointConfig) -> Self {
        Self::with_http_client(config, Client::new())
    }

    pub fn with_http_client(config: &EndpointConfig, client: Client) -> Self {
        Self {
            matchmaker: ApiClient::new()
                .with_base_url(config.matchmaker())
                .with_http_client(client.clone()),
            gateway: ApiClient::new()
                .with_base_url(config.gateway())
                .with_http_client(client),
        }
    }
}

#[async_trait]
impl ResourceTransport for HttpTransport {
    async fn list_resources(&self) -> Result<Vec<Car>, SyncError> {
        let rows: Vec<Car> = self.matchmaker.get_json(ROUTE_ROOMS).await?;
        Ok(rows)
    }

    async fn claim(&self, user_id: &str, ttl_seconds: u32) -> Result<Car, SyncError> {
        require(user_id, "user id")?;
        let request = ClaimRequest {
            user_id: user_id.to_string(),
            ttl_sec: ttl_seconds,
        };
        let resp: ClaimResponse = self
            .matchmaker
            .post_json(ROUTE_CLAIM, &request)
            .await
            .map_err(SyncError::from_claim)?;
        Ok(resp.into_car(user_id, ttl_seconds))
    }

    async fn release(&self, user_id: &str, car_id: &str) -> Result<ReleaseResponse, SyncError> {
        require(user_id, "user id")?;
        require(car_id, "car id")?;
        let request = ReleaseRequest {
            user_id: user_id.to_string(),
            car_id: car_id.to_string(),
        };
        self.matchmaker
            .post_json(ROUTE_RELEASE, &request)
            .await
            .map_err(SyncError::from_release)
    }

    async fn create_session(&self, user_id: &str, car_id: &str) -> Result<SessionToken, SyncError> {
        require(user_id, "user id")?;
        require(car_id, "car id")?;
        let request = CreateSessionRequest {
            user_id: user_id.to_string(),
            car_id: car_id.to_string(),
        };
        let resp: SessionResponse = self.gateway.post_json(ROUTE_SESSION_CREATE, &request).await?;
        SessionToken::new(resp.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_is_redacted() {
        let token = SessionToken::new("eyJhbGciOiJIUzI1NiJ9.secret").unwrap();
        let printed = format!("{token:?}");
        assert!(!printed.contains("secret"));
        assert_eq!(printed, "SessionToken(<27 bytes>)");
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(SessionToken::new(""), Err(SyncError::Decode(_))));
    }

    #[tokio::test]
    async fn create_session_without_car_never_reaches_the_network() {
        // Nothing listens on port 9; a request would come back as a network error.
        let config = EndpointConfig::new("http://127.0.0.1:9", "http://127.0.0.1:9").unwrap();
        let transport = HttpTransport::new(&config);
        let err = transport.create_session("u1", "").await.unwrap_err();
        assert!(matches!(err, SyncError::Precondition(_)));
    }
}
