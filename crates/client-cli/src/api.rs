//! HTTP client for the CRM server.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    AuthResponse, BlockCheckRequest, BlockCheckResponse, CurrentUser, InviteUserRequest,
    InviteUserResponse, LoginRequest, Permissions, RegisterRequest, Table, TableSubscription,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::realtime::RealtimeClient;
use crate::sync::{Backend, ChangeStream, SyncError};

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(server_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: http_base(server_url),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T, SyncError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Api {
                status: status.as_u16(),
                message: error_message(&body)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
            });
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(resp.json().await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        self.send(self.request(reqwest::Method::GET, path)).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SyncError> {
        self.send(self.request(reqwest::Method::POST, path).json(body)).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SyncError> {
        self.send(self.request(reqwest::Method::PATCH, path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), SyncError> {
        self.send::<Value>(self.request(reqwest::Method::DELETE, path))
            .await
            .map(|_| ())
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<AuthResponse, SyncError> {
        self.post("/auth/register", req).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, SyncError> {
        let req = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.post("/auth/login", &req).await
    }

    pub async fn me(&self) -> Result<CurrentUser, SyncError> {
        self.get("/me").await
    }

    pub async fn permissions(&self) -> Result<Permissions, SyncError> {
        self.get("/permissions").await
    }

    pub async fn check_block(&self, req: &BlockCheckRequest) -> Result<BlockCheckResponse, SyncError> {
        self.post("/schedule-blocks/check", req).await
    }

    /// Call the invitation function; failures come back as `{success: false, error}`
    pub async fn invite_user(&self, req: &InviteUserRequest) -> Result<InviteUserResponse, SyncError> {
        self.post("/functions/invite-user", req).await
    }
}

/// REST endpoints live on http(s) even when configured with a ws(s) url
fn http_base(server_url: &str) -> String {
    server_url
        .trim_end_matches('/')
        .replace("ws://", "http://")
        .replace("wss://", "https://")
}

/// Human-readable message out of an error body
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
}

/// [`Backend`] over the REST API and the realtime socket
pub struct HttpBackend {
    api: ApiClient,
    realtime: Option<Arc<RealtimeClient>>,
}

impl HttpBackend {
    pub fn new(api: ApiClient, realtime: Option<Arc<RealtimeClient>>) -> Self {
        Self { api, realtime }
    }

    fn realtime(&self) -> Result<&RealtimeClient, SyncError> {
        self.realtime.as_deref().ok_or(SyncError::RealtimeUnavailable)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn select(&self, table: Table) -> Result<Vec<Value>, SyncError> {
        self.api.get(table.path()).await
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, SyncError> {
        self.api.post(table.path(), &row).await
    }

    async fn update(&self, table: Table, id: Uuid, patch: Value) -> Result<Value, SyncError> {
        self.api.patch(&format!("{}/{}", table.path(), id), &patch).await
    }

    async fn delete(&self, table: Table, id: Uuid) -> Result<(), SyncError> {
        self.api.delete(&format!("{}/{}", table.path(), id)).await
    }

    async fn subscribe(
        &self,
        channel: &str,
        subscriptions: Vec<TableSubscription>,
    ) -> Result<ChangeStream, SyncError> {
        self.realtime()?.subscribe(channel, subscriptions).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), SyncError> {
        self.realtime()?.unsubscribe(channel).await
    }
}
