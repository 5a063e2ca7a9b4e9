use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::client::ClientError;
use crate::handlers::identity::USER_ID_HEADER;
use crate::models::{Event, EventId, Notification, NotificationId, UserId};
use crate::utils::response::{ApiErrorResponse, ApiResponse};

/// The pull half of the notification pipeline.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Most recent first.
    async fn fetch_notifications(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, ClientError>;

    async fn mark_read(&self, user: UserId, id: NotificationId) -> Result<(), ClientError>;

    async fn mark_all_read(&self, user: UserId) -> Result<(), ClientError>;
}

/// HTTP client for the server's JSON API.
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// The push endpoint, with the identity in the query string as a browser
    /// stream would send it.
    pub fn stream_url(&self, user: UserId) -> String {
        format!("{}/notifications/stream?user_id={}", self.base_url, user)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn as_user(&self, request: RequestBuilder, user: UserId) -> RequestBuilder {
        request.header(USER_ID_HEADER, user.to_string())
    }

    pub async fn apply(&self, user: UserId, event: EventId) -> Result<Event, ClientError> {
        let request = self.http.post(self.url(&format!("/events/{}/apply", event)));
        data(self.as_user(request, user).send().await?).await
    }

    pub async fn accept(
        &self,
        organizer: UserId,
        event: EventId,
        applicant: UserId,
    ) -> Result<Event, ClientError> {
        let request = self
            .http
            .post(self.url(&format!("/events/{}/accept", event)))
            .json(&json!({ "user_id": applicant }));
        data(self.as_user(request, organizer).send().await?).await
    }

    pub async fn reject(
        &self,
        organizer: UserId,
        event: EventId,
        applicant: UserId,
        blacklist: bool,
    ) -> Result<Event, ClientError> {
        let request = self
            .http
            .post(self.url(&format!("/events/{}/reject", event)))
            .json(&json!({ "user_id": applicant, "blacklist": blacklist }));
        data(self.as_user(request, organizer).send().await?).await
    }

    pub async fn cancel(&self, organizer: UserId, event: EventId) -> Result<Event, ClientError> {
        let request = self.http.patch(self.url(&format!("/events/{}/cancel", event)));
        data(self.as_user(request, organizer).send().await?).await
    }

    pub async fn complete(&self, organizer: UserId, event: EventId) -> Result<Event, ClientError> {
        let request = self.http.post(self.url(&format!("/events/{}/complete", event)));
        data(self.as_user(request, organizer).send().await?).await
    }

    pub async fn delete(&self, organizer: UserId, event: EventId) -> Result<Event, ClientError> {
        let request = self.http.delete(self.url(&format!("/events/{}", event)));
        data(self.as_user(request, organizer).send().await?).await
    }
}

#[async_trait]
impl NotificationApi for HttpApi {
    async fn fetch_notifications(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, ClientError> {
        let request = self
            .http
            .get(self.url("/notifications"))
            .query(&[("limit", limit)]);
        data(self.as_user(request, user).send().await?).await
    }

    async fn mark_read(&self, user: UserId, id: NotificationId) -> Result<(), ClientError> {
        let request = self.http.patch(self.url(&format!("/notifications/{}/read", id)));
        accepted(self.as_user(request, user).send().await?).await
    }

    async fn mark_all_read(&self, user: UserId) -> Result<(), ClientError> {
        let request = self.http.patch(self.url("/notifications/read-all"));
        accepted(self.as_user(request, user).send().await?).await
    }
}

/// Unwraps `{success, data}`; turns the error envelope into
/// [`ClientError::Rejected`].
async fn data<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let body = checked(response).await?;
    let envelope: ApiResponse<T> = serde_json::from_slice(&body)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
    envelope
        .data
        .ok_or_else(|| ClientError::InvalidResponse("response carried no data".to_string()))
}

async fn accepted(response: Response) -> Result<(), ClientError> {
    let body = checked(response).await?;
    serde_json::from_slice::<ApiResponse<Value>>(&body)
        .map(|_| ())
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

async fn checked(response: Response) -> Result<Vec<u8>, ClientError> {
    let status = response.status();
    let body = response.bytes().await?.to_vec();
    if status.is_success() {
        return Ok(body);
    }
    Err(match serde_json::from_slice::<ApiErrorResponse>(&body) {
        Ok(envelope) => ClientError::Rejected {
            status: status.as_u16(),
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => ClientError::Rejected {
            status: status.as_u16(),
            code: format!("HTTP_{}", status.as_u16()),
            message: String::from_utf8_lossy(&body).into_owned(),
        },
    })
}
