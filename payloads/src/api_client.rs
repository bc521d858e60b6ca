use std::sync::Mutex;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;

use crate::{requests, responses};

type ReqwestResult = Result<reqwest::Response, reqwest::Error>;

/// An API client for interfacing with the backend.
///
/// Registration and login store the bearer token returned in the
/// `Authorization` response header; later requests attach it.
pub struct APIClient {
    pub address: String,
    pub inner_client: reqwest::Client,
    token: Mutex<Option<String>>,
}

/// Helper methods for http actions
impl APIClient {
    pub fn new(address: String) -> Self {
        Self {
            address,
            inner_client: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.lock().unwrap() = token;
    }

    fn format_url(&self, path: &str) -> String {
        format!("{}/api/user/{path}", &self.address)
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        match self.token.lock().unwrap().as_ref() {
            Some(token) => request.header(AUTHORIZATION, token),
            None => request,
        }
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> ReqwestResult {
        let request = self.inner_client.post(self.format_url(path)).json(body);
        self.authorize(request).send().await
    }

    async fn get(&self, path: &str) -> ReqwestResult {
        let request = self.inner_client.get(self.format_url(path));
        self.authorize(request).send().await
    }

    /// Pull the fresh token out of the `Authorization` response header and
    /// remember it.
    async fn bearer_from(
        &self,
        response: reqwest::Response,
    ) -> Result<String, ClientError> {
        if !response.status().is_success() {
            return Err(ClientError::APIError(
                response.status(),
                response.text().await?,
            ));
        }
        let token = response
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ClientError::APIError(
                    response.status(),
                    "missing Authorization header".into(),
                )
            })?
            .to_string();
        self.set_token(Some(token.clone()));
        Ok(token)
    }
}

/// Methods on the backend API
impl APIClient {
    pub async fn health_check(&self) -> Result<(), ClientError> {
        let response = self
            .inner_client
            .get(format!("{}/api/health_check", &self.address))
            .send()
            .await?;
        ok_empty(response).await
    }

    pub async fn register(
        &self,
        details: &requests::Credentials,
    ) -> Result<String, ClientError> {
        let response = self.post("register", details).await?;
        self.bearer_from(response).await
    }

    pub async fn login(
        &self,
        details: &requests::Credentials,
    ) -> Result<String, ClientError> {
        let response = self.post("login", details).await?;
        self.bearer_from(response).await
    }

    /// Upload an order number as a text/plain body. Returns the status code
    /// so callers can distinguish `202` (newly accepted) from `200`
    /// (already uploaded by this user).
    pub async fn upload_order(
        &self,
        number: &str,
    ) -> Result<StatusCode, ClientError> {
        let request = self
            .inner_client
            .post(self.format_url("orders"))
            .header(CONTENT_TYPE, "text/plain")
            .body(number.to_string());
        let response = self.authorize(request).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::APIError(
                response.status(),
                response.text().await?,
            ));
        }
        Ok(response.status())
    }

    pub async fn list_orders(
        &self,
    ) -> Result<Vec<responses::Order>, ClientError> {
        let response = self.get("orders").await?;
        ok_list(response).await
    }

    pub async fn balance(&self) -> Result<responses::Balance, ClientError> {
        let response = self.get("balance").await?;
        ok_body(response).await
    }

    pub async fn withdraw(
        &self,
        details: &requests::Withdraw,
    ) -> Result<(), ClientError> {
        let response = self.post("balance/withdraw", details).await?;
        ok_empty(response).await
    }

    pub async fn list_withdrawals(
        &self,
    ) -> Result<Vec<responses::Withdrawal>, ClientError> {
        let response = self.get("withdrawals").await?;
        ok_list(response).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An unhandled API error to display, containing response text.
    #[error("{1}")]
    APIError(StatusCode, String),
    #[error("Network error. Please check your connection.")]
    Network(#[from] reqwest::Error),
}

/// Deserialize a successful request into the desired type, or return an
/// appropriate error.
pub async fn ok_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(ClientError::APIError(
            response.status(),
            response.text().await?,
        ));
    }
    Ok(response.json::<T>().await?)
}

/// Check that an empty response is OK, returning a ClientError if not.
pub async fn ok_empty(response: reqwest::Response) -> Result<(), ClientError> {
    if !response.status().is_success() {
        return Err(ClientError::APIError(
            response.status(),
            response.text().await?,
        ));
    }
    Ok(())
}

/// Like [`ok_body`] for listing endpoints, where an empty collection comes
/// back as `204 No Content` with no body at all.
pub async fn ok_list<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Vec<T>, ClientError> {
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(Vec::new());
    }
    ok_body(response).await
}
