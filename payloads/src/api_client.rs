use reqwest::StatusCode;
use serde::Serialize;

use crate::{requests, responses};

type ReqwestResult = Result<reqwest::Response, reqwest::Error>;

/// An API client for interfacing with the booking service. Used by the
/// integration tests and any internal tooling that talks to the core.
pub struct APIClient {
    pub address: String,
    pub inner_client: reqwest::Client,
}

/// Helper methods for http actions
impl APIClient {
    pub fn new(address: String) -> Self {
        Self {
            address,
            inner_client: reqwest::Client::new(),
        }
    }

    fn format_url(&self, path: &str) -> String {
        format!("{}/api/{path}", &self.address)
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> ReqwestResult {
        self.inner_client
            .post(self.format_url(path))
            .json(body)
            .send()
            .await
    }

    async fn empty_get(&self, path: &str) -> ReqwestResult {
        self.inner_client.get(self.format_url(path)).send().await
    }
}

/// Methods on the booking API
impl APIClient {
    pub async fn health_check(&self) -> Result<(), ClientError> {
        let response = self.empty_get("health_check").await?;
        ok_empty(response).await
    }

    pub async fn create_reservation(
        &self,
        details: &requests::CreateReservation,
    ) -> Result<responses::Reservation, ClientError> {
        let response = self.post("create_reservation", details).await?;
        ok_body(response).await
    }

    pub async fn join_reservation(
        &self,
        details: &requests::JoinReservation,
    ) -> Result<responses::Reservation, ClientError> {
        let response = self.post("join_reservation", details).await?;
        ok_body(response).await
    }

    pub async fn cancel_reservation(
        &self,
        details: &requests::CancelReservation,
    ) -> Result<responses::Reservation, ClientError> {
        let response = self.post("cancel_reservation", details).await?;
        ok_body(response).await
    }

    pub async fn submit_score(
        &self,
        details: &requests::SubmitScore,
    ) -> Result<responses::ScoreRecord, ClientError> {
        let response = self.post("submit_score", details).await?;
        ok_body(response).await
    }

    pub async fn get_reservation(
        &self,
        details: &requests::GetReservation,
    ) -> Result<responses::ReservationWithParticipants, ClientError> {
        let response = self.post("get_reservation", details).await?;
        ok_body(response).await
    }

    pub async fn get_balance(
        &self,
        details: &requests::GetBalance,
    ) -> Result<responses::BalanceInfo, ClientError> {
        let response = self.post("get_balance", details).await?;
        ok_body(response).await
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

impl ClientError {
    /// The status code of an API error, if this is one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::APIError(status, _) => Some(*status),
            Self::Network(_) => None,
        }
    }

    /// Whether the error body carries the given error code string.
    pub fn has_code(&self, code: &str) -> bool {
        matches!(self, Self::APIError(_, body) if body.contains(code))
    }
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
