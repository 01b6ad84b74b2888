//! Backend seam consumed by the controllers, and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Lab, LabId, LabStatus, UserId},
    protocol::{CommandResultResponse, CreateLabRequest, ExecuteCommandRequest},
};
use tracing::debug;
use url::Url;

use crate::{config::ClientSettings, error::FetchError};

#[async_trait]
pub trait LabApi: Send + Sync {
    async fn list_types(&self) -> Result<Vec<String>, FetchError>;
    async fn list_user_labs(&self, user_id: &UserId) -> Result<Vec<Lab>, FetchError>;
    async fn create_lab(&self, request: CreateLabRequest) -> Result<Lab, FetchError>;
    async fn delete_lab(&self, lab_id: &LabId) -> Result<(), FetchError>;
    async fn lab_status(&self, lab_id: &LabId) -> Result<LabStatus, FetchError>;
    async fn execute_command(
        &self,
        request: ExecuteCommandRequest,
    ) -> Result<CommandResultResponse, FetchError>;
    async fn suggested_commands(&self, lab_id: &LabId) -> Result<Vec<String>, FetchError>;
}

pub struct HttpLabApi {
    http: Client,
    base_url: Url,
}

impl HttpLabApi {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        Self::with_timeout(base_url, None)
    }

    /// A `timeout` of `None` leaves requests without a deadline.
    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url.trim())?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::InvalidUrl(format!(
                "'{base_url}' cannot be used as a base url"
            )));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        Ok(Self { http, base_url })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, FetchError> {
        Self::with_timeout(&settings.api_base_url, settings.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, FetchError> {
        let url = self.endpoint(segments)?;
        debug!("lab api: GET {url}");
        let response = checked(self.http.get(url).send().await?).await?;
        Ok(response.json().await?)
    }
}

async fn checked(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FetchError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl LabApi for HttpLabApi {
    async fn list_types(&self) -> Result<Vec<String>, FetchError> {
        self.get_json(&["types"]).await
    }

    async fn list_user_labs(&self, user_id: &UserId) -> Result<Vec<Lab>, FetchError> {
        self.get_json(&["user", user_id.as_str()]).await
    }

    async fn create_lab(&self, request: CreateLabRequest) -> Result<Lab, FetchError> {
        let url = self.endpoint(&["create"])?;
        debug!(
            "lab api: POST {url} user_id={} lab_type={}",
            request.user_id, request.lab_type
        );
        let response = checked(self.http.post(url).json(&request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn delete_lab(&self, lab_id: &LabId) -> Result<(), FetchError> {
        let url = self.endpoint(&[lab_id.as_str()])?;
        debug!("lab api: DELETE {url}");
        checked(self.http.delete(url).send().await?).await?;
        Ok(())
    }

    async fn lab_status(&self, lab_id: &LabId) -> Result<LabStatus, FetchError> {
        let url = self.endpoint(&[lab_id.as_str(), "status"])?;
        debug!("lab api: GET {url}");
        let response = checked(self.http.get(url).send().await?).await?;
        let body = response.text().await?;
        Ok(LabStatus::parse(&body))
    }

    async fn execute_command(
        &self,
        request: ExecuteCommandRequest,
    ) -> Result<CommandResultResponse, FetchError> {
        let url = self.endpoint(&["execute"])?;
        debug!("lab api: POST {url} lab_id={}", request.lab_id);
        let response = checked(self.http.post(url).json(&request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn suggested_commands(&self, lab_id: &LabId) -> Result<Vec<String>, FetchError> {
        self.get_json(&[lab_id.as_str(), "suggested-commands"]).await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
