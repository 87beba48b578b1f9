use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use serde::Deserialize;

use crate::config;
use crate::error::AcquisitionError;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, AcquisitionError>> + Send>>;

/// Metadata returned by the engine's image inspection.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageInspect {
    #[serde(rename = "Id", default)]
    pub id: String,

    /// Engine-reported image size, used only to estimate export progress.
    #[serde(rename = "Size", default)]
    pub size: u64,
}

/// The two container engine operations the pipeline relies on.
pub trait ImageEngine: Send + Sync {
    fn inspect_image(
        &self,
        image_id: &str,
    ) -> impl Future<Output = Result<ImageInspect, AcquisitionError>> + Send;

    /// Stream the image as a `docker save` style tar archive.
    fn export_image(
        &self,
        image_id: &str,
    ) -> impl Future<Output = Result<ByteStream, AcquisitionError>> + Send;
}

/// Docker Engine API client over TCP.
#[derive(Clone)]
pub struct DockerEngine {
    http: reqwest::Client,
    host: String,
}

impl DockerEngine {
    pub fn new(host: &str) -> Result<Self, AcquisitionError> {
        let host = config::normalize_docker_host(host);
        if !host.starts_with("http://") && !host.starts_with("https://") {
            return Err(AcquisitionError::UnsupportedEndpoint(host));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            host,
        })
    }

    /// Client for the endpoint named by `DOCKER_HOST`.
    pub fn from_env() -> Result<Self, AcquisitionError> {
        Self::new(&config::get_docker_host())
    }

    async fn check_status(
        image_id: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AcquisitionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AcquisitionError::ImageNotFound(image_id.to_string()));
        }
        let message = response.text().await.unwrap_or_default();
        Err(AcquisitionError::Status {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

impl ImageEngine for DockerEngine {
    async fn inspect_image(&self, image_id: &str) -> Result<ImageInspect, AcquisitionError> {
        let url = format!("{}/images/{}/json", self.host, image_id);
        let response = self.http.get(url).send().await?;
        let response = Self::check_status(image_id, response).await?;
        Ok(response.json().await?)
    }

    async fn export_image(&self, image_id: &str) -> Result<ByteStream, AcquisitionError> {
        let url = format!("{}/images/get", self.host);
        let response = self
            .http
            .get(url)
            .query(&[("names", image_id)])
            .send()
            .await?;
        let response = Self::check_status(image_id, response).await?;
        let stream = response.bytes_stream().map_err(AcquisitionError::from);
        Ok(Box::pin(stream))
    }
}
