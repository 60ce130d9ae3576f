//! Release service client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, instrument};

use crate::config::ServerConfig;
use crate::error::{OtaError, Result};
use crate::update::Ota;

use super::{ReleaseChecker, SoftwareVersion};

/// Header carrying the project key.
const PROJECT_KEY_HEADER: &str = "Otalink-Project-Key";

/// Asks the release service for the newest release of this device's software type.
pub struct HttpReleaseChecker {
    base_url: String,
    project_key: Option<String>,
    device_serial: String,
    hardware_version: String,
    software_type: String,
    version: Arc<dyn SoftwareVersion>,
    client: reqwest::Client,
}

impl HttpReleaseChecker {
    pub fn new(
        config: &ServerConfig,
        device_serial: String,
        version: Arc<dyn SoftwareVersion>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout_duration())
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            project_key: config.project_key.clone(),
            device_serial,
            hardware_version: config.hardware_version.clone(),
            software_type: config.software_type.clone(),
            version,
            client,
        })
    }

    fn latest_url(&self) -> String {
        format!("{}/api/v0/releases/latest", self.base_url)
    }
}

#[async_trait]
impl ReleaseChecker for HttpReleaseChecker {
    #[instrument(skip(self), fields(serial = %self.device_serial))]
    async fn latest_release(&self) -> Result<Option<Ota>> {
        let current_version = self.version.current_version().await;
        let url = self.latest_url();
        info!(url = %url, current_version = %current_version, "Checking for release");

        let mut request = self.client.get(&url).query(&[
            ("device_serial", self.device_serial.as_str()),
            ("hardware_version", self.hardware_version.as_str()),
            ("software_type", self.software_type.as_str()),
            ("current_version", current_version.as_str()),
        ]);
        if let Some(key) = &self.project_key {
            request = request.header(PROJECT_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| {
                OtaError::CheckFailed(format!("Failed to connect to release service: {}", e))
            })?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                debug!("Release service has nothing newer");
                Ok(None)
            }
            status if status.is_success() => {
                let ota: Ota = response.json().await?;
                info!(version = %ota.version, url = %ota.url, "Release found");
                Ok(Some(ota))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(OtaError::CheckFailed(format!("Release service returned {}: {}", status, body)))
            }
        }
    }
}
