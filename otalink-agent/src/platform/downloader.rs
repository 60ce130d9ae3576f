//! Package downloader for recovery updates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::error::{OtaError, Result};
use crate::update::{Action, WeakUpdater};

use super::DownloadStarter;

/// Streams the package to a fixed path and reports back to the updater.
pub struct HttpDownloader {
    target: PathBuf,
    client: reqwest::Client,
}

impl HttpDownloader {
    /// No overall timeout: packages are large and links are slow.
    pub fn new(target: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { target: target.into(), client })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl DownloadStarter for HttpDownloader {
    fn start_download(&self, url: &str, updater: WeakUpdater) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| OtaError::DownloadFailed(format!("No runtime to download on: {}", e)))?;

        let client = self.client.clone();
        let target = self.target.clone();
        let url = url.to_string();

        runtime.spawn(async move {
            match download(&client, &url, &target, &updater).await {
                Ok(size) => {
                    info!(path = %target.display(), size, "Download complete");
                    updater.perform(Action::DownloadCompleted(target)).await;
                }
                Err(e) => {
                    warn!(error = %e, url = %url, "Download failed");
                    if let Err(e) = fs::remove_file(&target).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(
                                error = %e,
                                path = %target.display(),
                                "Failed to remove partial download"
                            );
                        }
                    }
                    updater.perform(Action::DownloadFailed).await;
                }
            }
        });

        Ok(())
    }
}

/// Stream `url` to `target`, reporting each whole-percent change. Returns the size.
#[instrument(skip(client, updater))]
async fn download(
    client: &reqwest::Client,
    url: &str,
    target: &Path,
    updater: &WeakUpdater,
) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OtaError::DownloadFailed(format!("Server returned {}: {}", status, body)));
    }

    let total = response.content_length().filter(|len| *len > 0);
    info!(url = %url, total = ?total, path = %target.display(), "Downloading package");

    let mut file = File::create(target).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut reported: u8 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if let Some(total) = total {
            let percent = (downloaded.saturating_mul(100) / total).min(100) as u8;
            if percent != reported {
                reported = percent;
                updater.perform(Action::DownloadProgress(percent)).await;
            }
        }
    }

    file.flush().await?;
    file.sync_all().await?;

    if let Some(total) = total {
        if downloaded != total {
            return Err(OtaError::DownloadFailed(format!(
                "Truncated download: {} of {} bytes",
                downloaded, total
            )));
        }
    }

    Ok(downloaded)
}
