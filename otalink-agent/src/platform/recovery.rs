//! Recovery-partition installer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{error, info, instrument};

use crate::error::{OtaError, Result};
use crate::update::Ota;

use super::{run_command, RecoveryInterface};

const LOCAL_FILE_HEADER: &[u8; 4] = b"PK\x03\x04";
const END_OF_CENTRAL_DIRECTORY: &[u8; 4] = b"PK\x05\x06";
/// Fixed part of the end-of-central-directory record
const EOCD_MIN_LEN: u64 = 22;
/// EOCD plus the longest possible archive comment
const EOCD_SEARCH_LEN: u64 = EOCD_MIN_LEN + u16::MAX as u64;

/// Installs packages by writing the recovery command file and rebooting into recovery.
pub struct AndroidRecovery {
    command_file: PathBuf,
    reboot_command: Vec<String>,
}

impl AndroidRecovery {
    pub fn new(command_file: impl Into<PathBuf>, reboot_command: Vec<String>) -> Self {
        Self { command_file: command_file.into(), reboot_command }
    }
}

/// Check the package is a complete zip archive.
async fn verify_structure(path: &Path) -> Result<u64> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| OtaError::VerificationFailed(format!("{}: {}", path.display(), e)))?;
    let len = file.metadata().await?.len();
    if len < EOCD_MIN_LEN + LOCAL_FILE_HEADER.len() as u64 {
        return Err(OtaError::VerificationFailed(format!(
            "{} is too small ({} bytes)",
            path.display(),
            len
        )));
    }

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).await?;
    if &magic != LOCAL_FILE_HEADER {
        return Err(OtaError::VerificationFailed(format!(
            "{} is not a zip archive",
            path.display()
        )));
    }

    let tail_len = len.min(EOCD_SEARCH_LEN);
    file.seek(SeekFrom::Start(len - tail_len)).await?;
    let mut tail = Vec::with_capacity(tail_len as usize);
    file.read_to_end(&mut tail).await?;
    if !tail.windows(4).any(|w| w == END_OF_CENTRAL_DIRECTORY) {
        return Err(OtaError::VerificationFailed(format!("{} is truncated", path.display())));
    }

    Ok(len)
}

/// Compare the package's SHA-256 digest with the base64 `expected` one.
async fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let expected_digest = BASE64.decode(expected).map_err(|e| {
        OtaError::VerificationFailed(format!("Malformed package hash '{}': {}", expected, e))
    })?;

    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024]; // 64KB buffer

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let actual = hasher.finalize();
    if actual.as_slice() != expected_digest.as_slice() {
        let actual = BASE64.encode(actual);
        error!(
            expected = %expected,
            actual = %actual,
            path = %path.display(),
            "Checksum mismatch"
        );
        return Err(OtaError::VerificationFailed(format!(
            "Checksum mismatch: expected {}, got {}",
            expected, actual
        )));
    }

    Ok(())
}

#[async_trait]
impl RecoveryInterface for AndroidRecovery {
    /// Check the package is a complete zip archive carrying the advertised digest.
    #[instrument(skip(self, ota), fields(version = %ota.version))]
    async fn verify(&self, path: &Path, ota: &Ota) -> Result<()> {
        let len = verify_structure(path).await?;

        match ota.file_hash() {
            Some(expected) => {
                verify_checksum(path, expected).await?;
                info!(path = %path.display(), size = len, "Package checksum verified");
            }
            None => info!(
                path = %path.display(),
                size = len,
                "Package looks complete, no hash to check"
            ),
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn install(&self, path: &Path) -> Result<()> {
        if let Some(parent) = self.command_file.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.command_file, format!("--update_package={}\n", path.display())).await?;
        info!(
            command_file = %self.command_file.display(),
            "Recovery command written, rebooting into recovery"
        );

        run_command(&self.reboot_command)
            .await
            .map_err(|e| OtaError::InstallFailed(e.to_string()))?;
        Ok(())
    }
}
