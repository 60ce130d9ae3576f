//! A/B update engine driver on top of `update_engine_client`
//!
//! `bind` keeps `update_engine_client --follow` running and turns its output
//! into callbacks:
//!
//! ```text
//! onStatusUpdate(UPDATE_STATUS_DOWNLOADING (3), 0.421)
//! onPayloadApplicationComplete(ErrorCode::kSuccess (0))
//! ```

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{OtaError, Result};

use super::{run_command, UpdateEngine, UpdateEngineCallback};

/// One callback parsed from the follow output.
#[derive(Debug, Clone, Copy, PartialEq)]
enum EngineLine {
    Status { status: i32, percent: f32 },
    Complete { error_code: i32 },
}

/// `NAME (code)` → `code`
fn parse_code(s: &str) -> Option<i32> {
    let open = s.rfind('(')?;
    s[open + 1..].trim().trim_end_matches(')').trim().parse().ok()
}

/// The argument list between the callback's parentheses.
fn arguments<'a>(line: &'a str, callback: &str) -> Option<&'a str> {
    let start = line.find(callback)? + callback.len();
    let rest = line[start..].strip_prefix('(')?;
    Some(rest.trim_end().strip_suffix(')').unwrap_or(rest))
}

fn parse_line(line: &str) -> Option<EngineLine> {
    if let Some(args) = arguments(line, "onStatusUpdate") {
        let (status, percent) = args.rsplit_once(',')?;
        return Some(EngineLine::Status {
            status: parse_code(status)?,
            percent: percent.trim().parse().ok()?,
        });
    }
    if let Some(args) = arguments(line, "onPayloadApplicationComplete") {
        return Some(EngineLine::Complete { error_code: parse_code(args)? });
    }
    None
}

/// Wait before restarting a follower that exited.
const DEFAULT_RESPAWN_DELAY: Duration = Duration::from_secs(5);

/// Drives the platform update engine through its command-line client.
pub struct UpdateEngineClient {
    client: String,
    respawn_delay: Duration,
}

impl UpdateEngineClient {
    pub fn new(client: impl Into<String>) -> Self {
        Self { client: client.into(), respawn_delay: DEFAULT_RESPAWN_DELAY }
    }

    pub fn with_respawn_delay(mut self, delay: Duration) -> Self {
        self.respawn_delay = delay;
        self
    }
}

/// Start `client --follow` with its stdout piped back.
fn spawn_follower(client: &str) -> Result<(Child, ChildStdout)> {
    let mut child = Command::new(client)
        .arg("--follow")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| OtaError::Engine(format!("Failed to start {} --follow: {}", client, e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| OtaError::Engine("update engine client has no stdout".to_string()))?;
    Ok((child, stdout))
}

/// Forward callbacks until the follower's output ends.
async fn follow(mut child: Child, stdout: ChildStdout, callback: &dyn UpdateEngineCallback) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line) {
                Some(EngineLine::Status { status, percent }) => {
                    callback.on_status_update(status, percent)
                }
                Some(EngineLine::Complete { error_code }) => {
                    callback.on_payload_application_complete(error_code)
                }
                None => debug!(line = %line, "Ignoring update engine output"),
            },
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read update engine output");
                break;
            }
        }
    }
    match child.wait().await {
        Ok(status) => warn!(status = %status, "Update engine follower exited"),
        Err(e) => warn!(error = %e, "Update engine follower lost"),
    }
}

#[async_trait]
impl UpdateEngine for UpdateEngineClient {
    fn bind(&self, callback: Arc<dyn UpdateEngineCallback>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| OtaError::Engine(format!("No runtime to follow the engine on: {}", e)))?;
        let _guard = runtime.enter();

        let (child, stdout) = spawn_follower(&self.client)?;
        info!(client = %self.client, "Following update engine");

        let client = self.client.clone();
        let delay = self.respawn_delay;
        runtime.spawn(async move {
            follow(child, stdout, callback.as_ref()).await;
            loop {
                sleep(delay).await;
                match spawn_follower(&client) {
                    Ok((child, stdout)) => {
                        info!(client = %client, "Update engine follower restarted");
                        follow(child, stdout, callback.as_ref()).await;
                    }
                    Err(e) => warn!(error = %e, "Failed to restart update engine follower"),
                }
            }
        });

        Ok(())
    }

    #[instrument(skip(self, headers))]
    async fn apply_payload(
        &self,
        url: &str,
        offset: u64,
        size: u64,
        headers: &[String],
    ) -> Result<()> {
        let argv = vec![
            self.client.clone(),
            "--update".to_string(),
            format!("--payload={}", url),
            format!("--offset={}", offset),
            format!("--size={}", size),
            format!("--headers={}", headers.join("\n")),
        ];
        run_command(&argv).await.map_err(|e| OtaError::Engine(e.to_string()))?;
        info!("Payload handed to update engine");
        Ok(())
    }
}
