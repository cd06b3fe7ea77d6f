//! Development attempt-service stub: a UDS JSON-RPC server with one
//! in-memory attempt row, so tab sessions can be exercised end to end
//! without the real service. The `--skew-ms` flag shifts the stub's clock
//! to exercise drift correction.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::Mutex;

use invigil_core::types::AttemptStatus;

use crate::cli::StubOpts;

/// The single attempt row the stub serves.
pub(crate) struct StubState {
    attempt_id: String,
    start_instant: DateTime<Utc>,
    duration_secs: i64,
    skew_ms: i64,
    completed: bool,
}

impl StubState {
    pub(crate) fn new(
        attempt_id: String,
        start_instant: DateTime<Utc>,
        duration_secs: i64,
        skew_ms: i64,
    ) -> Self {
        Self {
            attempt_id,
            start_instant,
            duration_secs,
            skew_ms,
            completed: false,
        }
    }

    /// The stub's notion of "server time".
    fn server_now(&self) -> DateTime<Utc> {
        Utc::now() + TimeDelta::milliseconds(self.skew_ms)
    }

    pub(crate) fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        let elapsed = now.signed_duration_since(self.start_instant).num_seconds();
        (self.duration_secs - elapsed).clamp(0, self.duration_secs)
    }

    pub(crate) fn status(&self, now: DateTime<Utc>) -> AttemptStatus {
        if self.completed {
            AttemptStatus::Completed
        } else if self.remaining_secs(now) == 0 {
            AttemptStatus::TimedOut
        } else {
            AttemptStatus::InProgress
        }
    }
}

/// Run the stub server until the task is cancelled.
pub async fn run_stub(socket_path: &str, opts: &StubOpts) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another stub is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let state = Arc::new(Mutex::new(StubState::new(
        opts.attempt.clone(),
        Utc::now() + TimeDelta::milliseconds(opts.skew_ms),
        opts.duration_secs,
        opts.skew_ms,
    )));

    tracing::info!(
        "attempt service stub listening on {socket_path} (attempt={}, duration={}s, skew={}ms)",
        opts.attempt,
        opts.duration_secs,
        opts.skew_ms
    );

    loop {
        let (stream, _) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    state: Arc<Mutex<StubState>>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: serde_json::Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();
    let requested_attempt = request["params"]["attemptId"].as_str().unwrap_or("");

    let mut st = state.lock().await;

    if !requested_attempt.is_empty() && requested_attempt != st.attempt_id {
        let error_response = serde_json::json!({
            "jsonrpc": "2.0",
            "error": {"code": -32602, "message": format!("unknown attempt: {requested_attempt}")},
            "id": id,
        });
        drop(st);
        return write_line(&mut writer, &error_response).await;
    }

    let now = st.server_now();
    let result = match method {
        "attempt.resume" => serde_json::json!({
            "serverTime": now,
            "attempt": {
                "attemptId": st.attempt_id,
                "startInstant": st.start_instant,
                "durationSeconds": st.duration_secs,
                "currentSectionIndex": 0,
                "currentQuestionIndex": 0,
                "questionIds": ["q-1", "q-2", "q-3"],
            },
            "remainingTime": st.remaining_secs(now),
        }),
        "attempt.sync" => serde_json::json!({
            "serverTime": now,
            "remainingTime": st.remaining_secs(now),
            "currentSectionIndex": 0,
            "currentQuestionIndex": 0,
            "status": st.status(now),
        }),
        "attempt.complete" => {
            st.completed = true;
            tracing::info!(attempt = %st.attempt_id, "attempt completed");
            serde_json::json!({
                "attemptId": st.attempt_id,
                "status": AttemptStatus::Completed,
                "score": 0.0,
                "maxScore": 100.0,
            })
        }
        _ => {
            let error_response = serde_json::json!({
                "jsonrpc": "2.0",
                "error": {"code": -32601, "message": "method not found"},
                "id": id,
            });
            drop(st);
            return write_line(&mut writer, &error_response).await;
        }
    };
    drop(st);

    let response = serde_json::json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    });
    write_line(&mut writer, &response).await
}

async fn write_line(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let mut resp = serde_json::to_string(value)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
