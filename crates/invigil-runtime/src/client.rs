//! UDS JSON-RPC client for the attempt service.
//! Connection-per-request, newline-delimited JSON.

use std::future::Future;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use invigil_core::types::{AttemptId, CompletePayload, ResumePayload, SyncPayload};
use invigil_session::service::{AttemptService, ServiceError};

pub struct UdsAttemptService {
    socket_path: String,
}

impl UdsAttemptService {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    async fn rpc_call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ServiceError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            ServiceError::Transport(format!(
                "cannot connect to attempt service at {}: {e}",
                self.socket_path
            ))
        })?;

        let (reader, mut writer) = stream.into_split();

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let mut req = serde_json::to_string(&request)
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        req.push('\n');
        writer
            .write_all(req.as_bytes())
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        writer
            .shutdown()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let response: serde_json::Value = serde_json::from_str(line.trim())
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;

        if let Some(error) = response.get("error") {
            return Err(ServiceError::Rejected(error.to_string()));
        }

        Ok(response["result"].clone())
    }
}

impl AttemptService for UdsAttemptService {
    fn resume(
        &self,
        attempt_id: &AttemptId,
    ) -> impl Future<Output = Result<ResumePayload, ServiceError>> + Send {
        let params = serde_json::json!({ "attemptId": attempt_id });
        async move {
            let result = self.rpc_call("attempt.resume", params).await?;
            serde_json::from_value(result).map_err(|e| ServiceError::Malformed(e.to_string()))
        }
    }

    fn sync(
        &self,
        attempt_id: &AttemptId,
    ) -> impl Future<Output = Result<SyncPayload, ServiceError>> + Send {
        let params = serde_json::json!({ "attemptId": attempt_id });
        async move {
            let result = self.rpc_call("attempt.sync", params).await?;
            serde_json::from_value(result).map_err(|e| ServiceError::Malformed(e.to_string()))
        }
    }

    fn complete(
        &self,
        attempt_id: &AttemptId,
    ) -> impl Future<Output = Result<CompletePayload, ServiceError>> + Send {
        let params = serde_json::json!({ "attemptId": attempt_id });
        async move {
            let result = self.rpc_call("attempt.complete", params).await?;
            serde_json::from_value(result).map_err(|e| ServiceError::Malformed(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests (against the in-process stub)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::StubOpts;
    use crate::stub::run_stub;
    use invigil_core::types::AttemptStatus;
    use invigil_session::config::SessionConfig;
    use invigil_session::session::{ExamSession, SessionEvent};
    use invigil_store::{MemoryStore, SharedStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn test_socket(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir()
            .join(format!("invigil-{name}-{}-{nanos}.sock", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    async fn start_stub(socket: &str, opts: StubOpts) -> JoinHandle<()> {
        let socket_owned = socket.to_owned();
        let handle = tokio::spawn(async move {
            let _ = run_stub(&socket_owned, &opts).await;
        });
        // Wait until the listener accepts connections.
        for _ in 0..200 {
            if tokio::net::UnixStream::connect(socket).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle
    }

    fn stub_opts(attempt: &str, duration_secs: i64) -> StubOpts {
        StubOpts {
            attempt: attempt.to_owned(),
            duration_secs,
            skew_ms: 0,
        }
    }

    #[tokio::test]
    async fn resume_sync_complete_roundtrip() {
        let socket = test_socket("roundtrip");
        let stub = start_stub(&socket, stub_opts("att-1", 300)).await;
        let service = UdsAttemptService::new(socket.clone());
        let attempt = AttemptId::new("att-1");

        let resume = service.resume(&attempt).await.expect("resume");
        assert_eq!(resume.attempt.attempt_id, attempt);
        assert_eq!(resume.attempt.duration_seconds, 300);
        assert!(
            (298..=300).contains(&resume.remaining_time),
            "fresh attempt, got {}",
            resume.remaining_time
        );

        let sync = service.sync(&attempt).await.expect("sync");
        assert_eq!(sync.status, AttemptStatus::InProgress);

        let complete = service.complete(&attempt).await.expect("complete");
        assert_eq!(complete.status, AttemptStatus::Completed);

        let sync = service.sync(&attempt).await.expect("sync after complete");
        assert_eq!(sync.status, AttemptStatus::Completed);

        stub.abort();
        let _ = std::fs::remove_file(&socket);
    }

    #[tokio::test]
    async fn unknown_attempt_is_rejected() {
        let socket = test_socket("unknown");
        let stub = start_stub(&socket, stub_opts("att-1", 300)).await;
        let service = UdsAttemptService::new(socket.clone());

        match service.sync(&AttemptId::new("someone-else")).await {
            Err(ServiceError::Rejected(reason)) => {
                assert!(reason.contains("unknown attempt"), "got {reason}");
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        stub.abort();
        let _ = std::fs::remove_file(&socket);
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let service = UdsAttemptService::new("/nonexistent/invigil.sock");
        match service.sync(&AttemptId::new("att-1")).await {
            Err(ServiceError::Transport(_)) => {}
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_session_over_the_stub_auto_submits() {
        let socket = test_socket("session");
        let stub = start_stub(&socket, stub_opts("att-e2e", 2)).await;

        let service = Arc::new(UdsAttemptService::new(socket.clone()));
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let mut config = SessionConfig::default();
        config.countdown_interval = Duration::from_millis(50);

        let mut handle = ExamSession::start(
            config,
            AttemptId::new("att-e2e"),
            Arc::clone(&service),
            store,
            None,
        )
        .await
        .expect("start session");

        let submitted = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = handle.next_event().await {
                if matches!(event, SessionEvent::AutoSubmitted(_)) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(submitted, "session should auto-submit when the stub expires");

        handle.shutdown().await;

        let sync = service
            .sync(&AttemptId::new("att-e2e"))
            .await
            .expect("sync");
        assert_eq!(sync.status, AttemptStatus::Completed);

        stub.abort();
        let _ = std::fs::remove_file(&socket);
    }
}

