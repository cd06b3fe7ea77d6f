//! `invigil status` — one-shot attempt sync, printed as JSON.

use invigil_core::types::AttemptId;
use invigil_session::service::AttemptService;

use crate::client::UdsAttemptService;

pub async fn cmd_status(socket_path: &str, attempt: &str) -> anyhow::Result<()> {
    let service = UdsAttemptService::new(socket_path);
    let payload = service.sync(&AttemptId::new(attempt)).await?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
