//! `invigil run` — drive one tab session in the terminal.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use invigil_core::lease::TabRole;
use invigil_core::timer::format_clock;
use invigil_core::types::AttemptId;
use invigil_session::config::SessionConfig;
use invigil_session::session::{ExamSession, SessionEvent};
use invigil_store::{FileStore, SharedStore};

use crate::cli::RunOpts;
use crate::client::UdsAttemptService;

pub async fn cmd_run(socket_path: &str, opts: RunOpts) -> anyhow::Result<()> {
    let config = SessionConfig {
        sync_cadence: Duration::from_secs(opts.sync_secs),
        drift_threshold: Duration::from_secs(opts.drift_secs),
        ..SessionConfig::default().with_heartbeat_interval(Duration::from_millis(opts.heartbeat_ms))
    };

    let store_dir = opts
        .store_dir
        .map(Into::into)
        .unwrap_or_else(FileStore::default_dir);
    let store: Arc<dyn SharedStore> = Arc::new(FileStore::open(store_dir)?);
    let service = Arc::new(UdsAttemptService::new(socket_path));

    // Tabs in other processes coordinate through the shared store alone;
    // the in-process bus cannot reach them, so a standalone run polls.
    let mut handle = ExamSession::start(
        config,
        AttemptId::new(opts.attempt),
        service,
        store,
        None,
    )
    .await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let marker = match handle.role() {
                    TabRole::Master => "*",
                    TabRole::Blocked => "\u{00b7}",
                    TabRole::Unclaimed => "?",
                };
                print!("\r\x1b[2K{} {}", format_clock(handle.remaining_ms()), marker);
                if handle.show_blocked_notice() {
                    print!("  another tab has this test open");
                }
                let _ = std::io::stdout().flush();
            }
            event = handle.next_event() => {
                match event {
                    Some(SessionEvent::MasterGained) => {
                        println!("\nthis tab is driving the attempt");
                    }
                    Some(SessionEvent::MasterLost) => {
                        println!("\nanother tab has this test open; countdown here is display-only");
                    }
                    Some(SessionEvent::Corrected { drift_ms }) => {
                        println!("\ncountdown corrected from server ({drift_ms}ms drift)");
                    }
                    Some(SessionEvent::PositionChanged(position)) => {
                        println!(
                            "\nserver moved position to section {} question {}",
                            position.section_index, position.question_index
                        );
                    }
                    Some(SessionEvent::Expired) => {
                        println!("\ntime is up");
                    }
                    Some(SessionEvent::AutoSubmitted(payload)) => {
                        println!(
                            "\nsubmitted: {} ({}/{})",
                            payload.status, payload.score, payload.max_score
                        );
                        break;
                    }
                    Some(SessionEvent::CompleteFailed(reason)) => {
                        println!("\nsubmit failed, retrying: {reason}");
                    }
                    Some(SessionEvent::Finished(status)) => {
                        println!("\nattempt closed by server: {status}");
                        break;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nclosing tab session");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
