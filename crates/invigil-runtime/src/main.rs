//! invigil: timed-exam attempt client binary.
//! Single-process binary embedding the tab session, a status query, and a
//! development attempt-service stub.

use clap::Parser;

mod cli;
mod client;
mod cmd_run;
mod cmd_status;
mod stub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Run(opts) => {
            cmd_run::cmd_run(&socket_path, opts).await?;
        }
        cli::Command::Status(opts) => {
            cmd_status::cmd_status(&socket_path, &opts.attempt).await?;
        }
        cli::Command::Stub(opts) => {
            let filter = std::env::var("INVIGIL_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("invigil stub starting");

            tokio::select! {
                result = stub::run_stub(&socket_path, &opts) => result?,
                _ = tokio::signal::ctrl_c() => {
                    let _ = std::fs::remove_file(&socket_path);
                    tracing::info!("stub stopped");
                }
            }
        }
    }

    Ok(())
}
