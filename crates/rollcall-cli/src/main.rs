use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall biometric attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an identity (or update its display name)
    Provision {
        /// Identity id (e.g., an employee id)
        id: String,
        /// Human-readable display name
        name: String,
    },
    /// Enroll an identity from embedding files
    Enroll {
        /// Identity id
        id: String,
        /// Embedding JSON files ({"values": [...], "extractor_version": "..."}),
        /// one per captured pose, in capture order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Verify an identity against its enrolled template
    Verify {
        /// Identity id
        id: String,
        /// Embedding JSON file for the live capture
        file: PathBuf,
    },
    /// Show daemon status
    Status,
}

// `#[zbus::proxy]` generates AttendanceProxy from the daemon's interface.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn provision(&self, identity_id: &str, display_name: &str) -> zbus::Result<String>;
    async fn enroll(&self, identity_id: &str, embeddings_json: &str) -> zbus::Result<String>;
    async fn verify(&self, identity_id: &str, embedding_json: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::system()
        .await
        .context("connecting to the system bus — is rollcalld running?")?;
    let proxy = AttendanceProxy::new(&conn).await?;

    let response = match cli.command {
        Commands::Provision { id, name } => proxy.provision(&id, &name).await?,
        Commands::Enroll { id, files } => {
            let embeddings = files
                .iter()
                .map(|path| read_embedding(path))
                .collect::<Result<Vec<_>>>()?;
            proxy
                .enroll(&id, &serde_json::Value::Array(embeddings).to_string())
                .await?
        }
        Commands::Verify { id, file } => {
            let embedding = read_embedding(&file)?;
            proxy.verify(&id, &embedding.to_string()).await?
        }
        Commands::Status => proxy.status().await?,
    };

    println!("{}", pretty(&response));
    Ok(())
}

/// Read one embedding JSON file, validating it parses before it goes on
/// the bus.
fn read_embedding(path: &PathBuf) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading embedding file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing embedding file {}", path.display()))
}

/// Pretty-print a JSON response; fall back to the raw string for anything
/// that is not JSON.
fn pretty(response: &str) -> String {
    serde_json::from_str::<serde_json::Value>(response)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| response.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_passes_non_json_through() {
        assert_eq!(pretty("plain text"), "plain text");
    }

    #[test]
    fn pretty_indents_json() {
        let out = pretty(r#"{"matched":true,"score":0.93}"#);
        assert!(out.contains("\"matched\": true"));
    }
}
