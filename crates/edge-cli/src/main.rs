// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use edge_assets::{
    Asset, AssetBackend, AssetHandle, AssetTransport, AsyncDownloadHandle, AsyncDownloadStatus, Location,
    ScriptLoader,
};
use edge_command_center::{TaskRunner, UserEvent, UserEventOutcome, UserEventsManager};
use edge_config::load_config;
use edge_error::{ErrorCode, OrchestratorError};
use edge_orchestrator::{
    default_telemetry_sink, CloudConfigClient, CloudConfigOutcome, Collaborators, CoreSdk, NoopPriorityHint,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Host-process entry point: parses flags, wires the (currently stand-in)
/// interpreter/backend/transport collaborators, and drives `CoreSDK` until
/// a shutdown signal arrives (spec §4.11).
#[derive(Parser, Debug)]
#[command(name = "edge-sdk", version, about = "On-device orchestration core for the edge AI SDK")]
struct Args {
    /// Per-SDK home directory; every on-disk artefact (spec §6) is relative
    /// to this.
    #[arg(long, default_value = ".")]
    home_dir: PathBuf,

    /// Optional TOML configuration file, layered under `--home-dir` and
    /// environment overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,

    /// Force the SDK to skip network calls entirely (spec §8 scenario 1).
    #[arg(long, conflicts_with = "online")]
    offline: bool,

    /// Explicitly allow network calls, overriding a config file's
    /// `force_offline`.
    #[arg(long, conflicts_with = "offline")]
    online: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("edge=debug,edge_orchestrator=debug,edge_command_center=debug")
    } else {
        EnvFilter::new("edge=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let home_dir = args.home_dir.to_string_lossy().into_owned();
    let mut config = load_config(&home_dir, args.config.as_deref())
        .with_context(|| format!("loading config for home directory {home_dir}"))?;
    if args.offline {
        config.force_offline = true;
    }
    if args.online {
        config.force_offline = false;
    }

    let collaborators = Collaborators {
        backend: Arc::new(NullBackend),
        transport: Arc::new(UnavailableTransport),
        loader: Arc::new(FileScriptLoader),
        runner: Arc::new(EchoTaskRunner),
        user_events: Arc::new(EchoUserEvents),
        cloud: Arc::new(NeverUpdateCloud),
        priority: Arc::new(NoopPriorityHint),
        telemetry_sink: default_telemetry_sink(),
    };

    let sdk = CoreSdk::new(collaborators);
    sdk.initialize(config).context("initializing CoreSDK")?;

    tracing::info!("edge-sdk worker running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received, draining worker");
    sdk.shutdown();
    Ok(())
}

// ---------------------------------------------------------------------------
// Stand-in collaborators.
//
// The interpreter, ML backend, control-plane transport, and cloud-config
// client are all external to this crate (spec §1). These implementations
// exist only so the binary links and runs end-to-end offline; a real
// embedder replaces every one of them with its own wiring.
// ---------------------------------------------------------------------------

struct NullBackend;

impl AssetBackend for NullBackend {
    fn register_model(&self, _asset: &Asset, _location: &Location) -> Result<AssetHandle, OrchestratorError> {
        Ok(AssetHandle::Null)
    }

    fn parse_document(&self, _asset: &Asset, _location: &Location) -> Result<AssetHandle, OrchestratorError> {
        Ok(AssetHandle::Null)
    }

    fn construct_retriever(
        &self,
        _asset: &Asset,
        _embedding_model: AssetHandle,
        _embedding_store: AssetHandle,
        _document: AssetHandle,
    ) -> Result<AssetHandle, OrchestratorError> {
        Ok(AssetHandle::Null)
    }

    fn bind_llm(&self, _asset: &Asset, _location: &Location) -> Result<AssetHandle, OrchestratorError> {
        Ok(AssetHandle::Null)
    }
}

/// No control plane is configured, so every download attempt fails
/// transiently; a deployment already materialised on disk (offline cold
/// start) never reaches this transport at all.
struct UnavailableTransport;

impl AssetTransport for UnavailableTransport {
    fn fetch_sync(&self, _asset: &Asset) -> Result<Vec<u8>, OrchestratorError> {
        Err(OrchestratorError::new(
            ErrorCode::DownloadFailed,
            "no control-plane transport configured",
        ))
    }

    fn start_async_download(&self, _asset: &Asset) -> Result<AsyncDownloadHandle, OrchestratorError> {
        Err(OrchestratorError::new(
            ErrorCode::DownloadFailed,
            "no control-plane transport configured",
        ))
    }

    fn poll_async_download(&self, _handle: &AsyncDownloadHandle) -> Result<AsyncDownloadStatus, OrchestratorError> {
        Err(OrchestratorError::new(
            ErrorCode::DownloadFailed,
            "no control-plane transport configured",
        ))
    }
}

/// Reads the script bytes to confirm they exist on disk; the parsed `Task`
/// is the unit type, since this binary has no interpreter wired in.
struct FileScriptLoader;

impl ScriptLoader for FileScriptLoader {
    type Task = ();

    fn load_script(&self, location: &Location) -> Result<(), OrchestratorError> {
        std::fs::read(&location.path)
            .map(|_| ())
            .map_err(|e| OrchestratorError::new(ErrorCode::LoadFailed, "failed to read script file").with_source(e))
    }
}

/// Echoes `inputs` back as the result; a placeholder until a real
/// interpreter is wired in.
struct EchoTaskRunner;

impl TaskRunner<()> for EchoTaskRunner {
    fn invoke(
        &self,
        _module: &(),
        _function: &str,
        inputs: &serde_json::Value,
    ) -> Result<serde_json::Value, OrchestratorError> {
        Ok(inputs.clone())
    }
}

struct EchoUserEvents;

impl UserEventsManager for EchoUserEvents {
    fn handle(&self, event: &UserEvent) -> Result<UserEventOutcome, OrchestratorError> {
        Ok(UserEventOutcome {
            status: 0,
            updated_name: Some(event.event_type.clone()),
            updated_payload: Some(event.payload.clone()),
        })
    }
}

struct NeverUpdateCloud;

impl CloudConfigClient for NeverUpdateCloud {
    fn refresh(&self, _current_etag: &str) -> Result<CloudConfigOutcome, OrchestratorError> {
        Ok(CloudConfigOutcome::Unmodified)
    }
}
