//! `CoreSDK`: the worker thread, config-refresh loop, and shadow-promotion
//! logic that ties every other layer together (spec §4.9).
//!
//! Construction takes every external collaborator the lower layers need
//! ([`edge_assets::AssetBackend`], [`edge_assets::AssetTransport`],
//! [`edge_assets::ScriptLoader`], [`edge_command_center::TaskRunner`],
//! [`edge_command_center::UserEventsManager`]) plus this crate's own
//! [`CloudConfigClient`], bundled once in [`Collaborators`]. `initialize`
//! spawns the single worker thread; every host-facing method after that
//! samples the atomically-swapped active [`CommandCenter`] without
//! blocking on the worker.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use edge_assets::{AssetBackend, AssetTransport, Deployment, ScriptLoader};
use edge_command_center::{CommandCenter, TaskRunResult, TaskRunner, UserEvent, UserEventOutcome, UserEventsManager};
use edge_config::SdkConfig;
use edge_error::{ErrorCode, OrchestratorError};
use edge_job::JobScheduler;
use edge_telemetry::{apply_retention, RetentionPolicy, RunMetrics, SessionAccounting, TelemetrySink, TracingSink};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// External collaborators specific to this crate
// ---------------------------------------------------------------------------

/// Result of one cloud-config refresh (spec §4.9 step 1).
pub enum CloudConfigOutcome {
    /// The control plane's response could not be parsed/validated; skip
    /// this tick.
    Invalid,
    /// The ETag still matches; nothing to do.
    Unmodified,
    /// A new deployment is available.
    Valid(Deployment),
}

/// Collaborator that performs the ETag-conditional cloud-config fetch
/// (spec §6, out of scope for this crate per spec §1).
pub trait CloudConfigClient: Send + Sync {
    /// Check for a new deployment, given the currently-served ETag (empty
    /// string if none is active yet).
    fn refresh(&self, current_etag: &str) -> Result<CloudConfigOutcome, OrchestratorError>;
}

/// Thread priority transition points bracket bring-up of the first
/// `CommandCenter` (spec §4.9: "raised while bringing up... lowered once
/// ready").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPriority {
    /// Default scheduling priority.
    Normal,
    /// Elevated priority for fast cold-start.
    Raised,
}

/// Best-effort platform hint; a no-op on platforms without one (spec
/// §4.9).
pub trait ThreadPriorityHint: Send + Sync {
    /// Request `level` for the calling thread.
    fn apply(&self, level: ThreadPriority);
}

/// The hint used when no platform-specific one is wired up.
pub struct NoopPriorityHint;

impl ThreadPriorityHint for NoopPriorityHint {
    fn apply(&self, _level: ThreadPriority) {}
}

/// Every external collaborator `CoreSDK` needs, bundled at construction
/// time.
pub struct Collaborators<L, B, R, M>
where
    L: ScriptLoader<Task = M> + 'static,
    B: AssetBackend + 'static,
    R: TaskRunner<M> + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Turns materialised assets into typed handles.
    pub backend: Arc<B>,
    /// Fetches asset bytes from the control plane.
    pub transport: Arc<dyn AssetTransport>,
    /// Parses a downloaded script into `M`.
    pub loader: Arc<L>,
    /// Dispatches `run_task` calls into the interpreter.
    pub runner: Arc<R>,
    /// Routes host-originated events.
    pub user_events: Arc<dyn UserEventsManager>,
    /// Performs the ETag-conditional cloud-config fetch.
    pub cloud: Arc<dyn CloudConfigClient>,
    /// Platform thread-priority hint.
    pub priority: Arc<dyn ThreadPriorityHint>,
    /// Where to persist the session telemetry summary each flush.
    pub telemetry_sink: Arc<dyn TelemetrySink>,
}

// ---------------------------------------------------------------------------
// CoreSDK
// ---------------------------------------------------------------------------

type Center<L, B, R, M> = Arc<CommandCenter<L, B, R, M>>;

/// The orchestrator: owns the worker thread, the atomically-swapped active
/// (and optional shadow) `CommandCenter`, and the host-facing API (spec
/// §4.9, §6).
pub struct CoreSdk<L, B, R, M>
where
    L: ScriptLoader<Task = M> + 'static,
    B: AssetBackend + 'static,
    R: TaskRunner<M> + 'static,
    M: Clone + Send + Sync + 'static,
{
    collaborators: Collaborators<L, B, R, M>,
    scheduler: Arc<JobScheduler>,
    active: Mutex<Option<Center<L, B, R, M>>>,
    shadow: Mutex<Option<Center<L, B, R, M>>>,
    telemetry: Arc<SessionAccounting>,
    initializing: AtomicBool,
    initialized: AtomicBool,
    stop: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Resolved once, in `bring_up`, from the `SdkConfig` passed to
    /// `initialize`. Every generation shares this one directory.
    home_dir: Mutex<PathBuf>,
    compatibility_tag: Mutex<String>,
    download_retries: Mutex<u32>,
}

impl<L, B, R, M> CoreSdk<L, B, R, M>
where
    L: ScriptLoader<Task = M> + Send + Sync + 'static,
    B: AssetBackend + Send + Sync + 'static,
    R: TaskRunner<M> + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Construct an uninitialised orchestrator.
    pub fn new(collaborators: Collaborators<L, B, R, M>) -> Arc<Self> {
        Arc::new(Self {
            collaborators,
            scheduler: Arc::new(JobScheduler::default()),
            active: Mutex::new(None),
            shadow: Mutex::new(None),
            telemetry: Arc::new(SessionAccounting::new()),
            initializing: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            worker: Mutex::new(None),
            home_dir: Mutex::new(PathBuf::new()),
            compatibility_tag: Mutex::new(String::new()),
            download_retries: Mutex::new(3),
        })
    }

    /// Idempotent bring-up (spec §4.9, §6, §8): a concurrent call observes
    /// [`ErrorCode::AlreadyInitializing`]; a call after success returns
    /// `Ok(())` immediately without repeating any side effect.
    pub fn initialize(self: &Arc<Self>, config: SdkConfig) -> Result<(), OrchestratorError> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self
            .initializing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestratorError::new(
                ErrorCode::AlreadyInitializing,
                "initialize is already in progress on another thread",
            ));
        }

        let result = self.bring_up(&config);
        self.initializing.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                self.initialized.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn bring_up(self: &Arc<Self>, config: &SdkConfig) -> Result<(), OrchestratorError> {
        self.collaborators.priority.apply(ThreadPriority::Raised);

        let home_dir = PathBuf::from(&config.home_dir);
        *self.home_dir.lock().unwrap_or_else(|e| e.into_inner()) = home_dir.clone();
        *self.compatibility_tag.lock().unwrap_or_else(|e| e.into_inner()) = config.compatibility_tag.clone();
        *self.download_retries.lock().unwrap_or_else(|e| e.into_inner()) = config.download_retries;

        let deployment = load_deployment_from_disk(&home_dir, &config.compatibility_tag)?
            .unwrap_or_else(Deployment::absent);

        let center = self.bootstrap_center(deployment, true)?;
        // Drain the startup graph synchronously (spec §4.4: "used at
        // initialisation to drain the startup graph synchronously").
        self.scheduler.do_all_non_priority_jobs();
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(center);

        self.collaborators.priority.apply(ThreadPriority::Normal);

        let poll_interval = Duration::from_secs(config.poll_interval_secs);
        let compatibility_tag = config.compatibility_tag.clone();
        let sdk = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("edge-sdk-worker".into())
            .spawn(move || sdk.run_loop(poll_interval, home_dir, compatibility_tag))
            .map_err(|e| {
                OrchestratorError::new(ErrorCode::Io, "failed to spawn worker thread")
                    .with_source(std::io::Error::other(e.to_string()))
            })?;
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    fn bootstrap_center(
        &self,
        deployment: Deployment,
        is_current: bool,
    ) -> Result<Center<L, B, R, M>, OrchestratorError> {
        let home_dir = self.home_dir.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let download_retries = *self.download_retries.lock().unwrap_or_else(|e| e.into_inner());
        CommandCenter::bootstrap(
            deployment,
            Arc::clone(&self.scheduler),
            Arc::clone(&self.collaborators.backend),
            Arc::clone(&self.collaborators.transport),
            Arc::clone(&self.collaborators.loader),
            Arc::clone(&self.collaborators.runner),
            Arc::clone(&self.collaborators.user_events),
            home_dir,
            download_retries,
            is_current,
        )
        .map_err(|e| OrchestratorError::new(ErrorCode::LoadFailed, e.to_string()))
    }

    fn run_loop(self: Arc<Self>, poll_interval: Duration, home_dir: PathBuf, compatibility_tag: String) {
        while !self.stop.load(Ordering::SeqCst) {
            let tick_start = Instant::now();
            self.refresh_and_promote(&home_dir, &compatibility_tag);
            self.scheduler.do_jobs();
            self.telemetry.record(RunMetrics {
                jobs_run: 0,
                bytes_downloaded: 0,
                pass_duration_ms: tick_start.elapsed().as_millis() as u64,
                errors: 0,
            });
            self.flush_and_retain(&home_dir);
            thread::sleep(poll_interval);
        }
    }

    fn refresh_and_promote(&self, home_dir: &Path, compatibility_tag: &str) {
        let current_etag = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.deployment().etag.clone())
            .unwrap_or_default();

        match self.collaborators.cloud.refresh(&current_etag) {
            Ok(CloudConfigOutcome::Invalid) | Ok(CloudConfigOutcome::Unmodified) => {}
            Ok(CloudConfigOutcome::Valid(new_deployment)) => {
                if let Err(err) = self.save_deployment_to_disk(home_dir, compatibility_tag, &new_deployment) {
                    error!(error = %err, "failed to persist deployment manifest");
                }
                self.promote(new_deployment);
            }
            Err(err) => warn!(error = %err, "cloud config refresh failed"),
        }

        self.check_shadow_promotion();
    }

    fn promote(&self, new_deployment: Deployment) {
        let force_update = new_deployment.force_update;
        let active_snapshot = self.active.lock().unwrap_or_else(|e| e.into_inner()).clone();

        if force_update {
            match self.bootstrap_center(new_deployment, true) {
                Ok(center) => {
                    *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(center);
                    info!("force update: active command center replaced synchronously");
                }
                Err(err) => error!(error = %err, "force update bootstrap failed"),
            }
            return;
        }

        match active_snapshot {
            Some(active) if active.is_ready() && active.deployment().id != new_deployment.id => {
                match self.bootstrap_center(new_deployment, false) {
                    Ok(shadow) => {
                        *self.shadow.lock().unwrap_or_else(|e| e.into_inner()) = Some(shadow);
                        info!("shadow command center constructed for new deployment");
                    }
                    Err(err) => error!(error = %err, "shadow bootstrap failed"),
                }
            }
            Some(_) | None => match self.bootstrap_center(new_deployment, true) {
                Ok(center) => {
                    *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(center);
                    info!("active command center replaced (not yet ready for shadow path)");
                }
                Err(err) => error!(error = %err, "active replacement bootstrap failed"),
            },
        }
    }

    fn check_shadow_promotion(&self) {
        let ready_shadow = {
            let shadow = self.shadow.lock().unwrap_or_else(|e| e.into_inner());
            shadow.as_ref().filter(|s| s.is_ready()).cloned()
        };
        if let Some(shadow) = ready_shadow {
            shadow.mark_current();
            *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(shadow);
            *self.shadow.lock().unwrap_or_else(|e| e.into_inner()) = None;
            info!("shadow command center promoted to active");
        }
    }

    fn flush_and_retain(&self, home_dir: &Path) {
        let summary = self.telemetry.summary();
        self.collaborators.telemetry_sink.flush(&summary);
        self.telemetry.clear();
        apply_retention(
            home_dir,
            |name| name.ends_with(".model") || name.ends_with(".doc") || name.ends_with(".task"),
            &RetentionPolicy::default(),
        );
    }

    fn save_deployment_to_disk(
        &self,
        home_dir: &Path,
        compatibility_tag: &str,
        deployment: &Deployment,
    ) -> Result<(), OrchestratorError> {
        let current_path = home_dir.join(format!("{compatibility_tag}deploymentConfig"));
        let old_path = home_dir.join(format!("{compatibility_tag}oldDeploymentConfig"));
        if current_path.exists() {
            std::fs::rename(&current_path, &old_path).map_err(|e| {
                OrchestratorError::new(ErrorCode::Io, "failed to archive previous deployment config")
                    .with_source(e)
            })?;
        }
        let json = serde_json::to_vec_pretty(deployment).map_err(|e| {
            OrchestratorError::new(ErrorCode::ConfigInvalid, "failed to serialise deployment")
                .with_source(e)
        })?;
        std::fs::write(&current_path, json)
            .map_err(|e| OrchestratorError::new(ErrorCode::Io, "failed to write deployment config").with_source(e))
    }

    /// True once the active generation has a parsed, fully-loaded script
    /// (spec §6).
    pub fn is_ready(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|c| c.is_ready())
    }

    /// Dispatch a `run_task` call to the active generation (spec §6). Never
    /// panics: absence of a ready active generation is itself a `NotReady`
    /// result.
    pub fn run_task(&self, function: &str, inputs: serde_json::Value) -> TaskRunResult {
        match self.active.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(center) => center.run_task(function, inputs),
            None => TaskRunResult {
                status: ErrorCode::NotReady.host_status(),
                message: Some("no active command center yet".to_string()),
                output: edge_command_center::OutputHandle(0),
            },
        }
    }

    /// Route a host-originated event through the active generation (spec
    /// §6).
    pub fn add_user_event(&self, event: UserEvent) -> UserEventOutcome {
        match self.active.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(center) => center.add_user_event(event),
            None => UserEventOutcome {
                status: ErrorCode::NotReady.host_status(),
                updated_name: None,
                updated_payload: None,
            },
        }
    }

    /// Re-admit every job parked waiting for internet (spec §6).
    pub fn internet_switched_on(&self) {
        self.scheduler.notify_online();
    }

    /// True if one or more jobs have exhausted their retry budget and are
    /// parked until the next `internet_switched_on()` call (spec §7).
    pub fn retries_exhausted(&self) -> bool {
        self.scheduler.waiting_for_internet_count() > 0
    }

    /// Free a prior `run_task` result (spec §6).
    pub fn deallocate_output_memory(
        &self,
        handle: edge_command_center::OutputHandle,
    ) -> Result<(), OrchestratorError> {
        match self.active.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(center) => center.deallocate_output(handle),
            None => Err(OrchestratorError::new(
                ErrorCode::NotReady,
                "no active command center yet",
            )),
        }
    }

    /// Stop the worker thread and flush telemetry one final time (spec
    /// §4.11).
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        self.collaborators
            .telemetry_sink
            .flush(&self.telemetry.summary());
    }
}

fn load_deployment_from_disk(
    home_dir: &Path,
    compatibility_tag: &str,
) -> Result<Option<Deployment>, OrchestratorError> {
    let path = home_dir.join(format!("{compatibility_tag}deploymentConfig"));
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)
        .map_err(|e| OrchestratorError::new(ErrorCode::Io, "failed to read deployment config").with_source(e))?;
    let deployment: Deployment = serde_json::from_slice(&bytes).map_err(|e| {
        OrchestratorError::new(ErrorCode::ConfigInvalid, "deployment config is not valid JSON").with_source(e)
    })?;
    deployment.validate()?;
    Ok(Some(deployment))
}

/// The default, observability-only telemetry sink, re-exported for
/// convenience at the CLI layer.
pub fn default_telemetry_sink() -> Arc<dyn TelemetrySink> {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_assets::{Asset, AssetHandle, AssetId, AssetType, Location, WebLocation};
    use edge_assets::{AsyncDownloadHandle, AsyncDownloadStatus};
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn script_asset() -> Asset {
        Asset {
            id: AssetId::new("main", "1", AssetType::Script),
            location: WebLocation {
                path: "/main".into(),
                is_private: false,
            },
            location_on_disk: None,
            metadata: serde_json::Map::new(),
            children: Vec::new(),
            os_provided: false,
        }
    }

    struct StubTransport;
    impl AssetTransport for StubTransport {
        fn fetch_sync(&self, _asset: &Asset) -> Result<Vec<u8>, OrchestratorError> {
            Ok(zstd::stream::encode_all(&b"print(1)"[..], 0).unwrap())
        }
        fn start_async_download(&self, _asset: &Asset) -> Result<AsyncDownloadHandle, OrchestratorError> {
            Ok(AsyncDownloadHandle("h".into()))
        }
        fn poll_async_download(
            &self,
            _handle: &AsyncDownloadHandle,
        ) -> Result<AsyncDownloadStatus, OrchestratorError> {
            Ok(AsyncDownloadStatus::Complete(vec![]))
        }
    }

    struct StubBackend;
    impl AssetBackend for StubBackend {
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

    struct StubLoader;
    impl ScriptLoader for StubLoader {
        type Task = String;
        fn load_script(&self, location: &Location) -> Result<String, OrchestratorError> {
            Ok(location.path.clone())
        }
    }

    struct EchoRunner;
    impl TaskRunner<String> for EchoRunner {
        fn invoke(
            &self,
            module: &String,
            function: &str,
            inputs: &serde_json::Value,
        ) -> Result<serde_json::Value, OrchestratorError> {
            Ok(serde_json::json!({"module": module, "function": function, "inputs": inputs}))
        }
    }

    struct NoopUserEvents;
    impl UserEventsManager for NoopUserEvents {
        fn handle(&self, event: &UserEvent) -> Result<UserEventOutcome, OrchestratorError> {
            Ok(UserEventOutcome {
                status: 0,
                updated_name: Some(event.event_type.clone()),
                updated_payload: Some(event.payload.clone()),
            })
        }
    }

    struct UnmodifiedCloud;
    impl CloudConfigClient for UnmodifiedCloud {
        fn refresh(&self, _current_etag: &str) -> Result<CloudConfigOutcome, OrchestratorError> {
            Ok(CloudConfigOutcome::Unmodified)
        }
    }

    struct CountingSink(Arc<AtomicUsize>);
    impl TelemetrySink for CountingSink {
        fn flush(&self, _summary: &edge_telemetry::SessionSummary) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn collaborators(
        flush_count: Arc<AtomicUsize>,
    ) -> Collaborators<StubLoader, StubBackend, EchoRunner, String> {
        Collaborators {
            backend: Arc::new(StubBackend),
            transport: Arc::new(StubTransport),
            loader: Arc::new(StubLoader),
            runner: Arc::new(EchoRunner),
            user_events: Arc::new(NoopUserEvents),
            cloud: Arc::new(UnmodifiedCloud),
            priority: Arc::new(NoopPriorityHint),
            telemetry_sink: Arc::new(CountingSink(flush_count)),
        }
    }

    #[test]
    fn initialize_is_idempotent_and_spawns_worker() {
        let dir = tempdir().unwrap();
        let flushes = Arc::new(AtomicUsize::new(0));
        let sdk = CoreSdk::new(collaborators(Arc::clone(&flushes)));
        let mut config = SdkConfig::minimal(dir.path().display().to_string());
        config.poll_interval_secs = 60;
        assert!(sdk.initialize(config.clone()).is_ok());
        assert!(sdk.initialize(config).is_ok(), "second call must succeed without re-running side effects");
        assert!(sdk.is_ready());
        sdk.shutdown();
    }

    #[test]
    fn concurrent_initialize_yields_already_initializing() {
        let dir = tempdir().unwrap();
        let flushes = Arc::new(AtomicUsize::new(0));
        let sdk = CoreSdk::new(collaborators(flushes));
        sdk.initializing.store(true, Ordering::SeqCst);
        let config = SdkConfig::minimal(dir.path().display().to_string());
        let err = sdk.initialize(config).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyInitializing);
    }

    #[test]
    fn run_task_before_initialize_is_not_ready() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let sdk = CoreSdk::new(collaborators(flushes));
        let result = sdk.run_task("main", serde_json::json!({}));
        assert_eq!(result.status, ErrorCode::NotReady.host_status());
    }

    #[test]
    fn cold_start_from_existing_deployment_file() {
        let dir = tempdir().unwrap();
        let deployment = Deployment {
            id: 7,
            force_update: false,
            etag: "etag-7".into(),
            script: script_asset(),
            modules: vec![],
        };
        std::fs::write(
            dir.path().join("edge_deploymentConfig"),
            serde_json::to_vec(&deployment).unwrap(),
        )
        .unwrap();

        let flushes = Arc::new(AtomicUsize::new(0));
        let sdk = CoreSdk::new(collaborators(flushes));
        let mut config = SdkConfig::minimal(dir.path().display().to_string());
        config.poll_interval_secs = 60;
        sdk.initialize(config).unwrap();
        assert!(sdk.is_ready());
        let result = sdk.run_task("main", serde_json::json!({}));
        assert_eq!(result.status, 0);
        sdk.shutdown();
    }
}
