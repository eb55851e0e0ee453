//! `CommandCenter`: binds one deployment generation's scheduler, asset
//! graph, task, and output bookkeeping (spec §4.8).
//!
//! A `CommandCenter` is constructed once per deployment generation (active
//! or shadow) via [`CommandCenter::bootstrap`], which admits the full asset
//! DAG — script download, script parse, every module's load job, and the
//! terminal [`edge_assets::ScriptReadyJob`] — to a shared
//! [`edge_job::JobScheduler`]. The interpreter and the asset backend are
//! external collaborators, reached through [`edge_assets::ScriptLoader`],
//! [`edge_assets::AssetBackend`], and this crate's own [`TaskRunner`] and
//! [`UserEventsManager`] traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use edge_assets::{
    build_script_load_job, build_script_ready_job, AssetBackend, AssetTransport, Deployment,
    LoadGraphContext, ReadinessGate, ScriptLoader,
};
use edge_error::{ErrorCode, OrchestratorError};
use edge_job::{BaseJob, JobScheduler, SchedulerFullError};
use edge_runtime::Task;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

// ---------------------------------------------------------------------------
// External collaborators (spec §4.8 / §6)
// ---------------------------------------------------------------------------

/// One host-originated event routed through `add_user_event` (spec §6).
#[derive(Debug, Clone)]
pub struct UserEvent {
    /// Event kind, opaque to this crate.
    pub event_type: String,
    /// Event payload.
    pub payload: serde_json::Value,
}

/// Result of routing a [`UserEvent`] (spec §6:
/// `{status, updated_name, updated_payload}`).
#[derive(Debug, Clone)]
pub struct UserEventOutcome {
    /// Host-facing status code; `0` is success.
    pub status: i32,
    /// Possibly-rewritten event name/type.
    pub updated_name: Option<String>,
    /// Possibly-rewritten payload.
    pub updated_payload: Option<serde_json::Value>,
}

/// Collaborator that actually routes a [`UserEvent`] (analytics pipeline,
/// replay log, etc.), out of scope for this crate (spec §1).
pub trait UserEventsManager: Send + Sync {
    /// Route `event`, possibly rewriting its name/payload.
    fn handle(&self, event: &UserEvent) -> Result<UserEventOutcome, OrchestratorError>;
}

/// Collaborator that dispatches one `run_task` call into the interpreter
/// (spec §4.8, out of scope for this crate per spec §1).
pub trait TaskRunner<M>: Send + Sync {
    /// Invoke `function` on `module` with `inputs`, returning its raw
    /// result value or an interpreter error (caught by `run_task` and
    /// turned into a status record, never unwound across the boundary).
    fn invoke(
        &self,
        module: &M,
        function: &str,
        inputs: &serde_json::Value,
    ) -> Result<serde_json::Value, OrchestratorError>;
}

// ---------------------------------------------------------------------------
// Output handle bookkeeping (spec §4.8, §6)
// ---------------------------------------------------------------------------

/// An opaque handle to a `run_task` result, freed via
/// [`CommandCenter::deallocate_output`] / the host's
/// `deallocate_output_memory` call (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputHandle(pub u64);

/// Status plus output handle returned by [`CommandCenter::run_task`].
#[derive(Debug, Clone)]
pub struct TaskRunResult {
    /// Host-facing status code; `0` is success, `1000` is a script error
    /// (spec §8 scenario 6).
    pub status: i32,
    /// Human-readable message, populated on failure.
    pub message: Option<String>,
    /// Handle to the (possibly empty, on failure) output value.
    pub output: OutputHandle,
}

// ---------------------------------------------------------------------------
// CommandCenter
// ---------------------------------------------------------------------------

struct TaskReadinessGate<M: Clone + Send + Sync + 'static> {
    task: Arc<Task<M>>,
}

impl<M: Clone + Send + Sync + 'static> ReadinessGate for TaskReadinessGate<M> {
    fn is_ready(&self) -> bool {
        self.task.is_ready()
    }
}

/// Binds one deployment generation's live objects (spec §3, §4.8): the
/// deployment manifest, its scheduler (shared with any sibling generation),
/// the asset load graph, the installed `Task` once its script has parsed,
/// and output-handle bookkeeping.
pub struct CommandCenter<L, B, R, M>
where
    L: ScriptLoader<Task = M> + 'static,
    B: AssetBackend + 'static,
    R: TaskRunner<M> + 'static,
    M: Clone + Send + Sync + 'static,
{
    deployment: Deployment,
    is_current: AtomicBool,
    promotable: AtomicBool,
    scheduler: Arc<JobScheduler>,
    runner: Arc<R>,
    user_events: Arc<dyn UserEventsManager>,
    task_slot: Mutex<Option<Arc<Task<M>>>>,
    script_ready_job: Mutex<Option<Arc<edge_assets::ScriptReadyJob>>>,
    outputs: Mutex<HashMap<u64, serde_json::Value>>,
    next_output_id: AtomicU64,
    _backend: std::marker::PhantomData<B>,
}

impl<L, B, R, M> CommandCenter<L, B, R, M>
where
    L: ScriptLoader<Task = M> + 'static,
    B: AssetBackend + 'static,
    R: TaskRunner<M> + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Construct and admit the full asset DAG for `deployment` to
    /// `scheduler`: the script's download+parse chain, every module's load
    /// job, and an install step that, once the script parses, stands up the
    /// `Task` and the terminal `ScriptReadyJob` gated on it (spec §4.6,
    /// §4.8).
    #[allow(clippy::too_many_arguments)]
    pub fn bootstrap(
        deployment: Deployment,
        scheduler: Arc<JobScheduler>,
        backend: Arc<B>,
        transport: Arc<dyn AssetTransport>,
        loader: Arc<L>,
        runner: Arc<R>,
        user_events: Arc<dyn UserEventsManager>,
        home_dir: impl Into<PathBuf>,
        max_download_retries: u32,
        is_current: bool,
    ) -> Result<Arc<Self>, SchedulerFullError> {
        let load_graph = Arc::new(LoadGraphContext::new(
            Arc::clone(&scheduler),
            backend as Arc<dyn AssetBackend>,
            transport,
            home_dir,
            max_download_retries,
        ));

        let (script_download_job, script_download_future) =
            load_graph.admit_download(&deployment.script)?;
        let script_load_job =
            build_script_load_job(Arc::clone(&loader), script_download_job, script_download_future);
        scheduler.add_job(Arc::clone(&script_load_job) as Arc<dyn BaseJob>)?;

        let mut module_jobs = Vec::with_capacity(deployment.modules.len());
        for module in &deployment.modules {
            module_jobs.push(load_graph.build_load_job(module, is_current)?);
        }

        let center = Arc::new(Self {
            deployment,
            is_current: AtomicBool::new(is_current),
            promotable: AtomicBool::new(false),
            scheduler: Arc::clone(&scheduler),
            runner,
            user_events,
            task_slot: Mutex::new(None),
            script_ready_job: Mutex::new(None),
            outputs: Mutex::new(HashMap::new()),
            next_output_id: AtomicU64::new(1),
            _backend: std::marker::PhantomData,
        });

        let install_center = Arc::clone(&center);
        let script_name = center.deployment.script.id.name.clone();
        let install_job = edge_job::Job::new(
            "InstallTaskJob",
            InstallTaskJobBody {
                script_load: script_load_job.future(),
                on_installed: Mutex::new(Some(Box::new(move |parsed: M| {
                    install_center.install_task(script_name, parsed, module_jobs);
                }))),
            },
        );
        install_job.add_child_job(Arc::clone(&script_load_job) as Arc<dyn BaseJob>);
        scheduler.add_job(Arc::clone(&install_job) as Arc<dyn BaseJob>)?;

        Ok(center)
    }

    fn install_task(
        self: Arc<Self>,
        script_name: String,
        parsed: M,
        module_jobs: Vec<Arc<edge_assets::AssetLoadJob>>,
    ) {
        let task = Task::new(script_name, parsed);
        for job in &module_jobs {
            task.track_pending(Arc::new(job.future()));
        }
        *self.task_slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&task));

        let gate = Arc::new(TaskReadinessGate {
            task: Arc::clone(&task),
        });
        let center = Arc::clone(&self);
        let ready_job = build_script_ready_job(gate, move || {
            center.promotable.store(true, Ordering::SeqCst);
        });
        for job in &module_jobs {
            ready_job.add_child_job(Arc::clone(job) as Arc<dyn BaseJob>);
        }
        *self
            .script_ready_job
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&ready_job));

        if let Err(err) = self
            .scheduler
            .add_job(Arc::clone(&ready_job) as Arc<dyn BaseJob>)
        {
            error!(error = %err, "failed to admit ScriptReadyJob, scheduler at capacity");
        }
    }

    /// The deployment this generation serves.
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    /// True for the active generation, false for a shadow under
    /// construction.
    pub fn is_current(&self) -> bool {
        self.is_current.load(Ordering::SeqCst)
    }

    /// Mark this generation as the active one (called by the orchestrator
    /// at the moment of promotion).
    pub fn mark_current(&self) {
        self.is_current.store(true, Ordering::SeqCst);
    }

    /// True once this generation's `ScriptReadyJob` has fired: `run_task`
    /// is safe to call, and — for a shadow — the orchestrator may promote
    /// it (spec §4.6, §4.9, §6).
    pub fn is_ready(&self) -> bool {
        self.promotable.load(Ordering::SeqCst)
    }

    /// Attach an additional dependency to the script-ready gate, for assets
    /// the script begins loading after its global scope already ran (spec
    /// §4.8).
    pub fn update_dependency_of_script_ready_job(&self, child: Arc<dyn BaseJob>) {
        match self
            .script_ready_job
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            Some(job) => job.add_child_job(child),
            None => warn!("update_dependency_of_script_ready_job called before script parsed"),
        }
    }

    /// Route a host-originated event (spec §6).
    pub fn add_user_event(&self, event: UserEvent) -> UserEventOutcome {
        match self.user_events.handle(&event) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "user event handler failed");
                UserEventOutcome {
                    status: err.code.host_status(),
                    updated_name: None,
                    updated_payload: None,
                }
            }
        }
    }

    /// Run `function` on the installed task (spec §4.8). Never unwinds
    /// across this boundary: an interpreter error becomes a `1000` status
    /// with a message (spec §8 scenario 6); calling before the task has
    /// parsed returns `NotReady`'s host status.
    pub fn run_task(&self, function: &str, inputs: serde_json::Value) -> TaskRunResult {
        let Some(task) = self
            .task_slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        else {
            return TaskRunResult {
                status: ErrorCode::NotReady.host_status(),
                message: Some("task has not parsed yet".to_string()),
                output: self.allocate_output(serde_json::Value::Null),
            };
        };
        let runner = Arc::clone(&self.runner);
        let result = task.with_exclusive(|| {
            let module = task.root_module();
            runner.invoke(&module, function, &inputs)
        });
        match result {
            Ok(value) => TaskRunResult {
                status: 0,
                message: None,
                output: self.allocate_output(value),
            },
            Err(err) => {
                error!(error = %err, function, "run_task failed");
                TaskRunResult {
                    status: ErrorCode::ScriptError.host_status(),
                    message: Some(err.message),
                    output: self.allocate_output(serde_json::Value::Null),
                }
            }
        }
    }

    /// Store `value` and return a handle to it.
    pub fn allocate_output(&self, value: serde_json::Value) -> OutputHandle {
        let id = self.next_output_id.fetch_add(1, Ordering::SeqCst);
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, value);
        OutputHandle(id)
    }

    /// Free a previously allocated output (the host's
    /// `deallocate_output_memory`, spec §6).
    pub fn deallocate_output(&self, handle: OutputHandle) -> Result<(), OrchestratorError> {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| {
                OrchestratorError::new(ErrorCode::NotReady, "output handle already freed")
                    .with_context("handle", handle.0)
            })
    }

    /// Read back a still-allocated output, for tests and host adapters that
    /// need the raw value rather than just the handle.
    pub fn peek_output(&self, handle: OutputHandle) -> Option<serde_json::Value> {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle.0)
            .cloned()
    }
}

struct InstallTaskJobBody<M> {
    script_load: edge_future::Future<M>,
    on_installed: Mutex<Option<Box<dyn FnOnce(M) + Send>>>,
}

impl<M: Clone + Send + Sync + 'static> edge_job::JobBody for InstallTaskJobBody<M> {
    type Output = ();

    fn process(&mut self) -> Result<edge_job::JobOutcome<()>, OrchestratorError> {
        let parsed = self.script_load.produce_value()?;
        if let Some(cb) = self
            .on_installed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            cb(parsed);
        }
        Ok(edge_job::JobOutcome::Complete(()))
    }
}
