//! Asset load DAG construction (spec §4.6): `AssetLoadJob`, the at-most-once
//! download cache, and the script-side `ScriptReadyJob` gate.

use crate::backend::{AssetBackend, ScriptLoader};
use crate::download_job::AssetDownloadJob;
use crate::handle::AssetHandle;
use crate::registry::DownloadRegistry;
use crate::transport::AssetTransport;
use crate::types::{Asset, AssetId, AssetType, Location};
use edge_error::{ErrorCode, OrchestratorError};
use edge_future::Future;
use edge_job::{BaseJob, InternetJob, Job, JobBody, JobOutcome, JobScheduler, SchedulerFullError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// AssetLoadJob
// ---------------------------------------------------------------------------

struct AssetLoadJobBody {
    asset: Asset,
    backend: Arc<dyn AssetBackend>,
    is_current: bool,
    download: Option<Future<Location>>,
    children: Vec<Future<AssetHandle>>,
}

impl JobBody for AssetLoadJobBody {
    type Output = AssetHandle;

    fn process(&mut self) -> Result<JobOutcome<AssetHandle>, OrchestratorError> {
        // Shadow generations materialise files as a side effect of their
        // children completing but have no script-visible use for the
        // handle itself (spec §4.6).
        if !self.is_current {
            return Ok(JobOutcome::Complete(AssetHandle::Null));
        }

        if let Some(ref download) = self.download {
            // Safe to call without blocking: the scheduler only invokes
            // `process()` once every child (including this download) has
            // reached `COMPLETE` (spec §4.4).
            let location = download.produce_value()?;
            let handle = match self.asset.id.asset_type {
                AssetType::Model => self.backend.register_model(&self.asset, &location)?,
                AssetType::Document => self.backend.parse_document(&self.asset, &location)?,
                AssetType::Llm => self.backend.bind_llm(&self.asset, &location)?,
                AssetType::Retriever => {
                    return Err(OrchestratorError::new(
                        ErrorCode::LoadFailed,
                        "retriever asset has no download of its own",
                    )
                    .with_context("asset", &self.asset.id.name));
                }
                AssetType::Script => {
                    return Err(OrchestratorError::new(
                        ErrorCode::LoadFailed,
                        "script assets are loaded via a dedicated script-load job",
                    )
                    .with_context("asset", &self.asset.id.name));
                }
            };
            return Ok(JobOutcome::Complete(handle));
        }

        let mut handles = Vec::with_capacity(self.children.len());
        for child in &self.children {
            handles.push(child.produce_value()?);
        }
        let [embedding_model, embedding_store, document]: [AssetHandle; 3] =
            handles.try_into().map_err(|_| {
                OrchestratorError::new(
                    ErrorCode::LoadFailed,
                    "retriever requires exactly 3 resolved children",
                )
                .with_context("asset", &self.asset.id.name)
            })?;
        let handle = self
            .backend
            .construct_retriever(&self.asset, embedding_model, embedding_store, document)?;
        Ok(JobOutcome::Complete(handle))
    }
}

/// A job producing a typed [`AssetHandle`] once an asset (and, recursively,
/// every one of its children) has been downloaded and/or loaded (spec
/// §4.6).
pub type AssetLoadJob = Job<AssetLoadJobBody>;

// ---------------------------------------------------------------------------
// LoadGraphContext
// ---------------------------------------------------------------------------

/// Builds and admits the [`AssetLoadJob`]/[`AssetDownloadJob`] sub-DAG for
/// one or more top-level module assets, de-duplicating downloads across
/// repeated references to the same [`AssetId`] (spec §4.6's "at-most-once
/// materialisation").
pub struct LoadGraphContext {
    scheduler: Arc<JobScheduler>,
    backend: Arc<dyn AssetBackend>,
    transport: Arc<dyn AssetTransport>,
    home_dir: PathBuf,
    max_download_retries: u32,
    registry: DownloadRegistry,
    download_jobs: Mutex<HashMap<AssetId, (Arc<dyn BaseJob>, Future<Location>)>>,
}

impl LoadGraphContext {
    /// Construct a context rooted at `home_dir`, using `backend` to turn
    /// materialised assets into handles and `transport` to fetch bytes.
    pub fn new(
        scheduler: Arc<JobScheduler>,
        backend: Arc<dyn AssetBackend>,
        transport: Arc<dyn AssetTransport>,
        home_dir: impl Into<PathBuf>,
        max_download_retries: u32,
    ) -> Self {
        Self {
            scheduler,
            backend,
            transport,
            home_dir: home_dir.into(),
            max_download_retries,
            registry: DownloadRegistry::new(),
            download_jobs: Mutex::new(HashMap::new()),
        }
    }

    /// True if a download for `id` has already been admitted this process
    /// lifetime.
    pub fn is_download_claimed(&self, id: &AssetId) -> bool {
        self.registry.is_claimed(id)
    }

    /// Admit (or reuse, if already claimed) the download job for `asset`.
    /// Exposed publicly so a caller building a script-load chain (which
    /// sits outside the recursive [`Self::build_load_job`] walk) can admit
    /// the script's own download the same way.
    pub fn admit_download(
        &self,
        asset: &Asset,
    ) -> Result<(Arc<dyn BaseJob>, Future<Location>), SchedulerFullError> {
        let mut cache = self
            .download_jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some((job, future)) = cache.get(&asset.id) {
            return Ok((Arc::clone(job), future.clone()));
        }
        let job = Job::new(
            format!("AssetDownloadJob[{}]", asset.id.on_disk_filename()),
            InternetJob::new(
                AssetDownloadJob::new(asset.clone(), &self.home_dir, Arc::clone(&self.transport)),
                self.max_download_retries,
            ),
        );
        let future = job.future();
        let base: Arc<dyn BaseJob> = job;
        self.registry.try_claim(&asset.id);
        self.scheduler.add_job(Arc::clone(&base))?;
        cache.insert(asset.id.clone(), (Arc::clone(&base), future.clone()));
        Ok((base, future))
    }

    /// Recursively build (and admit to the scheduler) the load job for
    /// `asset`. Leaf assets get a single [`AssetDownloadJob`]; non-leaf
    /// assets (a `Retriever`'s three children) get one [`AssetLoadJob`] per
    /// child, built first and attached as dependencies (spec §4.6).
    pub fn build_load_job(
        &self,
        asset: &Asset,
        is_current: bool,
    ) -> Result<Arc<AssetLoadJob>, SchedulerFullError> {
        let name = format!("AssetLoadJob[{}:{}]", asset.id.name, asset.id.version);
        if asset.children.is_empty() {
            let (download_job, download_future) = self.admit_download(asset)?;
            let job = Job::new(
                name,
                AssetLoadJobBody {
                    asset: asset.clone(),
                    backend: Arc::clone(&self.backend),
                    is_current,
                    download: Some(download_future),
                    children: Vec::new(),
                },
            );
            job.add_child_job(download_job);
            self.scheduler.add_job(Arc::clone(&job) as Arc<dyn BaseJob>)?;
            Ok(job)
        } else {
            let mut child_jobs: Vec<Arc<dyn BaseJob>> = Vec::with_capacity(asset.children.len());
            let mut child_futures: Vec<Future<AssetHandle>> =
                Vec::with_capacity(asset.children.len());
            for child in &asset.children {
                let child_job = self.build_load_job(child, is_current)?;
                child_futures.push(child_job.future());
                child_jobs.push(child_job as Arc<dyn BaseJob>);
            }
            let job = Job::new(
                name,
                AssetLoadJobBody {
                    asset: asset.clone(),
                    backend: Arc::clone(&self.backend),
                    is_current,
                    download: None,
                    children: child_futures,
                },
            );
            for child in child_jobs {
                job.add_child_job(child);
            }
            self.scheduler.add_job(Arc::clone(&job) as Arc<dyn BaseJob>)?;
            Ok(job)
        }
    }
}

// ---------------------------------------------------------------------------
// Script load job
// ---------------------------------------------------------------------------

/// Body of the `Job<L::Task>` that hands a downloaded script file to a
/// [`ScriptLoader`] (spec §4.6: "Script load is a separate `Job<()>`" —
/// generalised here to return the parsed task rather than `()`, since the
/// caller needs the parsed value to install on its `CommandCenter`).
pub struct ScriptLoadJobBody<L: ScriptLoader> {
    loader: Arc<L>,
    download: Future<Location>,
}

impl<L: ScriptLoader> JobBody for ScriptLoadJobBody<L> {
    type Output = L::Task;

    fn process(&mut self) -> Result<JobOutcome<L::Task>, OrchestratorError> {
        let location = self.download.produce_value()?;
        let task = self.loader.load_script(&location)?;
        Ok(JobOutcome::Complete(task))
    }
}

/// Build the script-load job: depends on the script's own
/// [`AssetDownloadJob`] and, once that completes, asks `loader` to parse the
/// file into `L::Task`.
pub fn build_script_load_job<L: ScriptLoader + 'static>(
    loader: Arc<L>,
    download_job: Arc<dyn BaseJob>,
    download_future: Future<Location>,
) -> Arc<Job<ScriptLoadJobBody<L>>> {
    let job = Job::new(
        "ScriptLoadJob",
        ScriptLoadJobBody {
            loader,
            download: download_future,
        },
    );
    job.add_child_job(download_job);
    job
}

// ---------------------------------------------------------------------------
// ScriptReadyJob
// ---------------------------------------------------------------------------

/// Polled by [`ScriptReadyJobBody::process`] to know whether every pending
/// future the script's global scope spawned has resolved (spec §4.7's
/// `Task::is_ready()`). Kept as a trait so this crate never depends on the
/// interpreter/task layer.
pub trait ReadinessGate: Send + Sync {
    /// True once the gated task has no outstanding pending futures.
    fn is_ready(&self) -> bool;
}

/// Body of the DAG's terminal job: retries until [`ReadinessGate::is_ready`]
/// is true, then runs a one-shot callback (promotion / file-swap logic, spec
/// §4.6) and retires.
pub struct ScriptReadyJobBody {
    gate: Arc<dyn ReadinessGate>,
    on_ready: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl JobBody for ScriptReadyJobBody {
    type Output = ();

    fn process(&mut self) -> Result<JobOutcome<()>, OrchestratorError> {
        if !self.gate.is_ready() {
            return Ok(JobOutcome::Retry);
        }
        if let Some(cb) = self
            .on_ready
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            cb();
        }
        Ok(JobOutcome::Complete(()))
    }
}

/// The final node in a deployment's asset DAG (spec §4.6). Transitively
/// depends on every `AssetLoadJob` the script spawned during its
/// global-scope evaluation; additional dependencies can be attached after
/// construction via [`Job::add_child_job`] as the script discovers more
/// assets to await.
pub type ScriptReadyJob = Job<ScriptReadyJobBody>;

/// Construct a [`ScriptReadyJob`] gated on `gate`, running `on_ready` exactly
/// once when it first observes readiness.
pub fn build_script_ready_job(
    gate: Arc<dyn ReadinessGate>,
    on_ready: impl FnOnce() + Send + 'static,
) -> Arc<ScriptReadyJob> {
    Job::new(
        "ScriptReadyJob",
        ScriptReadyJobBody {
            gate,
            on_ready: Mutex::new(Some(Box::new(on_ready))),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AsyncDownloadHandle, AsyncDownloadStatus};
    use crate::types::{AssetId, WebLocation};
    use edge_job::JobStatus;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    fn leaf(name: &str, asset_type: AssetType) -> Asset {
        Asset {
            id: AssetId::new(name, "1", asset_type),
            location: WebLocation {
                path: format!("/{name}"),
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
            Ok(zstd::stream::encode_all(&b"bytes"[..], 0).unwrap())
        }
        fn start_async_download(
            &self,
            _asset: &Asset,
        ) -> Result<AsyncDownloadHandle, OrchestratorError> {
            Ok(AsyncDownloadHandle("h".into()))
        }
        fn poll_async_download(
            &self,
            _handle: &AsyncDownloadHandle,
        ) -> Result<AsyncDownloadStatus, OrchestratorError> {
            Ok(AsyncDownloadStatus::Complete(
                zstd::stream::encode_all(&b"weights"[..], 0).unwrap(),
            ))
        }
    }

    struct RecordingBackend {
        registered: AtomicU32,
        constructed_retrievers: AtomicU32,
    }
    impl AssetBackend for RecordingBackend {
        fn register_model(
            &self,
            _asset: &Asset,
            _location: &Location,
        ) -> Result<AssetHandle, OrchestratorError> {
            self.registered.fetch_add(1, Ordering::SeqCst);
            Ok(AssetHandle::Model(crate::handle::ModelHandle("m".into())))
        }
        fn parse_document(
            &self,
            _asset: &Asset,
            _location: &Location,
        ) -> Result<AssetHandle, OrchestratorError> {
            Ok(AssetHandle::Document(serde_json::json!({})))
        }
        fn construct_retriever(
            &self,
            _asset: &Asset,
            embedding_model: AssetHandle,
            embedding_store: AssetHandle,
            document: AssetHandle,
        ) -> Result<AssetHandle, OrchestratorError> {
            self.constructed_retrievers.fetch_add(1, Ordering::SeqCst);
            Ok(AssetHandle::Retriever(crate::handle::RetrieverHandle {
                embedding_model: Box::new(embedding_model),
                embedding_store: Box::new(embedding_store),
                document: Box::new(document),
            }))
        }
        fn bind_llm(
            &self,
            _asset: &Asset,
            _location: &Location,
        ) -> Result<AssetHandle, OrchestratorError> {
            Ok(AssetHandle::Llm(crate::handle::LlmHandle("l".into())))
        }
    }

    #[test]
    fn leaf_model_resolves_to_model_handle() {
        let dir = tempdir().unwrap();
        let scheduler = Arc::new(JobScheduler::default());
        let backend = Arc::new(RecordingBackend {
            registered: AtomicU32::new(0),
            constructed_retrievers: AtomicU32::new(0),
        });
        let ctx = LoadGraphContext::new(
            Arc::clone(&scheduler),
            backend.clone(),
            Arc::new(StubTransport),
            dir.path(),
            3,
        );
        let asset = leaf("m", AssetType::Model);
        let job = ctx.build_load_job(&asset, true).unwrap();
        scheduler.do_all_non_priority_jobs();
        let handle = job.future().produce_value().unwrap();
        assert!(matches!(handle, AssetHandle::Model(_)));
        assert_eq!(backend.registered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shadow_generation_short_circuits_to_null() {
        let dir = tempdir().unwrap();
        let scheduler = Arc::new(JobScheduler::default());
        let backend = Arc::new(RecordingBackend {
            registered: AtomicU32::new(0),
            constructed_retrievers: AtomicU32::new(0),
        });
        let ctx = LoadGraphContext::new(
            Arc::clone(&scheduler),
            backend,
            Arc::new(StubTransport),
            dir.path(),
            3,
        );
        let asset = leaf("m", AssetType::Model);
        let job = ctx.build_load_job(&asset, false).unwrap();
        scheduler.do_all_non_priority_jobs();
        assert_eq!(job.future().produce_value().unwrap(), AssetHandle::Null);
    }

    #[test]
    fn retriever_composes_three_children() {
        let dir = tempdir().unwrap();
        let scheduler = Arc::new(JobScheduler::default());
        let backend = Arc::new(RecordingBackend {
            registered: AtomicU32::new(0),
            constructed_retrievers: AtomicU32::new(0),
        });
        let ctx = LoadGraphContext::new(
            Arc::clone(&scheduler),
            backend.clone(),
            Arc::new(StubTransport),
            dir.path(),
            3,
        );
        let mut retriever = leaf("r", AssetType::Retriever);
        retriever.children = vec![
            leaf("embed-model", AssetType::Model),
            leaf("embed-store", AssetType::Document),
            leaf("doc", AssetType::Document),
        ];
        let job = ctx.build_load_job(&retriever, true).unwrap();
        scheduler.do_all_non_priority_jobs();
        let handle = job.future().produce_value().unwrap();
        assert!(matches!(handle, AssetHandle::Retriever(_)));
        assert_eq!(backend.constructed_retrievers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeated_reference_reuses_single_download_job() {
        let dir = tempdir().unwrap();
        let scheduler = Arc::new(JobScheduler::default());
        let backend = Arc::new(RecordingBackend {
            registered: AtomicU32::new(0),
            constructed_retrievers: AtomicU32::new(0),
        });
        let ctx = LoadGraphContext::new(
            Arc::clone(&scheduler),
            backend,
            Arc::new(StubTransport),
            dir.path(),
            3,
        );
        let asset = leaf("shared", AssetType::Model);
        let first = ctx.build_load_job(&asset, true).unwrap();
        let second = ctx.build_load_job(&asset, true).unwrap();
        scheduler.do_all_non_priority_jobs();
        first.future().produce_value().unwrap();
        second.future().produce_value().unwrap();
        assert!(ctx.is_download_claimed(&asset.id));
    }

    struct FlagGate(Arc<AtomicBool>);
    impl ReadinessGate for FlagGate {
        fn is_ready(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn script_ready_job_retries_until_gate_opens_then_runs_once() {
        let scheduler = JobScheduler::default();
        let flag = Arc::new(AtomicBool::new(false));
        let fired = Arc::new(AtomicU32::new(0));
        let fired_cb = Arc::clone(&fired);
        let job = build_script_ready_job(Arc::new(FlagGate(Arc::clone(&flag))), move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.add_job(Arc::clone(&job) as Arc<dyn BaseJob>).unwrap();
        scheduler.do_jobs();
        assert!(!job.is_complete());
        flag.store(true, Ordering::SeqCst);
        scheduler.do_jobs();
        assert!(job.is_complete());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    struct RecordingLoader {
        calls: StdMutex<u32>,
    }
    impl ScriptLoader for RecordingLoader {
        type Task = String;
        fn load_script(&self, location: &Location) -> Result<String, OrchestratorError> {
            *self.calls.lock().unwrap() += 1;
            Ok(location.path.clone())
        }
    }

    #[test]
    fn script_load_job_waits_for_download_then_parses() {
        let dir = tempdir().unwrap();
        let scheduler = Arc::new(JobScheduler::default());
        let script = leaf("s", AssetType::Script);
        let download_job = Job::new(
            "AssetDownloadJob[s]",
            InternetJob::new(
                AssetDownloadJob::new(script.clone(), dir.path(), Arc::new(StubTransport)),
                3,
            ),
        );
        let download_future = download_job.future();
        scheduler
            .add_job(Arc::clone(&download_job) as Arc<dyn BaseJob>)
            .unwrap();
        let loader = Arc::new(RecordingLoader {
            calls: StdMutex::new(0),
        });
        let load_job = build_script_load_job(
            Arc::clone(&loader),
            download_job as Arc<dyn BaseJob>,
            download_future,
        );
        scheduler
            .add_job(Arc::clone(&load_job) as Arc<dyn BaseJob>)
            .unwrap();
        scheduler.do_all_non_priority_jobs();
        assert_eq!(scheduler.waiting_for_internet_count(), 0);
        let task_path = load_job.future().produce_value().unwrap();
        assert!(task_path.ends_with("s1.task"));
        assert_eq!(*loader.calls.lock().unwrap(), 1);
        assert_eq!(load_job.run(), JobStatus::Complete);
    }
}
