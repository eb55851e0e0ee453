//! Asset dependency graph, download/load jobs, and typed asset handles
//! (spec §3, §4.6, §6).
//!
//! [`LoadGraphContext`] is the entry point: given a deployment's assets it
//! recursively builds the [`AssetLoadJob`]/[`AssetDownloadJob`] sub-DAG,
//! admits every job to a shared [`edge_job::JobScheduler`], and de-duplicates
//! downloads across repeated references to the same [`AssetId`]. Script
//! loading and the final [`ScriptReadyJob`] gate are built separately (by a
//! `CommandCenter`) via [`build_script_load_job`] and
//! [`build_script_ready_job`], since this crate has no dependency on the
//! interpreter/task layer that owns a parsed script.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod download_job;
mod handle;
mod load_job;
mod registry;
mod transport;
mod types;

pub use backend::{AssetBackend, ScriptLoader};
pub use download_job::AssetDownloadJob;
pub use handle::{AssetHandle, LlmHandle, ModelHandle, RetrieverHandle};
pub use load_job::{
    build_script_load_job, build_script_ready_job, AssetLoadJob, LoadGraphContext, ReadinessGate,
    ScriptLoadJobBody, ScriptReadyJob,
};
pub use registry::DownloadRegistry;
pub use transport::{AssetTransport, AsyncDownloadHandle, AsyncDownloadStatus};
pub use types::{Asset, AssetId, AssetType, Deployment, Location, WebLocation};
