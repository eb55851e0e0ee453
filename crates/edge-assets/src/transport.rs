//! The control-plane asset transport, an external collaborator whose wire
//! protocol is out of scope (spec §1, §6): fetches compressed bytes
//! synchronously for small assets, or starts/polls an asynchronous download
//! for models and LLMs.

use crate::types::Asset;
use edge_error::OrchestratorError;

/// A handle to an in-flight asynchronous download, opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncDownloadHandle(pub String);

/// The state of an in-flight asynchronous download.
pub enum AsyncDownloadStatus {
    /// Still running; poll again next pass.
    InProgress,
    /// Finished: compressed bytes ready to decompress and persist.
    Complete(Vec<u8>),
    /// Failed; the caller should treat this as a transient failure and
    /// retry per the owning job's retry-epoch policy.
    Failed,
}

/// Collaborator that talks to the control plane to fetch asset bytes.
/// Concrete network transport is out of scope for this crate (spec §1).
pub trait AssetTransport: Send + Sync {
    /// Synchronously fetch compressed bytes for a script or document asset
    /// (spec §4.6: "SCRIPT is fetched synchronously ... as compressed
    /// bytes").
    fn fetch_sync(&self, asset: &Asset) -> Result<Vec<u8>, OrchestratorError>;

    /// Begin an asynchronous download for a model or LLM asset.
    fn start_async_download(
        &self,
        asset: &Asset,
    ) -> Result<AsyncDownloadHandle, OrchestratorError>;

    /// Poll an asynchronous download started via [`Self::start_async_download`].
    fn poll_async_download(
        &self,
        handle: &AsyncDownloadHandle,
    ) -> Result<AsyncDownloadStatus, OrchestratorError>;
}
