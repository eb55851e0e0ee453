//! The resource backend: external ML/LLM/document collaborators an
//! [`crate::ResourceLoader`] asks to turn a materialised on-disk asset into
//! a typed [`crate::AssetHandle`] (spec §4.6). Concrete backends are out of
//! scope for this crate (spec §1).

use crate::handle::AssetHandle;
use crate::types::{Asset, Location};
use edge_error::OrchestratorError;

/// Collaborator that registers/parses/binds a materialised asset.
pub trait AssetBackend: Send + Sync {
    /// Register a downloaded model file, returning its handle.
    fn register_model(&self, asset: &Asset, location: &Location) -> Result<AssetHandle, OrchestratorError>;

    /// Parse a downloaded JSON document.
    fn parse_document(&self, asset: &Asset, location: &Location) -> Result<AssetHandle, OrchestratorError>;

    /// Construct a retriever from its three already-materialised children.
    fn construct_retriever(
        &self,
        asset: &Asset,
        embedding_model: AssetHandle,
        embedding_store: AssetHandle,
        document: AssetHandle,
    ) -> Result<AssetHandle, OrchestratorError>;

    /// Bind an LLM executor to a downloaded folder.
    fn bind_llm(&self, asset: &Asset, location: &Location) -> Result<AssetHandle, OrchestratorError>;
}

/// Collaborator that asks the interpreter to parse a downloaded script file
/// into a runnable task (spec §4.6, §1 — parsing itself is out of scope for
/// this crate). Generic over the concrete task type so this crate never
/// depends on the interpreter layer that owns it.
pub trait ScriptLoader: Send + Sync {
    /// The parsed, runnable representation a `CommandCenter` holds onto.
    type Task: Clone + Send + Sync + 'static;

    /// Parse the script on disk at `location` into `Self::Task`.
    fn load_script(&self, location: &Location) -> Result<Self::Task, OrchestratorError>;
}
