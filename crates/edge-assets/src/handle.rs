//! Typed handles an [`crate::load_job::AssetLoadJob`] produces once an
//! asset and all of its children have been materialised (spec §4.6).

/// An opaque reference to a registered model, minted by the external ML
/// backend (out of scope per spec §1; modelled as a collaborator trait in
/// [`crate::backend`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle(pub String);

/// An opaque reference to a bound LLM executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmHandle(pub String);

/// A retriever is always composed of exactly three materialised children:
/// an embedding model, an embedding store, and a document.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverHandle {
    /// The embedding model child's handle.
    pub embedding_model: Box<AssetHandle>,
    /// The embedding store child's handle.
    pub embedding_store: Box<AssetHandle>,
    /// The document child's handle.
    pub document: Box<AssetHandle>,
}

/// The sealed set of values an [`crate::load_job::AssetLoadJob`] can
/// produce.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetHandle {
    /// A registered model.
    Model(ModelHandle),
    /// A parsed JSON document.
    Document(serde_json::Value),
    /// A constructed retriever over three materialised children.
    Retriever(RetrieverHandle),
    /// A bound LLM executor.
    Llm(LlmHandle),
    /// Produced by a shadow-generation load job, which materialises files
    /// as a side effect but has no script-visible use for the handle
    /// itself (spec §4.6).
    Null,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriever_handle_wraps_three_children() {
        let handle = RetrieverHandle {
            embedding_model: Box::new(AssetHandle::Model(ModelHandle("m".into()))),
            embedding_store: Box::new(AssetHandle::Document(serde_json::json!({}))),
            document: Box::new(AssetHandle::Document(serde_json::json!({"k": "v"}))),
        };
        assert!(matches!(*handle.embedding_model, AssetHandle::Model(_)));
    }

    #[test]
    fn null_handle_for_shadow_generation() {
        let handle = AssetHandle::Null;
        assert_eq!(handle, AssetHandle::Null);
    }
}
