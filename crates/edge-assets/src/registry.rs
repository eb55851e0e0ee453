//! At-most-once download admission (spec §4.6, §8): across one process
//! lifetime, at most one `AssetDownloadJob` is ever admitted to the
//! scheduler per [`AssetId`].

use crate::types::AssetId;
use std::collections::HashSet;
use std::sync::Mutex;

/// Tracks which assets have already had a download job queued, so a script
/// referencing the same asset twice does not spawn a duplicate download.
#[derive(Default)]
pub struct DownloadRegistry {
    claimed: Mutex<HashSet<AssetId>>,
}

impl DownloadRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim `id` for a new download job. Returns `true` the
    /// first time for a given id, `false` on every subsequent call.
    pub fn try_claim(&self, id: &AssetId) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone())
    }

    /// True if `id` has already been claimed.
    pub fn is_claimed(&self, id: &AssetId) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetType;

    #[test]
    fn first_claim_succeeds_second_fails() {
        let registry = DownloadRegistry::new();
        let id = AssetId::new("m", "1", AssetType::Model);
        assert!(registry.try_claim(&id));
        assert!(!registry.try_claim(&id));
    }

    #[test]
    fn distinct_ids_claim_independently() {
        let registry = DownloadRegistry::new();
        let a = AssetId::new("a", "1", AssetType::Model);
        let b = AssetId::new("b", "1", AssetType::Model);
        assert!(registry.try_claim(&a));
        assert!(registry.try_claim(&b));
    }

    #[test]
    fn is_claimed_reflects_state_without_claiming() {
        let registry = DownloadRegistry::new();
        let id = AssetId::new("m", "1", AssetType::Model);
        assert!(!registry.is_claimed(&id));
        registry.try_claim(&id);
        assert!(registry.is_claimed(&id));
    }
}
