//! `AssetDownloadJob`: materialises one asset's bytes to disk (spec §4.6).
//!
//! Wraps an [`InternetJob`] whose offline attempt checks for an
//! already-materialised file or folder, and whose online attempts
//! kind-dispatch: scripts and documents are fetched synchronously, models
//! and LLMs go through an asynchronous download that is polled to
//! completion. A retriever is never downloaded directly — admitting one is
//! a programmer error in the caller, not a transient failure.

use crate::transport::{AssetTransport, AsyncDownloadHandle, AsyncDownloadStatus};
use crate::types::{Asset, AssetType, Location};
use edge_error::{ErrorCode, OrchestratorError};
use edge_job::{InternetJobBody, InternetOutcome, OfflineOutcome};
use std::path::PathBuf;
use std::sync::Arc;

/// Offline-then-online materialisation of one [`Asset`] to its canonical
/// on-disk path, underneath `home_dir` (spec §4.6, §6).
pub struct AssetDownloadJob {
    asset: Asset,
    home_dir: PathBuf,
    transport: Arc<dyn AssetTransport>,
    pending: Option<AsyncDownloadHandle>,
}

impl AssetDownloadJob {
    /// Build a job for `asset`, rooted at `home_dir`.
    pub fn new(asset: Asset, home_dir: impl Into<PathBuf>, transport: Arc<dyn AssetTransport>) -> Self {
        Self {
            asset,
            home_dir: home_dir.into(),
            transport,
            pending: None,
        }
    }

    /// The canonical on-disk path this asset materialises to: a file for
    /// every kind except `Llm`, which materialises as a folder.
    pub fn canonical_path(&self) -> PathBuf {
        self.home_dir.join(self.asset.id.on_disk_filename())
    }

    fn exists_on_disk(&self) -> bool {
        let path = self.canonical_path();
        if self.asset.id.asset_type.is_directory_artifact() {
            path.is_dir()
        } else {
            path.is_file()
        }
    }

    fn persist(&self, compressed: &[u8]) -> Result<Location, OrchestratorError> {
        let bytes = zstd::stream::decode_all(compressed).map_err(|e| {
            OrchestratorError::new(ErrorCode::DownloadFailed, "failed to decompress asset bytes")
                .with_context("asset", &self.asset.id.name)
                .with_source(e)
        })?;
        let path = self.canonical_path();
        if self.asset.id.asset_type.is_directory_artifact() {
            std::fs::create_dir_all(&path).map_err(|e| self.io_error(e))?;
            std::fs::write(path.join("payload.bin"), bytes).map_err(|e| self.io_error(e))?;
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
            std::fs::write(&path, bytes).map_err(|e| self.io_error(e))?;
        }
        Ok(Location {
            path: path.to_string_lossy().into_owned(),
        })
    }

    fn io_error(&self, source: std::io::Error) -> OrchestratorError {
        OrchestratorError::new(ErrorCode::Io, "failed to write asset to disk")
            .with_context("asset", &self.asset.id.name)
            .with_source(source)
    }
}

impl InternetJobBody for AssetDownloadJob {
    type Output = Location;

    fn process_offline(&mut self) -> Result<OfflineOutcome<Location>, OrchestratorError> {
        if self.exists_on_disk() {
            Ok(OfflineOutcome::Complete(Location {
                path: self.canonical_path().to_string_lossy().into_owned(),
            }))
        } else {
            Ok(OfflineOutcome::Retry)
        }
    }

    fn process_with_internet(&mut self) -> Result<InternetOutcome<Location>, OrchestratorError> {
        match self.asset.id.asset_type {
            AssetType::Retriever => Err(OrchestratorError::new(
                ErrorCode::DownloadFailed,
                "retriever assets are never downloaded directly",
            )
            .with_context("asset", &self.asset.id.name)),

            AssetType::Script | AssetType::Document => match self.transport.fetch_sync(&self.asset) {
                Ok(bytes) => Ok(InternetOutcome::Complete(self.persist(&bytes)?)),
                Err(_) => Ok(InternetOutcome::Retry),
            },

            AssetType::Model | AssetType::Llm => {
                if self.pending.is_none() {
                    match self.transport.start_async_download(&self.asset) {
                        Ok(handle) => self.pending = Some(handle),
                        Err(_) => return Ok(InternetOutcome::Retry),
                    }
                }
                let handle = self.pending.as_ref().expect("just set above");
                match self.transport.poll_async_download(handle)? {
                    AsyncDownloadStatus::InProgress => Ok(InternetOutcome::Poll),
                    AsyncDownloadStatus::Complete(bytes) => {
                        self.pending = None;
                        Ok(InternetOutcome::Complete(self.persist(&bytes)?))
                    }
                    AsyncDownloadStatus::Failed => {
                        self.pending = None;
                        Ok(InternetOutcome::Retry)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetId, WebLocation};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn leaf_asset(name: &str, asset_type: AssetType) -> Asset {
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

    struct StubTransport {
        sync_bytes: Mutex<Option<Vec<u8>>>,
        poll_sequence: Mutex<Vec<AsyncDownloadStatus>>,
    }

    impl AssetTransport for StubTransport {
        fn fetch_sync(&self, _asset: &Asset) -> Result<Vec<u8>, OrchestratorError> {
            self.sync_bytes
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| OrchestratorError::new(ErrorCode::DownloadFailed, "no bytes queued"))
        }

        fn start_async_download(&self, _asset: &Asset) -> Result<AsyncDownloadHandle, OrchestratorError> {
            Ok(AsyncDownloadHandle("handle-1".into()))
        }

        fn poll_async_download(
            &self,
            _handle: &AsyncDownloadHandle,
        ) -> Result<AsyncDownloadStatus, OrchestratorError> {
            let mut seq = self.poll_sequence.lock().unwrap();
            if seq.is_empty() {
                Ok(AsyncDownloadStatus::Failed)
            } else {
                Ok(seq.remove(0))
            }
        }
    }

    #[test]
    fn offline_hit_skips_network() {
        let dir = tempdir().unwrap();
        let asset = leaf_asset("m", AssetType::Model);
        std::fs::write(dir.path().join(asset.id.on_disk_filename()), b"x").unwrap();
        let transport = Arc::new(StubTransport {
            sync_bytes: Mutex::new(None),
            poll_sequence: Mutex::new(Vec::new()),
        });
        let mut job = AssetDownloadJob::new(asset, dir.path(), transport);
        match job.process_offline().unwrap() {
            OfflineOutcome::Complete(_) => {}
            OfflineOutcome::Retry => panic!("expected offline hit"),
        }
    }

    #[test]
    fn script_fetched_synchronously_and_decompressed() {
        let dir = tempdir().unwrap();
        let asset = leaf_asset("s", AssetType::Script);
        let compressed = zstd::stream::encode_all(&b"print('hi')"[..], 0).unwrap();
        let transport = Arc::new(StubTransport {
            sync_bytes: Mutex::new(Some(compressed)),
            poll_sequence: Mutex::new(Vec::new()),
        });
        let mut job = AssetDownloadJob::new(asset.clone(), dir.path(), transport);
        assert!(matches!(job.process_offline().unwrap(), OfflineOutcome::Retry));
        match job.process_with_internet().unwrap() {
            InternetOutcome::Complete(loc) => {
                let contents = std::fs::read(&loc.path).unwrap();
                assert_eq!(contents, b"print('hi')");
            }
            _ => panic!("expected synchronous completion"),
        }
    }

    #[test]
    fn model_polls_until_complete() {
        let dir = tempdir().unwrap();
        let asset = leaf_asset("m", AssetType::Model);
        let compressed = zstd::stream::encode_all(&b"weights"[..], 0).unwrap();
        let transport = Arc::new(StubTransport {
            sync_bytes: Mutex::new(None),
            poll_sequence: Mutex::new(vec![
                AsyncDownloadStatus::InProgress,
                AsyncDownloadStatus::Complete(compressed),
            ]),
        });
        let mut job = AssetDownloadJob::new(asset, dir.path(), transport);
        assert!(matches!(job.process_with_internet().unwrap(), InternetOutcome::Poll));
        match job.process_with_internet().unwrap() {
            InternetOutcome::Complete(loc) => {
                assert_eq!(std::fs::read(&loc.path).unwrap(), b"weights");
            }
            _ => panic!("expected completion after poll"),
        }
    }

    #[test]
    fn llm_materialises_as_folder() {
        let dir = tempdir().unwrap();
        let asset = leaf_asset("l", AssetType::Llm);
        let compressed = zstd::stream::encode_all(&b"folder-payload"[..], 0).unwrap();
        let transport = Arc::new(StubTransport {
            sync_bytes: Mutex::new(None),
            poll_sequence: Mutex::new(vec![AsyncDownloadStatus::Complete(compressed)]),
        });
        let mut job = AssetDownloadJob::new(asset, dir.path(), transport);
        match job.process_with_internet().unwrap() {
            InternetOutcome::Complete(loc) => {
                assert!(PathBuf::from(&loc.path).is_dir());
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn retriever_cannot_be_downloaded_directly() {
        let dir = tempdir().unwrap();
        let asset = leaf_asset("r", AssetType::Retriever);
        let transport = Arc::new(StubTransport {
            sync_bytes: Mutex::new(None),
            poll_sequence: Mutex::new(Vec::new()),
        });
        let mut job = AssetDownloadJob::new(asset, dir.path(), transport);
        let err = job.process_with_internet().unwrap_err();
        assert_eq!(err.code, ErrorCode::DownloadFailed);
    }
}
