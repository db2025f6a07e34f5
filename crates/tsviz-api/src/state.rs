use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tsviz_core::{ColumnarCache, Registry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RwLock<Registry>>,
    pub cache: Arc<ColumnarCache>,
    pub upload_dir: PathBuf,
    pub large_file_threshold_bytes: u64,
    pub max_upload_bytes: u64,
}

impl AppState {
    pub fn new(
        cache_dir: PathBuf,
        upload_dir: PathBuf,
        large_file_threshold_bytes: u64,
        max_upload_bytes: u64,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        std::fs::create_dir_all(&upload_dir)?;
        Ok(Self {
            registry: Arc::new(RwLock::new(Registry::new())),
            cache: Arc::new(ColumnarCache::new(cache_dir)),
            upload_dir,
            large_file_threshold_bytes,
            max_upload_bytes,
        })
    }
}
