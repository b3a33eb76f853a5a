//! 로컬 파일 시스템 업로드 저장소.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use market_core::{FileStore, MarketError, MarketResult, StorageConfig};
use tracing::{debug, instrument};

/// `<root>/<bucket>/<filename>`에 저장하고 `<public_base_url>/<bucket>/<filename>`을 반환합니다.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.chart_dir, config.public_base_url.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate_component(name: &str, value: &str) -> MarketResult<()> {
        if value.is_empty() || value.contains(['/', '\\']) || value == ".." {
            return Err(MarketError::InvalidInput(format!(
                "invalid {}: '{}'",
                name, value
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    async fn upload_with_fixed_id(
        &self,
        id: &str,
        bucket: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> MarketResult<String> {
        Self::validate_component("bucket", bucket)?;
        Self::validate_component("filename", filename)?;

        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MarketError::Upload(format!("{}: {}", dir.display(), e)))?;

        let path = dir.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| MarketError::Upload(format!("{}: {}", path.display(), e)))?;

        debug!(id, path = %path.display(), "File stored");
        Ok(format!("{}/{}/{}", self.public_base_url, bucket, filename))
    }
}
