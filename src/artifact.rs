//! On-disk layout for contract PDFs.
//!
//! Rendered (unsigned) contracts live under `{storage_root}/contratos`,
//! signed ones under `{storage_root}/contratos_assinados`, both keyed by
//! lease id.

use std::path::{Path, PathBuf};

const RENDERED_DIR: &str = "contratos";
const SIGNED_DIR: &str = "contratos_assinados";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    storage_root: PathBuf,
}

impl ArtifactStore {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    pub fn rendered_contract_path(&self, lease_id: i64) -> PathBuf {
        self.storage_root.join(RENDERED_DIR).join(pdf_name(lease_id))
    }

    pub fn signed_contract_path(&self, lease_id: i64) -> PathBuf {
        self.storage_root.join(SIGNED_DIR).join(pdf_name(lease_id))
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Writes a rendered contract PDF, creating the directory when absent.
    /// Re-rendering overwrites in place.
    pub async fn save_rendered_contract(
        &self,
        lease_id: i64,
        bytes: &[u8],
    ) -> Result<PathBuf, std::io::Error> {
        let path = self.rendered_contract_path(lease_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

fn pdf_name(lease_id: i64) -> String {
    format!("{lease_id}.pdf")
}
