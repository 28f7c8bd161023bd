use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::client::{AssinafyClient, DocumentId};

/// Provider-side processing status of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    Unprocessed,
    Uploaded,
    MetadataReady,
    PendingSignature,
    Certificated,
    Unknown(String),
}

impl DocumentStatus {
    pub(crate) fn from_provider(status: &str) -> Self {
        match status {
            "unprocessed" => Self::Unprocessed,
            "uploaded" => Self::Uploaded,
            "metadata_ready" => Self::MetadataReady,
            "pending_signature" => Self::PendingSignature,
            "certificated" => Self::Certificated,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Whether a signature request can be dispatched for the document.
    ///
    /// The provider accepts assignments as soon as a document reaches
    /// `uploaded`, before metadata extraction finishes.
    pub fn is_ready_for_assignment(&self) -> bool {
        matches!(
            self,
            Self::Uploaded | Self::MetadataReady | Self::PendingSignature
        )
    }
}

impl<'de> Deserialize<'de> for DocumentStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_provider(&s))
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unprocessed => write!(f, "unprocessed"),
            Self::Uploaded => write!(f, "uploaded"),
            Self::MetadataReady => write!(f, "metadata_ready"),
            Self::PendingSignature => write!(f, "pending_signature"),
            Self::Certificated => write!(f, "certificated"),
            Self::Unknown(other) => write!(f, "{other}"),
        }
    }
}

/// Bounds for the fixed-interval readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(3),
        }
    }
}

/// Polls the document status until it is ready for assignment.
///
/// One status call per attempt; poll failures are logged and counted as
/// non-ready attempts rather than aborting the loop. Sleeps only between
/// attempts, so `max_attempts` calls cost `max_attempts - 1` intervals.
/// Blocks its task for up to `max_attempts * interval` — run it from a
/// background task, never inline in a request handler.
pub async fn wait_for_document_ready(
    client: &AssinafyClient,
    document_id: &DocumentId,
    config: &ReadinessConfig,
) -> bool {
    for attempt in 1..=config.max_attempts {
        match client.document_status(document_id).await {
            Ok(status) => {
                info!("document {document_id} status: {status}");
                if status.is_ready_for_assignment() {
                    return true;
                }
            }
            Err(e) => {
                warn!(
                    "status poll {attempt}/{} for document {document_id} failed: {e}",
                    config.max_attempts
                );
            }
        }

        if attempt < config.max_attempts {
            sleep(config.interval).await;
        }
    }

    false
}
