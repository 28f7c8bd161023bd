use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use super::signer::Signer;
use super::status::DocumentStatus;
use crate::config::AssinafyConfig;

/// The only delivery method this integration supports; in-person and
/// physical flows are not wired up.
const ASSIGNMENT_METHOD: &str = "virtual";

#[derive(Debug, thiserror::Error)]
pub enum AssinafyError {
    #[error(transparent)]
    Network(#[from] reqwest::Error),
    #[error("provider API error (status {status}): {body}")]
    Api { status: StatusCode, body: String },
    #[error("contract file not found: {0}")]
    FileNotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct DocumentId(String);

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct SignerId(String);

impl From<String> for SignerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SignerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PackageId(String);

impl From<String> for PackageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dispatched signature request, as acknowledged by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRequest {
    pub document_id: DocumentId,
    pub signer_id: SignerId,
    pub package_id: PackageId,
    pub requested_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct IdResource {
    id: String,
}

#[derive(Deserialize)]
struct DocumentInfo {
    status: DocumentStatus,
}

/// HTTP client for the Assinafy REST API.
///
/// Every call carries the account's bearer token and `X-Account-Id`
/// header, and is bounded by the configured request timeout.
#[derive(Debug, Clone)]
pub struct AssinafyClient {
    http: Client,
    account_id: String,
    api_token: String,
    base_url: String,
}

impl AssinafyClient {
    pub fn new(config: &AssinafyConfig) -> Result<Self, AssinafyError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            http,
            account_id: config.account_id.clone(),
            api_token: config.api_token.clone(),
            base_url: config.base_url.as_str().trim_end_matches('/').to_owned(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_token)
            .header("X-Account-Id", &self.account_id)
    }

    /// Uploads a rendered contract PDF and returns the provider document id.
    ///
    /// The local file is checked before any network traffic so a missing
    /// contract fails fast with [`AssinafyError::FileNotFound`].
    pub async fn upload_document(&self, path: &Path) -> Result<DocumentId, AssinafyError> {
        if tokio::fs::metadata(path).await.is_err() {
            return Err(AssinafyError::FileNotFound(path.to_path_buf()));
        }

        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("contrato.pdf")
            .to_owned();

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")?;
        let form = Form::new().part("file", part);

        let response = self
            .request(
                Method::POST,
                &format!("/accounts/{}/documents", self.account_id),
            )
            .multipart(form)
            .send()
            .await?;

        let envelope: DataEnvelope<IdResource> = into_success(response).await?.json().await?;
        info!("uploaded contract {} as document {}", path.display(), envelope.data.id);
        Ok(DocumentId(envelope.data.id))
    }

    /// Fetches the provider-side processing status of a document.
    pub async fn document_status(
        &self,
        document_id: &DocumentId,
    ) -> Result<DocumentStatus, AssinafyError> {
        let response = self
            .request(Method::GET, &format!("/documents/{document_id}"))
            .send()
            .await?;

        let envelope: DataEnvelope<DocumentInfo> = into_success(response).await?.json().await?;
        Ok(envelope.data.status)
    }

    /// Lists signers matching the provider's fuzzy email search.
    pub async fn search_signers(&self, email: &str) -> Result<Vec<Signer>, AssinafyError> {
        let response = self
            .request(
                Method::GET,
                &format!("/accounts/{}/signers", self.account_id),
            )
            .query(&[("search", email)])
            .send()
            .await?;

        let envelope: DataEnvelope<Vec<Signer>> = into_success(response).await?.json().await?;
        Ok(envelope.data)
    }

    /// Registers a new signer with the provider account.
    pub async fn create_signer(
        &self,
        full_name: &str,
        email: &str,
    ) -> Result<Signer, AssinafyError> {
        let response = self
            .request(
                Method::POST,
                &format!("/accounts/{}/signers", self.account_id),
            )
            .json(&serde_json::json!({
                "full_name": full_name,
                "email": email,
            }))
            .send()
            .await?;

        let envelope: DataEnvelope<Signer> = into_success(response).await?.json().await?;
        Ok(envelope.data)
    }

    /// Dispatches a virtual signature request for the document.
    ///
    /// Not idempotent at the provider: issuing a second assignment for the
    /// same document creates a second package. Callers gate on the
    /// persisted package id.
    pub async fn request_signature(
        &self,
        document_id: &DocumentId,
        signer_id: &SignerId,
    ) -> Result<SignatureRequest, AssinafyError> {
        let response = self
            .request(
                Method::POST,
                &format!("/documents/{document_id}/assignments"),
            )
            .json(&serde_json::json!({
                "method": ASSIGNMENT_METHOD,
                "signer_ids": [signer_id],
            }))
            .send()
            .await?;

        let envelope: DataEnvelope<IdResource> = into_success(response).await?.json().await?;
        info!(
            "signature requested for document {document_id}, package {}",
            envelope.data.id
        );

        Ok(SignatureRequest {
            document_id: document_id.clone(),
            signer_id: signer_id.clone(),
            package_id: PackageId(envelope.data.id),
            requested_at: Utc::now(),
        })
    }

    /// Streams the certificated (fully signed) PDF to `destination`,
    /// creating the parent directory when absent.
    ///
    /// Returns `false` on any failure instead of an error: the caller's
    /// only recovery is a later re-fetch, and the absence of the file is
    /// signal enough. The body is staged next to the destination and
    /// renamed into place, so a failed download leaves no partial file.
    pub async fn download_certificated(
        &self,
        document_id: &DocumentId,
        destination: &Path,
    ) -> bool {
        match self.try_download_certificated(document_id, destination).await {
            Ok(()) => {
                info!(
                    "signed document {document_id} saved to {}",
                    destination.display()
                );
                true
            }
            Err(e) => {
                error!("certificated download for document {document_id} failed: {e}");
                false
            }
        }
    }

    async fn try_download_certificated(
        &self,
        document_id: &DocumentId,
        destination: &Path,
    ) -> Result<(), AssinafyError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self
            .request(
                Method::GET,
                &format!("/documents/{document_id}/download/certificated"),
            )
            .send()
            .await?;
        let response = into_success(response).await?;

        let staging = destination.with_extension("part");
        if let Err(e) = write_body(response, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&staging, destination).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        Ok(())
    }
}

async fn into_success(response: Response) -> Result<Response, AssinafyError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(AssinafyError::Api { status, body })
}

async fn write_body(response: Response, path: &Path) -> Result<(), AssinafyError> {
    let mut file = File::create(path).await?;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }

    file.flush().await?;
    Ok(())
}
