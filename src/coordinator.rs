//! Signature lifecycle coordination.
//!
//! Owns every transition of a lease contract between "rendered" and
//! "signed + archived": upload, readiness wait, signer resolution,
//! request dispatch, and the reconciliation both the scheduled poller and
//! the webhook path funnel through. Keeping reconciliation in one place
//! is what lets the two paths race safely.

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifact::ArtifactStore;
use crate::assinafy::{
    AssinafyClient, AssinafyError, DocumentId, DocumentStatus, PackageId, ReadinessConfig,
    SignatureRequest, find_or_create_signer, wait_for_document_ready,
};
use crate::lease::{self, LeaseAgreement, LeaseUpdateError, SignatureStatus};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("lease {0} not found")]
    LeaseNotFound(i64),
    #[error("lease {lease_id} already has an active signature request (package {package_id})")]
    AlreadyRequested {
        lease_id: i64,
        package_id: PackageId,
    },
    #[error("document {document_id} not ready for assignment after polling")]
    NotReady { document_id: DocumentId },
    #[error(transparent)]
    Provider(#[from] AssinafyError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Lease(#[from] LeaseUpdateError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Provider(#[from] AssinafyError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What a reconciliation pass did for one lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The persisted record was already signed; nothing touched.
    AlreadySigned,
    /// The provider has not certificated the document yet.
    Unchanged,
    /// This call transitioned the record and archived the artifact.
    TransitionedToSigned,
}

pub struct SignatureCoordinator {
    client: Arc<AssinafyClient>,
    pool: SqlitePool,
    artifacts: ArtifactStore,
    readiness: ReadinessConfig,
}

impl SignatureCoordinator {
    pub fn new(
        client: Arc<AssinafyClient>,
        pool: SqlitePool,
        artifacts: ArtifactStore,
        readiness: ReadinessConfig,
    ) -> Self {
        Self {
            client,
            pool,
            artifacts,
            readiness,
        }
    }

    /// Drives a rendered contract to a dispatched signature request:
    /// upload, wait for provider processing, resolve the signer, request
    /// the signature, and persist the provider ids along the way.
    ///
    /// Refused outright when a request was already dispatched — the
    /// provider would happily create a second package. An earlier attempt
    /// that died after the upload is resumed instead of re-uploaded,
    /// since the document id is already pinned to the lease.
    ///
    /// The readiness wait blocks for up to `max_attempts * interval`;
    /// call this from a background task, not a request handler.
    ///
    /// # Errors
    ///
    /// `NotReady` when the readiness poll is exhausted; the pipeline is
    /// not retried automatically and a later call resumes from the wait.
    pub async fn submit_for_signature(
        &self,
        lease_id: i64,
    ) -> Result<SignatureRequest, SubmitError> {
        let lease = lease::find_by_id(&self.pool, lease_id)
            .await?
            .ok_or(SubmitError::LeaseNotFound(lease_id))?;

        if let Some(package_id) = lease.package_id {
            return Err(SubmitError::AlreadyRequested {
                lease_id,
                package_id,
            });
        }

        let document_id = match lease.document_id {
            Some(document_id) => {
                debug!("lease {lease_id} already uploaded as document {document_id}, resuming");
                document_id
            }
            None => {
                let contract = self.artifacts.rendered_contract_path(lease_id);
                let document_id = self.client.upload_document(&contract).await?;
                lease::set_document_id(&self.pool, lease_id, &document_id).await?;
                document_id
            }
        };

        if !wait_for_document_ready(&self.client, &document_id, &self.readiness).await {
            return Err(SubmitError::NotReady { document_id });
        }

        let signer_id =
            find_or_create_signer(&self.client, &lease.tenant_name, &lease.tenant_email).await?;

        let request = self.client.request_signature(&document_id, &signer_id).await?;
        lease::set_package_id(&self.pool, lease_id, &request.package_id).await?;

        info!(
            "lease {lease_id} submitted for signature: document {document_id}, package {}",
            request.package_id
        );

        Ok(request)
    }

    /// Syncs one lease with the provider's authoritative signature state.
    ///
    /// Safe to call from the poller and the webhook path concurrently,
    /// any number of times, in any order: the persisted record is checked
    /// first, and the signed transition is a conditional update that only
    /// one caller can win. Only the winner downloads the artifact.
    pub async fn reconcile(
        &self,
        lease: &LeaseAgreement,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if lease.signature_status == SignatureStatus::Signed {
            debug!("lease {} already signed, nothing to reconcile", lease.id);
            return Ok(ReconcileOutcome::AlreadySigned);
        }

        let Some(document_id) = &lease.document_id else {
            debug!("lease {} has no provider document yet", lease.id);
            return Ok(ReconcileOutcome::Unchanged);
        };

        let status = self.client.document_status(document_id).await?;
        if status != DocumentStatus::Certificated {
            debug!("lease {} document {document_id} still {status}", lease.id);
            return Ok(ReconcileOutcome::Unchanged);
        }

        if !lease::mark_signed(&self.pool, lease.id).await? {
            debug!("lease {} was signed concurrently", lease.id);
            return Ok(ReconcileOutcome::AlreadySigned);
        }

        info!("lease {} signed (document {document_id})", lease.id);

        let destination = self.artifacts.signed_contract_path(lease.id);
        if !self.client.download_certificated(document_id, &destination).await {
            warn!(
                "signed artifact for lease {} not downloaded; status stays signed",
                lease.id
            );
        }

        Ok(ReconcileOutcome::TransitionedToSigned)
    }

    /// Webhook entry point: resolves the lease owning a signature package
    /// and reconciles it. Unknown package ids are logged and ignored so a
    /// replayed or foreign event cannot fail the delivery.
    pub async fn reconcile_package(
        &self,
        package_id: &PackageId,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(lease) = lease::find_by_package_id(&self.pool, package_id).await? else {
            warn!("webhook for unknown package {package_id}, ignoring");
            return Ok(ReconcileOutcome::Unchanged);
        };

        self.reconcile(&lease).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    use super::*;
    use crate::assinafy::test_support::test_client;
    use crate::test_utils::{insert_test_lease, setup_test_db};

    fn fast_readiness() -> ReadinessConfig {
        ReadinessConfig {
            max_attempts: 3,
            interval: Duration::from_millis(10),
        }
    }

    fn coordinator_with(
        server: &MockServer,
        pool: &SqlitePool,
        dir: &tempfile::TempDir,
    ) -> SignatureCoordinator {
        SignatureCoordinator::new(
            Arc::new(test_client(server)),
            pool.clone(),
            ArtifactStore::new(dir.path()),
            fast_readiness(),
        )
    }

    fn mock_status<'a>(
        server: &'a MockServer,
        document_id: &str,
        status: &str,
    ) -> httpmock::Mock<'a> {
        let path = format!("/v1/documents/{document_id}");
        let body = json!({ "data": { "id": document_id, "status": status } });
        server.mock(move |when, then| {
            when.method(GET).path(&path);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(body.clone());
        })
    }

    #[tokio::test]
    async fn submit_runs_full_pipeline_and_persists_provider_ids() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let lease = insert_test_lease(&pool).await;
        coordinator
            .artifacts
            .save_rendered_contract(lease.id, b"%PDF-1.7 contract")
            .await
            .unwrap();

        let upload_mock = server.mock(|when, then| {
            when.method(POST).path("/v1/accounts/acct-1/documents");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "data": { "id": "doc-1" } }));
        });
        let status_mock = mock_status(&server, "doc-1", "metadata_ready");
        let search_mock = server.mock(|when, then| {
            when.method(GET).path("/v1/accounts/acct-1/signers");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "data": [] }));
        });
        let create_mock = server.mock(|when, then| {
            when.method(POST).path("/v1/accounts/acct-1/signers");
            then.status(201)
                .header("content-type", "application/json")
                .json_body(json!({
                    "data": { "id": "sig-1", "full_name": "Joana Teste", "email": "joana@example.com" }
                }));
        });
        let assignment_mock = server.mock(|when, then| {
            when.method(POST).path("/v1/documents/doc-1/assignments");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "data": { "id": "pkg-1" } }));
        });

        let request = coordinator.submit_for_signature(lease.id).await.unwrap();

        assert_eq!(request.package_id, PackageId::from("pkg-1".to_owned()));
        upload_mock.assert();
        status_mock.assert();
        search_mock.assert();
        create_mock.assert();
        assignment_mock.assert();

        let reloaded = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
        assert_eq!(reloaded.document_id, Some(DocumentId::from("doc-1".to_owned())));
        assert_eq!(reloaded.package_id, Some(PackageId::from("pkg-1".to_owned())));
        assert_eq!(reloaded.signature_status, SignatureStatus::Pending);
    }

    #[tokio::test]
    async fn submit_refuses_second_request_for_same_lease() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let lease = insert_test_lease(&pool).await;
        lease::set_package_id(&pool, lease.id, &PackageId::from("pkg-live".to_owned()))
            .await
            .unwrap();

        let result = coordinator.submit_for_signature(lease.id).await;

        assert!(matches!(
            result,
            Err(SubmitError::AlreadyRequested { package_id, .. })
                if package_id == PackageId::from("pkg-live".to_owned())
        ));
    }

    #[tokio::test]
    async fn submit_fails_not_ready_then_resumes_without_reupload() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let lease = insert_test_lease(&pool).await;
        coordinator
            .artifacts
            .save_rendered_contract(lease.id, b"%PDF-1.7 contract")
            .await
            .unwrap();

        let upload_mock = server.mock(|when, then| {
            when.method(POST).path("/v1/accounts/acct-1/documents");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "data": { "id": "doc-1" } }));
        });
        let mut unprocessed_mock = mock_status(&server, "doc-1", "unprocessed");

        let result = coordinator.submit_for_signature(lease.id).await;
        assert!(matches!(result, Err(SubmitError::NotReady { .. })));
        assert_eq!(upload_mock.hits(), 1);

        let reloaded = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
        assert_eq!(reloaded.document_id, Some(DocumentId::from("doc-1".to_owned())));

        // Provider finished processing; the retry must resume at the wait.
        unprocessed_mock.delete();
        mock_status(&server, "doc-1", "pending_signature");
        let search_mock = server.mock(|when, then| {
            when.method(GET).path("/v1/accounts/acct-1/signers");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "data": [{ "id": "sig-1", "full_name": "Joana Teste", "email": "joana@example.com" }]
                }));
        });
        let assignment_mock = server.mock(|when, then| {
            when.method(POST).path("/v1/documents/doc-1/assignments");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "data": { "id": "pkg-1" } }));
        });

        let request = coordinator.submit_for_signature(lease.id).await.unwrap();

        assert_eq!(request.package_id, PackageId::from("pkg-1".to_owned()));
        assert_eq!(upload_mock.hits(), 1);
        search_mock.assert();
        assignment_mock.assert();
    }

    #[tokio::test]
    async fn submit_fails_fast_when_contract_was_never_rendered() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let lease = insert_test_lease(&pool).await;

        let upload_mock = server.mock(|when, then| {
            when.method(POST).path("/v1/accounts/acct-1/documents");
            then.status(200);
        });

        let result = coordinator.submit_for_signature(lease.id).await;

        assert!(matches!(
            result,
            Err(SubmitError::Provider(AssinafyError::FileNotFound(_)))
        ));
        assert_eq!(upload_mock.hits(), 0);
    }

    #[tokio::test]
    async fn reconcile_transitions_and_archives_signed_contract() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let lease = insert_test_lease(&pool).await;
        lease::set_document_id(&pool, lease.id, &DocumentId::from("doc-1".to_owned()))
            .await
            .unwrap();

        let status_mock = mock_status(&server, "doc-1", "certificated");
        let download_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/documents/doc-1/download/certificated");
            then.status(200).body("%PDF-1.7 signed");
        });

        let lease = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
        let outcome = coordinator.reconcile(&lease).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::TransitionedToSigned);
        status_mock.assert();
        download_mock.assert();

        let reloaded = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
        assert_eq!(reloaded.signature_status, SignatureStatus::Signed);
        assert_eq!(
            std::fs::read(coordinator.artifacts.signed_contract_path(lease.id)).unwrap(),
            b"%PDF-1.7 signed"
        );
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_for_signed_leases() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let lease = insert_test_lease(&pool).await;
        lease::set_document_id(&pool, lease.id, &DocumentId::from("doc-1".to_owned()))
            .await
            .unwrap();

        let status_mock = mock_status(&server, "doc-1", "certificated");
        let download_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/documents/doc-1/download/certificated");
            then.status(200).body("%PDF-1.7 signed");
        });

        let pending = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
        assert_eq!(
            coordinator.reconcile(&pending).await.unwrap(),
            ReconcileOutcome::TransitionedToSigned
        );

        // Replays against the refreshed record are pure no-ops.
        for _ in 0..3 {
            let signed = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
            assert_eq!(
                coordinator.reconcile(&signed).await.unwrap(),
                ReconcileOutcome::AlreadySigned
            );
        }

        assert_eq!(status_mock.hits(), 1);
        assert_eq!(download_mock.hits(), 1);
    }

    #[tokio::test]
    async fn reconcile_with_stale_record_loses_race_without_second_download() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let lease = insert_test_lease(&pool).await;
        lease::set_document_id(&pool, lease.id, &DocumentId::from("doc-1".to_owned()))
            .await
            .unwrap();
        let stale = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();

        // The other path wins between our read and our update.
        lease::mark_signed(&pool, lease.id).await.unwrap();

        let status_mock = mock_status(&server, "doc-1", "certificated");
        let download_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/documents/doc-1/download/certificated");
            then.status(200).body("%PDF-1.7 signed");
        });

        let outcome = coordinator.reconcile(&stale).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::AlreadySigned);
        assert_eq!(status_mock.hits(), 1);
        assert_eq!(download_mock.hits(), 0);
    }

    #[tokio::test]
    async fn reconcile_leaves_uncertificated_documents_untouched() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let lease = insert_test_lease(&pool).await;
        lease::set_document_id(&pool, lease.id, &DocumentId::from("doc-1".to_owned()))
            .await
            .unwrap();

        mock_status(&server, "doc-1", "pending_signature");

        let lease = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
        let outcome = coordinator.reconcile(&lease).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        let reloaded = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
        assert_eq!(reloaded.signature_status, SignatureStatus::Pending);
    }

    #[tokio::test]
    async fn reconcile_package_ignores_unknown_package() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let outcome = coordinator
            .reconcile_package(&PackageId::from("pkg-unknown".to_owned()))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unchanged);
    }

    #[tokio::test]
    async fn reconcile_keeps_signed_status_when_download_fails() {
        let server = MockServer::start();
        let pool = setup_test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with(&server, &pool, &dir);

        let lease = insert_test_lease(&pool).await;
        lease::set_document_id(&pool, lease.id, &DocumentId::from("doc-1".to_owned()))
            .await
            .unwrap();

        mock_status(&server, "doc-1", "certificated");
        server.mock(|when, then| {
            when.method(GET)
                .path("/v1/documents/doc-1/download/certificated");
            then.status(404).body("not there yet");
        });

        let lease = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
        let outcome = coordinator.reconcile(&lease).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::TransitionedToSigned);
        let reloaded = lease::find_by_id(&pool, lease.id).await.unwrap().unwrap();
        assert_eq!(reloaded.signature_status, SignatureStatus::Signed);
        assert!(!coordinator.artifacts.signed_contract_path(lease.id).exists());
    }
}
