//! Assinafy e-signature provider API client.
//!
//! Covers the slice of the provider REST API this service needs: document
//! upload, processing-status reads, signer registration and search,
//! signature-request dispatch, and certificated-PDF download.
//!
//! # Document lifecycle
//!
//! Uploaded documents are processed asynchronously by the provider and
//! become assignable once they reach `uploaded`, `metadata_ready` or
//! `pending_signature`. After the signer completes the virtual flow the
//! document lands in the terminal `certificated` status, at which point
//! the signed artifact is downloadable.

mod client;
mod signer;
mod status;

pub use client::{
    AssinafyClient, AssinafyError, DocumentId, PackageId, SignatureRequest, SignerId,
};
pub use signer::{Signer, find_or_create_signer};
pub use status::{DocumentStatus, ReadinessConfig, wait_for_document_ready};
