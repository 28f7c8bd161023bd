use serde::Deserialize;
use tracing::{debug, info};

use super::client::{AssinafyClient, AssinafyError, SignerId};

/// A natural person registered with the provider account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Signer {
    pub id: SignerId,
    pub full_name: String,
    pub email: String,
}

/// Resolves a signer id for the given identity, registering the signer
/// with the provider when no existing one matches.
///
/// Matching is an exact, case-insensitive comparison on email over the
/// provider's search results. Find-then-create is not transactional: two
/// concurrent callers can both miss and both create. The provider is the
/// source of truth and a duplicate signer is tolerated.
pub async fn find_or_create_signer(
    client: &AssinafyClient,
    full_name: &str,
    email: &str,
) -> Result<SignerId, AssinafyError> {
    let needle = email.to_lowercase();
    let existing = client
        .search_signers(email)
        .await?
        .into_iter()
        .find(|signer| signer.email.to_lowercase() == needle);

    if let Some(signer) = existing {
        debug!("signer {} already registered for {email}", signer.id);
        return Ok(signer.id);
    }

    let created = client.create_signer(full_name, email).await?;
    info!("registered signer {} for {email}", created.id);
    Ok(created.id)
}
