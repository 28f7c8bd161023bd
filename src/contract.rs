//! Contract-generation glue: assembles render data from a lease and hands
//! the resulting PDF to the artifact store.
//!
//! PDF rendering itself is a collaborator concern; the host application
//! plugs a template engine in behind [`ContractRenderer`].

use chrono::{DateTime, Utc};

use crate::artifact::ArtifactStore;
use crate::lease::LeaseAgreement;

const CPF_DIGITS: usize = 11;
const CNPJ_DIGITS: usize = 14;

/// Renders a lease contract to PDF bytes from pre-formatted data.
pub trait ContractRenderer {
    type Error: std::error::Error + Send + Sync + 'static;

    fn render(&self, contract: &ContractData) -> Result<Vec<u8>, Self::Error>;
}

/// Data bundle handed to the renderer, with tenant identifiers already
/// formatted for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractData {
    pub lease_id: i64,
    pub tenant_name: String,
    pub tenant_email: String,
    pub tenant_registration: String,
    pub tenant_phone_1: Option<String>,
    pub tenant_phone_2: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl ContractData {
    pub fn from_lease(lease: &LeaseAgreement, issued_at: DateTime<Utc>) -> Self {
        Self {
            lease_id: lease.id,
            tenant_name: lease.tenant_name.clone(),
            tenant_email: lease.tenant_email.clone(),
            tenant_registration: format_registration(&lease.tenant_registration),
            tenant_phone_1: lease.tenant_phone_1.clone(),
            tenant_phone_2: lease.tenant_phone_2.clone(),
            issued_at,
        }
    }
}

/// Formats a raw CPF/CNPJ for display: 11 digits become
/// `xxx.xxx.xxx-xx`, 14 digits `xx.xxx.xxx/xxxx-xx`. Anything else is
/// returned digits-only, unformatted.
pub fn format_registration(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    match digits.len() {
        CPF_DIGITS => format!(
            "{}.{}.{}-{}",
            &digits[0..3],
            &digits[3..6],
            &digits[6..9],
            &digits[9..11]
        ),
        CNPJ_DIGITS => format!(
            "{}.{}.{}/{}-{}",
            &digits[0..2],
            &digits[2..5],
            &digits[5..8],
            &digits[8..12],
            &digits[12..14]
        ),
        _ => digits,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("failed to render contract: {0}")]
    Render(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Renders the lease contract and persists it to
/// `{storage_root}/contratos/{lease_id}.pdf`, the file later uploaded by
/// the signature coordinator.
pub async fn generate_contract<R: ContractRenderer>(
    renderer: &R,
    store: &ArtifactStore,
    lease: &LeaseAgreement,
) -> Result<std::path::PathBuf, ContractError> {
    let data = ContractData::from_lease(lease, Utc::now());
    let bytes = renderer
        .render(&data)
        .map_err(|e| ContractError::Render(Box::new(e)))?;

    Ok(store.save_rendered_contract(lease.id, &bytes).await?)
}
