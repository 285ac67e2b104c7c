//! First contact with a charger whose address was just entered.

use crate::{ClientConfig, ClientError, DataLink, EnoOneClient, ErrorKind};
use enomod_core::registers::{ApiVersion, Diagnostics, TransactionToken};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub api_version: ApiVersion,
    pub diagnostics: Diagnostics,
}

impl ProbeReport {
    /// Stable identifier of the charger: its serial number.
    pub fn unique_id(&self) -> &str {
        &self.diagnostics.serial_nr
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot reach charger: {0}")]
    Connection(#[source] ClientError),
    #[error("unsupported api version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("EMS control is not enabled on the charger")]
    EmsControlDisabled,
    #[error("unexpected error: {0}")]
    Unexpected(#[source] ClientError),
}

impl From<ClientError> for ProbeError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::UnsupportedApiVersion { major, minor } => {
                Self::UnsupportedVersion { major, minor }
            }
            err if err.kind() == ErrorKind::Unavailable => Self::Connection(err),
            err => Self::Unexpected(err),
        }
    }
}

/// Validate that `host:port` is a supported ENO one charger, using the
/// first-contact retry profile on unit 1.
pub async fn probe(host: &str, port: u16, ems_control: bool) -> Result<ProbeReport, ProbeError> {
    let client = EnoOneClient::new(host, port, 1, ClientConfig::first_contact());
    let report = probe_client(&client, ems_control).await;
    client.close().await;
    report
}

/// [`probe`] over an existing client.
pub async fn probe_client<D: DataLink>(
    client: &EnoOneClient<D>,
    ems_control: bool,
) -> Result<ProbeReport, ProbeError> {
    let api_version = client.check_version().await?;
    let diagnostics = client.fetch::<Diagnostics>().await?;

    if ems_control {
        if let Err(err) = client.fetch::<TransactionToken>().await {
            debug!(error = %err, "transaction token unreadable");
            return Err(ProbeError::EmsControlDisabled);
        }
    }

    info!(
        serial = %diagnostics.serial_nr,
        model = %diagnostics.model_id,
        firmware = %diagnostics.firmware_version,
        api_major = api_version.major,
        api_minor = api_version.minor,
        "charger identified"
    );
    Ok(ProbeReport {
        api_version,
        diagnostics,
    })
}
