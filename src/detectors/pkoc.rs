//! PSIA PKOC probe.
//!
//! SELECT must return the protocol version (tag 5C). The public key comes
//! from an identification-only AUTHENTICATE.

use super::{exchange, Detection};
use crate::core::commands::apdus::{self, PKOC_AID};
use crate::core::config::PkocConfig;
use crate::core::details::{PkocDetails, TechnologyDetails};
use crate::core::reader::CardConnection;
use crate::core::utils::{find_tlv, format_hex};
use anyhow::Result;

const TAG_TRANSACTION_ID: u8 = 0x4C;
const TAG_READER_ID: u8 = 0x4D;
const TAG_PUBLIC_KEY: u8 = 0x5A;
const TAG_PROTOCOL_VERSION: u8 = 0x5C;

const PROTOCOL_VERSION_LEN: usize = 2;
const READER_ID_LEN: usize = 32;
const PUBLIC_KEY_LEN: usize = 65;

/// Identifies PKOC credentials. Runs AUTHENTICATE in identification-only
/// mode: the reader identifier is all zeros and the signature is not checked.
#[derive(Debug, Clone, Default)]
pub struct PkocDetector {
    config: PkocConfig,
}

impl PkocDetector {
    pub fn new(config: PkocConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, connection: &dyn CardConnection) -> Result<Detection> {
        log::debug!("[PKOC] Selecting PKOC application");
        let response = exchange(connection, &apdus::select(PKOC_AID)?)?;
        if !response.is_success() {
            log::debug!("[PKOC] SELECT rejected: {}", response.describe());
            return Ok(Detection::not_detected());
        }

        let Some(version) = find_tlv(&response.data, TAG_PROTOCOL_VERSION) else {
            log::debug!("[PKOC] No protocol version in SELECT response");
            return Ok(Detection::not_detected());
        };
        if version.len() != PROTOCOL_VERSION_LEN {
            log::debug!(
                "[PKOC] Protocol version has {} bytes, expected {PROTOCOL_VERSION_LEN}",
                version.len()
            );
            return Ok(Detection::not_detected());
        }
        let version = version.to_vec();

        let mut details = PkocDetails {
            protocol_version: Some(format_hex(&version)),
            public_key_hex: None,
        };

        if self.config.request_public_key {
            match read_public_key(connection, &version) {
                Ok(Some(key)) => details.public_key_hex = Some(format_hex(&key)),
                Ok(None) => log::debug!("[PKOC] No public key in AUTHENTICATE response"),
                Err(e) => log::debug!("[PKOC] AUTHENTICATE failed: {e:#}"),
            }
        }

        let summary = format!("PKOC credential detected (protocol {})", format_hex(&version));
        log::info!("[PKOC] {summary}");
        Ok(Detection::found(summary, TechnologyDetails::Pkoc(details)))
    }
}

/// AUTHENTICATE payload: transaction ID, protocol version, reader ID
fn authenticate_data(transaction_id: &[u8; 16], version: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + transaction_id.len() + version.len() + READER_ID_LEN + 2);

    data.extend([TAG_TRANSACTION_ID, transaction_id.len() as u8]);
    data.extend_from_slice(transaction_id);
    data.extend([TAG_PROTOCOL_VERSION, version.len() as u8]);
    data.extend_from_slice(version);
    data.extend([TAG_READER_ID, READER_ID_LEN as u8]);
    data.extend([0u8; READER_ID_LEN]);

    data
}

fn read_public_key(connection: &dyn CardConnection, version: &[u8]) -> Result<Option<Vec<u8>>> {
    let transaction_id: [u8; 16] = rand::random();
    let command = apdus::pkoc_authenticate(authenticate_data(&transaction_id, version))?;

    let response = exchange(connection, &command)?;
    if !response.is_success() {
        log::debug!("[PKOC] AUTHENTICATE rejected: {}", response.describe());
        return Ok(None);
    }

    Ok(find_tlv(&response.data, TAG_PUBLIC_KEY)
        .filter(|key| key.len() == PUBLIC_KEY_LEN && key[0] == 0x04)
        .map(<[u8]>::to_vec))
}
