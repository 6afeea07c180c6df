//! PIV (FIPS 201) application probe and CHUID / FASC-N decoding.

use super::{exchange, Detection};
use crate::core::commands::apdus::{self, PIV_AID};
use crate::core::config::PivConfig;
use crate::core::details::{PivDetails, TechnologyDetails};
use crate::core::reader::CardConnection;
use crate::core::utils::{format_hex, read_ber_length};
use anyhow::{bail, Result};

/// Tag list naming the CHUID object 5FC102
const CHUID_TAG_LIST: &[u8] = &[0x5C, 0x03, 0x5F, 0xC1, 0x02];

const FASCN_TAG: u8 = 0x30;
const FASCN_LEN: usize = 25;
const FASCN_SYMBOLS: usize = 40;
const MAX_GET_RESPONSE_ROUNDS: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct PivDetector {
    config: PivConfig,
}

impl PivDetector {
    pub fn new(config: PivConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, connection: &dyn CardConnection) -> Result<Detection> {
        log::debug!("[PIV] Selecting PIV application");
        let response = exchange(connection, &apdus::select(PIV_AID)?)?;

        let status = if response.is_success() {
            "PIV application found"
        } else if response.has_more_data() {
            "PIV application found (more data available)"
        } else {
            log::debug!("[PIV] SELECT rejected: {}", response.describe());
            return Ok(Detection::not_detected());
        };

        let mut details = PivDetails::new(status);
        if self.config.read_chuid {
            if let Some(chuid) = read_chuid(connection) {
                if let Some(fascn) = extract_fascn(&chuid) {
                    details.fascn = decode_fascn(fascn);
                    details.fascn_raw = Some(format_hex(&fascn[..FASCN_LEN]));
                }
                details.chuid = Some(format_hex(&chuid));
            }
        }

        log::info!("[PIV] {status}");
        Ok(Detection::found(status, TechnologyDetails::Piv(details)))
    }
}

/// Read the CHUID object. The full GET DATA form is tried first, then the
/// same request without Le for readers that reject case 4 commands.
fn read_chuid(connection: &dyn CardConnection) -> Option<Vec<u8>> {
    let with_le = match apdus::piv_get_data(CHUID_TAG_LIST) {
        Ok(command) => command,
        Err(e) => {
            log::debug!("[PIV] GET DATA not built: {e:#}");
            return None;
        }
    };
    let without_le = with_le[..with_le.len() - 1].to_vec();

    for command in [with_le, without_le] {
        match get_data(connection, &command) {
            Ok(chuid) if !chuid.is_empty() => return Some(chuid),
            Ok(_) => log::debug!("[PIV] GET DATA returned no CHUID"),
            Err(e) => log::debug!("[PIV] GET DATA failed: {e:#}"),
        }
    }
    None
}

/// Send GET DATA and drain 61xx continuations with GET RESPONSE
fn get_data(connection: &dyn CardConnection, command: &[u8]) -> Result<Vec<u8>> {
    let mut response = exchange(connection, command)?;
    let mut data = std::mem::take(&mut response.data);

    let mut rounds = 0;
    while response.has_more_data() && rounds < MAX_GET_RESPONSE_ROUNDS {
        response = exchange(connection, &apdus::get_response(response.sw2))?;
        data.append(&mut response.data);
        rounds += 1;
    }

    if !response.is_success() {
        bail!(
            "GET DATA ended with {} ({})",
            response.status_string(),
            response.describe()
        );
    }
    Ok(data)
}

/// Locate the FASC-N (tag 0x30, at least 25 bytes) inside a CHUID TLV.
///
/// The outer tag is a single byte followed by a BER length; the elements
/// inside it are single-byte tags with BER lengths.
pub fn extract_fascn(chuid: &[u8]) -> Option<&[u8]> {
    let (outer_len, consumed) = read_ber_length(chuid, 1).ok()?;
    let start = 1 + consumed;
    let end = start.checked_add(outer_len)?.min(chuid.len());

    let mut index = start;
    while index < end {
        let tag = chuid[index];
        let (len, consumed) = read_ber_length(chuid, index + 1).ok()?;
        let value_start = index + 1 + consumed;
        let value = chuid.get(value_start..value_start.checked_add(len)?)?;

        if tag == FASCN_TAG && len >= FASCN_LEN {
            return Some(value);
        }
        index = value_start + len;
    }
    None
}

/// Decode a 200-bit FASC-N into its 40-character form.
///
/// Each 5-bit symbol carries a 4-bit value (MSB first) followed by a parity
/// bit, which is ignored. Returns `None` when fewer than 25 bytes are given.
pub fn decode_fascn(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.get(..FASCN_LEN)?;
    let bit = |index: usize| (bytes[index / 8] >> (7 - index % 8)) & 1;

    let decoded = (0..FASCN_SYMBOLS)
        .map(|symbol| {
            let value = (0..4).fold(0u8, |acc, offset| (acc << 1) | bit(symbol * 5 + offset));
            fascn_char(value)
        })
        .collect();
    Some(decoded)
}

fn fascn_char(value: u8) -> char {
    match value {
        0..=9 => char::from(b'0' + value),
        10 => 'S',
        11 | 13 => 'F',
        15 => 'E',
        _ => '?',
    }
}
