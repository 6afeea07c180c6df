//! MIFARE DESFire probe.
//!
//! Tries ISO SELECT of the DESFire DF names first, then GetVersion in native,
//! ISO and raw framing. Any SW1 = 0x91 reply proves a DESFire card, even when
//! SW2 reports an error.

use super::{exchange, Detection};
use crate::core::commands::{apdus, ApduResponse};
use crate::core::config::DesfireConfig;
use crate::core::details::{DesfireDetails, TechnologyDetails};
use crate::core::reader::CardConnection;
use crate::core::utils::{desfire_status_name, format_hex, parse_hex};
use anyhow::Result;

const STATUS_OK: u8 = 0x00;
const STATUS_ADDITIONAL_FRAME: u8 = 0xAF;

/// Frame 1 of GetVersion: 7 bytes of hardware info plus SW1 SW2
const HARDWARE_FRAME_MIN_DATA: usize = 7;
/// ISO 7816-4 limit on DF names
const MAX_AID_LEN: usize = 16;
/// Frames read after the first one
const MAX_ADDITIONAL_FRAMES: usize = 2;

/// How a DESFire native command is carried to the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// ISO 7816-4 wrapped with CLA 0x90
    Native,
    /// CLA 0x00
    Iso,
    /// Bare command byte
    Raw,
}

impl Framing {
    fn get_version(self) -> Vec<u8> {
        match self {
            Framing::Native => apdus::desfire_get_version_native(),
            Framing::Iso => apdus::desfire_get_version_iso(),
            Framing::Raw => apdus::desfire_get_version_raw(),
        }
    }

    fn additional_frame(self) -> Vec<u8> {
        match self {
            Framing::Native => apdus::desfire_additional_frame_native(),
            Framing::Iso => apdus::desfire_additional_frame_iso(),
            Framing::Raw => apdus::desfire_additional_frame_raw(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DesfireDetector {
    config: DesfireConfig,
    select_aids: Vec<Vec<u8>>,
}

impl Default for DesfireDetector {
    fn default() -> Self {
        Self::new(DesfireConfig::default())
    }
}

impl DesfireDetector {
    pub fn new(config: DesfireConfig) -> Self {
        let select_aids = config
            .select_aids
            .iter()
            .filter_map(|aid| match parse_hex(aid) {
                Ok(bytes) if bytes.len() > MAX_AID_LEN => {
                    log::warn!("[DESFire] Ignoring SELECT AID '{aid}': longer than {MAX_AID_LEN} bytes");
                    None
                }
                Ok(bytes) if !bytes.is_empty() => Some(bytes),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("[DESFire] Ignoring invalid SELECT AID '{aid}': {e:#}");
                    None
                }
            })
            .collect();

        Self {
            config,
            select_aids,
        }
    }

    pub fn detect(&self, connection: &dyn CardConnection) -> Result<Detection> {
        for aid in &self.select_aids {
            log::debug!("[DESFire] SELECT {}", format_hex(aid));
            let selected = apdus::select(aid).and_then(|command| exchange(connection, &command));
            let response = match selected {
                Ok(response) => response,
                Err(e) => {
                    log::debug!("[DESFire] SELECT failed: {e:#}");
                    continue;
                }
            };

            if response.is_success()
                || response.has_more_data()
                || (response.is_desfire_native() && response.sw2 == STATUS_OK)
            {
                return Ok(match self.read_version(connection, Framing::Native) {
                    Ok(Some(detection)) => detection,
                    Ok(None) => selected_only(),
                    Err(e) => {
                        log::debug!("[DESFire] GetVersion after SELECT failed: {e:#}");
                        selected_only()
                    }
                });
            }
        }

        for framing in [Framing::Native, Framing::Iso, Framing::Raw] {
            match self.read_version(connection, framing) {
                Ok(Some(detection)) => return Ok(detection),
                Ok(None) => {}
                Err(e) => log::debug!("[DESFire] {framing:?} GetVersion failed: {e:#}"),
            }
        }

        Ok(Detection::not_detected())
    }

    /// Run GetVersion with one framing. `None` when the card did not answer
    /// as a DESFire card.
    fn read_version(
        &self,
        connection: &dyn CardConnection,
        framing: Framing,
    ) -> Result<Option<Detection>> {
        let response = exchange(connection, &framing.get_version())?;
        if !response.is_desfire_native() {
            log::debug!("[DESFire] {framing:?} GetVersion: {}", response.describe());
            return Ok(None);
        }

        let detection = match response.sw2 {
            STATUS_ADDITIONAL_FRAME if response.data.len() >= HARDWARE_FRAME_MIN_DATA => {
                let mut details = self.parse_hardware_frame(&response.data);
                drain_frames(connection, framing, &mut details);
                if framing == Framing::Native {
                    details.applications = read_application_ids(connection);
                }

                let storage = details.storage_size.as_deref().unwrap_or("Unknown");
                let summary = format!("{}, {storage} storage", details.card_type);
                Detection::found(summary, TechnologyDetails::Desfire(details))
            }
            STATUS_OK | STATUS_ADDITIONAL_FRAME => {
                let mut details = DesfireDetails::default();
                if response.sw2 == STATUS_ADDITIONAL_FRAME {
                    drain_frames(connection, framing, &mut details);
                }
                Detection::found("DESFire card detected", TechnologyDetails::Desfire(details))
            }
            status => Detection::found(
                format!(
                    "DESFire card detected (GetVersion: {})",
                    desfire_status_name(status)
                ),
                TechnologyDetails::Desfire(DesfireDetails::default()),
            ),
        };

        if let Some(summary) = &detection.summary {
            log::info!("[DESFire] {summary}");
        }
        Ok(Some(detection))
    }

    /// vendor, type, subtype, major, minor, storage, protocol
    fn parse_hardware_frame(&self, frame: &[u8]) -> DesfireDetails {
        let major = frame[3];
        let minor = frame[4];

        DesfireDetails {
            card_type: self.card_type(major),
            hardware_version: Some(format!("{major}.{minor}")),
            software_version: None,
            storage_size: Some(storage_label(frame[5]).to_string()),
            applications: Vec::new(),
        }
    }

    fn card_type(&self, major: u8) -> String {
        if major == self.config.ev3_major_version {
            "DESFire EV3".to_string()
        } else if major == self.config.ev2_major_version {
            "DESFire EV2".to_string()
        } else {
            match major {
                0x00 => "DESFire".to_string(),
                0x01 => "DESFire EV1".to_string(),
                other => format!("DESFire (v{other})"),
            }
        }
    }
}

fn selected_only() -> Detection {
    Detection::found(
        "DESFire detected via SELECT",
        TechnologyDetails::Desfire(DesfireDetails::default()),
    )
}

fn storage_label(code: u8) -> &'static str {
    match code {
        0x16 => "2KB",
        0x18 => "4KB",
        0x1A => "8KB",
        0x1C => "16KB",
        0x1E => "32KB",
        _ => "Unknown",
    }
}

/// Read the remaining GetVersion frames so the card leaves the command
/// chain. Frame 2 carries the software version.
fn drain_frames(connection: &dyn CardConnection, framing: Framing, details: &mut DesfireDetails) {
    for frame in 2..2 + MAX_ADDITIONAL_FRAMES {
        let response = match exchange(connection, &framing.additional_frame()) {
            Ok(response) if response.is_desfire_native() => response,
            Ok(response) => {
                log::debug!("[DESFire] Frame {frame}: {}", response.describe());
                return;
            }
            Err(e) => {
                log::debug!("[DESFire] Frame {frame} failed: {e:#}");
                return;
            }
        };

        if frame == 2 && response.data.len() >= 5 {
            details.software_version = Some(format!("{}.{}", response.data[3], response.data[4]));
        }
        if response.sw2 != STATUS_ADDITIONAL_FRAME {
            return;
        }
    }
}

/// Native GetApplicationIDs with one continuation frame. AIDs come back
/// least significant byte first.
fn read_application_ids(connection: &dyn CardConnection) -> Vec<String> {
    let mut data = Vec::new();

    let mut response = match exchange(connection, &apdus::desfire_get_application_ids()) {
        Ok(response) => response,
        Err(e) => {
            log::debug!("[DESFire] GetApplicationIDs failed: {e:#}");
            return Vec::new();
        }
    };
    if accept_aid_frame(&mut response, &mut data) {
        match exchange(connection, &apdus::desfire_additional_frame_native()) {
            Ok(mut next) => {
                accept_aid_frame(&mut next, &mut data);
            }
            Err(e) => log::debug!("[DESFire] GetApplicationIDs continuation failed: {e:#}"),
        }
    }

    data.chunks_exact(3)
        .map(|aid| {
            let big_endian: Vec<u8> = aid.iter().rev().copied().collect();
            format_hex(&big_endian)
        })
        .collect()
}

/// Append a GetApplicationIDs frame; true when another frame follows
fn accept_aid_frame(response: &mut ApduResponse, data: &mut Vec<u8>) -> bool {
    if !response.is_desfire_native() {
        return false;
    }
    match response.sw2 {
        STATUS_OK => {
            data.append(&mut response.data);
            false
        }
        STATUS_ADDITIONAL_FRAME => {
            data.append(&mut response.data);
            true
        }
        status => {
            log::debug!(
                "[DESFire] GetApplicationIDs: {}",
                desfire_status_name(status)
            );
            false
        }
    }
}
