use crate::core::utils::{describe_status_word, format_hex_spaced};
use anyhow::{anyhow, bail, Result};

/// Card response split into data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ApduResponse {
    /// Split a raw response (data followed by SW1 SW2)
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < 2 {
            bail!(
                "Response too short for a status word: [{}]",
                format_hex_spaced(raw)
            );
        }

        let len = raw.len();
        Ok(Self {
            data: raw[..len - 2].to_vec(),
            sw1: raw[len - 2],
            sw2: raw[len - 1],
        })
    }

    /// SW = 9000
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// SW = 61xx
    pub fn has_more_data(&self) -> bool {
        self.sw1 == 0x61
    }

    /// SW1 = 91, the card answered a native DESFire command
    pub fn is_desfire_native(&self) -> bool {
        self.sw1 == 0x91
    }

    pub fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Status word as hex string (e.g. "9000")
    pub fn status_string(&self) -> String {
        format!("{:02X}{:02X}", self.sw1, self.sw2)
    }

    pub fn describe(&self) -> String {
        describe_status_word(self.sw1, self.sw2)
    }
}

/// Short APDU command builder
#[derive(Debug, Clone)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    lc: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            lc: 0,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data. Lc is derived from its length, which must fit a
    /// short APDU.
    pub fn data(mut self, data: Vec<u8>) -> Result<Self> {
        self.lc = u8::try_from(data.len()).map_err(|_| {
            anyhow!(
                "Command data too long for a short APDU: {} bytes",
                data.len()
            )
        })?;
        self.data = data;
        Ok(self)
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            apdu.push(self.lc);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        apdu
    }
}

/// Command constructors used by the detectors
pub mod apdus {
    use super::ApduCommand;
    use anyhow::Result;

    /// PIV card application AID
    pub const PIV_AID: &[u8] = &[
        0xA0, 0x00, 0x00, 0x03, 0x08, 0x00, 0x00, 0x10, 0x00, 0x01, 0x00,
    ];

    /// PSIA PKOC application AID
    pub const PKOC_AID: &[u8] = &[0xA0, 0x00, 0x00, 0x08, 0x98, 0x00, 0x00, 0x01];

    /// ISO 7816-4 SELECT by DF name: 00 A4 04 00 Lc AID 00
    pub fn select(aid: &[u8]) -> Result<Vec<u8>> {
        Ok(ApduCommand::new(0x00, 0xA4, 0x04, 0x00)
            .data(aid.to_vec())?
            .le(0x00)
            .build())
    }

    /// PC/SC pseudo-APDU returning the contactless UID
    pub fn get_uid() -> Vec<u8> {
        ApduCommand::new(0xFF, 0xCA, 0x00, 0x00).le(0x00).build()
    }

    /// PIV GET DATA with a tag list (5C ...) in the data field
    pub fn piv_get_data(tag_list: &[u8]) -> Result<Vec<u8>> {
        Ok(ApduCommand::new(0x00, 0xCB, 0x3F, 0xFF)
            .data(tag_list.to_vec())?
            .le(0x00)
            .build())
    }

    pub fn get_response(length: u8) -> Vec<u8> {
        ApduCommand::new(0x00, 0xC0, 0x00, 0x00).le(length).build()
    }

    /// DESFire GetVersion wrapped for PC/SC: 90 60 00 00 00
    pub fn desfire_get_version_native() -> Vec<u8> {
        ApduCommand::new(0x90, 0x60, 0x00, 0x00).le(0x00).build()
    }

    /// DESFire GetVersion with an ISO class byte: 00 60 00 00 00
    pub fn desfire_get_version_iso() -> Vec<u8> {
        ApduCommand::new(0x00, 0x60, 0x00, 0x00).le(0x00).build()
    }

    /// Unwrapped DESFire GetVersion
    pub fn desfire_get_version_raw() -> Vec<u8> {
        vec![0x60]
    }

    pub fn desfire_additional_frame_native() -> Vec<u8> {
        ApduCommand::new(0x90, 0xAF, 0x00, 0x00).le(0x00).build()
    }

    pub fn desfire_additional_frame_iso() -> Vec<u8> {
        ApduCommand::new(0x00, 0xAF, 0x00, 0x00).le(0x00).build()
    }

    pub fn desfire_additional_frame_raw() -> Vec<u8> {
        vec![0xAF]
    }

    /// DESFire GetApplicationIDs wrapped for PC/SC: 90 6A 00 00 00
    pub fn desfire_get_application_ids() -> Vec<u8> {
        ApduCommand::new(0x90, 0x6A, 0x00, 0x00).le(0x00).build()
    }

    /// PKOC AUTHENTICATE: 80 80 00 01 Lc data 00
    pub fn pkoc_authenticate(data: Vec<u8>) -> Result<Vec<u8>> {
        Ok(ApduCommand::new(0x80, 0x80, 0x00, 0x01)
            .data(data)?
            .le(0x00)
            .build())
    }
}
