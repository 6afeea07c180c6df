//! Per-technology detail records.
//!
//! Records only store what was read from the card. Everything else (FASC-N
//! sub-fields, PKOC credential views, Wiegand renderings) is derived on read
//! so it can never disagree with its source.

use crate::core::commands::apdus;
use crate::core::technology::CardTechnology;
use crate::core::utils::{
    bits_grouped, bytes_to_bits, format_hex, hex_to_dashed, lower_bits, lower_bits_string,
    parse_hex,
};
use serde::Serialize;
use std::borrow::Cow;

/// Ordered (label, value) pairs of the non-null fields of a record
pub type Fields = Vec<(Cow<'static, str>, String)>;

fn field(label: impl Into<Cow<'static, str>>, value: String) -> (Cow<'static, str>, String) {
    (label.into(), value)
}

fn push_opt(fields: &mut Fields, label: impl Into<Cow<'static, str>>, value: Option<String>) {
    if let Some(value) = value {
        fields.push(field(label, value));
    }
}

/// Details common to every scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneralDetails {
    pub reader_name: Option<String>,
    pub protocol: Option<String>,
    pub atr: Option<String>,
    pub uid: Option<String>,
    pub csn: Option<String>,
    pub card_type_summary: String,
}

impl GeneralDetails {
    pub fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        push_opt(&mut fields, "Reader", self.reader_name.clone());
        push_opt(&mut fields, "Protocol", self.protocol.clone());
        push_opt(&mut fields, "ATR", self.atr.clone());
        push_opt(&mut fields, "UID", self.uid.clone());
        push_opt(&mut fields, "CSN", self.csn.clone());
        fields.push(field("Card Type", self.card_type_summary.clone()));
        fields
    }
}

/// PIV application details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PivDetails {
    pub status: String,
    /// Raw CHUID TLV, unspaced hex
    pub chuid: Option<String>,
    /// Decoded 40-character FASC-N
    pub fascn: Option<String>,
    /// Raw 25-byte FASC-N, unspaced hex
    pub fascn_raw: Option<String>,
}

impl PivDetails {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            chuid: None,
            fascn: None,
            fascn_raw: None,
        }
    }

    fn fascn_field(&self, start: usize, len: usize) -> Option<String> {
        let slice = self.fascn.as_deref()?.get(start..start + len)?;
        if slice.contains('?') {
            None
        } else {
            Some(slice.to_string())
        }
    }

    pub fn agency_code(&self) -> Option<String> {
        self.fascn_field(1, 4)
    }

    pub fn system_code(&self) -> Option<String> {
        self.fascn_field(6, 4)
    }

    pub fn credential_number(&self) -> Option<String> {
        self.fascn_field(11, 6)
    }

    pub fn credential_series(&self) -> Option<String> {
        self.fascn_field(18, 1)
    }

    pub fn individual_credential_issue(&self) -> Option<String> {
        self.fascn_field(20, 1)
    }

    pub fn person_identifier(&self) -> Option<String> {
        self.fascn_field(22, 10)
    }

    pub fn organizational_category(&self) -> Option<String> {
        self.fascn_field(32, 1)
    }

    pub fn organizational_identifier(&self) -> Option<String> {
        self.fascn_field(33, 4)
    }

    pub fn person_org_association(&self) -> Option<String> {
        self.fascn_field(37, 1)
    }

    /// Raw FASC-N bytes as bits, one space-separated group per byte
    pub fn fascn_wiegand_bits(&self) -> Option<String> {
        let bytes = parse_hex(self.fascn_raw.as_deref()?).ok()?;
        if bytes.is_empty() {
            return None;
        }
        Some(bits_grouped(&bytes))
    }

    pub fn fields(&self) -> Fields {
        let mut fields = vec![field("Status", self.status.clone())];
        push_opt(&mut fields, "CHUID", self.chuid.clone());
        push_opt(&mut fields, "FASC-N", self.fascn.clone());
        push_opt(&mut fields, "Agency Code", self.agency_code());
        push_opt(&mut fields, "System Code", self.system_code());
        push_opt(&mut fields, "Credential Number", self.credential_number());
        push_opt(&mut fields, "Credential Series", self.credential_series());
        push_opt(&mut fields, "Credential Issue", self.individual_credential_issue());
        push_opt(&mut fields, "Person Identifier", self.person_identifier());
        push_opt(&mut fields, "Org Category", self.organizational_category());
        push_opt(&mut fields, "Org Identifier", self.organizational_identifier());
        push_opt(&mut fields, "Person/Org Assoc.", self.person_org_association());
        push_opt(&mut fields, "Wiegand Bits", self.fascn_wiegand_bits());
        fields
    }
}

/// MIFARE DESFire details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesfireDetails {
    pub card_type: String,
    pub hardware_version: Option<String>,
    pub software_version: Option<String>,
    pub storage_size: Option<String>,
    pub applications: Vec<String>,
}

impl Default for DesfireDetails {
    fn default() -> Self {
        Self {
            card_type: "DESFire".to_string(),
            hardware_version: None,
            software_version: None,
            storage_size: None,
            applications: Vec::new(),
        }
    }
}

impl DesfireDetails {
    pub fn fields(&self) -> Fields {
        let mut fields = vec![field("Card Type", self.card_type.clone())];
        push_opt(&mut fields, "Hardware Version", self.hardware_version.clone());
        push_opt(&mut fields, "Software Version", self.software_version.clone());
        push_opt(&mut fields, "Storage Size", self.storage_size.clone());
        if !self.applications.is_empty() {
            fields.push(field("Applications", self.applications.join(", ")));
        }
        fields
    }
}

/// Generic ISO 14443 details, all derived from the UID
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Iso14443Details {
    /// UID, unspaced hex
    pub uid: String,
    /// UID with byte order reversed, unspaced hex
    pub csn: String,
    pub manufacturer: String,
    pub card_type: String,
    pub uid_length: String,
}

impl Iso14443Details {
    pub fn from_uid(uid: &[u8]) -> Self {
        let reversed: Vec<u8> = uid.iter().rev().copied().collect();
        let manufacturer = manufacturer_name(uid.first().copied());
        let size_label = format!("{}-byte UID", uid.len());

        let card_type = match manufacturer {
            Some(name) => format!("ISO14443 ({name}, {size_label})"),
            None => format!("ISO14443 ({size_label})"),
        };

        let uid_length = match uid.len() {
            4 => "4 bytes (single size)".to_string(),
            7 => "7 bytes (double size)".to_string(),
            10 => "10 bytes (triple size)".to_string(),
            n => format!("{n} bytes"),
        };

        Self {
            uid: format_hex(uid),
            csn: format_hex(&reversed),
            manufacturer: manufacturer.unwrap_or("Unknown").to_string(),
            card_type,
            uid_length,
        }
    }

    pub fn bit_count(&self) -> usize {
        self.uid.len() / 2 * 8
    }

    pub fn wiegand_bits_label(&self) -> String {
        format!("Wiegand Bits ({})", self.bit_count())
    }

    /// UID as dashed byte pairs
    pub fn uid_bytes(&self) -> String {
        hex_to_dashed(&self.uid)
    }

    /// CSN as a binary string
    pub fn csn_wiegand_bits(&self) -> Option<String> {
        parse_hex(&self.csn).ok().map(|bytes| bytes_to_bits(&bytes))
    }

    pub fn fields(&self) -> Fields {
        let mut fields = vec![
            field("UID", self.uid.clone()),
            field("UID Bytes", self.uid_bytes()),
            field("UID Length", self.uid_length.clone()),
            field("CSN", self.csn.clone()),
            field("Manufacturer", self.manufacturer.clone()),
            field("Card Type", self.card_type.clone()),
        ];
        push_opt(&mut fields, self.wiegand_bits_label(), self.csn_wiegand_bits());
        fields
    }
}

fn manufacturer_name(first_byte: Option<u8>) -> Option<&'static str> {
    match first_byte? {
        0x04 => Some("NXP"),
        0x02 => Some("ST"),
        0x05 => Some("Infineon"),
        0x16 => Some("Texas Instruments"),
        _ => None,
    }
}

/// PKOC details. Credentials come from the X coordinate of the public key;
/// the truncated sizes keep the lower bits, not the leading ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PkocDetails {
    pub protocol_version: Option<String>,
    /// Uncompressed EC point 04 || X || Y, unspaced hex
    pub public_key_hex: Option<String>,
}

impl PkocDetails {
    /// X coordinate: 32 bytes after the 04 prefix
    pub fn public_key_x(&self) -> Option<Vec<u8>> {
        let key = parse_hex(self.public_key_hex.as_deref()?).ok()?;
        key.get(1..33).map(<[u8]>::to_vec)
    }

    pub fn credential_256_hex(&self) -> Option<String> {
        self.public_key_x().map(|x| format_hex(&x))
    }

    pub fn credential_75_hex(&self) -> Option<String> {
        lower_bits(&self.public_key_x()?, 75).map(|bytes| format_hex(&bytes))
    }

    pub fn credential_64_hex(&self) -> Option<String> {
        lower_bits(&self.public_key_x()?, 64).map(|bytes| format_hex(&bytes))
    }

    pub fn credential_256_bits(&self) -> Option<String> {
        self.public_key_x().map(|x| bytes_to_bits(&x))
    }

    pub fn credential_75_bits(&self) -> Option<String> {
        lower_bits_string(&self.public_key_x()?, 75)
    }

    pub fn credential_64_bits(&self) -> Option<String> {
        lower_bits_string(&self.public_key_x()?, 64)
    }

    pub fn fields(&self) -> Fields {
        let mut fields = Fields::new();
        push_opt(&mut fields, "Protocol Version", self.protocol_version.clone());
        push_opt(&mut fields, "Public Key", self.public_key_hex.clone());
        push_opt(&mut fields, "Credential 256-bit", self.credential_256_hex());
        push_opt(&mut fields, "Credential 75-bit", self.credential_75_hex());
        push_opt(&mut fields, "Credential 64-bit", self.credential_64_hex());
        push_opt(&mut fields, "256-bit Wiegand", self.credential_256_bits());
        push_opt(&mut fields, "75-bit Wiegand", self.credential_75_bits());
        push_opt(&mut fields, "64-bit Wiegand", self.credential_64_bits());
        fields
    }
}

/// LEAF details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeafDetails {
    /// Label of the first application that answered
    pub application_type: String,
    /// "AID (LABEL)" for every application that answered
    pub detected_aids: Vec<String>,
}

impl LeafDetails {
    pub fn fields(&self) -> Fields {
        let mut fields = vec![field("Application Type", self.application_type.clone())];
        if !self.detected_aids.is_empty() {
            fields.push(field("AIDs", self.detected_aids.join(", ")));
        }
        fields
    }
}

/// Typed detail record produced by one detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "technology", rename_all = "lowercase")]
pub enum TechnologyDetails {
    Piv(PivDetails),
    Desfire(DesfireDetails),
    Iso14443(Iso14443Details),
    Pkoc(PkocDetails),
    Leaf(LeafDetails),
}

impl TechnologyDetails {
    pub fn technology(&self) -> CardTechnology {
        match self {
            Self::Piv(_) => CardTechnology::PIV,
            Self::Desfire(_) => CardTechnology::DESFIRE,
            Self::Iso14443(_) => CardTechnology::ISO14443,
            Self::Pkoc(_) => CardTechnology::PKOC,
            Self::Leaf(_) => CardTechnology::LEAF,
        }
    }

    /// Application identifiers this record vouches for
    pub fn application_ids(&self) -> Vec<String> {
        match self {
            Self::Piv(_) => vec![format_hex(apdus::PIV_AID)],
            Self::Desfire(details) => details.applications.clone(),
            Self::Iso14443(_) => Vec::new(),
            Self::Pkoc(_) => vec![format_hex(apdus::PKOC_AID)],
            Self::Leaf(details) => details.detected_aids.clone(),
        }
    }
}
