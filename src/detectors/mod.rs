//! Credential technology probes.
//!
//! Every probe borrows the shared card connection, issues its own SELECT (or
//! equivalent) and keeps no state between calls.

pub mod desfire;
pub mod iso14443;
pub mod leaf;
pub mod piv;
pub mod pkoc;

use crate::core::commands::ApduResponse;
use crate::core::config::DetectorConfig;
use crate::core::details::TechnologyDetails;
use crate::core::reader::CardConnection;
use crate::core::technology::CardTechnology;
use crate::core::utils::format_hex_spaced;
use anyhow::{Context, Result};

pub use desfire::DesfireDetector;
pub use iso14443::Iso14443Detector;
pub use leaf::LeafDetector;
pub use piv::PivDetector;
pub use pkoc::PkocDetector;

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub detected: bool,
    pub summary: Option<String>,
    pub details: Option<TechnologyDetails>,
}

impl Detection {
    pub fn not_detected() -> Self {
        Self {
            detected: false,
            summary: None,
            details: None,
        }
    }

    pub fn found(summary: impl Into<String>, details: TechnologyDetails) -> Self {
        Self {
            detected: true,
            summary: Some(summary.into()),
            details: Some(details),
        }
    }
}

/// The closed set of probes, run by the orchestrator in list order
#[derive(Debug, Clone)]
pub enum Detector {
    Iso14443(Iso14443Detector),
    Piv(PivDetector),
    Desfire(DesfireDetector),
    Pkoc(PkocDetector),
    Leaf(LeafDetector),
}

impl Detector {
    /// All probes in scan order: ISO14443, PIV, DESFire, PKOC, LEAF
    pub fn default_set(config: &DetectorConfig) -> Vec<Detector> {
        vec![
            Detector::Iso14443(Iso14443Detector),
            Detector::Piv(PivDetector::new(config.piv.clone())),
            Detector::Desfire(DesfireDetector::new(config.desfire.clone())),
            Detector::Pkoc(PkocDetector::new(config.pkoc.clone())),
            Detector::Leaf(LeafDetector),
        ]
    }

    pub fn technology(&self) -> CardTechnology {
        match self {
            Detector::Iso14443(_) => CardTechnology::ISO14443,
            Detector::Piv(_) => CardTechnology::PIV,
            Detector::Desfire(_) => CardTechnology::DESFIRE,
            Detector::Pkoc(_) => CardTechnology::PKOC,
            Detector::Leaf(_) => CardTechnology::LEAF,
        }
    }

    pub fn detect(&self, connection: &dyn CardConnection) -> Result<Detection> {
        match self {
            Detector::Iso14443(detector) => detector.detect(connection),
            Detector::Piv(detector) => detector.detect(connection),
            Detector::Desfire(detector) => detector.detect(connection),
            Detector::Pkoc(detector) => detector.detect(connection),
            Detector::Leaf(detector) => detector.detect(connection),
        }
    }
}

/// Send one command and split the reply into data and status word
pub(crate) fn exchange(connection: &dyn CardConnection, command: &[u8]) -> Result<ApduResponse> {
    let raw = connection
        .transmit(command)
        .with_context(|| format!("Command failed: {}", format_hex_spaced(command)))?;
    ApduResponse::parse(&raw)
}
