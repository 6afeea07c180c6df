/// CredBench - identifies access-control credential technologies on a card
///
/// The detection engine probes a card presented at a PC/SC reader for PIV,
/// MIFARE DESFire, ISO 14443, PKOC and LEAF, and reports the identifiers
/// each technology exposes.
pub mod cli;
pub mod core;
pub mod detectors;

// Re-export commonly used types
pub use core::{
    config::DetectorConfig,
    detection::{CancellationToken, CardDetectionService, DetectionError},
    reader::{CardConnection, PcscReader, ReaderInfo, SmartCardService},
    result::DetectionResult,
    technology::CardTechnology,
    utils::{format_hex, parse_hex},
};
pub use detectors::{Detection, Detector};

// Common error type
pub type Result<T> = anyhow::Result<T>;
