//! ISO 14443 UID probe.

use super::{exchange, Detection};
use crate::core::commands::apdus;
use crate::core::details::{Iso14443Details, TechnologyDetails};
use crate::core::reader::CardConnection;
use anyhow::Result;

/// Reads the contactless UID through the PC/SC GET DATA pseudo-APDU
#[derive(Debug, Clone, Copy, Default)]
pub struct Iso14443Detector;

impl Iso14443Detector {
    pub fn detect(&self, connection: &dyn CardConnection) -> Result<Detection> {
        log::debug!("[ISO14443] Requesting UID");
        let response = exchange(connection, &apdus::get_uid())?;

        if !response.is_success() || response.data.is_empty() {
            log::debug!("[ISO14443] No UID: {}", response.describe());
            return Ok(Detection::not_detected());
        }

        let details = Iso14443Details::from_uid(&response.data);
        let summary = format!("{}, CSN: {}", details.card_type, details.csn);
        log::info!("[ISO14443] {summary}");

        Ok(Detection::found(summary, TechnologyDetails::Iso14443(details)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reader::MockCardConnection;

    fn mock_returning(response: Vec<u8>) -> MockCardConnection {
        let mut mock = MockCardConnection::new();
        mock.expect_transmit()
            .withf(|cmd: &[u8]| cmd == [0xFF, 0xCA, 0x00, 0x00, 0x00])
            .times(1)
            .returning(move |_| Ok(response.clone()));
        mock
    }

    #[test]
    fn test_uid_detected() {
        let mock = mock_returning(vec![0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x90, 0x00]);

        let detection = Iso14443Detector.detect(&mock).unwrap();
        assert!(detection.detected);
        assert_eq!(
            detection.summary.as_deref(),
            Some("ISO14443 (NXP, 7-byte UID), CSN: 66554433221104")
        );
        match detection.details {
            Some(TechnologyDetails::Iso14443(details)) => {
                assert_eq!(details.uid, "04112233445566");
                assert_eq!(details.manufacturer, "NXP");
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn test_success_without_data_is_not_detected() {
        let mock = mock_returning(vec![0x90, 0x00]);
        assert!(!Iso14443Detector.detect(&mock).unwrap().detected);
    }

    #[test]
    fn test_error_status_is_not_detected() {
        let mock = mock_returning(vec![0x6A, 0x81]);
        let detection = Iso14443Detector.detect(&mock).unwrap();
        assert_eq!(detection, Detection::not_detected());
    }
}
