//! LEAF Universal credential probe.

use super::{exchange, Detection};
use crate::core::commands::apdus;
use crate::core::details::{LeafDetails, TechnologyDetails};
use crate::core::reader::CardConnection;
use crate::core::utils::format_hex;
use anyhow::Result;

/// LEAF applications in probe order, with their labels
const LEAF_APPLICATIONS: [([u8; 3], &str); 3] = [
    ([0xF5, 0x1C, 0xD8], "UNIVERSAL ID"),
    ([0xF5, 0x1C, 0xD9], "UNIVERSAL ID"),
    ([0xF5, 0x1C, 0xDB], "ENTERPRISE ID"),
];

/// Selects every LEAF application; a card may carry more than one
#[derive(Debug, Clone, Copy, Default)]
pub struct LeafDetector;

impl LeafDetector {
    pub fn detect(&self, connection: &dyn CardConnection) -> Result<Detection> {
        let mut application_type = None;
        let mut detected_aids = Vec::new();

        for (aid, label) in LEAF_APPLICATIONS {
            let aid_hex = format_hex(&aid);
            log::debug!("[LEAF] SELECT {aid_hex}");

            let selected = apdus::select(&aid).and_then(|command| exchange(connection, &command));
            match selected {
                Ok(response) if response.is_success() || response.has_more_data() => {
                    if application_type.is_none() {
                        application_type = Some(label);
                    }
                    detected_aids.push(format!("{aid_hex} ({label})"));
                }
                Ok(response) => log::debug!("[LEAF] {aid_hex}: {}", response.describe()),
                Err(e) => log::debug!("[LEAF] {aid_hex} failed: {e:#}"),
            }
        }

        let Some(application_type) = application_type else {
            return Ok(Detection::not_detected());
        };

        let summary = format!("LEAF Universal credential ({application_type})");
        log::info!("[LEAF] {summary}");
        Ok(Detection::found(
            summary,
            TechnologyDetails::Leaf(LeafDetails {
                application_type: application_type.to_string(),
                detected_aids,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reader::MockCardConnection;

    fn select_of(aid_last: u8) -> impl Fn(&[u8]) -> bool + Send + 'static {
        move |cmd: &[u8]| cmd == [0x00, 0xA4, 0x04, 0x00, 0x03, 0xF5, 0x1C, aid_last, 0x00]
    }

    fn leaf_details(detection: &Detection) -> &LeafDetails {
        match &detection.details {
            Some(TechnologyDetails::Leaf(details)) => details,
            other => panic!("LEAF details expected, got {other:?}"),
        }
    }

    #[test]
    fn test_all_aids_are_tried() {
        let mut mock = MockCardConnection::new();
        mock.expect_transmit()
            .withf(select_of(0xD8))
            .times(1)
            .returning(|_| Ok(vec![0x6A, 0x82]));
        mock.expect_transmit()
            .withf(select_of(0xD9))
            .times(1)
            .returning(|_| Ok(vec![0x61, 0x08]));
        mock.expect_transmit()
            .withf(select_of(0xDB))
            .times(1)
            .returning(|_| Ok(vec![0x90, 0x00]));

        let detection = LeafDetector.detect(&mock).unwrap();
        assert!(detection.detected);
        assert_eq!(
            detection.summary.as_deref(),
            Some("LEAF Universal credential (UNIVERSAL ID)")
        );

        let details = leaf_details(&detection);
        assert_eq!(details.application_type, "UNIVERSAL ID");
        assert_eq!(
            details.detected_aids,
            vec![
                "F51CD9 (UNIVERSAL ID)".to_string(),
                "F51CDB (ENTERPRISE ID)".to_string()
            ]
        );
    }

    #[test]
    fn test_enterprise_only() {
        let mut mock = MockCardConnection::new();
        mock.expect_transmit()
            .withf(select_of(0xDB))
            .returning(|_| Ok(vec![0x90, 0x00]));
        mock.expect_transmit()
            .withf(|cmd: &[u8]| cmd[7] != 0xDB)
            .returning(|_| Err(anyhow::anyhow!("Card removed")));

        let detection = LeafDetector.detect(&mock).unwrap();
        assert_eq!(leaf_details(&detection).application_type, "ENTERPRISE ID");
    }

    #[test]
    fn test_nothing_selects() {
        let mut mock = MockCardConnection::new();
        mock.expect_transmit()
            .times(3)
            .returning(|_| Ok(vec![0x6A, 0x82]));

        let detection = LeafDetector.detect(&mock).unwrap();
        assert_eq!(detection, Detection::not_detected());
    }
}
