//! Scan orchestration.
//!
//! One connection per scan, probes run in list order against it. Probe
//! failures are logged and count as "not detected"; only cancellation and
//! connection failures reach the caller.

use crate::core::config::DetectorConfig;
use crate::core::details::GeneralDetails;
use crate::core::reader::{CardConnection, SmartCardService};
use crate::core::result::DetectionResult;
use crate::core::technology::CardTechnology;
use crate::detectors::Detector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Scan failures surfaced to the caller
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detection was canceled")]
    Canceled,

    #[error("Failed to connect to card: {0:#}")]
    Connection(#[source] anyhow::Error),
}

/// Cooperative cancellation flag shared between a scan and its caller
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), DetectionError> {
        if self.is_canceled() {
            Err(DetectionError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Progress sink, called with each probed technology and with
/// `CardTechnology::UNKNOWN` once the last probe has run
pub type Progress<'a> = &'a mut dyn FnMut(CardTechnology);

pub struct CardDetectionService<S> {
    service: S,
    detectors: Vec<Detector>,
}

impl<S: SmartCardService> CardDetectionService<S> {
    pub fn new(service: S, detectors: Vec<Detector>) -> Self {
        Self { service, detectors }
    }

    /// Service running the full probe set configured by `config`
    pub fn with_config(service: S, config: &DetectorConfig) -> Self {
        Self::new(service, Detector::default_set(config))
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Scan the card in `reader_name`
    pub fn detect(
        &self,
        reader_name: &str,
        mut progress: Option<Progress<'_>>,
        cancel: &CancellationToken,
    ) -> Result<DetectionResult, DetectionError> {
        cancel.check()?;

        let connection = self
            .service
            .connect(reader_name)
            .map_err(DetectionError::Connection)?;

        let atr = connection.atr();
        let uid = connection.uid();
        let protocol = connection.protocol();
        let mut result = DetectionResult::new(reader_name, atr, uid);

        for detector in &self.detectors {
            cancel.check()?;

            let technology = detector.technology();
            if let Some(report) = progress.as_deref_mut() {
                report(technology);
            }

            match detector.detect(&connection) {
                Ok(detection) if detection.detected => {
                    result.record(technology, detection.summary, detection.details);
                }
                Ok(_) => log::debug!("{technology} not detected"),
                Err(e) => log::warn!("{technology} probe failed: {e:#}"),
            }
        }

        if let Some(report) = progress.as_deref_mut() {
            report(CardTechnology::UNKNOWN);
        }
        drop(connection);

        result.general = general_details(&result, protocol);
        log::info!(
            "Scan of '{reader_name}' complete: {}",
            result.general.card_type_summary
        );
        Ok(result)
    }
}

impl<S> CardDetectionService<S>
where
    S: SmartCardService + Send + Sync + 'static,
{
    /// Run `detect` on a worker thread. Progress is reported from that thread.
    pub fn spawn(
        self: Arc<Self>,
        reader_name: String,
        progress: Option<Box<dyn FnMut(CardTechnology) + Send>>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<DetectionResult, DetectionError>> {
        thread::spawn(move || {
            let mut progress = progress;
            let sink = progress
                .as_deref_mut()
                .map(|report| report as &mut dyn FnMut(CardTechnology));
            self.detect(&reader_name, sink, &cancel)
        })
    }
}

fn general_details(result: &DetectionResult, protocol: Option<String>) -> GeneralDetails {
    GeneralDetails {
        reader_name: Some(result.reader_name.clone()),
        protocol,
        atr: result.atr.clone(),
        uid: result.uid.clone(),
        csn: result.iso14443.as_ref().map(|iso| iso.csn.clone()),
        card_type_summary: result.card_type_summary(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reader::{MockCardConnection, ReaderInfo};
    use crate::detectors::{Iso14443Detector, LeafDetector, PivDetector};
    use anyhow::{anyhow, Result};
    use std::sync::Mutex;

    /// Hands out one prepared mock connection
    struct OneShotService {
        connection: Mutex<Option<MockCardConnection>>,
    }

    impl OneShotService {
        fn new(connection: MockCardConnection) -> Self {
            Self {
                connection: Mutex::new(Some(connection)),
            }
        }
    }

    impl SmartCardService for OneShotService {
        type Connection = MockCardConnection;

        fn readers(&self) -> Result<Vec<ReaderInfo>> {
            Ok(vec![ReaderInfo {
                name: "Mock Reader".to_string(),
                card_present: true,
                atr: None,
            }])
        }

        fn connect(&self, _reader_name: &str) -> Result<MockCardConnection> {
            self.connection
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow!("No card present"))
        }
    }

    fn connection_with_identity() -> MockCardConnection {
        let mut mock = MockCardConnection::new();
        mock.expect_atr()
            .returning(|| Some("3B 8F 80 01 80 4F".to_string()));
        mock.expect_uid()
            .returning(|| Some("04 A2 B3 C4".to_string()));
        mock.expect_protocol()
            .returning(|| Some("T=1 (Block)".to_string()));
        mock
    }

    #[test]
    fn test_canceled_before_start_runs_no_probe() {
        // A mock with no expectations panics on any call
        let service = OneShotService::new(MockCardConnection::new());
        let detector = CardDetectionService::with_config(service, &DetectorConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = detector.detect("Mock Reader", None, &cancel);
        assert!(matches!(result, Err(DetectionError::Canceled)));
        // The connection was never taken
        assert!(detector.service().connection.lock().unwrap().is_some());
    }

    #[test]
    fn test_connection_failure_is_surfaced() {
        let service = OneShotService {
            connection: Mutex::new(None),
        };
        let detector = CardDetectionService::with_config(service, &DetectorConfig::default());

        let result = detector.detect("Mock Reader", None, &CancellationToken::new());
        match result {
            Err(DetectionError::Connection(e)) => assert!(e.to_string().contains("No card")),
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[test]
    fn test_progress_and_probe_failure_isolation() {
        let mut mock = connection_with_identity();
        mock.expect_transmit()
            .withf(|cmd: &[u8]| cmd[0] == 0xFF)
            .returning(|_| Ok(vec![0x04, 0xA2, 0xB3, 0xC4, 0x90, 0x00]));
        mock.expect_transmit()
            .withf(|cmd: &[u8]| cmd[0] == 0x00 && cmd[4] == 0x0B)
            .returning(|_| Err(anyhow!("Card removed")));
        mock.expect_transmit()
            .withf(|cmd: &[u8]| cmd[0] == 0x00 && cmd[4] == 0x03)
            .returning(|cmd| {
                if cmd[7] == 0xD8 {
                    Ok(vec![0x90, 0x00])
                } else {
                    Ok(vec![0x6A, 0x82])
                }
            });

        let detectors = vec![
            Detector::Iso14443(Iso14443Detector),
            Detector::Piv(PivDetector::default()),
            Detector::Leaf(LeafDetector),
        ];
        let detector = CardDetectionService::new(OneShotService::new(mock), detectors);

        let mut seen = Vec::new();
        let mut record = |technology: CardTechnology| seen.push(technology);
        let result = detector
            .detect(
                "Mock Reader",
                Some(&mut record as Progress<'_>),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(
            seen,
            vec![
                CardTechnology::ISO14443,
                CardTechnology::PIV,
                CardTechnology::LEAF,
                CardTechnology::UNKNOWN,
            ]
        );
        assert_eq!(result.technologies, CardTechnology::ISO14443 | CardTechnology::LEAF);
        assert!(result.piv.is_none());
        assert_eq!(result.atr.as_deref(), Some("3B 8F 80 01 80 4F"));
        assert_eq!(result.general.csn.as_deref(), Some("C4B3A204"));
        assert_eq!(result.general.protocol.as_deref(), Some("T=1 (Block)"));
        assert_eq!(result.general.card_type_summary, "LEAF");
        assert_eq!(result.detected_aids, vec!["F51CD8 (UNIVERSAL ID)".to_string()]);
    }

    #[test]
    fn test_cancel_between_probes() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let mut mock = connection_with_identity();
        mock.expect_transmit()
            .withf(|cmd: &[u8]| cmd[0] == 0xFF)
            .times(1)
            .returning(move |_| {
                trigger.cancel();
                Ok(vec![0x04, 0x01, 0x02, 0x03, 0x90, 0x00])
            });

        let detector = CardDetectionService::with_config(
            OneShotService::new(mock),
            &DetectorConfig::default(),
        );

        let result = detector.detect("Mock Reader", None, &cancel);
        assert!(matches!(result, Err(DetectionError::Canceled)));
    }

    #[test]
    fn test_spawn_runs_on_worker_thread() {
        let mut mock = connection_with_identity();
        mock.expect_transmit().returning(|_| Ok(vec![0x6A, 0x82]));

        let detector = Arc::new(CardDetectionService::new(
            OneShotService::new(mock),
            vec![Detector::Leaf(LeafDetector)],
        ));

        let steps = Arc::new(Mutex::new(Vec::new()));
        let sink_steps = Arc::clone(&steps);
        let sink: Box<dyn FnMut(CardTechnology) + Send> =
            Box::new(move |technology: CardTechnology| sink_steps.lock().unwrap().push(technology));
        let handle = detector.spawn("Mock Reader".to_string(), Some(sink), CancellationToken::new());

        let result = handle.join().unwrap().unwrap();
        assert!(result.technologies.is_unknown());
        assert_eq!(result.general.card_type_summary, "Unknown Card");
        assert_eq!(
            *steps.lock().unwrap(),
            vec![CardTechnology::LEAF, CardTechnology::UNKNOWN]
        );
    }
}
