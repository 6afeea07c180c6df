//! APDU transcript of a scan.
//!
//! `RecordingService` wraps any `SmartCardService`; each connection it opens
//! appends every exchange to a shared `Transcript`.

use crate::core::reader::{CardConnection, ReaderInfo, SmartCardService};
use crate::core::utils::format_hex_spaced;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// One command/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub timestamp: DateTime<Utc>,
    pub command: Vec<u8>,
    pub response: Vec<u8>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Statistics about recorded exchanges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceStatistics {
    pub total_exchanges: usize,
    pub failed_exchanges: usize,
    pub average_duration_ms: u64,
}

/// Shared, append-only list of exchanges
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    exchanges: Arc<Mutex<Vec<Exchange>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, exchange: Exchange) {
        self.exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(exchange);
    }

    /// Snapshot of everything recorded so far
    pub fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn statistics(&self) -> TraceStatistics {
        let exchanges = self.exchanges();
        let total_exchanges = exchanges.len();
        let failed_exchanges = exchanges.iter().filter(|e| !e.success).count();

        let average_duration_ms = if total_exchanges > 0 {
            exchanges.iter().map(|e| e.duration_ms).sum::<u64>() / total_exchanges as u64
        } else {
            0
        };

        TraceStatistics {
            total_exchanges,
            failed_exchanges,
            average_duration_ms,
        }
    }
}

/// Session wrapper that records every exchange of its connections
pub struct RecordingService<S> {
    inner: S,
    transcript: Transcript,
}

impl<S> RecordingService<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            transcript: Transcript::new(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}

impl<S: SmartCardService> SmartCardService for RecordingService<S> {
    type Connection = RecordingConnection<S::Connection>;

    fn readers(&self) -> Result<Vec<ReaderInfo>> {
        self.inner.readers()
    }

    fn connect(&self, reader_name: &str) -> Result<Self::Connection> {
        Ok(RecordingConnection {
            inner: self.inner.connect(reader_name)?,
            transcript: self.transcript.clone(),
        })
    }
}

pub struct RecordingConnection<C> {
    inner: C,
    transcript: Transcript,
}

impl<C: CardConnection> CardConnection for RecordingConnection<C> {
    fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        let timestamp = Utc::now();
        let result = self.inner.transmit(command);
        let duration_ms = start_time.elapsed().as_millis() as u64;

        let exchange = match &result {
            Ok(response) => Exchange {
                timestamp,
                command: command.to_vec(),
                response: response.clone(),
                success: true,
                error: None,
                duration_ms,
            },
            Err(e) => {
                log::debug!("Exchange failed for {}: {e:#}", format_hex_spaced(command));
                Exchange {
                    timestamp,
                    command: command.to_vec(),
                    response: Vec::new(),
                    success: false,
                    error: Some(format!("{e:#}")),
                    duration_ms,
                }
            }
        };
        self.transcript.push(exchange);

        result
    }

    fn atr(&self) -> Option<String> {
        self.inner.atr()
    }

    fn protocol(&self) -> Option<String> {
        self.inner.protocol()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reader::MockCardConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording(mock: MockCardConnection) -> (RecordingConnection<MockCardConnection>, Transcript) {
        let transcript = Transcript::new();
        (
            RecordingConnection {
                inner: mock,
                transcript: transcript.clone(),
            },
            transcript,
        )
    }

    #[test]
    fn test_records_successful_and_failed_exchanges() {
        let mut mock = MockCardConnection::new();
        mock.expect_transmit()
            .withf(|cmd: &[u8]| cmd[0] == 0x00)
            .returning(|_| Ok(vec![0x90, 0x00]));
        mock.expect_transmit()
            .withf(|cmd: &[u8]| cmd[0] == 0x90)
            .returning(|_| Err(anyhow::anyhow!("Card removed")));

        let (connection, transcript) = recording(mock);
        assert!(connection.transmit(&[0x00, 0xA4, 0x04, 0x00]).is_ok());
        assert!(connection.transmit(&[0x90, 0x60, 0x00, 0x00, 0x00]).is_err());

        let exchanges = transcript.exchanges();
        assert_eq!(exchanges.len(), 2);
        assert!(exchanges[0].success);
        assert_eq!(exchanges[0].response, vec![0x90, 0x00]);
        assert!(!exchanges[1].success);
        assert!(exchanges[1].error.as_deref().unwrap().contains("Card removed"));

        let stats = transcript.statistics();
        assert_eq!(stats.total_exchanges, 2);
        assert_eq!(stats.failed_exchanges, 1);
    }

    /// Connection that answers GET UID and counts what reaches the card
    struct CountingCard {
        sent: AtomicUsize,
    }

    impl CardConnection for CountingCard {
        fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if command.starts_with(&[0xFF, 0xCA]) {
                Ok(vec![0x04, 0xA2, 0xB3, 0xC4, 0x90, 0x00])
            } else {
                Ok(vec![0x90, 0x00])
            }
        }

        fn atr(&self) -> Option<String> {
            None
        }

        fn uid(&self) -> Option<String> {
            let raw = self.transmit(&[0xFF, 0xCA, 0x00, 0x00, 0x00]).ok()?;
            Some(format_hex_spaced(&raw[..raw.len() - 2]))
        }

        fn protocol(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_uid_read_is_recorded() {
        let transcript = Transcript::new();
        let connection = RecordingConnection {
            inner: CountingCard {
                sent: AtomicUsize::new(0),
            },
            transcript: transcript.clone(),
        };

        assert_eq!(connection.uid().as_deref(), Some("04 A2 B3 C4"));
        connection.transmit(&[0x00, 0xA4, 0x04, 0x00]).unwrap();

        let exchanges = transcript.exchanges();
        assert_eq!(exchanges.len(), connection.inner.sent.load(Ordering::SeqCst));
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].command, vec![0xFF, 0xCA, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_statistics_and_serialized_form() {
        let transcript = Transcript::new();
        assert_eq!(transcript.statistics().average_duration_ms, 0);

        for duration_ms in [12, 4] {
            transcript.push(Exchange {
                timestamp: Utc::now(),
                command: vec![0xFF, 0xCA, 0x00, 0x00, 0x00],
                response: vec![0x04, 0xA2, 0x90, 0x00],
                success: true,
                error: None,
                duration_ms,
            });
        }

        let stats = transcript.statistics();
        assert_eq!(stats.total_exchanges, 2);
        assert_eq!(stats.failed_exchanges, 0);
        assert_eq!(stats.average_duration_ms, 8);

        let json = serde_json::to_string(&transcript.exchanges()).unwrap();
        let parsed: Vec<Exchange> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, transcript.exchanges());
    }
}
