use crate::core::commands::{apdus, ApduResponse};
use crate::core::utils::{format_hex, format_hex_spaced};
use anyhow::{Context as AnyhowContext, Result};
use pcsc::{Card, Context, Protocol, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::ffi::CString;

/// Information about a PCSC reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    pub name: String,
    pub card_present: bool,
    pub atr: Option<Vec<u8>>,
}

/// One open connection to a card. Responses include the trailing SW1 SW2.
#[cfg_attr(test, mockall::automock)]
pub trait CardConnection {
    fn transmit(&self, command: &[u8]) -> Result<Vec<u8>>;

    /// ATR as space-separated hex
    fn atr(&self) -> Option<String>;

    /// Contactless UID as space-separated hex, read with GET UID through
    /// `transmit`
    fn uid(&self) -> Option<String> {
        let raw = self.transmit(&apdus::get_uid()).ok()?;
        let response = ApduResponse::parse(&raw).ok()?;
        if response.is_success() && !response.data.is_empty() {
            Some(format_hex_spaced(&response.data))
        } else {
            None
        }
    }

    /// Negotiated transmission protocol
    fn protocol(&self) -> Option<String>;
}

/// Reader session: enumerates readers and opens card connections.
/// A connection is released when it is dropped.
pub trait SmartCardService {
    type Connection: CardConnection;

    fn readers(&self) -> Result<Vec<ReaderInfo>>;

    fn connect(&self, reader_name: &str) -> Result<Self::Connection>;
}

/// PCSC reader manager
pub struct PcscReader {
    context: Context,
}

impl PcscReader {
    /// Establish a user-scope PCSC context
    pub fn new() -> Result<Self> {
        let context =
            Context::establish(Scope::User).context("Failed to establish PCSC context")?;

        Ok(Self { context })
    }

    /// Get the status of a specific reader
    fn reader_status(&self, reader_name: &str) -> Result<(bool, Option<Vec<u8>>)> {
        let reader_cstr = CString::new(reader_name).context("Invalid reader name")?;

        match self
            .context
            .connect(&reader_cstr, ShareMode::Shared, Protocols::ANY)
        {
            Ok(card) => match card.status2_owned() {
                Ok(status) => Ok((true, Some(status.atr().to_vec()))),
                Err(_) => Ok((true, None)),
            },
            Err(pcsc::Error::NoSmartcard) => Ok((false, None)),
            Err(e) => {
                log::debug!("Status of {reader_name} unavailable: {e}");
                Ok((false, None))
            }
        }
    }
}

impl SmartCardService for PcscReader {
    type Connection = PcscConnection;

    fn readers(&self) -> Result<Vec<ReaderInfo>> {
        let mut readers_buf = vec![0; 2048];
        let readers = match self.context.list_readers(&mut readers_buf) {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to list readers"),
        };

        let mut reader_infos = Vec::new();
        for reader_name in readers {
            let name = reader_name.to_string_lossy().to_string();
            let (card_present, atr) = self.reader_status(&name).unwrap_or((false, None));

            reader_infos.push(ReaderInfo {
                name,
                card_present,
                atr,
            });
        }

        Ok(reader_infos)
    }

    fn connect(&self, reader_name: &str) -> Result<PcscConnection> {
        log::info!("Connecting to reader: {}", reader_name);

        let reader_cstr = CString::new(reader_name).context("Invalid reader name")?;
        let card = self
            .context
            .connect(&reader_cstr, ShareMode::Shared, Protocols::ANY)
            .with_context(|| format!("Failed to connect to reader: {}", reader_name))?;

        log::info!("Successfully connected to reader: {}", reader_name);
        Ok(PcscConnection {
            reader_name: reader_name.to_string(),
            card: Some(card),
        })
    }
}

/// Card connection backed by a `pcsc::Card`, left in place on drop
pub struct PcscConnection {
    reader_name: String,
    card: Option<Card>,
}

impl PcscConnection {
    fn card(&self) -> Result<&Card> {
        self.card
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No card connected"))
    }
}

impl CardConnection for PcscConnection {
    fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
        let card = self.card()?;
        log::debug!("> {}", format_hex_spaced(command));

        let mut response_buf = [0; MAX_BUFFER_SIZE];
        let response = card
            .transmit(command, &mut response_buf)
            .with_context(|| format!("Transmit failed: {}", format_hex(command)))?;

        log::debug!("< {}", format_hex_spaced(response));
        Ok(response.to_vec())
    }

    fn atr(&self) -> Option<String> {
        let status = self.card().ok()?.status2_owned().ok()?;
        Some(format_hex_spaced(status.atr()))
    }

    fn protocol(&self) -> Option<String> {
        let status = self.card().ok()?.status2_owned().ok()?;
        match status.protocol2()? {
            Protocol::T0 => Some("T=0 (Character)".to_string()),
            Protocol::T1 => Some("T=1 (Block)".to_string()),
            other => Some(format!("{other:?}")),
        }
    }
}

impl Drop for PcscConnection {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card
                .disconnect(pcsc::Disposition::LeaveCard)
                .map_err(|(_, e)| log::warn!("Failed to disconnect cleanly from card: {e}"));
        }
        log::info!("Disconnected from reader: {}", self.reader_name);
    }
}
