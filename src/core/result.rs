use crate::core::details::{
    DesfireDetails, GeneralDetails, Iso14443Details, LeafDetails, PivDetails, PkocDetails,
    TechnologyDetails,
};
use crate::core::technology::CardTechnology;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Everything one scan found on a card.
///
/// A typed detail record for a technology is present only when that
/// technology is set in `technologies`; `general` is always filled.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub scanned_at: DateTime<Utc>,
    pub reader_name: String,
    pub technologies: CardTechnology,
    pub atr: Option<String>,
    pub uid: Option<String>,
    pub detected_aids: Vec<String>,
    /// Probe summary per detected technology
    pub details: BTreeMap<CardTechnology, String>,
    pub general: GeneralDetails,
    pub piv: Option<PivDetails>,
    pub desfire: Option<DesfireDetails>,
    pub iso14443: Option<Iso14443Details>,
    pub pkoc: Option<PkocDetails>,
    pub leaf: Option<LeafDetails>,
}

impl DetectionResult {
    pub(crate) fn new(reader_name: &str, atr: Option<String>, uid: Option<String>) -> Self {
        Self {
            scanned_at: Utc::now(),
            reader_name: reader_name.to_string(),
            technologies: CardTechnology::UNKNOWN,
            atr,
            uid,
            detected_aids: Vec::new(),
            details: BTreeMap::new(),
            general: GeneralDetails::default(),
            piv: None,
            desfire: None,
            iso14443: None,
            pkoc: None,
            leaf: None,
        }
    }

    /// True when every bit of `technology` is set
    pub fn has_technology(&self, technology: CardTechnology) -> bool {
        self.technologies.contains(technology)
    }

    /// Record a positive probe outcome
    pub(crate) fn record(
        &mut self,
        technology: CardTechnology,
        summary: Option<String>,
        details: Option<TechnologyDetails>,
    ) {
        self.technologies |= technology;

        if let Some(summary) = summary.filter(|s| !s.is_empty()) {
            self.details.insert(technology, summary);
        }

        let Some(details) = details else {
            return;
        };
        for aid in details.application_ids() {
            if !self.detected_aids.contains(&aid) {
                self.detected_aids.push(aid);
            }
        }
        match details {
            TechnologyDetails::Piv(piv) => self.piv = Some(piv),
            TechnologyDetails::Desfire(desfire) => self.desfire = Some(desfire),
            TechnologyDetails::Iso14443(iso) => self.iso14443 = Some(iso),
            TechnologyDetails::Pkoc(pkoc) => self.pkoc = Some(pkoc),
            TechnologyDetails::Leaf(leaf) => self.leaf = Some(leaf),
        }
    }

    /// Card type summary: application technologies joined with " + ",
    /// else the bare contactless interface, else "Unknown Card"
    pub fn card_type_summary(&self) -> String {
        let applications: Vec<&str> = [
            CardTechnology::PIV,
            CardTechnology::DESFIRE,
            CardTechnology::PKOC,
            CardTechnology::LEAF,
        ]
        .into_iter()
        .filter(|technology| self.has_technology(*technology))
        .filter_map(CardTechnology::name)
        .collect();

        if !applications.is_empty() {
            applications.join(" + ")
        } else if self.has_technology(CardTechnology::ISO14443) {
            "ISO14443 Contactless".to_string()
        } else {
            "Unknown Card".to_string()
        }
    }
}
