//! Text and JSON rendering of scan results.

use crate::core::details::Fields;
use crate::core::result::DetectionResult;
use crate::core::trace::{Exchange, TraceStatistics};
use crate::core::utils::format_hex_spaced;
use serde_json::{json, Map, Value};
use std::io::{self, Write};

/// One section per detail record, General first
pub fn write_text(result: &DetectionResult, out: &mut impl Write) -> io::Result<()> {
    write_section(out, "General", &result.general.fields())?;

    if let Some(iso) = &result.iso14443 {
        write_section(out, "ISO 14443", &iso.fields())?;
    }
    if let Some(piv) = &result.piv {
        write_section(out, "PIV", &piv.fields())?;
    }
    if let Some(desfire) = &result.desfire {
        write_section(out, "DESFire", &desfire.fields())?;
    }
    if let Some(pkoc) = &result.pkoc {
        write_section(out, "PKOC", &pkoc.fields())?;
    }
    if let Some(leaf) = &result.leaf {
        write_section(out, "LEAF", &leaf.fields())?;
    }

    Ok(())
}

fn write_section(out: &mut impl Write, header: &str, fields: &Fields) -> io::Result<()> {
    writeln!(out, "── {header} ──")?;
    for (label, value) in fields {
        writeln!(out, "  {label:<20} {value}")?;
    }
    writeln!(out)
}

/// JSON view of a result, derived fields included and nulls dropped
pub fn to_json(result: &DetectionResult) -> Value {
    let mut root = Map::new();

    let general = &result.general;
    root.insert(
        "general".to_string(),
        json!({
            "reader": general.reader_name,
            "protocol": general.protocol,
            "atr": general.atr,
            "uid": general.uid,
            "csn": general.csn,
            "cardType": general.card_type_summary,
        }),
    );

    if let Some(iso) = &result.iso14443 {
        root.insert(
            "iso14443".to_string(),
            json!({
                "uid": iso.uid,
                "uidBytes": iso.uid_bytes(),
                "uidLength": iso.uid_length,
                "csn": iso.csn,
                "manufacturer": iso.manufacturer,
                "cardType": iso.card_type,
                "wiegandBits": iso.csn_wiegand_bits(),
                "wiegandBitsLabel": iso.wiegand_bits_label(),
            }),
        );
    }

    if let Some(piv) = &result.piv {
        root.insert(
            "piv".to_string(),
            json!({
                "status": piv.status,
                "chuid": piv.chuid,
                "fascn": piv.fascn,
                "agencyCode": piv.agency_code(),
                "systemCode": piv.system_code(),
                "credentialNumber": piv.credential_number(),
                "credentialSeries": piv.credential_series(),
                "individualCredentialIssue": piv.individual_credential_issue(),
                "personIdentifier": piv.person_identifier(),
                "organizationalCategory": piv.organizational_category(),
                "organizationalIdentifier": piv.organizational_identifier(),
                "personOrgAssociation": piv.person_org_association(),
                "wiegandBits": piv.fascn_wiegand_bits(),
            }),
        );
    }

    if let Some(desfire) = &result.desfire {
        root.insert(
            "desfire".to_string(),
            json!({
                "cardType": desfire.card_type,
                "hardwareVersion": desfire.hardware_version,
                "softwareVersion": desfire.software_version,
                "storageSize": desfire.storage_size,
                "applications": desfire.applications,
            }),
        );
    }

    if let Some(pkoc) = &result.pkoc {
        root.insert(
            "pkoc".to_string(),
            json!({
                "protocolVersion": pkoc.protocol_version,
                "publicKey": pkoc.public_key_hex,
                "credential256": pkoc.credential_256_hex(),
                "credential75": pkoc.credential_75_hex(),
                "credential64": pkoc.credential_64_hex(),
                "wiegand256": pkoc.credential_256_bits(),
                "wiegand75": pkoc.credential_75_bits(),
                "wiegand64": pkoc.credential_64_bits(),
            }),
        );
    }

    if let Some(leaf) = &result.leaf {
        root.insert(
            "leaf".to_string(),
            json!({
                "applicationType": leaf.application_type,
                "aids": leaf.detected_aids,
            }),
        );
    }

    without_nulls(Value::Object(root))
}

fn without_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, without_nulls(v)))
                .collect(),
        ),
        other => other,
    }
}

/// APDU trace, one line per exchange followed by totals
pub fn write_trace(
    exchanges: &[Exchange],
    stats: &TraceStatistics,
    out: &mut impl Write,
) -> io::Result<()> {
    writeln!(out, "── APDU Trace ──")?;
    for (i, exchange) in exchanges.iter().enumerate() {
        let status = if exchange.success { "OK" } else { "ERROR" };
        writeln!(
            out,
            "  [{}] {} {} ({}ms)",
            i + 1,
            exchange.timestamp.format("%H:%M:%S%.3f"),
            status,
            exchange.duration_ms
        )?;
        writeln!(out, "      > {}", format_hex_spaced(&exchange.command))?;
        match &exchange.error {
            Some(error) => writeln!(out, "      ! {error}")?,
            None => writeln!(out, "      < {}", format_hex_spaced(&exchange.response))?,
        }
    }
    writeln!(
        out,
        "  {} exchanges, {} failed, {}ms average",
        stats.total_exchanges, stats.failed_exchanges, stats.average_duration_ms
    )?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::details::{GeneralDetails, Iso14443Details, LeafDetails, PivDetails};
    use crate::core::technology::CardTechnology;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_result() -> DetectionResult {
        let iso = Iso14443Details::from_uid(&[0x04, 0xA2, 0xB3, 0xC4]);
        DetectionResult {
            scanned_at: Utc::now(),
            reader_name: "Test Reader 0".to_string(),
            technologies: CardTechnology::ISO14443 | CardTechnology::PIV | CardTechnology::LEAF,
            atr: Some("3B 8F 80 01".to_string()),
            uid: Some("04 A2 B3 C4".to_string()),
            detected_aids: Vec::new(),
            details: BTreeMap::new(),
            general: GeneralDetails {
                reader_name: Some("Test Reader 0".to_string()),
                protocol: None,
                atr: Some("3B 8F 80 01".to_string()),
                uid: Some("04 A2 B3 C4".to_string()),
                csn: Some(iso.csn.clone()),
                card_type_summary: "PIV + LEAF".to_string(),
            },
            piv: Some(PivDetails::new("PIV application found")),
            desfire: None,
            iso14443: Some(iso),
            pkoc: None,
            leaf: Some(LeafDetails {
                application_type: "UNIVERSAL ID".to_string(),
                detected_aids: vec!["F51CD8 (UNIVERSAL ID)".to_string()],
            }),
        }
    }

    #[test]
    fn test_text_sections() {
        let mut out = Vec::new();
        write_text(&sample_result(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("── General ──\n"));
        assert!(text.contains("── ISO 14443 ──"));
        assert!(text.contains("── PIV ──"));
        assert!(text.contains("── LEAF ──"));
        assert!(!text.contains("── DESFire ──"));
        assert!(text.contains(&format!("  {:<20} {}\n", "Card Type", "PIV + LEAF")));
        assert!(text.contains("  Status               PIV application found\n"));
        assert!(!text.contains("Protocol"));
        assert!(text.contains("  Wiegand Bits (32)    11000100101100111010001000000100\n"));
    }

    #[test]
    fn test_json_omits_nulls_and_absent_sections() {
        let json = to_json(&sample_result());

        assert_eq!(json["general"]["cardType"], "PIV + LEAF");
        assert!(json["general"].get("protocol").is_none());
        assert_eq!(json["iso14443"]["csn"], "C4B3A204");
        assert_eq!(json["iso14443"]["uidBytes"], "04-A2-B3-C4");
        assert_eq!(json["iso14443"]["wiegandBitsLabel"], "Wiegand Bits (32)");
        assert_eq!(json["piv"]["status"], "PIV application found");
        assert!(json["piv"].get("fascn").is_none());
        assert_eq!(json["leaf"]["aids"][0], "F51CD8 (UNIVERSAL ID)");
        assert!(json.get("desfire").is_none());
        assert!(json.get("pkoc").is_none());
    }

    #[test]
    fn test_trace_lines() {
        let exchanges = vec![
            Exchange {
                timestamp: Utc::now(),
                command: vec![0xFF, 0xCA, 0x00, 0x00, 0x00],
                response: vec![0x04, 0xA2, 0x90, 0x00],
                success: true,
                error: None,
                duration_ms: 3,
            },
            Exchange {
                timestamp: Utc::now(),
                command: vec![0x60],
                response: Vec::new(),
                success: false,
                error: Some("Transmit failed".to_string()),
                duration_ms: 1,
            },
        ];

        let stats = TraceStatistics {
            total_exchanges: 2,
            failed_exchanges: 1,
            average_duration_ms: 2,
        };
        let mut out = Vec::new();
        write_trace(&exchanges, &stats, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("      > FF CA 00 00 00\n"));
        assert!(text.contains("      < 04 A2 90 00\n"));
        assert!(text.contains("ERROR (1ms)"));
        assert!(text.contains("      ! Transmit failed\n"));
        assert!(text.contains("  2 exchanges, 1 failed, 2ms average\n"));
    }
}
