use anyhow::{anyhow, bail, Context, Result};

/// Parse a hex string into bytes
/// Supports various formats:
/// - "0102030A" (pure hex)
/// - "01 02 03 0A" (space-separated)
/// - "0x01,0x02,0x03,0x0A" (0x prefix with commas)
/// - "01:02:03:0A" or "01-02-03-0A" (colon/dash-separated)
pub fn parse_hex(hex_str: &str) -> Result<Vec<u8>> {
    let cleaned = clean_hex_string(hex_str);

    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    if cleaned.len() % 2 != 0 {
        bail!(
            "Hex string must have even number of characters: '{}'",
            hex_str
        );
    }

    hex::decode(&cleaned).with_context(|| format!("Invalid hex string: '{hex_str}'"))
}

/// Clean a hex string by removing common separators and prefixes
fn clean_hex_string(hex_str: &str) -> String {
    hex_str
        .trim()
        .replace("0x", "")
        .replace("0X", "")
        .replace([' ', ',', ':', '-', '\t', '\n', '\r'], "")
        .to_uppercase()
}

/// Format bytes as a hex string
pub fn format_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Format bytes as a hex string with spaces
pub fn format_hex_spaced(bytes: &[u8]) -> String {
    join_hex(bytes, " ")
}

/// Format bytes as a hex string with dashes ("04-A2-B3")
pub fn format_hex_dashed(bytes: &[u8]) -> String {
    join_hex(bytes, "-")
}

fn join_hex(bytes: &[u8], separator: &str) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Re-render an unspaced hex string as dash-separated byte pairs.
/// Strings that are not valid hex come back unchanged.
pub fn hex_to_dashed(hex_str: &str) -> String {
    match parse_hex(hex_str) {
        Ok(bytes) if !bytes.is_empty() => format_hex_dashed(&bytes),
        _ => hex_str.to_string(),
    }
}

/// Expand bytes into a string of '0'/'1', most significant bit first
pub fn bytes_to_bits(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:08b}")).collect()
}

/// Bit string with one space-separated group per byte
pub fn bits_grouped(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:08b}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lower `bit_count` bits of a big-endian byte string, byte aligned.
///
/// The result is `ceil(bit_count / 8)` bytes long; when `bit_count` is not a
/// multiple of eight the unused top bits of the first byte are zero.
/// Returns `None` when the input holds fewer than `bit_count` bits.
pub fn lower_bits(bytes: &[u8], bit_count: usize) -> Option<Vec<u8>> {
    if bit_count == 0 || bytes.len() * 8 < bit_count {
        return None;
    }

    let full_bytes = bit_count / 8;
    let remainder_bits = bit_count % 8;
    let start = bytes.len() - full_bytes;

    let mut result = Vec::with_capacity(full_bytes + 1);
    if remainder_bits > 0 {
        let mask = (1u8 << remainder_bits) - 1;
        result.push(bytes[start - 1] & mask);
    }
    result.extend_from_slice(&bytes[start..]);

    Some(result)
}

/// Lower `bit_count` bits of a byte string as exactly `bit_count` binary digits
pub fn lower_bits_string(bytes: &[u8], bit_count: usize) -> Option<String> {
    if bit_count == 0 || bytes.len() * 8 < bit_count {
        return None;
    }
    let bits = bytes_to_bits(bytes);
    Some(bits[bits.len() - bit_count..].to_string())
}

/// Decode a BER-TLV length starting at `offset`.
///
/// Returns `(length, bytes consumed by the length field)`. Short form is a
/// single byte below 0x80; long form 0x8N is followed by N big-endian bytes.
pub fn read_ber_length(data: &[u8], offset: usize) -> Result<(usize, usize)> {
    let first = *data
        .get(offset)
        .ok_or_else(|| anyhow!("BER length missing at offset {offset}"))?;

    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let count = (first & 0x7F) as usize;
    if count == 0 || count > 4 {
        bail!("Unsupported BER length form 0x{first:02X} at offset {offset}");
    }

    let bytes = data
        .get(offset + 1..offset + 1 + count)
        .ok_or_else(|| anyhow!("BER length truncated at offset {offset}"))?;
    let length = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);

    Ok((length, 1 + count))
}

/// Find the value of the first single-byte `tag` in a flat TLV stream
/// with single-byte lengths. Scanning stops at the first truncated element.
pub fn find_tlv(data: &[u8], tag: u8) -> Option<&[u8]> {
    let mut index = 0;
    while index + 2 <= data.len() {
        let current = data[index];
        let length = data[index + 1] as usize;
        let value = data.get(index + 2..index + 2 + length)?;
        if current == tag {
            return Some(value);
        }
        index += 2 + length;
    }
    None
}

/// Mnemonic for the SW2 byte of a native DESFire (SW1 = 0x91) response
pub fn desfire_status_name(sw2: u8) -> &'static str {
    match sw2 {
        0x00 => "OPERATION_OK",
        0x0C => "NO_CHANGES",
        0x0E => "OUT_OF_EEPROM_ERROR",
        0x1C => "ILLEGAL_COMMAND_CODE",
        0x1E => "INTEGRITY_ERROR",
        0x40 => "NO_SUCH_KEY",
        0x7E => "LENGTH_ERROR",
        0x9D => "PERMISSION_DENIED",
        0x9E => "PARAMETER_ERROR",
        0xA0 => "APPLICATION_NOT_FOUND",
        0xA1 => "APPL_INTEGRITY_ERROR",
        0xAE => "AUTHENTICATION_ERROR",
        0xAF => "ADDITIONAL_FRAME",
        0xBE => "BOUNDARY_ERROR",
        0xC1 => "PICC_INTEGRITY_ERROR",
        0xCA => "COMMAND_ABORTED",
        0xCD => "PICC_DISABLED_ERROR",
        0xCE => "COUNT_ERROR",
        0xDE => "DUPLICATE_ERROR",
        0xEE => "EEPROM_ERROR",
        0xF0 => "FILE_NOT_FOUND",
        0xF1 => "FILE_INTEGRITY_ERROR",
        _ => "UNKNOWN_DESFIRE_STATUS",
    }
}

/// Get a human-readable description of SW1/SW2 status words
pub fn describe_status_word(sw1: u8, sw2: u8) -> String {
    match (sw1, sw2) {
        (0x90, 0x00) => "Success".to_string(),
        (0x61, n) => format!("Success, {n} bytes available"),
        (0x91, n) => format!("DESFire: {}", desfire_status_name(n)),
        (0x62, 0x00) => "Warning: No information given".to_string(),
        (0x62, 0x81) => "Warning: Part of returned data may be corrupted".to_string(),
        (0x62, 0x82) => "Warning: End of file reached".to_string(),
        (0x62, 0x83) => "Warning: Selected file invalidated".to_string(),
        (0x62, 0x84) => "Warning: FCI not formatted".to_string(),
        (0x63, 0x00) => "Warning: No information given".to_string(),
        (0x63, n) if n & 0xF0 == 0xC0 => format!("Warning: Counter = {}", n & 0x0F),
        (0x64, 0x00) => "Error: Execution error".to_string(),
        (0x65, 0x81) => "Error: Memory failure".to_string(),
        (0x67, 0x00) => "Error: Wrong length".to_string(),
        (0x68, 0x81) => "Error: Logical channel not supported".to_string(),
        (0x68, 0x82) => "Error: Secure messaging not supported".to_string(),
        (0x69, 0x82) => "Error: Security status not satisfied".to_string(),
        (0x69, 0x83) => "Error: Authentication method blocked".to_string(),
        (0x69, 0x85) => "Error: Conditions of use not satisfied".to_string(),
        (0x69, 0x86) => "Error: Command not allowed (no current EF)".to_string(),
        (0x6A, 0x80) => "Error: Incorrect parameters in data field".to_string(),
        (0x6A, 0x81) => "Error: Function not supported".to_string(),
        (0x6A, 0x82) => "Error: File not found".to_string(),
        (0x6A, 0x86) => "Error: Incorrect parameters P1-P2".to_string(),
        (0x6A, 0x88) => "Error: Referenced data not found".to_string(),
        (0x6B, 0x00) => "Error: Wrong parameter(s) P1-P2".to_string(),
        (0x6C, n) => format!("Error: Wrong Le field, exact length: {n}"),
        (0x6D, 0x00) => "Error: Instruction code not supported or invalid".to_string(),
        (0x6E, 0x00) => "Error: Class not supported".to_string(),
        (0x6F, 0x00) => "Error: No precise diagnosis".to_string(),
        _ => format!("Unknown status: {sw1:02X} {sw2:02X}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_various_formats() {
        assert_eq!(parse_hex("0102030A").unwrap(), vec![0x01, 0x02, 0x03, 0x0A]);
        assert_eq!(
            parse_hex("01 02 03 0A").unwrap(),
            vec![0x01, 0x02, 0x03, 0x0A]
        );
        assert_eq!(
            parse_hex("0x01,0x02,0x03,0x0A").unwrap(),
            vec![0x01, 0x02, 0x03, 0x0A]
        );
        assert_eq!(
            parse_hex("01-02-03-0A").unwrap(),
            vec![0x01, 0x02, 0x03, 0x0A]
        );
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_hex("abcdef").unwrap(), vec![0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn test_parse_hex_invalid() {
        assert!(parse_hex("0102030").is_err()); // Odd length
        assert!(parse_hex("0102G30A").is_err()); // Invalid hex character
    }

    #[test]
    fn test_format_functions() {
        let bytes = vec![0x04, 0xA2, 0xB3, 0x0A];
        assert_eq!(format_hex(&bytes), "04A2B30A");
        assert_eq!(format_hex_spaced(&bytes), "04 A2 B3 0A");
        assert_eq!(format_hex_dashed(&bytes), "04-A2-B3-0A");
        assert_eq!(format_hex_spaced(&[]), "");
        assert_eq!(hex_to_dashed("04A2B3"), "04-A2-B3");
        assert_eq!(hex_to_dashed("XYZ"), "XYZ");
    }

    #[test]
    fn test_bit_expansion() {
        assert_eq!(bytes_to_bits(&[0x80, 0x01]), "1000000000000001");
        assert_eq!(bits_grouped(&[0xF0, 0x0F]), "11110000 00001111");
        assert_eq!(bytes_to_bits(&[]), "");
    }

    #[test]
    fn test_lower_bits() {
        let bytes = [0xFF, 0xFF, 0xAB, 0xCD];
        assert_eq!(lower_bits(&bytes, 16).unwrap(), vec![0xAB, 0xCD]);
        // 19 bits: only the low 3 bits of the second 0xFF survive
        assert_eq!(lower_bits(&bytes, 19).unwrap(), vec![0x07, 0xAB, 0xCD]);
        assert_eq!(lower_bits(&bytes, 32).unwrap(), bytes.to_vec());
        assert!(lower_bits(&bytes, 33).is_none());
        assert!(lower_bits(&bytes, 0).is_none());
    }

    #[test]
    fn test_lower_bits_string() {
        let bytes = [0x00, 0x05];
        assert_eq!(lower_bits_string(&bytes, 3).unwrap(), "101");
        assert_eq!(lower_bits_string(&bytes, 16).unwrap().len(), 16);
        assert!(lower_bits_string(&bytes, 17).is_none());
    }

    #[test]
    fn test_read_ber_length() {
        assert_eq!(read_ber_length(&[0x19], 0).unwrap(), (0x19, 1));
        assert_eq!(read_ber_length(&[0x00, 0x81, 0xC8], 1).unwrap(), (200, 2));
        assert_eq!(read_ber_length(&[0x82, 0x01, 0x2C], 0).unwrap(), (300, 3));
        assert!(read_ber_length(&[0x82, 0x01], 0).is_err());
        assert!(read_ber_length(&[0x80], 0).is_err());
        assert!(read_ber_length(&[], 0).is_err());
    }

    #[test]
    fn test_find_tlv() {
        let data = [0x5C, 0x02, 0x01, 0x00, 0x5A, 0x01, 0xFF];
        assert_eq!(find_tlv(&data, 0x5C), Some(&[0x01, 0x00][..]));
        assert_eq!(find_tlv(&data, 0x5A), Some(&[0xFF][..]));
        assert_eq!(find_tlv(&data, 0x9E), None);
        // Truncated value
        assert_eq!(find_tlv(&[0x5C, 0x05, 0x01], 0x5C), None);
    }

    #[test]
    fn test_describe_status_word() {
        assert_eq!(describe_status_word(0x90, 0x00), "Success");
        assert_eq!(
            describe_status_word(0x61, 0x10),
            "Success, 16 bytes available"
        );
        assert_eq!(describe_status_word(0x6A, 0x82), "Error: File not found");
        assert_eq!(describe_status_word(0x91, 0xAE), "DESFire: AUTHENTICATION_ERROR");
        assert_eq!(describe_status_word(0x12, 0x34), "Unknown status: 12 34");
    }

    #[test]
    fn test_clean_hex_string() {
        assert_eq!(clean_hex_string("0x01,0x02"), "0102");
        assert_eq!(clean_hex_string("01:02:03"), "010203");
        assert_eq!(clean_hex_string("\t01\n02\r"), "0102");
    }
}
