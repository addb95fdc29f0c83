//! ELM327 command-interpreter dialect driver.

use crate::types::{CanId, Pid};

/// Correct nibble to uppercase hex ASCII digit.
///
/// The firmware this was ported from computed `nibble + '0'` and patched it
/// up after the fact with a helper that only handled part of the range.
/// This is Open Question 2, resolved by just doing the conversion
/// correctly.
#[must_use]
pub fn nibble_to_hex_upper(nibble: u8) -> u8 {
    match nibble & 0x0F {
        n @ 0..=9 => b'0' + n,
        n => b'A' + (n - 10),
    }
}

/// Render the diagnostic query as the ASCII-hex string ELM327 expects:
/// `SSPP[EE]` for an 8-bit PID, `SSPPPPPP[EE]` for a 16-bit PID, where `EE`
/// is `expected_bytes` as a single hex digit.
#[must_use]
pub fn encode_elm_query(service: u8, pid: Pid, expected_bytes: u8) -> String {
    let mut out = hex::encode_upper([service]);
    match pid {
        Pid::Short(p) => out.push_str(&hex::encode_upper([p])),
        Pid::Long(p) => out.push_str(&hex::encode_upper(p.to_be_bytes())),
    }
    out.push(nibble_to_hex_upper(expected_bytes) as char);
    out
}

/// Render an `AT SH` header command, truncating 29-bit `0x18xxyyzz` headers
/// to their final six hex digits.
#[must_use]
pub fn encode_header_command(id: CanId) -> String {
    let hex = format!("{:X}", id.raw());
    let hex = if hex.len() > 6 { &hex[2..] } else { &hex[..] };
    format!("AT SH {hex}")
}

/// Error sentinels recognized in a raw ELM327 response block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElmSentinel {
    UnableToConnect,
    NoData,
    Stopped,
    Error,
}

/// Scan `raw` for the known error sentinels, in the priority order the
/// original checks them (later matches overwrite earlier ones, so `ERROR`
/// wins if both `NODATA` and `ERROR` appear in the same block).
#[must_use]
pub fn find_sentinel(raw: &str) -> Option<ElmSentinel> {
    let mut found = None;
    if raw.contains("UNABLETOCONNECT") {
        found = Some(ElmSentinel::UnableToConnect);
    }
    if raw.contains("NODATA") {
        found = Some(ElmSentinel::NoData);
    }
    if raw.contains("STOPPED") {
        found = Some(ElmSentinel::Stopped);
    }
    if raw.contains("ERROR") {
        found = Some(ElmSentinel::Error);
    }
    found
}

/// The decoded content of a complete ELM327 response block.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedElmResponse {
    pub multi_frame: bool,
    pub response_service: u8,
    pub response_pid: Pid,
    pub data: Vec<u8>,
}

/// Decode a complete ELM327 response block.
///
/// `raw` is the accumulated, already-filtered text (alphanumeric plus `:`
/// and `.`) up to but not including the terminating `>`. `pid_is_long`
/// selects whether the response PID is 8 or 16 bits, matching the request.
///
/// Returns `None` if the block doesn't contain at least a response SID and
/// PID, or if the leading byte decodes to zero (no data).
#[must_use]
pub fn decode_response_block(raw: &str, pid_is_long: bool) -> Option<DecodedElmResponse> {
    let multi_frame = raw.contains(':');

    let hex_payload: String = if multi_frame {
        // The field before the first ':' is a declared byte count we don't
        // need (the whole block has already arrived by the time '>' shows
        // up); drop it and the remaining ':' separators to get a flat hex
        // string.
        raw.split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or("")
            .chars()
            .filter(|c| *c != ':')
            .collect()
    } else {
        raw.to_string()
    };

    let bytes = hex_pairs_to_bytes(&hex_payload);
    if bytes.is_empty() || bytes[0] == 0 {
        return None;
    }

    let response_service = bytes[0].wrapping_sub(0x40);
    let (response_pid, data) = if pid_is_long {
        if bytes.len() < 3 {
            return None;
        }
        (Pid::Long(u16::from_be_bytes([bytes[1], bytes[2]])), bytes[3..].to_vec())
    } else {
        if bytes.len() < 2 {
            return None;
        }
        (Pid::Short(bytes[1]), bytes[2..].to_vec())
    };

    Some(DecodedElmResponse {
        multi_frame,
        response_service,
        response_pid,
        data,
    })
}

/// Decode hex-digit pairs into bytes, dropping a trailing unpaired digit.
fn hex_pairs_to_bytes(hex_str: &str) -> Vec<u8> {
    let even_len = hex_str.len() - (hex_str.len() % 2);
    hex::decode(&hex_str[..even_len]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_nibble_to_hex_upper_covers_all_nibbles() {
        let expected = "0123456789ABCDEF";
        for n in 0u8..16 {
            assert_eq!(nibble_to_hex_upper(n) as char, expected.as_bytes()[n as usize] as char);
        }
    }

    #[test]
    fn test_encode_elm_query_short_pid() {
        // S6: service 0x01, pid 0x05, expected_bytes 1
        assert_eq!(encode_elm_query(0x01, Pid::Short(0x05), 1), "01051");
    }

    #[test]
    fn test_encode_elm_query_long_pid() {
        assert_eq!(encode_elm_query(0x22, Pid::Long(0x1003), 4), "2210034");
    }

    #[test]
    fn test_encode_header_command_standard() {
        assert_eq!(encode_header_command(CanId::Standard(0x7DF)), "AT SH 7DF");
    }

    #[test]
    fn test_encode_header_command_extended_truncates() {
        // 29-bit 0x18DB33F1 truncates to its final six hex digits
        assert_eq!(encode_header_command(CanId::Extended(0x18DB33F1)), "AT SH DB33F1");
    }

    #[test]
    fn test_find_sentinel_priority_error_wins_over_nodata() {
        assert_eq!(find_sentinel("NODATAERROR"), Some(ElmSentinel::Error));
        assert_eq!(find_sentinel("NODATA"), Some(ElmSentinel::NoData));
        assert_eq!(find_sentinel("UNABLETOCONNECT"), Some(ElmSentinel::UnableToConnect));
        assert_eq!(find_sentinel("STOPPED"), Some(ElmSentinel::Stopped));
        assert_eq!(find_sentinel("4105C8"), None);
    }

    #[test]
    fn test_decode_response_block_single_short_pid() {
        // S6: service 0x01, pid 0x05 -> response SID 0x41, PID 0x05, data 0xC8
        let decoded = decode_response_block("4105C8", false).unwrap();
        assert_eq!(
            decoded,
            DecodedElmResponse {
                multi_frame: false,
                response_service: 0x01,
                response_pid: Pid::Short(0x05),
                data: vec![0xC8],
            }
        );
    }

    #[test]
    fn test_decode_response_block_multi_frame_strips_colons() {
        // S2-style: leading length field before first ':' is dropped.
        let decoded = decode_response_block("14:490201000000:0000000000000000", false).unwrap();
        assert!(decoded.multi_frame);
        assert_eq!(decoded.response_service, 0x09);
        assert_eq!(decoded.response_pid, Pid::Short(0x02));
    }

    #[test]
    fn test_decode_response_block_zero_leading_byte_is_none() {
        assert_eq!(decode_response_block("00", false), None);
    }

    #[test]
    fn test_decode_response_block_empty_is_none() {
        assert_eq!(decode_response_block("", false), None);
    }
}
