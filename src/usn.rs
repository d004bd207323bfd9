//! Byte-level decoding of USN change-journal records.
//!
//! Both ioctl outputs this crate consumes (`FSCTL_ENUM_USN_DATA` and
//! `FSCTL_READ_USN_JOURNAL`) share the same framing: an 8-byte
//! continuation value (next start FRN, or next USN) followed by packed
//! variable-length records. Records come in two wire versions: V2 carries
//! 64-bit file references, V3 carries 128-bit ones that are truncated to
//! their low 64 bits here, consistently for child and parent.

use crate::types::Frn;

pub const USN_REASON_FILE_DELETE: u32 = 0x0000_0200;
pub const USN_REASON_RENAME_OLD_NAME: u32 = 0x0000_1000;
pub const USN_REASON_RENAME_NEW_NAME: u32 = 0x0000_2000;

const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;

const V2_HEADER_LEN: usize = 60;
const V3_HEADER_LEN: usize = 76;

/// One decoded journal record. Records with an empty name never leave the
/// decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsnRecord {
    pub frn: Frn,
    pub parent_frn: Frn,
    pub reason: u32,
    pub is_directory: bool,
    pub name: String,
}

/// Splits an ioctl output buffer into its 8-byte continuation prefix and
/// the packed records that follow. `None` when the buffer is too short to
/// carry even the prefix.
pub fn split_output_buffer(buffer: &[u8]) -> Option<(u64, &[u8])> {
    if buffer.len() < 8 {
        return None;
    }
    let next = u64::from_le_bytes(buffer[..8].try_into().ok()?);
    Some((next, &buffer[8..]))
}

/// Decodes every well-formed record in `records`. Unknown major versions,
/// malformed name bounds, and empty names are skipped; a zero or
/// buffer-overrunning record length ends the walk.
pub fn decode_records(records: &[u8]) -> Vec<UsnRecord> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    while offset + 8 <= records.len() {
        let Some(record_length) = read_u32(records, offset).map(|value| value as usize) else {
            break;
        };
        if record_length < 8 || offset + record_length > records.len() {
            break;
        }
        if let Some(record) = decode_one(&records[offset..offset + record_length]) {
            out.push(record);
        }
        offset += record_length;
    }

    out
}

fn decode_one(data: &[u8]) -> Option<UsnRecord> {
    let major_version = read_u16(data, 4)?;

    let (frn, parent_frn, reason, attributes, name_length, name_offset) = match major_version {
        2 => {
            if data.len() < V2_HEADER_LEN {
                return None;
            }
            (
                read_u64(data, 8)?,
                read_u64(data, 16)?,
                read_u32(data, 40)?,
                read_u32(data, 52)?,
                read_u16(data, 56)? as usize,
                read_u16(data, 58)? as usize,
            )
        }
        3 => {
            if data.len() < V3_HEADER_LEN {
                return None;
            }
            // 128-bit identifiers: keep the low 64 bits.
            (
                read_u64(data, 8)?,
                read_u64(data, 24)?,
                read_u32(data, 56)?,
                read_u32(data, 68)?,
                read_u16(data, 72)? as usize,
                read_u16(data, 74)? as usize,
            )
        }
        _ => return None,
    };

    if name_offset + name_length > data.len() {
        return None;
    }

    let name_bytes = &data[name_offset..name_offset + name_length];
    let name_utf16: Vec<u16> = name_bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let name = String::from_utf16_lossy(&name_utf16);
    if name.is_empty() {
        return None;
    }

    Some(UsnRecord {
        frn,
        parent_frn,
        reason,
        is_directory: attributes & FILE_ATTRIBUTE_DIRECTORY != 0,
        name,
    })
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u16::from_le_bytes)
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_v2(frn: u64, parent_frn: u64, reason: u32, attributes: u32, name: &str) -> Vec<u8> {
        let name_utf16: Vec<u8> = name
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        let record_length = (V2_HEADER_LEN + name_utf16.len() + 7) / 8 * 8;

        let mut record = vec![0u8; record_length];
        record[0..4].copy_from_slice(&(record_length as u32).to_le_bytes());
        record[4..6].copy_from_slice(&2u16.to_le_bytes());
        record[8..16].copy_from_slice(&frn.to_le_bytes());
        record[16..24].copy_from_slice(&parent_frn.to_le_bytes());
        record[40..44].copy_from_slice(&reason.to_le_bytes());
        record[52..56].copy_from_slice(&attributes.to_le_bytes());
        record[56..58].copy_from_slice(&(name_utf16.len() as u16).to_le_bytes());
        record[58..60].copy_from_slice(&(V2_HEADER_LEN as u16).to_le_bytes());
        record[V2_HEADER_LEN..V2_HEADER_LEN + name_utf16.len()].copy_from_slice(&name_utf16);
        record
    }

    fn encode_v3(
        frn_low: u64,
        frn_high: u64,
        parent_low: u64,
        reason: u32,
        attributes: u32,
        name: &str,
    ) -> Vec<u8> {
        let name_utf16: Vec<u8> = name
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        let record_length = (V3_HEADER_LEN + name_utf16.len() + 7) / 8 * 8;

        let mut record = vec![0u8; record_length];
        record[0..4].copy_from_slice(&(record_length as u32).to_le_bytes());
        record[4..6].copy_from_slice(&3u16.to_le_bytes());
        record[8..16].copy_from_slice(&frn_low.to_le_bytes());
        record[16..24].copy_from_slice(&frn_high.to_le_bytes());
        record[24..32].copy_from_slice(&parent_low.to_le_bytes());
        record[56..60].copy_from_slice(&reason.to_le_bytes());
        record[68..72].copy_from_slice(&attributes.to_le_bytes());
        record[72..74].copy_from_slice(&(name_utf16.len() as u16).to_le_bytes());
        record[74..76].copy_from_slice(&(V3_HEADER_LEN as u16).to_le_bytes());
        record[V3_HEADER_LEN..V3_HEADER_LEN + name_utf16.len()].copy_from_slice(&name_utf16);
        record
    }

    #[test]
    fn v2_record_decodes_all_fields() {
        let bytes = encode_v2(42, 5, USN_REASON_RENAME_NEW_NAME, FILE_ATTRIBUTE_DIRECTORY, "docs");
        let records = decode_records(&bytes);
        assert_eq!(
            records,
            vec![UsnRecord {
                frn: 42,
                parent_frn: 5,
                reason: USN_REASON_RENAME_NEW_NAME,
                is_directory: true,
                name: "docs".to_string(),
            }]
        );
    }

    #[test]
    fn v3_identifiers_truncate_to_low_64_bits() {
        let bytes = encode_v3(0xDEAD_BEEF, 0xFFFF_FFFF, 0x77, USN_REASON_FILE_DELETE, 0, "a.txt");
        let records = decode_records(&bytes);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frn, 0xDEAD_BEEF);
        assert_eq!(records[0].parent_frn, 0x77);
        assert!(!records[0].is_directory);
    }

    #[test]
    fn name_bounds_are_validated() {
        let mut bytes = encode_v2(1, 2, 0, 0, "name.txt");
        // Claim a name that runs past the record.
        bytes[56..58].copy_from_slice(&512u16.to_le_bytes());
        assert!(decode_records(&bytes).is_empty());
    }

    #[test]
    fn unknown_versions_are_skipped_not_fatal() {
        let mut unknown = encode_v2(1, 2, 0, 0, "skipped");
        unknown[4..6].copy_from_slice(&9u16.to_le_bytes());
        let mut buffer = unknown;
        buffer.extend_from_slice(&encode_v2(3, 4, 0, 0, "kept.txt"));

        let records = decode_records(&buffer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "kept.txt");
    }

    #[test]
    fn empty_names_are_discarded() {
        let bytes = encode_v2(1, 2, 0, 0, "");
        assert!(decode_records(&bytes).is_empty());
    }

    #[test]
    fn zero_record_length_stops_the_walk() {
        let mut buffer = encode_v2(1, 2, 0, 0, "first.txt");
        buffer.extend_from_slice(&[0u8; 16]);
        let records = decode_records(&buffer);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn truncated_tail_record_is_ignored() {
        let mut buffer = encode_v2(1, 2, 0, 0, "whole.txt");
        let mut partial = encode_v2(3, 4, 0, 0, "partial.txt");
        partial.truncate(20);
        buffer.extend_from_slice(&partial);
        let records = decode_records(&buffer);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "whole.txt");
    }

    #[test]
    fn decoding_is_a_pure_projection() {
        let bytes = encode_v2(9, 1, USN_REASON_RENAME_OLD_NAME, 0, "stable.txt");
        let first = decode_records(&bytes);
        let re_encoded = encode_v2(
            first[0].frn,
            first[0].parent_frn,
            first[0].reason,
            0,
            &first[0].name,
        );
        assert_eq!(decode_records(&re_encoded), first);
    }

    #[test]
    fn output_buffer_prefix_is_split_off() {
        let mut buffer = 0x1234u64.to_le_bytes().to_vec();
        buffer.extend_from_slice(&encode_v2(1, 2, 0, 0, "x.bin"));
        let (next, records) = split_output_buffer(&buffer).unwrap();
        assert_eq!(next, 0x1234);
        assert_eq!(decode_records(records).len(), 1);

        assert!(split_output_buffer(&[0u8; 4]).is_none());
    }

    #[test]
    fn arbitrary_bytes_never_panic() {
        for seed in 0u8..32 {
            let junk: Vec<u8> = (0..97).map(|i| (i as u8).wrapping_mul(seed).wrapping_add(seed)).collect();
            let _ = decode_records(&junk);
        }
    }
}
