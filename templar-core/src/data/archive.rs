use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::decode_text;

/// Little-endian signature of a ZIP local file header ("PK\x03\x04").
pub const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;

const LOCAL_HEADER_LEN: usize = 30;
const METHOD_STORED: u16 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("ZIP entry at offset {offset} runs past the end of the archive")]
    Truncated { offset: usize },
}

/// Entries recovered from an archive, in archive order.
#[derive(Debug, Clone, Default)]
pub struct ArchiveContents {
    /// Entry path → decoded text. A repeated path keeps its first position
    /// and the last content.
    pub entries: IndexMap<String, String>,
    /// Entries skipped because they use a compression method.
    pub skipped_compressed: Vec<String>,
}

impl ArchiveContents {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Scan `bytes` for local file headers and decode every stored entry.
///
/// Only entries with compression method 0 are read; anything else is logged
/// and listed in `skipped_compressed`. Directory markers (names ending in
/// `/`) are ignored. The central directory is never consulted and CRCs are
/// not checked.
pub fn read_archive(bytes: &[u8]) -> Result<ArchiveContents, ArchiveError> {
    let mut contents = ArchiveContents::default();
    let mut offset = 0usize;

    while offset + LOCAL_HEADER_LEN < bytes.len() {
        if read_u32(bytes, offset) != LOCAL_HEADER_SIGNATURE {
            offset += 1;
            continue;
        }

        let method = read_u16(bytes, offset + 8);
        let compressed_size = read_u32(bytes, offset + 18) as usize;
        let name_len = read_u16(bytes, offset + 26) as usize;
        let extra_len = read_u16(bytes, offset + 28) as usize;

        let name_start = offset + LOCAL_HEADER_LEN;
        let name_end = name_start + name_len;
        let data_start = name_end + extra_len;
        let data_end = data_start
            .checked_add(compressed_size)
            .ok_or(ArchiveError::Truncated { offset })?;
        if name_end > bytes.len() {
            return Err(ArchiveError::Truncated { offset });
        }

        let name = String::from_utf8_lossy(&bytes[name_start..name_end]).into_owned();

        if !name.ends_with('/') {
            if method == METHOD_STORED {
                if data_end > bytes.len() {
                    return Err(ArchiveError::Truncated { offset });
                }
                let content = decode_text(&bytes[data_start..data_end]);
                debug!("read stored entry '{}' ({} bytes)", name, compressed_size);
                contents.entries.insert(name, content);
            } else {
                warn!(
                    "skipping compressed entry '{}' (method {}); only stored entries are supported",
                    name, method
                );
                contents.skipped_compressed.push(name);
            }
        }

        offset = data_end;
    }

    Ok(contents)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal archive: local headers, data, then a central directory.
    pub(crate) fn zip_with(entries: &[(&str, u16, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        for (name, method, data) in entries {
            let header_offset = out.len() as u32;
            out.extend_from_slice(&LOCAL_HEADER_SIGNATURE.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes()); // version needed
            out.extend_from_slice(&0u16.to_le_bytes()); // flags
            out.extend_from_slice(&method.to_le_bytes());
            out.extend_from_slice(&[0u8; 8]); // time, date, crc
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(data);

            central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
            central.extend_from_slice(&[0u8; 24]);
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&[0u8; 12]);
            central.extend_from_slice(&header_offset.to_le_bytes());
            central.extend_from_slice(name.as_bytes());
        }
        out.extend_from_slice(&central);
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 18]);
        out
    }

    pub(crate) fn stored_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let with_method: Vec<(&str, u16, &[u8])> = entries
            .iter()
            .map(|(n, c)| (*n, METHOD_STORED, c.as_bytes()))
            .collect();
        zip_with(&with_method)
    }

    #[test]
    fn test_reads_every_stored_entry() {
        let zip = stored_zip(&[
            ("nda.json", r#"{"name":"NDA"}"#),
            ("nda.md", "# NDA\nGuidance"),
            ("docs/lease.txt", "Lease text"),
        ]);
        let contents = read_archive(&zip).unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents.entries["nda.json"], r#"{"name":"NDA"}"#);
        assert_eq!(contents.entries["docs/lease.txt"], "Lease text");
        let names: Vec<&String> = contents.entries.keys().collect();
        assert_eq!(names, vec!["nda.json", "nda.md", "docs/lease.txt"]);
    }

    #[test]
    fn test_skips_directory_markers() {
        let zip = stored_zip(&[("templates/", ""), ("templates/nda.json", "{}")]);
        let contents = read_archive(&zip).unwrap();
        assert_eq!(contents.len(), 1);
        assert!(contents.entries.keys().all(|k| !k.ends_with('/')));
    }

    #[test]
    fn test_skips_compressed_entries() {
        let zip = zip_with(&[
            ("packed.json", 8, b"\x4b\x4c\x02\x00"),
            ("plain.json", 0, b"{}"),
        ]);
        let contents = read_archive(&zip).unwrap();
        assert_eq!(contents.len(), 1);
        assert!(contents.entries.contains_key("plain.json"));
        assert_eq!(contents.skipped_compressed, vec!["packed.json".to_string()]);
    }

    #[test]
    fn test_empty_input_yields_no_entries() {
        assert!(read_archive(&[]).unwrap().is_empty());
        let empty_zip = zip_with(&[]);
        assert!(read_archive(&empty_zip).unwrap().is_empty());
    }

    #[test]
    fn test_leading_garbage_is_scanned_past() {
        let mut bytes = b"junk before the archive".to_vec();
        bytes.extend(stored_zip(&[("a.txt", "alpha")]));
        let contents = read_archive(&bytes).unwrap();
        assert_eq!(contents.entries["a.txt"], "alpha");
    }

    #[test]
    fn test_truncated_entry_is_an_error() {
        let mut zip = stored_zip(&[("a.txt", "a fairly long body of text")]);
        zip.truncate(40);
        assert_eq!(
            read_archive(&zip).unwrap_err(),
            ArchiveError::Truncated { offset: 0 }
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let zip = zip_with(&[("bad.txt", 0, &[0x66, 0xff, 0x6f])]);
        let contents = read_archive(&zip).unwrap();
        assert_eq!(contents.entries["bad.txt"], "f\u{fffd}o");
    }

    #[test]
    fn test_byte_order_mark_is_dropped() {
        let zip = zip_with(&[("nda.json", 0, b"\xEF\xBB\xBF{}")]);
        let contents = read_archive(&zip).unwrap();
        assert_eq!(contents.entries["nda.json"], "{}");
    }
}
