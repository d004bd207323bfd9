use std::collections::HashMap;

use serde::Serialize;

/// Volume-local file reference number. NTFS hands out 64-bit identifiers in
/// V2 journal records; 128-bit V3 identifiers are truncated to their low
/// 64 bits on decode, for parent and child alike.
pub type Frn = u64;

/// One MFT entry as seen through the journal: who contains it and what it
/// is called. The root directory is stored with `parent_frn` pointing at
/// itself and an empty name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub parent_frn: Frn,
    pub name: String,
    pub is_directory: bool,
}

/// A search-ready row in the flat index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFile {
    pub frn: Frn,
    pub name: String,
    pub path: String,
    pub extension_lower: String,
    pub is_directory: bool,
}

impl IndexedFile {
    pub(crate) fn new(frn: Frn, name: &str, path: String, is_directory: bool) -> Self {
        Self {
            frn,
            name: name.to_string(),
            path,
            extension_lower: if is_directory {
                String::new()
            } else {
                extension_lower_of(name)
            },
            is_directory,
        }
    }
}

/// Lowercased extension of a file name, without the dot. A leading dot
/// (hidden-file style) or a trailing dot yields no extension.
pub fn extension_lower_of(name: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < name.len() => name[dot + 1..].to_lowercase(),
        _ => String::new(),
    }
}

/// Where the change journal stands. Captured when the journal is queried at
/// the start of enumeration; the watcher resumes from exactly this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JournalPosition {
    pub journal_id: u64,
    pub next_usn: i64,
}

impl JournalPosition {
    pub fn supports_live_updates(&self) -> bool {
        self.journal_id != 0 && self.next_usn > 0
    }
}

/// Everything one volume scan produces: the flat rows, the node map they
/// were projected from, the root identity, and the journal hand-off point.
#[derive(Debug, Default)]
pub struct ScanSnapshot {
    pub files: Vec<IndexedFile>,
    pub nodes: HashMap<Frn, Node>,
    pub root_frn: Frn,
    pub root_path: String,
    pub journal: JournalPosition,
    pub live_updates_supported: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRow {
    pub name: String,
    pub path: String,
    pub extension: String,
    pub size: u64,
    pub created_unix: i64,
    pub modified_unix: i64,
    pub is_directory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateFileRow {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub created_unix: i64,
    pub modified_unix: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroupRow {
    pub group_id: String,
    pub size: u64,
    pub total_bytes: u64,
    pub file_count: u32,
    pub files: Vec<DuplicateFileRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveRow {
    pub letter: String,
    pub path: String,
    pub filesystem: String,
    pub drive_type: String,
    pub is_ntfs: bool,
    pub can_open_volume: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateScanStatus {
    pub running: bool,
    pub cancel_requested: bool,
    pub scanned_files: u64,
    pub total_files: u64,
    pub groups_found: u64,
    pub progress_percent: f64,
}

/// Minimal row for the one-shot scan export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicFileRow {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
}
