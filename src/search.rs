//! Query evaluation over the flat index.
//!
//! Matching is a case-insensitive substring test against the full path.
//! Size and creation-date filters force a fresh metadata read; entries whose
//! path has vanished since the last journal batch are skipped silently.
//! Metadata access is injected so the filter logic stays testable without a
//! live volume.

use std::io;

use crate::types::{IndexedFile, SearchRow};
use crate::winutil::{is_path_missing, FileMetadata};

pub(crate) const DEFAULT_RESULT_LIMIT: u32 = 200;
pub(crate) const MAX_RESULT_LIMIT: u32 = 5000;

/// One search request. `min_size`/`max_size` default to the full range and
/// `min_created_unix`/`max_created_unix` to the full timeline; leaving them
/// there keeps the metadata filters off. `limit` of 0 means the default.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub extension: String,
    pub min_size: u64,
    pub max_size: u64,
    pub min_created_unix: i64,
    pub max_created_unix: i64,
    pub limit: u32,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            extension: String::new(),
            min_size: 0,
            max_size: u64::MAX,
            min_created_unix: i64::MIN,
            max_created_unix: i64::MAX,
            limit: 0,
        }
    }
}

pub(crate) fn effective_limit(requested: u32) -> u32 {
    if requested == 0 {
        DEFAULT_RESULT_LIMIT
    } else {
        requested.min(MAX_RESULT_LIMIT)
    }
}

/// Lowercases and strips any run of leading dots, so `...mp4` and `.mp4`
/// both filter on `mp4`.
pub(crate) fn normalize_extension_filter(raw: &str) -> String {
    raw.trim_start_matches('.').to_lowercase()
}

fn is_directory_sentinel(extension: &str) -> bool {
    matches!(extension, "folder" | "folders" | "dir" | "directory")
}

/// Substring match with the needle already lowercased. ASCII needles use a
/// byte-wise scan; anything else falls back to a lowercased copy.
pub(crate) fn contains_case_insensitive(haystack: &str, needle_lower: &str) -> bool {
    if needle_lower.is_empty() {
        return true;
    }
    if needle_lower.is_ascii() {
        return contains_ascii_case_insensitive(haystack, needle_lower);
    }
    haystack.to_lowercase().contains(needle_lower)
}

fn contains_ascii_case_insensitive(haystack: &str, needle_lower: &str) -> bool {
    let h = haystack.as_bytes();
    let n = needle_lower.as_bytes();
    if n.len() > h.len() {
        return false;
    }

    if n.len() == 1 {
        let b = n[0];
        return h.iter().any(|ch| ch.to_ascii_lowercase() == b);
    }

    let first = n[0];
    for start in 0..=h.len() - n.len() {
        if h[start].to_ascii_lowercase() != first {
            continue;
        }
        if h[start + 1..start + n.len()]
            .iter()
            .zip(&n[1..])
            .all(|(ch, expected)| ch.to_ascii_lowercase() == *expected)
        {
            return true;
        }
    }

    false
}

/// Bucket key for the all-drives round-robin: the uppercase drive letter,
/// `#` for UNC paths, `?` for anything else.
fn drive_bucket_key(path: &str) -> char {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return bytes[0].to_ascii_uppercase() as char;
    }
    if path.starts_with("\\\\") {
        return '#';
    }
    '?'
}

pub(crate) fn run_search<F>(
    files: &[IndexedFile],
    request: &SearchRequest,
    all_drives_mode: bool,
    read_metadata: F,
) -> Vec<SearchRow>
where
    F: Fn(&str) -> io::Result<FileMetadata>,
{
    let limit = effective_limit(request.limit) as usize;
    let query_lower = request.query.to_lowercase();
    let extension_filter = normalize_extension_filter(&request.extension);
    let has_extension_filter = !extension_filter.is_empty();
    let extension_targets_directories = is_directory_sentinel(&extension_filter);
    let has_size_filter = request.min_size > 0 || request.max_size < u64::MAX;
    let has_date_filter =
        request.min_created_unix > i64::MIN || request.max_created_unix < i64::MAX;
    let requires_metadata = has_size_filter || has_date_filter;
    let distribute_across_drives = all_drives_mode
        && limit > 1
        && query_lower.is_empty()
        && (has_extension_filter || has_size_filter || has_date_filter);

    let mut rows: Vec<SearchRow> = Vec::with_capacity(limit.min(1024));
    // Insertion-ordered buckets; there are at most a couple dozen drives.
    let mut drive_buckets: Vec<(char, Vec<SearchRow>)> = Vec::new();

    for file in files {
        if !contains_case_insensitive(&file.path, &query_lower) {
            continue;
        }
        if has_extension_filter {
            if extension_targets_directories {
                if !file.is_directory {
                    continue;
                }
            } else if file.is_directory || file.extension_lower != extension_filter {
                continue;
            }
        }

        let metadata = match read_metadata(&file.path) {
            Ok(metadata) => Some(metadata),
            Err(err) if is_path_missing(&err) => continue,
            Err(_) => None,
        };

        if requires_metadata {
            let Some(metadata) = metadata else {
                continue;
            };
            if metadata.size < request.min_size || metadata.size > request.max_size {
                continue;
            }
            if metadata.created_unix < request.min_created_unix
                || metadata.created_unix > request.max_created_unix
            {
                continue;
            }
        }

        let metadata = metadata.unwrap_or_default();
        let row = SearchRow {
            name: file.name.clone(),
            path: file.path.clone(),
            extension: file.extension_lower.clone(),
            size: metadata.size,
            created_unix: metadata.created_unix,
            modified_unix: metadata.modified_unix,
            is_directory: file.is_directory,
        };

        if distribute_across_drives {
            let key = drive_bucket_key(&file.path);
            match drive_buckets.iter_mut().find(|(bucket_key, _)| *bucket_key == key) {
                Some((_, bucket)) => bucket.push(row),
                None => drive_buckets.push((key, vec![row])),
            }
        } else {
            rows.push(row);
            if rows.len() >= limit {
                break;
            }
        }
    }

    if distribute_across_drives {
        let mut offsets = vec![0usize; drive_buckets.len()];
        let mut appended = true;
        while rows.len() < limit && appended {
            appended = false;
            for (bucket_index, (_, bucket)) in drive_buckets.iter().enumerate() {
                let offset = &mut offsets[bucket_index];
                if *offset >= bucket.len() {
                    continue;
                }
                rows.push(bucket[*offset].clone());
                *offset += 1;
                appended = true;
                if rows.len() >= limit {
                    break;
                }
            }
        }
    }

    rows
}
