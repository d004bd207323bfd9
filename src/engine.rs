//! The indexing coordinator: one handle owning the index, the request
//! tokens, the mode flags, and the duplicate-scan guards.
//!
//! Exactly one writer at a time holds the index lock exclusively (a scan
//! publish or a journal batch); searches and the duplicate scanner's
//! snapshot take it shared. A new indexing request supersedes any in-flight
//! one by bumping the request token; the superseded worker notices at its
//! next loop boundary and discards its partial state without publishing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::drives;
use crate::duplicates::{find_duplicate_groups, DuplicateProgress, DuplicateScanOptions};
use crate::error::ScanError;
use crate::index::IndexState;
use crate::mft::{scan_volume, ScanContext};
use crate::search::{run_search, SearchRequest};
use crate::types::{
    BasicFileRow, DriveRow, DuplicateGroupRow, DuplicateScanStatus, IndexedFile, SearchRow,
};
use crate::watcher::start_live_watcher;
use crate::winutil::{normalize_drive_letter, read_file_metadata};

pub(crate) struct EngineState {
    pub(crate) index: RwLock<IndexState>,
    pub(crate) is_indexing: AtomicBool,
    pub(crate) is_ready: AtomicBool,
    pub(crate) indexed_count: AtomicU64,
    pub(crate) include_directories: AtomicBool,
    pub(crate) scan_all_drives: AtomicBool,
    pub(crate) request_token: AtomicU64,
    pub(crate) watcher_epoch: AtomicU64,
    pub(crate) duplicates: DuplicateProgress,
    last_error: Mutex<String>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            index: RwLock::new(IndexState::default()),
            is_indexing: AtomicBool::new(false),
            is_ready: AtomicBool::new(false),
            indexed_count: AtomicU64::new(0),
            include_directories: AtomicBool::new(false),
            scan_all_drives: AtomicBool::new(false),
            request_token: AtomicU64::new(0),
            watcher_epoch: AtomicU64::new(0),
            duplicates: DuplicateProgress::default(),
            last_error: Mutex::new(String::new()),
        }
    }

    pub(crate) fn set_last_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = message.into();
    }

    pub(crate) fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }
}

/// The process-facing handle. The FFI layer wraps one of these in a
/// singleton; embedders using the crate directly may hold their own.
pub struct SearchEngine {
    state: Arc<EngineState>,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(EngineState::new()),
        }
    }

    /// Schedules a scan of `drive` (or of every openable NTFS volume) on a
    /// background thread and returns immediately. A request that arrives
    /// while another is in flight supersedes it.
    pub fn start_indexing(
        &self,
        drive: &str,
        include_directories: bool,
        scan_all_drives: bool,
    ) -> bool {
        let state = Arc::clone(&self.state);
        let token = state.request_token.fetch_add(1, Ordering::AcqRel) + 1;

        state.is_indexing.store(true, Ordering::Release);
        state.is_ready.store(false, Ordering::Release);
        state.indexed_count.store(0, Ordering::Release);
        state.set_last_error("");
        // Any live watcher belongs to the superseded index.
        state.watcher_epoch.fetch_add(1, Ordering::AcqRel);

        let drive = normalize_drive_letter(drive);
        state.include_directories.store(include_directories, Ordering::Release);
        state.scan_all_drives.store(scan_all_drives, Ordering::Release);
        info!(drive = %drive, include_directories, scan_all_drives, "indexing requested");

        thread::spawn(move || {
            if scan_all_drives {
                run_all_drives_job(&state, drive, include_directories, token);
            } else {
                run_single_drive_job(&state, drive, include_directories, token);
            }
        });

        true
    }

    pub fn is_indexing(&self) -> bool {
        self.state.is_indexing.load(Ordering::Acquire)
    }

    pub fn is_index_ready(&self) -> bool {
        self.state.is_ready.load(Ordering::Acquire)
    }

    pub fn indexed_file_count(&self) -> u64 {
        self.state.indexed_count.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> String {
        self.state.last_error()
    }

    pub(crate) fn set_last_error(&self, message: impl Into<String>) {
        self.state.set_last_error(message);
    }

    pub fn list_drives(&self) -> Vec<DriveRow> {
        drives::list_drives()
    }

    /// Runs one query against the current index under the shared lock.
    pub fn search(&self, request: &SearchRequest) -> Vec<SearchRow> {
        let index = self.state.index.read();
        run_search(
            index.files(),
            request,
            self.state.scan_all_drives.load(Ordering::Acquire),
            read_file_metadata,
        )
    }

    /// Runs a full duplicate scan synchronously. Refuses while the index is
    /// not ready or another scan runs; all refusals and cancellations also
    /// land in `last_error`.
    pub fn find_duplicates(
        &self,
        min_size: u64,
        max_groups: u32,
        max_files_per_group: u32,
    ) -> Result<Vec<DuplicateGroupRow>, ScanError> {
        let state = &self.state;
        if !state.is_ready.load(Ordering::Acquire) {
            let err = ScanError::IndexNotReady;
            state.set_last_error(err.to_string());
            return Err(err);
        }
        if state.duplicates.running.swap(true, Ordering::AcqRel) {
            let err = ScanError::DuplicateScanRunning;
            state.set_last_error(err.to_string());
            return Err(err);
        }

        state.duplicates.cancel_requested.store(false, Ordering::Release);
        state.duplicates.reset_counters();
        let options = DuplicateScanOptions::effective(min_size, max_groups, max_files_per_group);

        let snapshot: Vec<IndexedFile> = state.index.read().files().to_vec();
        let result = find_duplicate_groups(snapshot, options, &state.duplicates);

        state.duplicates.running.store(false, Ordering::Release);
        state.duplicates.cancel_requested.store(false, Ordering::Release);

        if let Err(err) = &result {
            state.set_last_error(err.to_string());
        }
        result
    }

    /// Signals a running duplicate scan to stop; `false` when none runs.
    pub fn cancel_duplicate_scan(&self) -> bool {
        if !self.state.duplicates.running.load(Ordering::Acquire) {
            return false;
        }
        self.state
            .duplicates
            .cancel_requested
            .store(true, Ordering::Release);
        true
    }

    pub fn duplicate_scan_status(&self) -> DuplicateScanStatus {
        self.state.duplicates.status()
    }

    /// One-shot enumeration of a drive without publishing to the index.
    pub fn scan_basic(&self, drive: &str) -> Result<Vec<BasicFileRow>, ScanError> {
        let ctx = ScanContext {
            request_token: 0,
            active_token: &self.state.request_token,
            indexed_count: &self.state.indexed_count,
        };
        let snapshot = scan_volume(normalize_drive_letter(drive), false, &ctx)?;
        Ok(snapshot
            .files
            .into_iter()
            .map(|file| BasicFileRow {
                name: file.name,
                path: file.path,
                is_directory: file.is_directory,
            })
            .collect())
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Arc<EngineState> {
        &self.state
    }
}

fn run_single_drive_job(
    state: &Arc<EngineState>,
    drive: char,
    include_directories: bool,
    token: u64,
) {
    let ctx = ScanContext {
        request_token: token,
        active_token: &state.request_token,
        indexed_count: &state.indexed_count,
    };

    match scan_volume(drive, include_directories, &ctx) {
        Err(ScanError::Cancelled) => return,
        Err(err) => {
            warn!(drive = %drive, error = %err, "indexing failed");
            state.is_ready.store(false, Ordering::Release);
            state.indexed_count.store(0, Ordering::Release);
            state.set_last_error(err.to_string());
        }
        Ok(snapshot) => {
            if ctx.is_cancelled() {
                return;
            }
            let count = snapshot.files.len() as u64;
            let journal = snapshot.journal;
            let live_updates_supported = snapshot.live_updates_supported;
            {
                let mut index = state.index.write();
                index.replace_snapshot(snapshot);
            }
            state.indexed_count.store(count, Ordering::Release);
            state.is_ready.store(true, Ordering::Release);
            state.set_last_error("");
            info!(drive = %drive, files = count, live_updates_supported, "index published");

            if live_updates_supported {
                start_live_watcher(Arc::clone(state), drive, journal);
            }
        }
    }

    if !ctx.is_cancelled() {
        state.is_indexing.store(false, Ordering::Release);
    }
}

fn run_all_drives_job(
    state: &Arc<EngineState>,
    preferred_drive: char,
    include_directories: bool,
    token: u64,
) {
    let ctx = ScanContext {
        request_token: token,
        active_token: &state.request_token,
        indexed_count: &state.indexed_count,
    };

    let targets = drives::resolve_target_drives(preferred_drive, true);
    let mut merged: Vec<IndexedFile> = Vec::new();
    let mut combined_error = String::new();
    let mut has_success = false;

    for target in targets {
        if ctx.is_cancelled() {
            return;
        }
        match scan_volume(target, include_directories, &ctx) {
            Err(ScanError::Cancelled) => return,
            Err(err) => {
                warn!(drive = %target, error = %err, "drive skipped during all-drives scan");
                if !combined_error.is_empty() {
                    combined_error.push_str(" | ");
                }
                combined_error.push_str(&format!("{target}: {err}"));
            }
            Ok(snapshot) => {
                has_success = true;
                merged.extend(snapshot.files);
                state.indexed_count.store(merged.len() as u64, Ordering::Release);
            }
        }
    }

    if ctx.is_cancelled() {
        return;
    }

    if has_success {
        let count = merged.len() as u64;
        {
            let mut index = state.index.write();
            index.replace_flat_only(merged);
        }
        state.indexed_count.store(count, Ordering::Release);
        state.is_ready.store(true, Ordering::Release);
        state.set_last_error("");
        info!(files = count, "all-drives index published");
    } else {
        state.is_ready.store(false, Ordering::Release);
        state.indexed_count.store(0, Ordering::Release);
        state.set_last_error(if combined_error.is_empty() {
            "Unknown indexing error.".to_string()
        } else {
            combined_error
        });
    }

    if !ctx.is_cancelled() {
        state.is_indexing.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::types::{Node, ScanSnapshot};

    #[cfg(not(target_os = "windows"))]
    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        use std::time::{Duration, Instant};

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn publish_ready_index(engine: &SearchEngine, files: Vec<IndexedFile>) {
        let state = engine.state();
        let mut nodes = std::collections::HashMap::new();
        nodes.insert(
            5,
            Node {
                parent_frn: 5,
                name: String::new(),
                is_directory: true,
            },
        );
        let count = files.len() as u64;
        state.index.write().replace_snapshot(ScanSnapshot {
            files,
            nodes,
            root_frn: 5,
            root_path: "C:\\".to_string(),
            ..ScanSnapshot::default()
        });
        state.indexed_count.store(count, Ordering::Release);
        state.is_ready.store(true, Ordering::Release);
    }

    #[test]
    fn fresh_engine_reports_idle_empty_state() {
        let engine = SearchEngine::new();
        assert!(!engine.is_indexing());
        assert!(!engine.is_index_ready());
        assert_eq!(engine.indexed_file_count(), 0);
        assert_eq!(engine.last_error(), "");
        assert!(!engine.cancel_duplicate_scan());
    }

    #[test]
    fn duplicates_refuse_before_the_index_is_ready() {
        let engine = SearchEngine::new();
        let result = engine.find_duplicates(0, 0, 0);
        assert_eq!(result, Err(ScanError::IndexNotReady));
        assert!(engine.last_error().contains("not ready"));
    }

    #[test]
    fn duplicate_status_is_idle_between_scans() {
        let engine = SearchEngine::new();
        let status = engine.duplicate_scan_status();
        assert!(!status.running);
        assert!(!status.cancel_requested);
        assert_eq!(status.progress_percent, 0.0);
    }

    #[test]
    fn search_runs_against_a_published_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"content").unwrap();

        let engine = SearchEngine::new();
        publish_ready_index(
            &engine,
            vec![IndexedFile::new(
                10,
                "hello.txt",
                path.to_str().unwrap().to_string(),
                false,
            )],
        );

        let request = SearchRequest {
            query: "HELLO".to_string(),
            ..SearchRequest::default()
        };
        let rows = engine.search(&request);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size, 7);
    }

    #[test]
    fn duplicate_scan_finds_groups_through_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![8u8; 4096];
        let mut files = Vec::new();
        for (offset, name) in ["d1.bin", "d2.bin"].iter().enumerate() {
            let path = dir.path().join(name);
            std::fs::write(&path, &payload).unwrap();
            files.push(IndexedFile::new(
                10 + offset as u64,
                name,
                path.to_str().unwrap().to_string(),
                false,
            ));
        }

        let engine = SearchEngine::new();
        publish_ready_index(&engine, files);

        let groups = engine.find_duplicates(1, 100, 10).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].file_count, 2);

        // Guards reset: a second scan is allowed immediately.
        let groups = engine.find_duplicates(1, 100, 10).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(!engine.duplicate_scan_status().running);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn indexing_off_windows_fails_with_a_clear_error() {
        let engine = SearchEngine::new();
        assert!(engine.start_indexing("C", false, false));
        assert!(wait_until(|| !engine.is_indexing()));
        assert!(!engine.is_index_ready());
        assert!(engine.last_error().contains("only supported on Windows"));

        assert_eq!(
            engine.scan_basic("C"),
            Err(ScanError::UnsupportedPlatform)
        );
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn all_drives_mode_reports_combined_failure() {
        let engine = SearchEngine::new();
        assert!(engine.start_indexing("Q", false, true));
        assert!(wait_until(|| !engine.is_indexing()));
        assert!(!engine.is_index_ready());
        assert!(engine.last_error().starts_with("Q: "));
    }
}
