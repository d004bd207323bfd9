//! The in-memory index: an FRN→node map mirroring the volume's MFT entries,
//! a flat vector of search-ready rows projected from it, and an
//! FRN→position map giving O(1) removal by swap-with-last. One writer at a
//! time mutates this under the engine's exclusive lock; readers iterate the
//! flat vector under the shared lock and tolerate entries having moved
//! between acquisitions.

#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use std::collections::{HashMap, HashSet};

use crate::resolve::resolve_path;
use crate::types::{Frn, IndexedFile, Node, ScanSnapshot};
use crate::usn::{
    UsnRecord, USN_REASON_FILE_DELETE, USN_REASON_RENAME_NEW_NAME, USN_REASON_RENAME_OLD_NAME,
};

#[derive(Debug, Default)]
pub(crate) struct IndexState {
    nodes: HashMap<Frn, Node>,
    files: Vec<IndexedFile>,
    position_by_frn: HashMap<Frn, usize>,
    root_frn: Frn,
    root_path: String,
}

impl IndexState {
    pub(crate) fn files(&self) -> &[IndexedFile] {
        &self.files
    }

    pub(crate) fn file_count(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn node(&self, frn: Frn) -> Option<&Node> {
        self.nodes.get(&frn)
    }

    pub(crate) fn position_of(&self, frn: Frn) -> Option<usize> {
        self.position_by_frn.get(&frn).copied()
    }

    /// Overwrites in place when the FRN is already indexed, otherwise
    /// appends and records the new position.
    pub(crate) fn upsert_file(&mut self, frn: Frn, name: &str, path: String, is_directory: bool) {
        let entry = IndexedFile::new(frn, name, path, is_directory);
        match self.position_by_frn.get(&frn) {
            Some(&position) => self.files[position] = entry,
            None => {
                self.position_by_frn.insert(frn, self.files.len());
                self.files.push(entry);
            }
        }
    }

    /// Swap-with-last removal; the entry moved into the hole gets its
    /// position re-recorded. No-op for unknown FRNs.
    pub(crate) fn remove_file(&mut self, frn: Frn) {
        let Some(position) = self.position_by_frn.remove(&frn) else {
            return;
        };
        self.files.swap_remove(position);
        if position < self.files.len() {
            self.position_by_frn.insert(self.files[position].frn, position);
        }
    }

    fn rebuild_positions(&mut self) {
        self.position_by_frn.clear();
        self.position_by_frn.reserve(self.files.len());
        for (position, entry) in self.files.iter().enumerate() {
            self.position_by_frn.insert(entry.frn, position);
        }
    }

    /// Full reprojection of the flat vector from the node map. Used after
    /// any change that may have invalidated stored descendant paths (a
    /// directory rename moves every path beneath it).
    pub(crate) fn rebuild_from_nodes(&mut self, include_directories: bool) {
        self.files.clear();
        self.position_by_frn.clear();
        if self.root_frn == 0 || self.root_path.is_empty() || self.nodes.is_empty() {
            return;
        }

        let mut cache = HashMap::with_capacity(self.nodes.len() / 2 + 1);
        cache.insert(self.root_frn, self.root_path.clone());
        let mut resolving = HashSet::new();

        for (&frn, node) in &self.nodes {
            if node.name.is_empty() || (node.is_directory && !include_directories) {
                continue;
            }
            resolving.clear();
            let Some(path) = resolve_path(
                &self.nodes,
                self.root_frn,
                &self.root_path,
                &mut cache,
                &mut resolving,
                frn,
            ) else {
                continue;
            };
            if path.is_empty() {
                continue;
            }
            self.position_by_frn.insert(frn, self.files.len());
            self.files.push(IndexedFile::new(frn, &node.name, path, node.is_directory));
        }
    }

    /// Atomic wholesale replacement after a single-drive scan.
    pub(crate) fn replace_snapshot(&mut self, snapshot: ScanSnapshot) {
        self.files = snapshot.files;
        self.nodes = snapshot.nodes;
        self.root_frn = snapshot.root_frn;
        self.root_path = snapshot.root_path;
        self.rebuild_positions();
    }

    /// All-drives mode: only merged flat rows survive; without a single
    /// node map or root there is nothing for live updates to work against.
    pub(crate) fn replace_flat_only(&mut self, files: Vec<IndexedFile>) {
        self.files = files;
        self.nodes.clear();
        self.root_frn = 0;
        self.root_path.clear();
        self.rebuild_positions();
    }

    /// Applies one journal batch, in journal order, under the caller's
    /// exclusive lock.
    pub(crate) fn apply_usn_batch(&mut self, batch: &[UsnRecord], include_directories: bool) {
        if self.root_frn == 0 || self.root_path.is_empty() || batch.is_empty() {
            return;
        }

        let mut requires_full_rebuild = false;
        let mut cache = HashMap::with_capacity(batch.len() * 2 + 8);
        cache.insert(self.root_frn, self.root_path.clone());
        let mut resolving = HashSet::new();

        for record in batch {
            if record.frn == 0 || record.name.is_empty() {
                continue;
            }

            let is_delete = record.reason & USN_REASON_FILE_DELETE != 0;
            let is_old_rename_only = record.reason & USN_REASON_RENAME_OLD_NAME != 0
                && record.reason & USN_REASON_RENAME_NEW_NAME == 0
                && !is_delete;
            // The paired new-name record carries the real update.
            if is_old_rename_only {
                continue;
            }

            let old_node = self.nodes.get(&record.frn).cloned();

            if is_delete {
                if old_node.as_ref().is_some_and(|node| node.is_directory) {
                    requires_full_rebuild = true;
                }
                self.nodes.remove(&record.frn);
                self.remove_file(record.frn);
                continue;
            }

            self.nodes.insert(
                record.frn,
                Node {
                    parent_frn: record.parent_frn,
                    name: record.name.clone(),
                    is_directory: record.is_directory,
                },
            );

            if record.is_directory {
                let identity_changed = old_node.is_none_or(|node| {
                    !node.is_directory
                        || node.parent_frn != record.parent_frn
                        || node.name != record.name
                });
                if identity_changed {
                    requires_full_rebuild = true;
                }
                if !include_directories {
                    self.remove_file(record.frn);
                    continue;
                }
            }

            resolving.clear();
            match resolve_path(
                &self.nodes,
                self.root_frn,
                &self.root_path,
                &mut cache,
                &mut resolving,
                record.frn,
            ) {
                Some(path) if !path.is_empty() => {
                    self.upsert_file(record.frn, &record.name, path, record.is_directory);
                }
                _ => self.remove_file(record.frn),
            }
        }

        if requires_full_rebuild {
            self.rebuild_from_nodes(include_directories);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: Frn = 5;

    fn ready_state() -> IndexState {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT,
            Node {
                parent_frn: ROOT,
                name: String::new(),
                is_directory: true,
            },
        );
        let mut state = IndexState::default();
        state.replace_snapshot(ScanSnapshot {
            files: Vec::new(),
            nodes,
            root_frn: ROOT,
            root_path: "C:\\".to_string(),
            ..ScanSnapshot::default()
        });
        state
    }

    fn record(frn: Frn, parent_frn: Frn, reason: u32, is_directory: bool, name: &str) -> UsnRecord {
        UsnRecord {
            frn,
            parent_frn,
            reason,
            is_directory,
            name: name.to_string(),
        }
    }

    fn assert_positions_consistent(state: &IndexState) {
        assert_eq!(state.position_by_frn.len(), state.files.len());
        for (position, entry) in state.files.iter().enumerate() {
            assert_eq!(state.position_of(entry.frn), Some(position));
        }
    }

    #[test]
    fn upsert_appends_then_overwrites_in_place() {
        let mut state = ready_state();
        state.upsert_file(10, "a.txt", "C:\\a.txt".to_string(), false);
        state.upsert_file(11, "b.txt", "C:\\b.txt".to_string(), false);
        let position = state.position_of(10).unwrap();

        state.upsert_file(10, "a2.txt", "C:\\a2.txt".to_string(), false);
        assert_eq!(state.position_of(10), Some(position));
        assert_eq!(state.file_count(), 2);
        assert_eq!(state.files()[position].name, "a2.txt");
        assert_positions_consistent(&state);
    }

    #[test]
    fn repeated_upsert_is_idempotent() {
        let mut state = ready_state();
        state.upsert_file(10, "a.txt", "C:\\a.txt".to_string(), false);
        let before = state.files().to_vec();
        state.upsert_file(10, "a.txt", "C:\\a.txt".to_string(), false);
        assert_eq!(state.files(), &before[..]);
    }

    #[test]
    fn remove_swaps_last_entry_into_the_hole() {
        let mut state = ready_state();
        for frn in 10..14 {
            state.upsert_file(frn, "f", format!("C:\\{frn}"), false);
        }
        state.remove_file(10);

        assert_eq!(state.file_count(), 3);
        assert_eq!(state.position_of(10), None);
        // The former last entry now lives at the freed position.
        assert_eq!(state.position_of(13), Some(0));
        assert_positions_consistent(&state);

        state.remove_file(999);
        assert_eq!(state.file_count(), 3);
    }

    #[test]
    fn remove_of_absent_frn_restores_prior_state() {
        let mut state = ready_state();
        state.upsert_file(10, "a.txt", "C:\\a.txt".to_string(), false);
        let before = state.files().to_vec();

        state.upsert_file(11, "b.txt", "C:\\b.txt".to_string(), false);
        state.remove_file(11);
        assert_eq!(state.files(), &before[..]);
        assert_positions_consistent(&state);
    }

    #[test]
    fn old_rename_only_records_are_ignored() {
        let mut state = ready_state();
        state.apply_usn_batch(
            &[record(10, ROOT, USN_REASON_RENAME_OLD_NAME, false, "a.txt")],
            false,
        );
        assert_eq!(state.file_count(), 0);
        assert!(state.node(10).is_none());
    }

    #[test]
    fn create_rename_delete_lifecycle() {
        let mut state = ready_state();

        state.apply_usn_batch(&[record(10, ROOT, 0x100, false, "a.txt")], false);
        assert_eq!(state.files()[0].path, "C:\\a.txt");

        state.apply_usn_batch(
            &[
                record(10, ROOT, USN_REASON_RENAME_OLD_NAME, false, "a.txt"),
                record(10, ROOT, USN_REASON_RENAME_NEW_NAME, false, "b.txt"),
            ],
            false,
        );
        assert_eq!(state.file_count(), 1);
        assert_eq!(state.files()[0].path, "C:\\b.txt");

        state.apply_usn_batch(&[record(10, ROOT, USN_REASON_FILE_DELETE, false, "b.txt")], false);
        assert_eq!(state.file_count(), 0);
        assert!(state.node(10).is_none());
    }

    #[test]
    fn directory_rename_reprojects_descendant_paths() {
        let mut state = ready_state();
        state.apply_usn_batch(
            &[
                record(20, ROOT, 0x100, true, "x"),
                record(21, 20, 0x100, false, "file"),
                record(22, 20, 0x100, false, "file2"),
            ],
            false,
        );
        assert!(state.files().iter().all(|e| e.path.starts_with("C:\\x\\")));

        state.apply_usn_batch(&[record(20, ROOT, USN_REASON_RENAME_NEW_NAME, true, "y")], false);
        assert_eq!(state.file_count(), 2);
        assert!(state.files().iter().all(|e| e.path.starts_with("C:\\y\\")));
        assert_positions_consistent(&state);
    }

    #[test]
    fn directory_delete_forces_full_rebuild() {
        let mut state = ready_state();
        state.apply_usn_batch(
            &[
                record(20, ROOT, 0x100, true, "gone"),
                record(21, 20, 0x100, false, "inner.txt"),
            ],
            false,
        );
        assert_eq!(state.file_count(), 1);

        state.apply_usn_batch(&[record(20, ROOT, USN_REASON_FILE_DELETE, true, "gone")], false);
        // The child is now an orphan and drops out of the projection.
        assert_eq!(state.file_count(), 0);
        assert!(state.node(21).is_some());
    }

    #[test]
    fn directories_enter_the_flat_vector_only_when_enabled() {
        let mut state = ready_state();
        state.apply_usn_batch(&[record(20, ROOT, 0x100, true, "docs")], false);
        assert_eq!(state.file_count(), 0);

        state.apply_usn_batch(&[record(20, ROOT, USN_REASON_RENAME_NEW_NAME, true, "docs")], true);
        assert_eq!(state.file_count(), 1);
        assert!(state.files()[0].is_directory);
        assert_eq!(state.files()[0].extension_lower, "");
    }

    #[test]
    fn unresolvable_upserts_fall_out_of_the_flat_vector() {
        let mut state = ready_state();
        state.apply_usn_batch(&[record(30, ROOT, 0x100, false, "keep.txt")], false);
        assert_eq!(state.file_count(), 1);

        // Reparent under an FRN the index has never seen.
        state.apply_usn_batch(
            &[record(30, 777, USN_REASON_RENAME_NEW_NAME, false, "keep.txt")],
            false,
        );
        assert_eq!(state.file_count(), 0);
        assert!(state.node(30).is_some());
    }

    #[test]
    fn stored_paths_match_reresolution() {
        let mut state = ready_state();
        state.apply_usn_batch(
            &[
                record(20, ROOT, 0x100, true, "a"),
                record(21, 20, 0x100, true, "b"),
                record(22, 21, 0x100, false, "c.txt"),
            ],
            true,
        );

        let mut cache = HashMap::new();
        let mut resolving = HashSet::new();
        for entry in state.files() {
            resolving.clear();
            let resolved = resolve_path(
                &state.nodes,
                state.root_frn,
                &state.root_path,
                &mut cache,
                &mut resolving,
                entry.frn,
            );
            assert_eq!(resolved.as_deref(), Some(entry.path.as_str()));
        }
    }

    #[test]
    fn replace_flat_only_disables_node_tracking() {
        let mut state = ready_state();
        state.apply_usn_batch(&[record(10, ROOT, 0x100, false, "a.txt")], false);

        state.replace_flat_only(vec![
            IndexedFile::new(50, "m.mp4", "C:\\m.mp4".to_string(), false),
            IndexedFile::new(51, "n.mp4", "D:\\n.mp4".to_string(), false),
        ]);
        assert_eq!(state.file_count(), 2);
        assert!(state.nodes.is_empty());
        assert_eq!(state.root_frn, 0);
        assert_positions_consistent(&state);

        // Without a root, batches are refused outright.
        state.apply_usn_batch(&[record(60, ROOT, 0x100, false, "late.txt")], false);
        assert_eq!(state.file_count(), 2);
    }
}
