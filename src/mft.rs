//! Bulk MFT enumeration: the initial snapshot of one NTFS volume.
//!
//! `FSCTL_ENUM_USN_DATA` walks every MFT record in file-reference order;
//! each response begins with the next start FRN, so the loop resumes where
//! the previous buffer ended. The journal is queried first: its `NextUsn`
//! both caps the enumeration and becomes the watcher's exact resume point,
//! which is what keeps the hand-off lossless.

use std::sync::atomic::AtomicU64;

use crate::error::ScanError;
use crate::types::ScanSnapshot;

/// Cancellation and progress plumbing for one scan. `request_token` of 0
/// never cancels (used by the one-shot export).
pub(crate) struct ScanContext<'a> {
    pub(crate) request_token: u64,
    pub(crate) active_token: &'a AtomicU64,
    pub(crate) indexed_count: &'a AtomicU64,
}

impl ScanContext<'_> {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.request_token != 0
            && self.active_token.load(std::sync::atomic::Ordering::Acquire) != self.request_token
    }
}

#[cfg(target_os = "windows")]
pub(crate) use imp::scan_volume;

#[cfg(target_os = "windows")]
mod imp {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::Ordering;

    use tracing::debug;
    use windows_sys::Win32::Foundation::{
        ERROR_FILE_NOT_FOUND, ERROR_HANDLE_EOF, ERROR_JOURNAL_DELETE_IN_PROGRESS,
        ERROR_JOURNAL_NOT_ACTIVE,
    };
    use windows_sys::Win32::Storage::FileSystem::{
        GetFileInformationByHandle, BY_HANDLE_FILE_INFORMATION, FILE_FLAG_BACKUP_SEMANTICS,
        FILE_READ_ATTRIBUTES,
    };
    use windows_sys::Win32::System::Ioctl::{
        CREATE_USN_JOURNAL_DATA, FSCTL_CREATE_USN_JOURNAL, FSCTL_ENUM_USN_DATA,
        FSCTL_QUERY_USN_JOURNAL, MFT_ENUM_DATA_V0, USN_JOURNAL_DATA_V0,
    };
    use windows_sys::Win32::System::IO::DeviceIoControl;

    use super::ScanContext;
    use crate::error::ScanError;
    use crate::resolve::resolve_path;
    use crate::types::{Frn, IndexedFile, JournalPosition, Node, ScanSnapshot};
    use crate::usn::{decode_records, split_output_buffer};
    use crate::winutil::win::{
        as_in_ptr, as_out_ptr, last_os_error_code, open_for_attributes, open_volume, to_wide,
        VolumeHandle,
    };

    const ENUM_BUFFER_BYTES: usize = 4 * 1024 * 1024;
    const PROGRESS_PUBLISH_MASK: u64 = 0x3FFF;
    const JOURNAL_MAXIMUM_SIZE: u64 = 32 * 1024 * 1024;
    const JOURNAL_ALLOCATION_DELTA: u64 = 8 * 1024 * 1024;

    pub(crate) fn scan_volume(
        drive: char,
        include_directories: bool,
        ctx: &ScanContext<'_>,
    ) -> Result<ScanSnapshot, ScanError> {
        let root_path = format!("{drive}:\\");

        let volume =
            open_volume(drive).map_err(|code| ScanError::VolumeOpen { drive, code })?;
        let root_frn = read_root_frn(&root_path, drive)?;
        let journal = query_or_create_journal(&volume)?;
        let high_usn = journal.map(|position| position.next_usn).unwrap_or(i64::MAX);

        let mut enum_data = MFT_ENUM_DATA_V0 {
            StartFileReferenceNumber: 0,
            LowUsn: 0,
            HighUsn: high_usn,
        };

        let mut buffer = vec![0u8; ENUM_BUFFER_BYTES];
        let mut nodes: HashMap<Frn, Node> = HashMap::new();
        let mut discovered_files: u64 = 0;

        loop {
            if ctx.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let mut returned: u32 = 0;
            // SAFETY: in/out pointers and lengths describe live buffers.
            let ok = unsafe {
                DeviceIoControl(
                    volume.as_raw(),
                    FSCTL_ENUM_USN_DATA,
                    as_in_ptr(&enum_data),
                    std::mem::size_of::<MFT_ENUM_DATA_V0>() as u32,
                    buffer.as_mut_ptr() as *mut _,
                    buffer.len() as u32,
                    &mut returned,
                    std::ptr::null_mut(),
                )
            };

            if ok == 0 {
                let code = last_os_error_code();
                if code == ERROR_HANDLE_EOF {
                    break;
                }
                return Err(ScanError::MftEnumerate { code });
            }

            if returned as usize <= 8 {
                break;
            }

            let Some((next_start, records)) = split_output_buffer(&buffer[..returned as usize])
            else {
                break;
            };
            enum_data.StartFileReferenceNumber = next_start;

            for record in decode_records(records) {
                let is_directory = record.is_directory;
                nodes.insert(
                    record.frn,
                    Node {
                        parent_frn: record.parent_frn,
                        name: record.name,
                        is_directory,
                    },
                );
                if !is_directory {
                    discovered_files += 1;
                    if discovered_files & PROGRESS_PUBLISH_MASK == 0 {
                        ctx.indexed_count.store(discovered_files, Ordering::Relaxed);
                    }
                }
            }
        }

        drop(volume);
        if ctx.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        nodes.insert(
            root_frn,
            Node {
                parent_frn: root_frn,
                name: String::new(),
                is_directory: true,
            },
        );

        let mut cache = HashMap::with_capacity(nodes.len() / 2 + 1);
        cache.insert(root_frn, root_path.clone());
        let mut resolving = HashSet::new();
        let mut files = Vec::with_capacity(nodes.len() / 2 + 1);

        for (&frn, node) in &nodes {
            if ctx.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            if node.name.is_empty() || (node.is_directory && !include_directories) {
                continue;
            }
            resolving.clear();
            let Some(path) =
                resolve_path(&nodes, root_frn, &root_path, &mut cache, &mut resolving, frn)
            else {
                continue;
            };
            if path.is_empty() {
                continue;
            }
            files.push(IndexedFile::new(frn, &node.name, path, node.is_directory));
        }

        debug!(
            drive = %drive,
            files = files.len(),
            nodes = nodes.len(),
            live_updates = journal.is_some(),
            "mft enumeration complete"
        );

        Ok(ScanSnapshot {
            files,
            nodes,
            root_frn,
            root_path,
            journal: journal.unwrap_or_default(),
            live_updates_supported: journal.is_some(),
        })
    }

    fn read_root_frn(root_path: &str, drive: char) -> Result<u64, ScanError> {
        let root_wide = to_wide(root_path);
        let root = open_for_attributes(&root_wide, FILE_READ_ATTRIBUTES, FILE_FLAG_BACKUP_SEMANTICS)
            .map_err(|code| ScanError::RootFrn { drive, code })?;

        // SAFETY: zeroed BY_HANDLE_FILE_INFORMATION is a valid out-param.
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
        // SAFETY: `root` is a live handle, `info` a live out pointer.
        let ok = unsafe { GetFileInformationByHandle(root.as_raw(), &mut info) };
        if ok == 0 {
            return Err(ScanError::RootFrn {
                drive,
                code: last_os_error_code(),
            });
        }
        Ok(((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64)
    }

    fn is_journal_missing_code(code: u32) -> bool {
        code == ERROR_JOURNAL_NOT_ACTIVE
            || code == ERROR_JOURNAL_DELETE_IN_PROGRESS
            || code == ERROR_FILE_NOT_FOUND
    }

    /// Queries the journal; when it is missing, attempts a best-effort
    /// creation and re-queries. `Ok(None)` means "no journal, scan without
    /// live updates".
    fn query_or_create_journal(
        volume: &VolumeHandle,
    ) -> Result<Option<JournalPosition>, ScanError> {
        // SAFETY: zeroed USN_JOURNAL_DATA_V0 is a valid out-param.
        let mut journal: USN_JOURNAL_DATA_V0 = unsafe { std::mem::zeroed() };

        if !query_journal(volume, &mut journal) {
            let code = last_os_error_code();
            if !is_journal_missing_code(code) {
                return Err(ScanError::JournalQuery { code });
            }

            let create_data = CREATE_USN_JOURNAL_DATA {
                MaximumSize: JOURNAL_MAXIMUM_SIZE,
                AllocationDelta: JOURNAL_ALLOCATION_DELTA,
            };
            let mut created_bytes: u32 = 0;
            // SAFETY: in pointer and length describe `create_data`.
            unsafe {
                DeviceIoControl(
                    volume.as_raw(),
                    FSCTL_CREATE_USN_JOURNAL,
                    as_in_ptr(&create_data),
                    std::mem::size_of::<CREATE_USN_JOURNAL_DATA>() as u32,
                    std::ptr::null_mut(),
                    0,
                    &mut created_bytes,
                    std::ptr::null_mut(),
                )
            };

            if !query_journal(volume, &mut journal) {
                return Ok(None);
            }
        }

        Ok(Some(JournalPosition {
            journal_id: journal.UsnJournalID,
            next_usn: journal.NextUsn,
        }))
    }

    fn query_journal(volume: &VolumeHandle, journal: &mut USN_JOURNAL_DATA_V0) -> bool {
        let mut returned: u32 = 0;
        // SAFETY: `journal` is a live out pointer of the declared size.
        let ok = unsafe {
            DeviceIoControl(
                volume.as_raw(),
                FSCTL_QUERY_USN_JOURNAL,
                std::ptr::null(),
                0,
                as_out_ptr(journal),
                std::mem::size_of::<USN_JOURNAL_DATA_V0>() as u32,
                &mut returned,
                std::ptr::null_mut(),
            )
        };
        ok != 0
    }
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn scan_volume(
    _drive: char,
    _include_directories: bool,
    _ctx: &ScanContext<'_>,
) -> Result<ScanSnapshot, ScanError> {
    Err(ScanError::UnsupportedPlatform)
}
