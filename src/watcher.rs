//! Live index updates: tailing the USN change journal.
//!
//! One watcher thread per active single-drive index. Each indexing request
//! bumps the watcher epoch; a watcher that no longer owns the current epoch
//! exits at its next loop boundary, so a re-index can never race an old
//! tail into the fresh index.

use std::sync::Arc;

use crate::engine::EngineState;
use crate::types::JournalPosition;

#[cfg(target_os = "windows")]
pub(crate) fn start_live_watcher(state: Arc<EngineState>, drive: char, journal: JournalPosition) {
    imp::start(state, drive, journal);
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn start_live_watcher(state: Arc<EngineState>, drive: char, journal: JournalPosition) {
    let _ = (state, drive, journal);
}

#[cfg(target_os = "windows")]
mod imp {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use tracing::{debug, warn};
    use windows_sys::Win32::Foundation::{
        ERROR_HANDLE_EOF, ERROR_INVALID_PARAMETER, ERROR_JOURNAL_DELETE_IN_PROGRESS,
        ERROR_JOURNAL_ENTRY_DELETED, ERROR_JOURNAL_NOT_ACTIVE,
    };
    use windows_sys::Win32::System::Ioctl::{FSCTL_READ_USN_JOURNAL, READ_USN_JOURNAL_DATA_V0};
    use windows_sys::Win32::System::IO::DeviceIoControl;

    use crate::engine::EngineState;
    use crate::types::JournalPosition;
    use crate::usn::{decode_records, split_output_buffer};
    use crate::winutil::win::{as_in_ptr, last_os_error_code, open_volume};

    const WATCH_BUFFER_BYTES: usize = 1024 * 1024;
    const BACKOFF: Duration = Duration::from_millis(120);

    pub(crate) fn start(state: Arc<EngineState>, drive: char, journal: JournalPosition) {
        if !journal.supports_live_updates() {
            return;
        }
        let epoch = state.watcher_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        thread::spawn(move || watch_journal(state, drive, journal, epoch));
    }

    fn superseded(state: &EngineState, epoch: u64) -> bool {
        state.watcher_epoch.load(Ordering::Acquire) != epoch
    }

    fn watch_journal(state: Arc<EngineState>, drive: char, journal: JournalPosition, epoch: u64) {
        let volume = match open_volume(drive) {
            Ok(volume) => volume,
            Err(code) => {
                if !superseded(&state, epoch) {
                    state.set_last_error(format!(
                        "Live updates could not start (unable to open volume). (0x{code:08X})"
                    ));
                }
                return;
            }
        };

        let mut read_data = READ_USN_JOURNAL_DATA_V0 {
            StartUsn: journal.next_usn,
            ReasonMask: u32::MAX,
            ReturnOnlyOnClose: 0,
            Timeout: 0,
            BytesToWaitFor: 0,
            UsnJournalID: journal.journal_id,
        };

        let mut buffer = vec![0u8; WATCH_BUFFER_BYTES];
        debug!(drive = %drive, start_usn = journal.next_usn, "journal watcher started");

        while !superseded(&state, epoch) {
            let mut returned: u32 = 0;
            // SAFETY: in/out pointers and lengths describe live buffers.
            let ok = unsafe {
                DeviceIoControl(
                    volume.as_raw(),
                    FSCTL_READ_USN_JOURNAL,
                    as_in_ptr(&read_data),
                    std::mem::size_of::<READ_USN_JOURNAL_DATA_V0>() as u32,
                    buffer.as_mut_ptr() as *mut _,
                    buffer.len() as u32,
                    &mut returned,
                    std::ptr::null_mut(),
                )
            };

            if ok == 0 {
                let code = last_os_error_code();
                if superseded(&state, epoch) {
                    break;
                }

                if code == ERROR_HANDLE_EOF {
                    thread::sleep(BACKOFF);
                    continue;
                }

                if code == ERROR_JOURNAL_ENTRY_DELETED
                    || code == ERROR_JOURNAL_DELETE_IN_PROGRESS
                    || code == ERROR_JOURNAL_NOT_ACTIVE
                    || code == ERROR_INVALID_PARAMETER
                {
                    warn!(drive = %drive, code, "journal invalidated, live updates stopped");
                    state.set_last_error(
                        "Live updates paused because the USN journal changed. Reindex to resume.",
                    );
                    break;
                }

                state.set_last_error(format!(
                    "Live updates paused because USN monitoring failed. (0x{code:08X})"
                ));
                break;
            }

            // The buffer leads with the next USN to resume from; it only
            // ever moves forward.
            let Some((next_usn, records)) = split_output_buffer(&buffer[..returned as usize])
            else {
                thread::sleep(BACKOFF);
                continue;
            };
            read_data.StartUsn = next_usn as i64;
            if records.is_empty() {
                thread::sleep(BACKOFF);
                continue;
            }

            let batch = decode_records(records);
            if batch.is_empty() || superseded(&state, epoch) {
                continue;
            }

            let include_directories = state.include_directories.load(Ordering::Acquire);
            let mut index = state.index.write();
            index.apply_usn_batch(&batch, include_directories);
            state
                .indexed_count
                .store(index.file_count() as u64, Ordering::Release);
        }
    }
}
