//! Small platform helpers: drive-letter normalization, file metadata reads
//! for the search and duplicate paths, and (on Windows) wide strings plus a
//! RAII volume handle.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

/// Size and timestamps of one on-disk file, as Unix seconds. Pre-epoch and
/// unreadable timestamps clamp to 0.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FileMetadata {
    pub size: u64,
    pub created_unix: i64,
    pub modified_unix: i64,
}

pub(crate) fn read_file_metadata(path: &str) -> io::Result<FileMetadata> {
    let metadata = std::fs::symlink_metadata(path)?;
    Ok(FileMetadata {
        size: metadata.len(),
        created_unix: metadata.created().map(unix_seconds).unwrap_or(0),
        modified_unix: metadata.modified().map(unix_seconds).unwrap_or(0),
    })
}

pub(crate) fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

/// Whether a metadata failure means the path itself is gone (deleted, moved,
/// bad component, unreachable share). Entries hitting this class are skipped
/// silently: it is how stale rows hide between journal updates.
pub(crate) fn is_path_missing(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    // ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND, ERROR_NOT_READY,
    // ERROR_BAD_NETPATH, ERROR_BAD_NET_NAME, ERROR_INVALID_NAME.
    matches!(err.raw_os_error(), Some(2 | 3 | 21 | 53 | 67 | 123))
}

/// Single uppercase ASCII drive letter; anything unusable falls back to `C`.
pub(crate) fn normalize_drive_letter(raw: &str) -> char {
    let candidate = raw
        .trim()
        .chars()
        .next()
        .map(|ch| ch.to_ascii_uppercase())
        .unwrap_or('C');
    if candidate.is_ascii_uppercase() {
        candidate
    } else {
        'C'
    }
}

#[cfg(target_os = "windows")]
pub(crate) mod win {
    use std::ffi::c_void;
    use std::os::windows::ffi::OsStrExt;

    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, GENERIC_READ, HANDLE, INVALID_HANDLE_VALUE,
    };
    use windows_sys::Win32::Storage::FileSystem::{
        CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
        OPEN_EXISTING,
    };

    pub(crate) fn to_wide(value: &str) -> Vec<u16> {
        std::ffi::OsStr::new(value)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect()
    }

    pub(crate) fn last_os_error_code() -> u32 {
        unsafe { GetLastError() }
    }

    /// Owned Win32 handle, closed on drop.
    pub(crate) struct VolumeHandle(HANDLE);

    impl VolumeHandle {
        pub(crate) fn as_raw(&self) -> HANDLE {
            self.0
        }
    }

    impl Drop for VolumeHandle {
        fn drop(&mut self) {
            // SAFETY: the handle was returned by CreateFileW and is owned here.
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    /// Opens `\\.\X:` read-only with full sharing. When GENERIC_READ is
    /// denied, retries with zero desired access, which still permits journal
    /// queries on some unelevated configurations. Returns the OS error code
    /// of the final attempt on failure.
    pub(crate) fn open_volume(drive: char) -> Result<VolumeHandle, u32> {
        let volume_path = format!(r"\\.\{}:", drive.to_ascii_uppercase());
        let volume_wide = to_wide(&volume_path);

        let mut code = 0;
        for desired_access in [GENERIC_READ, 0] {
            // SAFETY: `volume_wide` is a valid null-terminated wide string.
            let handle = unsafe {
                CreateFileW(
                    volume_wide.as_ptr(),
                    desired_access,
                    FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                    std::ptr::null(),
                    OPEN_EXISTING,
                    FILE_ATTRIBUTE_NORMAL,
                    std::ptr::null_mut(),
                )
            };
            if handle != INVALID_HANDLE_VALUE {
                return Ok(VolumeHandle(handle));
            }
            code = last_os_error_code();
        }
        Err(code)
    }

    /// Opens an arbitrary path for metadata-class access with backup
    /// semantics (required for directories).
    pub(crate) fn open_for_attributes(
        path_wide: &[u16],
        desired_access: u32,
        flags: u32,
    ) -> Result<VolumeHandle, u32> {
        // SAFETY: `path_wide` is a valid null-terminated wide string.
        let handle = unsafe {
            CreateFileW(
                path_wide.as_ptr(),
                desired_access,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                std::ptr::null(),
                OPEN_EXISTING,
                flags,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_os_error_code());
        }
        Ok(VolumeHandle(handle))
    }

    pub(crate) fn utf16_until_nul(buffer: &[u16]) -> String {
        let end = buffer.iter().position(|&ch| ch == 0).unwrap_or(buffer.len());
        String::from_utf16_lossy(&buffer[..end])
    }

    // Shared by the DeviceIoControl call sites so the pointer casts live in
    // one place.
    pub(crate) fn as_out_ptr<T>(value: &mut T) -> *mut c_void {
        value as *mut T as *mut c_void
    }

    pub(crate) fn as_in_ptr<T>(value: &T) -> *const c_void {
        value as *const T as *const c_void
    }
}
