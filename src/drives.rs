//! Logical-drive discovery for the drive picker and the all-drives scan.

use crate::types::DriveRow;

/// Target drives for an indexing request: the preferred drive alone, or
/// every NTFS volume that can actually be opened when scanning all drives.
/// Falls back to the preferred drive when discovery comes up empty.
pub(crate) fn resolve_target_drives(preferred: char, scan_all_drives: bool) -> Vec<char> {
    if !scan_all_drives {
        return vec![preferred];
    }

    let mut drives: Vec<char> = list_drives()
        .into_iter()
        .filter(|row| row.is_ntfs && row.can_open_volume)
        .filter_map(|row| row.letter.chars().next())
        .collect();

    if drives.is_empty() {
        drives.push(preferred);
    }
    drives
}

#[cfg(target_os = "windows")]
pub(crate) fn list_drives() -> Vec<DriveRow> {
    use windows_sys::Win32::Storage::FileSystem::{
        GetDriveTypeW, GetLogicalDriveStringsW, GetVolumeInformationW, DRIVE_CDROM, DRIVE_FIXED,
        DRIVE_NO_ROOT_DIR, DRIVE_RAMDISK, DRIVE_REMOTE, DRIVE_REMOVABLE,
    };

    use crate::winutil::win::{open_volume, utf16_until_nul};

    fn drive_type_text(drive_type: u32) -> &'static str {
        match drive_type {
            DRIVE_FIXED => "fixed",
            DRIVE_REMOVABLE => "removable",
            DRIVE_REMOTE => "network",
            DRIVE_CDROM => "cdrom",
            DRIVE_RAMDISK => "ramdisk",
            DRIVE_NO_ROOT_DIR => "no-root",
            _ => "unknown",
        }
    }

    let mut rows = Vec::new();

    // SAFETY: a zero-length query returns the required buffer size.
    let required = unsafe { GetLogicalDriveStringsW(0, std::ptr::null_mut()) };
    if required == 0 {
        return rows;
    }

    let mut raw = vec![0u16; required as usize + 1];
    // SAFETY: `raw` is large enough for the reported length.
    let written = unsafe { GetLogicalDriveStringsW(raw.len() as u32, raw.as_mut_ptr()) };
    if written == 0 {
        return rows;
    }

    for root in raw.split(|&ch| ch == 0).filter(|chunk| !chunk.is_empty()) {
        let root_text = String::from_utf16_lossy(root);
        if root_text.len() < 2 {
            continue;
        }
        let letter = root_text.chars().next().unwrap_or('\0').to_ascii_uppercase();
        if !letter.is_ascii_uppercase() {
            continue;
        }

        let mut root_wide: Vec<u16> = root.to_vec();
        root_wide.push(0);

        // SAFETY: `root_wide` is null-terminated.
        let drive_type = unsafe { GetDriveTypeW(root_wide.as_ptr()) };

        let mut filesystem_buffer = [0u16; 260];
        // SAFETY: buffer sizes match the pointers handed over.
        let has_filesystem = unsafe {
            GetVolumeInformationW(
                root_wide.as_ptr(),
                std::ptr::null_mut(),
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                filesystem_buffer.as_mut_ptr(),
                filesystem_buffer.len() as u32,
            )
        } != 0;
        let filesystem = if has_filesystem {
            utf16_until_nul(&filesystem_buffer)
        } else {
            String::new()
        };

        let is_ntfs = filesystem.eq_ignore_ascii_case("ntfs");
        let can_open_volume = is_ntfs && open_volume(letter).is_ok();

        rows.push(DriveRow {
            letter: letter.to_string(),
            path: root_text,
            filesystem,
            drive_type: drive_type_text(drive_type).to_string(),
            is_ntfs,
            can_open_volume,
        });
    }

    rows
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn list_drives() -> Vec<DriveRow> {
    Vec::new()
}
