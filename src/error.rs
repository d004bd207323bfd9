use thiserror::Error;

/// Failures surfaced by the indexing and duplicate-scan paths. Variants
/// carrying a `code` render it as `0x%08X` so the shell can show the raw
/// OS error next to the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("Unable to open volume {drive}:. Run as administrator and ensure the target drive is NTFS. (0x{code:08X})")]
    VolumeOpen { drive: char, code: u32 },

    #[error("Failed to read the root file reference number for {drive}:. (0x{code:08X})")]
    RootFrn { drive: char, code: u32 },

    #[error("Failed to query the USN journal. (0x{code:08X})")]
    JournalQuery { code: u32 },

    #[error("MFT enumeration failed during a DeviceIoControl call. (0x{code:08X})")]
    MftEnumerate { code: u32 },

    #[error("Indexing was cancelled.")]
    Cancelled,

    #[error("Index is not ready yet. Wait for indexing to finish.")]
    IndexNotReady,

    #[error("Duplicate scan is already running.")]
    DuplicateScanRunning,

    #[error("Duplicate scan cancelled.")]
    DuplicateScanCancelled,

    #[error("NTFS indexing is only supported on Windows.")]
    UnsupportedPlatform,
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_codes_render_as_fixed_width_hex() {
        let message = ScanError::VolumeOpen { drive: 'C', code: 5 }.to_string();
        assert!(message.contains("(0x00000005)"), "{message}");
        assert!(message.contains("volume C:"), "{message}");

        let message = ScanError::MftEnumerate { code: 0x8007_0057 }.to_string();
        assert!(message.contains("(0x80070057)"), "{message}");
    }
}
