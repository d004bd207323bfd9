//! The procedural ABI consumed by the desktop shell.
//!
//! Strings crossing the boundary are UTF-8, NUL-terminated, and owned by
//! this crate: every non-null `*mut c_char` returned here must come back
//! through [`winseek_free_string`]. `winseek_last_error` instead hands out
//! a borrowed pointer that stays valid until the calling thread's next
//! `winseek_last_error` call. The engine behind these functions is a
//! process-wide singleton; callers never see a handle.

use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::sync::OnceLock;

use serde::Serialize;

use crate::engine::SearchEngine;
use crate::search::SearchRequest;

static ENGINE: OnceLock<SearchEngine> = OnceLock::new();

thread_local! {
    static LAST_ERROR_BUFFER: RefCell<CString> = RefCell::new(CString::default());
}

fn engine() -> &'static SearchEngine {
    ENGINE.get_or_init(SearchEngine::new)
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn utf8_or_empty(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

fn into_raw_json<T: Serialize>(value: &T) -> *mut c_char {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(_) => {
            engine().set_last_error("Failed to encode result.");
            return std::ptr::null_mut();
        }
    };
    match CString::new(json) {
        Ok(buffer) => buffer.into_raw(),
        Err(_) => {
            engine().set_last_error("Failed to allocate result buffer.");
            std::ptr::null_mut()
        }
    }
}

/// Schedules a scan; returns true when the request was accepted.
///
/// # Safety
/// `drive_utf8` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn winseek_start_indexing(
    drive_utf8: *const c_char,
    include_directories: bool,
    scan_all_drives: bool,
) -> bool {
    let drive = utf8_or_empty(drive_utf8);
    engine().start_indexing(&drive, include_directories, scan_all_drives)
}

#[no_mangle]
pub extern "C" fn winseek_is_indexing() -> bool {
    engine().is_indexing()
}

#[no_mangle]
pub extern "C" fn winseek_is_index_ready() -> bool {
    engine().is_index_ready()
}

#[no_mangle]
pub extern "C" fn winseek_indexed_file_count() -> u64 {
    engine().indexed_file_count()
}

/// Borrowed pointer; valid until this thread's next call.
#[no_mangle]
pub extern "C" fn winseek_last_error() -> *const c_char {
    let message = engine().last_error();
    LAST_ERROR_BUFFER.with(|cell| {
        *cell.borrow_mut() = CString::new(message).unwrap_or_default();
        cell.borrow().as_ptr()
    })
}

#[no_mangle]
pub extern "C" fn winseek_list_drives_json() -> *mut c_char {
    into_raw_json(&engine().list_drives())
}

/// # Safety
/// `query_utf8` and `extension_utf8` must be null or valid NUL-terminated
/// strings.
#[no_mangle]
pub unsafe extern "C" fn winseek_search_files_json(
    query_utf8: *const c_char,
    extension_utf8: *const c_char,
    min_size: u64,
    max_size: u64,
    min_created_unix: i64,
    max_created_unix: i64,
    limit: u32,
) -> *mut c_char {
    let request = SearchRequest {
        query: utf8_or_empty(query_utf8),
        extension: utf8_or_empty(extension_utf8),
        min_size,
        max_size,
        min_created_unix,
        max_created_unix,
        limit,
    };
    into_raw_json(&engine().search(&request))
}

/// Null on refusal or cancellation, with the reason in `winseek_last_error`.
#[no_mangle]
pub extern "C" fn winseek_find_duplicates_json(
    min_size: u64,
    max_groups: u32,
    max_files_per_group: u32,
) -> *mut c_char {
    match engine().find_duplicates(min_size, max_groups, max_files_per_group) {
        Ok(groups) => into_raw_json(&groups),
        Err(_) => std::ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn winseek_cancel_duplicate_scan() -> bool {
    engine().cancel_duplicate_scan()
}

#[no_mangle]
pub extern "C" fn winseek_duplicate_scan_status_json() -> *mut c_char {
    into_raw_json(&engine().duplicate_scan_status())
}

/// One-shot enumeration without touching the live index.
///
/// # Safety
/// `drive_utf8` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn winseek_scan_mft(drive_utf8: *const c_char) -> *mut c_char {
    let drive = utf8_or_empty(drive_utf8);
    match engine().scan_basic(&drive) {
        Ok(rows) => into_raw_json(&rows),
        Err(err) => {
            engine().set_last_error(err.to_string());
            std::ptr::null_mut()
        }
    }
}

/// Releases a string buffer previously returned by this crate.
///
/// # Safety
/// `value` must be null or a pointer obtained from one of the `*_json`
/// functions in this module, and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn winseek_free_string(value: *mut c_char) {
    if !value.is_null() {
        drop(CString::from_raw(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn consume_json(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let text = CStr::from_ptr(ptr).to_string_lossy().into_owned();
        winseek_free_string(ptr);
        text
    }

    #[test]
    fn status_json_round_trips_through_the_abi() {
        let json = unsafe { consume_json(winseek_duplicate_scan_status_json()) };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["running"], false);
        assert_eq!(value["cancelRequested"], false);
        assert!(value["progressPercent"].is_number());
    }

    #[test]
    fn search_on_an_empty_index_returns_an_empty_array() {
        let json = unsafe {
            consume_json(winseek_search_files_json(
                std::ptr::null(),
                std::ptr::null(),
                0,
                u64::MAX,
                i64::MIN,
                i64::MAX,
                0,
            ))
        };
        assert_eq!(json, "[]");
    }

    #[test]
    fn last_error_pointer_is_stable_per_thread() {
        engine().set_last_error("boom");
        let ptr = winseek_last_error();
        let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        assert_eq!(text, "boom");
        engine().set_last_error("");
    }

    #[test]
    fn free_string_tolerates_null() {
        unsafe { winseek_free_string(std::ptr::null_mut()) };
    }
}
