//! Content-based duplicate detection over the indexed files.
//!
//! The pipeline narrows candidates in stages so expensive reads only happen
//! for files that still look alike: metadata gather → size buckets → quick
//! head/tail signature → full-content hash → byte-for-byte verification.
//! The hashes are FNV-1a bucketing aids, not fingerprints; only stage 4
//! promotes candidates into groups, so hash collisions cost time, never
//! correctness. All stages poll one shared cancel flag and a caller-visible
//! progress pair.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use crate::error::ScanError;
use crate::types::{DuplicateFileRow, DuplicateGroupRow, DuplicateScanStatus, IndexedFile};
use crate::winutil::read_file_metadata;

pub(crate) const DEFAULT_MIN_SIZE: u64 = 1024 * 1024;

const QUICK_CHUNK_BYTES: usize = 64 * 1024;
const FULL_READ_CHUNK_BYTES: usize = 1024 * 1024;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

thread_local! {
    static QUICK_BUFFER: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
    static READ_BUFFER: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
    static COMPARE_BUFFERS: RefCell<(Vec<u8>, Vec<u8>)> = const { RefCell::new((Vec::new(), Vec::new())) };
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DuplicateScanOptions {
    pub min_size: u64,
    pub max_groups: usize,
    pub max_files_per_group: usize,
}

impl DuplicateScanOptions {
    /// Applies the documented defaults and clamps: zero `min_size` means
    /// 1 MiB, `max_groups` lands in [1, 1000], `max_files_per_group` in
    /// [2, 400].
    pub(crate) fn effective(min_size: u64, max_groups: u32, max_files_per_group: u32) -> Self {
        Self {
            min_size: if min_size == 0 { DEFAULT_MIN_SIZE } else { min_size },
            max_groups: max_groups.clamp(1, 1000) as usize,
            max_files_per_group: max_files_per_group.clamp(2, 400) as usize,
        }
    }
}

/// Shared scan state: the run/cancel guards and the progress counters the
/// status command reads while workers are busy.
#[derive(Debug, Default)]
pub(crate) struct DuplicateProgress {
    pub(crate) running: AtomicBool,
    pub(crate) cancel_requested: AtomicBool,
    done: AtomicU64,
    total: AtomicU64,
    groups_found: AtomicU64,
}

impl DuplicateProgress {
    pub(crate) fn reset_counters(&self) {
        self.done.store(0, Ordering::Release);
        self.total.store(0, Ordering::Release);
        self.groups_found.store(0, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    fn add_total(&self, units: u64) {
        if units > 0 {
            self.total.fetch_add(units, Ordering::AcqRel);
        }
    }

    fn add_done(&self, units: u64) {
        if units > 0 {
            self.done.fetch_add(units, Ordering::AcqRel);
        }
    }

    fn set_groups(&self, groups: u64) {
        self.groups_found.store(groups, Ordering::Release);
    }

    fn finish(&self) {
        if !self.is_cancelled() {
            self.done.store(self.total.load(Ordering::Acquire), Ordering::Release);
        }
    }

    pub(crate) fn status(&self) -> DuplicateScanStatus {
        let scanned_files = self.done.load(Ordering::Acquire);
        let total_files = self.total.load(Ordering::Acquire);
        let mut progress_percent = if total_files > 0 {
            scanned_files as f64 * 100.0 / total_files as f64
        } else {
            0.0
        };
        progress_percent = progress_percent.clamp(0.0, 100.0);
        progress_percent = (progress_percent * 100.0).round() / 100.0;

        DuplicateScanStatus {
            running: self.running.load(Ordering::Acquire),
            cancel_requested: self.cancel_requested.load(Ordering::Acquire),
            scanned_files,
            total_files,
            groups_found: self.groups_found.load(Ordering::Acquire),
            progress_percent,
        }
    }
}

fn ensure_not_cancelled(progress: &DuplicateProgress) -> Result<(), ScanError> {
    if progress.is_cancelled() {
        Err(ScanError::DuplicateScanCancelled)
    } else {
        Ok(())
    }
}

/// Worker pool size for one parallel stage. A core or two stays reserved so
/// the host UI keeps breathing while hashes run.
fn worker_count(item_count: usize) -> usize {
    if item_count == 0 {
        return 1;
    }
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let reserved = if cores > 4 { 2 } else { 1 };
    cores.saturating_sub(reserved).max(1).min(item_count)
}

/// Runs `work` over every item from a shared atomic cursor. Results come
/// back positionally; items whose closure returned `None` (unreadable,
/// cancelled) stay `None`.
fn parallel_map<T, R, F>(
    items: &[T],
    progress: &DuplicateProgress,
    track_progress: bool,
    work: F,
) -> Vec<Option<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Option<R> + Sync,
{
    let mut results: Vec<Option<R>> = Vec::new();
    results.resize_with(items.len(), || None);
    if items.is_empty() {
        return results;
    }

    let workers = worker_count(items.len());
    let next_index = AtomicUsize::new(0);

    let collected: Vec<Vec<(usize, R)>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut local = Vec::new();
                    loop {
                        if progress.is_cancelled() {
                            break;
                        }
                        let index = next_index.fetch_add(1, Ordering::Relaxed);
                        if index >= items.len() {
                            break;
                        }
                        if let Some(value) = work(&items[index]) {
                            local.push((index, value));
                        }
                        if track_progress {
                            progress.add_done(1);
                        }
                    }
                    local
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_default())
            .collect()
    });

    for (index, value) in collected.into_iter().flatten() {
        results[index] = Some(value);
    }
    results
}

fn fnv1a_mix(hash: &mut u64, bytes: &[u8]) {
    for &byte in bytes {
        *hash ^= byte as u64;
        *hash = hash.wrapping_mul(FNV_PRIME);
    }
}

fn with_buffer<R>(
    cell: &'static std::thread::LocalKey<RefCell<Vec<u8>>>,
    len: usize,
    body: impl FnOnce(&mut [u8]) -> R,
) -> R {
    cell.with(|buffer| {
        let mut buffer = buffer.borrow_mut();
        if buffer.len() != len {
            buffer.resize(len, 0);
        }
        body(&mut buffer)
    })
}

/// FNV-1a over the file's size plus its first and last chunks of up to
/// 64 KiB. Short or failed reads disqualify the candidate rather than
/// producing a bogus signature.
fn quick_signature(file: &DuplicateFileRow, progress: &DuplicateProgress) -> Option<u64> {
    if progress.is_cancelled() {
        return None;
    }

    let mut hash = FNV_OFFSET_BASIS;
    fnv1a_mix(&mut hash, &file.size.to_le_bytes());
    if file.size == 0 {
        return Some(hash);
    }

    let mut handle = File::open(&file.path).ok()?;
    let head_len = file.size.min(QUICK_CHUNK_BYTES as u64) as usize;

    with_buffer(&QUICK_BUFFER, QUICK_CHUNK_BYTES, |buffer| {
        handle.read_exact(&mut buffer[..head_len]).ok()?;
        fnv1a_mix(&mut hash, &buffer[..head_len]);

        if file.size > head_len as u64 {
            if progress.is_cancelled() {
                return None;
            }
            let tail_len = file.size.min(QUICK_CHUNK_BYTES as u64) as usize;
            handle.seek(SeekFrom::Start(file.size - tail_len as u64)).ok()?;
            handle.read_exact(&mut buffer[..tail_len]).ok()?;
            fnv1a_mix(&mut hash, &buffer[..tail_len]);
        }
        Some(hash)
    })
}

/// FNV-1a over the whole file in 1 MiB reads.
fn hash_file_contents(path: &str, progress: &DuplicateProgress) -> Option<u64> {
    if progress.is_cancelled() {
        return None;
    }

    let mut handle = File::open(path).ok()?;
    let mut hash = FNV_OFFSET_BASIS;

    with_buffer(&READ_BUFFER, FULL_READ_CHUNK_BYTES, |buffer| {
        loop {
            if progress.is_cancelled() {
                return None;
            }
            let read = handle.read(buffer).ok()?;
            if read == 0 {
                return Some(hash);
            }
            fnv1a_mix(&mut hash, &buffer[..read]);
        }
    })
}

/// Fills `buffer` from `handle` until full or EOF.
fn read_full(handle: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0usize;
    while filled < buffer.len() {
        let read = handle.read(&mut buffer[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn files_byte_equal(left_path: &str, right_path: &str, progress: &DuplicateProgress) -> bool {
    if progress.is_cancelled() {
        return false;
    }

    let Ok(mut left) = File::open(left_path) else {
        return false;
    };
    let Ok(mut right) = File::open(right_path) else {
        return false;
    };

    COMPARE_BUFFERS.with(|buffers| {
        let mut buffers = buffers.borrow_mut();
        let (left_buffer, right_buffer) = &mut *buffers;
        if left_buffer.len() != FULL_READ_CHUNK_BYTES {
            left_buffer.resize(FULL_READ_CHUNK_BYTES, 0);
        }
        if right_buffer.len() != FULL_READ_CHUNK_BYTES {
            right_buffer.resize(FULL_READ_CHUNK_BYTES, 0);
        }

        loop {
            if progress.is_cancelled() {
                return false;
            }
            let (Ok(left_read), Ok(right_read)) = (
                read_full(&mut left, left_buffer),
                read_full(&mut right, right_buffer),
            ) else {
                return false;
            };
            if left_read != right_read {
                return false;
            }
            if left_read == 0 {
                return true;
            }
            if left_buffer[..left_read] != right_buffer[..right_read] {
                return false;
            }
        }
    })
}

fn build_group_id(size: u64, hash: u64, serial: u32) -> String {
    format!("{size:016x}:{hash:016x}:{serial:08x}")
}

fn make_group(
    size: u64,
    hash: u64,
    serial: &mut u32,
    members: Vec<DuplicateFileRow>,
    max_files_per_group: usize,
) -> DuplicateGroupRow {
    let file_count = members.len() as u32;
    let group_id = build_group_id(size, hash, *serial);
    *serial += 1;

    let mut files = members;
    files.truncate(max_files_per_group);

    DuplicateGroupRow {
        group_id,
        size,
        total_bytes: size * file_count as u64,
        file_count,
        files,
    }
}

pub(crate) fn find_duplicate_groups(
    snapshot: Vec<IndexedFile>,
    options: DuplicateScanOptions,
    progress: &DuplicateProgress,
) -> Result<Vec<DuplicateGroupRow>, ScanError> {
    // Stage 0: fresh metadata for every indexed file, in parallel.
    progress.add_total(snapshot.len() as u64);
    let metadata = parallel_map(&snapshot, progress, true, |file| {
        if file.is_directory {
            return None;
        }
        let metadata = read_file_metadata(&file.path).ok()?;
        (metadata.size >= options.min_size).then_some(metadata)
    });
    ensure_not_cancelled(progress)?;

    // Stage 1: bucket the survivors by exact size.
    let mut size_buckets: HashMap<u64, Vec<DuplicateFileRow>> = HashMap::new();
    for (file, metadata) in snapshot.iter().zip(&metadata) {
        let Some(metadata) = metadata else {
            continue;
        };
        size_buckets.entry(metadata.size).or_default().push(DuplicateFileRow {
            name: file.name.clone(),
            path: file.path.clone(),
            size: metadata.size,
            created_unix: metadata.created_unix,
            modified_unix: metadata.modified_unix,
        });
    }

    let mut groups: Vec<DuplicateGroupRow> = Vec::new();
    let mut serial: u32 = 0;

    'buckets: for (&size, bucket) in &size_buckets {
        ensure_not_cancelled(progress)?;
        if bucket.len() < 2 {
            continue;
        }

        // Empty files are byte-equal by definition; no reads needed.
        if size == 0 {
            groups.push(make_group(0, 0, &mut serial, bucket.clone(), options.max_files_per_group));
            progress.set_groups(groups.len() as u64);
            if groups.len() >= options.max_groups {
                break 'buckets;
            }
            continue;
        }

        // Stage 2: quick head/tail signature per size bucket.
        progress.add_total(bucket.len() as u64);
        let signatures =
            parallel_map(bucket, progress, true, |file| quick_signature(file, progress));
        ensure_not_cancelled(progress)?;

        let mut quick_buckets: HashMap<u64, Vec<usize>> = HashMap::new();
        for (index, signature) in signatures.iter().enumerate() {
            if let Some(signature) = signature {
                quick_buckets.entry(*signature).or_default().push(index);
            }
        }

        for quick_indices in quick_buckets.values() {
            if quick_indices.len() < 2 {
                continue;
            }
            let candidates: Vec<DuplicateFileRow> =
                quick_indices.iter().map(|&index| bucket[index].clone()).collect();

            // Stage 3: full-content hash only for signature collisions.
            progress.add_total(candidates.len() as u64);
            let hashes = parallel_map(&candidates, progress, true, |file| {
                hash_file_contents(&file.path, progress)
            });
            ensure_not_cancelled(progress)?;

            let mut hash_buckets: HashMap<u64, Vec<usize>> = HashMap::new();
            for (index, hash) in hashes.iter().enumerate() {
                if let Some(hash) = hash {
                    hash_buckets.entry(*hash).or_default().push(index);
                }
            }

            for (&hash, candidate_indices) in &hash_buckets {
                if candidate_indices.len() < 2 {
                    continue;
                }

                // Stage 4: cluster by byte equality against the first
                // member seen of each cluster.
                let mut clusters: Vec<Vec<usize>> = Vec::new();
                for &candidate in candidate_indices {
                    ensure_not_cancelled(progress)?;
                    let mut matched = false;
                    for cluster in &mut clusters {
                        let representative = cluster[0];
                        if files_byte_equal(
                            &candidates[candidate].path,
                            &candidates[representative].path,
                            progress,
                        ) {
                            cluster.push(candidate);
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        clusters.push(vec![candidate]);
                    }
                }

                for cluster in &clusters {
                    if cluster.len() < 2 {
                        continue;
                    }
                    let members: Vec<DuplicateFileRow> =
                        cluster.iter().map(|&index| candidates[index].clone()).collect();
                    groups.push(make_group(
                        size,
                        hash,
                        &mut serial,
                        members,
                        options.max_files_per_group,
                    ));
                    progress.set_groups(groups.len() as u64);
                    if groups.len() >= options.max_groups {
                        break 'buckets;
                    }
                }
            }
        }
    }

    ensure_not_cancelled(progress)?;
    progress.finish();

    // Largest win first: reclaimable bytes, then cluster size.
    groups.sort_by(|left, right| {
        let left_reclaimable = left.size * left.file_count.saturating_sub(1) as u64;
        let right_reclaimable = right.size * right.file_count.saturating_sub(1) as u64;
        right_reclaimable
            .cmp(&left_reclaimable)
            .then(right.file_count.cmp(&left.file_count))
    });

    Ok(groups)
}
