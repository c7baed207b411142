// FILE: src/adapter/handles.rs
//! Open-file table: kernel handle -> dirty buffer.
//!
//! Each entry is owned by the handle that created it. The table itself is the
//! only shared structure; buffers sit behind their own mutex so writes on one
//! handle never wait on another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use dashmap::DashMap;
use crate::error::{NoteFsError, Result};

/// What an open handle commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleTarget {
    /// A note row, by id
    Note(String),
    /// An in-memory scratch file, by path
    Scratch(String),
}

/// Buffer length needed to hold `len` bytes at `offset`, if that stays within `limit`.
pub fn bounded_len(offset: u64, len: usize, limit: u64) -> Result<usize> {
    let too_large = || NoteFsError::FileTooLarge { size: offset.saturating_add(len as u64), limit };
    let end = offset.checked_add(len as u64).ok_or_else(too_large)?;
    if end > limit {
        return Err(too_large());
    }
    usize::try_from(end).map_err(|_| too_large())
}

#[derive(Debug)]
pub struct OpenFile {
    pub target: HandleTarget,
    pub buffer: Vec<u8>,
    /// Modified since the last commit
    pub dirty: bool,
    /// Largest size the buffer may grow to
    limit: u64,
}

impl OpenFile {
    pub fn new(target: HandleTarget, buffer: Vec<u8>, limit: u64) -> Self {
        Self { target, buffer, dirty: false, limit }
    }

    pub fn read(&self, offset: u64, size: usize) -> Vec<u8> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.buffer.len());
        let end = start.saturating_add(size).min(self.buffer.len());
        self.buffer[start..end].to_vec()
    }

    /// Write at `offset`, zero-filling any gap past the current end.
    /// Nothing changes when the write would pass the size limit.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        let end = bounded_len(offset, data.len(), self.limit)?;
        let start = end - data.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[start..end].copy_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    pub fn truncate(&mut self, size: u64) -> Result<()> {
        let size = bounded_len(size, 0, self.limit)?;
        if self.buffer.len() != size {
            self.buffer.resize(size, 0);
            self.dirty = true;
        }
        Ok(())
    }
}

pub type SharedFile = Arc<Mutex<OpenFile>>;

pub struct HandleTable {
    next: AtomicU64,
    files: DashMap<u64, SharedFile>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            // 0 is never handed out
            next: AtomicU64::new(1),
            files: DashMap::new(),
        }
    }

    pub fn insert(&self, file: OpenFile) -> u64 {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.files.insert(fh, Arc::new(Mutex::new(file)));
        fh
    }

    pub fn get(&self, fh: u64) -> Result<SharedFile> {
        // Clone the Arc out so the shard lock is released before the caller locks the file
        self.files.get(&fh).map(|f| f.value().clone()).ok_or(NoteFsError::BadHandle(fh))
    }

    /// Remove a handle from the table; the caller now owns its buffer.
    pub fn take(&self, fh: u64) -> Result<SharedFile> {
        self.files.remove(&fh).map(|(_, f)| f).ok_or(NoteFsError::BadHandle(fh))
    }

    /// Remove every handle, e.g. on unmount.
    pub fn drain(&self) -> Vec<(u64, SharedFile)> {
        let handles: Vec<u64> = self.files.iter().map(|e| *e.key()).collect();
        handles.into_iter()
            .filter_map(|fh| self.files.remove(&fh))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Length of an uncommitted buffer for `target`, if any handle holds one.
    pub fn dirty_len(&self, target: &HandleTarget) -> Option<u64> {
        let candidates: Vec<SharedFile> = self.files.iter().map(|e| e.value().clone()).collect();
        candidates.iter().find_map(|file| {
            let file = file.lock().ok()?;
            (file.dirty && &file.target == target).then(|| file.buffer.len() as u64)
        })
    }

    /// Point every handle on `from` at `to` (after a rename or promotion).
    pub fn retarget(&self, from: &HandleTarget, to: &HandleTarget) -> Result<usize> {
        let candidates: Vec<SharedFile> = self.files.iter().map(|e| e.value().clone()).collect();
        let mut moved = 0;
        for file in candidates {
            let mut file = lock(&file)?;
            if &file.target == from {
                file.target = to.clone();
                moved += 1;
            }
        }
        Ok(moved)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn lock(file: &SharedFile) -> Result<MutexGuard<'_, OpenFile>> {
    file.lock().map_err(|_| NoteFsError::State("Poisoned open-file lock".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_write_read_and_gap_fill() {
        let mut file = OpenFile::new(HandleTarget::Note("n".into()), b"hello".to_vec(), 64);
        assert!(!file.dirty);
        assert_eq!(file.read(1, 3), b"ell");
        assert_eq!(file.read(10, 3), b"");

        file.write(5, b" world").unwrap();
        assert_eq!(file.buffer, b"hello world");
        file.write(13, b"!").unwrap();
        assert_eq!(file.buffer, b"hello world\0\0!");
        assert!(file.dirty);
    }

    #[test]
    fn test_truncate_to_same_size_stays_clean() {
        let mut file = OpenFile::new(HandleTarget::Note("n".into()), b"abc".to_vec(), 64);
        file.truncate(3).unwrap();
        assert!(!file.dirty);
        file.truncate(1).unwrap();
        assert_eq!(file.buffer, b"a");
        assert!(file.dirty);
    }

    #[test]
    fn test_handles_are_unique_and_removed_once() {
        let table = HandleTable::new();
        let a = table.insert(OpenFile::new(HandleTarget::Note("n".into()), Vec::new(), 64));
        let b = table.insert(OpenFile::new(HandleTarget::Note("n".into()), Vec::new(), 64));
        assert_ne!(a, b);
        assert_ne!(a, 0);

        table.take(a).unwrap();
        assert!(matches!(table.take(a), Err(NoteFsError::BadHandle(_))));
        assert!(matches!(table.get(a), Err(NoteFsError::BadHandle(_))));
        assert_eq!(table.len(), 1);
        assert_eq!(table.drain().len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_dirty_len_and_retarget() {
        let table = HandleTable::new();
        let scratch = HandleTarget::Scratch("/a.tmp".into());
        let fh = table.insert(OpenFile::new(scratch.clone(), Vec::new(), 64));
        assert_eq!(table.dirty_len(&scratch), None);

        lock(&table.get(fh).unwrap()).unwrap().write(0, b"1234").unwrap();
        assert_eq!(table.dirty_len(&scratch), Some(4));

        let note = HandleTarget::Note("n1".into());
        assert_eq!(table.retarget(&scratch, &note).unwrap(), 1);
        assert_eq!(table.dirty_len(&note), Some(4));
        assert_eq!(table.dirty_len(&scratch), None);
    }

    #[test]
    fn test_size_limit_is_checked_before_resizing() {
        let mut file = OpenFile::new(HandleTarget::Note("n".into()), b"abc".to_vec(), 8);
        assert!(matches!(file.truncate(u64::MAX), Err(NoteFsError::FileTooLarge { .. })));
        assert!(matches!(file.truncate(9), Err(NoteFsError::FileTooLarge { .. })));
        assert!(matches!(file.write(u64::MAX - 10, b"x"), Err(NoteFsError::FileTooLarge { .. })));
        assert!(matches!(file.write(6, b"xyz"), Err(NoteFsError::FileTooLarge { .. })));
        assert_eq!(file.buffer, b"abc");
        assert!(!file.dirty);

        // exactly at the limit is fine
        assert_eq!(file.write(5, b"xyz").unwrap(), 3);
        assert_eq!(file.buffer, b"abc\0\0xyz");
        file.truncate(8).unwrap();
        assert_eq!(file.read(u64::MAX, 4), b"");
    }

    #[test]
    fn test_bounded_len() {
        assert_eq!(bounded_len(4, 4, 8).unwrap(), 8);
        assert!(bounded_len(u64::MAX, 1, u64::MAX).is_err());
        assert!(matches!(bounded_len(9, 0, 8), Err(NoteFsError::FileTooLarge { size: 9, limit: 8 })));
    }
}
