// FILE: src/adapter/scratch.rs
//! In-memory home for editor scratch files. Nothing here is persisted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use crate::error::{NoteFsError, Result};
use super::handles::bounded_len;

#[derive(Debug, Clone)]
pub struct ScratchFile {
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Scratch files keyed by full path.
pub struct ScratchArea {
    files: DashMap<String, ScratchFile>,
}

impl ScratchArea {
    pub fn new() -> Self {
        Self { files: DashMap::new() }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<ScratchFile> {
        self.files.get(path).map(|f| f.value().clone())
    }

    pub fn create(&self, path: &str, now: DateTime<Utc>) -> Result<()> {
        match self.files.entry(path.to_string()) {
            Entry::Occupied(_) => Err(NoteFsError::AlreadyExists(path.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(ScratchFile { content: Vec::new(), created_at: now, updated_at: now });
                Ok(())
            }
        }
    }

    /// Replace content, creating the file if it vanished meanwhile.
    pub fn store(&self, path: &str, content: &[u8], now: DateTime<Utc>) {
        self.files.entry(path.to_string())
            .and_modify(|f| {
                f.content = content.to_vec();
                f.updated_at = now.max(f.updated_at);
            })
            .or_insert_with(|| ScratchFile { content: content.to_vec(), created_at: now, updated_at: now });
    }

    pub fn resize(&self, path: &str, size: u64, limit: u64, now: DateTime<Utc>) -> Result<()> {
        let size = bounded_len(size, 0, limit)?;
        let mut file = self.files.get_mut(path)
            .ok_or_else(|| NoteFsError::NotFound(path.to_string()))?;
        if file.content.len() != size {
            file.content.resize(size, 0);
            file.updated_at = now.max(file.updated_at);
        }
        Ok(())
    }

    pub fn remove(&self, path: &str) -> Option<ScratchFile> {
        self.files.remove(path).map(|(_, f)| f)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let file = self.remove(from).ok_or_else(|| NoteFsError::NotFound(from.to_string()))?;
        self.files.insert(to.to_string(), file);
        Ok(())
    }

    /// Drop every scratch file below `dir`. Returns how many were dropped.
    pub fn discard_under(&self, dir: &str) -> usize {
        let prefix = dir_prefix(dir);
        let before = self.files.len();
        self.files.retain(|path, _| !path.starts_with(&prefix));
        before - self.files.len()
    }

    /// Re-home scratch files after their folder moved from `from` to `to`.
    pub fn move_dir(&self, from: &str, to: &str) -> Vec<(String, String)> {
        let old_prefix = dir_prefix(from);
        let new_prefix = dir_prefix(to);
        let affected: Vec<String> = self.files.iter()
            .filter(|e| e.key().starts_with(&old_prefix))
            .map(|e| e.key().clone())
            .collect();

        let mut moves = Vec::new();
        for old in affected {
            if let Some((_, file)) = self.files.remove(&old) {
                let new = format!("{}{}", new_prefix, &old[old_prefix.len()..]);
                self.files.insert(new.clone(), file);
                moves.push((old, new));
            }
        }
        moves
    }
}

impl Default for ScratchArea {
    fn default() -> Self {
        Self::new()
    }
}

fn dir_prefix(dir: &str) -> String {
    format!("{}/", dir.trim_end_matches('/'))
}
