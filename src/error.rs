//! Error types for NoteFS

use thiserror::Error;
use crate::storage::EntityKind;

#[derive(Error, Debug)]
pub enum NoteFsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Folder not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Move would create a folder cycle: {0}")]
    CycleRejected(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Store busy after {attempts} attempts")]
    TransientBusy { attempts: u32 },

    #[error("Type mismatch at {path}: expected {expected}")]
    TypeMismatch { path: String, expected: EntityKind },

    #[error("Invalid timestamps: {0}")]
    InvalidTimestamps(String),

    #[error("Broken hierarchy: {0}")]
    BrokenHierarchy(String),

    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Unknown file handle: {0}")]
    BadHandle(u64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("State error: {0}")]
    State(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl NoteFsError {
    /// Standard errno for the kernel reply.
    pub fn errno(&self) -> i32 {
        match self {
            NoteFsError::NotFound(_) => libc::ENOENT,
            NoteFsError::AlreadyExists(_) => libc::EEXIST,
            NoteFsError::NotEmpty(_) => libc::ENOTEMPTY,
            NoteFsError::InvalidName(_) => libc::EINVAL,
            NoteFsError::CycleRejected(_) => libc::EINVAL,
            NoteFsError::PermissionDenied(_) => libc::EACCES,
            NoteFsError::TransientBusy { .. } => libc::EAGAIN,
            NoteFsError::TypeMismatch { expected: EntityKind::Folder, .. } => libc::ENOTDIR,
            NoteFsError::TypeMismatch { expected: EntityKind::Note, .. } => libc::EISDIR,
            NoteFsError::InvalidTimestamps(_) => libc::EINVAL,
            NoteFsError::FileTooLarge { .. } => libc::EFBIG,
            NoteFsError::BadHandle(_) => libc::EBADF,
            _ => libc::EIO,
        }
    }

    /// Only an exhausted retry loop is worth retrying at the filesystem-call level.
    pub fn is_transient(&self) -> bool {
        matches!(self, NoteFsError::TransientBusy { .. })
    }

    /// SQLite lock contention, retried inside the store.
    pub(crate) fn is_busy(&self) -> bool {
        match self {
            NoteFsError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NoteFsError>;

/// Maps unique-index violations to AlreadyExists; other SQLite errors pass through.
pub(crate) trait SqliteResultExt<T> {
    fn map_sqlite(self) -> Result<T>;
}

impl<T> SqliteResultExt<T> for rusqlite::Result<T> {
    fn map_sqlite(self) -> Result<T> {
        self.map_err(|e| {
            let collision = matches!(
                &e,
                rusqlite::Error::SqliteFailure(f, _)
                    if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            );
            if collision {
                NoteFsError::AlreadyExists(e.to_string())
            } else {
                NoteFsError::Database(e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(NoteFsError::NotFound("x".into()).errno(), libc::ENOENT);
        assert_eq!(NoteFsError::AlreadyExists("x".into()).errno(), libc::EEXIST);
        assert_eq!(NoteFsError::NotEmpty("x".into()).errno(), libc::ENOTEMPTY);
        assert_eq!(NoteFsError::TransientBusy { attempts: 3 }.errno(), libc::EAGAIN);
        let through_file = NoteFsError::TypeMismatch { path: "/a.md/b".into(), expected: EntityKind::Folder };
        assert_eq!(through_file.errno(), libc::ENOTDIR);
        let unlink_dir = NoteFsError::TypeMismatch { path: "/a".into(), expected: EntityKind::Note };
        assert_eq!(unlink_dir.errno(), libc::EISDIR);
        assert_eq!(NoteFsError::FileTooLarge { size: 10, limit: 5 }.errno(), libc::EFBIG);
        assert_eq!(NoteFsError::State("poisoned".into()).errno(), libc::EIO);
    }

    #[test]
    fn test_only_busy_is_transient() {
        assert!(NoteFsError::TransientBusy { attempts: 5 }.is_transient());
        assert!(!NoteFsError::AlreadyExists("a".into()).is_transient());
        assert!(!NoteFsError::CycleRejected("a".into()).is_transient());
        assert!(!NoteFsError::NotEmpty("a".into()).is_transient());
    }

    #[test]
    fn test_sqlite_busy_detected() {
        let err = NoteFsError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_busy());
        assert!(!NoteFsError::NotFound("a".into()).is_busy());
    }
}
