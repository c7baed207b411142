//! History Tracker: append-only audit trail.
//!
//! Called by the Entity Store inside the same transaction as the mutation it
//! describes, so a record exists if and only if its mutation committed. The
//! record holds the row as it was *before* the change.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use crate::error::{NoteFsError, Result};
use crate::storage::repository::read_content;
use crate::storage::{EntityKind, Folder, Note};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Update,
    Rename,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Update => "update",
            MutationKind::Rename => "rename",
            MutationKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "update" => Some(MutationKind::Update),
            "rename" => Some(MutationKind::Rename),
            "delete" => Some(MutationKind::Delete),
            _ => None,
        }
    }
}

/// Metadata of an entity before a mutation. Note content travels separately
/// as a BLOB so binary content survives intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub title: String,
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn of_folder(folder: &Folder) -> Self {
        Self {
            title: folder.title.clone(),
            parent_id: folder.parent_id.clone(),
            syntax: None,
            created_at: folder.created_at,
            updated_at: folder.updated_at,
        }
    }

    pub fn of_note(note: &Note) -> Self {
        Self {
            title: note.title.clone(),
            parent_id: note.parent_id.clone(),
            syntax: Some(note.syntax.clone()),
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub history_id: i64,
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub change_kind: MutationKind,
    pub snapshot: Snapshot,
    /// Previous note content for updates and deletes
    pub content: Option<Vec<u8>>,
    pub recorded_at: DateTime<Utc>,
}

pub struct HistoryTracker<'a> {
    conn: &'a Connection,
}

impl<'a> HistoryTracker<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn record(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        change_kind: MutationKind,
        snapshot: &Snapshot,
        content: Option<&[u8]>,
        recorded_at: DateTime<Utc>,
    ) -> Result<i64> {
        let snapshot_json = serde_json::to_string(snapshot)?;
        self.conn.execute(
            "INSERT INTO history (entity_id, entity_kind, change_kind, snapshot, content, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entity_id, entity_kind.as_str(), change_kind.as_str(),
                snapshot_json, content, recorded_at.naive_utc()
            ],
        )?;
        let history_id = self.conn.last_insert_rowid();
        tracing::debug!(
            "[HistoryTracker] #{} {} {} {}",
            history_id, change_kind.as_str(), entity_kind, entity_id
        );
        Ok(history_id)
    }

    /// Records for one entity, oldest first.
    pub fn for_entity(&self, entity_id: &str) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT history_id, entity_id, entity_kind, change_kind, snapshot, content, recorded_at
             FROM history WHERE entity_id = ?1 ORDER BY history_id ASC"
        )?;
        let rows = stmt.query_map(params![entity_id], |row| {
            let content = match row.get_ref(5)? {
                rusqlite::types::ValueRef::Null => None,
                _ => Some(read_content(row, 5)?),
            };
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                content,
                row.get::<_, NaiveDateTime>(6)?.and_utc(),
            ))
        })?;

        let mut records = Vec::new();
        for r in rows {
            let (history_id, entity_id, kind, change, snapshot, content, recorded_at) = r?;
            records.push(HistoryRecord {
                history_id,
                entity_id,
                entity_kind: EntityKind::parse(&kind)
                    .ok_or_else(|| NoteFsError::State(format!("unknown entity kind '{}'", kind)))?,
                change_kind: MutationKind::parse(&change)
                    .ok_or_else(|| NoteFsError::State(format!("unknown change kind '{}'", change)))?,
                snapshot: serde_json::from_str(&snapshot)?,
                content,
                recorded_at,
            });
        }
        Ok(records)
    }
}
