// FILE: src/store.rs
//! Entity Store: transactional CRUD over folders and notes.
//!
//! Every public operation is one transaction on the pool. Validation, the row
//! mutation, the history record and the search index update all happen inside
//! it, so either all of them commit or none do.

use std::path::Path;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use crate::clock::{Clock, SystemClock};
use crate::config::StoreSettings;
use crate::error::{NoteFsError, Result};
use crate::history::{HistoryRecord, HistoryTracker, MutationKind, Snapshot};
use crate::resolver::Resolver;
use crate::search::{SearchHit, SearchIndexer};
use crate::storage::{
    ConnectionPool, DirEntry, EntityKind, EntityRef, Folder, Node, Note, Repository, note_file_name,
};

/// Caller-supplied timestamps for seeding tooling.
#[derive(Debug, Clone, Copy)]
pub struct Seed {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A resolved path together with its row.
#[derive(Debug, Clone)]
pub enum Entry {
    Root,
    Folder(Folder),
    Note(Note),
}

pub struct EntityStore {
    pool: ConnectionPool,
    clock: Arc<dyn Clock>,
}

impl EntityStore {
    /// Wrap an open pool. Rebuilds the search index if rows were written
    /// around the store (e.g. by an external seeder).
    pub fn new(pool: ConnectionPool, clock: Arc<dyn Clock>) -> Result<Self> {
        pool.write(|tx| {
            let indexer = SearchIndexer::new(tx);
            if !indexer.is_consistent()? {
                tracing::warn!("[EntityStore] Search index out of sync with notes, rebuilding");
                indexer.rebuild()?;
            }
            Ok(())
        })?;
        Ok(Self { pool, clock })
    }

    pub fn open(db_path: impl AsRef<Path>, settings: StoreSettings) -> Result<Self> {
        let pool = ConnectionPool::open(db_path, settings)?;
        Self::new(pool, Arc::new(SystemClock))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn max_file_size(&self) -> u64 {
        self.pool.settings().max_file_size
    }

    fn check_size(&self, content: &[u8]) -> Result<()> {
        let limit = self.max_file_size();
        if content.len() as u64 > limit {
            return Err(NoteFsError::FileTooLarge { size: content.len() as u64, limit });
        }
        Ok(())
    }

    // ---- Creation ----

    pub fn create_folder(&self, parent_id: Option<&str>, title: &str, owner: &str) -> Result<String> {
        let now = self.now();
        self.insert_folder(parent_id, title, owner, Seed { created_at: now, updated_at: now })
    }

    pub fn create_note(
        &self,
        parent_id: Option<&str>,
        title: &str,
        syntax: &str,
        content: &[u8],
        owner: &str,
    ) -> Result<String> {
        let now = self.now();
        self.insert_note(parent_id, title, syntax, content, owner, Seed { created_at: now, updated_at: now })
    }

    pub fn seed_folder(&self, parent_id: Option<&str>, title: &str, owner: &str, seed: Seed) -> Result<String> {
        check_seed(&seed)?;
        self.insert_folder(parent_id, title, owner, seed)
    }

    pub fn seed_note(
        &self,
        parent_id: Option<&str>,
        title: &str,
        syntax: &str,
        content: &[u8],
        owner: &str,
        seed: Seed,
    ) -> Result<String> {
        check_seed(&seed)?;
        self.insert_note(parent_id, title, syntax, content, owner, seed)
    }

    fn insert_folder(&self, parent_id: Option<&str>, title: &str, owner: &str, seed: Seed) -> Result<String> {
        validate_title(title)?;
        let folder = Folder {
            id: new_id(),
            title: title.to_string(),
            parent_id: parent_id.map(String::from),
            owner: owner.to_string(),
            created_at: seed.created_at,
            updated_at: seed.updated_at,
        };

        self.pool.write(|tx| {
            check_parent(tx, parent_id, owner)?;
            ensure_name_free(tx, owner, parent_id, title, None)?;
            Repository::new(tx).insert_folder(&folder)
        })?;

        tracing::info!("[EntityStore] Created folder '{}' ({})", folder.title, folder.id);
        Ok(folder.id)
    }

    fn insert_note(
        &self,
        parent_id: Option<&str>,
        title: &str,
        syntax: &str,
        content: &[u8],
        owner: &str,
        seed: Seed,
    ) -> Result<String> {
        validate_title(title)?;
        validate_syntax(syntax)?;
        self.check_size(content)?;
        let note = Note {
            id: new_id(),
            title: title.to_string(),
            syntax: syntax.to_string(),
            content: content.to_vec(),
            parent_id: parent_id.map(String::from),
            owner: owner.to_string(),
            created_at: seed.created_at,
            updated_at: seed.updated_at,
        };
        let name = note.file_name();

        self.pool.write(|tx| {
            check_parent(tx, parent_id, owner)?;
            ensure_name_free(tx, owner, parent_id, &name, None)?;
            Repository::new(tx).insert_note(&note)?;
            SearchIndexer::new(tx).index_note(&note.id)
        })?;

        tracing::info!("[EntityStore] Created note '{}' ({}, {} bytes)", name, note.id, note.content.len());
        Ok(note.id)
    }

    // ---- Reads ----

    pub fn read_folder(&self, id: &str, owner: &str) -> Result<Folder> {
        self.pool.read(|tx| fetch_folder(tx, id, owner))
    }

    pub fn read_note(&self, id: &str, owner: &str) -> Result<Note> {
        self.pool.read(|tx| fetch_note(tx, id, owner))
    }

    /// Children of a folder (`None` for the root), ordered by title.
    pub fn read_folder_children(&self, parent_id: Option<&str>, owner: &str) -> Result<Vec<DirEntry>> {
        self.pool.read(|tx| {
            if let Some(id) = parent_id {
                fetch_folder(tx, id, owner)?;
            }
            Repository::new(tx).list_children(owner, parent_id)
        })
    }

    /// Resolve a path and load its row in one snapshot.
    pub fn lookup_path(&self, path: &str, owner: &str) -> Result<Entry> {
        self.pool.read(|tx| {
            match Resolver::new(tx).resolve(path, owner)? {
                Node::Root => Ok(Entry::Root),
                Node::Entity(e) => match e.kind {
                    EntityKind::Folder => Ok(Entry::Folder(fetch_folder(tx, &e.id, owner)?)),
                    EntityKind::Note => Ok(Entry::Note(fetch_note(tx, &e.id, owner)?)),
                },
            }
        })
    }

    pub fn resolve(&self, path: &str, owner: &str) -> Result<Node> {
        self.pool.read(|tx| Resolver::new(tx).resolve(path, owner))
    }

    pub fn full_path(&self, node: &Node) -> Result<String> {
        self.pool.read(|tx| Resolver::new(tx).full_path(node))
    }

    pub fn ancestor_of(&self, candidate_id: &str, target_id: &str) -> Result<bool> {
        self.pool.read(|tx| Resolver::new(tx).ancestor_of(candidate_id, target_id))
    }

    pub fn search(&self, query: &str, owner: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.pool.read(|tx| SearchIndexer::new(tx).search(query, owner, limit))
    }

    pub fn history(&self, entity_id: &str) -> Result<Vec<HistoryRecord>> {
        self.pool.read(|tx| HistoryTracker::new(tx).for_entity(entity_id))
    }

    /// Every path of an owner, computed by the path views.
    pub fn paths(&self, owner: &str) -> Result<Vec<(Node, String)>> {
        self.pool.read(|tx| Repository::new(tx).all_paths(owner))
    }

    // ---- Mutations ----

    /// Replace a note's content. Returns the note as committed.
    pub fn write_note(&self, id: &str, content: &[u8], owner: &str) -> Result<Note> {
        self.check_size(content)?;
        let now = self.now();
        let note = self.pool.write(|tx| {
            let previous = fetch_note(tx, id, owner)?;
            let updated_at = now.max(previous.updated_at);

            HistoryTracker::new(tx).record(
                EntityKind::Note, id, MutationKind::Update,
                &Snapshot::of_note(&previous), Some(&previous.content), now,
            )?;
            Repository::new(tx).update_note_content(id, content, updated_at)?;

            SearchIndexer::new(tx).index_note(id)?;
            Ok(Note { content: content.to_vec(), updated_at, ..previous })
        })?;

        tracing::debug!("[EntityStore] Wrote {} bytes to note {}", note.content.len(), id);
        Ok(note)
    }

    /// Rename and/or move a folder or note. `new_syntax` of `None` keeps a
    /// note's current syntax. Returns false when nothing changed.
    pub fn rename_or_move(
        &self,
        target: &EntityRef,
        new_parent_id: Option<&str>,
        new_title: &str,
        new_syntax: Option<&str>,
        owner: &str,
    ) -> Result<bool> {
        validate_title(new_title)?;
        if let Some(syntax) = new_syntax {
            validate_syntax(syntax)?;
        }
        let now = self.now();

        let moved = self.pool.write(|tx| match target.kind {
            EntityKind::Folder => {
                if new_syntax.is_some_and(|s| !s.is_empty()) {
                    return Err(NoteFsError::InvalidName(format!("folder '{}' cannot take a syntax", new_title)));
                }
                let previous = fetch_folder(tx, &target.id, owner)?;
                if previous.parent_id.as_deref() == new_parent_id && previous.title == new_title {
                    return Ok(false);
                }
                check_parent(tx, new_parent_id, owner)?;
                if let Some(parent) = new_parent_id {
                    // Same transaction as the update, so no descendant can appear in between
                    if Resolver::new(tx).ancestor_of(parent, &target.id)? {
                        return Err(NoteFsError::CycleRejected(format!(
                            "folder {} cannot move under its own descendant {}", target.id, parent
                        )));
                    }
                }
                ensure_name_free(tx, owner, new_parent_id, new_title, Some(target))?;

                HistoryTracker::new(tx).record(
                    EntityKind::Folder, &target.id, MutationKind::Rename,
                    &Snapshot::of_folder(&previous), None, now,
                )?;
                Repository::new(tx).move_folder(&target.id, new_parent_id, new_title, now.max(previous.updated_at))?;
                Ok(true)
            }
            EntityKind::Note => {
                let previous = fetch_note(tx, &target.id, owner)?;
                let syntax = new_syntax.unwrap_or(&previous.syntax).to_string();
                if previous.parent_id.as_deref() == new_parent_id
                    && previous.title == new_title
                    && previous.syntax == syntax
                {
                    return Ok(false);
                }
                check_parent(tx, new_parent_id, owner)?;
                ensure_name_free(tx, owner, new_parent_id, &note_file_name(new_title, &syntax), Some(target))?;

                HistoryTracker::new(tx).record(
                    EntityKind::Note, &target.id, MutationKind::Rename,
                    &Snapshot::of_note(&previous), None, now,
                )?;
                let updated_at = now.max(previous.updated_at);
                Repository::new(tx).move_note(&target.id, new_parent_id, new_title, &syntax, updated_at)?;
                SearchIndexer::new(tx).index_note(&target.id)?;
                Ok(true)
            }
        })?;

        if moved {
            tracing::info!("[EntityStore] Renamed {} {} -> '{}'", target.kind, target.id, new_title);
        }
        Ok(moved)
    }

    pub fn delete_folder(&self, id: &str, owner: &str) -> Result<()> {
        let now = self.now();
        self.pool.write(|tx| {
            let folder = fetch_folder(tx, id, owner)?;
            let repo = Repository::new(tx);
            if repo.count_children(id)? > 0 {
                return Err(NoteFsError::NotEmpty(folder.title.clone()));
            }
            HistoryTracker::new(tx).record(
                EntityKind::Folder, id, MutationKind::Delete, &Snapshot::of_folder(&folder), None, now,
            )?;
            repo.delete_folder(id)?;
            Ok(())
        })?;

        tracing::info!("[EntityStore] Deleted folder {}", id);
        Ok(())
    }

    pub fn delete_note(&self, id: &str, owner: &str) -> Result<()> {
        let now = self.now();
        self.pool.write(|tx| {
            let note = fetch_note(tx, id, owner)?;
            HistoryTracker::new(tx).record(
                EntityKind::Note, id, MutationKind::Delete, &Snapshot::of_note(&note), Some(&note.content), now,
            )?;
            SearchIndexer::new(tx).remove_note(id)?;
            Repository::new(tx).delete_note(id)
        })?;

        tracing::info!("[EntityStore] Deleted note {}", id);
        Ok(())
    }
}

// ---- Helpers (run inside the caller's transaction) ----

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn check_seed(seed: &Seed) -> Result<()> {
    if seed.updated_at < seed.created_at {
        return Err(NoteFsError::InvalidTimestamps(format!(
            "updated_at {} precedes created_at {}", seed.updated_at, seed.created_at
        )));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<()> {
    if title.is_empty() || title == "." || title == ".." {
        return Err(NoteFsError::InvalidName(format!("'{}' is not a usable title", title)));
    }
    if title.contains('/') || title.contains('\0') {
        return Err(NoteFsError::InvalidName(format!("'{}' contains a path separator or NUL", title)));
    }
    Ok(())
}

fn validate_syntax(syntax: &str) -> Result<()> {
    if syntax.contains(['/', '.', '\0']) {
        return Err(NoteFsError::InvalidName(format!("'{}' is not a usable syntax", syntax)));
    }
    Ok(())
}

/// Another owner's row looks missing to creation paths and forbidden to id-based ones.
fn authorize(row_owner: &str, owner: &str, kind: EntityKind, id: &str) -> Result<()> {
    if row_owner != owner {
        return Err(NoteFsError::PermissionDenied(format!("{} {} belongs to another user", kind, id)));
    }
    Ok(())
}

fn fetch_folder(conn: &Connection, id: &str, owner: &str) -> Result<Folder> {
    let folder = Repository::new(conn).get_folder(id)?
        .ok_or_else(|| NoteFsError::NotFound(format!("folder {}", id)))?;
    authorize(&folder.owner, owner, EntityKind::Folder, id)?;
    Ok(folder)
}

fn fetch_note(conn: &Connection, id: &str, owner: &str) -> Result<Note> {
    let note = Repository::new(conn).get_note(id)?
        .ok_or_else(|| NoteFsError::NotFound(format!("note {}", id)))?;
    authorize(&note.owner, owner, EntityKind::Note, id)?;
    Ok(note)
}

/// The destination scope must be the root or an existing folder of the same owner.
fn check_parent(conn: &Connection, parent_id: Option<&str>, owner: &str) -> Result<()> {
    let Some(id) = parent_id else { return Ok(()) };
    match Repository::new(conn).owner_of(EntityKind::Folder, id)? {
        Some(row_owner) if row_owner == owner => Ok(()),
        _ => Err(NoteFsError::NotFound(format!("parent folder {}", id))),
    }
}

/// Visible names are unique per scope across folders and notes alike.
fn ensure_name_free(
    conn: &Connection,
    owner: &str,
    parent_id: Option<&str>,
    name: &str,
    except: Option<&EntityRef>,
) -> Result<()> {
    match Resolver::new(conn).lookup_child(owner, parent_id, name)? {
        Some(Node::Entity(existing)) if Some(&existing) != except => {
            Err(NoteFsError::AlreadyExists(name.to_string()))
        }
        _ => Ok(()),
    }
}
