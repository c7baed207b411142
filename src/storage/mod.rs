// FILE: src/storage/mod.rs
pub mod connection;
pub mod repository;
pub mod schema;

// Common exports
pub use connection::ConnectionPool;
pub use repository::Repository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Data Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Folder,
    Note,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Folder => "folder",
            EntityKind::Note => "note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "folder" => Some(EntityKind::Folder),
            "note" => Some(EntityKind::Note),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn folder(id: impl Into<String>) -> Self {
        Self { kind: EntityKind::Folder, id: id.into() }
    }

    pub fn note(id: impl Into<String>) -> Self {
        Self { kind: EntityKind::Note, id: id.into() }
    }
}

/// What a path resolves to. The root is not a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Root,
    Entity(EntityRef),
}

impl Node {
    pub fn folder(id: impl Into<String>) -> Self {
        Node::Entity(EntityRef::folder(id))
    }

    pub fn note(id: impl Into<String>) -> Self {
        Node::Entity(EntityRef::note(id))
    }

    /// The Root behaves as a folder.
    pub fn kind(&self) -> EntityKind {
        match self {
            Node::Root => EntityKind::Folder,
            Node::Entity(e) => e.kind,
        }
    }

    /// Folder id usable as a `parent_id`; `None` for the root.
    pub fn as_parent(&self) -> Option<&str> {
        match self {
            Node::Root => None,
            Node::Entity(e) => Some(e.id.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub syntax: String,
    pub content: Vec<u8>,
    pub parent_id: Option<String>,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn file_name(&self) -> String {
        note_file_name(&self.title, &self.syntax)
    }
}

impl std::fmt::Display for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/ (folder: {})", self.title, self.id)
    }
}

impl std::fmt::Display for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (note: {}, size: {})", self.file_name(), self.id, self.content.len())
    }
}

/// One row of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub kind: EntityKind,
    pub id: String,
    pub title: String,
    /// Visible filename (`title.syntax` for notes)
    pub name: String,
}

/// Visible filename of a note: `title.syntax`, or bare `title` when syntax is empty.
pub fn note_file_name(title: &str, syntax: &str) -> String {
    if syntax.is_empty() {
        title.to_string()
    } else {
        format!("{}.{}", title, syntax)
    }
}

/// Split a visible filename on its final '.' into (title, syntax).
///
/// A leading dot (`.bashrc`) or trailing dot (`draft.`) is part of the title.
pub fn split_file_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_file_name() {
        assert_eq!(split_file_name("readme.md"), ("readme", "md"));
        assert_eq!(split_file_name("hello.world.txt"), ("hello.world", "txt"));
        assert_eq!(split_file_name("Makefile"), ("Makefile", ""));
        assert_eq!(split_file_name(".bashrc"), (".bashrc", ""));
        assert_eq!(split_file_name("draft."), ("draft.", ""));
    }

    #[test]
    fn test_note_file_name() {
        assert_eq!(note_file_name("readme", "md"), "readme.md");
        assert_eq!(note_file_name("LICENSE", ""), "LICENSE");
    }

    #[test]
    fn test_entity_kind_round_trips_through_text() {
        for kind in [EntityKind::Folder, EntityKind::Note] {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("tag"), None);
    }
}
