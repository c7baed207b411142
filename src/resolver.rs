//! Path Resolver: POSIX path <-> entity translation.
//!
//! Descends one indexed lookup per segment on the way down, and ascends the
//! parent chain (bounded, with a visited set) on the way up.

use std::collections::HashSet;
use rusqlite::Connection;
use crate::error::{NoteFsError, Result};
use crate::storage::schema::MAX_DEPTH;
use crate::storage::{EntityKind, Node, Repository, note_file_name, split_file_name};

/// Path segments, ignoring empty segments and `.`.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

/// Canonical form: leading '/', no empty or `.` segments.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", split_path(path).join("/"))
}

/// Split into (parent path, final name). Fails for the root itself.
pub fn parent_and_name(path: &str) -> Result<(String, String)> {
    let mut segments = split_path(path);
    let name = segments.pop()
        .ok_or_else(|| NoteFsError::InvalidName(format!("'{}' has no final segment", path)))?;
    Ok((format!("/{}", segments.join("/")), name.to_string()))
}

/// Join a directory path and a child name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

pub struct Resolver<'a> {
    repo: Repository<'a>,
}

impl<'a> Resolver<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { repo: Repository::new(conn) }
    }

    pub fn resolve(&self, path: &str, owner: &str) -> Result<Node> {
        let segments = split_path(path);
        let mut current = Node::Root;
        let mut walked = String::new();

        for (i, segment) in segments.iter().enumerate() {
            if *segment == ".." {
                return Err(NoteFsError::NotFound(path.to_string()));
            }
            walked.push('/');
            walked.push_str(segment);

            if current.kind() != EntityKind::Folder {
                // Previous segment was a note
                return Err(NoteFsError::TypeMismatch {
                    path: walked.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default(),
                    expected: EntityKind::Folder,
                });
            }

            let is_last = i + 1 == segments.len();
            current = match self.lookup_child(owner, current.as_parent(), segment)? {
                Some(node) => node,
                None if is_last => return Err(NoteFsError::NotFound(path.to_string())),
                None => return Err(NoteFsError::NotFound(walked)),
            };
        }

        Ok(current)
    }

    /// Match one visible name inside a scope.
    ///
    /// Order: folder title, then note (title, syntax) split on the final '.',
    /// then an extensionless note whose title is the whole name.
    pub fn lookup_child(&self, owner: &str, parent_id: Option<&str>, name: &str) -> Result<Option<Node>> {
        if let Some(id) = self.repo.find_folder(owner, parent_id, name)? {
            return Ok(Some(Node::folder(id)));
        }

        let (title, syntax) = split_file_name(name);
        if !syntax.is_empty() {
            if let Some(id) = self.repo.find_note(owner, parent_id, title, syntax)? {
                return Ok(Some(Node::note(id)));
            }
        }

        if let Some(id) = self.repo.find_note(owner, parent_id, name, "")? {
            return Ok(Some(Node::note(id)));
        }

        Ok(None)
    }

    pub fn full_path(&self, node: &Node) -> Result<String> {
        let entity = match node {
            Node::Root => return Ok("/".to_string()),
            Node::Entity(e) => e,
        };

        let (leaf, parent) = match entity.kind {
            EntityKind::Folder => {
                let (title, parent) = self.repo.folder_link(&entity.id)?
                    .ok_or_else(|| NoteFsError::NotFound(format!("folder {}", entity.id)))?;
                (title, parent)
            }
            EntityKind::Note => {
                let (title, syntax, parent) = self.repo.note_link(&entity.id)?
                    .ok_or_else(|| NoteFsError::NotFound(format!("note {}", entity.id)))?;
                (note_file_name(&title, &syntax), parent)
            }
        };

        let mut titles = self.ascend(parent, &entity.id)?;
        titles.push(leaf);
        Ok(format!("/{}", titles.join("/")))
    }

    /// True when `target_id` is `candidate_id` or one of its ancestors, i.e.
    /// moving `target_id` under `candidate_id` would close a cycle.
    pub fn ancestor_of(&self, candidate_id: &str, target_id: &str) -> Result<bool> {
        let mut visited = HashSet::new();
        let mut current = Some(candidate_id.to_string());

        while let Some(id) = current {
            if id == target_id {
                return Ok(true);
            }
            if !visited.insert(id.clone()) {
                return Err(NoteFsError::BrokenHierarchy(format!("cycle through folder {}", id)));
            }
            if visited.len() > MAX_DEPTH {
                return Err(NoteFsError::BrokenHierarchy(format!("ancestry of {} exceeds {} levels", candidate_id, MAX_DEPTH)));
            }
            current = match self.repo.folder_link(&id)? {
                Some((_, parent)) => parent,
                None => return Err(NoteFsError::NotFound(format!("folder {}", id))),
            };
        }

        Ok(false)
    }

    /// Titles of the folder chain from the root down to `start`.
    fn ascend(&self, start: Option<String>, origin: &str) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(origin.to_string());
        let mut current = start;

        while let Some(id) = current {
            if !visited.insert(id.clone()) {
                return Err(NoteFsError::BrokenHierarchy(format!("cycle through folder {}", id)));
            }
            if titles.len() >= MAX_DEPTH {
                return Err(NoteFsError::BrokenHierarchy(format!("path of {} exceeds {} levels", origin, MAX_DEPTH)));
            }
            let (title, parent) = self.repo.folder_link(&id)?
                .ok_or_else(|| NoteFsError::BrokenHierarchy(format!("dangling parent {}", id)))?;
            titles.push(title);
            current = parent;
        }

        titles.reverse();
        Ok(titles)
    }
}
