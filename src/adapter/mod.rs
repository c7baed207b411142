// FILE: src/adapter/mod.rs
//! Filesystem Adapter: POSIX call semantics over the Entity Store.
//!
//! Path-qualified calls in, attributes / bytes / typed errors out. The only
//! state kept between calls is the open-file table and the scratch area; every
//! row lives in the store.

pub mod handles;
pub mod scratch;

use std::sync::Arc;
use chrono::{DateTime, Utc};
use crate::config::NamePolicy;
use crate::core::bouncer::Bouncer;
use crate::error::{NoteFsError, Result};
use crate::resolver::{normalize_path, parent_and_name};
use crate::storage::{EntityKind, EntityRef, Node, split_file_name};
use crate::store::{EntityStore, Entry};
use handles::{HandleTable, HandleTarget, OpenFile, bounded_len, lock};
use scratch::{ScratchArea, ScratchFile};

/// Conventional directory size.
pub const FOLDER_SIZE: u64 = 4096;
const FOLDER_PERM: u16 = 0o755;
const NOTE_PERM: u16 = 0o644;
const SEARCH_LIMIT: usize = 50;

/// Anything the kernel can hold an inode for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Node(Node),
    Scratch(String),
}

#[derive(Debug, Clone)]
pub struct Attr {
    pub target: Target,
    pub kind: EntityKind,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attr {
    fn folder(node: Node, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            target: Target::Node(node),
            kind: EntityKind::Folder,
            size: FOLDER_SIZE,
            perm: FOLDER_PERM,
            nlink: 2,
            created_at,
            updated_at,
        }
    }

    fn file(target: Target, size: u64, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self { target, kind: EntityKind::Note, size, perm: NOTE_PERM, nlink: 1, created_at, updated_at }
    }

    /// Status change time comes from the row's creation
    pub fn ctime(&self) -> DateTime<Utc> { self.created_at }
    pub fn crtime(&self) -> DateTime<Utc> { self.created_at }
    pub fn mtime(&self) -> DateTime<Utc> { self.updated_at }
    pub fn atime(&self) -> DateTime<Utc> { self.updated_at }
}

#[derive(Debug, Clone)]
pub struct DirItem {
    pub name: String,
    pub kind: EntityKind,
    pub target: Target,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub note_id: String,
    pub path: String,
    pub score: f64,
}

/// Targets whose identity moved during a rename, old -> new.
pub type Retargeted = Vec<(Target, Target)>;

pub struct Adapter {
    store: Arc<EntityStore>,
    owner: String,
    policy: NamePolicy,
    handles: HandleTable,
    scratch: ScratchArea,
    started_at: DateTime<Utc>,
    max_file_size: u64,
}

impl Adapter {
    pub fn new(store: Arc<EntityStore>, owner: impl Into<String>, policy: NamePolicy) -> Self {
        let started_at = store.now();
        let max_file_size = store.max_file_size();
        Self {
            store,
            owner: owner.into(),
            policy,
            handles: HandleTable::new(),
            scratch: ScratchArea::new(),
            started_at,
            max_file_size,
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Path of anything an inode may point at.
    pub fn path_of(&self, target: &Target) -> Result<String> {
        match target {
            Target::Node(node) => self.store.full_path(node),
            Target::Scratch(path) => Ok(path.clone()),
        }
    }

    // ---- Attributes & listings ----

    pub fn lookup(&self, path: &str) -> Result<Attr> {
        tracing::debug!("[Adapter] lookup {}", path);
        self.getattr(path)
    }

    pub fn getattr(&self, path: &str) -> Result<Attr> {
        let key = normalize_path(path);
        if let Some(file) = self.scratch.get(&key) {
            return Ok(self.scratch_attr(&key, &file));
        }
        let entry = self.store.lookup_path(&key, &self.owner)?;
        Ok(self.entry_attr(&entry))
    }

    /// `.` and `..` first, then children ordered by title. Scratch files are not listed.
    pub fn readdir(&self, path: &str) -> Result<Vec<DirItem>> {
        let key = normalize_path(path);
        let node = self.resolve_folder(&key)?;
        let parent = match node {
            Node::Root => Node::Root,
            Node::Entity(_) => {
                let (parent_path, _) = parent_and_name(&key)?;
                self.store.resolve(&parent_path, &self.owner)?
            }
        };

        let children = self.store.read_folder_children(node.as_parent(), &self.owner)?;
        let mut items = Vec::with_capacity(children.len() + 2);
        items.push(DirItem { name: ".".into(), kind: EntityKind::Folder, target: Target::Node(node) });
        items.push(DirItem { name: "..".into(), kind: EntityKind::Folder, target: Target::Node(parent) });
        for child in children {
            let node = match child.kind {
                EntityKind::Folder => Node::folder(child.id),
                EntityKind::Note => Node::note(child.id),
            };
            items.push(DirItem { name: child.name, kind: child.kind, target: Target::Node(node) });
        }

        tracing::debug!("[Adapter] readdir {} -> {} entries", key, items.len());
        Ok(items)
    }

    // ---- Folders ----

    pub fn mkdir(&self, path: &str) -> Result<Attr> {
        let key = normalize_path(path);
        let (parent_path, name) = parent_and_name(&key)?;
        if self.scratch.contains(&key) {
            return Err(NoteFsError::AlreadyExists(key));
        }
        let parent = self.resolve_folder(&parent_path)?;
        let id = self.store.create_folder(parent.as_parent(), &name, &self.owner)?;
        let folder = self.store.read_folder(&id, &self.owner)?;
        Ok(Attr::folder(Node::folder(id), folder.created_at, folder.updated_at))
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let key = normalize_path(path);
        match self.store.lookup_path(&key, &self.owner)? {
            Entry::Root => Err(NoteFsError::PermissionDenied("cannot remove the root".into())),
            Entry::Note(_) => Err(NoteFsError::TypeMismatch { path: key, expected: EntityKind::Folder }),
            Entry::Folder(folder) => {
                self.store.delete_folder(&folder.id, &self.owner)?;
                let dropped = self.scratch.discard_under(&key);
                if dropped > 0 {
                    tracing::debug!("[Adapter] Dropped {} scratch files under {}", dropped, key);
                }
                Ok(())
            }
        }
    }

    // ---- Files ----

    /// Create an empty file and open it.
    pub fn create(&self, path: &str) -> Result<(Attr, u64)> {
        let key = normalize_path(path);
        let (parent_path, name) = parent_and_name(&key)?;
        let parent = self.resolve_folder(&parent_path)?;

        if self.is_scratch_name(&name) {
            if self.store.resolve(&key, &self.owner).is_ok() {
                return Err(NoteFsError::AlreadyExists(key));
            }
            let now = self.store.now();
            self.scratch.create(&key, now)?;
            let fh = self.handles.insert(OpenFile::new(HandleTarget::Scratch(key.clone()), Vec::new(), self.max_file_size));
            tracing::debug!("[Adapter] Scratch file {} opened as fh {}", key, fh);
            return Ok((Attr::file(Target::Scratch(key), 0, now, now), fh));
        }

        let (title, syntax) = self.note_name(&name)?;
        let id = self.store.create_note(parent.as_parent(), title, syntax, &[], &self.owner)?;
        let note = self.store.read_note(&id, &self.owner)?;
        let fh = self.handles.insert(OpenFile::new(HandleTarget::Note(id.clone()), Vec::new(), self.max_file_size));
        Ok((Attr::file(Target::Node(Node::note(id)), 0, note.created_at, note.updated_at), fh))
    }

    /// Open a file, loading its committed content into a fresh buffer.
    pub fn open(&self, path: &str, truncate: bool) -> Result<u64> {
        let key = normalize_path(path);
        let (target, content) = match self.scratch.get(&key) {
            Some(file) => (HandleTarget::Scratch(key.clone()), file.content),
            None => match self.store.lookup_path(&key, &self.owner)? {
                Entry::Note(note) => (HandleTarget::Note(note.id), note.content),
                _ => return Err(NoteFsError::TypeMismatch { path: key, expected: EntityKind::Note }),
            },
        };

        let mut file = OpenFile::new(target, content, self.max_file_size);
        if truncate {
            file.truncate(0)?;
        }
        let fh = self.handles.insert(file);
        tracing::debug!("[Adapter] open {} -> fh {}", key, fh);
        Ok(fh)
    }

    pub fn read(&self, fh: u64, offset: u64, size: usize) -> Result<Vec<u8>> {
        let file = self.handles.get(fh)?;
        let file = lock(&file)?;
        Ok(file.read(offset, size))
    }

    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<usize> {
        let file = self.handles.get(fh)?;
        let mut file = lock(&file)?;
        file.write(offset, data)
    }

    /// Resize through an open handle if given, else directly on the stored row.
    pub fn truncate(&self, path: &str, size: u64, fh: Option<u64>) -> Result<()> {
        if let Some(fh) = fh {
            let file = self.handles.get(fh)?;
            return lock(&file)?.truncate(size);
        }

        let key = normalize_path(path);
        if self.scratch.contains(&key) {
            return self.scratch.resize(&key, size, self.max_file_size, self.store.now());
        }
        match self.store.lookup_path(&key, &self.owner)? {
            Entry::Note(note) => {
                let size = bounded_len(size, 0, self.max_file_size)?;
                if note.content.len() == size {
                    return Ok(());
                }
                let mut content = note.content;
                content.resize(size, 0);
                self.store.write_note(&note.id, &content, &self.owner)?;
                Ok(())
            }
            _ => Err(NoteFsError::TypeMismatch { path: key, expected: EntityKind::Note }),
        }
    }

    /// Commit the handle's buffer if it changed since the last commit.
    pub fn flush(&self, fh: u64) -> Result<()> {
        let file = self.handles.get(fh)?;
        let mut file = lock(&file)?;
        self.commit(&mut file)
    }

    /// Flush then discard. The handle leaves the table before the commit, so it
    /// is gone even when the commit fails.
    pub fn release(&self, fh: u64) -> Result<()> {
        let file = self.handles.take(fh)?;
        let mut file = lock(&file)?;
        self.commit(&mut file)
    }

    /// Release every open handle (unmount). Returns how many were released.
    pub fn release_all(&self) -> usize {
        let drained = self.handles.drain();
        let count = drained.len();
        for (fh, file) in drained {
            if let Err(e) = lock(&file).and_then(|mut f| self.commit(&mut f)) {
                tracing::error!("[Adapter] Lost buffer of fh {} on release: {}", fh, e);
            }
        }
        if count > 0 {
            tracing::info!("[Adapter] Released {} open handles", count);
        }
        count
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let key = normalize_path(path);
        if self.scratch.remove(&key).is_some() {
            tracing::debug!("[Adapter] Discarded scratch file {}", key);
            return Ok(());
        }
        match self.store.lookup_path(&key, &self.owner)? {
            Entry::Note(note) => self.store.delete_note(&note.id, &self.owner),
            _ => Err(NoteFsError::TypeMismatch { path: key, expected: EntityKind::Note }),
        }
    }

    /// Rename or move. Onto an existing name this fails with AlreadyExists,
    /// except when a scratch file is renamed over a note (an editor's atomic
    /// save), which replaces that note's content.
    pub fn rename(&self, from: &str, to: &str) -> Result<Retargeted> {
        let from_key = normalize_path(from);
        let to_key = normalize_path(to);
        if from_key == to_key {
            return Ok(Vec::new());
        }
        let (to_parent_path, to_name) = parent_and_name(&to_key)?;

        if let Some(file) = self.scratch.get(&from_key) {
            let to_parent = self.resolve_folder(&to_parent_path)?;
            if self.is_scratch_name(&to_name) {
                self.scratch.rename(&from_key, &to_key)?;
                self.handles.retarget(
                    &HandleTarget::Scratch(from_key.clone()),
                    &HandleTarget::Scratch(to_key.clone()),
                )?;
                return Ok(vec![(Target::Scratch(from_key), Target::Scratch(to_key))]);
            }
            return self.promote(&from_key, &to_key, &to_parent, &to_name, file);
        }

        let entry = self.store.lookup_path(&from_key, &self.owner)?;
        let to_parent = self.resolve_folder(&to_parent_path)?;
        match entry {
            Entry::Root => Err(NoteFsError::PermissionDenied("cannot rename the root".into())),
            Entry::Folder(folder) => {
                self.store.rename_or_move(
                    &EntityRef::folder(folder.id), to_parent.as_parent(), &to_name, None, &self.owner,
                )?;
                let mut moved = Vec::new();
                for (old, new) in self.scratch.move_dir(&from_key, &to_key) {
                    self.handles.retarget(&HandleTarget::Scratch(old.clone()), &HandleTarget::Scratch(new.clone()))?;
                    moved.push((Target::Scratch(old), Target::Scratch(new)));
                }
                Ok(moved)
            }
            Entry::Note(note) => {
                if self.is_scratch_name(&to_name) {
                    return Err(NoteFsError::PermissionDenied(format!(
                        "note '{}' cannot become editor scratch file '{}'", from_key, to_name
                    )));
                }
                let (title, syntax) = self.note_name(&to_name)?;
                self.store.rename_or_move(
                    &EntityRef::note(note.id), to_parent.as_parent(), title, Some(syntax), &self.owner,
                )?;
                Ok(Vec::new())
            }
        }
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let hits = self.store.search(query, &self.owner, SEARCH_LIMIT)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let path = self.store.full_path(&Node::note(hit.note_id.clone()))?;
            results.push(SearchResult { note_id: hit.note_id, path, score: hit.score });
        }
        Ok(results)
    }

    // ---- Internals ----

    fn is_scratch_name(&self, name: &str) -> bool {
        self.policy.filter_editor_temp && Bouncer::is_scratch(name)
    }

    /// Split a filename into (title, syntax), applying the extensionless policy.
    fn note_name<'n>(&self, name: &'n str) -> Result<(&'n str, &'n str)> {
        let (title, syntax) = split_file_name(name);
        if syntax.is_empty() && !self.policy.allow_extensionless {
            tracing::warn!("[Adapter] Rejected extensionless file name '{}'", name);
            return Err(NoteFsError::InvalidName(format!("'{}' has no extension", name)));
        }
        Ok((title, syntax))
    }

    fn resolve_folder(&self, path: &str) -> Result<Node> {
        let node = self.store.resolve(path, &self.owner)?;
        if node.kind() != EntityKind::Folder {
            return Err(NoteFsError::TypeMismatch { path: path.to_string(), expected: EntityKind::Folder });
        }
        Ok(node)
    }

    /// Turn a scratch file into a real note at `to_key`.
    fn promote(
        &self,
        from_key: &str,
        to_key: &str,
        to_parent: &Node,
        to_name: &str,
        file: ScratchFile,
    ) -> Result<Retargeted> {
        let (title, syntax) = self.note_name(to_name)?;
        let id = match self.store.resolve(to_key, &self.owner) {
            Ok(Node::Entity(existing)) if existing.kind == EntityKind::Note => {
                self.store.write_note(&existing.id, &file.content, &self.owner)?;
                existing.id
            }
            Ok(_) => {
                return Err(NoteFsError::TypeMismatch { path: to_key.to_string(), expected: EntityKind::Note });
            }
            Err(NoteFsError::NotFound(_)) => {
                self.store.create_note(to_parent.as_parent(), title, syntax, &file.content, &self.owner)?
            }
            Err(e) => return Err(e),
        };

        self.scratch.remove(from_key);
        self.handles.retarget(&HandleTarget::Scratch(from_key.to_string()), &HandleTarget::Note(id.clone()))?;
        tracing::info!("[Adapter] Promoted scratch file {} to note {} ({})", from_key, to_key, id);
        Ok(vec![(Target::Scratch(from_key.to_string()), Target::Node(Node::note(id)))])
    }

    fn commit(&self, file: &mut OpenFile) -> Result<()> {
        if !file.dirty {
            return Ok(());
        }
        match &file.target {
            HandleTarget::Note(id) => {
                self.store.write_note(id, &file.buffer, &self.owner)?;
            }
            HandleTarget::Scratch(path) => {
                self.scratch.store(path, &file.buffer, self.store.now());
            }
        }
        file.dirty = false;
        Ok(())
    }

    fn root_attr(&self) -> Attr {
        Attr::folder(Node::Root, self.started_at, self.started_at)
    }

    fn entry_attr(&self, entry: &Entry) -> Attr {
        match entry {
            Entry::Root => self.root_attr(),
            Entry::Folder(folder) => {
                Attr::folder(Node::folder(folder.id.clone()), folder.created_at, folder.updated_at)
            }
            Entry::Note(note) => {
                let size = self.handles
                    .dirty_len(&HandleTarget::Note(note.id.clone()))
                    .unwrap_or(note.content.len() as u64);
                Attr::file(Target::Node(Node::note(note.id.clone())), size, note.created_at, note.updated_at)
            }
        }
    }

    fn scratch_attr(&self, key: &str, file: &ScratchFile) -> Attr {
        let size = self.handles
            .dirty_len(&HandleTarget::Scratch(key.to_string()))
            .unwrap_or(file.content.len() as u64);
        Attr::file(Target::Scratch(key.to_string()), size, file.created_at, file.updated_at)
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;
    use crate::clock::ManualClock;
    use crate::config::StoreSettings;
    use crate::history::MutationKind;
    use crate::storage::ConnectionPool;

    fn setup(policy: NamePolicy) -> (TempDir, Adapter, Arc<ManualClock>) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let pool = ConnectionPool::open(dir.path().join("fs.db"), StoreSettings::default()).unwrap();
        let store = Arc::new(EntityStore::new(pool, clock.clone()).unwrap());
        (dir, Adapter::new(store, "owner", policy), clock)
    }

    fn note_id(attr: &Attr) -> String {
        match &attr.target {
            Target::Node(Node::Entity(e)) => e.id.clone(),
            other => panic!("not a note: {:?}", other),
        }
    }

    #[test]
    fn test_repeated_flush_records_once() {
        let (_dir, fs, _clock) = setup(NamePolicy::default());
        let (attr, fh) = fs.create("/a.md").unwrap();
        let id = note_id(&attr);

        fs.write(fh, 0, b"content").unwrap();
        fs.flush(fh).unwrap();
        fs.flush(fh).unwrap();
        fs.release(fh).unwrap();

        let history = fs.store().history(&id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_kind, MutationKind::Update);

        // open + release with no writes commits nothing
        let fh = fs.open("/a.md", false).unwrap();
        fs.flush(fh).unwrap();
        fs.release(fh).unwrap();
        assert_eq!(fs.store().history(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_getattr_sees_dirty_buffer_and_row_timestamps() {
        let (_dir, fs, clock) = setup(NamePolicy::default());
        let (created, fh) = fs.create("/t.txt").unwrap();
        fs.write(fh, 0, b"12345").unwrap();
        assert_eq!(fs.getattr("/t.txt").unwrap().size, 5);

        clock.advance(Duration::seconds(3));
        fs.release(fh).unwrap();
        let attr = fs.getattr("/t.txt").unwrap();
        assert_eq!(attr.size, 5);
        assert_eq!(attr.ctime(), created.created_at);
        assert_eq!(attr.mtime(), created.created_at + Duration::seconds(3));
    }

    #[test]
    fn test_release_discards_handle_even_if_commit_fails() {
        let (_dir, fs, _clock) = setup(NamePolicy::default());
        let (_, fh) = fs.create("/gone.md").unwrap();
        fs.write(fh, 0, b"x").unwrap();
        fs.unlink("/gone.md").unwrap();

        assert!(matches!(fs.release(fh), Err(NoteFsError::NotFound(_))));
        assert_eq!(fs.open_handles(), 0);
        assert!(matches!(fs.release(fh), Err(NoteFsError::BadHandle(_))));
    }

    #[test]
    fn test_extensionless_policy() {
        let (_dir, strict, _c) = setup(NamePolicy { allow_extensionless: false, filter_editor_temp: true });
        assert!(matches!(strict.create("/Makefile"), Err(NoteFsError::InvalidName(_))));

        let (_dir2, lenient, _c2) = setup(NamePolicy { allow_extensionless: true, filter_editor_temp: true });
        let (attr, fh) = lenient.create("/Makefile").unwrap();
        lenient.release(fh).unwrap();
        let note = lenient.store().read_note(&note_id(&attr), "owner").unwrap();
        assert_eq!(note.syntax, "");
        assert_eq!(note.title, "Makefile");
    }

    #[test]
    fn test_scratch_files_stay_out_of_the_store() {
        let (_dir, fs, _clock) = setup(NamePolicy::default());
        let (attr, fh) = fs.create("/.notes.md.swp").unwrap();
        assert_eq!(attr.target, Target::Scratch("/.notes.md.swp".into()));
        fs.write(fh, 0, b"swap data").unwrap();
        fs.release(fh).unwrap();

        assert_eq!(fs.getattr("/.notes.md.swp").unwrap().size, 9);
        let fh = fs.open("/.notes.md.swp", false).unwrap();
        assert_eq!(fs.read(fh, 0, 100).unwrap(), b"swap data");
        fs.release(fh).unwrap();

        let names: Vec<String> = fs.readdir("/").unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec![".", ".."]);
        assert!(fs.store().paths("owner").unwrap().is_empty());

        fs.unlink("/.notes.md.swp").unwrap();
        assert!(matches!(fs.getattr("/.notes.md.swp"), Err(NoteFsError::NotFound(_))));
    }

    #[test]
    fn test_scratch_promotion() {
        let (_dir, fs, _clock) = setup(NamePolicy::default());
        let (_, fh) = fs.create("/draft.tmp").unwrap();
        fs.write(fh, 0, b"final text").unwrap();
        fs.release(fh).unwrap();

        let moved = fs.rename("/draft.tmp", "/final.md").unwrap();
        assert_eq!(moved.len(), 1);
        let attr = fs.getattr("/final.md").unwrap();
        assert_eq!(moved[0].1, attr.target);
        assert!(fs.getattr("/draft.tmp").is_err());

        // renaming a second scratch save over the note replaces its content
        let (_, fh) = fs.create("/final.md.tmp").unwrap();
        fs.write(fh, 0, b"second save").unwrap();
        fs.release(fh).unwrap();
        fs.rename("/final.md.tmp", "/final.md").unwrap();

        let id = note_id(&attr);
        assert_eq!(fs.store().read_note(&id, "owner").unwrap().content, b"second save");
        assert_eq!(fs.store().history(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_open_folder_is_a_type_error() {
        let (_dir, fs, _clock) = setup(NamePolicy::default());
        fs.mkdir("/docs").unwrap();
        let err = fs.open("/docs", false).unwrap_err();
        assert_eq!(err.errno(), libc::EISDIR);
        let err = fs.unlink("/docs").unwrap_err();
        assert_eq!(err.errno(), libc::EISDIR);
        let (_, fh) = fs.create("/docs/a.md").unwrap();
        fs.release(fh).unwrap();
        assert_eq!(fs.rmdir("/docs/a.md").unwrap_err().errno(), libc::ENOTDIR);
        assert_eq!(fs.create("/docs/a.md/b.md").unwrap_err().errno(), libc::ENOTDIR);
    }

    #[test]
    fn test_oversized_truncate_and_write_are_refused() {
        let (_dir, fs, _clock) = setup(NamePolicy::default());
        let (attr, fh) = fs.create("/a.md").unwrap();
        fs.write(fh, 0, b"keep").unwrap();

        let err = fs.truncate("/a.md", u64::MAX, Some(fh)).unwrap_err();
        assert!(matches!(err, NoteFsError::FileTooLarge { .. }));
        assert_eq!(err.errno(), libc::EFBIG);
        assert!(matches!(fs.write(fh, u64::MAX - 10, b"x"), Err(NoteFsError::FileTooLarge { .. })));
        let limit = fs.store().max_file_size();
        assert!(matches!(fs.write(fh, limit, b"x"), Err(NoteFsError::FileTooLarge { .. })));

        // the handle is still usable and its buffer intact
        fs.write(fh, 4, b" going").unwrap();
        fs.release(fh).unwrap();
        assert_eq!(fs.store().read_note(&note_id(&attr), "owner").unwrap().content, b"keep going");

        assert!(matches!(fs.truncate("/a.md", limit + 1, None), Err(NoteFsError::FileTooLarge { .. })));
        let (_, fh) = fs.create("/.a.md.swp").unwrap();
        fs.release(fh).unwrap();
        assert!(matches!(fs.truncate("/.a.md.swp", u64::MAX, None), Err(NoteFsError::FileTooLarge { .. })));
        assert_eq!(fs.getattr("/.a.md.swp").unwrap().size, 0);
    }

    #[test]
    fn test_drop_flushes_open_buffers() {
        let (dir, fs, clock) = setup(NamePolicy::default());
        let (attr, fh) = fs.create("/unsaved.md").unwrap();
        fs.write(fh, 0, b"typed but never closed").unwrap();
        let id = note_id(&attr);
        drop(fs);

        let pool = ConnectionPool::open(dir.path().join("fs.db"), StoreSettings::default()).unwrap();
        let store = EntityStore::new(pool, clock).unwrap();
        assert_eq!(store.read_note(&id, "owner").unwrap().content, b"typed but never closed");
    }
}
