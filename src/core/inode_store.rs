// FILE: src/core/inode_store.rs
use std::sync::atomic::{AtomicU64, Ordering};
use dashmap::DashMap;
use crate::adapter::Target;
use crate::storage::Node;

pub const ROOT_INODE: u64 = 1;

/// Inode numbers for the kernel boundary.
///
/// Numbers are handed out on first sight and never reused during a mount. They
/// follow the entity id, not the path, so a renamed note keeps its inode.
pub struct InodeStore {
    by_inode: DashMap<u64, Target>,
    by_target: DashMap<Target, u64>,
    next_inode: AtomicU64,
}

impl InodeStore {
    pub fn new() -> Self {
        let store = Self {
            by_inode: DashMap::new(),
            by_target: DashMap::new(),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        };
        let root = Target::Node(Node::Root);
        store.by_inode.insert(ROOT_INODE, root.clone());
        store.by_target.insert(root, ROOT_INODE);
        store
    }

    pub fn get_or_create_inode(&self, target: &Target) -> u64 {
        if let Some(ino) = self.by_target.get(target) {
            return *ino;
        }

        // entry() holds the shard lock, so two racing lookups agree on one number
        let ino = *self.by_target.entry(target.clone()).or_insert_with(|| {
            self.next_inode.fetch_add(1, Ordering::Relaxed)
        });
        self.by_inode.insert(ino, target.clone());
        ino
    }

    pub fn get_target(&self, inode: u64) -> Option<Target> {
        self.by_inode.get(&inode).map(|t| t.value().clone())
    }

    /// Move an inode to a new target after a rename changed its identity.
    /// If the new target already has an inode, the old one is simply forgotten.
    pub fn retarget(&self, from: &Target, to: &Target) {
        let Some((_, ino)) = self.by_target.remove(from) else { return };
        if self.by_target.contains_key(to) {
            self.by_inode.remove(&ino);
            return;
        }
        self.by_target.insert(to.clone(), ino);
        self.by_inode.insert(ino, to.clone());
        tracing::debug!("[InodeStore] Inode {} now points at {:?}", ino, to);
    }

    /// Drop the mapping of a deleted target. The root is permanent.
    pub fn forget(&self, target: &Target) {
        if let Some((_, ino)) = self.by_target.remove(target) {
            if ino == ROOT_INODE {
                self.by_target.insert(target.clone(), ino);
                return;
            }
            self.by_inode.remove(&ino);
        }
    }

    pub fn len(&self) -> usize {
        self.by_inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_inode.is_empty()
    }
}

impl Default for InodeStore {
    fn default() -> Self {
        Self::new()
    }
}
