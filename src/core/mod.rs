// FILE: src/core/mod.rs
pub mod bouncer;
pub mod inode_store;
pub mod permissions;
