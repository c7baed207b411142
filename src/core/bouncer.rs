// FILE: src/core/bouncer.rs
//! The Bouncer: tells editor scratch files apart from real notes.
//!
//! Scratch files are:
//! 1. Vim swap files (`.name.swp`, `.name.swo`) and `~` backups
//! 2. Emacs auto-save (`#name#`) and lock (`.#name`) files
//! 3. VSCode temporaries (`.vscode*`)
//! 4. Generic `.tmp` / `.temp` files

const HIDDEN_SUFFIXES: &[&str] = &[".swp", ".swo", ".tmp"];

const TEMP_MARKERS: &[&str] = &["tmp", "temp"];

pub struct Bouncer;

impl Bouncer {
    /// True when `name` is an editor temporary that should never reach the database.
    pub fn is_scratch(name: &str) -> bool {
        // 1. Vim
        if name.starts_with('.') && HIDDEN_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return true;
        }
        if name.ends_with('~') {
            return true;
        }

        // 2. Emacs
        if name.len() > 1 && name.starts_with('#') && name.ends_with('#') {
            return true;
        }
        if name.starts_with(".#") {
            return true;
        }

        // 3. VSCode
        if name.starts_with(".vscode") {
            return true;
        }

        // 4. Generic: ".tmp" at the end or ".tmp." in the middle
        TEMP_MARKERS.iter().any(|marker| {
            name.ends_with(&format!(".{}", marker)) || name.contains(&format!(".{}.", marker))
        })
    }
}
