// FILE: src/search.rs
//! Search Indexer: FTS5 index over note title and content.
//!
//! The Entity Store updates the index inside its own write transactions, so a
//! committed note is always searchable by its committed text.

use rusqlite::{Connection, params};
use crate::error::Result;

/// Title matches weigh more than body matches.
const TITLE_WEIGHT: f64 = 4.0;
const CONTENT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub note_id: String,
    /// Higher is better
    pub score: f64,
}

pub struct SearchIndexer<'a> {
    conn: &'a Connection,
}

impl<'a> SearchIndexer<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or replace the index entry for a note, from its committed row.
    /// Index rows share the rowid of their notes row.
    pub fn index_note(&self, note_id: &str) -> Result<()> {
        self.remove_note(note_id)?;
        self.conn.execute(
            "INSERT INTO notes_fts (rowid, note_id, user_id, title, content)
             SELECT rowid, id, user_id, title, CAST(content AS TEXT) FROM notes WHERE id = ?1",
            params![note_id],
        )?;
        Ok(())
    }

    /// Drop a note's index entry. Must run before the notes row is deleted.
    pub fn remove_note(&self, note_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM notes_fts WHERE rowid = (SELECT rowid FROM notes WHERE id = ?1)",
            params![note_id],
        )?;
        Ok(())
    }

    /// Ranked note ids for `query`. Ties are broken by note id so identical
    /// inputs always give identical output.
    pub fn search(&self, query: &str, owner: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let match_expr = fts_query(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT note_id, bm25(notes_fts, 0.0, 0.0, {}, {}) AS rank
             FROM notes_fts
             WHERE notes_fts MATCH ?1 AND user_id = ?2
             ORDER BY rank ASC, note_id ASC
             LIMIT ?3",
            TITLE_WEIGHT, CONTENT_WEIGHT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![match_expr, owner, limit as i64], |row| {
            Ok(SearchHit {
                note_id: row.get(0)?,
                // bm25 is lower-is-better
                score: -row.get::<_, f64>(1)?,
            })
        })?;

        let mut results = Vec::new();
        for r in rows { results.push(r?); }
        tracing::debug!("[SearchIndexer] '{}' -> {} hits", query, results.len());
        Ok(results)
    }

    /// Rebuild the whole index from the notes table. Returns the number of notes indexed.
    pub fn rebuild(&self) -> Result<usize> {
        self.conn.execute("DELETE FROM notes_fts", [])?;
        let count = self.conn.execute(
            "INSERT INTO notes_fts (rowid, note_id, user_id, title, content)
             SELECT rowid, id, user_id, title, CAST(content AS TEXT) FROM notes",
            [],
        )?;
        tracing::info!("[SearchIndexer] Rebuilt index ({} notes)", count);
        Ok(count)
    }

    /// True when every note has exactly one index entry holding its current
    /// owner, title and content.
    pub fn is_consistent(&self) -> Result<bool> {
        let (notes, indexed, current): (i64, i64, i64) = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM notes),
                (SELECT COUNT(*) FROM notes_fts),
                (SELECT COUNT(*) FROM notes n JOIN notes_fts f ON f.rowid = n.rowid
                  WHERE f.note_id = n.id
                    AND f.user_id = n.user_id
                    AND f.title = n.title
                    AND f.content = CAST(n.content AS TEXT))",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        if notes != current || indexed != current {
            tracing::debug!(
                "[SearchIndexer] {} notes, {} index rows, {} current",
                notes, indexed, current
            );
            return Ok(false);
        }
        Ok(true)
    }
}

/// Quote every whitespace-separated term so FTS5 operators in user input are
/// matched literally; terms are ANDed.
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}
