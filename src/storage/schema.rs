//! Database schema
//!
//! Creates (idempotently):
//! - folders / notes tables with visible-name uniqueness per (owner, parent)
//! - history: append-only audit trail
//! - notes_fts: FTS5 index over note title and content
//! - folder_paths / note_paths: recursive-ascent path views

use rusqlite::Connection;
use crate::error::Result;

/// Maximum number of ancestors a path view will walk.
pub const MAX_DEPTH: usize = 256;

pub fn create_tables(conn: &Connection) -> Result<()> {
    create_folder_table(conn)?;
    create_note_table(conn)?;
    create_history_table(conn)?;
    create_search_index(conn)?;
    create_path_views(conn)?;
    Ok(())
}

fn create_folder_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS folders (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            parent_id TEXT REFERENCES folders(id),
            user_id TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        );

        -- NULL parents do not collide in a plain UNIQUE index, so fold them to ''
        CREATE UNIQUE INDEX IF NOT EXISTS idx_folders_scope_title
            ON folders(user_id, IFNULL(parent_id, ''), title);

        CREATE INDEX IF NOT EXISTS idx_folders_parent ON folders(parent_id);
    "#)?;
    tracing::debug!("Created folders table");
    Ok(())
}

fn create_note_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            syntax TEXT NOT NULL DEFAULT '',
            content BLOB NOT NULL DEFAULT x'',
            parent_id TEXT REFERENCES folders(id),
            user_id TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_notes_scope_title_syntax
            ON notes(user_id, IFNULL(parent_id, ''), title, syntax);

        CREATE INDEX IF NOT EXISTS idx_notes_parent ON notes(parent_id);
    "#)?;
    tracing::debug!("Created notes table");
    Ok(())
}

fn create_history_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS history (
            history_id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            change_kind TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            content BLOB,
            recorded_at DATETIME NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_entity ON history(entity_id);
    "#)?;
    tracing::debug!("Created history table");
    Ok(())
}

fn create_search_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
            note_id UNINDEXED,
            user_id UNINDEXED,
            title,
            content,
            tokenize = 'porter unicode61'
        );
    "#)?;
    tracing::debug!("Created notes_fts virtual table");
    Ok(())
}

fn create_path_views(conn: &Connection) -> Result<()> {
    let sql = format!(r#"
        CREATE VIEW IF NOT EXISTS folder_paths AS
        WITH RECURSIVE ascent(id, user_id, path, next_parent, depth) AS (
            SELECT id, user_id, title, parent_id, 0 FROM folders
            UNION ALL
            SELECT a.id, a.user_id, f.title || '/' || a.path, f.parent_id, a.depth + 1
            FROM ascent a
            JOIN folders f ON f.id = a.next_parent
            WHERE a.depth < {max_depth}
        )
        SELECT id, user_id, '/' || path AS path
        FROM ascent
        WHERE next_parent IS NULL;

        CREATE VIEW IF NOT EXISTS note_paths AS
        SELECT n.id AS id,
               n.user_id AS user_id,
               IFNULL(fp.path, '') || '/' || n.title
                   || CASE WHEN n.syntax = '' THEN '' ELSE '.' || n.syntax END AS path
        FROM notes n
        LEFT JOIN folder_paths fp ON fp.id = n.parent_id
        WHERE n.parent_id IS NULL OR fp.path IS NOT NULL;
    "#, max_depth = MAX_DEPTH);
    conn.execute_batch(&sql)?;
    tracing::debug!("Created folder_paths / note_paths views");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('folders', 'notes', 'history', 'notes_fts', 'folder_paths', 'note_paths')",
            [],
            |r| r.get(0),
        ).unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn test_root_level_titles_are_unique() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        let insert = "INSERT INTO folders (id, title, parent_id, user_id, created_at, updated_at)
                      VALUES (?1, 'docs', NULL, 'u', '2024-01-01 00:00:00', '2024-01-01 00:00:00')";
        conn.execute(insert, ["a"]).unwrap();
        assert!(conn.execute(insert, ["b"]).is_err());
    }

    #[test]
    fn test_path_views_ascend_to_root() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute_batch(r#"
            INSERT INTO folders VALUES ('f1', 'a', NULL, 'u', '2024-01-01 00:00:00', '2024-01-01 00:00:00');
            INSERT INTO folders VALUES ('f2', 'b', 'f1', 'u', '2024-01-01 00:00:00', '2024-01-01 00:00:00');
            INSERT INTO notes (id, title, syntax, content, parent_id, user_id, created_at, updated_at)
                VALUES ('n1', 'readme', 'md', x'', 'f2', 'u', '2024-01-01 00:00:00', '2024-01-01 00:00:00');
            INSERT INTO notes (id, title, syntax, content, parent_id, user_id, created_at, updated_at)
                VALUES ('n2', 'LICENSE', '', x'', NULL, 'u', '2024-01-01 00:00:00', '2024-01-01 00:00:00');
        "#).unwrap();

        let folder_path: String = conn.query_row("SELECT path FROM folder_paths WHERE id = 'f2'", [], |r| r.get(0)).unwrap();
        assert_eq!(folder_path, "/a/b");
        let note_path: String = conn.query_row("SELECT path FROM note_paths WHERE id = 'n1'", [], |r| r.get(0)).unwrap();
        assert_eq!(note_path, "/a/b/readme.md");
        let root_note: String = conn.query_row("SELECT path FROM note_paths WHERE id = 'n2'", [], |r| r.get(0)).unwrap();
        assert_eq!(root_note, "/LICENSE");
    }
}
