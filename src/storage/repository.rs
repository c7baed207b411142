// FILE: src/storage/repository.rs
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Row, params};
use crate::error::{Result, SqliteResultExt};
use crate::storage::{DirEntry, EntityKind, Folder, Node, Note, note_file_name};

/// Row-level access to the entity tables. Borrowing a `Transaction` (which
/// derefs to `Connection`) keeps every call inside the caller's transaction.
pub struct Repository<'a> {
    conn: &'a Connection,
}

const FOLDER_COLUMNS: &str = "id, title, parent_id, user_id, created_at, updated_at";
const NOTE_COLUMNS: &str = "id, title, syntax, content, parent_id, user_id, created_at, updated_at";

impl<'a> Repository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert_folder(&self, folder: &Folder) -> Result<()> {
        self.conn.execute(
            "INSERT INTO folders (id, title, parent_id, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                folder.id, folder.title, folder.parent_id, folder.owner,
                folder.created_at.naive_utc(), folder.updated_at.naive_utc()
            ],
        ).map_sqlite()?;
        Ok(())
    }

    pub fn insert_note(&self, note: &Note) -> Result<()> {
        self.conn.execute(
            "INSERT INTO notes (id, title, syntax, content, parent_id, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                note.id, note.title, note.syntax, note.content, note.parent_id, note.owner,
                note.created_at.naive_utc(), note.updated_at.naive_utc()
            ],
        ).map_sqlite()?;
        Ok(())
    }

    pub fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        let sql = format!("SELECT {} FROM folders WHERE id = ?1", FOLDER_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], map_folder_row).optional()?)
    }

    pub fn get_note(&self, id: &str) -> Result<Option<Note>> {
        let sql = format!("SELECT {} FROM notes WHERE id = ?1", NOTE_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], map_note_row).optional()?)
    }

    /// (title, parent_id) of a folder, the only columns an ascent needs.
    pub fn folder_link(&self, id: &str) -> Result<Option<(String, Option<String>)>> {
        Ok(self.conn.query_row(
            "SELECT title, parent_id FROM folders WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        ).optional()?)
    }

    /// (title, syntax, parent_id) of a note.
    pub fn note_link(&self, id: &str) -> Result<Option<(String, String, Option<String>)>> {
        Ok(self.conn.query_row(
            "SELECT title, syntax, parent_id FROM notes WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        ).optional()?)
    }

    pub fn owner_of(&self, kind: EntityKind, id: &str) -> Result<Option<String>> {
        let sql = match kind {
            EntityKind::Folder => "SELECT user_id FROM folders WHERE id = ?1",
            EntityKind::Note => "SELECT user_id FROM notes WHERE id = ?1",
        };
        Ok(self.conn.query_row(sql, params![id], |r| r.get(0)).optional()?)
    }

    /// Folder id by title within a scope. `IS` matches a NULL parent.
    pub fn find_folder(&self, owner: &str, parent_id: Option<&str>, title: &str) -> Result<Option<String>> {
        Ok(self.conn.query_row(
            "SELECT id FROM folders WHERE user_id = ?1 AND parent_id IS ?2 AND title = ?3",
            params![owner, parent_id, title],
            |r| r.get(0),
        ).optional()?)
    }

    pub fn find_note(&self, owner: &str, parent_id: Option<&str>, title: &str, syntax: &str) -> Result<Option<String>> {
        Ok(self.conn.query_row(
            "SELECT id FROM notes WHERE user_id = ?1 AND parent_id IS ?2 AND title = ?3 AND syntax = ?4",
            params![owner, parent_id, title, syntax],
            |r| r.get(0),
        ).optional()?)
    }

    /// Child folders and notes of a scope, ordered by title then visible name.
    pub fn list_children(&self, owner: &str, parent_id: Option<&str>) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();

        let mut stmt = self.conn.prepare(
            "SELECT id, title FROM folders WHERE user_id = ?1 AND parent_id IS ?2"
        )?;
        let rows = stmt.query_map(params![owner, parent_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for r in rows {
            let (id, title) = r?;
            entries.push(DirEntry { kind: EntityKind::Folder, id, name: title.clone(), title });
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, title, syntax FROM notes WHERE user_id = ?1 AND parent_id IS ?2"
        )?;
        let rows = stmt.query_map(params![owner, parent_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        for r in rows {
            let (id, title, syntax) = r?;
            let name = note_file_name(&title, &syntax);
            entries.push(DirEntry { kind: EntityKind::Note, id, title, name });
        }

        entries.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    pub fn count_children(&self, folder_id: &str) -> Result<i64> {
        let folders: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM folders WHERE parent_id = ?1", params![folder_id], |r| r.get(0)
        )?;
        let notes: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE parent_id = ?1", params![folder_id], |r| r.get(0)
        )?;
        Ok(folders + notes)
    }

    pub fn update_note_content(&self, id: &str, content: &[u8], updated_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE notes SET content = ?1, updated_at = ?2 WHERE id = ?3",
            params![content, updated_at.naive_utc(), id],
        )?;
        Ok(())
    }

    pub fn move_folder(&self, id: &str, parent_id: Option<&str>, title: &str, updated_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE folders SET parent_id = ?1, title = ?2, updated_at = ?3 WHERE id = ?4",
            params![parent_id, title, updated_at.naive_utc(), id],
        ).map_sqlite()?;
        Ok(())
    }

    pub fn move_note(&self, id: &str, parent_id: Option<&str>, title: &str, syntax: &str, updated_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE notes SET parent_id = ?1, title = ?2, syntax = ?3, updated_at = ?4 WHERE id = ?5",
            params![parent_id, title, syntax, updated_at.naive_utc(), id],
        ).map_sqlite()?;
        Ok(())
    }

    pub fn delete_folder(&self, id: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM folders WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn delete_note(&self, id: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM notes WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Every folder and note path of an owner, read through the path views.
    pub fn all_paths(&self, owner: &str) -> Result<Vec<(Node, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT 'folder', id, path FROM folder_paths WHERE user_id = ?1
             UNION ALL
             SELECT 'note', id, path FROM note_paths WHERE user_id = ?1
             ORDER BY 3"
        )?;
        let rows = stmt.query_map(params![owner], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        let mut results = Vec::new();
        for r in rows {
            let (kind, id, path) = r?;
            let node = match kind.as_str() {
                "folder" => Node::folder(id),
                _ => Node::note(id),
            };
            results.push((node, path));
        }
        Ok(results)
    }
}

/// Note content may be stored as BLOB or, when written by external seeders, as TEXT.
pub(crate) fn read_content(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<u8>> {
    match row.get_ref(idx)? {
        ValueRef::Blob(b) => Ok(b.to_vec()),
        ValueRef::Text(t) => Ok(t.to_vec()),
        ValueRef::Null => Ok(Vec::new()),
        _ => Err(rusqlite::Error::InvalidColumnType(
            idx, "content".to_string(), rusqlite::types::Type::Blob,
        )),
    }
}

fn read_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row.get::<_, NaiveDateTime>(idx)?.and_utc())
}

/// Maps a folders row (FOLDER_COLUMNS order) to a Folder.
fn map_folder_row(row: &Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        title: row.get(1)?,
        parent_id: row.get(2)?,
        owner: row.get(3)?,
        created_at: read_timestamp(row, 4)?,
        updated_at: read_timestamp(row, 5)?,
    })
}

/// Maps a notes row (NOTE_COLUMNS order) to a Note.
fn map_note_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        syntax: row.get(2)?,
        content: read_content(row, 3)?,
        parent_id: row.get(4)?,
        owner: row.get(5)?,
        created_at: read_timestamp(row, 6)?,
        updated_at: read_timestamp(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::storage::schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn
    }

    fn folder(id: &str, title: &str, parent: Option<&str>) -> Folder {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        Folder {
            id: id.into(), title: title.into(), parent_id: parent.map(String::from),
            owner: "u".into(), created_at: at, updated_at: at,
        }
    }

    #[test]
    fn test_folder_round_trip_keeps_timestamps() {
        let conn = setup();
        let repo = Repository::new(&conn);
        let f = folder("f1", "docs", None);
        repo.insert_folder(&f).unwrap();

        let back = repo.get_folder("f1").unwrap().unwrap();
        assert_eq!(back.title, "docs");
        assert_eq!(back.parent_id, None);
        assert_eq!(back.created_at, f.created_at);
        assert_eq!(back.updated_at, f.updated_at);
    }

    #[test]
    fn test_reads_seeder_timestamp_format() {
        let conn = setup();
        conn.execute(
            "INSERT INTO folders VALUES ('f1', 'seeded', NULL, 'u', '2023-06-15 08:00:00', '2023-06-16 10:30:00')",
            [],
        ).unwrap();
        let repo = Repository::new(&conn);
        let f = repo.get_folder("f1").unwrap().unwrap();
        assert_eq!(f.created_at, Utc.with_ymd_and_hms(2023, 6, 15, 8, 0, 0).unwrap());
        assert_eq!(f.updated_at, Utc.with_ymd_and_hms(2023, 6, 16, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_text_content_is_readable() {
        let conn = setup();
        conn.execute(
            "INSERT INTO notes VALUES ('n1', 'seeded', 'md', '# from seeder', NULL, 'u', '2023-06-15 08:00:00', '2023-06-15 08:00:00')",
            [],
        ).unwrap();
        let note = Repository::new(&conn).get_note("n1").unwrap().unwrap();
        assert_eq!(note.content, b"# from seeder".to_vec());
        assert_eq!(note.file_name(), "seeded.md");
    }

    #[test]
    fn test_find_folder_scopes_by_parent_and_owner() {
        let conn = setup();
        let repo = Repository::new(&conn);
        repo.insert_folder(&folder("f1", "a", None)).unwrap();
        repo.insert_folder(&folder("f2", "a", Some("f1"))).unwrap();

        assert_eq!(repo.find_folder("u", None, "a").unwrap(), Some("f1".into()));
        assert_eq!(repo.find_folder("u", Some("f1"), "a").unwrap(), Some("f2".into()));
        assert_eq!(repo.find_folder("other", None, "a").unwrap(), None);
        assert_eq!(repo.count_children("f1").unwrap(), 1);
    }

    #[test]
    fn test_list_children_is_ordered_by_title() {
        let conn = setup();
        let repo = Repository::new(&conn);
        repo.insert_folder(&folder("f1", "zeta", None)).unwrap();
        repo.insert_folder(&folder("f2", "alpha", None)).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        repo.insert_note(&Note {
            id: "n1".into(), title: "middle".into(), syntax: "md".into(), content: b"x".to_vec(),
            parent_id: None, owner: "u".into(), created_at: at, updated_at: at,
        }).unwrap();

        let names: Vec<String> = repo.list_children("u", None).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["alpha", "middle.md", "zeta"]);
    }
}
