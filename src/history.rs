use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::app::{ConversationEntry, Role};

/// First user line of a stored session, for the sidebar list.
#[derive(Debug, Clone)]
pub(crate) struct SessionPreview {
    pub(crate) session_id: String,
    pub(crate) first_line: String,
}

pub(crate) struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    pub(crate) fn open_default() -> Result<Self> {
        Self::open_at(history_file_path())
    }

    pub(crate) fn open_at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create history dir {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("open history db {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entries (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              session_id TEXT NOT NULL,
              role TEXT NOT NULL,
              content TEXT NOT NULL,
              attached_image TEXT,
              created_at INTEGER NOT NULL DEFAULT (unixepoch())
            );
            CREATE INDEX IF NOT EXISTS idx_entries_session_id_id
              ON entries(session_id, id);
            ",
        )
        .context("init history schema")?;

        Ok(Self { conn })
    }

    pub(crate) fn append_entry(&self, session_id: &str, entry: &ConversationEntry) -> Result<()> {
        let trimmed = entry.content.trim();
        if trimmed.is_empty() && entry.attached_image.is_none() {
            return Ok(());
        }

        self.conn
            .execute(
                "INSERT INTO entries(session_id, role, content, attached_image)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, entry.role.as_str(), trimmed, entry.attached_image],
            )
            .context("insert entry")?;
        Ok(())
    }

    pub(crate) fn load_session(&self, session_id: &str) -> Result<Vec<ConversationEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT role, content, attached_image
                 FROM entries
                 WHERE session_id = ?1
                 ORDER BY id",
            )
            .context("prepare session load")?;

        let mut rows = stmt
            .query(params![session_id])
            .context("query session entries")?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().context("scan entry row")? {
            let role: String = row.get(0).context("entry.role")?;
            // Rows written by other builds may carry roles we no longer use.
            let Some(role) = Role::parse(&role) else {
                continue;
            };
            out.push(ConversationEntry {
                role,
                content: row.get(1).context("entry.content")?,
                attached_image: row.get(2).context("entry.attached_image")?,
            });
        }
        Ok(out)
    }

    pub(crate) fn clear_session(&self, session_id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM entries WHERE session_id = ?1",
                params![session_id],
            )
            .context("clear session entries")?;
        Ok(())
    }

    /// One row per stored session: the earliest user entry, in session order.
    pub(crate) fn session_previews(&self) -> Result<Vec<SessionPreview>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT session_id, content
                 FROM entries
                 WHERE id IN (
                   SELECT MIN(id) FROM entries WHERE role = 'user' GROUP BY session_id
                 )
                 ORDER BY session_id",
            )
            .context("prepare session previews")?;

        let mut rows = stmt.query([]).context("query session previews")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context("scan preview row")? {
            out.push(SessionPreview {
                session_id: row.get(0).context("preview.session_id")?,
                first_line: row.get(1).context("preview.content")?,
            });
        }
        Ok(out)
    }
}

fn history_file_path() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".confab").join("history.db")
    } else {
        PathBuf::from(".confab").join("history.db")
    }
}
