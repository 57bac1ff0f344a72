use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during state operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("request database error")]
    Db(#[from] rusqlite::Error),
    #[error("invalid merge request id stored for {0}: {1}")]
    InvalidId(String, i64),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// One recorded branch → merge request association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub branch: String,
    pub request_id: u64,
    pub updated_at: String,
}

/// SQLite-backed mapping of (host, project, local branch) to merge request ID.
///
/// Written when a checkout succeeds, read whenever the tool needs to know
/// which merge request the current branch belongs to. Entries are never
/// removed; a later checkout of the same branch name overwrites the ID.
pub struct RequestDb {
    conn: Connection,
}

impl RequestDb {
    /// Open or create the database at the given path.
    ///
    /// Creates the necessary tables if they don't exist.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS requests (
                host TEXT NOT NULL,
                project TEXT NOT NULL,
                branch TEXT NOT NULL,
                request_id INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY(host, project, branch)
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Merge request ID recorded for a branch, `None` if there is none.
    pub fn get(&self, host: &str, project: &str, branch: &str) -> Result<Option<u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT request_id FROM requests WHERE host = ?1 AND project = ?2 AND branch = ?3",
        )?;

        let id: Option<i64> = stmt
            .query_row(params![host, project, branch], |row| row.get(0))
            .optional()?;

        id.map(|id| to_request_id(branch, id)).transpose()
    }

    /// Record the merge request ID for a branch, replacing any previous one.
    pub fn set(&mut self, host: &str, project: &str, branch: &str, request_id: u64) -> Result<()> {
        let id = i64::try_from(request_id)
            .map_err(|_| StateError::InvalidId(branch.to_string(), -1))?;
        self.conn.execute(
            "INSERT INTO requests (host, project, branch, request_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(host, project, branch)
             DO UPDATE SET request_id = ?4, updated_at = datetime('now')",
            params![host, project, branch, id],
        )?;
        Ok(())
    }

    /// All associations recorded for one project, sorted by branch name.
    pub fn list(&self, host: &str, project: &str) -> Result<Vec<RequestRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT branch, request_id, updated_at FROM requests
             WHERE host = ?1 AND project = ?2 ORDER BY branch",
        )?;

        let rows = stmt
            .query_map(params![host, project], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(branch, id, updated_at)| {
                Ok(RequestRecord {
                    request_id: to_request_id(&branch, id)?,
                    branch,
                    updated_at,
                })
            })
            .collect()
    }
}

fn to_request_id(branch: &str, id: i64) -> Result<u64> {
    match u64::try_from(id) {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(StateError::InvalidId(branch.to_string(), id)),
    }
}
