use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Downloading,
    Ready,
}

impl State {
    fn as_str(self) -> &'static str {
        match self {
            State::Downloading => "DOWNLOADING",
            State::Ready => "READY",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "DOWNLOADING" => Some(State::Downloading),
            "READY" => Some(State::Ready),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    pub digest: String,
    pub size_bytes: u64,
    pub last_access_ms: u64,
    pub state: State,
}

/// Opens (creating if needed) the `cache_entry` metadata database, migrating schema changes via
/// `PRAGMA user_version` the way `backpak::backend::cache::Cache::new` does.
pub fn open(path: &Path) -> Result<Connection, Error> {
    let mut conn = Connection::open(path)?;
    let tx = conn.transaction()?;
    let version: i32 = tx.query_row("PRAGMA user_version", (), |r| r.get(0))?;
    if version < 1 {
        tx.execute(
            "CREATE TABLE cache_entry (
                digest TEXT NOT NULL PRIMARY KEY,
                size_bytes INTEGER NOT NULL,
                last_access_ms INTEGER NOT NULL,
                state TEXT NOT NULL
            ) STRICT",
            (),
        )?;
    }
    tx.execute("PRAGMA user_version = 1", ())?;
    tx.commit()?;
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL", (), |r| r.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(Error::CacheIoError(format!(
            "failed to enable WAL journal mode, got {journal_mode}"
        )));
    }
    Ok(conn)
}

pub fn get_row(conn: &Connection, digest: &str) -> Result<Option<Row>, Error> {
    conn.query_row(
        "SELECT digest, size_bytes, last_access_ms, state FROM cache_entry WHERE digest = ?1",
        params![digest],
        |r| {
            let state_str: String = r.get(3)?;
            Ok(Row {
                digest: r.get(0)?,
                size_bytes: {
                    let n: i64 = r.get(1)?;
                    n as u64
                },
                last_access_ms: {
                    let n: i64 = r.get(2)?;
                    n as u64
                },
                state: State::parse(&state_str).unwrap_or(State::Downloading),
            })
        },
    )
    .optional()
    .map_err(Error::from)
}

/// Inserts a `DOWNLOADING` row for `digest` if none exists yet. Returns `true` if this call
/// created the row (the caller is now the sole producer for this digest), `false` if a row
/// already existed (caller should re-read it).
pub fn insert_downloading_if_absent(
    conn: &Connection,
    digest: &str,
    now_ms: u64,
) -> Result<bool, Error> {
    let changed = conn.execute(
        "INSERT INTO cache_entry(digest, size_bytes, last_access_ms, state)
         VALUES (?1, 0, ?2, ?3)
         ON CONFLICT(digest) DO NOTHING",
        params![digest, now_ms as i64, State::Downloading.as_str()],
    )?;
    Ok(changed == 1)
}

pub fn promote_to_ready(
    conn: &Connection,
    digest: &str,
    size_bytes: u64,
    now_ms: u64,
) -> Result<(), Error> {
    conn.execute(
        "UPDATE cache_entry SET size_bytes = ?2, last_access_ms = ?3, state = ?4 WHERE digest = ?1",
        params![
            digest,
            size_bytes as i64,
            now_ms as i64,
            State::Ready.as_str()
        ],
    )?;
    Ok(())
}

pub fn touch(conn: &Connection, digest: &str, now_ms: u64) -> Result<(), Error> {
    conn.execute(
        "UPDATE cache_entry SET last_access_ms = ?2 WHERE digest = ?1",
        params![digest, now_ms as i64],
    )?;
    Ok(())
}

pub fn delete_row(conn: &Connection, digest: &str) -> Result<(), Error> {
    conn.execute("DELETE FROM cache_entry WHERE digest = ?1", params![digest])?;
    Ok(())
}

pub fn sum_ready_size(conn: &Connection) -> Result<u64, Error> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entry WHERE state = ?1",
        params![State::Ready.as_str()],
        |r| r.get(0),
    )?;
    Ok(total as u64)
}

/// The `READY` row with the smallest `last_access_ms`, ties broken by ascending digest.
pub fn oldest_ready(conn: &Connection) -> Result<Option<Row>, Error> {
    conn.query_row(
        "SELECT digest, size_bytes, last_access_ms, state FROM cache_entry
         WHERE state = ?1 ORDER BY last_access_ms ASC, digest ASC LIMIT 1",
        params![State::Ready.as_str()],
        |r| {
            Ok(Row {
                digest: r.get(0)?,
                size_bytes: {
                    let n: i64 = r.get(1)?;
                    n as u64
                },
                last_access_ms: {
                    let n: i64 = r.get(2)?;
                    n as u64
                },
                state: State::Ready,
            })
        },
    )
    .optional()
    .map_err(Error::from)
}
