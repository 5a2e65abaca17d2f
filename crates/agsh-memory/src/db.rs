// SQLite-backed key-value layer for Megrams.
//
// The spec describes the keyspace as `meg:<id>`, `tag:<space>|<entity>|<id>`
// and `recall:<id>`; this module implements that same keyspace as a small
// relational schema (one row per Megram, indexed on `(space, entity)`, plus
// a `recall` table) rather than inventing a bespoke LSM engine — the spec's
// "e.g. an embedded LSM store" is explicitly non-prescriptive.

use std::path::Path;

use agsh_types::{Directive, Megram, MegramLevel, SopRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::MemoryResult;

pub fn open(db_path: &Path) -> MemoryResult<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(10))?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.execute("PRAGMA synchronous = NORMAL", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> MemoryResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS megrams (
            id TEXT PRIMARY KEY,
            level TEXT NOT NULL,
            created_at TEXT NOT NULL,
            space TEXT NOT NULL,
            entity TEXT NOT NULL,
            content TEXT NOT NULL,
            state TEXT NOT NULL,
            f REAL NOT NULL,
            sigma REAL NOT NULL,
            k REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_megrams_tag ON megrams(space, entity);
        CREATE INDEX IF NOT EXISTS idx_megrams_level ON megrams(level);

        CREATE TABLE IF NOT EXISTS recall (
            id TEXT PRIMARY KEY,
            last_recalled_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn insert(conn: &Connection, megram: &Megram) -> MemoryResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO megrams (id, level, created_at, space, entity, content, state, f, sigma, k)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            megram.id.to_string(),
            level_str(megram.level),
            megram.created_at.to_rfc3339(),
            megram.space,
            megram.entity,
            megram.content,
            serde_json::to_string(&megram.state)?,
            megram.f,
            megram.sigma,
            megram.k,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> MemoryResult<Option<Megram>> {
    conn.query_row(
        "SELECT id, level, created_at, space, entity, content, state, f, sigma, k
         FROM megrams WHERE id = ?1",
        params![id.to_string()],
        row_to_megram,
    )
    .optional()
    .map_err(Into::into)
}

pub fn by_tag(conn: &Connection, space: &str, entity: &str) -> MemoryResult<Vec<Megram>> {
    let mut stmt = conn.prepare(
        "SELECT id, level, created_at, space, entity, content, state, f, sigma, k
         FROM megrams WHERE space = ?1 AND entity = ?2",
    )?;
    let rows = stmt.query_map(params![space, entity], row_to_megram)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn by_tag_and_levels(
    conn: &Connection,
    space: &str,
    entity: &str,
    levels: &[MegramLevel],
) -> MemoryResult<Vec<Megram>> {
    Ok(by_tag(conn, space, entity)?
        .into_iter()
        .filter(|m| levels.contains(&m.level))
        .collect())
}

pub fn all_by_levels(conn: &Connection, levels: &[MegramLevel]) -> MemoryResult<Vec<Megram>> {
    let mut stmt = conn.prepare(
        "SELECT id, level, created_at, space, entity, content, state, f, sigma, k FROM megrams",
    )?;
    let rows = stmt.query_map([], row_to_megram)?;
    let mut out = Vec::new();
    for row in rows {
        let m = row?;
        if levels.contains(&m.level) {
            out.push(m);
        }
    }
    Ok(out)
}

pub fn distinct_tags_with_level(conn: &Connection, level: MegramLevel) -> MemoryResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT space, entity FROM megrams WHERE level = ?1",
    )?;
    let rows = stmt.query_map(params![level_str(level)], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn delete(conn: &Connection, id: Uuid) -> MemoryResult<()> {
    conn.execute("DELETE FROM megrams WHERE id = ?1", params![id.to_string()])?;
    conn.execute("DELETE FROM recall WHERE id = ?1", params![id.to_string()])?;
    Ok(())
}

pub fn set_level_and_k(conn: &Connection, id: Uuid, level: MegramLevel, k: f64) -> MemoryResult<()> {
    conn.execute(
        "UPDATE megrams SET level = ?1, k = ?2 WHERE id = ?3",
        params![level_str(level), k, id.to_string()],
    )?;
    Ok(())
}

pub fn last_recalled_at(conn: &Connection, id: Uuid) -> MemoryResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT last_recalled_at FROM recall WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))))
}

pub fn touch_recall(conn: &Connection, id: Uuid, at: DateTime<Utc>) -> MemoryResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO recall (id, last_recalled_at) VALUES (?1, ?2)",
        params![id.to_string(), at.to_rfc3339()],
    )?;
    Ok(())
}

fn level_str(level: MegramLevel) -> &'static str {
    match level {
        MegramLevel::M => "M",
        MegramLevel::K => "K",
        MegramLevel::C => "C",
        MegramLevel::T => "T",
    }
}

fn parse_level(raw: &str) -> MegramLevel {
    match raw {
        "K" => MegramLevel::K,
        "C" => MegramLevel::C,
        "T" => MegramLevel::T,
        _ => MegramLevel::M,
    }
}

fn row_to_megram(row: &Row) -> rusqlite::Result<Megram> {
    let id: String = row.get(0)?;
    let level: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    let state: String = row.get(6)?;
    Ok(Megram {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        level: parse_level(&level),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        space: row.get(3)?,
        entity: row.get(4)?,
        content: row.get(5)?,
        state: serde_json::from_str::<Directive>(&state).unwrap_or(Directive::Refine),
        f: row.get(7)?,
        sigma: row.get(8)?,
        k: row.get(9)?,
    })
}

pub fn sop_record_of(megram: &Megram) -> SopRecord {
    SopRecord {
        id: megram.id,
        content: megram.content.clone(),
        sigma: megram.sigma,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_types::Directive;

    fn sample(space: &str, entity: &str, level: MegramLevel) -> Megram {
        Megram {
            id: Uuid::new_v4(),
            level,
            created_at: Utc::now(),
            space: space.into(),
            entity: entity.into(),
            content: "note".into(),
            state: Directive::Refine,
            f: 0.5,
            sigma: 0.5,
            k: 0.1,
        }
    }

    #[test]
    fn insert_and_get_roundtrips() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let m = sample("tool:shell", "target:ls", MegramLevel::M);
        insert(&conn, &m).unwrap();
        let back = get(&conn, m.id).unwrap().unwrap();
        assert_eq!(back.space, "tool:shell");
        assert_eq!(back.entity, "target:ls");
    }

    #[test]
    fn by_tag_filters_exact_match() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        insert(&conn, &sample("tool:shell", "target:ls", MegramLevel::M)).unwrap();
        insert(&conn, &sample("tool:http", "target:ls", MegramLevel::M)).unwrap();
        let rows = by_tag(&conn, "tool:shell", "target:ls").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn delete_removes_row() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let m = sample("s", "e", MegramLevel::M);
        insert(&conn, &m).unwrap();
        delete(&conn, m.id).unwrap();
        assert!(get(&conn, m.id).unwrap().is_none());
    }
}
