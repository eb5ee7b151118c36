//! Schema and migrations for the memory store (§4.B).
//!
//! Numbered migrations run under `BEGIN IMMEDIATE` against `PRAGMA
//! user_version`, the same shape the teacher's scheduler uses for its
//! `jobs` table init, generalized here to a real migration ladder since
//! this schema is expected to grow across releases. PRAGMAs (`WAL`,
//! `synchronous=NORMAL`, `foreign_keys=ON`, `busy_timeout`) are grounded on
//! `skynet-gateway/src/mcp_bridge.rs`'s connection setup.

use rusqlite::Connection;

use crate::error::{MemoryError, Result};

/// Applied in order, each as its own transaction. Never edit a migration
/// once released — append a new one instead.
const MIGRATIONS: &[&str] = &[MIGRATION_0001, MIGRATION_0002];

const MIGRATION_0001: &str = "
    CREATE TABLE people (
        person_id               TEXT    NOT NULL PRIMARY KEY,
        display_name            TEXT    NOT NULL,
        channel                 TEXT    NOT NULL,
        channel_user_id         TEXT    NOT NULL,
        relationship_score      REAL    NOT NULL DEFAULT 0,
        trust_tier_override     TEXT,
        capsule                 TEXT,
        capsule_updated_at_ms   INTEGER,
        public_style_capsule    TEXT,
        side_data_json          TEXT    NOT NULL DEFAULT '{}',
        created_at_ms           INTEGER NOT NULL,
        updated_at_ms           INTEGER NOT NULL,
        UNIQUE(channel, channel_user_id)
    );

    CREATE TABLE facts (
        id                      INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
        person_id               TEXT    REFERENCES people(person_id),
        subject                 TEXT    NOT NULL,
        content                 TEXT    NOT NULL,
        category                TEXT    NOT NULL,
        fact_type               TEXT    NOT NULL,
        temporal_scope          TEXT    NOT NULL,
        evidence_quote          TEXT    NOT NULL,
        confidence_tier         TEXT    NOT NULL,
        is_current              INTEGER NOT NULL DEFAULT 1,
        last_accessed_at_ms     INTEGER NOT NULL,
        created_at_ms           INTEGER NOT NULL
    );
    CREATE INDEX idx_facts_person ON facts(person_id, is_current);

    CREATE VIRTUAL TABLE facts_fts USING fts5(
        content, subject, content='facts', content_rowid='id'
    );

    CREATE TABLE episodes (
        id                      INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
        chat_id                 TEXT    NOT NULL,
        person_id               TEXT    REFERENCES people(person_id),
        is_group                INTEGER NOT NULL DEFAULT 0,
        content                 TEXT    NOT NULL,
        last_extracted_at_ms    INTEGER,
        created_at_ms           INTEGER NOT NULL
    );
    CREATE INDEX idx_episodes_chat ON episodes(chat_id, created_at_ms);
    CREATE INDEX idx_episodes_unextracted ON episodes(last_extracted_at_ms);

    CREATE VIRTUAL TABLE episodes_fts USING fts5(
        content, content='episodes', content_rowid='id'
    );

    CREATE TABLE lessons (
        id                      INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
        category                TEXT    NOT NULL,
        lesson_type             TEXT,
        content                 TEXT    NOT NULL,
        rule                    TEXT,
        alternative             TEXT,
        person_id               TEXT    REFERENCES people(person_id),
        episode_refs_json       TEXT    NOT NULL DEFAULT '[]',
        confidence              REAL,
        times_validated         INTEGER NOT NULL DEFAULT 0,
        times_violated          INTEGER NOT NULL DEFAULT 0,
        promoted                INTEGER NOT NULL DEFAULT 0,
        created_at_ms           INTEGER NOT NULL
    );
    CREATE INDEX idx_lessons_person ON lessons(person_id);

    CREATE TABLE group_capsules (
        chat_id                 TEXT    NOT NULL PRIMARY KEY,
        capsule                 TEXT    NOT NULL,
        updated_at_ms           INTEGER NOT NULL
    );

    CREATE TABLE dirty_group_capsules (
        chat_id                 TEXT    NOT NULL PRIMARY KEY,
        first_dirty_at_ms       INTEGER NOT NULL,
        claim_id                TEXT,
        claim_until_ms          INTEGER
    );

    CREATE TABLE dirty_public_styles (
        person_id               TEXT    NOT NULL PRIMARY KEY,
        first_dirty_at_ms       INTEGER NOT NULL,
        claim_id                TEXT,
        claim_until_ms          INTEGER
    );

    CREATE TABLE observation_counters (
        person_id               TEXT    NOT NULL PRIMARY KEY REFERENCES people(person_id),
        avg_response_len        REAL    NOT NULL DEFAULT 0,
        avg_incoming_len        REAL    NOT NULL DEFAULT 0,
        active_hours_mask       INTEGER NOT NULL DEFAULT 0,
        conversation_count      INTEGER NOT NULL DEFAULT 0,
        sample_count            INTEGER NOT NULL DEFAULT 0
    );
";

/// Optional vector tables, created lazily the first time an `Embedder` is
/// configured. `embedding_meta` records the dimensionality each was built
/// with — §4.B requires a dimension change to drop and recreate rather
/// than silently coerce, which `ensure_vector_tables` below implements.
const MIGRATION_0002: &str = "
    CREATE TABLE embedding_meta (
        name                    TEXT    NOT NULL PRIMARY KEY,
        dims                    INTEGER NOT NULL
    );
";

/// Idempotent: safe to call on every startup. Applies any migration past
/// `PRAGMA user_version`, each inside its own `BEGIN IMMEDIATE` so a crash
/// mid-migration never leaves the schema half-applied.
pub fn init_db(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
    )
    .map_err(MemoryError::Io)?;

    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(MemoryError::Io)?;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(MemoryError::Io)?;
        tx.execute_batch(migration)
            .map_err(|e| MemoryError::Migrate(format!("migration {version}: {e}")))?;
        tx.pragma_update(None, "user_version", version)
            .map_err(MemoryError::Io)?;
        tx.commit().map_err(MemoryError::Io)?;
    }

    Ok(())
}

/// Create or recreate `{facts,episodes}_vec` for the given embedding
/// dimensionality. A mismatch against `embedding_meta` drops both the old
/// table and its recorded dimension before recreating — §4.B: "an
/// embedding-dimension change ... requires dropping and recreating the
/// vector tables, never silently coercing."
pub fn ensure_vector_tables(conn: &Connection, dims: usize) -> Result<()> {
    let recorded: Option<i64> = conn
        .query_row(
            "SELECT dims FROM embedding_meta WHERE name = 'default'",
            [],
            |row| row.get(0),
        )
        .ok();

    if recorded == Some(dims as i64) {
        return Ok(());
    }

    conn.execute_batch(
        "DROP TABLE IF EXISTS facts_vec;
         DROP TABLE IF EXISTS episodes_vec;",
    )
    .map_err(MemoryError::Io)?;

    conn.execute_batch(
        "CREATE TABLE facts_vec (
            fact_id     INTEGER NOT NULL PRIMARY KEY REFERENCES facts(id),
            embedding   BLOB    NOT NULL
         );
         CREATE TABLE episodes_vec (
            episode_id  INTEGER NOT NULL PRIMARY KEY REFERENCES episodes(id),
            embedding   BLOB    NOT NULL
         );",
    )
    .map_err(MemoryError::Io)?;

    conn.execute(
        "INSERT INTO embedding_meta(name, dims) VALUES('default', ?1)
         ON CONFLICT(name) DO UPDATE SET dims = excluded.dims",
        rusqlite::params![dims as i64],
    )
    .map_err(MemoryError::Io)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&mut conn).unwrap();
        init_db(&mut conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }

    #[test]
    fn vector_tables_recreate_on_dimension_change() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&mut conn).unwrap();
        ensure_vector_tables(&conn, 384).unwrap();
        conn.execute(
            "INSERT INTO people(person_id, display_name, channel, channel_user_id, created_at_ms, updated_at_ms)
             VALUES('p1','A','telegram','u1',0,0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO facts(person_id, subject, content, category, fact_type, temporal_scope,
             evidence_quote, confidence_tier, last_accessed_at_ms, created_at_ms)
             VALUES('p1','diet','vegetarian','preference','preference','current','\"I am vegetarian\"','medium',0,0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO facts_vec(fact_id, embedding) VALUES(1, ?1)",
            rusqlite::params![vec![0u8; 384 * 4]],
        )
        .unwrap();

        ensure_vector_tables(&conn, 768).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM facts_vec", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0, "dimension change must drop stale vectors, not coerce them");
    }
}
