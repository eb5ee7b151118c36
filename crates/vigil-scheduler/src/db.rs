//! Schema and migrations for the proactive store (§4.E). A separate
//! SQLite database from the memory store (§6: `proactive.db` vs
//! `memory.db`) so a scheduler worker never contends on the memory
//! connection's write lock. Same migration-ladder shape and PRAGMA set as
//! `vigil-memory`'s store, grounded on the same
//! `skynet-gateway/src/mcp_bridge.rs` connection setup.

use rusqlite::Connection;

use crate::error::{Result, SchedulerError};

const MIGRATIONS: &[&str] = &[MIGRATION_0001];

const MIGRATION_0001: &str = "
    CREATE TABLE proactive_events (
        event_id                TEXT    NOT NULL PRIMARY KEY,
        kind                    TEXT    NOT NULL,
        subject                 TEXT    NOT NULL,
        chat_id                 TEXT    NOT NULL,
        trigger_at_ms           INTEGER NOT NULL,
        recurrence              TEXT,
        delivered               INTEGER NOT NULL DEFAULT 0,
        created_at_ms           INTEGER NOT NULL,
        claim_id                TEXT,
        claim_until_ms          INTEGER,
        UNIQUE(chat_id, kind, subject, trigger_at_ms, recurrence)
    );
    CREATE INDEX idx_events_pending ON proactive_events(delivered, trigger_at_ms);

    CREATE TABLE proactive_log (
        id                      INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
        chat_id                 TEXT    NOT NULL,
        sent_at_ms              INTEGER NOT NULL,
        responded               INTEGER NOT NULL DEFAULT 0,
        proactive_event_id      TEXT,
        is_group                INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX idx_log_chat ON proactive_log(chat_id, sent_at_ms);

    CREATE TABLE open_loops (
        id                      INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
        chat_id                 TEXT    NOT NULL,
        subject_key             TEXT    NOT NULL,
        subject                 TEXT    NOT NULL,
        category                TEXT    NOT NULL,
        emotional_weight        TEXT    NOT NULL,
        anchor_date_ms          INTEGER,
        evidence_quote          TEXT    NOT NULL,
        follow_up_question      TEXT    NOT NULL,
        mention_count           INTEGER NOT NULL DEFAULT 1,
        status                  TEXT    NOT NULL DEFAULT 'open',
        follow_up_event_id      TEXT,
        UNIQUE(chat_id, subject_key)
    );
    CREATE INDEX idx_open_loops_chat ON open_loops(chat_id, status);
";

/// Idempotent: safe to call on every startup.
pub fn init_db(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
    )
    .map_err(SchedulerError::Io)?;

    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(SchedulerError::Io)?;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(SchedulerError::Io)?;
        tx.execute_batch(migration)
            .map_err(|e| SchedulerError::Migrate(format!("migration {version}: {e}")))?;
        tx.pragma_update(None, "user_version", version)
            .map_err(SchedulerError::Io)?;
        tx.commit().map_err(SchedulerError::Io)?;
    }

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
}
