use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

/// TTL key/value cache for raw feed payloads. One row per feed source;
/// eviction is overwrite-only, exactly like the localStorage scheme it
/// replaces. Freshness is the caller's call: `get` hands back the age and
/// the caller compares it against its own TTL.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub payload: Value,
    pub age: Duration,
}

impl CachedPayload {
    /// `age == ttl` counts as stale.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age < ttl
    }
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("cache: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cache: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("cache: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("cache: set WAL")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("cache: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Absent keys, unreadable rows, and malformed stored JSON are all
    /// plain misses; nothing here surfaces to the user.
    pub fn get(&self, key: &str) -> Option<CachedPayload> {
        let conn = self.conn.lock();
        let row: (String, i64) = conn
            .query_row(
                "SELECT payload, stored_at_ms FROM feed_cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .unwrap_or_else(|err| {
                log::debug!("cache: read {key} failed: {err}");
                None
            })?;

        let (raw, stored_at_ms) = row;
        let payload: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                log::debug!("cache: malformed payload for {key}: {err}");
                return None;
            }
        };

        let age_ms = (Utc::now().timestamp_millis() - stored_at_ms).max(0);
        Some(CachedPayload {
            payload,
            age: Duration::from_millis(age_ms as u64),
        })
    }

    pub fn set(&self, key: &str, payload: &Value) -> Result<()> {
        let raw = serde_json::to_string(payload).context("cache: serialize payload")?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO feed_cache (key, payload, stored_at_ms)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  payload = excluded.payload,
  stored_at_ms = excluded.stored_at_ms
"#,
            params![key, raw, Utc::now().timestamp_millis()],
        )
        .with_context(|| format!("cache: write {key}"))?;
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("cache: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("cache: close connection")
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().timestamp()],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS feed_cache (
  key TEXT PRIMARY KEY,
  payload TEXT NOT NULL,
  stored_at_ms INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("moments").join("feeds.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("feeds.db")),
        })
        .unwrap();
        (dir, store)
    }

    #[test]
    fn round_trip_preserves_payload_with_zero_age() {
        let (_dir, store) = open_temp();
        let payload = json!([{"content": "hello", "tags": ["a", "b"]}]);
        store.set("talksCache", &payload).unwrap();

        let cached = store.get("talksCache").unwrap();
        assert_eq!(cached.payload, payload);
        assert!(cached.age < Duration::from_secs(2));
    }

    #[test]
    fn absent_key_is_a_miss() {
        let (_dir, store) = open_temp();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn malformed_stored_json_is_a_miss_not_a_panic() {
        let (_dir, store) = open_temp();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO feed_cache (key, payload, stored_at_ms) VALUES (?1, ?2, ?3)",
                params!["broken", "{not json", Utc::now().timestamp_millis()],
            )
            .unwrap();
        }
        assert!(store.get("broken").is_none());
    }

    #[test]
    fn overwrite_replaces_payload_and_clock() {
        let (_dir, store) = open_temp();
        store.set("k", &json!(1)).unwrap();
        store.set("k", &json!(2)).unwrap();
        assert_eq!(store.get("k").unwrap().payload, json!(2));
    }

    #[test]
    fn ttl_boundary_exact_age_is_stale() {
        let ttl = Duration::from_millis(500);
        let at_ttl = CachedPayload {
            payload: json!(null),
            age: ttl,
        };
        let under_ttl = CachedPayload {
            payload: json!(null),
            age: ttl - Duration::from_millis(1),
        };
        assert!(!at_ttl.is_fresh(ttl));
        assert!(under_ttl.is_fresh(ttl));
    }
}
