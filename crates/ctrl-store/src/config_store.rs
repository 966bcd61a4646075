//! The single shared display configuration.
//!
//! Readers take a cheap `Arc` snapshot and never wait on a commit in
//! progress. Writers are serialized by `commit_lock`; each one persists the
//! next state in one SQLite transaction and only then swaps it in, so a
//! failed write leaves both the database and memory on the previous state.

use std::sync::Arc;

use chrono::Utc;
use ctrl_core::{Config, ConfigDefaults, ConfigUpdate, HistoryItem};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument, warn};

use crate::database::Database;
use crate::error::StoreError;

pub struct ConfigStore {
    db: Database,
    current: RwLock<Arc<Config>>,
    commit_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load the persisted configuration, seeding it from `defaults` when the
    /// database holds none.
    #[instrument(skip_all)]
    pub fn open(db: Database, defaults: &ConfigDefaults) -> Result<Self, StoreError> {
        let loaded = db.with_conn(load)?;
        let config = match loaded {
            Some(config) => config,
            None => {
                let config = Config::from_defaults(defaults, now_ms());
                db.with_conn(|conn| persist(conn, &config))?;
                info!(target_url = %config.target_url, "seeded config from defaults");
                config
            }
        };

        Ok(Self {
            db,
            current: RwLock::new(Arc::new(config)),
            commit_lock: Mutex::new(()),
        })
    }

    /// The committed configuration as of now.
    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    pub fn version(&self) -> i64 {
        self.current.read().last_modified
    }

    /// Validate and merge a partial update, then persist it.
    ///
    /// `proxy_authority` is the proxy's own `host[:port]`; a target equal to
    /// it is refused.
    #[instrument(skip(self, update))]
    pub fn commit(
        &self,
        update: &ConfigUpdate,
        proxy_authority: Option<&str>,
    ) -> Result<Arc<Config>, StoreError> {
        self.replace_with(|current| Ok(current.apply(update, proxy_authority, now_ms())?))
    }

    /// Restore every settable field from `defaults`. History survives.
    #[instrument(skip_all)]
    pub fn reset(&self, defaults: &ConfigDefaults) -> Result<Arc<Config>, StoreError> {
        self.replace_with(|current| Ok(current.reset_to(defaults, now_ms())))
    }

    /// Persist a new version stamp without changing any setting.
    #[instrument(skip_all)]
    pub fn bump(&self) -> Result<Arc<Config>, StoreError> {
        self.replace_with(|current| Ok(current.bumped(now_ms())))
    }

    fn replace_with(
        &self,
        next: impl FnOnce(&Config) -> Result<Config, StoreError>,
    ) -> Result<Arc<Config>, StoreError> {
        let _guard = self.commit_lock.lock();
        let current = self.snapshot();
        let next = next(&current)?;

        self.db.with_conn(|conn| persist(conn, &next))?;

        let next = Arc::new(next);
        *self.current.write() = next.clone();
        info!(
            target_url = %next.target_url,
            last_modified = next.last_modified,
            "config committed"
        );
        Ok(next)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn load(conn: &Connection) -> Result<Option<Config>, StoreError> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT payload, last_modified FROM config WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((payload, last_modified)) = row else {
        return Ok(None);
    };

    let mut config: Config = match serde_json::from_str(&payload) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "stored config unreadable, reseeding from defaults");
            return Ok(None);
        }
    };
    config.last_modified = last_modified;

    let mut stmt = conn.prepare("SELECT url, timestamp FROM history ORDER BY position")?;
    config.history = stmt
        .query_map([], |row| {
            Ok(HistoryItem {
                url: row.get(0)?,
                timestamp: row.get(1)?,
            })
        })?
        .collect::<Result<_, _>>()?;

    Ok(Some(config))
}

fn persist(conn: &Connection, config: &Config) -> Result<(), StoreError> {
    let payload = serde_json::to_string(&Config {
        history: Vec::new(),
        ..config.clone()
    })?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO config (id, payload, last_modified) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET payload = excluded.payload,
                                       last_modified = excluded.last_modified",
        params![payload, config.last_modified],
    )?;
    tx.execute("DELETE FROM history", [])?;
    for (position, item) in config.history.iter().enumerate() {
        tx.execute(
            "INSERT INTO history (position, url, timestamp) VALUES (?1, ?2, ?3)",
            params![position as i64, item.url, item.timestamp],
        )?;
    }
    tx.commit()?;
    Ok(())
}
