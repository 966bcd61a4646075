//! Shared cookie jar replayed on every upstream request.
//!
//! One entry per cookie name, last write wins. Writes are serialized and
//! persisted before the in-memory map is replaced.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use ctrl_core::{domain_matches, CookieDirective, CookieEntry};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;

pub type CookieMap = BTreeMap<String, CookieEntry>;

pub struct CookieJar {
    db: Database,
    entries: RwLock<Arc<CookieMap>>,
    write_lock: Mutex<()>,
}

impl CookieJar {
    pub fn open(db: Database) -> Result<Self, StoreError> {
        let entries = db.with_conn(load)?;
        debug!(count = entries.len(), "cookie jar loaded");
        Ok(Self {
            db,
            entries: RwLock::new(Arc::new(entries)),
            write_lock: Mutex::new(()),
        })
    }

    /// Apply `Set-Cookie` directives. Returns whether anything changed;
    /// nothing is written when it did not.
    #[instrument(skip_all)]
    pub fn merge(
        &self,
        directives: impl IntoIterator<Item = CookieDirective>,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot();
        let mut next = (*current).clone();
        let mut changed = Vec::new();

        for directive in directives {
            match directive {
                CookieDirective::Upsert(entry) => {
                    if next.get(&entry.name) != Some(&entry) {
                        changed.push(entry.name.clone());
                        next.insert(entry.name.clone(), entry);
                    }
                }
                CookieDirective::Remove(name) => {
                    if next.remove(&name).is_some() {
                        changed.push(name);
                    }
                }
            }
        }

        if changed.is_empty() {
            return Ok(false);
        }

        self.db.with_conn(|conn| persist_changes(conn, &next, &changed))?;
        debug!(cookies = ?changed, "cookie jar updated");
        *self.entries.write() = Arc::new(next);
        Ok(true)
    }

    pub fn snapshot(&self) -> Arc<CookieMap> {
        self.entries.read().clone()
    }

    /// Entries that should be sent to `host`.
    pub fn snapshot_for(&self, host: &str) -> Vec<CookieEntry> {
        self.snapshot()
            .values()
            .filter(|entry| domain_matches(&entry.domain, host))
            .cloned()
            .collect()
    }

    /// Drop every cookie. Returns how many were removed.
    #[instrument(skip_all)]
    pub fn clear(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let removed = self.snapshot().len();
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM cookies", [])?;
            Ok(())
        })?;
        *self.entries.write() = Arc::new(CookieMap::new());
        Ok(removed)
    }
}

fn load(conn: &Connection) -> Result<CookieMap, StoreError> {
    let mut stmt = conn.prepare("SELECT name, value, domain, path FROM cookies")?;
    let rows = stmt.query_map([], |row| {
        Ok(CookieEntry {
            name: row.get(0)?,
            value: row.get(1)?,
            domain: row.get(2)?,
            path: row.get(3)?,
        })
    })?;

    let mut map = CookieMap::new();
    for entry in rows {
        let entry = entry?;
        map.insert(entry.name.clone(), entry);
    }
    Ok(map)
}

fn persist_changes(conn: &Connection, next: &CookieMap, changed: &[String]) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    for name in changed {
        match next.get(name) {
            Some(entry) => {
                tx.execute(
                    "INSERT INTO cookies (name, value, domain, path, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value,
                                                     domain = excluded.domain,
                                                     path = excluded.path,
                                                     updated_at = excluded.updated_at",
                    params![entry.name, entry.value, entry.domain, entry.path, now],
                )?;
            }
            None => {
                tx.execute("DELETE FROM cookies WHERE name = ?1", [name])?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}
