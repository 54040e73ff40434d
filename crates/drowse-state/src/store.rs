//! StateStore — redb-backed state persistence for drowse.
//!
//! Provides typed CRUD operations over bindings, service instances, proxy
//! map entries, and watch leases, plus the two compare-and-set operations
//! the rest of the system relies on: claiming a proxy map entry for a wake
//! and acquiring a per-binding watch lease. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Decode the record under `key` from a table open for writing.
fn stored_record<T: DeserializeOwned>(
    table: &Table<'_, &'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Storage))? {
        Some(guard) => Ok(Some(
            serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?,
        )),
        None => Ok(None),
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(BINDINGS).map_err(map_err!(Storage))?;
        txn.open_table(SERVICE_INSTANCES).map_err(map_err!(Storage))?;
        txn.open_table(PROXY_MAP).map_err(map_err!(Storage))?;
        txn.open_table(WATCH_LEASES).map_err(map_err!(Storage))?;
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    fn put_record<T: Serialize>(&self, def: JsonTable, key: &str, record: &T) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Storage))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(def).map_err(map_err!(Storage))?;
        match table.get(key).map_err(map_err!(Storage))? {
            Some(guard) => {
                let record: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn list_records<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(def).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(record);
        }
        Ok(results)
    }

    fn delete_record(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Storage))?;
            existed = table.remove(key).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(existed)
    }

    // ── Bindings ───────────────────────────────────────────────────

    /// Insert or update a binding.
    pub fn put_binding(&self, binding: &Binding) -> StateResult<()> {
        self.put_record(BINDINGS, &binding.id, binding)?;
        debug!(binding_id = %binding.id, "binding stored");
        Ok(())
    }

    /// Get a binding by ID.
    pub fn get_binding(&self, binding_id: &str) -> StateResult<Option<Binding>> {
        self.get_record(BINDINGS, binding_id)
    }

    /// List all bindings.
    pub fn list_bindings(&self) -> StateResult<Vec<Binding>> {
        self.list_records(BINDINGS)
    }

    /// Delete a binding by ID. Returns true if it existed.
    pub fn delete_binding(&self, binding_id: &str) -> StateResult<bool> {
        let existed = self.delete_record(BINDINGS, binding_id)?;
        debug!(%binding_id, existed, "binding deleted");
        Ok(existed)
    }

    /// Flag a binding whose application no longer exists.
    ///
    /// Returns false if the binding is unknown.
    pub fn mark_binding_gone(&self, binding_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let marked;
        {
            let mut table = txn.open_table(BINDINGS).map_err(map_err!(Storage))?;
            let current: Option<Binding> = stored_record(&table, binding_id)?;

            marked = match current {
                Some(mut binding) => {
                    binding.app_gone = true;
                    let value = serde_json::to_vec(&binding).map_err(map_err!(Encode))?;
                    table
                        .insert(binding_id, value.as_slice())
                        .map_err(map_err!(Storage))?;
                    true
                }
                None => false,
            };
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(%binding_id, marked, "binding marked app-gone");
        Ok(marked)
    }

    // ── Service instances ──────────────────────────────────────────

    /// Insert or update a service instance.
    pub fn put_service_instance(&self, instance: &ServiceInstance) -> StateResult<()> {
        self.put_record(SERVICE_INSTANCES, &instance.id, instance)
    }

    /// Get a service instance by ID.
    pub fn get_service_instance(&self, id: &str) -> StateResult<Option<ServiceInstance>> {
        self.get_record(SERVICE_INSTANCES, id)
    }

    /// List all service instances.
    pub fn list_service_instances(&self) -> StateResult<Vec<ServiceInstance>> {
        self.list_records(SERVICE_INSTANCES)
    }

    // ── Proxy map ──────────────────────────────────────────────────

    /// Insert or replace a proxy map entry.
    pub fn put_proxy_entry(&self, entry: &ProxyMapEntry) -> StateResult<()> {
        let key = entry.table_key();
        self.put_record(PROXY_MAP, &key, entry)?;
        debug!(hostname = %key, app_id = %entry.app_id, "proxy map entry stored");
        Ok(())
    }

    /// Record a sleeping application's hostname unless a restart is under way.
    ///
    /// An entry with `restarting` set is never reset; the caller gets
    /// [`MapOutcome::Restarting`] and the stored entry is unchanged.
    pub fn map_sleeping_app(&self, entry: &ProxyMapEntry) -> StateResult<MapOutcome> {
        let key = entry.table_key();
        let value = serde_json::to_vec(entry).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let outcome;
        {
            let mut table = txn.open_table(PROXY_MAP).map_err(map_err!(Storage))?;
            let current: Option<ProxyMapEntry> = stored_record(&table, key.as_str())?;

            outcome = match current {
                Some(existing) if existing.restarting => MapOutcome::Restarting,
                existing => {
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Storage))?;
                    if existing.is_some() {
                        MapOutcome::Replaced
                    } else {
                        MapOutcome::Created
                    }
                }
            };
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(hostname = %key, app_id = %entry.app_id, ?outcome, "sleeping app mapped");
        Ok(outcome)
    }

    /// Get a proxy map entry by hostname (case-insensitive).
    pub fn get_proxy_entry(&self, hostname: &str) -> StateResult<Option<ProxyMapEntry>> {
        self.get_record(PROXY_MAP, &hostname_key(hostname))
    }

    /// List all proxy map entries.
    pub fn list_proxy_entries(&self) -> StateResult<Vec<ProxyMapEntry>> {
        self.list_records(PROXY_MAP)
    }

    /// Delete a proxy map entry. Returns true if it existed.
    pub fn delete_proxy_entry(&self, hostname: &str) -> StateResult<bool> {
        let key = hostname_key(hostname);
        let existed = self.delete_record(PROXY_MAP, &key)?;
        debug!(hostname = %key, existed, "proxy map entry deleted");
        Ok(existed)
    }

    /// Atomically claim the entry for `hostname` on behalf of `owner`.
    ///
    /// The read and the write happen inside one write transaction, so of
    /// any number of concurrent callers at most one observes `Claimed`.
    /// An entry whose claim has expired is taken over; `restarting` stays
    /// `true` in that case.
    pub fn claim_proxy_entry(
        &self,
        hostname: &str,
        owner: &str,
        now_ms: u64,
        ttl: Duration,
    ) -> StateResult<ClaimOutcome> {
        let key = hostname_key(hostname);
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let outcome;
        {
            let mut table = txn.open_table(PROXY_MAP).map_err(map_err!(Storage))?;
            let current: Option<ProxyMapEntry> = stored_record(&table, key.as_str())?;

            outcome = match current {
                None => ClaimOutcome::NotMapped,
                Some(entry) if entry.claim_is_live(now_ms) => ClaimOutcome::InProgress,
                Some(mut entry) => {
                    if entry.restarting {
                        warn!(
                            hostname = %key,
                            previous_owner = ?entry.claimed_by,
                            "taking over expired wake claim"
                        );
                    }
                    entry.restarting = true;
                    entry.claimed_by = Some(owner.to_string());
                    entry.claim_expires_at_ms = Some(now_ms.saturating_add(ttl.as_millis() as u64));
                    let value = serde_json::to_vec(&entry).map_err(map_err!(Encode))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Storage))?;
                    ClaimOutcome::Claimed(entry)
                }
            };
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(hostname = %key, %owner, ?outcome, "proxy claim attempted");
        Ok(outcome)
    }

    /// Give back a claim held by `owner` so the next request can retry the wake.
    ///
    /// Returns false if the entry is gone or claimed by someone else.
    pub fn release_proxy_claim(&self, hostname: &str, owner: &str) -> StateResult<bool> {
        let key = hostname_key(hostname);
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let released;
        {
            let mut table = txn.open_table(PROXY_MAP).map_err(map_err!(Storage))?;
            let current: Option<ProxyMapEntry> = stored_record(&table, key.as_str())?;

            released = match current {
                Some(mut entry) if entry.claimed_by.as_deref() == Some(owner) => {
                    entry.restarting = false;
                    entry.claimed_by = None;
                    entry.claim_expires_at_ms = None;
                    let value = serde_json::to_vec(&entry).map_err(map_err!(Encode))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Storage))?;
                    true
                }
                _ => false,
            };
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(hostname = %key, %owner, released, "proxy claim released");
        Ok(released)
    }

    // ── Watch leases ───────────────────────────────────────────────

    /// Acquire or renew the watch lease for a binding.
    ///
    /// Succeeds when no lease exists, when `owner` already holds it, or
    /// when the current holder's lease expired before `now_ms`.
    pub fn acquire_watch_lease(
        &self,
        binding_id: &str,
        owner: &str,
        now_ms: u64,
        ttl: Duration,
    ) -> StateResult<LeaseOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let outcome;
        {
            let mut table = txn.open_table(WATCH_LEASES).map_err(map_err!(Storage))?;
            let current: Option<WatchLease> = stored_record(&table, binding_id)?;

            outcome = match current {
                Some(lease) if lease.owner != owner && lease.expires_at_ms > now_ms => {
                    LeaseOutcome::HeldElsewhere(lease)
                }
                _ => {
                    let lease = WatchLease {
                        binding_id: binding_id.to_string(),
                        owner: owner.to_string(),
                        expires_at_ms: now_ms.saturating_add(ttl.as_millis() as u64),
                    };
                    let value = serde_json::to_vec(&lease).map_err(map_err!(Encode))?;
                    table
                        .insert(binding_id, value.as_slice())
                        .map_err(map_err!(Storage))?;
                    LeaseOutcome::Acquired(lease)
                }
            };
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(outcome)
    }

    /// Get the current lease for a binding, expired or not.
    pub fn get_watch_lease(&self, binding_id: &str) -> StateResult<Option<WatchLease>> {
        self.get_record(WATCH_LEASES, binding_id)
    }

    /// List every stored lease.
    pub fn list_watch_leases(&self) -> StateResult<Vec<WatchLease>> {
        self.list_records(WATCH_LEASES)
    }

    /// Delete the lease for a binding if `owner` holds it.
    pub fn release_watch_lease(&self, binding_id: &str, owner: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let released;
        {
            let mut table = txn.open_table(WATCH_LEASES).map_err(map_err!(Storage))?;
            let held_by_owner = stored_record::<WatchLease>(&table, binding_id)?
                .is_some_and(|lease| lease.owner == owner);
            if held_by_owner {
                table.remove(binding_id).map_err(map_err!(Storage))?;
            }
            released = held_by_owner;
        }
        txn.commit().map_err(map_err!(Storage))?;
        Ok(released)
    }
}
