//! redb table definitions for the drowse state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Bindings keyed by `{binding_id}`.
pub const BINDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("bindings");

/// Service instances keyed by `{service_instance_id}`.
pub const SERVICE_INSTANCES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("service_instances");

/// Proxy map entries keyed by lowercase `{hostname}`.
pub const PROXY_MAP: TableDefinition<&str, &[u8]> = TableDefinition::new("proxy_map");

/// Watch leases keyed by `{binding_id}`.
pub const WATCH_LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("watch_leases");
