use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::engine::Engine;
use crate::limits::*;
use crate::sweeper;

/// Per-tenant engines, keyed by the connection's database name. Each
/// tenant owns a WAL file under `data_dir` plus a sweeper and compactor.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    sweep_interval: Duration,
}

/// File stem for a tenant's WAL. Names outside `[A-Za-z0-9_-]` are refused, not rewritten.
fn wal_stem(tenant: &str) -> std::io::Result<&str> {
    let invalid = |msg: &'static str| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg);
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(invalid("tenant name too long"));
    }
    if tenant.is_empty() {
        return Err(invalid("empty tenant name"));
    }
    if !tenant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("invalid tenant name"));
    }
    Ok(tenant)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, sweep_interval: Duration) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            sweep_interval,
        }
    }

    /// The tenant's engine, replaying its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        let stem = wal_stem(tenant)?;
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // The entry lock keeps two first connections from opening one WAL twice.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let engine = Arc::new(Engine::new(self.data_dir.join(format!("{stem}.wal")))?);
                slot.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(sweeper::run_sweeper(engine.clone(), self.sweep_interval));
        tokio::spawn(sweeper::run_compactor(engine.clone(), self.compact_threshold));
        info!("tenant {tenant:?} loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
