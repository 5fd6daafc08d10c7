use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Periodically flip active holds past their TTL to `expired`.
///
/// Nothing depends on this for correctness: every read already gates on
/// `expires_at`. It keeps stored statuses honest and lets compaction drop
/// finished holds.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// One sweep pass. Returns how many holds were expired.
pub async fn sweep_once(engine: &Engine) -> usize {
    let mut swept = 0;
    for (hold_id, resource_id) in engine.collect_expired_holds(engine.now()) {
        match engine.expire_hold(hold_id).await {
            Ok(true) => swept += 1,
            // Confirmed or expired by a request since collection.
            Ok(false) => {}
            Err(e) => debug!("sweeper skipped hold {hold_id} on {resource_id}: {e}"),
        }
    }
    if swept > 0 {
        info!("expired {swept} stale holds");
    }
    swept
}

/// Compact the WAL whenever more than `threshold` appends piled up since
/// the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(kept) => info!("compacted WAL: {appends} appends folded into {kept} events"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicI64, Ordering};
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweep_expires_only_stale_holds() {
        // 2030-01-07T00:00Z, a Monday; resource is open around the clock.
        let monday: Ms = 1_893_974_400_000;
        let clock = Arc::new(AtomicI64::new(monday));
        let c = clock.clone();
        let engine = Engine::with_clock(
            test_wal_path("sweep.wal"),
            Arc::new(move || c.load(Ordering::SeqCst)),
        )
        .unwrap();

        let cfg = ResourceConfig::new(Ulid::new(), "owner", "Kiln");
        let rid = cfg.id;
        engine.create_resource(cfg).await.unwrap();
        let rule = WorkingHours {
            id: Ulid::new(),
            weekday: 1,
            start_minute: 0,
            end_minute: MINUTES_PER_DAY,
        };
        engine.add_working_hours(rid, rule, "owner").await.unwrap();

        let early = Span::new(monday + 2 * HOUR_MS, monday + 3 * HOUR_MS);
        let stale = engine.create_hold(Ulid::new(), rid, early, "alice").await.unwrap();
        clock.store(stale.expires_at + 1, Ordering::SeqCst);
        let late = Span::new(monday + 5 * HOUR_MS, monday + 6 * HOUR_MS);
        let fresh = engine.create_hold(Ulid::new(), rid, late, "bob").await.unwrap();

        assert_eq!(sweep_once(&engine).await, 1);
        assert_eq!(sweep_once(&engine).await, 0);

        let holds = engine.get_holds(rid, "owner").await.unwrap();
        let status = |id: Ulid| holds.iter().find(|h| h.id == id).map(|h| h.status);
        assert_eq!(status(stale.id), Some(HoldStatus::Expired));
        assert_eq!(status(fresh.id), Some(HoldStatus::Active));
    }
}
