use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites a tenant's WAL once enough appends have
/// accumulated since the last compaction. Cancelled appointments are pruned
/// as a side effect of the rewrite.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => {
                // Leave the log as-is; the next tick will retry
                debug!("compaction skipped: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Recurrence;
    use crate::notify::NotifyHub;
    use chrono::{NaiveTime, Weekday};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rota_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn compaction_resets_append_count() {
        let path = test_wal_path("append_count.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let staff_id = Ulid::new();
        engine.create_staff(staff_id, None).await.unwrap();
        for _ in 0..4 {
            let wid = Ulid::new();
            engine
                .add_window(
                    wid,
                    staff_id,
                    Recurrence::Weekly { weekday: Weekday::Mon },
                    t(9, 0),
                    t(17, 0),
                )
                .await
                .unwrap();
            engine.remove_window(wid).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 9);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
