//! Background reload tasks: a polling loop that re-checks every registered
//! IPSpace table's mtime and swaps in a fresh snapshot when the backing CSV
//! changed, without blocking lookups in flight.

use crate::ipspace::IpSpaceRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Debounces overlapping reload ticks: if a poll is still running when the
/// next interval fires, the new tick is skipped rather than queued.
#[derive(Default)]
pub struct ReloadGuard {
    reloading: AtomicBool,
}

impl ReloadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to enter the reload critical section. Returns `false` (and
    /// does nothing) if a reload is already in progress.
    fn try_enter(&self) -> bool {
        self.reloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn leave(&self) {
        self.reloading.store(false, Ordering::Release);
    }
}

/// Poll every table in `registry` once, reloading any whose backing file's
/// mtime has advanced. Errors from an individual table are logged and do
/// not stop the sweep over the rest.
pub fn poll_once(registry: &IpSpaceRegistry) {
    for name in registry.names() {
        let Some(handle) = registry.get(&name) else {
            continue;
        };
        match handle.reload_if_changed() {
            Ok(true) => tracing::info!(table = %name, path = %handle.path().display(), "ipspace table reloaded"),
            Ok(false) => {}
            Err(errata) => tracing::warn!(table = %name, error = %errata, "ipspace reload failed"),
        }
    }
}

/// Spawn the periodic reload task. Debounced by `ReloadGuard` so a slow
/// reload never overlaps with the next tick; cancel by dropping the
/// returned `JoinHandle`.
pub fn spawn(registry: Arc<IpSpaceRegistry>, interval: Duration) -> tokio::task::JoinHandle<()> {
    let guard = Arc::new(ReloadGuard::new());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if !guard.try_enter() {
                tracing::debug!("skipping reload tick, previous sweep still running");
                continue;
            }
            poll_once(&registry);
            guard.leave();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_rejects_reentry_until_released() {
        let guard = ReloadGuard::new();
        assert!(guard.try_enter());
        assert!(!guard.try_enter());
        guard.leave();
        assert!(guard.try_enter());
    }

    #[tokio::test]
    async fn poll_once_reloads_changed_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space.csv");
        std::fs::write(&path, "range,name:STRING\n10.0.0.0/8,internal\n").unwrap();
        let handle = crate::ipspace::IpSpaceHandle::load(&path).unwrap();
        let registry = IpSpaceRegistry::new();
        registry.insert("lan", Arc::new(handle));

        // Give the filesystem a tick so the rewritten file's mtime is
        // observably different from the first write's.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        std::fs::write(&path, "range,name:STRING\n10.0.0.0/8,updated\n").unwrap();

        poll_once(&registry);
        let addr: std::net::IpAddr = "10.0.0.1".parse().unwrap();
        let row = registry.get("lan").unwrap().lookup(addr).unwrap();
        match &row[0] {
            crate::ipspace::ColumnValue::String(s) => assert_eq!(&**s, "updated"),
            _ => panic!("wrong column type"),
        }
    }
}
