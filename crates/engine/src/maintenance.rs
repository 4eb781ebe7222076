//! Background journal sync and maintenance
//!
//! One thread per database. Every `sync_interval` it syncs the journals of
//! loaded collections; every `maintenance_interval` it runs
//! [`Database::run_maintenance`]. The thread holds only a weak reference,
//! so it never keeps a database open.

use crate::database::Database;
use shoal_core::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest uninterrupted sleep, so shutdown is noticed quickly
const MAX_SLEEP: Duration = Duration::from_millis(10);

pub(crate) struct Maintenance {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Maintenance {
    pub(crate) fn start(
        db: Weak<Database>,
        sync_interval: Duration,
        maintenance_interval: Duration,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("shoal-maintenance".to_string())
            .spawn(move || run(db, flag, sync_interval, maintenance_interval))?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it, unless called from the thread itself
    pub(crate) fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(target: "shoal::db", "Maintenance thread panicked");
            }
        }
    }
}

fn run(
    db: Weak<Database>,
    shutdown: Arc<AtomicBool>,
    sync_interval: Duration,
    maintenance_interval: Duration,
) {
    let step = MAX_SLEEP.min(sync_interval).min(maintenance_interval);
    let mut since_sync = Duration::ZERO;
    let mut since_maintenance = Duration::ZERO;

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(step);
        since_sync += step;
        since_maintenance += step;

        if since_sync >= sync_interval {
            since_sync = Duration::ZERO;
            let Some(db) = db.upgrade() else {
                return;
            };
            if let Err(e) = db.sync() {
                warn!(target: "shoal::db", error = %e, "Background sync failed");
            }
        }

        if since_maintenance >= maintenance_interval {
            since_maintenance = Duration::ZERO;
            let Some(db) = db.upgrade() else {
                return;
            };
            let report = db.run_maintenance();
            if !report.is_idle() {
                debug!(target: "shoal::db", ?report, "Maintenance pass");
            }
        }
    }
}
