use chrono::{DateTime, Utc};
use common::domain::{DomainError, DomainResult, ScannerControl, ScannerStatus};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

/// Exclusive right to drive one physical scanner.
///
/// At most one `ScannerLease` exists per claim at a time. The lease resets the
/// scanner (trigger cleared, status `online`) when released, and schedules the
/// same reset if it is dropped without being released.
pub struct ScannerClaim {
    control: Arc<dyn ScannerControl>,
    lock: Arc<Mutex<()>>,
}

impl ScannerClaim {
    pub fn new(control: Arc<dyn ScannerControl>) -> Self {
        Self {
            control,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn scanner_id(&self) -> String {
        self.control.scanner_id()
    }

    /// Take the scanner for `holder`, or fail with `AlreadyInProgress` without waiting
    pub fn try_acquire(&self, holder: &str) -> DomainResult<ScannerLease> {
        let guard = Arc::clone(&self.lock)
            .try_lock_owned()
            .map_err(|_| DomainError::AlreadyInProgress(self.scanner_id()))?;

        debug!(scanner_id = %self.scanner_id(), holder = %holder, "scanner lease acquired");
        Ok(ScannerLease {
            control: Arc::clone(&self.control),
            holder: holder.to_string(),
            acquired_at: Utc::now(),
            guard: Some(guard),
        })
    }

    /// Whether a lease is currently outstanding, including one whose reset is still running
    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

pub struct ScannerLease {
    control: Arc<dyn ScannerControl>,
    holder: String,
    acquired_at: DateTime<Utc>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for ScannerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerLease")
            .field("holder", &self.holder)
            .field("acquired_at", &self.acquired_at)
            .finish_non_exhaustive()
    }
}

impl ScannerLease {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Reset the scanner and give up the claim. The claim is released even if
    /// the reset fails.
    pub async fn release(mut self) -> DomainResult<()> {
        let guard = self.guard.take();
        let result = reset_scanner(self.control.as_ref()).await;
        drop(guard);
        debug!(holder = %self.holder, ok = result.is_ok(), "scanner lease released");
        result
    }
}

impl Drop for ScannerLease {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };

        warn!(holder = %self.holder, "scanner lease dropped without release, scheduling reset");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let control = Arc::clone(&self.control);
                // The claim stays held until the reset has been written
                handle.spawn(async move {
                    if let Err(e) = reset_scanner(control.as_ref()).await {
                        error!(error = %e, "deferred scanner reset failed");
                    }
                    drop(guard);
                });
            }
            Err(_) => {
                error!(holder = %self.holder, "no runtime available, scanner left in scanning state");
            }
        }
    }
}

/// Lower the trigger and mark the scanner online. Both writes are attempted;
/// the first error is returned.
pub async fn reset_scanner(control: &dyn ScannerControl) -> DomainResult<()> {
    let cleared = control.clear_scan_request().await;
    let online = control.set_status(ScannerStatus::Online, Utc::now()).await;
    cleared.and(online)
}
