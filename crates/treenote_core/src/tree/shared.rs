use crate::tree::TreeModel;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Tree model shared across threads.
///
/// The mutex is the single critical section for local edits and feed
/// pumping, so observers never see a half-applied change.
#[derive(Clone)]
pub struct SharedTree {
    inner: Arc<Mutex<TreeModel>>,
}

impl SharedTree {
    pub fn new(model: TreeModel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(model)),
        }
    }

    /// Locks the model, recovering a poisoned lock.
    pub fn lock(&self) -> MutexGuard<'_, TreeModel> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("event=tree_lock module=tree status=recovered reason=poisoned");
                poisoned.into_inner()
            }
        }
    }

    /// Runs `f` while holding the model lock.
    pub fn with<T>(&self, f: impl FnOnce(&mut TreeModel) -> T) -> T {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Starts a background thread that pumps the store feed every `interval`.
    pub fn spawn_pump(&self, interval: Duration) -> PumpHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let tree = self.clone();
        let handle = thread::spawn(move || {
            info!("event=tree_pump module=tree status=start");
            while !thread_stop.load(Ordering::Relaxed) {
                tree.with(TreeModel::pump);
                thread::sleep(interval);
            }
            info!("event=tree_pump module=tree status=stop");
        });
        PumpHandle {
            stop,
            handle: Some(handle),
        }
    }
}

/// Stops the pump thread when stopped explicitly or dropped.
pub struct PumpHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PumpHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("event=tree_pump module=tree status=error reason=thread_panicked");
            }
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
