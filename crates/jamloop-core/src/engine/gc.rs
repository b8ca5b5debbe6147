//! Deferred deallocation for values dropped on the audio thread
//!
//! Riffs, replaced mixers and popped effects travel to the engine as
//! `basedrop::Shared` / `basedrop::Owned`. Dropping one on the audio thread
//! only enqueues a pointer; the memory is released here, on a background
//! thread where latency doesn't matter.
//!
//! Unlike a process-wide collector, each [`Collector`] is owned by whoever
//! builds the engine, and dropping it stops and joins the thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use basedrop::Handle;

/// How often the collector thread reclaims deferred drops
pub const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Background thread owning a `basedrop::Collector`
pub struct Collector {
    handle: Handle,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Collector {
    /// Spawn the collector thread with the default interval
    pub fn spawn() -> io::Result<Self> {
        Self::with_interval(COLLECT_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("jamloop-gc".to_string())
            .spawn(move || {
                // Collector is !Sync, so it is created on the thread that owns it
                let mut collector = basedrop::Collector::new();
                if tx.send(collector.handle()).is_err() {
                    return;
                }
                log::info!("Collector thread started");

                while thread_running.load(Ordering::Acquire) {
                    collector.collect();
                    thread::park_timeout(interval);
                }
                collector.collect();
                log::info!(
                    "Collector thread stopped ({} allocations outstanding)",
                    collector.alloc_count()
                );
            })?;

        let handle = rx.recv().map_err(|_| {
            io::Error::new(io::ErrorKind::Other, "collector thread exited before handing out a handle")
        })?;

        Ok(Self {
            handle,
            running,
            thread: Some(thread),
        })
    }

    /// Handle for creating `Shared<T>` / `Owned<T>` allocations
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::warn!("Collector thread panicked");
            }
        }
    }
}
