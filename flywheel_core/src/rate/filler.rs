//! Token filler: background thread feeding a [`TokenPool`] from the
//! wall clock.
//!
//! The filler parks for roughly one millisecond between refills and always
//! passes the *actual* elapsed nanoseconds, so scheduler jitter changes the
//! granularity of refills but never the long-run token rate.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flywheel_common::consts::FILLER_INTERVAL_MS;

use crate::rate::tokens::TokenPool;

/// Handle onto the filler thread. Stops and joins on drop.
pub struct TokenFiller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TokenFiller {
    /// Spawn the filler thread for `pool`.
    pub fn start(pool: Arc<TokenPool>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("token-filler".into())
            .spawn(move || {
                let mut last = Instant::now();
                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(FILLER_INTERVAL_MS));
                    let now = Instant::now();
                    let elapsed = (now - last).as_nanos() as i64;
                    last = now;
                    pool.refill(elapsed);
                }
                tracing::debug!("token filler stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the filler thread to exit after its current park.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for TokenFiller {
    fn drop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
