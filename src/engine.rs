//! engine.rs
//!
//! The dispatch thread that replays a `PlaybackTimeline` against the wall clock.
//!
//! ### How it works
//! - `start` spawns a "conductor" thread that walks the timeline in order.
//! - Before each event it sleeps for the tick gap since the previous event, converted to
//!   seconds at the default tempo. The sleep is a `recv_timeout` on a channel whose only
//!   sender lives in the `CancelToken`; cancelling drops that sender, which wakes the
//!   sleeper immediately. Stop latency is therefore bounded by one event's wait, usually
//!   much less.
//! - Each channel-voice event is re-addressed by the router and sent to every open sink.
//!   A failing sink is logged and skipped; the others still get the event.
//! - When the timeline runs out, or on cancellation, the thread closes the sinks itself
//!   and marks the playback stopped.

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU8, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::{
    midi::{DEFAULT_US_PER_QN, PlaybackTimeline, ticks_to_seconds},
    routing::{ChannelMap, route},
    sinks::{OutputSink, close_all},
};

pub type SharedSinks = Arc<Mutex<Vec<Box<dyn OutputSink>>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Dispatching,
    Cancelling,
    Stopped,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PlaybackState::Dispatching,
            2 => PlaybackState::Cancelling,
            3 => PlaybackState::Stopped,
            _ => PlaybackState::Idle,
        }
    }
}

/// Owner side of a cancellation signal. Cancelling is one-way and permanent.
pub struct CancelToken {
    tx: Mutex<Option<Sender<()>>>,
}

/// Dispatch side: observes cancellation and sleeps interruptibly.
pub struct CancelWatch {
    rx: Receiver<()>,
}

pub fn cancel_pair() -> (CancelToken, CancelWatch) {
    let (tx, rx) = mpsc::channel();
    (CancelToken { tx: Mutex::new(Some(tx)) }, CancelWatch { rx })
}

impl CancelToken {
    pub fn cancel(&self) {
        lock(&self.tx).take();
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.tx).is_none()
    }
}

impl CancelWatch {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `d`, waking early on cancellation. Returns true if cancelled.
    pub fn sleep(&self, d: Duration) -> bool {
        match self.rx.recv_timeout(d) {
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
            // nobody sends; treat a stray message as a wakeup
            Ok(()) => self.is_cancelled(),
        }
    }
}

/// Handle to one running (or finished) dispatch thread.
pub struct Playback {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
    state: Arc<AtomicU8>,
    sinks: SharedSinks,
    started: Instant,
    duration_secs: f64,
}

impl Playback {
    /// Spawn the dispatch thread. `sinks` are owned by the playback from here on and are
    /// closed when it ends.
    pub fn start(timeline: Arc<PlaybackTimeline>, map: Arc<ChannelMap>, sinks: Vec<Box<dyn OutputSink>>) -> Self {
        let (cancel, watch) = cancel_pair();
        let state = Arc::new(AtomicU8::new(PlaybackState::Dispatching as u8));
        let sinks: SharedSinks = Arc::new(Mutex::new(sinks));
        let duration_secs = timeline.duration_secs;

        let state_t = state.clone();
        let sinks_t = sinks.clone();
        debug!(
            "dispatching {} events over {:.2}s to {} outputs",
            timeline.entries.len(),
            duration_secs,
            lock(&sinks).len()
        );
        let handle = thread::spawn(move || {
            let cancelled = dispatch(&timeline, &map, &sinks_t, &watch);
            close_all(&mut lock(&sinks_t));
            state_t.store(PlaybackState::Stopped as u8, Ordering::SeqCst);
            debug!("dispatch {}", if cancelled { "cancelled" } else { "finished" });
        });

        Self { cancel, handle: Some(handle), state, sinks, started: Instant::now(), duration_secs }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == PlaybackState::Dispatching
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed share of the duration, clamped to [0, 1]. 0 for an empty timeline.
    pub fn elapsed_fraction(&self) -> f64 {
        if self.duration_secs <= 0.0 {
            return 0.0;
        }
        (self.elapsed().as_secs_f64() / self.duration_secs).clamp(0.0, 1.0)
    }

    pub fn open_sinks(&self) -> usize {
        lock(&self.sinks).len()
    }

    /// Cancel and wait for the dispatch thread to exit. Sinks are closed on return.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.state() == PlaybackState::Dispatching {
                self.state.store(PlaybackState::Cancelling as u8, Ordering::SeqCst);
            }
            self.cancel.cancel();
            if handle.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
        close_all(&mut lock(&self.sinks));
        self.state.store(PlaybackState::Stopped as u8, Ordering::SeqCst);
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Walk the timeline. Returns true when stopped by cancellation.
fn dispatch(tl: &PlaybackTimeline, map: &ChannelMap, sinks: &SharedSinks, watch: &CancelWatch) -> bool {
    let tpq = tl.ticks_per_qn.max(1) as u32;
    let mut prev_tick = 0u64;

    for entry in &tl.entries {
        if watch.is_cancelled() {
            return true;
        }
        let delta = entry.tick.saturating_sub(prev_tick);
        let wait = Duration::from_secs_f64(ticks_to_seconds(delta, tpq, DEFAULT_US_PER_QN));
        if watch.sleep(wait) {
            return true;
        }
        prev_tick = entry.tick;

        let Some(msg) = entry.event.voice() else {
            trace!("skipping non-voice event at tick {}", entry.tick);
            continue;
        };
        let ch = route(entry.track as i64, map);
        let bytes = match msg.with_channel(ch).to_bytes() {
            Ok(b) => b,
            Err(e) => {
                warn!("skipping unencodable event at tick {}: {e}", entry.tick);
                continue;
            }
        };
        trace!("tick {} track {} -> ch {}: {:02X?}", entry.tick, entry.track, ch, bytes);
        for sink in lock(sinks).iter_mut() {
            if let Err(e) = sink.send(&bytes) {
                warn!("{e}");
            }
        }
    }
    false
}

/// Lock, recovering the data if another thread panicked while holding it.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
