//! Scheduling clock
//!
//! The interpreter only considers switching threads when the clock raises
//! its reschedule flag. With a wall-clock source a background ticker
//! raises it every interval; with a step source the interpreter raises it
//! itself every `n` instructions, which makes scheduling deterministic.

use crate::options::TickSource;
use crate::{VmError, VmResult};
use crossbeam::channel::{self, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::trace;

/// Background thread bumping the tick counter
struct Ticker {
    /// Dropping the sender stops the loop
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    fn start(
        interval: Duration,
        ticks: Arc<AtomicU64>,
        reschedule: Arc<AtomicBool>,
    ) -> VmResult<Self> {
        let (stop, stopped) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);
        let handle = thread::Builder::new()
            .name("om-ticker".to_string())
            .spawn(move || loop {
                crossbeam::select! {
                    recv(ticker) -> _ => {
                        ticks.fetch_add(1, Ordering::AcqRel);
                        reschedule.store(true, Ordering::Release);
                    }
                    recv(stopped) -> _ => break,
                }
            })
            .map_err(|e| VmError::TickerUnavailable(e.to_string()))?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Tick counter plus the shared reschedule flag
pub struct Clock {
    source: TickSource,
    ticks: Arc<AtomicU64>,
    reschedule: Arc<AtomicBool>,
    steps: u64,
    _ticker: Option<Ticker>,
}

impl Clock {
    /// Start a clock; spawns the ticker for a wall-clock source
    pub fn start(source: TickSource) -> VmResult<Self> {
        let ticks = Arc::new(AtomicU64::new(0));
        let reschedule = Arc::new(AtomicBool::new(false));
        let ticker = match source {
            TickSource::Wall(interval) => Some(Ticker::start(
                interval,
                Arc::clone(&ticks),
                Arc::clone(&reschedule),
            )?),
            TickSource::Steps(_) => None,
        };
        Ok(Self {
            source,
            ticks,
            reschedule,
            steps: 0,
            _ticker: ticker,
        })
    }

    /// Current tick
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Account one executed instruction
    #[inline]
    pub fn step(&mut self) {
        if let TickSource::Steps(every) = self.source {
            self.steps += 1;
            if self.steps >= every.max(1) {
                self.steps = 0;
                self.ticks.fetch_add(1, Ordering::AcqRel);
                self.reschedule.store(true, Ordering::Release);
            }
        }
    }

    /// Consume the reschedule flag
    #[inline]
    pub fn take_reschedule(&self) -> bool {
        self.reschedule.swap(false, Ordering::AcqRel)
    }

    /// Ticks a sleep of `millis` lasts: rounded up, at least one
    ///
    /// A step source counts one tick per millisecond.
    pub fn ticks_for_millis(&self, millis: i64) -> u64 {
        let millis = millis.max(0) as u64;
        let ticks = match self.source {
            TickSource::Wall(interval) => {
                let per_tick = (interval.as_millis() as u64).max(1);
                (millis + per_tick - 1) / per_tick
            }
            TickSource::Steps(_) => millis,
        };
        ticks.max(1)
    }

    /// Block until the clock reaches `tick` (every thread is asleep)
    pub fn idle_until(&mut self, tick: u64) {
        trace!(now = self.now(), until = tick, "idle");
        match self.source {
            TickSource::Steps(_) => {
                let now = self.now();
                if tick > now {
                    self.ticks.store(tick, Ordering::Release);
                }
                self.steps = 0;
            }
            TickSource::Wall(interval) => {
                while self.now() < tick {
                    thread::sleep(interval / 2);
                }
            }
        }
    }
}
