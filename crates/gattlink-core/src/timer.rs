//! Cancellable scheduled actions for the session.
//!
//! Each timer kind has at most one armed instance. Every arm bumps a
//! generation counter; the firing carries the generation it was armed
//! with and is only honoured while that generation is still current, so a
//! timer that raced its own cancellation can never act on newer state.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// One-shot: the connect attempt took too long.
    ConnectionTimeout,
    /// One-shot: retry after an unexpected disconnect.
    Reconnect,
    /// Periodic: sample link RSSI.
    RssiPoll,
}

/// A timer firing delivered to the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Which timer fired.
    pub kind: TimerKind,
    /// Generation the timer was armed with.
    pub generation: u64,
}

struct ArmedTimer {
    generation: u64,
    repeating: bool,
    task: JoinHandle<()>,
}

/// The set of armed timers. Firings are sent to the session loop.
pub struct Timers {
    tx: mpsc::UnboundedSender<TimerFired>,
    next_generation: u64,
    armed: HashMap<TimerKind, ArmedTimer>,
}

impl Timers {
    /// Create a timer set that reports firings on `tx`.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            tx,
            next_generation: 0,
            armed: HashMap::new(),
        }
    }

    /// Arm a one-shot timer, replacing any armed timer of the same kind.
    pub fn schedule(&mut self, kind: TimerKind, delay: Duration) -> u64 {
        let generation = self.rearm(kind);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(TimerFired { kind, generation });
        });
        self.armed.insert(
            kind,
            ArmedTimer {
                generation,
                repeating: false,
                task,
            },
        );
        generation
    }

    /// Arm a periodic timer whose first firing is one `period` from now.
    pub fn schedule_repeating(&mut self, kind: TimerKind, period: Duration) -> u64 {
        let generation = self.rearm(kind);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(TimerFired { kind, generation }).is_err() {
                    break;
                }
            }
        });
        self.armed.insert(
            kind,
            ArmedTimer {
                generation,
                repeating: true,
                task,
            },
        );
        generation
    }

    /// Disarm a timer. Returns `true` if one was armed.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.armed.remove(&kind).is_some_and(|timer| {
            timer.task.abort();
            true
        })
    }

    /// Whether a timer of this kind is armed.
    #[must_use]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    /// Decide whether a firing is still current. A current one-shot firing
    /// disarms its timer; stale firings are rejected.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        let Some(timer) = self.armed.get(&fired.kind) else {
            return false;
        };
        if timer.generation != fired.generation {
            return false;
        }
        if !timer.repeating {
            self.armed.remove(&fired.kind);
        }
        true
    }

    /// Disarm everything.
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.task.abort();
        }
    }

    fn rearm(&mut self, kind: TimerKind) -> u64 {
        self.cancel(kind);
        self.next_generation += 1;
        self.next_generation
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for Timers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timers")
            .field("armed", &self.armed.keys().collect::<Vec<_>>())
            .field("next_generation", &self.next_generation)
            .finish()
    }
}
