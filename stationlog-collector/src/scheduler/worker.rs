//! The timer worker: the single source of ticks for the foreground collector.
//!
//! The worker only talks through channels. Commands come in, ticks go out,
//! and each tick carries a permit that holds the overlap guard until the
//! collection it started is finished.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Arms the timer and fires one tick right away.
    Start { interval: Duration },
    Stop,
    /// Re-arms a running timer without an immediate tick.
    UpdateInterval { interval: Duration },
}

/// Set while a collection is running. Shared by scheduled and manual runs.
#[derive(Debug, Clone, Default)]
pub struct OverlapGuard(Arc<AtomicBool>);

impl OverlapGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the guard if it is clear. The returned permit clears it on drop.
    pub fn try_acquire(&self) -> Option<Permit> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Permit(Arc::clone(&self.0)))
    }

    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct Permit(Arc<AtomicBool>);

impl Drop for Permit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct Tick {
    pub at: Timestamp,
    pub permit: Permit,
}

pub struct TimerWorker {
    commands: mpsc::UnboundedReceiver<Command>,
    ticks: mpsc::Sender<Tick>,
    guard: OverlapGuard,
    dropped: u64,
}

impl TimerWorker {
    pub fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        ticks: mpsc::Sender<Tick>,
        guard: OverlapGuard,
    ) -> Self {
        Self {
            commands,
            ticks,
            guard,
            dropped: 0,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut timer: Option<Interval> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(dropped_ticks = self.dropped, "Timer worker shutting down");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Start { interval } | Command::UpdateInterval { interval })
                        if interval.is_zero() =>
                    {
                        warn!("ignoring zero timer interval");
                    }
                    Some(Command::Start { interval }) => {
                        debug!(interval_ms = interval.as_millis() as u64, "timer started");
                        timer = Some(arm(Instant::now(), interval));
                    }
                    Some(Command::UpdateInterval { interval }) => {
                        if timer.is_some() {
                            debug!(interval_ms = interval.as_millis() as u64, "timer interval updated");
                            timer = Some(arm(Instant::now() + interval, interval));
                        }
                    }
                    Some(Command::Stop) => {
                        debug!("timer stopped");
                        timer = None;
                    }
                    None => break,
                },
                _ = next_tick(&mut timer) => self.emit(),
            }
        }
    }

    fn emit(&mut self) {
        let Some(permit) = self.guard.try_acquire() else {
            self.dropped += 1;
            debug!(dropped_ticks = self.dropped, "collection still running, tick dropped");
            return;
        };

        // A full or closed channel drops the permit, which clears the guard.
        if self
            .ticks
            .try_send(Tick {
                at: Timestamp::now(),
                permit,
            })
            .is_err()
        {
            self.dropped += 1;
        }
    }
}

fn arm(start: Instant, period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_worker() -> (
        mpsc::UnboundedSender<Command>,
        mpsc::Receiver<Tick>,
        OverlapGuard,
        CancellationToken,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let guard = OverlapGuard::new();
        let cancel = CancellationToken::new();
        tokio::spawn(TimerWorker::new(command_rx, tick_tx, guard.clone()).run(cancel.clone()));
        (command_tx, tick_rx, guard, cancel)
    }

    #[test]
    fn permit_releases_guard_on_drop() {
        let guard = OverlapGuard::new();
        let permit = guard.try_acquire().unwrap();

        assert!(guard.is_held());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_held());
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn start_ticks_immediately_then_periodically() {
        let (commands, mut ticks, _guard, cancel) = spawn_worker();
        commands
            .send(Command::Start {
                interval: Duration::from_secs(60),
            })
            .unwrap();

        let first = ticks.recv().await.unwrap();
        drop(first);
        let before = Instant::now();
        let second = ticks.recv().await.unwrap();
        assert!(Instant::now() - before >= Duration::from_secs(59));
        drop(second);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_dropped_while_guard_is_held() {
        let (commands, mut ticks, guard, cancel) = spawn_worker();
        commands
            .send(Command::Start {
                interval: Duration::from_secs(1),
            })
            .unwrap();

        // Hold the first permit across several periods.
        let held = ticks.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(ticks.try_recv().is_err());
        assert!(guard.is_held());

        drop(held);
        let next = ticks.recv().await.unwrap();
        drop(next);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_the_timer() {
        let (commands, mut ticks, _guard, cancel) = spawn_worker();
        commands
            .send(Command::Start {
                interval: Duration::from_secs(1),
            })
            .unwrap();
        drop(ticks.recv().await.unwrap());

        commands.send(Command::Stop).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(ticks.try_recv().is_err());

        // Updating a stopped timer does not re-arm it.
        commands
            .send(Command::UpdateInterval {
                interval: Duration::from_secs(1),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(ticks.try_recv().is_err());

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_ignored() {
        let (commands, mut ticks, _guard, cancel) = spawn_worker();
        commands
            .send(Command::Start {
                interval: Duration::ZERO,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(ticks.try_recv().is_err());

        // The worker survived and still accepts a valid interval.
        commands
            .send(Command::Start {
                interval: Duration::from_secs(60),
            })
            .unwrap();
        drop(ticks.recv().await.unwrap());

        cancel.cancel();
    }
}
