//! Per-guild recurring reconciliation timers

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::id::GuildId;
use crate::reconcile::{Reconciler, TickReport, TickStatus};
use crate::store::GuildStore;

const REPORT_CHANNEL_CAPACITY: usize = 64;

/// Timer period for an interval in minutes, never shorter than one minute
pub fn period_for(interval_minutes: u32) -> Duration {
    Duration::from_secs(60 * u64::from(interval_minutes.max(1)))
}

struct TimerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
    period: Duration,
}

impl TimerHandle {
    /// Ask the loop to exit. A tick already running finishes first, and the
    /// reconciler keeps a replacement timer's first tick waiting until it has.
    fn cancel(self) {
        let _ = self.stop.send(());
        drop(self.task);
    }
}

/// Owns at most one timer per guild
pub struct Scheduler {
    store: Arc<GuildStore>,
    reconciler: Arc<Reconciler>,
    timers: Mutex<HashMap<GuildId, TimerHandle>>,
    reports: broadcast::Sender<TickReport>,
    last_reports: Arc<Mutex<HashMap<GuildId, TickReport>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("active", &self.timers.lock().len())
            .finish()
    }
}

impl Scheduler {
    pub fn new(store: Arc<GuildStore>, reconciler: Arc<Reconciler>) -> Self {
        let (reports, _rx) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            store,
            reconciler,
            timers: Mutex::new(HashMap::new()),
            reports,
            last_reports: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reports of every tick from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TickReport> {
        self.reports.subscribe()
    }

    /// (Re)start the guild's timer from its current settings.
    ///
    /// Any existing timer is cancelled first. Returns whether a timer is now
    /// running, which is false when the guild is configured as stopped. Must
    /// be called from within a tokio runtime.
    pub fn start(&self, guild_id: GuildId) -> bool {
        // May persist a default record, so read before taking the timer lock
        let settings = self.store.get(guild_id);

        let mut timers = self.timers.lock();
        if let Some(old) = timers.remove(&guild_id) {
            debug!("Cancelling existing timer for guild {}", guild_id);
            old.cancel();
        }

        if !settings.running {
            debug!("Guild {} is stopped, not arming a timer", guild_id);
            return false;
        }

        let period = period_for(settings.interval_minutes);
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_timer(
            guild_id,
            period,
            self.reconciler.clone(),
            self.reports.clone(),
            self.last_reports.clone(),
            stop_rx,
        ));

        info!("Started timer for guild {} every {:?}", guild_id, period);
        timers.insert(guild_id, TimerHandle { stop, task, period });
        true
    }

    /// Cancel the guild's timer; returns whether there was one
    pub fn stop(&self, guild_id: GuildId) -> bool {
        match self.timers.lock().remove(&guild_id) {
            Some(handle) => {
                handle.cancel();
                info!("Stopped timer for guild {}", guild_id);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let handles: Vec<_> = self.timers.lock().drain().collect();
        for (_, handle) in handles {
            handle.cancel();
        }
    }

    pub fn is_running(&self, guild_id: GuildId) -> bool {
        self.timers.lock().contains_key(&guild_id)
    }

    /// Period of the guild's active timer
    pub fn period(&self, guild_id: GuildId) -> Option<Duration> {
        self.timers.lock().get(&guild_id).map(|h| h.period)
    }

    /// Report of the guild's most recent timer tick
    pub fn last_report(&self, guild_id: GuildId) -> Option<TickReport> {
        self.last_reports.lock().get(&guild_id).cloned()
    }

    pub fn active_guilds(&self) -> Vec<GuildId> {
        let mut ids: Vec<_> = self.timers.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn run_timer(
    guild_id: GuildId,
    period: Duration,
    reconciler: Arc<Reconciler>,
    reports: broadcast::Sender<TickReport>,
    last_reports: Arc<Mutex<HashMap<GuildId, TickReport>>>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    // A tick that runs past the next deadline swallows it instead of queueing a burst
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            // Fires on an explicit stop and when the handle is dropped
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        // Run the tick as its own task so a panic inside it is contained
        let reconciler = reconciler.clone();
        let tick = tokio::spawn(async move { reconciler.reconcile(guild_id).await });
        match tick.await {
            Ok(report) => {
                match report.status {
                    TickStatus::NoEntries | TickStatus::GuildUnavailable => debug!("Tick {}", report),
                    _ => info!("Tick {}", report),
                }
                last_reports.lock().insert(guild_id, report.clone());
                let _ = reports.send(report);
            }
            Err(e) => error!("Tick for guild {} aborted: {}", guild_id, e),
        }
    }

    debug!("Timer loop for guild {} exited", guild_id);
}
