use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared::{
    domain::{PresenceStatus, UserId},
    protocol::{PresenceNotification, PresenceUpdate},
};
use tokio::{
    sync::{broadcast, mpsc, Notify},
    task::JoinHandle,
    time::{interval_at, sleep_until, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::state::{ActivitySignal, PresenceMap};
use crate::{
    context::ClientContext,
    error::{SyncError, SyncResult},
    subscriptions::SubscriptionToken,
    transport::PresenceBackend,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    OwnStatusChanged(PresenceStatus),
    UserStatusChanged {
        user_id: UserId,
        status: PresenceStatus,
    },
    SnapshotApplied {
        online: usize,
    },
    Error(String),
}

struct TrackerRuntime {
    running: bool,
    connected: bool,
    last_input: Instant,
    activity_token: Option<SubscriptionToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Own presence lifecycle plus everyone else's last-known status.
///
/// `start` goes online and spawns the background tasks. Every broadcast
/// notification triggers a full snapshot re-fetch. Heartbeat and away-timer
/// run independently of each other. Host activity arrives through the
/// context's activity registry.
pub struct PresenceTracker {
    context: Arc<ClientContext>,
    backend: Arc<dyn PresenceBackend>,
    map: Mutex<PresenceMap>,
    runtime: Mutex<TrackerRuntime>,
    input_seen: Arc<Notify>,
    events: broadcast::Sender<PresenceEvent>,
}

impl PresenceTracker {
    pub fn new(context: Arc<ClientContext>, backend: Arc<dyn PresenceBackend>) -> Arc<Self> {
        let (events, _) = broadcast::channel(context.settings().event_buffer.max(1));
        Arc::new(Self {
            map: Mutex::new(PresenceMap::new(context.self_id().clone())),
            context,
            backend,
            runtime: Mutex::new(TrackerRuntime {
                running: false,
                connected: false,
                last_input: Instant::now(),
                activity_token: None,
                tasks: Vec::new(),
            }),
            input_seen: Arc::new(Notify::new()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    pub fn current_status(&self) -> PresenceStatus {
        self.map.lock().own_status()
    }

    pub fn get_user_status(&self, user_id: &UserId) -> PresenceStatus {
        self.map.lock().status_of(user_id)
    }

    pub fn get_user_last_seen(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.map.lock().last_seen(user_id)
    }

    pub fn online_users_count(&self) -> usize {
        self.map.lock().online_count()
    }

    pub fn is_connected(&self) -> bool {
        self.runtime.lock().connected
    }

    /// Goes online, subscribes to the presence broadcast, fetches the first
    /// snapshot and starts the timers. Calling it again while running is a
    /// no-op.
    pub async fn start(self: &Arc<Self>) -> SyncResult<()> {
        {
            let mut runtime = self.runtime.lock();
            if runtime.running {
                return Ok(());
            }
            runtime.running = true;
            runtime.last_input = Instant::now();
        }

        self.set_own(PresenceStatus::Online).await;

        let receiver = match self.backend.subscribe().await {
            Ok(receiver) => receiver,
            Err(err) => {
                warn!(error = %err, "presence subscribe failed");
                let _ = self.events.send(PresenceEvent::Error(err.to_string()));
                self.stop_tasks();
                self.runtime.lock().running = false;
                // The Online above already went out; take it back.
                self.set_own(PresenceStatus::Offline).await;
                return Err(SyncError::transport(err));
            }
        };
        self.runtime.lock().connected = true;
        self.refresh().await;

        let (activity_tx, activity_rx) = mpsc::unbounded_channel();
        let token = self
            .context
            .activity()
            .register("presence", move |signal: &ActivitySignal| {
                let _ = activity_tx.send(*signal);
            });

        let weak = Arc::downgrade(self);
        let tasks = vec![
            tokio::spawn(listen(weak.clone(), receiver)),
            tokio::spawn(heartbeat(
                weak.clone(),
                self.context.settings().heartbeat_interval(),
            )),
            tokio::spawn(away_timer(weak.clone(), self.context.settings().away_after())),
            tokio::spawn(forward_activity(weak, activity_rx)),
        ];

        let mut runtime = self.runtime.lock();
        runtime.activity_token = Some(token);
        runtime.tasks.extend(tasks);
        info!(user_id = %self.context.self_id(), "presence tracking started");
        Ok(())
    }

    /// Best-effort teardown: stops every timer, drops the activity handler
    /// and publishes `Offline` once.
    pub async fn stop(&self) {
        {
            let mut runtime = self.runtime.lock();
            if !runtime.running {
                return;
            }
            runtime.running = false;
            runtime.connected = false;
        }
        self.stop_tasks();
        self.set_own(PresenceStatus::Offline).await;
        info!(user_id = %self.context.self_id(), "presence tracking stopped");
    }

    fn stop_tasks(&self) {
        let (tasks, token) = {
            let mut runtime = self.runtime.lock();
            (std::mem::take(&mut runtime.tasks), runtime.activity_token.take())
        };
        for task in tasks {
            task.abort();
        }
        if let Some(token) = token {
            self.context.activity().unsubscribe(token);
        }
    }

    /// Handles one host signal. Input while `Away` goes back `Online` right
    /// away; `Hidden` demotes to `Away`; `Visible` counts as input.
    pub async fn record_activity(&self, signal: ActivitySignal) {
        if !self.runtime.lock().running {
            return;
        }
        match signal {
            ActivitySignal::Hidden => {
                if self.current_status() == PresenceStatus::Online {
                    self.set_own(PresenceStatus::Away).await;
                }
            }
            _ => {
                self.runtime.lock().last_input = Instant::now();
                self.input_seen.notify_one();
                if self.current_status() == PresenceStatus::Away {
                    self.set_own(PresenceStatus::Online).await;
                }
            }
        }
    }

    /// Re-fetches the full snapshot of other users.
    pub async fn refresh(&self) {
        match self.backend.get_online_users().await {
            Ok(records) => {
                let (changes, online) = {
                    let mut map = self.map.lock();
                    let changes = map.apply_snapshot(records);
                    (changes, map.online_count())
                };
                for (user_id, status) in changes {
                    debug!(user_id = %user_id, status = %status, "user presence changed");
                    let _ = self
                        .events
                        .send(PresenceEvent::UserStatusChanged { user_id, status });
                }
                let _ = self.events.send(PresenceEvent::SnapshotApplied { online });
            }
            Err(err) => {
                warn!(error = %err, "presence snapshot fetch failed");
                let _ = self.events.send(PresenceEvent::Error(err.to_string()));
            }
        }
    }

    async fn set_own(&self, status: PresenceStatus) {
        let changed = self.map.lock().set_own(status);
        if let Some(previous) = changed {
            info!(from = %previous, to = %status, "own presence changed");
            let _ = self.events.send(PresenceEvent::OwnStatusChanged(status));
        }
        self.publish(status).await;
    }

    async fn publish(&self, status: PresenceStatus) {
        let update = PresenceUpdate {
            user_id: self.context.self_id().clone(),
            status,
            online_at: self.context.now(),
        };
        if let Err(err) = self.backend.update_presence(update).await {
            warn!(status = %status, error = %err, "presence publish failed");
            let _ = self.events.send(PresenceEvent::Error(err.to_string()));
        }
    }

    async fn heartbeat_tick(&self) {
        let status = self.current_status();
        debug!(status = %status, "presence heartbeat");
        self.publish(status).await;
    }

    /// Demotes to `Away` if no input arrived within `away_after`. Returns the
    /// instant the timer should next fire.
    async fn check_idle(&self, away_after: Duration) -> Option<Instant> {
        let deadline = self.runtime.lock().last_input + away_after;
        if Instant::now() < deadline {
            return Some(deadline);
        }
        if self.current_status() == PresenceStatus::Online {
            info!(idle_secs = away_after.as_secs(), "no input, going away");
            self.set_own(PresenceStatus::Away).await;
        }
        None
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        let runtime = self.runtime.get_mut();
        for task in runtime.tasks.drain(..) {
            task.abort();
        }
        if let Some(token) = runtime.activity_token.take() {
            self.context.activity().unsubscribe(token);
        }
    }
}

async fn listen(
    tracker: Weak<PresenceTracker>,
    mut receiver: broadcast::Receiver<PresenceNotification>,
) {
    loop {
        let received = receiver.recv().await;
        let Some(tracker) = tracker.upgrade() else {
            break;
        };
        match received {
            Ok(notification) => {
                debug!(?notification, "presence notification");
                tracker.refresh().await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "presence receiver lagged");
                tracker.refresh().await;
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("presence channel closed");
                tracker.runtime.lock().connected = false;
                break;
            }
        }
    }
}

async fn heartbeat(tracker: Weak<PresenceTracker>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(tracker) = tracker.upgrade() else {
            break;
        };
        tracker.heartbeat_tick().await;
    }
}

async fn away_timer(tracker: Weak<PresenceTracker>, away_after: Duration) {
    loop {
        let Some(strong) = tracker.upgrade() else {
            break;
        };
        match strong.check_idle(away_after).await {
            Some(deadline) => {
                drop(strong);
                sleep_until(deadline).await;
            }
            None => {
                // Already away; wait for the next input before re-arming.
                let input_seen = Arc::clone(&strong.input_seen);
                drop(strong);
                input_seen.notified().await;
            }
        }
    }
}

async fn forward_activity(
    tracker: Weak<PresenceTracker>,
    mut signals: mpsc::UnboundedReceiver<ActivitySignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(tracker) = tracker.upgrade() else {
            break;
        };
        tracker.record_activity(signal).await;
    }
}

#[cfg(test)]
#[path = "../tests/presence_tracker_tests.rs"]
mod tests;
