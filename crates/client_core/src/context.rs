use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::domain::UserId;

use crate::{
    clock::{Clock, SystemClock},
    config::SyncSettings,
    presence::ActivitySignal,
    subscriptions::SubscriptionRegistry,
};

/// Process-wide state shared by every component. Built once at start-up and
/// handed to each component explicitly.
pub struct ClientContext {
    self_id: UserId,
    settings: SyncSettings,
    clock: Arc<dyn Clock>,
    activity: SubscriptionRegistry<ActivitySignal>,
}

impl ClientContext {
    pub fn new(self_id: UserId, settings: SyncSettings) -> Arc<Self> {
        Self::with_clock(self_id, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(self_id: UserId, settings: SyncSettings, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            settings,
            clock,
            activity: SubscriptionRegistry::new(),
        })
    }

    pub fn self_id(&self) -> &UserId {
        &self.self_id
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Host input surface. Hosts report pointer/key/scroll/touch and
    /// visibility changes here; interested components register handlers.
    pub fn activity(&self) -> &SubscriptionRegistry<ActivitySignal> {
        &self.activity
    }

    pub fn report_activity(&self, signal: ActivitySignal) -> usize {
        self.activity.emit(&signal)
    }
}
