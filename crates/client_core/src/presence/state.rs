use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use shared::{
    domain::{PresenceStatus, UserId},
    protocol::PresenceRecord,
};

/// Host input and visibility signals. The first four count as user input
/// for the away-timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivitySignal {
    Pointer,
    Key,
    Scroll,
    Touch,
    Hidden,
    Visible,
}

impl ActivitySignal {
    pub fn is_input(self) -> bool {
        matches!(self, Self::Pointer | Self::Key | Self::Scroll | Self::Touch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPresence {
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
    pub username: Option<String>,
}

/// Own status plus the last known status of everyone else.
#[derive(Debug, Clone)]
pub struct PresenceMap {
    me: UserId,
    own: PresenceStatus,
    others: HashMap<UserId, UserPresence>,
}

impl PresenceMap {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            own: PresenceStatus::Offline,
            others: HashMap::new(),
        }
    }

    pub fn own_status(&self) -> PresenceStatus {
        self.own
    }

    /// Returns the previous status when it changed.
    pub fn set_own(&mut self, status: PresenceStatus) -> Option<PresenceStatus> {
        let previous = std::mem::replace(&mut self.own, status);
        (previous != status).then_some(previous)
    }

    /// Overwrites every user's record from a full snapshot. Users missing from
    /// the snapshot become offline and keep their last-seen time. Returns the
    /// users whose status changed.
    pub fn apply_snapshot(&mut self, records: Vec<PresenceRecord>) -> Vec<(UserId, PresenceStatus)> {
        let mut changes = Vec::new();
        let mut seen = HashSet::new();

        for record in records {
            if record.user_id == self.me {
                continue;
            }
            seen.insert(record.user_id.clone());
            let previous = self.others.insert(
                record.user_id.clone(),
                UserPresence {
                    status: record.status,
                    last_seen_at: record.last_seen_at,
                    username: record.username,
                },
            );
            if previous.map(|p| p.status) != Some(record.status) {
                changes.push((record.user_id, record.status));
            }
        }

        for (user_id, presence) in self.others.iter_mut() {
            if !seen.contains(user_id) && presence.status != PresenceStatus::Offline {
                presence.status = PresenceStatus::Offline;
                changes.push((user_id.clone(), PresenceStatus::Offline));
            }
        }
        changes
    }

    /// Unknown users are offline.
    pub fn status_of(&self, user_id: &UserId) -> PresenceStatus {
        if user_id == &self.me {
            return self.own;
        }
        self.others
            .get(user_id)
            .map(|p| p.status)
            .unwrap_or(PresenceStatus::Offline)
    }

    pub fn last_seen(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.others.get(user_id).map(|p| p.last_seen_at)
    }

    pub fn get(&self, user_id: &UserId) -> Option<&UserPresence> {
        self.others.get(user_id)
    }

    pub fn online_count(&self) -> usize {
        let others = self
            .others
            .values()
            .filter(|p| p.status == PresenceStatus::Online)
            .count();
        others + usize::from(self.own == PresenceStatus::Online)
    }
}

#[cfg(test)]
#[path = "../tests/presence_state_tests.rs"]
mod tests;
