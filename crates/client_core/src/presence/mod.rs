pub mod state;
pub mod tracker;

pub use state::{ActivitySignal, PresenceMap, UserPresence};
pub use tracker::{PresenceEvent, PresenceTracker};
