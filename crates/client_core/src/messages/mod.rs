pub mod arena;
pub mod engine;
pub mod model;
pub mod timeline;

pub use arena::{Applied, ArenaEvent, MessageArena};
pub use engine::{MessageSyncEngine, SyncEvent};
pub use model::{DeliveryStatus, Message, MessageKey, TempId, TOMBSTONE};
pub use timeline::{day_label, group_by_day, DayGroup};
