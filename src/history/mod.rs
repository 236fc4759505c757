pub mod store;
pub mod types;

pub use store::{HistoryStore, JsonlTurnLog, MemoryTurnLog, TurnLog};
pub use types::{Exchange, FailureCause, Turn, TurnStatus};
