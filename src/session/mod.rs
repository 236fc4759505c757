pub mod events;
pub mod manager;
pub mod state;

pub use events::SessionEvent;
pub use manager::SessionManager;
pub use state::SessionState;
