pub mod batch;
pub mod config;
pub mod connection;
pub mod controller;
pub mod correlator;
pub mod error;
pub mod history;
pub mod render;
pub mod ws_actor;

pub use config::{OrphanPolicy, SessionConfig};
pub use connection::{ConnectionState, ReconnectPolicy, Status};
pub use controller::{Effect, Session, SessionEvent, SubmitState};
pub use error::SessionError;
pub use history::{HistoryStorage, HistoryStore, JsonFileStorage, MemoryStorage};
pub use kdbzph_protocol as protocol;
pub use ws_actor::{SessionHandle, UiCommand, UiEvent};

impl Session {
    /// Builds the session a config describes, opening its history file if any.
    pub fn from_config(config: &SessionConfig) -> Self {
        let history = match &config.history_file {
            Some(path) => HistoryStore::open(Box::new(JsonFileStorage::new(path))),
            None => HistoryStore::in_memory(),
        };
        Session::new(history, config.reconnect, config.orphans)
    }
}
