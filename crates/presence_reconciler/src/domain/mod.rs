mod in_memory_watch_session_store;
mod presence_watcher;
mod presence_watcher_config;
mod reconciliation_service;
mod session_orchestrator;
mod transition;
mod watch_session;

pub use in_memory_watch_session_store::*;
pub use presence_watcher::*;
pub use presence_watcher_config::*;
pub use reconciliation_service::*;
pub use session_orchestrator::*;
pub use transition::*;
pub use watch_session::*;
