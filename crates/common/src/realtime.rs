mod in_memory_store;
mod models;
mod paths;
mod presence_feed;
mod scanner_control;
mod shipment_repository;
mod store;

pub use in_memory_store::*;
pub use models::*;
pub use paths::*;
pub use presence_feed::*;
pub use scanner_control::*;
pub use shipment_repository::*;
pub use store::*;
