pub mod domain;
pub mod tracker_api;

pub use domain::*;
pub use tracker_api::*;
