mod poll;
mod scanner_lease;
mod verification_config;
mod verification_service;

pub use poll::*;
pub use scanner_lease::*;
pub use verification_config::*;
pub use verification_service::*;
