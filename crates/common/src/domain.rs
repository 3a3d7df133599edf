mod identity;
mod result;
mod scanner;
mod shipment;
mod telemetry;

pub use identity::*;
pub use result::*;
pub use scanner::*;
pub use shipment::*;
pub use telemetry::*;
