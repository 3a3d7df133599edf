mod domain;
mod presence_reconciler;

pub use domain::*;
pub use presence_reconciler::*;
