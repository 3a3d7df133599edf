pub mod domain;
pub mod garde;
pub mod logging;
pub mod realtime;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockPresenceFeed;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockScannerControl;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockShipmentRepository;
#[cfg(any(test, feature = "testing"))]
pub use realtime::MockRealtimeStore;
