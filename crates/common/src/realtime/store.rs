use crate::domain::{DomainError, SnapshotStream};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} denied on '{path}'")]
    PermissionDenied { operation: &'static str, path: String },

    #[error("invalid store path '{0}'")]
    InvalidPath(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => DomainError::StoreUnavailable(reason),
            StoreError::PermissionDenied { operation, path } => {
                DomainError::PermissionDenied(format!("{} on '{}'", operation, path))
            }
            StoreError::InvalidPath(path) => {
                DomainError::ValidationError(format!("invalid store path '{}'", path))
            }
        }
    }
}

/// Change notifications for a watched path. Each `Ok(())` means "something at or
/// under the path changed"; an `Err` is terminal. Dropping the stream
/// unregisters the listener.
pub type StoreWatch = BoxStream<'static, StoreResult<()>>;

/// Precondition for a guarded update: the text field `field` of the target
/// node must hold none of `rejected`. Comparison ignores ASCII case and
/// surrounding whitespace. A missing or non-text field passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldGuard {
    pub field: String,
    pub rejected: Vec<String>,
}

impl FieldGuard {
    pub fn none_of<I, S>(field: impl Into<String>, rejected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: field.into(),
            rejected: rejected.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a write may proceed against `node`
    pub fn admits(&self, node: &Value) -> bool {
        match node.get(&self.field).and_then(Value::as_str) {
            Some(current) => {
                let current = current.trim();
                !self
                    .rejected
                    .iter()
                    .any(|value| value.trim().eq_ignore_ascii_case(current))
            }
            None => true,
        }
    }
}

/// Result of `RealtimeStore::update_unless`
#[derive(Debug, Clone, PartialEq)]
pub enum GuardedUpdate {
    /// Fields were merged
    Applied,
    /// Nothing exists at the path; nothing was written
    Missing,
    /// The guard rejected the node; carries the guarded field's current value
    Blocked(Option<Value>),
}

/// Keyed, hierarchical realtime store.
///
/// Paths are `/`-separated. Writing `Value::Null` removes a node. Readers see a
/// node that has no children as absent.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Read the value at `path`
    async fn get(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Replace the value at `path`
    async fn set(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Merge `fields` into the object at `path`; each field is last-write-wins
    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()>;

    /// Check `guard` against the object at `path` and merge `fields` only if it
    /// passes. The check and the merge are one atomic step with respect to every
    /// other write.
    async fn update_unless(
        &self,
        path: &str,
        guard: FieldGuard,
        fields: Map<String, Value>,
    ) -> StoreResult<GuardedUpdate>;

    /// Append `value` under a new chronologically ordered key and return the key
    async fn push(&self, path: &str, value: Value) -> StoreResult<String>;

    /// Delete the node at `path`
    async fn remove(&self, path: &str) -> StoreResult<()>;

    /// Subscribe to changes at or under `path`
    fn watch(&self, path: &str) -> StoreResult<StoreWatch>;
}

struct SnapshotState<F> {
    store: Arc<dyn RealtimeStore>,
    path: String,
    watch: StoreWatch,
    decode: F,
    emit_now: bool,
    finished: bool,
}

/// Turn a store watch into a stream of decoded full snapshots of `path`.
///
/// The current value is emitted immediately, then once per change notification.
/// A watch error or a failed re-read is yielded once and ends the stream.
pub fn watch_snapshots<T, F>(
    store: Arc<dyn RealtimeStore>,
    path: &str,
    decode: F,
) -> StoreResult<SnapshotStream<T>>
where
    T: Send + 'static,
    F: Fn(Option<Value>) -> T + Send + Sync + 'static,
{
    let watch = store.watch(path)?;
    let state = SnapshotState {
        store,
        path: path.to_string(),
        watch,
        decode,
        emit_now: true,
        finished: false,
    };

    let snapshots = stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        if !state.emit_now {
            match state.watch.next().await {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(DomainError::from(e)), state));
                }
                None => return None,
            }
        }
        state.emit_now = false;

        let item = match state.store.get(&state.path).await {
            Ok(value) => Ok((state.decode)(value)),
            Err(e) => {
                state.finished = true;
                Err(DomainError::from(e))
            }
        };
        Some((item, state))
    });

    Ok(snapshots.boxed())
}

/// Join path segments, ignoring empty ones
pub fn child_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_matches('/');
    let child = child.trim_matches('/');
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{}/{}", parent, child),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("shipments", "abc"), "shipments/abc");
        assert_eq!(child_path("/telemetry/current/", "D1"), "telemetry/current/D1");
        assert_eq!(child_path("", "scanner"), "scanner");
        assert_eq!(child_path("scanner", ""), "scanner");
    }

    #[test]
    fn test_field_guard_ignores_case() {
        let guard = FieldGuard::none_of("status", ["received", "missing"]);
        assert!(!guard.admits(&json!({"status": "Received"})));
        assert!(!guard.admits(&json!({"status": " missing "})));
        assert!(guard.admits(&json!({"status": "present"})));
        assert!(guard.admits(&json!({"notes": "no status yet"})));
        assert!(guard.admits(&json!({"status": 3})));
    }

    #[test]
    fn test_store_errors_map_to_domain_taxonomy() {
        let unavailable: DomainError = StoreError::Unavailable("offline".to_string()).into();
        assert!(matches!(unavailable, DomainError::StoreUnavailable(_)));

        let denied: DomainError = StoreError::PermissionDenied {
            operation: "write",
            path: "scanner/trigger".to_string(),
        }
        .into();
        match denied {
            DomainError::PermissionDenied(msg) => assert!(msg.contains("scanner/trigger")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
