use crate::realtime::{
    FieldGuard, GuardedUpdate, RealtimeStore, StoreError, StoreResult, StoreWatch,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum StoreSignal {
    Changed(String),
    Failed(StoreError),
}

/// Injected failures, for exercising error paths against a real store
#[derive(Debug, Default)]
struct FaultPolicy {
    unavailable: Option<String>,
    denied_reads: Vec<String>,
    denied_writes: Vec<String>,
}

/// In-memory implementation of `RealtimeStore` backed by a JSON tree.
///
/// Change notifications go out on a broadcast channel; each watch filters for
/// paths related to its own. Live watches are counted so callers can check that
/// subscriptions are released.
pub struct InMemoryRealtimeStore {
    root: RwLock<Value>,
    changes: broadcast::Sender<StoreSignal>,
    listeners: Arc<AtomicUsize>,
    faults: Mutex<FaultPolicy>,
}

impl InMemoryRealtimeStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            changes,
            listeners: Arc::new(AtomicUsize::new(0)),
            faults: Mutex::new(FaultPolicy::default()),
        }
    }

    /// Number of watches currently registered
    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    /// Make every operation fail with `Unavailable` until cleared with `None`
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.faults().unavailable = reason.map(str::to_string);
    }

    /// Deny reads (get and watch) at or under `prefix`
    pub fn deny_reads(&self, prefix: &str) {
        self.faults().denied_reads.push(normalize(prefix));
    }

    /// Deny writes at or under `prefix`
    pub fn deny_writes(&self, prefix: &str) {
        self.faults().denied_writes.push(normalize(prefix));
    }

    /// Drop every injected fault
    pub fn clear_faults(&self) {
        *self.faults() = FaultPolicy::default();
    }

    /// Terminate every live watch with `error`
    pub fn fail_watches(&self, error: StoreError) {
        let _ = self.changes.send(StoreSignal::Failed(error));
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, FaultPolicy> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, operation: &'static str, path: &str) -> StoreResult<()> {
        let faults = self.faults();
        if let Some(reason) = &faults.unavailable {
            return Err(StoreError::Unavailable(reason.clone()));
        }

        let denied = match operation {
            "read" => &faults.denied_reads,
            _ => &faults.denied_writes,
        };
        if denied.iter().any(|prefix| is_same_or_under(path, prefix)) {
            return Err(StoreError::PermissionDenied {
                operation,
                path: path.to_string(),
            });
        }
        Ok(())
    }

    fn notify(&self, path: &str) {
        trace!(path = %path, "store changed");
        // No receivers is fine
        let _ = self.changes.send(StoreSignal::Changed(path.to_string()));
    }

    async fn write(&self, path: &str, value: Value) -> StoreResult<()> {
        let segments = segments(path)?;
        let mut root = self.root.write().await;
        write_at(&mut root, &segments, value);
        Ok(())
    }
}

impl Default for InMemoryRealtimeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeStore for InMemoryRealtimeStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        let path = normalize(path);
        self.check("read", &path)?;
        let segments = segments(&path)?;

        let root = self.root.read().await;
        Ok(node_at(&root, &segments).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> StoreResult<()> {
        let path = normalize(path);
        self.check("write", &path)?;
        self.write(&path, value).await?;
        self.notify(&path);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()> {
        let path = normalize(path);
        self.check("write", &path)?;
        let targets = field_targets(&path, fields)?;

        {
            let mut root = self.root.write().await;
            for (target, value) in targets {
                write_at(&mut root, &target, value);
            }
        }

        self.notify(&path);
        Ok(())
    }

    async fn update_unless(
        &self,
        path: &str,
        guard: FieldGuard,
        fields: Map<String, Value>,
    ) -> StoreResult<GuardedUpdate> {
        let path = normalize(path);
        self.check("write", &path)?;
        let base = segments(&path)?;
        let targets = field_targets(&path, fields)?;

        {
            let mut root = self.root.write().await;
            let Some(node) = node_at(&root, &base) else {
                return Ok(GuardedUpdate::Missing);
            };
            if !guard.admits(node) {
                let current = node.get(&guard.field).cloned();
                debug!(
                    path = %path,
                    field = %guard.field,
                    current = ?current,
                    "guarded update blocked"
                );
                return Ok(GuardedUpdate::Blocked(current));
            }
            for (target, value) in targets {
                write_at(&mut root, &target, value);
            }
        }

        self.notify(&path);
        Ok(GuardedUpdate::Applied)
    }

    async fn push(&self, path: &str, value: Value) -> StoreResult<String> {
        let path = normalize(path);
        self.check("write", &path)?;

        let key = xid::new().to_string();
        let child = format!("{}/{}", path, key);
        self.write(&child, value).await?;
        self.notify(&child);
        Ok(key)
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        self.set(path, Value::Null).await
    }

    fn watch(&self, path: &str) -> StoreResult<StoreWatch> {
        let path = normalize(path);
        self.check("read", &path)?;
        segments(&path)?;

        let receiver = self.changes.subscribe();
        let guard = ListenerGuard::register(Arc::clone(&self.listeners));
        debug!(path = %path, listeners = self.listener_count(), "watch registered");

        let watch = stream::unfold(
            (receiver, guard, path, false),
            |(mut receiver, guard, path, failed)| async move {
                if failed {
                    return None;
                }
                loop {
                    match receiver.recv().await {
                        Ok(StoreSignal::Changed(changed)) if is_related(&changed, &path) => {
                            return Some((Ok(()), (receiver, guard, path, false)));
                        }
                        Ok(StoreSignal::Changed(_)) => continue,
                        Ok(StoreSignal::Failed(error)) => {
                            return Some((Err(error), (receiver, guard, path, true)));
                        }
                        // Missed notifications collapse into one; readers re-read full state
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            return Some((Ok(()), (receiver, guard, path, false)));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(watch.boxed())
    }
}

/// Keeps the listener count accurate for as long as a watch stream lives
struct ListenerGuard {
    listeners: Arc<AtomicUsize>,
}

impl ListenerGuard {
    fn register(listeners: Arc<AtomicUsize>) -> Self {
        listeners.fetch_add(1, Ordering::SeqCst);
        Self { listeners }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.listeners.fetch_sub(1, Ordering::SeqCst);
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn segments(path: &str) -> StoreResult<Vec<String>> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return Ok(Vec::new());
    }

    path.split('/')
        .map(|segment| {
            let invalid = segment.is_empty()
                || segment
                    .chars()
                    .any(|c| matches!(c, '.' | '#' | '$' | '[' | ']'));
            if invalid {
                Err(StoreError::InvalidPath(path.to_string()))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

/// Resolve every field key under `path` before anything is written, so an
/// invalid key leaves the node untouched
fn field_targets(
    path: &str,
    fields: Map<String, Value>,
) -> StoreResult<Vec<(Vec<String>, Value)>> {
    let base = segments(path)?;
    fields
        .into_iter()
        .map(|(key, value)| {
            let mut target = base.clone();
            target.extend(segments(&key)?);
            Ok((target, value))
        })
        .collect()
}

/// The node at `segments`, or `None` if it is absent or empty
fn node_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.get(segment.as_str())?;
    }
    (!is_empty_node(node)).then_some(node)
}

fn is_same_or_under(path: &str, prefix: &str) -> bool {
    prefix.is_empty() || path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// A change at `changed` is visible to a watch on `watched` when one contains the other
fn is_related(changed: &str, watched: &str) -> bool {
    is_same_or_under(changed, watched) || is_same_or_under(watched, changed)
}

fn is_empty_node(node: &Value) -> bool {
    match node {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn write_at(root: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        return;
    };

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            if value.is_null() {
                return;
            }
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if value.is_null() {
            map.remove(last);
        } else {
            map.insert(last.clone(), value);
        }
    }
}
