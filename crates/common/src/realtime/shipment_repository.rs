use crate::domain::{
    CreateShipmentRepoInput, DomainError, DomainResult, Shipment, ShipmentRepository,
    ShipmentStatus, SnapshotStream, StatusWrite, UpdateShipmentRepoInput,
};
use crate::realtime::{
    parse_shipment, parse_shipments, watch_snapshots, FieldGuard, GuardedUpdate, RealtimeStore,
    ShipmentRecord, StorePaths,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Shipment registry backed by the realtime store
pub struct StoreShipmentRepository {
    store: Arc<dyn RealtimeStore>,
    paths: StorePaths,
}

impl StoreShipmentRepository {
    pub fn new(store: Arc<dyn RealtimeStore>, paths: StorePaths) -> Self {
        Self { store, paths }
    }

    async fn all_shipments(&self) -> DomainResult<Vec<Shipment>> {
        let collection = self.store.get(&self.paths.shipments).await?;
        Ok(parse_shipments(collection))
    }
}

#[async_trait]
impl ShipmentRepository for StoreShipmentRepository {
    #[instrument(skip(self, input), fields(receiver_id = %input.receiver_id, device_id = %input.device_id))]
    async fn create_shipment(&self, input: CreateShipmentRepoInput) -> DomainResult<Shipment> {
        let record = ShipmentRecord::new(input, Utc::now());
        let value = serde_json::to_value(&record)
            .map_err(|e| DomainError::RepositoryError(anyhow::anyhow!(e)))?;

        let shipment_id = self.store.push(&self.paths.shipments, value).await?;
        debug!(shipment_id = %shipment_id, "shipment record created");

        record.into_shipment(&shipment_id)
    }

    async fn get_shipment(&self, shipment_id: &str) -> DomainResult<Option<Shipment>> {
        match self.store.get(&self.paths.shipment(shipment_id)).await? {
            Some(value) => parse_shipment(shipment_id, value).map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, input), fields(shipment_id = %input.shipment_id))]
    async fn update_shipment(&self, input: UpdateShipmentRepoInput) -> DomainResult<()> {
        let path = self.paths.shipment(&input.shipment_id);
        if self.store.get(&path).await?.is_none() {
            return Err(DomainError::ShipmentNotFound(input.shipment_id));
        }

        let mut fields = Map::new();
        if let Some(status) = input.status {
            fields.insert("status".to_string(), json!(status.as_str()));
        }
        if let Some(received_date) = input.received_date {
            fields.insert("received_date".to_string(), json!(received_date));
        }
        if let Some(notes) = input.notes {
            fields.insert("notes".to_string(), Value::String(notes));
        }
        if let Some(receiver_name) = input.receiver_name {
            fields.insert("receiver_name".to_string(), Value::String(receiver_name));
        }
        fields.insert("updated_date".to_string(), json!(Utc::now()));

        self.store.update(&path, fields).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(shipment_id = %shipment_id, status = %status))]
    async fn update_status_unless_terminal(
        &self,
        shipment_id: &str,
        status: ShipmentStatus,
    ) -> DomainResult<StatusWrite> {
        let guard = FieldGuard::none_of(
            "status",
            [ShipmentStatus::Received.as_str(), status.as_str()],
        );
        let mut fields = Map::new();
        fields.insert("status".to_string(), json!(status.as_str()));
        fields.insert("updated_date".to_string(), json!(Utc::now()));

        let outcome = self
            .store
            .update_unless(&self.paths.shipment(shipment_id), guard, fields)
            .await?;

        match outcome {
            GuardedUpdate::Applied => Ok(StatusWrite::Written),
            GuardedUpdate::Missing => Err(DomainError::ShipmentNotFound(shipment_id.to_string())),
            GuardedUpdate::Blocked(current) => {
                let current = current
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(|raw| raw.parse::<ShipmentStatus>().ok());
                debug!(current = ?current, "status write skipped");
                match current {
                    Some(current) if current.is_terminal() => Ok(StatusWrite::Terminal),
                    _ => Ok(StatusWrite::Unchanged),
                }
            }
        }
    }

    async fn delete_shipment(&self, shipment_id: &str) -> DomainResult<()> {
        self.store.remove(&self.paths.shipment(shipment_id)).await?;
        Ok(())
    }

    async fn list_by_receiver(&self, receiver_id: &str) -> DomainResult<Vec<Shipment>> {
        let mut shipments = self.all_shipments().await?;
        shipments.retain(|shipment| shipment.receiver_id == receiver_id);
        Ok(shipments)
    }

    async fn list_by_sender(&self, sender_id: &str) -> DomainResult<Vec<Shipment>> {
        let mut shipments = self.all_shipments().await?;
        shipments.retain(|shipment| shipment.sender_id == sender_id);
        shipments.sort_by(|a, b| b.shipment_date.cmp(&a.shipment_date));
        Ok(shipments)
    }

    fn subscribe_by_receiver(
        &self,
        receiver_id: &str,
    ) -> DomainResult<SnapshotStream<Vec<Shipment>>> {
        let receiver_id = receiver_id.to_string();
        let stream = watch_snapshots(
            Arc::clone(&self.store),
            &self.paths.shipments,
            move |collection| {
                let mut shipments = parse_shipments(collection);
                shipments.retain(|shipment| shipment.receiver_id == receiver_id);
                shipments
            },
        )?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::InMemoryRealtimeStore;
    use chrono::Duration;
    use futures::StreamExt;

    fn create_input(sender: &str, receiver: &str, device: &str) -> CreateShipmentRepoInput {
        CreateShipmentRepoInput {
            product_name: "Dell Laptop XPS 15".to_string(),
            product_id: "PKG-001".to_string(),
            sender_id: sender.to_string(),
            sender_name: "Sam Sender".to_string(),
            receiver_id: receiver.to_string(),
            receiver_name: "Jane Smith".to_string(),
            device_id: device.to_string(),
            notes: String::new(),
            status: ShipmentStatus::Sent,
            shipment_date: Utc::now(),
        }
    }

    fn repository() -> (Arc<InMemoryRealtimeStore>, StoreShipmentRepository) {
        let store = Arc::new(InMemoryRealtimeStore::new());
        let repo = StoreShipmentRepository::new(store.clone(), StorePaths::default());
        (store, repo)
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_stamps_dates() {
        let (_, repo) = repository();

        let shipment = repo
            .create_shipment(create_input("sam@example.com", "jane@example.com", "D1"))
            .await
            .unwrap();

        assert!(!shipment.shipment_id.is_empty());
        assert_eq!(shipment.status, ShipmentStatus::Sent);
        assert!(shipment.created_date.is_some());
        assert_eq!(shipment.created_date, shipment.updated_date);

        let stored = repo.get_shipment(&shipment.shipment_id).await.unwrap();
        assert_eq!(stored, Some(shipment));
    }

    #[tokio::test]
    async fn test_update_merges_and_stamps_updated_date() {
        let (_, repo) = repository();
        let shipment = repo
            .create_shipment(create_input("sam@example.com", "jane@example.com", "D1"))
            .await
            .unwrap();

        repo.update_shipment(UpdateShipmentRepoInput::status(
            &shipment.shipment_id,
            ShipmentStatus::Present,
        ))
        .await
        .unwrap();

        let stored = repo
            .get_shipment(&shipment.shipment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ShipmentStatus::Present);
        assert_eq!(stored.product_name, shipment.product_name);
        assert!(stored.updated_date >= shipment.updated_date);
    }

    #[tokio::test]
    async fn test_update_unknown_shipment() {
        let (_, repo) = repository();
        let result = repo
            .update_shipment(UpdateShipmentRepoInput::status("nope", ShipmentStatus::Missing))
            .await;
        assert!(matches!(result, Err(DomainError::ShipmentNotFound(_))));
    }

    #[tokio::test]
    async fn test_status_write_never_overwrites_concurrent_receive() {
        let (_, repo) = repository();
        let shipment = repo
            .create_shipment(create_input("sam@example.com", "jane@example.com", "D1"))
            .await
            .unwrap();
        repo.update_shipment(UpdateShipmentRepoInput::status(
            &shipment.shipment_id,
            ShipmentStatus::Present,
        ))
        .await
        .unwrap();

        // The reconciler decided on a snapshot that still says present
        let snapshot = repo
            .get_shipment(&shipment.shipment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.status, ShipmentStatus::Present);

        // The receiver confirms before the reconciler writes
        let received_at = Utc::now();
        repo.update_shipment(UpdateShipmentRepoInput {
            received_date: Some(received_at),
            ..UpdateShipmentRepoInput::status(&shipment.shipment_id, ShipmentStatus::Received)
        })
        .await
        .unwrap();

        let outcome = repo
            .update_status_unless_terminal(&snapshot.shipment_id, ShipmentStatus::Missing)
            .await
            .unwrap();
        assert_eq!(outcome, StatusWrite::Terminal);

        let stored = repo
            .get_shipment(&shipment.shipment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ShipmentStatus::Received);
        assert_eq!(stored.received_date, Some(received_at));
    }

    #[tokio::test]
    async fn test_status_write_treats_legacy_capitalized_status_as_terminal() {
        let (store, repo) = repository();
        let shipment = repo
            .create_shipment(create_input("sam@example.com", "jane@example.com", "D1"))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("status".to_string(), json!("Received"));
        store
            .update(&format!("shipments/{}", shipment.shipment_id), fields)
            .await
            .unwrap();

        let outcome = repo
            .update_status_unless_terminal(&shipment.shipment_id, ShipmentStatus::Present)
            .await
            .unwrap();
        assert_eq!(outcome, StatusWrite::Terminal);
    }

    #[tokio::test]
    async fn test_repeated_status_write_keeps_updated_date() {
        let (_, repo) = repository();
        let shipment = repo
            .create_shipment(create_input("sam@example.com", "jane@example.com", "D1"))
            .await
            .unwrap();

        let first = repo
            .update_status_unless_terminal(&shipment.shipment_id, ShipmentStatus::Missing)
            .await
            .unwrap();
        assert_eq!(first, StatusWrite::Written);
        let after_first = repo
            .get_shipment(&shipment.shipment_id)
            .await
            .unwrap()
            .unwrap();

        let second = repo
            .update_status_unless_terminal(&shipment.shipment_id, ShipmentStatus::Missing)
            .await
            .unwrap();
        assert_eq!(second, StatusWrite::Unchanged);
        let after_second = repo
            .get_shipment(&shipment.shipment_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(after_second.status, ShipmentStatus::Missing);
        assert_eq!(after_second.updated_date, after_first.updated_date);
    }

    #[tokio::test]
    async fn test_status_write_unknown_shipment() {
        let (store, repo) = repository();
        let result = repo
            .update_status_unless_terminal("nope", ShipmentStatus::Present)
            .await;
        assert!(matches!(result, Err(DomainError::ShipmentNotFound(_))));
        assert!(store.get("shipments").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_receiver_and_sender() {
        let (_, repo) = repository();
        repo.create_shipment(create_input("sam@example.com", "jane@example.com", "D1"))
            .await
            .unwrap();
        repo.create_shipment(create_input("sam@example.com", "omar@example.com", "D2"))
            .await
            .unwrap();
        repo.create_shipment(create_input("lee@example.com", "jane@example.com", "D3"))
            .await
            .unwrap();

        assert_eq!(repo.list_by_receiver("jane@example.com").await.unwrap().len(), 2);
        assert_eq!(repo.list_by_sender("sam@example.com").await.unwrap().len(), 2);
        assert!(repo.list_by_receiver("nobody@example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_by_sender_newest_first() {
        let (_, repo) = repository();
        let mut older = create_input("sam@example.com", "jane@example.com", "D1");
        older.shipment_date = Utc::now() - Duration::days(2);
        older.product_id = "PKG-OLD".to_string();
        let mut newer = create_input("sam@example.com", "jane@example.com", "D2");
        newer.product_id = "PKG-NEW".to_string();

        repo.create_shipment(older).await.unwrap();
        repo.create_shipment(newer).await.unwrap();

        let shipments = repo.list_by_sender("sam@example.com").await.unwrap();
        assert_eq!(shipments[0].product_id, "PKG-NEW");
        assert_eq!(shipments[1].product_id, "PKG-OLD");
    }

    #[tokio::test]
    async fn test_delete_shipment() {
        let (_, repo) = repository();
        let shipment = repo
            .create_shipment(create_input("sam@example.com", "jane@example.com", "D1"))
            .await
            .unwrap();

        repo.delete_shipment(&shipment.shipment_id).await.unwrap();
        assert!(repo.get_shipment(&shipment.shipment_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscription_emits_full_filtered_snapshots() {
        let (store, repo) = repository();
        let mut mine = repo.subscribe_by_receiver("jane@example.com").unwrap();
        assert_eq!(store.listener_count(), 1);

        // Initial snapshot is emitted immediately
        assert!(mine.next().await.unwrap().unwrap().is_empty());

        repo.create_shipment(create_input("sam@example.com", "omar@example.com", "D2"))
            .await
            .unwrap();
        assert!(mine.next().await.unwrap().unwrap().is_empty());

        repo.create_shipment(create_input("sam@example.com", "jane@example.com", "D1"))
            .await
            .unwrap();
        let snapshot = mine.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].device_id, "D1");

        drop(mine);
        assert_eq!(store.listener_count(), 0);
    }
}
