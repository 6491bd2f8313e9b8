//! AWS DynamoDB queue storage backend.
//!
//! Serverless and AWS-native persistence for distributed deployments.
//!
//! ## Table Schema
//!
//! - **Queues table**: PK=`player_id` (S); GSI `ActiveIndex` with
//!   PK=`is_running` (S), SK=`last_processed` (S) for scheduler queries.
//! - **Snapshots table**: PK=`snapshot_id` (S); GSI `PlayerTimestampIndex`
//!   with PK=`player_id` (S), SK=`timestamp_ms` (N); TTL attribute
//!   `ttl_epoch` (N, Unix epoch seconds).
//! - **Events table**: PK=`player_id` (S), SK=`event_id` (S, UUID v7 so the
//!   sort order is temporal). Append-only.
//! - **Migrations table**: PK=`migration_id` (S).
//!
//! Conditional writes carry the engine's optimistic concurrency:
//! `attribute_not_exists(player_id)` for creates, `version = :expected` for
//! replacements, with `ConditionalCheckFailed` mapped to `VersionConflict`.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, GlobalSecondaryIndex, KeySchemaElement,
    KeyType, Projection, ProjectionType, ScalarAttributeType, TableStatus,
    TimeToLiveSpecification,
};
use tracing::{debug, error, info, warn};

use cogwork_queue_types::CompletionEvent;

use crate::error::QueueStorageError;
use crate::traits::{
    MigrationRecord, QueueIndexAttributes, QueueStore, SnapshotRecord, StoredQueue,
};

/// Configuration for DynamoDB queue storage.
#[derive(Debug, Clone)]
pub struct DynamoDbQueueConfig {
    pub queues_table: String,
    pub snapshots_table: String,
    pub events_table: String,
    pub migrations_table: String,
    /// AWS region.
    pub region: String,
    /// Allow table creation if tables don't exist.
    pub create_tables_if_missing: bool,
    /// Default page size for index queries.
    pub default_page_size: u32,
}

impl Default for DynamoDbQueueConfig {
    fn default() -> Self {
        Self {
            queues_table: "cogwork-queues".to_string(),
            snapshots_table: "cogwork-queue-snapshots".to_string(),
            events_table: "cogwork-queue-events".to_string(),
            migrations_table: "cogwork-queue-migrations".to_string(),
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            create_tables_if_missing: true,
            default_page_size: 50,
        }
    }
}

/// DynamoDB-backed queue storage implementation.
pub struct DynamoDbQueueStore {
    config: DynamoDbQueueConfig,
    client: Client,
}

impl DynamoDbQueueStore {
    /// Create with default configuration.
    pub async fn new() -> Result<Self, QueueStorageError> {
        Self::with_config(DynamoDbQueueConfig::default()).await
    }

    /// Create with custom configuration, verifying (and optionally
    /// creating) the four tables.
    pub async fn with_config(config: DynamoDbQueueConfig) -> Result<Self, QueueStorageError> {
        info!(
            queues_table = %config.queues_table,
            region = %config.region,
            "Initializing DynamoDB queue storage"
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        let client = Client::new(&aws_config);

        let storage = Self { config, client };
        storage.verify_tables().await?;
        Ok(storage)
    }

    async fn verify_tables(&self) -> Result<(), QueueStorageError> {
        self.verify_table(&self.config.queues_table.clone(), Self::create_queues_table)
            .await?;
        self.verify_table(
            &self.config.snapshots_table.clone(),
            Self::create_snapshots_table,
        )
        .await?;
        self.verify_table(&self.config.events_table.clone(), Self::create_events_table)
            .await?;
        self.verify_table(
            &self.config.migrations_table.clone(),
            Self::create_migrations_table,
        )
        .await?;
        Ok(())
    }

    async fn verify_table<'a, F, Fut>(
        &'a self,
        table: &'a str,
        create: F,
    ) -> Result<(), QueueStorageError>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: std::future::Future<Output = Result<(), QueueStorageError>>,
    {
        match self.client.describe_table().table_name(table).send().await {
            Ok(output) => {
                let status = output.table().and_then(|t| t.table_status().cloned());
                match status {
                    Some(TableStatus::Active) => {
                        debug!(table = %table, "DynamoDB table is active");
                        Ok(())
                    }
                    Some(_) => self.wait_for_table_active(table).await,
                    None => Err(QueueStorageError::DatabaseError(format!(
                        "table '{}' status unknown",
                        table
                    ))),
                }
            }
            Err(_) if self.config.create_tables_if_missing => {
                warn!(table = %table, "Table does not exist, creating it");
                create(self).await?;
                self.wait_for_table_active(table).await
            }
            Err(err) => {
                error!(table = %table, error = %err, "Table does not exist");
                Err(QueueStorageError::DatabaseError(format!(
                    "table '{}' does not exist and create_tables_if_missing is false",
                    table
                )))
            }
        }
    }

    async fn wait_for_table_active(&self, table: &str) -> Result<(), QueueStorageError> {
        for _ in 0..30 {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            let output = self
                .client
                .describe_table()
                .table_name(table)
                .send()
                .await
                .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
            if matches!(
                output.table().and_then(|t| t.table_status()),
                Some(TableStatus::Active)
            ) {
                info!(table = %table, "DynamoDB table became active");
                return Ok(());
            }
        }
        Err(QueueStorageError::DatabaseError(format!(
            "table '{}' did not become active in time",
            table
        )))
    }

    fn key_element(name: &str, key_type: KeyType) -> Result<KeySchemaElement, QueueStorageError> {
        KeySchemaElement::builder()
            .attribute_name(name)
            .key_type(key_type)
            .build()
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))
    }

    fn attr_definition(
        name: &str,
        attr_type: ScalarAttributeType,
    ) -> Result<AttributeDefinition, QueueStorageError> {
        AttributeDefinition::builder()
            .attribute_name(name)
            .attribute_type(attr_type)
            .build()
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))
    }

    async fn create_queues_table(&self) -> Result<(), QueueStorageError> {
        let gsi = GlobalSecondaryIndex::builder()
            .index_name("ActiveIndex")
            .key_schema(Self::key_element("is_running", KeyType::Hash)?)
            .key_schema(Self::key_element("last_processed", KeyType::Range)?)
            .projection(
                Projection::builder()
                    .projection_type(ProjectionType::KeysOnly)
                    .build(),
            )
            .build()
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;

        self.client
            .create_table()
            .table_name(&self.config.queues_table)
            .key_schema(Self::key_element("player_id", KeyType::Hash)?)
            .set_attribute_definitions(Some(vec![
                Self::attr_definition("player_id", ScalarAttributeType::S)?,
                Self::attr_definition("is_running", ScalarAttributeType::S)?,
                Self::attr_definition("last_processed", ScalarAttributeType::S)?,
            ]))
            .billing_mode(BillingMode::PayPerRequest)
            .set_global_secondary_indexes(Some(vec![gsi]))
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn create_snapshots_table(&self) -> Result<(), QueueStorageError> {
        let gsi = GlobalSecondaryIndex::builder()
            .index_name("PlayerTimestampIndex")
            .key_schema(Self::key_element("player_id", KeyType::Hash)?)
            .key_schema(Self::key_element("timestamp_ms", KeyType::Range)?)
            .projection(
                Projection::builder()
                    .projection_type(ProjectionType::All)
                    .build(),
            )
            .build()
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;

        self.client
            .create_table()
            .table_name(&self.config.snapshots_table)
            .key_schema(Self::key_element("snapshot_id", KeyType::Hash)?)
            .set_attribute_definitions(Some(vec![
                Self::attr_definition("snapshot_id", ScalarAttributeType::S)?,
                Self::attr_definition("player_id", ScalarAttributeType::S)?,
                Self::attr_definition("timestamp_ms", ScalarAttributeType::N)?,
            ]))
            .billing_mode(BillingMode::PayPerRequest)
            .set_global_secondary_indexes(Some(vec![gsi]))
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;

        // Native TTL drives the 30-day snapshot expiry.
        self.wait_for_table_active(&self.config.snapshots_table)
            .await?;
        self.client
            .update_time_to_live()
            .table_name(&self.config.snapshots_table)
            .time_to_live_specification(
                TimeToLiveSpecification::builder()
                    .attribute_name("ttl_epoch")
                    .enabled(true)
                    .build()
                    .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?,
            )
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn create_events_table(&self) -> Result<(), QueueStorageError> {
        self.client
            .create_table()
            .table_name(&self.config.events_table)
            .key_schema(Self::key_element("player_id", KeyType::Hash)?)
            .key_schema(Self::key_element("event_id", KeyType::Range)?)
            .set_attribute_definitions(Some(vec![
                Self::attr_definition("player_id", ScalarAttributeType::S)?,
                Self::attr_definition("event_id", ScalarAttributeType::S)?,
            ]))
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn create_migrations_table(&self) -> Result<(), QueueStorageError> {
        self.client
            .create_table()
            .table_name(&self.config.migrations_table)
            .key_schema(Self::key_element("migration_id", KeyType::Hash)?)
            .set_attribute_definitions(Some(vec![Self::attr_definition(
                "migration_id",
                ScalarAttributeType::S,
            )?]))
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

fn get_s(
    item: &HashMap<String, AttributeValue>,
    key: &str,
) -> Result<String, QueueStorageError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| QueueStorageError::SerializationError(format!("missing attribute {}", key)))
}

fn get_n<T: std::str::FromStr>(
    item: &HashMap<String, AttributeValue>,
    key: &str,
) -> Result<T, QueueStorageError> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<T>().ok())
        .ok_or_else(|| {
            QueueStorageError::SerializationError(format!("missing numeric attribute {}", key))
        })
}

fn stored_queue_to_item(record: &StoredQueue) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();
    item.insert(
        "player_id".to_string(),
        AttributeValue::S(record.player_id.clone()),
    );
    item.insert(
        "version".to_string(),
        AttributeValue::N(record.version.to_string()),
    );
    item.insert(
        "schema_version".to_string(),
        AttributeValue::N(record.schema_version.to_string()),
    );
    item.insert(
        "checksum".to_string(),
        AttributeValue::S(record.checksum.clone()),
    );
    item.insert(
        "last_updated".to_string(),
        AttributeValue::N(record.last_updated_ms.to_string()),
    );
    item.insert(
        "last_validated".to_string(),
        AttributeValue::N(record.last_validated_ms.to_string()),
    );
    item.insert(
        "queue_data".to_string(),
        AttributeValue::S(record.queue_data.clone()),
    );
    item.insert(
        "is_running".to_string(),
        AttributeValue::S(record.attributes.is_running.clone()),
    );
    item.insert(
        "is_paused".to_string(),
        AttributeValue::S(record.attributes.is_paused.clone()),
    );
    item.insert(
        "current_task_id".to_string(),
        AttributeValue::S(record.attributes.current_task_id.clone()),
    );
    item.insert(
        "queue_size".to_string(),
        AttributeValue::N(record.attributes.queue_size.to_string()),
    );
    item.insert(
        "total_tasks_completed".to_string(),
        AttributeValue::N(record.attributes.total_tasks_completed.to_string()),
    );
    item.insert(
        "last_processed".to_string(),
        AttributeValue::S(record.attributes.last_processed.clone()),
    );
    item
}

fn item_to_stored_queue(
    item: &HashMap<String, AttributeValue>,
) -> Result<StoredQueue, QueueStorageError> {
    Ok(StoredQueue {
        player_id: get_s(item, "player_id")?,
        version: get_n(item, "version")?,
        schema_version: get_n(item, "schema_version")?,
        checksum: get_s(item, "checksum")?,
        last_updated_ms: get_n(item, "last_updated")?,
        last_validated_ms: get_n(item, "last_validated")?,
        queue_data: get_s(item, "queue_data")?,
        attributes: QueueIndexAttributes {
            is_running: get_s(item, "is_running")?,
            is_paused: get_s(item, "is_paused")?,
            current_task_id: get_s(item, "current_task_id")?,
            queue_size: get_n(item, "queue_size")?,
            total_tasks_completed: get_n(item, "total_tasks_completed")?,
            last_processed: get_s(item, "last_processed")?,
        },
    })
}

fn snapshot_to_item(record: &SnapshotRecord) -> Result<HashMap<String, AttributeValue>, QueueStorageError> {
    let mut item = HashMap::new();
    item.insert(
        "snapshot_id".to_string(),
        AttributeValue::S(record.snapshot_id.clone()),
    );
    item.insert(
        "player_id".to_string(),
        AttributeValue::S(record.player_id.clone()),
    );
    item.insert(
        "timestamp_ms".to_string(),
        AttributeValue::N(record.timestamp_ms.to_string()),
    );
    item.insert(
        "reason".to_string(),
        AttributeValue::S(record.reason.as_str().to_string()),
    );
    item.insert(
        "version".to_string(),
        AttributeValue::N(record.version.to_string()),
    );
    item.insert(
        "schema_version".to_string(),
        AttributeValue::N(record.schema_version.to_string()),
    );
    item.insert(
        "checksum".to_string(),
        AttributeValue::S(record.checksum.clone()),
    );
    item.insert(
        "ttl".to_string(),
        AttributeValue::N(record.ttl_seconds.to_string()),
    );
    item.insert(
        "ttl_epoch".to_string(),
        AttributeValue::N(record.expires_at_epoch().to_string()),
    );
    item.insert(
        "snapshot_data".to_string(),
        AttributeValue::S(record.snapshot_data.clone()),
    );
    Ok(item)
}

fn item_to_snapshot(
    item: &HashMap<String, AttributeValue>,
) -> Result<SnapshotRecord, QueueStorageError> {
    let reason = match get_s(item, "reason")?.as_str() {
        "periodic" => crate::traits::SnapshotReason::Periodic,
        "before_update" => crate::traits::SnapshotReason::BeforeUpdate,
        "manual" => crate::traits::SnapshotReason::Manual,
        "recovery" => crate::traits::SnapshotReason::Recovery,
        other => {
            return Err(QueueStorageError::SerializationError(format!(
                "unknown snapshot reason: {}",
                other
            )));
        }
    };
    Ok(SnapshotRecord {
        snapshot_id: get_s(item, "snapshot_id")?,
        player_id: get_s(item, "player_id")?,
        timestamp_ms: get_n(item, "timestamp_ms")?,
        reason,
        version: get_n(item, "version")?,
        schema_version: get_n(item, "schema_version")?,
        checksum: get_s(item, "checksum")?,
        ttl_seconds: get_n(item, "ttl")?,
        snapshot_data: get_s(item, "snapshot_data")?,
    })
}

#[async_trait]
impl QueueStore for DynamoDbQueueStore {
    fn backend_name(&self) -> &'static str {
        "dynamodb"
    }

    async fn load_queue(
        &self,
        player_id: &str,
    ) -> Result<Option<StoredQueue>, QueueStorageError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.config.queues_table)
            .key("player_id", AttributeValue::S(player_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;

        match output.item() {
            Some(item) => Ok(Some(item_to_stored_queue(item)?)),
            None => Ok(None),
        }
    }

    async fn put_queue(
        &self,
        record: StoredQueue,
        expect_version: Option<u64>,
    ) -> Result<(), QueueStorageError> {
        let player_id = record.player_id.clone();
        let item = stored_queue_to_item(&record);

        let mut request = self
            .client
            .put_item()
            .table_name(&self.config.queues_table)
            .set_item(Some(item));

        request = match expect_version {
            None => request.condition_expression("attribute_not_exists(player_id)"),
            Some(expected) => request
                .condition_expression("version = :expected")
                .expression_attribute_values(
                    ":expected",
                    AttributeValue::N(expected.to_string()),
                ),
        };

        match request.send().await {
            Ok(_) => {
                debug!(player_id = %player_id, version = record.version, "Stored queue record");
                Ok(())
            }
            Err(err) => {
                let err_str = err.to_string();
                if err_str.contains("ConditionalCheckFailed") {
                    Err(QueueStorageError::VersionConflict {
                        player_id,
                        expected: expect_version,
                        stored: None,
                    })
                } else {
                    Err(QueueStorageError::DatabaseError(err_str))
                }
            }
        }
    }

    async fn delete_queue(&self, player_id: &str) -> Result<bool, QueueStorageError> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.config.queues_table)
            .key("player_id", AttributeValue::S(player_id.to_string()))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(output.attributes().is_some())
    }

    async fn query_active_queues(&self, limit: u32) -> Result<Vec<String>, QueueStorageError> {
        let output = self
            .client
            .query()
            .table_name(&self.config.queues_table)
            .index_name("ActiveIndex")
            .key_condition_expression("is_running = :running")
            .expression_attribute_values(":running", AttributeValue::S("true".to_string()))
            // Oldest last_processed first so starved queues get attention.
            .scan_index_forward(true)
            .limit(limit as i32)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;

        output
            .items()
            .iter()
            .map(|item| get_s(item, "player_id"))
            .collect()
    }

    async fn queue_count(&self) -> Result<usize, QueueStorageError> {
        let output = self
            .client
            .scan()
            .table_name(&self.config.queues_table)
            .select(aws_sdk_dynamodb::types::Select::Count)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(output.count() as usize)
    }

    async fn list_players(&self) -> Result<Vec<String>, QueueStorageError> {
        let mut players = Vec::new();
        let mut start_key = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.config.queues_table)
                .projection_expression("player_id")
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
            for item in output.items() {
                players.push(get_s(item, "player_id")?);
            }
            start_key = output.last_evaluated_key().cloned();
            if start_key.is_none() {
                break;
            }
        }
        players.sort_unstable();
        Ok(players)
    }

    async fn put_snapshot(&self, snapshot: SnapshotRecord) -> Result<(), QueueStorageError> {
        let item = snapshot_to_item(&snapshot)?;
        self.client
            .put_item()
            .table_name(&self.config.snapshots_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn get_snapshot(
        &self,
        snapshot_id: &str,
    ) -> Result<Option<SnapshotRecord>, QueueStorageError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.config.snapshots_table)
            .key("snapshot_id", AttributeValue::S(snapshot_id.to_string()))
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        match output.item() {
            Some(item) => Ok(Some(item_to_snapshot(item)?)),
            None => Ok(None),
        }
    }

    async fn list_snapshots(
        &self,
        player_id: &str,
        limit: u32,
    ) -> Result<Vec<SnapshotRecord>, QueueStorageError> {
        let output = self
            .client
            .query()
            .table_name(&self.config.snapshots_table)
            .index_name("PlayerTimestampIndex")
            .key_condition_expression("player_id = :player_id")
            .expression_attribute_values(":player_id", AttributeValue::S(player_id.to_string()))
            .scan_index_forward(false)
            .limit(limit as i32)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;

        output.items().iter().map(item_to_snapshot).collect()
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<bool, QueueStorageError> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.config.snapshots_table)
            .key("snapshot_id", AttributeValue::S(snapshot_id.to_string()))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(output.attributes().is_some())
    }

    async fn append_event(&self, event: CompletionEvent) -> Result<(), QueueStorageError> {
        let payload = serde_json::to_string(&event)?;
        self.client
            .put_item()
            .table_name(&self.config.events_table)
            .item("player_id", AttributeValue::S(event.player_id.clone()))
            .item("event_id", AttributeValue::S(event.event_id.clone()))
            .item("payload", AttributeValue::S(payload))
            .condition_expression("attribute_not_exists(event_id)")
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn list_events(
        &self,
        player_id: &str,
        limit: u32,
    ) -> Result<Vec<CompletionEvent>, QueueStorageError> {
        let output = self
            .client
            .query()
            .table_name(&self.config.events_table)
            .key_condition_expression("player_id = :player_id")
            .expression_attribute_values(":player_id", AttributeValue::S(player_id.to_string()))
            .scan_index_forward(false)
            .limit(limit as i32)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;

        output
            .items()
            .iter()
            .map(|item| {
                let payload = get_s(item, "payload")?;
                serde_json::from_str(&payload).map_err(QueueStorageError::from)
            })
            .collect()
    }

    async fn put_migration_record(
        &self,
        record: MigrationRecord,
    ) -> Result<(), QueueStorageError> {
        let payload = serde_json::to_string(&record)?;
        self.client
            .put_item()
            .table_name(&self.config.migrations_table)
            .item(
                "migration_id",
                AttributeValue::S(record.migration_id.clone()),
            )
            .item(
                "timestamp_ms",
                AttributeValue::N(record.timestamp_ms.to_string()),
            )
            .item("payload", AttributeValue::S(payload))
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn get_migration_record(
        &self,
        migration_id: &str,
    ) -> Result<Option<MigrationRecord>, QueueStorageError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.config.migrations_table)
            .key("migration_id", AttributeValue::S(migration_id.to_string()))
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;
        match output.item() {
            Some(item) => {
                let payload = get_s(item, "payload")?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn list_migration_records(&self) -> Result<Vec<MigrationRecord>, QueueStorageError> {
        let output = self
            .client
            .scan()
            .table_name(&self.config.migrations_table)
            .send()
            .await
            .map_err(|e| QueueStorageError::DatabaseError(e.to_string()))?;

        let mut records: Vec<MigrationRecord> = output
            .items()
            .iter()
            .map(|item| {
                let payload = get_s(item, "payload")?;
                serde_json::from_str(&payload).map_err(QueueStorageError::from)
            })
            .collect::<Result<_, _>>()?;
        records.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms));
        Ok(records)
    }

    async fn maintenance(&self) -> Result<(), QueueStorageError> {
        // Snapshot expiry rides on DynamoDB native TTL; nothing to sweep.
        Ok(())
    }
}
