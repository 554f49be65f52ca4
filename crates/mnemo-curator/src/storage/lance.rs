use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, Int32Array, RecordBatch,
    RecordBatchIterator, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CuratorError, Result};
use crate::memory::tombstone::{EvictionReason, Tombstone};
use crate::memory::types::{CategoryPath, MemoryRecord, RetentionClass, SourceContext};
use crate::storage::filter::{escape, id_in_clause};
use crate::storage::{MemoryStore, Neighbor, RecordFilter};
use crate::text::cosine_similarity;

const RECORDS_TABLE: &str = "records";
const TOMBSTONES_TABLE: &str = "tombstones";

/// Attempts at a content rewrite before concurrent touches win
const REPLACE_ATTEMPTS: usize = 8;

/// Durable [`MemoryStore`] backed by two LanceDB tables.
pub struct LanceStore {
    connection: Connection,
    records: Table,
    tombstones: Table,
    dimension: usize,
}

impl LanceStore {
    /// Open the tables under `path`, creating them on first use
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let uri = path
            .to_str()
            .ok_or_else(|| CuratorError::Storage("Invalid path encoding".to_string()))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to connect to LanceDB: {e}")))?;

        let records =
            Self::open_or_create(&connection, RECORDS_TABLE, Self::records_schema(dimension)).await?;
        let tombstones =
            Self::open_or_create(&connection, TOMBSTONES_TABLE, Self::tombstones_schema()).await?;

        Ok(Self {
            connection,
            records,
            tombstones,
            dimension,
        })
    }

    async fn open_or_create(connection: &Connection, name: &str, schema: Arc<Schema>) -> Result<Table> {
        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to list tables: {e}")))?;

        if names.iter().any(|n| n.as_str() == name) {
            connection
                .open_table(name)
                .execute()
                .await
                .map_err(|e| CuratorError::Storage(format!("Failed to open {name} table: {e}")))
        } else {
            connection
                .create_empty_table(name, schema)
                .execute()
                .await
                .map_err(|e| CuratorError::Storage(format!("Failed to create {name} table: {e}")))
        }
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to list tables: {e}")))?;

        Ok(names.contains(&name.to_string()))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn timestamp_field(name: &str) -> Field {
        Field::new(
            name,
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        )
    }

    fn records_schema(dimension: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
            Field::new("has_embedding", DataType::Boolean, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("partition", DataType::Utf8, false),
            Field::new("confidence", DataType::Float32, false),
            Field::new("tags", DataType::Utf8, false),
            Self::timestamp_field("created_at"),
            Self::timestamp_field("last_accessed_at"),
            Field::new("access_count", DataType::Int32, false),
            Field::new("session_id", DataType::Utf8, true),
            Field::new("file_path", DataType::Utf8, true),
            Field::new("retention_class", DataType::Utf8, false),
            Field::new("pattern", DataType::Utf8, false),
            Field::new("fingerprint", DataType::Utf8, false),
            Field::new("degraded", DataType::Boolean, false),
        ]))
    }

    fn tombstones_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("original_id", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Self::timestamp_field("purged_at"),
            Self::timestamp_field("approximate_date"),
            Field::new("confidence", DataType::Float32, false),
            Field::new("reason", DataType::Utf8, false),
            Field::new("strategy", DataType::Utf8, false),
        ]))
    }

    /// Convert records to an Arrow RecordBatch. Records without an
    /// embedding are stored with a zero vector and `has_embedding = false`.
    fn records_to_batch(&self, records: &[MemoryRecord]) -> Result<RecordBatch> {
        for record in records.iter().filter(|r| r.has_embedding()) {
            if record.embedding.len() != self.dimension {
                return Err(CuratorError::Storage(format!(
                    "Embedding has {} dimensions, store expects {}",
                    record.embedding.len(),
                    self.dimension
                )));
            }
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.to_string()).collect();
        let categories: Vec<String> = records.iter().map(|r| r.category_path.to_string()).collect();
        let partitions: Vec<String> = records.iter().map(|r| r.category_path.partition()).collect();
        let tags = records
            .iter()
            .map(|r| serde_json::to_string(&r.tags))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let embeddings: Vec<Option<Vec<Option<f32>>>> = records
            .iter()
            .map(|r| {
                if r.has_embedding() {
                    Some(r.embedding.iter().map(|&v| Some(v)).collect())
                } else {
                    Some(vec![Some(0.0); self.dimension])
                }
            })
            .collect();

        RecordBatch::try_new(
            Self::records_schema(self.dimension),
            vec![
                Arc::new(StringArray::from_iter_values(ids)),
                Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.content.as_str()))),
                Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                    embeddings,
                    self.dimension as i32,
                )),
                Arc::new(BooleanArray::from(
                    records.iter().map(|r| r.has_embedding()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from_iter_values(categories)),
                Arc::new(StringArray::from_iter_values(partitions)),
                Arc::new(Float32Array::from_iter_values(records.iter().map(|r| r.confidence))),
                Arc::new(StringArray::from_iter_values(tags)),
                Arc::new(
                    TimestampMicrosecondArray::from_iter_values(
                        records.iter().map(|r| r.created_at.timestamp_micros()),
                    )
                    .with_timezone("UTC"),
                ),
                Arc::new(
                    TimestampMicrosecondArray::from_iter_values(
                        records.iter().map(|r| r.last_accessed_at.timestamp_micros()),
                    )
                    .with_timezone("UTC"),
                ),
                Arc::new(Int32Array::from_iter_values(
                    records
                        .iter()
                        .map(|r| i32::try_from(r.access_count).unwrap_or(i32::MAX)),
                )),
                Arc::new(StringArray::from(
                    records
                        .iter()
                        .map(|r| r.source_context.session_id.as_deref())
                        .collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    records
                        .iter()
                        .map(|r| r.source_context.file_path.as_deref())
                        .collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.retention_class.as_str()),
                )),
                Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.pattern.as_str()))),
                Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.fingerprint.as_str()),
                )),
                Arc::new(BooleanArray::from(
                    records.iter().map(|r| r.degraded).collect::<Vec<_>>(),
                )),
            ],
        )
        .map_err(|e| CuratorError::Storage(format!("Failed to create RecordBatch: {e}")))
    }

    fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<T>())
            .ok_or_else(|| CuratorError::Storage(format!("Failed to get {name} column")))
    }

    fn timestamp(array: &TimestampMicrosecondArray, row: usize, name: &str) -> Result<DateTime<Utc>> {
        Utc.timestamp_micros(array.value(row))
            .single()
            .ok_or_else(|| CuratorError::Storage(format!("Failed to parse {name} timestamp")))
    }

    fn optional_string(array: &StringArray, row: usize) -> Option<String> {
        if array.is_null(row) {
            None
        } else {
            Some(array.value(row).to_string())
        }
    }

    /// Convert every row of `batches` back into records
    fn batches_to_records(batches: &[RecordBatch]) -> Result<Vec<MemoryRecord>> {
        let mut records = Vec::new();
        for batch in batches {
            let ids = Self::column::<StringArray>(batch, "id")?;
            let contents = Self::column::<StringArray>(batch, "content")?;
            let embeddings = Self::column::<FixedSizeListArray>(batch, "embedding")?;
            let has_embedding = Self::column::<BooleanArray>(batch, "has_embedding")?;
            let categories = Self::column::<StringArray>(batch, "category")?;
            let confidences = Self::column::<Float32Array>(batch, "confidence")?;
            let tags = Self::column::<StringArray>(batch, "tags")?;
            let created = Self::column::<TimestampMicrosecondArray>(batch, "created_at")?;
            let accessed = Self::column::<TimestampMicrosecondArray>(batch, "last_accessed_at")?;
            let access_counts = Self::column::<Int32Array>(batch, "access_count")?;
            let sessions = Self::column::<StringArray>(batch, "session_id")?;
            let files = Self::column::<StringArray>(batch, "file_path")?;
            let retention = Self::column::<StringArray>(batch, "retention_class")?;
            let patterns = Self::column::<StringArray>(batch, "pattern")?;
            let fingerprints = Self::column::<StringArray>(batch, "fingerprint")?;
            let degraded = Self::column::<BooleanArray>(batch, "degraded")?;

            for row in 0..batch.num_rows() {
                let id = Uuid::parse_str(ids.value(row))
                    .map_err(|e| CuratorError::Storage(format!("Failed to parse UUID: {e}")))?;

                let embedding = if has_embedding.value(row) {
                    let list = embeddings.value(row);
                    let values = list
                        .as_any()
                        .downcast_ref::<Float32Array>()
                        .ok_or_else(|| {
                            CuratorError::Storage("Failed to get embedding values".to_string())
                        })?;
                    values.values().to_vec()
                } else {
                    Vec::new()
                };

                records.push(MemoryRecord {
                    id,
                    content: contents.value(row).to_string(),
                    embedding,
                    category_path: categories.value(row).parse::<CategoryPath>()?,
                    confidence: confidences.value(row),
                    tags: serde_json::from_str(tags.value(row))?,
                    created_at: Self::timestamp(created, row, "created_at")?,
                    last_accessed_at: Self::timestamp(accessed, row, "last_accessed_at")?,
                    access_count: access_counts.value(row).max(0) as u32,
                    source_context: SourceContext {
                        session_id: Self::optional_string(sessions, row),
                        file_path: Self::optional_string(files, row),
                    },
                    retention_class: retention.value(row).parse()?,
                    pattern: patterns.value(row).parse()?,
                    fingerprint: fingerprints.value(row).to_string(),
                    degraded: degraded.value(row),
                });
            }
        }
        Ok(records)
    }

    fn tombstones_to_batch(tombstones: &[Tombstone]) -> Result<RecordBatch> {
        let ids: Vec<String> = tombstones.iter().map(|t| t.original_id.to_string()).collect();
        let categories: Vec<String> = tombstones.iter().map(|t| t.category_path.to_string()).collect();

        RecordBatch::try_new(
            Self::tombstones_schema(),
            vec![
                Arc::new(StringArray::from_iter_values(ids)),
                Arc::new(StringArray::from_iter_values(categories)),
                Arc::new(
                    TimestampMicrosecondArray::from_iter_values(
                        tombstones.iter().map(|t| t.purged_at.timestamp_micros()),
                    )
                    .with_timezone("UTC"),
                ),
                Arc::new(
                    TimestampMicrosecondArray::from_iter_values(
                        tombstones.iter().map(|t| t.approximate_date.timestamp_micros()),
                    )
                    .with_timezone("UTC"),
                ),
                Arc::new(Float32Array::from_iter_values(tombstones.iter().map(|t| t.confidence))),
                Arc::new(StringArray::from_iter_values(tombstones.iter().map(|t| t.reason.as_str()))),
                Arc::new(StringArray::from_iter_values(
                    tombstones.iter().map(|t| t.strategy.as_str()),
                )),
            ],
        )
        .map_err(|e| CuratorError::Storage(format!("Failed to create tombstone RecordBatch: {e}")))
    }

    fn batches_to_tombstones(batches: &[RecordBatch]) -> Result<Vec<Tombstone>> {
        let mut tombstones = Vec::new();
        for batch in batches {
            let ids = Self::column::<StringArray>(batch, "original_id")?;
            let categories = Self::column::<StringArray>(batch, "category")?;
            let purged = Self::column::<TimestampMicrosecondArray>(batch, "purged_at")?;
            let approximate = Self::column::<TimestampMicrosecondArray>(batch, "approximate_date")?;
            let confidences = Self::column::<Float32Array>(batch, "confidence")?;
            let reasons = Self::column::<StringArray>(batch, "reason")?;
            let strategies = Self::column::<StringArray>(batch, "strategy")?;

            for row in 0..batch.num_rows() {
                let reason = match reasons.value(row) {
                    "expired" => EvictionReason::Expired,
                    "capacity_pressure" => EvictionReason::CapacityPressure,
                    other => {
                        return Err(CuratorError::Storage(format!(
                            "Unknown eviction reason: {other}"
                        )));
                    }
                };

                tombstones.push(Tombstone {
                    original_id: Uuid::parse_str(ids.value(row))
                        .map_err(|e| CuratorError::Storage(format!("Failed to parse UUID: {e}")))?,
                    category_path: categories.value(row).parse()?,
                    purged_at: Self::timestamp(purged, row, "purged_at")?,
                    approximate_date: Self::timestamp(approximate, row, "approximate_date")?,
                    confidence: confidences.value(row),
                    reason,
                    strategy: strategies.value(row).to_string(),
                });
            }
        }
        Ok(tombstones)
    }

    async fn query_records(&self, filter: Option<String>) -> Result<Vec<MemoryRecord>> {
        let mut query = self.records.query();
        if let Some(sql) = filter {
            query = query.only_if(sql);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to query records: {e}")))?
            .try_collect()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to collect query results: {e}")))?;

        Self::batches_to_records(&batches)
    }
}

#[async_trait]
impl MemoryStore for LanceStore {
    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        let mut found = self.query_records(Some(format!("id = '{id}'"))).await?;
        Ok(found.pop())
    }

    async fn put(&self, record: &MemoryRecord) -> Result<()> {
        let schema = Self::records_schema(self.dimension);
        let batch = self.records_to_batch(std::slice::from_ref(record))?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let mut merge = self.records.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(batches))
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to upsert record: {e}")))?;

        Ok(())
    }

    /// Compare-and-swap on `access_count`: the row is rewritten only if no
    /// touch committed since it was read, otherwise it is re-read and the
    /// decided fields applied again.
    async fn replace_content(&self, record: &MemoryRecord) -> Result<bool> {
        for attempt in 1..=REPLACE_ATTEMPTS {
            let Some(mut current) = self.get(record.id).await? else {
                return Ok(false);
            };
            let expected = current.access_count;
            current.apply_content(record);

            let batch = self.records_to_batch(std::slice::from_ref(&current))?;
            let batches = RecordBatchIterator::new(vec![Ok(batch)], Self::records_schema(self.dimension));
            let mut merge = self.records.merge_insert(&["id"]);
            merge.when_matched_update_all(Some(format!("target.access_count = {expected}")));
            let result = merge
                .execute(Box::new(batches))
                .await
                .map_err(|e| CuratorError::Storage(format!("Failed to rewrite record: {e}")))?;

            if result.num_updated_rows > 0 {
                return Ok(true);
            }
            debug!(memory_id = %record.id, attempt, "Access count moved during rewrite, retrying");
        }
        Err(CuratorError::Storage(format!(
            "Record {} kept changing during {REPLACE_ATTEMPTS} rewrite attempts",
            record.id
        )))
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let clause = id_in_clause(ids);

        let existing = self
            .records
            .count_rows(Some(clause.clone()))
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to count rows: {e}")))?;

        // One delete is one table commit: the whole batch or nothing
        self.records
            .delete(&clause)
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to delete records: {e}")))?;

        Ok(existing)
    }

    async fn nearest(&self, vector: &[f32], category_prefix: &str, k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            return Err(CuratorError::Storage(format!(
                "Query vector has {} dimensions, store expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let filter = RecordFilter::new()
            .with_category_prefix(category_prefix)
            .embedded_only();
        let candidates = self
            .records
            .count_rows(filter.to_sql_clause())
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to count neighbours: {e}")))?;
        if candidates == 0 {
            return Ok(Vec::new());
        }

        let mut query = self
            .records
            .query()
            .nearest_to(vector)
            .map_err(|e| CuratorError::Storage(format!("Failed to create vector query: {e}")))?
            .distance_type(DistanceType::Cosine)
            .limit(k);
        if let Some(sql) = filter.to_sql_clause() {
            query = query.only_if(sql);
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to execute search: {e}")))?
            .try_collect()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to collect search results: {e}")))?;

        let mut neighbors: Vec<Neighbor> = Self::batches_to_records(&batches)?
            .into_iter()
            .map(|record| Neighbor {
                similarity: cosine_similarity(vector, &record.embedding),
                record,
            })
            .collect();
        neighbors.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<MemoryRecord>> {
        let mut records = self.query_records(filter.to_sql_clause()).await?;
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    async fn count(&self) -> Result<usize> {
        self.records
            .count_rows(None)
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to count rows: {e}")))
    }

    async fn touch(&self, id: Uuid) -> Result<bool> {
        let now = Utc::now().timestamp_micros();

        let result = self
            .records
            .update()
            .only_if(format!("id = '{id}'"))
            .column("access_count", "access_count + 1")
            .column("last_accessed_at", format!("{now}"))
            .execute()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to update access: {e}")))?;

        Ok(result.rows_updated > 0)
    }

    async fn set_retention(&self, ids: &[Uuid], class: RetentionClass) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.records
            .update()
            .only_if(id_in_clause(ids))
            .column("retention_class", format!("'{}'", escape(class.as_str())))
            .execute()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to update retention class: {e}")))?;

        Ok(())
    }

    async fn insert_tombstones(&self, tombstones: &[Tombstone]) -> Result<()> {
        if tombstones.is_empty() {
            return Ok(());
        }

        let batch = Self::tombstones_to_batch(tombstones)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], Self::tombstones_schema());

        self.tombstones
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to insert tombstones: {e}")))?;

        Ok(())
    }

    async fn delete_tombstones(&self, original_ids: &[Uuid]) -> Result<()> {
        if original_ids.is_empty() {
            return Ok(());
        }

        let list = original_ids
            .iter()
            .map(|id| format!("'{id}'"))
            .collect::<Vec<_>>()
            .join(", ");
        self.tombstones
            .delete(&format!("original_id IN ({list})"))
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to delete tombstones: {e}")))?;

        Ok(())
    }

    async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        let batches: Vec<RecordBatch> = self
            .tombstones
            .query()
            .execute()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to query tombstones: {e}")))?
            .try_collect()
            .await
            .map_err(|e| CuratorError::Storage(format!("Failed to collect tombstones: {e}")))?;

        Self::batches_to_tombstones(&batches)
    }

    fn name(&self) -> &'static str {
        "lance"
    }
}

impl std::fmt::Debug for LanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceStore")
            .field("dimension", &self.dimension)
            .finish()
    }
}
