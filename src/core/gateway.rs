//! Gateway assembly
//!
//! [`SyncGateway`] owns the wired subsystems (clock, buffer, coordinators,
//! action dispatcher, source registry) and exposes the operations a
//! transport layer calls. Build one through [`SyncGatewayBuilder`], which
//! accepts the injected adapters and codecs.

use crate::codec::ParquetCodec;
use crate::core::config::GatewayConfig;
use crate::core::error::{Error, Result};
use crate::flush::coordinator::{FlushCoordinator, FlushReport, FlushTarget};
use crate::flush::queue::FlushQueue;
use crate::schema::validate::ValidationPipeline;
use crate::schema::SchemaManager;
use crate::storage::adapters::{Catalogue, DatabaseAdapter, ObjectStore};
use crate::storage::buffer::{DeltaBuffer, TableStats};
use crate::storage::registry::SourceRegistry;
use crate::sync::actions::{
    Action, ActionBatchResult, ActionDispatcher, ActionHandler, AuthContext,
};
use crate::sync::pull::PullCoordinator;
use crate::sync::push::{IngestionCoordinator, PushOutcome};
use crate::sync::rules::SyncRulesContext;
use crate::types::{HlcClock, HlcTimestamp, SyncPull, SyncPush, SyncResponse, TableSchema};
use std::collections::HashMap;
use std::sync::Arc;

/// One configured gateway instance
pub struct SyncGateway {
    config: GatewayConfig,
    clock: Arc<HlcClock>,
    buffer: Arc<DeltaBuffer>,
    schema_manager: Option<Arc<SchemaManager>>,
    ingestion: IngestionCoordinator,
    pull: PullCoordinator,
    flush: FlushCoordinator,
    target: Option<FlushTarget>,
    actions: ActionDispatcher,
    sources: Arc<SourceRegistry>,
}

/// Step-by-step construction of a [`SyncGateway`]
pub struct SyncGatewayBuilder {
    config: GatewayConfig,
    schema: Option<TableSchema>,
    object_store: Option<Arc<dyn ObjectStore>>,
    database: Option<Arc<dyn DatabaseAdapter>>,
    parquet: Option<Arc<dyn ParquetCodec>>,
    catalogue: Option<Arc<dyn Catalogue>>,
    flush_queue: Option<Arc<dyn FlushQueue>>,
    handlers: Vec<(String, Arc<dyn ActionHandler>)>,
    sources: Vec<(String, Arc<dyn DatabaseAdapter>)>,
}

impl SyncGatewayBuilder {
    /// Start building from a gateway configuration
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            schema: None,
            object_store: None,
            database: None,
            parquet: None,
            catalogue: None,
            flush_queue: None,
            handlers: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Table schema: enables schema validation and parquet flushes
    pub fn with_table_schema(mut self, schema: TableSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Flush into an object store
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Flush into a database adapter
    pub fn with_database(mut self, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        self.database = Some(adapter);
        self
    }

    /// Parquet codec, required for `FlushFormat::Parquet`
    pub fn with_parquet_codec(mut self, codec: Arc<dyn ParquetCodec>) -> Self {
        self.parquet = Some(codec);
        self
    }

    /// Optional catalogue committed to after parquet flushes
    pub fn with_catalogue(mut self, catalogue: Arc<dyn Catalogue>) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    /// Optional post-flush materialisation queue
    pub fn with_flush_queue(mut self, queue: Arc<dyn FlushQueue>) -> Self {
        self.flush_queue = Some(queue);
        self
    }

    /// Register an action handler for a connector
    pub fn with_action_handler(
        mut self,
        connector: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        self.handlers.push((connector.into(), handler));
        self
    }

    /// Register a named pull-through source
    pub fn with_source(
        mut self,
        name: impl Into<String>,
        adapter: Arc<dyn DatabaseAdapter>,
    ) -> Self {
        self.sources.push((name.into(), adapter));
        self
    }

    /// Wire everything together
    pub fn build(self) -> Result<SyncGateway> {
        if self.object_store.is_some() && self.database.is_some() {
            return Err(Error::config(
                "configure either an object store or a database flush target, not both",
            ));
        }

        let clock = Arc::new(HlcClock::new());
        let buffer = Arc::new(DeltaBuffer::new());

        let schema_manager = match self.schema.clone() {
            Some(schema) => Some(Arc::new(SchemaManager::new(schema)?)),
            None => None,
        };

        let mut pipeline = ValidationPipeline::new().with_identifier_safety();
        if let Some(manager) = &schema_manager {
            pipeline = pipeline.with_schema_manager(Arc::clone(manager));
        }

        let ingestion = IngestionCoordinator::new(
            Arc::clone(&buffer),
            Arc::clone(&clock),
            pipeline,
            self.config.backpressure_bytes(),
        );

        let sources = Arc::new(SourceRegistry::new());
        for (name, adapter) in self.sources {
            sources.register(name, adapter);
        }
        let pull =
            PullCoordinator::new(Arc::clone(&buffer), Arc::clone(&clock), Arc::clone(&sources));

        let mut flush =
            FlushCoordinator::new(self.config.gateway_id.clone(), self.config.flush_format);
        if let Some(prefix) = &self.config.flush_key_prefix {
            flush = flush.with_key_prefix(prefix.clone());
        }
        if let Some(schema) = self.schema {
            flush = flush.with_table_schema(schema);
        }
        if let Some(codec) = self.parquet {
            flush = flush.with_parquet_codec(codec);
        }
        if let Some(catalogue) = self.catalogue {
            flush = flush.with_catalogue(catalogue, self.config.catalogue_namespace.clone());
        }
        if let Some(queue) = self.flush_queue {
            flush = flush.with_flush_queue(queue);
        }

        let target = match (self.object_store, self.database) {
            (Some(store), None) => Some(FlushTarget::ObjectStore(store)),
            (None, Some(adapter)) => Some(FlushTarget::Database(adapter)),
            _ => None,
        };

        let actions = ActionDispatcher::new(Arc::clone(&clock));
        for (connector, handler) in self.handlers {
            actions.register_handler(connector, handler);
        }

        Ok(SyncGateway {
            config: self.config,
            clock,
            buffer,
            schema_manager,
            ingestion,
            pull,
            flush,
            target,
            actions,
            sources,
        })
    }
}

impl SyncGateway {
    /// Start a builder
    pub fn builder(config: GatewayConfig) -> SyncGatewayBuilder {
        SyncGatewayBuilder::new(config)
    }

    /// The gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The gateway's delta buffer
    pub fn buffer(&self) -> &Arc<DeltaBuffer> {
        &self.buffer
    }

    /// The gateway's clock
    pub fn clock(&self) -> &Arc<HlcClock> {
        &self.clock
    }

    /// The pull-through source registry
    pub fn sources(&self) -> &Arc<SourceRegistry> {
        &self.sources
    }

    /// Next server HLC
    pub fn hlc_now(&self) -> HlcTimestamp {
        self.clock.now()
    }

    /// Ingest a push (spec'd push path)
    pub fn push(&self, push: SyncPush, bound_client_id: Option<&str>) -> Result<PushOutcome> {
        self.ingestion.push(push, bound_client_id)
    }

    /// Serve a pull
    pub async fn pull(
        &self,
        request: SyncPull,
        context: Option<&SyncRulesContext>,
    ) -> Result<SyncResponse> {
        self.pull.pull(request, context).await
    }

    /// Dispatch an action batch
    pub async fn dispatch_actions(
        &self,
        actions: Vec<Action>,
        auth: &AuthContext,
    ) -> Result<ActionBatchResult> {
        self.actions.dispatch(actions, auth).await
    }

    /// Evolve the table schema forward; requires a configured schema
    pub fn evolve_schema(&self, schema: TableSchema) -> Result<u64> {
        let manager = self
            .schema_manager
            .as_ref()
            .ok_or_else(|| Error::config("no schema manager configured"))?;
        Ok(manager.evolve(schema)?)
    }

    fn target(&self) -> Result<&FlushTarget> {
        self.target
            .as_ref()
            .ok_or_else(|| Error::config("no flush target configured"))
    }

    /// Flush the whole buffer now
    pub async fn flush(&self) -> Result<FlushReport> {
        let target = self.target()?;
        self.flush.flush(&self.buffer, target).await
    }

    /// Flush one table now
    pub async fn flush_table(&self, table: &str) -> Result<FlushReport> {
        let target = self.target()?;
        self.flush.flush_table(&self.buffer, target, table).await
    }

    /// The flush threshold currently in force: the configured bound,
    /// reduced for wide-column streams when adaptive sizing is on
    pub fn effective_max_buffer_bytes(&self) -> usize {
        let max = self.config.max_buffer_bytes;
        let Some(adaptive) = &self.config.adaptive else { return max };
        let entries = self.buffer.len();
        if entries == 0 {
            return max;
        }
        let average = self.buffer.estimated_bytes() / entries;
        if average > adaptive.wide_column_threshold_bytes {
            ((max as f64 / adaptive.reduction_factor) as usize).max(1)
        } else {
            max
        }
    }

    /// Whether the buffer has crossed its size or age threshold
    pub fn should_flush(&self) -> bool {
        self.buffer.should_flush(
            self.effective_max_buffer_bytes(),
            std::time::Duration::from_millis(self.config.max_buffer_age_ms),
        )
    }

    /// Tables whose buffered bytes exceed the per-table budget
    pub fn tables_over_budget(&self) -> Vec<String> {
        let Some(budget) = self.config.per_table_budget_bytes else { return Vec::new() };
        let mut tables: Vec<String> = self
            .buffer
            .table_stats()
            .into_iter()
            .filter(|(_, stats)| stats.estimated_bytes > budget)
            .map(|(table, _)| table)
            .collect();
        tables.sort();
        tables
    }

    /// Flush whatever the thresholds call for: the whole buffer when the
    /// global threshold is crossed, otherwise any tables over their budget.
    /// Returns the reports of the flushes performed.
    pub async fn maybe_flush(&self) -> Result<Vec<FlushReport>> {
        if self.should_flush() {
            return Ok(vec![self.flush().await?]);
        }
        let mut reports = Vec::new();
        for table in self.tables_over_budget() {
            reports.push(self.flush_table(&table).await?);
        }
        Ok(reports)
    }

    /// Per-table buffer statistics
    pub fn table_stats(&self) -> HashMap<String, TableStats> {
        self.buffer.table_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AdaptiveBufferConfig, FlushFormat};
    use crate::storage::memory::MemoryStore;
    use crate::testutil::insert;
    use crate::types::HlcTimestamp;

    fn config() -> GatewayConfig {
        GatewayConfig {
            gateway_id: "gw-test".into(),
            flush_format: FlushFormat::Json,
            ..GatewayConfig::default()
        }
    }

    fn store_gateway(config: GatewayConfig) -> (SyncGateway, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let gateway = SyncGateway::builder(config)
            .with_object_store(Arc::clone(&store) as Arc<dyn ObjectStore>)
            .build()
            .unwrap();
        (gateway, store)
    }

    #[tokio::test]
    async fn push_flush_pull_round_trip() {
        let (gateway, store) = store_gateway(config());

        let push = SyncPush {
            client_id: "a".into(),
            deltas: vec![insert("todos", "r1", 1_000, "title", "hello")],
            last_seen_hlc: HlcTimestamp::ZERO,
        };
        let outcome = gateway.push(push, None).unwrap();
        assert_eq!(outcome.accepted, 1);

        // Pull sees the buffered delta before the flush.
        let page = gateway
            .pull(
                SyncPull {
                    client_id: "b".into(),
                    since_hlc: HlcTimestamp::ZERO,
                    max_deltas: 10,
                    source: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(page.deltas.len(), 1);

        let report = gateway.flush().await.unwrap();
        assert_eq!(report.deltas_flushed, 1);
        assert!(gateway.buffer().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn flush_without_target_is_a_config_error() {
        let gateway = SyncGateway::builder(config()).build().unwrap();
        assert!(matches!(gateway.flush().await, Err(Error::Config(_))));
    }

    #[test]
    fn both_targets_rejected() {
        let store = Arc::new(MemoryStore::new());
        struct NullDb;
        #[async_trait::async_trait]
        impl DatabaseAdapter for NullDb {
            async fn insert_deltas(
                &self,
                _d: &[Arc<crate::types::RowDelta>],
            ) -> std::result::Result<(), crate::core::error::AdapterError> {
                Ok(())
            }
            async fn query_deltas_since(
                &self,
                _h: HlcTimestamp,
            ) -> std::result::Result<Vec<crate::types::RowDelta>, crate::core::error::AdapterError>
            {
                Ok(Vec::new())
            }
            async fn get_latest_state(
                &self,
                _t: &str,
            ) -> std::result::Result<Vec<crate::types::RowDelta>, crate::core::error::AdapterError>
            {
                Ok(Vec::new())
            }
            async fn ensure_schema(
                &self,
                _s: &TableSchema,
            ) -> std::result::Result<(), crate::core::error::AdapterError> {
                Ok(())
            }
            async fn close(&self) -> std::result::Result<(), crate::core::error::AdapterError> {
                Ok(())
            }
        }

        let result = SyncGateway::builder(config())
            .with_object_store(store as Arc<dyn ObjectStore>)
            .with_database(Arc::new(NullDb))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn adaptive_sizing_reduces_the_threshold_for_wide_rows() {
        let mut cfg = config();
        cfg.max_buffer_bytes = 10_000;
        cfg.adaptive = Some(AdaptiveBufferConfig {
            wide_column_threshold_bytes: 100,
            reduction_factor: 4.0,
        });
        let (gateway, _) = store_gateway(cfg);

        assert_eq!(gateway.effective_max_buffer_bytes(), 10_000, "empty buffer keeps the bound");

        // A wide delta drives the average over the threshold.
        let wide_value = "x".repeat(500);
        gateway
            .push(
                SyncPush {
                    client_id: "a".into(),
                    deltas: vec![insert("t", "r1", 1_000, "payload", &wide_value)],
                    last_seen_hlc: HlcTimestamp::ZERO,
                },
                None,
            )
            .unwrap();
        assert_eq!(gateway.effective_max_buffer_bytes(), 2_500);
    }

    #[tokio::test]
    async fn per_table_budget_flushes_only_heavy_tables() {
        let mut cfg = config();
        cfg.max_buffer_bytes = usize::MAX; // keep the global threshold out of the way
        cfg.max_buffer_age_ms = u64::MAX;
        cfg.per_table_budget_bytes = Some(400);
        let (gateway, store) = store_gateway(cfg);

        let heavy_value = "x".repeat(400);
        for (i, (table, value)) in
            [("heavy", heavy_value.as_str()), ("light", "tiny")].iter().enumerate()
        {
            gateway
                .push(
                    SyncPush {
                        client_id: "a".into(),
                        deltas: vec![insert(table, "r1", 1_000 + i as u64, "v", value)],
                        last_seen_hlc: HlcTimestamp::ZERO,
                    },
                    None,
                )
                .unwrap();
        }

        assert_eq!(gateway.tables_over_budget(), vec!["heavy".to_string()]);
        let reports = gateway.maybe_flush().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].deltas_flushed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(gateway.buffer().len(), 1, "light table stays buffered");
    }

    #[tokio::test]
    async fn schema_evolution_passthrough() {
        use crate::types::schema::{ColumnDef, ColumnType};
        let schema = TableSchema {
            table: "todos".into(),
            columns: vec![ColumnDef::new("title", ColumnType::String)],
            primary_key: None,
            soft_delete: None,
            external_id_column: None,
        };
        let gateway = SyncGateway::builder(config())
            .with_table_schema(schema.clone())
            .build()
            .unwrap();

        let mut evolved = schema;
        evolved.columns.push(ColumnDef::new("done", ColumnType::Boolean));
        assert_eq!(gateway.evolve_schema(evolved).unwrap(), 2);

        let bare = SyncGateway::builder(config()).build().unwrap();
        assert!(bare
            .evolve_schema(TableSchema {
                table: "todos".into(),
                columns: Vec::new(),
                primary_key: None,
                soft_delete: None,
                external_id_column: None,
            })
            .is_err());
    }
}
