//! Route metrics to relations, creating them on first sight.

use std::sync::Arc;

use crate::protocol::{DataType, MetricValue};
use crate::schema::{
    ColumnType, RelationCache, RelationDescriptor, SchemaError, normalize_relation_name,
    resolve_column_type,
};
use crate::storage::Catalog;

/// Maps metric names to relations and ensures each relation exists once.
#[derive(Clone)]
pub struct SchemaRouter {
    catalog: Arc<dyn Catalog>,
    cache: Arc<RelationCache>,
}

impl std::fmt::Debug for SchemaRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRouter")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SchemaRouter {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self::with_cache(catalog, Arc::new(RelationCache::new()))
    }

    /// Router over an existing cache.
    pub fn with_cache(catalog: Arc<dyn Catalog>, cache: Arc<RelationCache>) -> Self {
        Self { catalog, cache }
    }

    pub fn cache(&self) -> &Arc<RelationCache> {
        &self.cache
    }

    /// Resolve the relation for a metric, creating it if this is its first sight.
    ///
    /// The first sight of a relation name fixes its column type. Catalog
    /// failures are logged and the descriptor is cached anyway, so later
    /// writes surface the problem per metric without repeated catalog traffic.
    ///
    /// # Errors
    /// - `SchemaError::EmptyRelationName` if the name normalizes to nothing
    /// - `SchemaError::Conflict` if the cached column type differs from this metric's
    pub async fn route_and_ensure(
        &self,
        metric_name: &str,
        data_type: Option<DataType>,
        value: &MetricValue,
    ) -> Result<RelationDescriptor, SchemaError> {
        let table_name = normalize_relation_name(metric_name)?;
        let incoming = resolve_column_type(data_type, value);

        let entry = self.cache.entry(&table_name);
        if entry.initialized() {
            tracing::debug!(relation = %table_name, "Relation cache hit");
        }
        let descriptor = entry
            .get_or_init(|| self.ensure(&table_name, incoming))
            .await
            .clone();

        if descriptor.column_type != incoming {
            tracing::warn!(
                metric = metric_name,
                relation = %table_name,
                existing = %descriptor.column_type,
                incoming = %incoming,
                "Schema conflict, rejecting metric"
            );
            return Err(SchemaError::Conflict {
                relation: table_name,
                existing: descriptor.column_type,
                incoming,
            });
        }

        Ok(descriptor)
    }

    async fn ensure(&self, table_name: &str, resolved: ColumnType) -> RelationDescriptor {
        tracing::debug!(relation = table_name, column_type = %resolved, "Relation cache miss");

        match self.catalog.lookup(table_name).await {
            Ok(Some(existing)) => {
                tracing::debug!(relation = table_name, column_type = %existing, "Relation already in catalog");
                return RelationDescriptor::new(table_name, existing);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(relation = table_name, error = %e, "Catalog lookup failed");
            }
        }

        let descriptor = RelationDescriptor::new(table_name, resolved);
        match self.catalog.create(&descriptor).await {
            Ok(()) => tracing::info!(
                relation = table_name,
                column = descriptor.value_column,
                column_type = %resolved,
                "Relation created"
            ),
            Err(e) => tracing::error!(relation = table_name, error = %e, "Relation creation failed"),
        }
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingCatalog {
        existing: Mutex<HashMap<String, ColumnType>>,
        lookups: AtomicUsize,
        creates: AtomicUsize,
        fail_create: bool,
    }

    #[async_trait]
    impl Catalog for CountingCatalog {
        async fn lookup(&self, relation: &str) -> Result<Option<ColumnType>, StorageError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(self.existing.lock().unwrap().get(relation).copied())
        }

        async fn create(&self, descriptor: &RelationDescriptor) -> Result<(), StorageError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(StorageError::Internal("catalog offline".to_string()));
            }
            self.existing
                .lock()
                .unwrap()
                .insert(descriptor.table_name.clone(), descriptor.column_type);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_route_twice_creates_once() {
        let catalog = Arc::new(CountingCatalog::default());
        let router = SchemaRouter::new(catalog.clone());
        let value = MetricValue::Float(21.5);

        let first = router
            .route_and_ensure("Inputs/Indoor_temperature", Some(DataType::Float), &value)
            .await
            .unwrap();
        let second = router
            .route_and_ensure("Inputs/Indoor_temperature", Some(DataType::Float), &value)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.table_name, "indoor_temperature");
        assert_eq!(first.value_column, "value");
        assert_eq!(first.column_type, ColumnType::Double);
        assert_eq!(catalog.creates.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefixed_and_bare_names_share_relation() {
        let catalog = Arc::new(CountingCatalog::default());
        let router = SchemaRouter::new(catalog.clone());
        let value = MetricValue::Float(1.0);

        let a = router
            .route_and_ensure("Inputs/Indoor_temperature", Some(DataType::Float), &value)
            .await
            .unwrap();
        let b = router
            .route_and_ensure("Indoor_temperature", None, &value)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(catalog.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_sight_creates_once() {
        let catalog = Arc::new(CountingCatalog::default());
        let router = Arc::new(SchemaRouter::new(catalog.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let router = Arc::clone(&router);
            tasks.spawn(async move {
                router
                    .route_and_ensure("Inputs/CO2_levels", Some(DataType::Float), &MetricValue::Float(500.0))
                    .await
            });
        }

        let mut descriptors = Vec::new();
        while let Some(result) = tasks.join_next().await {
            descriptors.push(result.unwrap().unwrap());
        }

        assert_eq!(descriptors.len(), 16);
        assert!(descriptors.iter().all(|d| d.table_name == "co2_levels"));
        assert_eq!(catalog.creates.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_type_conflict_is_rejected() {
        let catalog = Arc::new(CountingCatalog::default());
        let router = SchemaRouter::new(catalog.clone());

        router
            .route_and_ensure("Inputs/Fan_speed", Some(DataType::Float), &MetricValue::Float(0.5))
            .await
            .unwrap();
        let err = router
            .route_and_ensure("Inputs/Fan_speed", Some(DataType::String), &MetricValue::Text("fast".into()))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SchemaError::Conflict {
                relation: "fan_speed".to_string(),
                existing: ColumnType::Double,
                incoming: ColumnType::Text,
            }
        );
        assert_eq!(router.cache().get("fan_speed").unwrap().column_type, ColumnType::Double);
    }

    #[tokio::test]
    async fn test_integer_into_double_relation_is_not_widened() {
        let catalog = Arc::new(CountingCatalog::default());
        let router = SchemaRouter::new(catalog.clone());

        router
            .route_and_ensure("Inputs/Pressure", None, &MetricValue::Float(1.5))
            .await
            .unwrap();
        let err = router
            .route_and_ensure("Inputs/Pressure", None, &MetricValue::Int(2))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SchemaError::Conflict {
                relation: "pressure".to_string(),
                existing: ColumnType::Double,
                incoming: ColumnType::Long,
            }
        );
        assert_eq!(catalog.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_relation_type_is_adopted() {
        let catalog = Arc::new(CountingCatalog::default());
        catalog
            .existing
            .lock()
            .unwrap()
            .insert("status".to_string(), ColumnType::Long);
        let router = SchemaRouter::new(catalog.clone());

        let descriptor = router
            .route_and_ensure("Inputs/Status", Some(DataType::UInt64), &MetricValue::Int(0))
            .await
            .unwrap();
        assert_eq!(descriptor.column_type, ColumnType::Long);
        assert_eq!(catalog.creates.load(Ordering::SeqCst), 0);

        let err = router
            .route_and_ensure("Status", None, &MetricValue::Bool(true))
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_failed_creation_is_still_cached() {
        let catalog = Arc::new(CountingCatalog {
            fail_create: true,
            ..Default::default()
        });
        let router = SchemaRouter::new(catalog.clone());

        for _ in 0..3 {
            let descriptor = router
                .route_and_ensure("Inputs/Alarms", None, &MetricValue::Text("none".into()))
                .await
                .unwrap();
            assert_eq!(descriptor.value_column, "status");
        }
        assert_eq!(catalog.creates.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_name_rejected_without_catalog_traffic() {
        let catalog = Arc::new(CountingCatalog::default());
        let router = SchemaRouter::new(catalog.clone());
        let err = router
            .route_and_ensure("Inputs/", None, &MetricValue::Int(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::EmptyRelationName(_)));
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 0);
    }
}
