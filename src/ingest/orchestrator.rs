//! Per-message ingestion pipeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use crate::ingest::{
    IngestOutcome, IngestStats, MetricFailure, MetricOutcome, MetricStatus, NamespacePolicy,
    RebirthError, RebirthRequest, RebirthSink, SkipReason,
};
use crate::protocol::{DecodeError, JsonCodec, Message, MessageKind, Metric, NodeIdentity};
use crate::schema::SchemaRouter;
use crate::session::{RebirthReason, SessionManager, Verdict};
use crate::storage::{RowWriter, StorageHandles};

/// Runs messages through session gate, schema router and row writer.
///
/// Each message is processed under its identity's session lane, so messages
/// of one identity are handled strictly in arrival order while different
/// identities proceed in parallel. Metric writes within one DATA message run
/// concurrently and are reported in message order.
#[derive(Clone)]
pub struct Ingestor {
    sessions: SessionManager,
    router: SchemaRouter,
    writer: Arc<dyn RowWriter>,
    rebirth: Arc<dyn RebirthSink>,
    policy: NamespacePolicy,
    codec: JsonCodec,
    stats: Arc<IngestStats>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("sessions", &self.sessions)
            .field("router", &self.router)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(
        sessions: SessionManager,
        router: SchemaRouter,
        writer: Arc<dyn RowWriter>,
        rebirth: Arc<dyn RebirthSink>,
        policy: NamespacePolicy,
    ) -> Self {
        Self {
            sessions,
            router,
            writer,
            rebirth,
            policy,
            codec: JsonCodec::new(),
            stats: Arc::new(IngestStats::new()),
        }
    }

    /// Ingestor over a storage layer with fresh session and relation state.
    pub fn from_storage(
        storage: &StorageHandles,
        rebirth: Arc<dyn RebirthSink>,
        policy: NamespacePolicy,
    ) -> Self {
        Self::new(
            SessionManager::default(),
            SchemaRouter::new(storage.catalog()),
            storage.writer(),
            rebirth,
            policy,
        )
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn router(&self) -> &SchemaRouter {
        &self.router
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Decode one transport delivery and ingest it.
    ///
    /// # Errors
    /// Returns the `DecodeError` when the delivery cannot be decoded; the
    /// message is dropped in full and no session state changes.
    pub async fn ingest_raw(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<IngestOutcome, DecodeError> {
        let delivery = match self.codec.decode(topic, payload) {
            Ok(delivery) => delivery,
            Err(e) => {
                self.stats.record_decode_failure();
                match &e {
                    DecodeError::NotIngestible(_) => {
                        tracing::debug!(topic, error = %e, "Skipping non-ingestible delivery")
                    }
                    _ => tracing::warn!(topic, error = %e, "Dropping undecodable delivery"),
                }
                return Err(e);
            }
        };
        Ok(self.ingest(&delivery.identity, &delivery.message).await)
    }

    /// Ingest one decoded message.
    pub async fn ingest(&self, identity: &NodeIdentity, message: &Message) -> IngestOutcome {
        self.stats.record_message();

        let mut lane = self.sessions.lane(identity).await;
        let verdict = self.sessions.evaluate_in(&mut lane, message);

        let (metrics, rebirth_requested) = match verdict {
            Verdict::Accept => {
                self.stats.record_accepted();
                let metrics = match message.kind {
                    MessageKind::Birth => self.ensure_birth(message).await,
                    MessageKind::Data => self.write_data(identity, message).await,
                    MessageKind::Death => Vec::new(),
                };
                (metrics, false)
            }
            Verdict::RequestRebirth(reason) => {
                self.stats.record_rebirth_request();
                self.request_rebirth(identity, reason).await;
                (skip_all(message, SkipReason::NotAccepted), true)
            }
            Verdict::Drop(_) => {
                self.stats.record_dropped();
                (skip_all(message, SkipReason::NotAccepted), false)
            }
        };
        drop(lane);

        let outcome = IngestOutcome {
            identity: identity.clone(),
            kind: message.kind,
            verdict,
            metrics,
            rebirth_requested,
        };

        let failures = outcome.failures().count();
        self.stats.record_rows_written(outcome.rows_written());
        self.stats.record_relations_ensured(outcome.relations_ensured());
        self.stats.record_metric_failures(failures);

        tracing::debug!(
            node = %identity,
            kind = %message.kind,
            seq = message.seq,
            verdict = %verdict,
            rows = outcome.rows_written(),
            ensured = outcome.relations_ensured(),
            failures,
            "Message ingested"
        );
        outcome
    }

    /// BIRTH: pre-create relations for visible metrics, write nothing.
    async fn ensure_birth(&self, message: &Message) -> Vec<MetricOutcome> {
        let mut outcomes = Vec::with_capacity(message.metrics.len());
        for (index, metric) in message.metrics.iter().enumerate() {
            let status = match self.policy.classify(&metric.name).skip_reason() {
                Some(reason) => MetricStatus::Skipped(reason),
                None => match self
                    .router
                    .route_and_ensure(&metric.name, metric.data_type, &metric.value)
                    .await
                {
                    Ok(descriptor) => MetricStatus::Ensured(descriptor),
                    Err(e) => MetricStatus::Failed(e.into()),
                },
            };
            outcomes.push(MetricOutcome {
                index,
                name: metric.name.clone(),
                status,
            });
        }
        outcomes
    }

    /// DATA: route and write every metric independently.
    async fn write_data(&self, identity: &NodeIdentity, message: &Message) -> Vec<MetricOutcome> {
        let node_tag: Arc<str> = Arc::from(identity.node_tag());
        let device_tag: Option<Arc<str>> = identity.device_tag().map(Arc::from);

        let mut tasks = JoinSet::new();
        for (index, metric) in message.metrics.iter().enumerate() {
            let router = self.router.clone();
            let writer = Arc::clone(&self.writer);
            let ts = message.metric_time(metric);
            let metric = metric.clone();
            let node_tag = Arc::clone(&node_tag);
            let device_tag = device_tag.clone();

            tasks.spawn(async move {
                let status = write_metric(
                    &router,
                    writer.as_ref(),
                    &metric,
                    &node_tag,
                    device_tag.as_deref(),
                    ts,
                )
                .await;
                (index, status)
            });
        }

        let mut statuses: Vec<Option<MetricStatus>> =
            message.metrics.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, status)) => statuses[index] = Some(status),
                Err(e) => tracing::error!(node = %identity, error = %e, "Metric write task failed"),
            }
        }

        message
            .metrics
            .iter()
            .zip(statuses)
            .enumerate()
            .map(|(index, (metric, status))| MetricOutcome {
                index,
                name: metric.name.clone(),
                status: status.unwrap_or_else(|| {
                    MetricStatus::Failed(MetricFailure::Aborted(
                        "task ended without a result".to_string(),
                    ))
                }),
            })
            .collect()
    }

    async fn request_rebirth(&self, identity: &NodeIdentity, reason: RebirthReason) {
        let delivered = match self.rebirth_request(identity, reason) {
            Ok(request) => {
                tracing::warn!(node = %identity, reason = %reason, topic = %request.topic, "Requesting rebirth");
                self.rebirth.request_rebirth(request).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = delivered {
            self.stats.record_rebirth_delivery_failure();
            tracing::warn!(node = %identity, reason = %reason, error = %e, "Rebirth request not delivered");
        }
    }

    fn rebirth_request(
        &self,
        identity: &NodeIdentity,
        reason: RebirthReason,
    ) -> Result<RebirthRequest, RebirthError> {
        let encoded = self
            .codec
            .encode_rebirth(identity, Utc::now())
            .map_err(|e| RebirthError::Encode(e.to_string()))?;
        Ok(RebirthRequest {
            identity: identity.clone(),
            reason,
            topic: encoded.topic,
            payload: encoded.payload,
        })
    }
}

async fn write_metric(
    router: &SchemaRouter,
    writer: &dyn RowWriter,
    metric: &Metric,
    node_tag: &str,
    device_tag: Option<&str>,
    ts: DateTime<Utc>,
) -> MetricStatus {
    let descriptor = match router
        .route_and_ensure(&metric.name, metric.data_type, &metric.value)
        .await
    {
        Ok(descriptor) => descriptor,
        Err(e) => return MetricStatus::Failed(e.into()),
    };

    match writer
        .write(&descriptor, node_tag, device_tag, ts, &metric.value)
        .await
    {
        Ok(()) => MetricStatus::Written(descriptor),
        Err(e) => {
            tracing::warn!(
                metric = %metric.name,
                relation = %descriptor.table_name,
                timeout = e.is_timeout(),
                error = %e.source,
                "Metric write failed"
            );
            MetricStatus::Failed(e.into())
        }
    }
}

fn skip_all(message: &Message, reason: SkipReason) -> Vec<MetricOutcome> {
    message
        .metrics
        .iter()
        .enumerate()
        .map(|(index, metric)| MetricOutcome {
            index,
            name: metric.name.clone(),
            status: MetricStatus::Skipped(reason),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ChannelRebirthSink;
    use crate::protocol::{DataType, MetricValue};
    use crate::schema::{ColumnType, RelationDescriptor, SchemaError};
    use crate::storage::{Catalog, StorageError, WriteError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryCatalog {
        relations: Mutex<HashMap<String, ColumnType>>,
    }

    #[async_trait]
    impl Catalog for MemoryCatalog {
        async fn lookup(&self, relation: &str) -> Result<Option<ColumnType>, StorageError> {
            Ok(self.relations.lock().unwrap().get(relation).copied())
        }

        async fn create(&self, descriptor: &RelationDescriptor) -> Result<(), StorageError> {
            self.relations
                .lock()
                .unwrap()
                .insert(descriptor.table_name.clone(), descriptor.column_type);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        rows: Mutex<Vec<(String, String, Option<String>, MetricValue)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl RowWriter for RecordingWriter {
        async fn write(
            &self,
            relation: &RelationDescriptor,
            node_tag: &str,
            device_tag: Option<&str>,
            _ts: DateTime<Utc>,
            value: &MetricValue,
        ) -> Result<(), WriteError> {
            if self.fail_on.as_deref() == Some(relation.table_name.as_str()) {
                return Err(WriteError::new(
                    relation.table_name.clone(),
                    StorageError::Internal("disk full".to_string()),
                ));
            }
            self.rows.lock().unwrap().push((
                relation.table_name.clone(),
                node_tag.to_string(),
                device_tag.map(str::to_string),
                value.clone(),
            ));
            Ok(())
        }
    }

    struct Harness {
        ingestor: Ingestor,
        catalog: Arc<MemoryCatalog>,
        writer: Arc<RecordingWriter>,
        rebirths: tokio::sync::mpsc::Receiver<RebirthRequest>,
    }

    fn harness(fail_on: Option<&str>) -> Harness {
        let catalog = Arc::new(MemoryCatalog::default());
        let writer = Arc::new(RecordingWriter {
            fail_on: fail_on.map(str::to_string),
            ..Default::default()
        });
        let (sink, rebirths) = ChannelRebirthSink::new(8);
        let ingestor = Ingestor::new(
            SessionManager::default(),
            SchemaRouter::new(catalog.clone()),
            writer.clone(),
            Arc::new(sink),
            NamespacePolicy::default(),
        );
        Harness {
            ingestor,
            catalog,
            writer,
            rebirths,
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn float(name: &str, v: f64) -> Metric {
        Metric::typed(name, DataType::Float, v).unwrap()
    }

    #[tokio::test]
    async fn test_birth_ensures_visible_metrics_only() {
        let h = harness(None);
        let node = NodeIdentity::node("UCL-SEE-A", "TLab");
        let birth = Message::birth(
            0,
            ts(0),
            vec![
                Metric::typed("bdSeq", DataType::UInt64, 1_i64).unwrap(),
                Metric::typed("Node Control/Rebirth", DataType::Boolean, false).unwrap(),
                Metric::typed("Properties/Hardware", DataType::String, "ESP32-POE").unwrap(),
                float("Inputs/Temperature", 25.5),
                Metric::typed("Inputs/Status", DataType::UInt64, 0_i64).unwrap(),
                float("Outputs/Fan", 1.0),
            ],
        );

        let outcome = h.ingestor.ingest(&node, &birth).await;

        assert_eq!(outcome.verdict, Verdict::Accept);
        assert_eq!(outcome.rows_written(), 0);
        assert_eq!(outcome.relations_ensured(), 2);
        assert!(matches!(outcome.metrics[0].status, MetricStatus::Skipped(SkipReason::SequenceMetric)));
        assert!(matches!(outcome.metrics[1].status, MetricStatus::Skipped(SkipReason::Internal)));
        assert!(matches!(outcome.metrics[2].status, MetricStatus::Skipped(SkipReason::Internal)));
        assert!(matches!(outcome.metrics[5].status, MetricStatus::Skipped(SkipReason::NotVisible)));

        let relations = h.catalog.relations.lock().unwrap().clone();
        assert_eq!(relations.len(), 2);
        assert_eq!(relations["temperature"], ColumnType::Double);
        assert_eq!(relations["status"], ColumnType::Long);
        assert!(h.writer.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_data_partial_success_keeps_order() {
        let h = harness(Some("co2_levels"));
        let device = NodeIdentity::device("factory", "edge1", "tempSensor01");
        h.ingestor.ingest(&device, &Message::birth(0, ts(0), vec![])).await;

        let data = Message::data(
            1,
            ts(1),
            vec![
                float("Inputs/Temperature", 21.5),
                float("Inputs/CO2_levels", 500.0),
                float("Inputs/Fan_speed", 1200.0),
            ],
        );
        let outcome = h.ingestor.ingest(&device, &data).await;

        assert_eq!(outcome.verdict, Verdict::Accept);
        assert_eq!(outcome.metrics.len(), 3);
        assert!(matches!(outcome.metrics[0].status, MetricStatus::Written(_)));
        assert!(matches!(
            outcome.metrics[1].status,
            MetricStatus::Failed(MetricFailure::Write(_))
        ));
        assert!(matches!(outcome.metrics[2].status, MetricStatus::Written(_)));
        assert_eq!(
            outcome.metrics.iter().map(|m| m.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(outcome.metrics[1].name, "Inputs/CO2_levels");

        let failures: Vec<_> = outcome.failures().map(|(m, _)| m.index).collect();
        assert_eq!(failures, vec![1]);

        let rows = h.writer.rows.lock().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|(_, node, device, _)| node == "factory/edge1"
            && device.as_deref() == Some("tempSensor01")));

        let stats = h.ingestor.stats().snapshot();
        assert_eq!(stats.rows_written, 2);
        assert_eq!(stats.metric_failures, 1);
    }

    #[tokio::test]
    async fn test_gap_requests_rebirth_and_writes_nothing() {
        let mut h = harness(None);
        let node = NodeIdentity::node("factory", "edge1");
        h.ingestor.ingest(&node, &Message::birth(0, ts(0), vec![])).await;

        let outcome = h
            .ingestor
            .ingest(&node, &Message::data(2, ts(1), vec![float("Inputs/Temperature", 1.0)]))
            .await;

        assert!(outcome.rebirth_requested);
        assert_eq!(
            outcome.verdict,
            Verdict::RequestRebirth(RebirthReason::SequenceGap { expected: 1, got: 2 })
        );
        assert_eq!(outcome.rows_written(), 0);
        assert!(matches!(outcome.metrics[0].status, MetricStatus::Skipped(SkipReason::NotAccepted)));
        assert!(h.writer.rows.lock().unwrap().is_empty());

        let request = h.rebirths.recv().await.unwrap();
        assert_eq!(request.identity, node);
        assert_eq!(request.topic, "spBv1.0/factory/NCMD/edge1");
        let payload: serde_json::Value = serde_json::from_slice(&request.payload).unwrap();
        assert_eq!(payload["metrics"][0]["name"], "Node Control/Rebirth");
    }

    #[tokio::test]
    async fn test_data_without_birth_requests_rebirth() {
        let mut h = harness(None);
        let node = NodeIdentity::node("factory", "edge9");
        let outcome = h
            .ingestor
            .ingest(&node, &Message::data(7, ts(0), vec![float("Inputs/Temperature", 1.0)]))
            .await;

        assert_eq!(outcome.verdict, Verdict::RequestRebirth(RebirthReason::NoPriorBirth));
        assert_eq!(h.rebirths.recv().await.unwrap().reason, RebirthReason::NoPriorBirth);
        assert!(h.catalog.relations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_death_touches_no_storage() {
        let h = harness(None);
        let node = NodeIdentity::node("factory", "edge1");
        h.ingestor.ingest(&node, &Message::birth(0, ts(0), vec![])).await;

        let outcome = h.ingestor.ingest(&node, &Message::death(0, ts(1))).await;
        assert_eq!(outcome.verdict, Verdict::Accept);
        assert!(outcome.metrics.is_empty());
        assert!(!outcome.rebirth_requested);
        assert!(h.catalog.relations.lock().unwrap().is_empty());
        assert!(!h.ingestor.sessions().snapshot(&node).await.unwrap().born_alive);
    }

    #[tokio::test]
    async fn test_schema_conflict_fails_metric_only() {
        let h = harness(None);
        let node = NodeIdentity::node("factory", "edge1");
        h.ingestor.ingest(&node, &Message::birth(0, ts(0), vec![])).await;

        h.ingestor
            .ingest(&node, &Message::data(1, ts(1), vec![float("Inputs/Fan_speed", 0.5)]))
            .await;
        let outcome = h
            .ingestor
            .ingest(
                &node,
                &Message::data(
                    2,
                    ts(2),
                    vec![
                        Metric::inferred("Inputs/Fan_speed", "fast"),
                        float("Inputs/Temperature", 20.0),
                    ],
                ),
            )
            .await;

        assert!(matches!(
            outcome.metrics[0].status,
            MetricStatus::Failed(MetricFailure::Schema(SchemaError::Conflict { .. }))
        ));
        assert!(matches!(outcome.metrics[1].status, MetricStatus::Written(_)));
    }

    #[tokio::test]
    async fn test_malformed_identity_dropped() {
        let h = harness(None);
        let bad = NodeIdentity::node("factory", "");
        let outcome = h.ingestor.ingest(&bad, &Message::birth(0, ts(0), vec![])).await;
        assert!(matches!(outcome.verdict, Verdict::Drop(_)));
        assert!(!outcome.rebirth_requested);
        assert_eq!(h.ingestor.stats().snapshot().dropped, 1);
    }

    #[tokio::test]
    async fn test_ingest_raw_counts_decode_failures() {
        let h = harness(None);
        let err = h
            .ingestor
            .ingest_raw("spBv1.0/factory/NDATA/edge1", b"{broken")
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload(_)));

        let err = h
            .ingestor
            .ingest_raw("spBv1.0/factory/NCMD/edge1", b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::NotIngestible(_)));

        let stats = h.ingestor.stats().snapshot();
        assert_eq!(stats.decode_failures, 2);
        assert_eq!(stats.messages, 0);
        assert!(h.ingestor.sessions().sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_rebirth_delivery_failure_is_counted() {
        let catalog = Arc::new(MemoryCatalog::default());
        let (sink, rx) = ChannelRebirthSink::new(1);
        drop(rx);
        let ingestor = Ingestor::new(
            SessionManager::default(),
            SchemaRouter::new(catalog),
            Arc::new(RecordingWriter::default()),
            Arc::new(sink),
            NamespacePolicy::default(),
        );

        let outcome = ingestor
            .ingest(&NodeIdentity::node("g", "e"), &Message::data(1, ts(0), vec![]))
            .await;
        assert!(outcome.rebirth_requested);

        let stats = ingestor.stats().snapshot();
        assert_eq!(stats.rebirth_requests, 1);
        assert_eq!(stats.rebirth_delivery_failures, 1);
    }
}
