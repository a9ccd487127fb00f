//! Mock media engine for testing.
//!
//! Records every call and every close per handle id, can be told to fail
//! individual operations, to report capabilities as incompatible, or to hold
//! any resource-creating call pending until released.

use super::{
    ConsumerHandle, EngineError, MediaEngine, ProducerHandle, ProducerMetadata, RouterHandle,
    RtpCodecCapability, TransportHandle, TransportListenConfig, WorkerHandle, WorkerSettings,
    CONSUMER_TYPE_SIMPLE,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use signaling_protocol::MediaKind;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Engine operations that can be failed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    CreateWorker,
    CreateRouter,
    CreateTransport,
    ConnectTransport,
    Produce,
    CanConsume,
    Consume,
}

impl MockOperation {
    const fn name(self) -> &'static str {
        match self {
            MockOperation::CreateWorker => "create_worker",
            MockOperation::CreateRouter => "create_router",
            MockOperation::CreateTransport => "create_webrtc_transport",
            MockOperation::ConnectTransport => "connect_transport",
            MockOperation::Produce => "produce",
            MockOperation::CanConsume => "can_consume",
            MockOperation::Consume => "consume",
        }
    }
}

/// Mock media engine for unit and integration tests.
pub struct MockMediaEngine {
    next_id: AtomicU64,
    compatible: AtomicBool,
    failing: Mutex<HashSet<MockOperation>>,
    calls: Mutex<HashMap<MockOperation, usize>>,
    created: Mutex<Vec<String>>,
    closes: Mutex<HashMap<String, usize>>,
    producer_kinds: Mutex<HashMap<String, MediaKind>>,
    gates: Mutex<HashMap<MockOperation, Arc<Notify>>>,
    entered: Mutex<HashMap<MockOperation, Arc<Notify>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockMediaEngine {
    /// Create a mock that accepts everything and reports compatibility.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            compatible: AtomicBool::new(true),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            closes: Mutex::new(HashMap::new()),
            producer_kinds: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            entered: Mutex::new(HashMap::new()),
        }
    }

    /// Make `operation` reject from now on.
    pub fn fail(&self, operation: MockOperation) {
        lock(&self.failing).insert(operation);
    }

    /// Stop failing `operation`.
    pub fn succeed(&self, operation: MockOperation) {
        lock(&self.failing).remove(&operation);
    }

    /// Set what `can_consume` reports for known producers.
    pub fn set_compatible(&self, compatible: bool) {
        self.compatible.store(compatible, Ordering::SeqCst);
    }

    /// Hold every subsequent call to `operation` until the returned gate is
    /// notified (`notify_one` releases one call). Only calls that create a
    /// router, transport, producer or consumer honour gates.
    pub fn hold(&self, operation: MockOperation) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.gates).insert(operation, Arc::clone(&gate));
        gate
    }

    pub fn hold_produce(&self) -> Arc<Notify> {
        self.hold(MockOperation::Produce)
    }

    /// Resolves once a held call to `operation` has started.
    pub async fn started(&self, operation: MockOperation) {
        self.entered_signal(operation).notified().await;
    }

    pub async fn produce_started(&self) {
        self.started(MockOperation::Produce).await;
    }

    /// Number of calls made to `operation` (including failed ones).
    pub fn call_count(&self, operation: MockOperation) -> usize {
        lock(&self.calls).get(&operation).copied().unwrap_or(0)
    }

    /// Number of times `id` was closed.
    pub fn close_count(&self, id: &str) -> usize {
        lock(&self.closes).get(id).copied().unwrap_or(0)
    }

    /// Total close calls across all ids.
    pub fn total_closes(&self) -> usize {
        lock(&self.closes).values().sum()
    }

    /// Every id created so far, in creation order.
    pub fn created_ids(&self) -> Vec<String> {
        lock(&self.created).clone()
    }

    /// Created ids that have not been closed yet.
    pub fn live_ids(&self) -> Vec<String> {
        let closes = lock(&self.closes);
        lock(&self.created)
            .iter()
            .filter(|id| !closes.contains_key(*id))
            .cloned()
            .collect()
    }

    fn entered_signal(&self, operation: MockOperation) -> Arc<Notify> {
        Arc::clone(lock(&self.entered).entry(operation).or_default())
    }

    async fn pass_gate(&self, operation: MockOperation) {
        let Some(gate) = lock(&self.gates).get(&operation).cloned() else {
            return;
        };
        self.entered_signal(operation).notify_one();
        gate.notified().await;
    }

    fn enter(&self, operation: MockOperation) -> Result<(), EngineError> {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;
        if lock(&self.failing).contains(&operation) {
            return Err(EngineError::Rejected {
                operation: operation.name(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn create_id(&self, prefix: &str) -> String {
        let id = format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.created).push(id.clone());
        id
    }

    fn record_close(&self, id: &str) {
        *lock(&self.closes).entry(id.to_string()).or_insert(0) += 1;
    }
}

impl Default for MockMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_worker(&self, _settings: &WorkerSettings) -> Result<WorkerHandle, EngineError> {
        self.enter(MockOperation::CreateWorker)?;
        Ok(WorkerHandle {
            id: self.create_id("worker"),
        })
    }

    async fn create_router(
        &self,
        _worker_id: &str,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<RouterHandle, EngineError> {
        self.pass_gate(MockOperation::CreateRouter).await;
        self.enter(MockOperation::CreateRouter)?;
        Ok(RouterHandle {
            id: self.create_id("router"),
            rtp_capabilities: json!({ "codecs": media_codecs, "headerExtensions": [] }),
        })
    }

    async fn create_webrtc_transport(
        &self,
        _router_id: &str,
        listen: &TransportListenConfig,
    ) -> Result<TransportHandle, EngineError> {
        self.pass_gate(MockOperation::CreateTransport).await;
        self.enter(MockOperation::CreateTransport)?;
        let ip = listen.announced_ip.unwrap_or(listen.listen_ip).to_string();
        Ok(TransportHandle {
            id: self.create_id("transport"),
            ice_parameters: json!({ "usernameFragment": "mockufrag", "password": "mockpassword", "iceLite": true }),
            ice_candidates: json!([{ "foundation": "udpcandidate", "ip": ip, "port": 40000, "protocol": "udp", "type": "host", "priority": 1 }]),
            dtls_parameters: json!({ "role": "auto", "fingerprints": [{ "algorithm": "sha-256", "value": "00:11" }] }),
        })
    }

    async fn connect_transport(
        &self,
        _transport_id: &str,
        _dtls_parameters: &Value,
    ) -> Result<(), EngineError> {
        self.enter(MockOperation::ConnectTransport)
    }

    async fn produce(
        &self,
        _transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &Value,
        metadata: ProducerMetadata,
    ) -> Result<ProducerHandle, EngineError> {
        self.pass_gate(MockOperation::Produce).await;
        self.enter(MockOperation::Produce)?;
        let id = self.create_id("producer");
        lock(&self.producer_kinds).insert(id.clone(), kind);
        Ok(ProducerHandle {
            id,
            kind,
            rtp_parameters: rtp_parameters.clone(),
            metadata,
        })
    }

    async fn can_consume(
        &self,
        _router_id: &str,
        producer_id: &str,
        _rtp_capabilities: &Value,
    ) -> Result<bool, EngineError> {
        self.enter(MockOperation::CanConsume)?;
        let known = lock(&self.producer_kinds).contains_key(producer_id);
        Ok(known && self.compatible.load(Ordering::SeqCst))
    }

    async fn consume(
        &self,
        _transport_id: &str,
        producer_id: &str,
        _rtp_capabilities: &Value,
    ) -> Result<ConsumerHandle, EngineError> {
        self.pass_gate(MockOperation::Consume).await;
        self.enter(MockOperation::Consume)?;
        let kind = lock(&self.producer_kinds)
            .get(producer_id)
            .copied()
            .ok_or_else(|| EngineError::UnknownProducer(producer_id.to_string()))?;
        Ok(ConsumerHandle {
            id: self.create_id("consumer"),
            producer_id: producer_id.to_string(),
            kind,
            rtp_parameters: json!({ "codecs": [], "encodings": [{ "ssrc": 1234 }] }),
            consumer_type: CONSUMER_TYPE_SIMPLE.to_string(),
        })
    }

    async fn close_router(&self, router_id: &str) {
        self.record_close(router_id);
    }

    async fn close_transport(&self, transport_id: &str) {
        self.record_close(transport_id);
    }

    async fn close_producer(&self, producer_id: &str) {
        self.record_close(producer_id);
    }

    async fn close_consumer(&self, consumer_id: &str) {
        self.record_close(consumer_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failure_injection_counts_calls() {
        let engine = MockMediaEngine::new();
        engine.fail(MockOperation::CreateRouter);

        let result = engine.create_router("worker-1", &[]).await;
        assert!(matches!(
            result,
            Err(EngineError::Rejected { operation: "create_router", .. })
        ));
        assert_eq!(engine.call_count(MockOperation::CreateRouter), 1);

        engine.succeed(MockOperation::CreateRouter);
        assert!(engine.create_router("worker-1", &[]).await.is_ok());
        assert_eq!(engine.call_count(MockOperation::CreateRouter), 2);
    }

    #[tokio::test]
    async fn test_close_counting_and_live_ids() {
        let engine = MockMediaEngine::new();
        let router = engine.create_router("worker-1", &[]).await.unwrap();
        let other = engine.create_router("worker-1", &[]).await.unwrap();

        engine.close_router(&router.id).await;
        engine.close_router(&router.id).await;

        assert_eq!(engine.close_count(&router.id), 2);
        assert_eq!(engine.close_count(&other.id), 0);
        assert_eq!(engine.total_closes(), 2);
        assert_eq!(engine.live_ids(), vec![other.id]);
    }

    #[tokio::test]
    async fn test_compatibility_switch() {
        let engine = MockMediaEngine::new();
        let producer = engine
            .produce("t-1", MediaKind::Video, &json!({}), ProducerMetadata { is_mentor: true })
            .await
            .unwrap();

        assert!(engine.can_consume("r-1", &producer.id, &json!({})).await.unwrap());
        engine.set_compatible(false);
        assert!(!engine.can_consume("r-1", &producer.id, &json!({})).await.unwrap());
        assert!(!engine.can_consume("r-1", "unknown", &json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_produce_gate_holds_until_released() {
        let engine = Arc::new(MockMediaEngine::new());
        let gate = engine.hold_produce();

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .produce("t-1", MediaKind::Audio, &json!({}), ProducerMetadata::default())
                    .await
            })
        };

        engine.produce_started().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        gate.notify_one();
        let producer = task.await.unwrap().unwrap();
        assert_eq!(producer.kind, MediaKind::Audio);
    }
}
