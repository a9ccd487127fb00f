//! In-process media engine.
//!
//! Keeps the full worker/router/transport/producer/consumer bookkeeping,
//! allocates candidate ports from the worker range, issues ICE credentials
//! and a per-worker DTLS fingerprint, and enforces codec compatibility. It
//! does not forward media; it exists so the signaling path can run end to
//! end without an external media server.

use super::{
    ConsumerHandle, EngineError, MediaEngine, ProducerHandle, ProducerMetadata, RouterHandle,
    RtpCodecCapability, TransportHandle, TransportListenConfig, WorkerHandle, WorkerSettings,
    CONSUMER_TYPE_SIMPLE,
};
use async_trait::async_trait;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use serde_json::{json, Value};
use signaling_protocol::MediaKind;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// First dynamic RTP payload type handed out to router codecs.
const FIRST_PAYLOAD_TYPE: u8 = 100;

/// ICE candidate priorities (host candidates; UDP above TCP when preferred).
const PRIORITY_PREFERRED: u32 = 1_076_302_079;
const PRIORITY_OTHER: u32 = 1_076_302_078;

/// In-process [`MediaEngine`].
pub struct LocalMediaEngine {
    rng: SystemRandom,
    state: Mutex<EngineState>,
}

#[derive(Default)]
struct EngineState {
    workers: HashMap<String, WorkerState>,
    routers: HashMap<String, RouterState>,
    transports: HashMap<String, TransportState>,
    producers: HashMap<String, ProducerState>,
    consumers: HashMap<String, ConsumerState>,
}

struct WorkerState {
    settings: WorkerSettings,
    next_port: u16,
    ports_in_use: HashSet<u16>,
    fingerprint: String,
}

struct RouterState {
    worker_id: String,
    codecs: Vec<RtpCodecCapability>,
}

struct TransportState {
    router_id: String,
    worker_id: String,
    port: u16,
    connected: bool,
}

struct ProducerState {
    router_id: String,
    transport_id: String,
    kind: MediaKind,
    codec: CodecRef,
    cname: Option<String>,
}

struct ConsumerState {
    transport_id: String,
    producer_id: String,
}

/// Mime type and clock rate pulled out of an RTP parameters/capabilities codec.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CodecRef {
    mime_type: String,
    clock_rate: Option<u64>,
}

impl CodecRef {
    fn from_value(codec: &Value) -> Option<Self> {
        let mime_type = codec.get("mimeType")?.as_str()?.to_string();
        let clock_rate = codec.get("clockRate").and_then(Value::as_u64);
        Some(Self {
            mime_type,
            clock_rate,
        })
    }

    fn matches(&self, other: &CodecRef) -> bool {
        self.mime_type.eq_ignore_ascii_case(&other.mime_type)
            && match (self.clock_rate, other.clock_rate) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }

    fn matches_capability(&self, capability: &RtpCodecCapability) -> bool {
        self.matches(&CodecRef {
            mime_type: capability.mime_type.clone(),
            clock_rate: Some(u64::from(capability.clock_rate)),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RouterCodec<'a> {
    kind: MediaKind,
    mime_type: &'a str,
    clock_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u8>,
    preferred_payload_type: u8,
    parameters: &'a Value,
    rtcp_feedback: Value,
}

impl WorkerState {
    fn allocate_port(&mut self) -> Option<u16> {
        let WorkerSettings {
            rtc_min_port: min,
            rtc_max_port: max,
        } = self.settings;
        let span = u32::from(max) - u32::from(min) + 1;
        for _ in 0..span {
            let candidate = self.next_port;
            self.next_port = if candidate >= max { min } else { candidate + 1 };
            if self.ports_in_use.insert(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

impl EngineState {
    fn remove_consumer(&mut self, consumer_id: &str) -> bool {
        self.consumers.remove(consumer_id).is_some()
    }

    fn remove_producer(&mut self, producer_id: &str) -> bool {
        if self.producers.remove(producer_id).is_none() {
            return false;
        }
        self.consumers
            .retain(|_, consumer| consumer.producer_id != producer_id);
        true
    }

    fn remove_transport(&mut self, transport_id: &str) -> bool {
        let Some(transport) = self.transports.remove(transport_id) else {
            return false;
        };
        if let Some(worker) = self.workers.get_mut(&transport.worker_id) {
            worker.ports_in_use.remove(&transport.port);
        }
        let producers: Vec<String> = self
            .producers
            .iter()
            .filter(|(_, p)| p.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for producer_id in producers {
            self.remove_producer(&producer_id);
        }
        self.consumers
            .retain(|_, consumer| consumer.transport_id != transport_id);
        true
    }

    fn remove_router(&mut self, router_id: &str) -> bool {
        if self.routers.remove(router_id).is_none() {
            return false;
        }
        let transports: Vec<String> = self
            .transports
            .iter()
            .filter(|(_, t)| t.router_id == router_id)
            .map(|(id, _)| id.clone())
            .collect();
        for transport_id in transports {
            self.remove_transport(&transport_id);
        }
        true
    }
}

impl LocalMediaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
            state: Mutex::new(EngineState::default()),
        }
    }

    fn random_hex<const N: usize>(&self) -> Result<String, EngineError> {
        Ok(hex::encode(self.random_bytes::<N>()?))
    }

    fn random_bytes<const N: usize>(&self) -> Result<[u8; N], EngineError> {
        let mut bytes = [0u8; N];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| EngineError::Rejected {
                operation: "random",
                reason: "entropy source unavailable".to_string(),
            })?;
        Ok(bytes)
    }

    /// SHA-256 fingerprint in the colon-separated uppercase form used by SDP.
    fn generate_fingerprint(&self) -> Result<String, EngineError> {
        let seed = self.random_bytes::<32>()?;
        let hash = digest::digest(&digest::SHA256, &seed);
        Ok(hash
            .as_ref()
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":"))
    }

    fn random_ssrc(&self) -> Result<u32, EngineError> {
        Ok(u32::from_be_bytes(self.random_bytes::<4>()?))
    }

    /// Number of live handles of every kind, for tests and diagnostics.
    pub async fn live_counts(&self) -> LocalEngineCounts {
        let state = self.state.lock().await;
        LocalEngineCounts {
            routers: state.routers.len(),
            transports: state.transports.len(),
            producers: state.producers.len(),
            consumers: state.consumers.len(),
        }
    }
}

impl Default for LocalMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Live handle counts of a [`LocalMediaEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalEngineCounts {
    pub routers: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

fn rtcp_feedback(kind: MediaKind) -> Value {
    match kind {
        MediaKind::Audio => json!([{ "type": "transport-cc", "parameter": "" }]),
        MediaKind::Video => json!([
            { "type": "nack", "parameter": "" },
            { "type": "nack", "parameter": "pli" },
            { "type": "ccm", "parameter": "fir" },
            { "type": "goog-remb", "parameter": "" },
            { "type": "transport-cc", "parameter": "" }
        ]),
    }
}

fn router_capabilities(codecs: &[RtpCodecCapability]) -> Value {
    let codecs: Vec<RouterCodec<'_>> = codecs
        .iter()
        .zip(FIRST_PAYLOAD_TYPE..)
        .map(|(codec, payload_type)| RouterCodec {
            kind: codec.kind,
            mime_type: &codec.mime_type,
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            preferred_payload_type: payload_type,
            parameters: &codec.parameters,
            rtcp_feedback: rtcp_feedback(codec.kind),
        })
        .collect();
    json!({ "codecs": codecs, "headerExtensions": [] })
}

fn first_codec(rtp_parameters: &Value) -> Option<CodecRef> {
    rtp_parameters
        .get("codecs")?
        .as_array()?
        .first()
        .and_then(CodecRef::from_value)
}

/// Capability codec in `rtp_capabilities` matching `codec`, if any.
fn matching_capability<'a>(rtp_capabilities: &'a Value, codec: &CodecRef) -> Option<&'a Value> {
    rtp_capabilities
        .get("codecs")?
        .as_array()?
        .iter()
        .find(|candidate| CodecRef::from_value(candidate).is_some_and(|c| c.matches(codec)))
}

fn mime_kind(mime_type: &str) -> Option<MediaKind> {
    let (kind, _) = mime_type.split_once('/')?;
    if kind.eq_ignore_ascii_case("audio") {
        Some(MediaKind::Audio)
    } else if kind.eq_ignore_ascii_case("video") {
        Some(MediaKind::Video)
    } else {
        None
    }
}

#[async_trait]
impl MediaEngine for LocalMediaEngine {
    async fn create_worker(&self, settings: &WorkerSettings) -> Result<WorkerHandle, EngineError> {
        if settings.rtc_min_port > settings.rtc_max_port {
            return Err(EngineError::Rejected {
                operation: "create_worker",
                reason: "rtc_min_port exceeds rtc_max_port".to_string(),
            });
        }
        let fingerprint = self.generate_fingerprint()?;
        let id = Uuid::new_v4().to_string();
        self.state.lock().await.workers.insert(
            id.clone(),
            WorkerState {
                settings: settings.clone(),
                next_port: settings.rtc_min_port,
                ports_in_use: HashSet::new(),
                fingerprint,
            },
        );
        debug!(
            target: "sr.engine",
            worker_id = %id,
            rtc_min_port = settings.rtc_min_port,
            rtc_max_port = settings.rtc_max_port,
            "Worker created"
        );
        Ok(WorkerHandle { id })
    }

    async fn create_router(
        &self,
        worker_id: &str,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<RouterHandle, EngineError> {
        let mut state = self.state.lock().await;
        if !state.workers.contains_key(worker_id) {
            return Err(EngineError::UnknownWorker(worker_id.to_string()));
        }
        if media_codecs.is_empty() {
            return Err(EngineError::Rejected {
                operation: "create_router",
                reason: "no media codecs".to_string(),
            });
        }
        let id = Uuid::new_v4().to_string();
        let rtp_capabilities = router_capabilities(media_codecs);
        state.routers.insert(
            id.clone(),
            RouterState {
                worker_id: worker_id.to_string(),
                codecs: media_codecs.to_vec(),
            },
        );
        debug!(target: "sr.engine", router_id = %id, "Router created");
        Ok(RouterHandle {
            id,
            rtp_capabilities,
        })
    }

    async fn create_webrtc_transport(
        &self,
        router_id: &str,
        listen: &TransportListenConfig,
    ) -> Result<TransportHandle, EngineError> {
        if !listen.enable_udp && !listen.enable_tcp {
            return Err(EngineError::Rejected {
                operation: "create_webrtc_transport",
                reason: "neither UDP nor TCP enabled".to_string(),
            });
        }
        let username_fragment = self.random_hex::<8>()?;
        let password = self.random_hex::<16>()?;

        let mut state = self.state.lock().await;
        let worker_id = state
            .routers
            .get(router_id)
            .map(|router| router.worker_id.clone())
            .ok_or_else(|| EngineError::UnknownRouter(router_id.to_string()))?;
        let worker = state
            .workers
            .get_mut(&worker_id)
            .ok_or_else(|| EngineError::UnknownWorker(worker_id.clone()))?;
        let port = worker.allocate_port().ok_or_else(|| EngineError::Rejected {
            operation: "create_webrtc_transport",
            reason: "no free port in worker range".to_string(),
        })?;
        let fingerprint = worker.fingerprint.clone();

        let ip = listen.announced_ip.unwrap_or(listen.listen_ip).to_string();
        let (udp_priority, tcp_priority) = if listen.prefer_udp {
            (PRIORITY_PREFERRED, PRIORITY_OTHER)
        } else {
            (PRIORITY_OTHER, PRIORITY_PREFERRED)
        };
        let mut candidates = Vec::new();
        if listen.enable_udp {
            candidates.push(json!({
                "foundation": "udpcandidate",
                "priority": udp_priority,
                "ip": ip,
                "address": ip,
                "protocol": "udp",
                "port": port,
                "type": "host"
            }));
        }
        if listen.enable_tcp {
            candidates.push(json!({
                "foundation": "tcpcandidate",
                "priority": tcp_priority,
                "ip": ip,
                "address": ip,
                "protocol": "tcp",
                "port": port,
                "type": "host",
                "tcpType": "passive"
            }));
        }

        let id = Uuid::new_v4().to_string();
        state.transports.insert(
            id.clone(),
            TransportState {
                router_id: router_id.to_string(),
                worker_id,
                port,
                connected: false,
            },
        );
        debug!(target: "sr.engine", transport_id = %id, router_id = %router_id, port, "Transport created");

        Ok(TransportHandle {
            id,
            ice_parameters: json!({
                "usernameFragment": username_fragment,
                "password": password,
                "iceLite": true
            }),
            ice_candidates: Value::Array(candidates),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{ "algorithm": "sha-256", "value": fingerprint }]
            }),
        })
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: &Value,
    ) -> Result<(), EngineError> {
        let has_fingerprint = dtls_parameters
            .get("fingerprints")
            .and_then(Value::as_array)
            .is_some_and(|fingerprints| !fingerprints.is_empty());
        if !has_fingerprint {
            return Err(EngineError::Rejected {
                operation: "connect_transport",
                reason: "dtlsParameters carry no fingerprints".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| EngineError::UnknownTransport(transport_id.to_string()))?;
        if transport.connected {
            return Err(EngineError::Rejected {
                operation: "connect_transport",
                reason: "transport already connected".to_string(),
            });
        }
        transport.connected = true;
        debug!(target: "sr.engine", transport_id = %transport_id, "Transport connected");
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &Value,
        metadata: ProducerMetadata,
    ) -> Result<ProducerHandle, EngineError> {
        let codec = first_codec(rtp_parameters).ok_or_else(|| EngineError::Rejected {
            operation: "produce",
            reason: "rtpParameters carry no codecs".to_string(),
        })?;
        if mime_kind(&codec.mime_type) != Some(kind) {
            return Err(EngineError::Rejected {
                operation: "produce",
                reason: format!("codec {} does not match kind {}", codec.mime_type, kind.as_str()),
            });
        }

        let mut state = self.state.lock().await;
        let router_id = state
            .transports
            .get(transport_id)
            .map(|transport| transport.router_id.clone())
            .ok_or_else(|| EngineError::UnknownTransport(transport_id.to_string()))?;
        let supported = state
            .routers
            .get(&router_id)
            .is_some_and(|router| router.codecs.iter().any(|c| codec.matches_capability(c)));
        if !supported {
            return Err(EngineError::Rejected {
                operation: "produce",
                reason: format!("codec {} not supported by router", codec.mime_type),
            });
        }

        let cname = rtp_parameters
            .get("rtcp")
            .and_then(|rtcp| rtcp.get("cname"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let id = Uuid::new_v4().to_string();
        state.producers.insert(
            id.clone(),
            ProducerState {
                router_id,
                transport_id: transport_id.to_string(),
                kind,
                codec,
                cname,
            },
        );
        debug!(
            target: "sr.engine",
            producer_id = %id,
            transport_id = %transport_id,
            kind = kind.as_str(),
            is_mentor = metadata.is_mentor,
            "Producer created"
        );

        Ok(ProducerHandle {
            id,
            kind,
            rtp_parameters: rtp_parameters.clone(),
            metadata,
        })
    }

    async fn can_consume(
        &self,
        router_id: &str,
        producer_id: &str,
        rtp_capabilities: &Value,
    ) -> Result<bool, EngineError> {
        let state = self.state.lock().await;
        if !state.routers.contains_key(router_id) {
            return Err(EngineError::UnknownRouter(router_id.to_string()));
        }
        let Some(producer) = state.producers.get(producer_id) else {
            return Ok(false);
        };
        Ok(producer.router_id == router_id
            && matching_capability(rtp_capabilities, &producer.codec).is_some())
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: &Value,
    ) -> Result<ConsumerHandle, EngineError> {
        let ssrc = self.random_ssrc()?;
        let fallback_cname = self.random_hex::<8>()?;

        let mut state = self.state.lock().await;
        let router_id = state
            .transports
            .get(transport_id)
            .map(|transport| transport.router_id.clone())
            .ok_or_else(|| EngineError::UnknownTransport(transport_id.to_string()))?;
        let producer = state
            .producers
            .get(producer_id)
            .ok_or_else(|| EngineError::UnknownProducer(producer_id.to_string()))?;
        if producer.router_id != router_id {
            return Err(EngineError::Rejected {
                operation: "consume",
                reason: "producer belongs to another router".to_string(),
            });
        }
        let capability = matching_capability(rtp_capabilities, &producer.codec).ok_or_else(|| {
            EngineError::Rejected {
                operation: "consume",
                reason: format!("rtpCapabilities lack codec {}", producer.codec.mime_type),
            }
        })?;

        let payload_type = capability
            .get("preferredPayloadType")
            .and_then(Value::as_u64)
            .unwrap_or(u64::from(FIRST_PAYLOAD_TYPE));
        let mut codec = capability.clone();
        if let Some(fields) = codec.as_object_mut() {
            fields.remove("preferredPayloadType");
            fields.remove("kind");
            fields.insert("payloadType".to_string(), json!(payload_type));
        }
        let kind = producer.kind;
        let cname = producer.cname.clone().unwrap_or(fallback_cname);
        let mid = state
            .consumers
            .values()
            .filter(|consumer| consumer.transport_id == transport_id)
            .count();
        let rtp_parameters = json!({
            "mid": mid.to_string(),
            "codecs": [codec],
            "headerExtensions": [],
            "encodings": [{ "ssrc": ssrc }],
            "rtcp": { "cname": cname, "reducedSize": true }
        });

        let id = Uuid::new_v4().to_string();
        state.consumers.insert(
            id.clone(),
            ConsumerState {
                transport_id: transport_id.to_string(),
                producer_id: producer_id.to_string(),
            },
        );
        debug!(
            target: "sr.engine",
            consumer_id = %id,
            producer_id = %producer_id,
            transport_id = %transport_id,
            "Consumer created"
        );

        Ok(ConsumerHandle {
            id,
            producer_id: producer_id.to_string(),
            kind,
            rtp_parameters,
            consumer_type: CONSUMER_TYPE_SIMPLE.to_string(),
        })
    }

    async fn close_router(&self, router_id: &str) {
        if self.state.lock().await.remove_router(router_id) {
            debug!(target: "sr.engine", router_id = %router_id, "Router closed");
        }
    }

    async fn close_transport(&self, transport_id: &str) {
        if self.state.lock().await.remove_transport(transport_id) {
            debug!(target: "sr.engine", transport_id = %transport_id, "Transport closed");
        }
    }

    async fn close_producer(&self, producer_id: &str) {
        if self.state.lock().await.remove_producer(producer_id) {
            debug!(target: "sr.engine", producer_id = %producer_id, "Producer closed");
        }
    }

    async fn close_consumer(&self, consumer_id: &str) {
        if self.state.lock().await.remove_consumer(consumer_id) {
            debug!(target: "sr.engine", consumer_id = %consumer_id, "Consumer closed");
        }
    }
}
