//! Media engine adapter.
//!
//! The engine owns the actual media resources (workers, routers, transports,
//! producers, consumers). The router only ever refers to them through the
//! opaque handles defined here, and releases each one through
//! [`MediaEngine`]'s `close_*` operations.
//!
//! Two implementations ship with the crate:
//! - [`LocalMediaEngine`]: in-process bookkeeping engine for development
//! - [`mock::MockMediaEngine`]: test double with close counting and failure injection

pub mod local;
pub mod mock;

pub use local::LocalMediaEngine;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use signaling_protocol::MediaKind;
use std::net::IpAddr;
use thiserror::Error;

/// Consumer type reported for single-encoding consumers.
pub const CONSUMER_TYPE_SIMPLE: &str = "simple";

/// Worker creation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

/// A media worker (one per process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub id: String,
}

/// One codec a router is configured with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    pub parameters: Value,
}

/// Router codec configuration: opus audio and VP8 video.
#[must_use]
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: Some(2),
            parameters: json!({}),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: None,
            parameters: json!({}),
        },
    ]
}

/// A router and the RTP capabilities clients negotiate against.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterHandle {
    pub id: String,
    pub rtp_capabilities: Value,
}

/// Where WebRTC transports listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportListenConfig {
    pub listen_ip: IpAddr,
    pub announced_ip: Option<IpAddr>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
}

impl TransportListenConfig {
    /// UDP and TCP enabled, UDP preferred.
    #[must_use]
    pub fn new(listen_ip: IpAddr, announced_ip: Option<IpAddr>) -> Self {
        Self {
            listen_ip,
            announced_ip,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
        }
    }
}

/// A WebRTC transport and the parameters the client needs to connect to it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportHandle {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Application metadata attached to a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProducerMetadata {
    pub is_mentor: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProducerHandle {
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub metadata: ProducerMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerHandle {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub consumer_type: String,
}

/// Engine rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine refused the operation.
    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Unknown router: {0}")]
    UnknownRouter(String),

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    #[error("Unknown producer: {0}")]
    UnknownProducer(String),
}

/// Operations the router needs from a media engine.
///
/// Creating operations return a handle whose id is unique for the lifetime
/// of the engine. `close_*` operations never fail; closing an id that is
/// unknown or already closed is a no-op.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_worker(&self, settings: &WorkerSettings) -> Result<WorkerHandle, EngineError>;

    async fn create_router(
        &self,
        worker_id: &str,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<RouterHandle, EngineError>;

    async fn create_webrtc_transport(
        &self,
        router_id: &str,
        listen: &TransportListenConfig,
    ) -> Result<TransportHandle, EngineError>;

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: &Value,
    ) -> Result<(), EngineError>;

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &Value,
        metadata: ProducerMetadata,
    ) -> Result<ProducerHandle, EngineError>;

    /// Whether a client with `rtp_capabilities` can consume `producer_id`.
    async fn can_consume(
        &self,
        router_id: &str,
        producer_id: &str,
        rtp_capabilities: &Value,
    ) -> Result<bool, EngineError>;

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: &Value,
    ) -> Result<ConsumerHandle, EngineError>;

    async fn close_router(&self, router_id: &str);

    async fn close_transport(&self, transport_id: &str);

    async fn close_producer(&self, producer_id: &str);

    async fn close_consumer(&self, consumer_id: &str);
}
