//! Observability for the Session Router.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit safe
//! fields (room id, peer id, action name). SDP and RTP payloads are never
//! logged or used as labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sr_rooms_active` | Gauge | none | Rooms currently in the registry |
//! | `sr_peers_active` | Gauge | none | Peers across all rooms |
//! | `sr_connections_active` | Gauge | none | Open signaling connections |
//! | `sr_message_latency_seconds` | Histogram | `action` | Signaling action handling time |
//! | `sr_errors_total` | Counter | `action`, `class` | Error replies by class |
//! | `sr_engine_operations_total` | Counter | `operation`, `status` | Media engine calls |
//! | `sr_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator per actor type |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_engine_operation, record_error, record_message_latency,
    set_actor_mailbox_depth, set_connections_active, set_peers_active, set_rooms_active,
};
