//! Observability module for the signaling service
//!
//! # Privacy by Default
//!
//! Actor loops use `#[instrument(skip_all)]` with explicit safe fields.
//! SDP and ICE payloads are never logged, and room or user identifiers
//! never appear as metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sig_connections_active` | Gauge | none | Open client connections |
//! | `sig_rooms_active` | Gauge | none | Open rooms |
//! | `sig_participants_active` | Gauge | none | Joined participants |
//! | `sig_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `sig_messages_total` | Counter | `message_type` | Handled inbound messages |
//! | `sig_message_latency_seconds` | Histogram | `message_type` | Dispatch latency |
//! | `sig_errors_total` | Counter | `reason` | Errors reported to clients |
//! | `sig_messages_dropped_total` | Counter | none | Outbound queue overflows |
//! | `sig_connections_closed_total` | Counter | `reason` | Connection close causes |
//! | `sig_actor_panics_total` | Counter | `actor_type` | Actor panics (bugs) |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
