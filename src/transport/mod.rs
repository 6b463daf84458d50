//! Transport: wire protocol, publishers and the JSON-lines stdio adapter.

pub mod protocol;
mod publisher;
pub mod stdio;

pub use protocol::{
    parse_job, FailureKind, InboundMessage, JobOutcome, JobResponse, ProtocolError,
    DEFAULT_MAX_TOKENS, MAX_MESSAGE_BYTES,
};
pub use publisher::{ChannelPublisher, PublishError, ResponsePublisher, RoutingPublisher};
pub use stdio::{ingest_lines, write_responses, IngestStats};
