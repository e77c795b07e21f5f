//! Request Pipeline
//!
//! Per-call context, streaming wrappers, call metrics and the interceptor
//! chain that runs every call.

mod chain;
mod context;
mod metrics;
mod stream;

pub use chain::{AuthStage, Pipeline};
pub use context::{parse_grpc_timeout, CallContext, CallKind, ClaimsAlreadyAttached, GRPC_TIMEOUT};
pub use metrics::{InFlightGuard, MethodSnapshot, MetricsCollector, MetricsSnapshot};
pub use stream::{
    BidiStream, CallStream, ClientStream, Inbound, InboundStream, Outbound, OutboundSender,
    ServerStream,
};
