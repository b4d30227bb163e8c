//! Message routing and subscription management module
//!
//! This module holds the subscription registry, matches inbound messages
//! against it and runs handlers on a bounded worker pool.

/// Routing and subscription error types
pub mod error;
pub mod dispatcher;
/// Message handler trait and closure adapter
pub mod handler;
pub mod pool;
pub mod registry;

// Re-export commonly used types for convenience
pub use dispatcher::{DispatchReport, Dispatcher, InboundMessage};
pub use error::SubscriptionError;
pub use handler::{FnHandler, HandlerError, HandlerResult, MessageHandler, handler_fn};
pub use pool::{BackpressurePolicy, DispatchPool, Submission};
pub use registry::{Subscription, SubscriptionRegistry};
