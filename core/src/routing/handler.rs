use std::future::Future;

use arcstr::ArcStr;
use async_trait::async_trait;

use crate::payload::Payload;

/// Error returned by a message handler. Logged by the dispatcher.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a single handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Callback invoked for every message whose topic matches a subscription.
///
/// Handlers run on the dispatch pool, never on the session's network task.
/// A failing or panicking handler only affects its own invocation.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
	/// Handles one decoded message.
	async fn handle(&self, topic: ArcStr, payload: Payload) -> HandlerResult;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

impl<F> std::fmt::Debug for FnHandler<F> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("FnHandler")
	}
}

/// Wraps an async closure as a [`MessageHandler`].
///
/// ```rust
/// use mqtt_connector_core::routing::{HandlerError, handler_fn};
///
/// let handler = handler_fn(|topic, payload| async move {
///     println!("{topic}: {payload:?}");
///     Ok::<(), HandlerError>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
	F: Fn(ArcStr, Payload) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = HandlerResult> + Send + 'static,
{
	FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
	F: Fn(ArcStr, Payload) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = HandlerResult> + Send + 'static,
{
	async fn handle(&self, topic: ArcStr, payload: Payload) -> HandlerResult {
		(self.0)(topic, payload).await
	}
}
