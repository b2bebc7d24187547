//! Handlers as tower services.
//!
//! Every callback, command and flow action is a boxed
//! `tower::Service`. Plain async closures are lifted with [`handler`] (for
//! event callbacks and commands) or [`action`](crate::flow::action) (for flow
//! states); anything that is already a service can be boxed directly, so
//! tower layers such as timeouts or concurrency limits stack on top without
//! the framework knowing about them.
//!
//! # Example
//!
//! ```rust,ignore
//! let ping = handler(|_ctx: Arc<Context>| async move { Ok("pong") });
//!
//! let greet = handler(|ctx: Arc<Context>| async move {
//!     let who = ctx.sender().map(|id| id.nick().to_owned());
//!     Ok(who.map(|n| format!("hello {n}")))
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use tower::service_fn;
use tower::util::BoxCloneSyncService;

use crate::context::Context;
use crate::error::BoxError;

/// What a handler wants sent back, if anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Reply {
    /// Nothing to send.
    #[default]
    Silent,
    /// Reply to the originating message with this body.
    Text(String),
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Reply::Text(body.into())
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Silent
    }
}

impl From<String> for Reply {
    fn from(body: String) -> Self {
        Reply::Text(body)
    }
}

impl From<&str> for Reply {
    fn from(body: &str) -> Self {
        Reply::Text(body.to_owned())
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        value.map_or(Reply::Silent, Into::into)
    }
}

/// A type-erased, cloneable handler service.
pub type BoxedHandler = BoxCloneSyncService<Arc<Context>, Reply, BoxError>;

/// Lifts an async closure into a [`BoxedHandler`].
pub fn handler<F, Fut, R>(f: F) -> BoxedHandler
where
    F: Fn(Arc<Context>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    R: Into<Reply>,
{
    BoxCloneSyncService::new(service_fn(move |ctx: Arc<Context>| {
        let fut = f(ctx);
        async move { fut.await.map(Into::into) }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_conversions() {
        assert_eq!(Reply::from(()), Reply::Silent);
        assert_eq!(Reply::from("hi"), Reply::text("hi"));
        assert_eq!(Reply::from(String::from("hi")), Reply::text("hi"));
        assert_eq!(Reply::from(None::<String>), Reply::Silent);
        assert_eq!(Reply::from(Some("x")), Reply::text("x"));
    }
}
