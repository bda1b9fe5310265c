//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns: structured tracing, metrics, request-id injection,
//! and authentication-header inspection.
//!
//! # The chain
//!
//! Every request walks the same list: each middleware receives the request
//! plus a [`Next`] that stands for "everything after me". The last link is
//! route dispatch itself, so middleware sees unmatched routes (404) too.
//!
//! ```text
//! server ─▶ mw[0].handle(req, next) ─▶ mw[1].handle(req, next) ─▶ router ─▶ handler
//!        ◀─────────── Outcome ◀──────────────── Outcome ◀──────────────────┘
//! ```
//!
//! Built-in middleware:
//! - [`trace`]: per-request server span with W3C trace-context propagation

use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler};
use crate::request::Request;

pub mod trace;

/// A link in the request chain.
///
/// Implementations must call `next.run(req)` exactly once to continue the
/// chain, or not at all to short-circuit it. Whatever `next` returns,
/// including an `Err`, should be passed back up unless the middleware exists
/// to change it.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

/// The frozen middleware list plus the route dispatcher at its end.
pub(crate) struct Chain {
    pub(crate) middleware: Box<[Arc<dyn Middleware>]>,
    pub(crate) endpoint: BoxedHandler,
}

/// The remainder of the chain after the current middleware.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    pub(crate) fn new(chain: Arc<Chain>) -> Self {
        Self { chain, index: 0 }
    }

    /// Passes `req` to the next middleware, or to route dispatch after the
    /// last one.
    pub fn run(self, req: Request) -> BoxFuture {
        let Self { chain, index } = self;
        let current = chain.middleware.get(index).cloned();
        match current {
            Some(mw) => mw.handle(req, Self { chain, index: index + 1 }),
            None => chain.endpoint.call(req),
        }
    }
}
