//! Handler chains: the request-processing units the router dispatches to.
//!
//! Every route resolves to an ordered chain of handlers. Each handler receives
//! the request [`Context`] and decides whether the rest of the chain runs by
//! calling [`Context::next`]. Middleware is nothing more than a handler that
//! sits early in the chain:
//!
//! - **Pass through**: call `ctx.next()` and return.
//! - **Short-circuit**: write a response and return without calling `next`.
//! - **Decorate**: call `ctx.next()`, then inspect or amend the response.
//!
//! ## Core types
//!
//! - [`HandlerFn`]: type-erased, cheaply-cloneable handler.
//! - [`HandlersChain`]: immutable, shared sequence of handlers for one route.
//! - [`Middleware`]: trait for stateful middleware, turned into a
//!   [`HandlerFn`] by [`from_middleware`].
//! - [`LoggerMiddleware`]: built-in request/response logger.
//! - [`guarded`]: runs a chain, converting a handler panic into a
//!   [`HandlerFault`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::context::Context;

/// A type-erased, reference-counted handler.
///
/// The [`Arc`] wrapper makes handlers cheap to clone, so the same handler can
/// sit in many chains and the context can hold one while it runs.
///
/// ```rust
/// use rtrouter::{StatusCode, context::Context, middleware::{HandlerFn, handler}};
///
/// let unauthorized: HandlerFn = handler(|ctx: &mut Context| {
///     ctx.status(StatusCode::Unauthorized);
/// });
/// ```
pub type HandlerFn = Arc<dyn Fn(&mut Context) + Send + Sync + 'static>;

/// The ordered handlers bound to one route, shared by every request for it.
pub type HandlersChain = Arc<[HandlerFn]>;

/// Erase a closure into a [`HandlerFn`].
pub fn handler<F>(f: F) -> HandlerFn
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Converts a [`Middleware`] implementation into a [`HandlerFn`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use rtrouter::middleware::{LoggerMiddleware, from_middleware};
///
/// let handler = from_middleware(Arc::new(LoggerMiddleware));
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> HandlerFn
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: &mut Context| middleware.handle(ctx))
}

/// Stateful middleware.
///
/// Implementors receive the per-request [`Context`]; calling
/// [`Context::next`] forwards to the remainder of the chain.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because one instance serves
///   every request concurrently.
/// - `handle` runs on the request's own task and must not block on I/O.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next handler.
    fn handle(&self, ctx: &mut Context);
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line after the downstream handlers complete,
/// in the format:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: &mut Context) {
        let start = Instant::now();

        ctx.next();

        let duration = start.elapsed();
        let request = ctx.request();
        tracing::info!(
            "{} {} - {} ({:?})",
            request.method(),
            request.path(),
            ctx.response().status().as_u16(),
            duration
        );
    }
}

/// A handler panicked while its chain was running.
#[derive(Debug, Error)]
#[error("handler panicked: {message}")]
pub struct HandlerFault {
    message: String,
}

impl HandlerFault {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::from("non-string panic payload")
        };
        Self { message }
    }

    /// The panic message, when the payload was a string.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Run the context's chain from the start, catching a panic from any handler.
///
/// Whatever the chain wrote before panicking is left in the context; the
/// caller decides how to answer.
pub fn guarded(ctx: &mut Context) -> Result<(), HandlerFault> {
    panic::catch_unwind(AssertUnwindSafe(|| ctx.start())).map_err(HandlerFault::from_panic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Parameters;
    use crate::{Method, Request, StatusCode};

    fn seeded(chain: Vec<HandlerFn>) -> Context {
        let mut ctx = Context::new();
        ctx.seed(Request::new(Method::Get, "/"), chain.into(), &Parameters::new());
        ctx
    }

    struct Stamp(&'static str);

    impl Middleware for Stamp {
        fn handle(&self, ctx: &mut Context) {
            ctx.set_header("X-Stamp", self.0);
            ctx.next();
        }
    }

    #[test]
    fn trait_middleware_joins_the_chain() {
        let mut ctx = seeded(vec![
            from_middleware(Arc::new(Stamp("v1"))),
            from_middleware(Arc::new(LoggerMiddleware)),
            handler(|ctx: &mut Context| {
                ctx.status(StatusCode::Accepted);
            }),
        ]);
        guarded(&mut ctx).unwrap();
        assert_eq!(ctx.response().status(), StatusCode::Accepted);
        assert_eq!(ctx.response().headers().get("x-stamp"), Some("v1"));
    }

    #[test]
    fn guarded_reports_str_panics() {
        let mut ctx = seeded(vec![handler(|_ctx: &mut Context| panic!("boom"))]);
        let fault = guarded(&mut ctx).unwrap_err();
        assert_eq!(fault.message(), "boom");
        assert_eq!(fault.to_string(), "handler panicked: boom");
    }

    #[test]
    fn guarded_reports_formatted_panics_from_deep_in_the_chain() {
        let mut ctx = seeded(vec![
            handler(|ctx: &mut Context| ctx.next()),
            handler(|ctx: &mut Context| {
                let depth = ctx.cursor();
                panic!("failed at {depth}");
            }),
        ]);
        let fault = guarded(&mut ctx).unwrap_err();
        assert_eq!(fault.message(), "failed at 1");
    }
}
