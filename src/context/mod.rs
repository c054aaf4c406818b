//! Per-request execution context.
//!
//! A [`Context`] carries everything one request needs while its handler chain
//! runs: the [`Request`], the [`Response`] being written, the path
//! [`Parameters`] bound by the router, the chain itself with a cursor into it,
//! and string-keyed [`Locals`] for handlers to pass values down the chain.
//!
//! Contexts are recycled through a [`ContextPool`]; every field is scrubbed
//! before a context is handed to the next request.

use std::{any::Any, collections::HashMap};

use serde::{Serialize, de::DeserializeOwned};

use crate::middleware::HandlersChain;
use crate::{Request, Response, StatusCode};

pub mod pool;

pub use pool::{ContextPool, PooledContext};

/// Per-request key/value storage shared between the handlers of one chain.
///
/// Values are type-erased; [`get`](Self::get) returns `None` both for a
/// missing key and for a value stored under a different type.
#[derive(Default)]
pub struct Locals {
    map: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Locals {
    /// Create a new empty locals map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under `key`, replacing any previous value
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(key.into(), Box::new(value));
    }

    /// Get the value stored under `key` if it has type `T`
    pub fn get<T>(&self, key: &str) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map.get(key).and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove and return the value stored under `key` if it has type `T`
    pub fn remove<T>(&mut self, key: &str) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        if !self.map.get(key)?.is::<T>() {
            return None;
        }
        self.map
            .remove(key)
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }
}

/// Path parameters extracted from the matched route
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    map: HashMap<String, String>,
}

impl Parameters {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty map with room for `capacity` parameters
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
        }
    }

    /// Insert a value into the parameters map
    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    /// Get a value from the parameters map
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|value| value.as_str())
    }

    /// Remove a value from the parameters map
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    /// Iterate over `(name, value)` pairs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every binding, keeping the allocation
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Per-request execution state driving one handler chain.
///
/// Handlers receive `&mut Context`. A handler that wants the rest of the chain
/// to run calls [`next`](Self::next); one that returns without calling it ends
/// the chain there, which is how authentication failures and early responses
/// short-circuit.
///
/// ```
/// use rtrouter::{Method, Request, Router, StatusCode, context::Context};
///
/// let mut builder = Router::builder();
/// builder.use_middleware(|ctx: &mut Context| {
///     ctx.set_local("user", String::from("ada"));
///     ctx.next();
/// });
/// builder.get("/me", |ctx: &mut Context| {
///     let user = ctx.get_local::<String>("user").cloned().unwrap_or_default();
///     ctx.send_string(user);
/// });
/// let router = builder.build();
///
/// let response = router.handle(Request::new(Method::Get, "/me"));
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert_eq!(response.text(), Some("ada"));
/// ```
#[derive(Default)]
pub struct Context {
    request: Request,
    response: Response,
    params: Parameters,
    handlers: Option<HandlersChain>,
    // Position of the handler currently running.
    index: usize,
    locals: Locals,
}

impl Context {
    /// Create an idle context with no request bound
    pub fn new() -> Self {
        Self::default()
    }

    // Bind a request, its chain, and its parameters before the chain starts.
    pub(crate) fn seed(&mut self, request: Request, handlers: HandlersChain, params: &Parameters) {
        self.request = request;
        self.handlers = Some(handlers);
        self.params.clone_from(params);
        self.index = 0;
    }

    /// Run the chain from its first handler.
    pub(crate) fn start(&mut self) {
        self.index = 0;
        self.invoke();
    }

    /// Advance the cursor and run the next handler in the chain.
    ///
    /// Does nothing once the chain is exhausted, so the last handler may call
    /// `next` unconditionally.
    pub fn next(&mut self) {
        self.index += 1;
        self.invoke();
    }

    fn invoke(&mut self) {
        let handler = self
            .handlers
            .as_ref()
            .and_then(|chain| chain.get(self.index))
            .cloned();
        if let Some(handler) = handler {
            handler(self);
        }
    }

    /// Position of the running handler within the chain
    pub fn cursor(&self) -> usize {
        self.index
    }

    /// Returns `true` once [`next`](Self::next) has moved past the last handler
    pub fn is_exhausted(&self) -> bool {
        self.handlers
            .as_ref()
            .is_none_or(|chain| self.index >= chain.len())
    }

    // Scrub every per-request field so nothing leaks into the next request.
    pub(crate) fn reset(&mut self) {
        self.request = Request::default();
        self.response = Response::default();
        self.params.clear();
        self.handlers = None;
        self.index = 0;
        self.locals.clear();
    }

    pub(crate) fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response)
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Value bound to the path parameter `name`
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Value of the query parameter `key`
    pub fn query(&self, key: &str) -> Option<&str> {
        self.request.query_param(key)
    }

    /// Value of the request header `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers().get(name)
    }

    /// Raw request body
    pub fn body(&self) -> &[u8] {
        self.request.body()
    }

    /// Deserialize the request body as JSON
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Set the response status
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.response.set_status(status);
        self
    }

    /// Set a response header, replacing any previous value
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.response.headers_mut().set(name, value);
        self
    }

    /// Replace the response body with text
    pub fn send_string(&mut self, body: impl Into<String>) -> &mut Self {
        self.response.set_body(body.into());
        self
    }

    /// Replace the response body with raw bytes
    pub fn send_bytes(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.response.set_body(body);
        self
    }

    /// Serialize `value` as the JSON response body
    pub fn send_json<T>(&mut self, value: &T) -> Result<&mut Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value)?;
        self.set_header("Content-Type", "application/json");
        self.response.set_body(body);
        Ok(self)
    }

    /// Store a value for later handlers of this request
    pub fn set_local<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.locals.insert(key, value);
    }

    /// Read a value stored by an earlier handler of this request
    pub fn get_local<T>(&self, key: &str) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.locals.get(key)
    }

    pub fn locals(&self) -> &Locals {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Locals {
        &mut self.locals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;
    use crate::middleware::{HandlerFn, handler};

    fn chain(handlers: Vec<HandlerFn>) -> HandlersChain {
        handlers.into()
    }

    fn seeded(handlers: Vec<HandlerFn>) -> Context {
        let mut ctx = Context::new();
        ctx.seed(
            Request::new(Method::Get, "/orders/7?verbose=1").with_header("X-Trace", "abc"),
            chain(handlers),
            &Parameters::new(),
        );
        ctx
    }

    #[test]
    fn locals_are_typed() {
        let mut locals = Locals::new();
        locals.insert("count", 3u32);
        assert_eq!(locals.get::<u32>("count"), Some(&3));
        assert_eq!(locals.get::<i64>("count"), None);
        assert_eq!(locals.remove::<i64>("count"), None);
        assert_eq!(locals.remove::<u32>("count"), Some(3));
        assert!(locals.is_empty());
    }

    #[test]
    fn chain_runs_in_order_through_next() {
        let mut ctx = seeded(vec![
            handler(|ctx: &mut Context| {
                ctx.set_local("trail", String::from("a"));
                ctx.next();
            }),
            handler(|ctx: &mut Context| {
                let trail = format!("{}b", ctx.get_local::<String>("trail").unwrap());
                ctx.set_local("trail", trail);
                ctx.next();
            }),
            handler(|ctx: &mut Context| {
                let trail = format!("{}c", ctx.get_local::<String>("trail").unwrap());
                ctx.send_string(trail);
            }),
        ]);
        ctx.start();
        assert_eq!(ctx.response().text(), Some("abc"));
        assert_eq!(ctx.cursor(), 2);
    }

    #[test]
    fn handler_without_next_short_circuits() {
        let mut ctx = seeded(vec![
            handler(|ctx: &mut Context| {
                ctx.status(StatusCode::Unauthorized);
            }),
            handler(|ctx: &mut Context| {
                ctx.status(StatusCode::Ok).send_string("reached");
            }),
        ]);
        ctx.start();
        assert_eq!(ctx.response().status(), StatusCode::Unauthorized);
        assert!(ctx.response().payload().is_empty());
        assert!(!ctx.is_exhausted());
    }

    #[test]
    fn next_past_the_end_is_a_no_op() {
        let mut ctx = seeded(vec![handler(|ctx: &mut Context| {
            ctx.send_string("only");
            ctx.next();
            ctx.next();
        })]);
        ctx.start();
        assert_eq!(ctx.response().text(), Some("only"));
        assert!(ctx.is_exhausted());
    }

    #[test]
    fn middleware_can_decorate_after_next() {
        let mut ctx = seeded(vec![
            handler(|ctx: &mut Context| {
                ctx.next();
                let status = ctx.response().status().as_u16().to_string();
                ctx.set_header("X-Downstream-Status", status);
            }),
            handler(|ctx: &mut Context| {
                ctx.status(StatusCode::Created);
            }),
        ]);
        ctx.start();
        assert_eq!(
            ctx.response().headers().get("x-downstream-status"),
            Some("201")
        );
    }

    #[test]
    fn request_accessors() {
        let ctx = seeded(vec![]);
        assert_eq!(ctx.query("verbose"), Some("1"));
        assert_eq!(ctx.header("x-trace"), Some("abc"));
        assert!(ctx.body().is_empty());
        assert_eq!(ctx.param("id"), None);
    }

    #[test]
    fn json_round_trip_through_body() {
        let mut ctx = Context::new();
        ctx.seed(
            Request::new(Method::Post, "/orders").with_body(r#"{"qty":2}"#),
            chain(vec![]),
            &Parameters::new(),
        );
        let value: serde_json::Value = ctx.json().unwrap();
        ctx.send_json(&value).unwrap();
        assert_eq!(ctx.response().text(), Some(r#"{"qty":2}"#));
        assert_eq!(
            ctx.response().headers().get("content-type"),
            Some("application/json")
        );
    }

    #[test]
    fn reset_scrubs_request_state() {
        let mut params = Parameters::new();
        params.insert("id".into(), "7".into());
        let mut ctx = Context::new();
        ctx.seed(
            Request::new(Method::Get, "/orders/7"),
            chain(vec![handler(|ctx: &mut Context| {
                ctx.set_local("k", 1u8);
                ctx.send_string("body");
            })]),
            &params,
        );
        ctx.start();
        ctx.reset();

        assert!(ctx.params().is_empty());
        assert!(ctx.locals().is_empty());
        assert!(ctx.is_exhausted());
        assert_eq!(ctx.request().path(), "");
        assert!(ctx.response().payload().is_empty());
        assert_eq!(ctx.cursor(), 0);
    }
}
