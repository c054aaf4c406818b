//! Request routing: map an HTTP method and URL path to a handler chain.
//!
//! Routes are registered on a [`RouterBuilder`] and sealed into a [`Router`].
//! Each method gets its own prefix tree (see [`tree`]). Three pattern styles
//! are supported:
//!
//! | Pattern          | Example match            | Captured params                 |
//! |------------------|--------------------------|---------------------------------|
//! | `/users`         | `/users`                 | *(none)*                        |
//! | `/users/:id`     | `/users/42`              | `id → "42"`                     |
//! | `/files/*`       | `/files/docs/readme.txt` | `wildcard → "/docs/readme.txt"` |
//!
//! Matching prefers static text over a parameter and a parameter over a
//! wildcard. Patterns that could make that choice ambiguous are rejected when
//! they are registered.
//!
//! ## Dispatch
//!
//! [`Router::handle`] resolves a request to exactly one of:
//!
//! 1. `414 URI Too Long` when the path exceeds the configured limit.
//! 2. The matched route's chain.
//! 3. An automatic `200` carrying an `Allow` header, for unmatched `OPTIONS`
//!    requests when [`Settings::handle_options`] is set.
//! 4. `405 Method Not Allowed` with an `Allow` header, when the path matches
//!    under another method and [`Settings::handle_method_not_allowed`] is set.
//! 5. The not-found chain.

use std::sync::Arc;

use crate::cache::LookupCache;
use crate::config::Settings;
use crate::context::{ContextPool, Parameters};
use crate::middleware::{self, HandlersChain};
use crate::{Method, Request, Response, StatusCode};

mod builder;
pub mod tree;


pub use builder::{Group, RouterBuilder};
pub use tree::{RouteError, WILDCARD_PARAM};

use tree::Node;

/// The outcome of a successful match.
#[derive(Clone)]
pub struct MatchResult {
    handlers: HandlersChain,
    params: Parameters,
}

impl MatchResult {
    /// The chain registered for the route, global middleware included.
    pub fn handlers(&self) -> &HandlersChain {
        &self.handlers
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }
}

// State shared by every clone of a sealed router.
struct Shared {
    settings: Settings,
    // Sorted by method rank so `Allow` lists come out in a stable order.
    trees: Vec<(Method, Node)>,
    not_found: HandlersChain,
    // `Allow` value for the server-wide `OPTIONS *` form.
    global_allowed: String,
    cache: Option<LookupCache<Arc<MatchResult>>>,
    pool: ContextPool,
}

/// An immutable, cheaply cloneable route table.
///
/// Built once by [`RouterBuilder::build`]; clones share the trees, the lookup
/// cache, and the context pool, so one router can be handed to every
/// connection task.
#[derive(Clone)]
pub struct Router {
    shared: Arc<Shared>,
}

impl Router {
    /// Starts a registration phase with default [`Settings`].
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// Walks the tree for `method` without consulting the cache.
    ///
    /// Returns `None` when no route matches, including when nothing at all is
    /// registered for `method`.
    pub fn find(&self, method: &Method, path: &str) -> Option<MatchResult> {
        let root = self.tree(method)?;

        let folded;
        let subject = if self.shared.settings.case_insensitive {
            folded = path.to_ascii_lowercase();
            folded.as_str()
        } else {
            path
        };

        let (endpoint, captures) = root.find(subject)?;
        debug_assert_eq!(endpoint.param_names.len(), captures.len());

        // ASCII folding keeps byte offsets, so captures index the original path.
        let mut params = Parameters::with_capacity(captures.len());
        for (name, &(start, end)) in endpoint.param_names.iter().zip(captures.iter()) {
            params.insert(name.clone(), path[start..end].to_owned());
        }

        Some(MatchResult {
            handlers: Arc::clone(&endpoint.handlers),
            params,
        })
    }

    /// Resolves `(method, path)`, going through the lookup cache when enabled.
    ///
    /// Only successful matches are cached; a miss always walks the tree.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<Arc<MatchResult>> {
        let Some(cache) = &self.shared.cache else {
            return self.find(method, path).map(Arc::new);
        };

        if let Some(hit) = cache.get(method, path) {
            return Some(hit);
        }

        let found = Arc::new(self.find(method, path)?);
        cache.put(method, path, Arc::clone(&found));
        Some(found)
    }

    /// Methods other than `requested` that have a route matching `path`,
    /// formatted as an `Allow` header value. Empty when there are none.
    ///
    /// Walks the trees directly so the lookup cache only ever holds routes
    /// that were actually served.
    pub fn allowed_methods(&self, path: &str, requested: &Method) -> String {
        if *requested == Method::Options && (path == "*" || path == "/*") {
            return self.shared.global_allowed.clone();
        }

        let matching = self
            .shared
            .trees
            .iter()
            .filter(|(method, _)| method != requested)
            .filter(|(method, _)| self.find(method, path).is_some())
            .map(|(method, _)| method);
        builder::allow_header(matching, requested)
    }

    /// Number of routes registered across all methods.
    pub fn len(&self) -> usize {
        self.shared.trees.iter().map(|(_, root)| root.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries currently held by the lookup cache.
    pub fn cached(&self) -> usize {
        self.shared.cache.as_ref().map_or(0, LookupCache::len)
    }

    fn tree(&self, method: &Method) -> Option<&Node> {
        self.shared
            .trees
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, root)| root)
    }

    /// Dispatches one request and returns the response its chain produced.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtrouter::{Method, Request, Router, Settings, StatusCode, context::Context};
    ///
    /// let settings = Settings {
    ///     handle_method_not_allowed: true,
    ///     ..Settings::default()
    /// };
    /// let mut builder = rtrouter::RouterBuilder::with_settings(settings);
    /// builder.get("/books/find", |_ctx: &mut Context| {});
    /// let router = builder.build();
    ///
    /// let response = router.handle(Request::new(Method::Post, "/books/find"));
    /// assert_eq!(response.status(), StatusCode::MethodNotAllowed);
    /// assert_eq!(response.headers().get("allow"), Some("GET, OPTIONS"));
    /// ```
    pub fn handle(&self, request: Request) -> Response {
        let settings = &self.shared.settings;

        if request.path().len() > settings.max_request_url_length {
            tracing::debug!(
                len = request.path().len(),
                max = settings.max_request_url_length,
                "request path too long"
            );
            return Response::new(StatusCode::UriTooLong).body(StatusCode::UriTooLong.canonical_reason());
        }

        if let Some(found) = self.lookup(request.method(), request.path()) {
            return self.execute(request, Arc::clone(&found.handlers), &found.params);
        }

        let method = request.method().clone();
        if method == Method::Options && settings.handle_options {
            let allowed = self.allowed_methods(request.path(), &method);
            if !allowed.is_empty() {
                return Response::new(StatusCode::Ok).header("Allow", allowed);
            }
        } else if settings.handle_method_not_allowed {
            let allowed = self.allowed_methods(request.path(), &method);
            if !allowed.is_empty() {
                return Response::new(StatusCode::MethodNotAllowed)
                    .header("Allow", allowed)
                    .body(StatusCode::MethodNotAllowed.canonical_reason());
            }
        }

        tracing::debug!(%method, path = request.path(), "no route matched");
        self.execute(request, Arc::clone(&self.shared.not_found), &Parameters::new())
    }

    fn execute(&self, request: Request, handlers: HandlersChain, params: &Parameters) -> Response {
        let mut ctx = self.shared.pool.acquire();
        ctx.seed(request, handlers, params);

        if !self.shared.settings.auto_recover {
            ctx.start();
            return ctx.take_response();
        }

        match middleware::guarded(&mut ctx) {
            Ok(()) => ctx.take_response(),
            Err(fault) => {
                tracing::error!(
                    method = %ctx.request().method(),
                    path = ctx.request().path(),
                    error = %fault,
                    "recovered from handler panic"
                );
                let status = StatusCode::InternalServerError;
                Response::new(status).body(status.canonical_reason())
            }
        }
    }
}
