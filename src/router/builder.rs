//! Registration phase: collect routes, middleware, and the not-found chain,
//! then seal them into an immutable [`Router`].

use std::sync::Arc;

use crate::config::Settings;
use crate::context::{Context, ContextPool};
use crate::middleware::{HandlerFn, HandlersChain, handler};
use crate::{Method, StatusCode};

use super::tree::{self, Endpoint, Node, RouteError};
use super::{MatchResult, Router, Shared};
use crate::cache::LookupCache;

/// Collects routes before serving starts.
///
/// Every registration is checked immediately, so a malformed or conflicting
/// route fails at the call that introduced it. [`build`](Self::build) then
/// consumes the builder: a sealed [`Router`] has no way to register anything,
/// which keeps the route trees immutable while requests are served.
///
/// # Examples
///
/// ```
/// use rtrouter::{Method, Request, Router, StatusCode, context::Context};
///
/// let mut builder = Router::builder();
/// builder
///     .get("/users/:id", |ctx: &mut Context| {
///         let id = ctx.param("id").unwrap_or_default().to_owned();
///         ctx.send_string(id);
///     })
///     .post("/users", |ctx: &mut Context| {
///         ctx.status(StatusCode::Created);
///     });
/// let router = builder.build();
///
/// let response = router.handle(Request::new(Method::Get, "/users/42"));
/// assert_eq!(response.text(), Some("42"));
/// ```
pub struct RouterBuilder {
    settings: Settings,
    // One tree per method, holding the chains as registered.
    trees: Vec<(Method, Node)>,
    middleware: Vec<HandlerFn>,
    not_found: Vec<HandlerFn>,
    routes: usize,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! method_helpers {
    ($($(#[$doc:meta])* $name:ident => $method:expr;)*) => {
        $(
            $(#[$doc])*
            ///
            /// # Panics
            ///
            /// Panics if the route is malformed or conflicts with one already
            /// registered.
            pub fn $name<F>(&mut self, path: &str, f: F) -> &mut Self
            where
                F: Fn(&mut Context) + Send + Sync + 'static,
            {
                self.add_route($method, path, vec![handler(f)])
            }
        )*
    };
}

impl RouterBuilder {
    /// Creates a builder with default [`Settings`].
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Creates a builder that seals into a router configured by `settings`.
    ///
    /// Settings are fixed here because they affect how patterns are stored;
    /// case-insensitive routers fold each pattern as it is registered.
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            trees: Vec::new(),
            middleware: Vec::new(),
            not_found: Vec::new(),
            routes: 0,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registers `handlers` for `method` and `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`RouteError`] if the method is empty, the path is empty or
    /// lacks its leading `/`, the chain is empty, the pattern is malformed or
    /// declares too many parameters, or it conflicts with an existing route
    /// for the same method.
    pub fn try_add_route(
        &mut self,
        method: Method,
        path: &str,
        handlers: Vec<HandlerFn>,
    ) -> Result<&mut Self, RouteError> {
        if method.as_str().is_empty() {
            return Err(RouteError::EmptyMethod);
        }
        if path.is_empty() {
            return Err(RouteError::EmptyPath);
        }
        if !path.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash {
                path: path.to_owned(),
            });
        }
        if handlers.is_empty() {
            return Err(RouteError::NoHandlers {
                path: path.to_owned(),
            });
        }

        let pattern = if self.settings.case_insensitive {
            tree::fold_pattern(path)
        } else {
            path.to_owned()
        };

        let max_params = self.settings.max_route_params;
        self.tree_mut(&method)
            .insert(&pattern, handlers.into(), max_params)?;
        self.routes += 1;
        tracing::debug!(%method, path, "route registered");
        Ok(self)
    }

    /// Registers `handlers` for `method` and `path`.
    ///
    /// # Panics
    ///
    /// Panics with the [`RouteError`] message on any registration fault; see
    /// [`try_add_route`](Self::try_add_route).
    pub fn add_route(&mut self, method: Method, path: &str, handlers: Vec<HandlerFn>) -> &mut Self {
        if let Err(err) = self.try_add_route(method, path, handlers) {
            panic!("{err}");
        }
        self
    }

    method_helpers! {
        /// Registers a `GET` handler.
        get => Method::Get;
        /// Registers a `HEAD` handler.
        head => Method::Head;
        /// Registers a `POST` handler.
        post => Method::Post;
        /// Registers a `PUT` handler.
        put => Method::Put;
        /// Registers a `PATCH` handler.
        patch => Method::Patch;
        /// Registers a `DELETE` handler.
        delete => Method::Delete;
        /// Registers a `CONNECT` handler.
        connect => Method::Connect;
        /// Registers an `OPTIONS` handler, taking precedence over automatic
        /// OPTIONS responses for its path.
        options => Method::Options;
        /// Registers a `TRACE` handler.
        trace => Method::Trace;
    }

    /// Adds global middleware.
    ///
    /// Middleware is prepended to every route chain and to the not-found
    /// chain when the router is built, in the order it was added here and
    /// regardless of whether routes were registered before or after.
    pub fn use_middleware<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.middleware.push(handler(f));
        self
    }

    /// Replaces the chain run when no route matches.
    ///
    /// Without one, unmatched requests get `404 Not Found` with the body
    /// `Not Found`. An empty chain restores that default.
    pub fn not_found(&mut self, handlers: Vec<HandlerFn>) -> &mut Self {
        self.not_found = handlers;
        self
    }

    /// Registers the routes added inside `f` under a shared path prefix.
    ///
    /// Groups nest, and `prefix` is joined as is, so `/account` then `/api`
    /// then `/id` registers `/account/api/id`.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtrouter::{Method, Request, Router, StatusCode, context::Context};
    ///
    /// let mut builder = Router::builder();
    /// builder.group("/account", |account| {
    ///     account.group("/api", |api| {
    ///         api.get("/id", |ctx: &mut Context| {
    ///             ctx.send_string("7");
    ///         });
    ///     });
    /// });
    /// let router = builder.build();
    ///
    /// assert_eq!(router.handle(Request::new(Method::Get, "/account/api/id")).text(), Some("7"));
    /// assert_eq!(router.handle(Request::new(Method::Get, "/id")).status(), StatusCode::NotFound);
    /// ```
    pub fn group<F>(&mut self, prefix: &str, f: F) -> &mut Self
    where
        F: FnOnce(&mut Group<'_>),
    {
        let mut group = Group {
            builder: self,
            prefix: prefix.to_owned(),
        };
        f(&mut group);
        self
    }

    /// Number of routes registered so far, across all methods.
    pub fn len(&self) -> usize {
        self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes == 0
    }

    fn tree_mut(&mut self, method: &Method) -> &mut Node {
        let idx = match self.trees.iter().position(|(m, _)| m == method) {
            Some(idx) => idx,
            None => {
                self.trees.push((method.clone(), Node::new()));
                self.trees.len() - 1
            }
        };
        &mut self.trees[idx].1
    }

    /// Seals the registered routes into a [`Router`].
    ///
    /// Global middleware is prepended to each chain, the server-wide `Allow`
    /// list is computed, and the lookup cache and context pool are created.
    pub fn build(self) -> Router {
        let RouterBuilder {
            settings,
            mut trees,
            middleware,
            not_found,
            routes,
        } = self;

        if !middleware.is_empty() {
            for (_, root) in &mut trees {
                root.for_each_endpoint_mut(&mut |endpoint: &mut Endpoint| {
                    endpoint.handlers = prepend(&middleware, &endpoint.handlers);
                });
            }
        }

        trees.sort_by(|(a, _), (b, _)| {
            a.rank()
                .cmp(&b.rank())
                .then_with(|| a.as_str().cmp(b.as_str()))
        });

        let global_allowed = allow_header(trees.iter().map(|(method, _)| method), &Method::Options);

        let not_found = if not_found.is_empty() {
            vec![handler(default_not_found)]
        } else {
            not_found
        };
        let not_found = prepend(&middleware, &not_found);

        let cache = settings
            .caching_enabled()
            .then(|| LookupCache::<Arc<MatchResult>>::new(settings.cache_size));

        tracing::info!(
            routes,
            methods = trees.len(),
            caching = cache.is_some(),
            "router sealed"
        );

        Router {
            shared: Arc::new(Shared {
                settings,
                trees,
                not_found,
                global_allowed,
                cache,
                pool: ContextPool::default(),
            }),
        }
    }
}

fn prepend(middleware: &[HandlerFn], handlers: &[HandlerFn]) -> HandlersChain {
    middleware.iter().chain(handlers).cloned().collect()
}

fn default_not_found(ctx: &mut Context) {
    ctx.status(StatusCode::NotFound).send_string("Not Found");
}

/// Formats an `Allow` value from the methods that matched, leaving out the
/// requested one. `OPTIONS` is appended whenever anything else is allowed.
pub(crate) fn allow_header<'a>(
    methods: impl Iterator<Item = &'a Method>,
    requested: &Method,
) -> String {
    let mut allowed: Vec<&str> = methods
        .filter(|method| *method != requested && **method != Method::Options)
        .map(Method::as_str)
        .collect();
    if !allowed.is_empty() {
        allowed.push(Method::Options.as_str());
    }
    allowed.join(", ")
}

/// A set of routes sharing a path prefix; see [`RouterBuilder::group`].
pub struct Group<'a> {
    builder: &'a mut RouterBuilder,
    prefix: String,
}

impl Group<'_> {
    /// The full prefix of this group, including any enclosing groups.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Registers `handlers` for `method` under this group's prefix.
    ///
    /// # Errors
    ///
    /// As [`RouterBuilder::try_add_route`], applied to the joined path.
    pub fn try_add_route(
        &mut self,
        method: Method,
        path: &str,
        handlers: Vec<HandlerFn>,
    ) -> Result<&mut Self, RouteError> {
        if path.is_empty() {
            return Err(RouteError::EmptyPath);
        }
        if !path.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash {
                path: path.to_owned(),
            });
        }
        let full = format!("{}{}", self.prefix, path);
        self.builder.try_add_route(method, &full, handlers)?;
        Ok(self)
    }

    /// Registers `handlers` for `method` under this group's prefix.
    ///
    /// # Panics
    ///
    /// Panics with the [`RouteError`] message on any registration fault.
    pub fn add_route(&mut self, method: Method, path: &str, handlers: Vec<HandlerFn>) -> &mut Self {
        if let Err(err) = self.try_add_route(method, path, handlers) {
            panic!("{err}");
        }
        self
    }

    method_helpers! {
        /// Registers a `GET` handler under the group prefix.
        get => Method::Get;
        /// Registers a `HEAD` handler under the group prefix.
        head => Method::Head;
        /// Registers a `POST` handler under the group prefix.
        post => Method::Post;
        /// Registers a `PUT` handler under the group prefix.
        put => Method::Put;
        /// Registers a `PATCH` handler under the group prefix.
        patch => Method::Patch;
        /// Registers a `DELETE` handler under the group prefix.
        delete => Method::Delete;
        /// Registers a `CONNECT` handler under the group prefix.
        connect => Method::Connect;
        /// Registers an `OPTIONS` handler under the group prefix.
        options => Method::Options;
        /// Registers a `TRACE` handler under the group prefix.
        trace => Method::Trace;
    }

    /// Opens a nested group whose prefix extends this one.
    pub fn group<F>(&mut self, prefix: &str, f: F) -> &mut Self
    where
        F: FnOnce(&mut Group<'_>),
    {
        let mut nested = Group {
            prefix: format!("{}{}", self.prefix, prefix),
            builder: &mut *self.builder,
        };
        f(&mut nested);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &mut Context) {}

    #[test]
    fn registration_faults_are_reported() {
        let mut builder = RouterBuilder::new();
        let chain = || vec![handler(noop)];

        assert_eq!(
            builder.try_add_route(Method::Get, "", chain()).err(),
            Some(RouteError::EmptyPath)
        );
        assert_eq!(
            builder
                .try_add_route(Method::from(""), "/x", chain())
                .err(),
            Some(RouteError::EmptyMethod)
        );
        assert_eq!(
            builder.try_add_route(Method::Get, "users", chain()).err(),
            Some(RouteError::MissingLeadingSlash {
                path: "users".into()
            })
        );
        assert_eq!(
            builder.try_add_route(Method::Get, "/users", vec![]).err(),
            Some(RouteError::NoHandlers {
                path: "/users".into()
            })
        );
        assert!(builder.is_empty());
    }

    #[test]
    fn conflicts_are_scoped_per_method() {
        let mut builder = RouterBuilder::new();
        builder.get("/id/:id", noop).post("/id/:value", noop);
        assert!(matches!(
            builder.try_add_route(Method::Get, "/id/:value", vec![handler(noop)]),
            Err(RouteError::Conflict { .. })
        ));
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn max_route_params_is_enforced() {
        let settings = Settings {
            max_route_params: 1,
            ..Settings::default()
        };
        let mut builder = RouterBuilder::with_settings(settings);
        builder.get("/a/:x", noop);
        assert!(matches!(
            builder.try_add_route(Method::Get, "/b/:x/:y", vec![handler(noop)]),
            Err(RouteError::TooManyParams { count: 2, max: 1, .. })
        ));
    }

    #[test]
    #[should_panic(expected = "conflicts with an existing route")]
    fn duplicate_wildcard_panics() {
        let mut builder = RouterBuilder::new();
        builder.get("/src/*", noop).get("/src/*", noop);
    }

    #[test]
    #[should_panic(expected = "wildcard must be the final segment")]
    fn wildcard_in_the_middle_panics() {
        RouterBuilder::new().get("/results/*/view", noop);
    }

    #[test]
    #[should_panic(expected = "must begin with '/'")]
    fn group_path_without_slash_panics() {
        RouterBuilder::new().group("/api", |api| {
            api.get("users", noop);
        });
    }

    #[test]
    fn nested_group_prefixes_compose() {
        let mut builder = RouterBuilder::new();
        builder.group("/account", |account| {
            assert_eq!(account.prefix(), "/account");
            account.group("/api", |api| {
                assert_eq!(api.prefix(), "/account/api");
                api.get("/id", noop).post("/abc", noop).post("/abcd", noop);
            });
        });
        assert_eq!(builder.len(), 3);
    }

    #[test]
    fn allow_header_formatting() {
        let methods = [Method::Get, Method::Put, Method::Options];
        assert_eq!(allow_header(methods.iter(), &Method::Post), "GET, PUT, OPTIONS");
        assert_eq!(allow_header(methods.iter(), &Method::Get), "PUT, OPTIONS");
        assert_eq!(allow_header([Method::Get].iter(), &Method::Get), "");
        assert_eq!(allow_header([Method::Options].iter(), &Method::Get), "");
    }
}
