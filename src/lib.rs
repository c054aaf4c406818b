//! # rtrouter
//!
//! An HTTP request router built on per-method radix trees, with conflict
//! detection at registration time, a bounded lookup cache, pooled request
//! contexts, and an explicit `next()` middleware pipeline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtrouter::{Router, Server, context::Context};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut builder = Router::builder();
//!     builder.get("/users/:id", |ctx: &mut Context| {
//!         let id = ctx.param("id").unwrap_or_default().to_owned();
//!         ctx.send_string(id);
//!     });
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     println!("Listening on http://127.0.0.1:8080");
//!     server.serve(builder.build()).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ConfigError, Settings};
pub use context::Context;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{RouteError, Router, RouterBuilder};
pub use server::{Server, ServerError};
