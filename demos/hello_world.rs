//! Minimal router demo.
//!
//! ```text
//! RUST_LOG=debug cargo run --example hello_world
//! curl -i http://127.0.0.1:8080/hello/world
//! curl -i -X OPTIONS http://127.0.0.1:8080/hello/world
//! ```

use std::sync::Arc;

use rtrouter::context::Context;
use rtrouter::middleware::{LoggerMiddleware, Middleware};
use rtrouter::{RouterBuilder, Server, Settings, StatusCode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings {
        case_insensitive: true,
        handle_method_not_allowed: true,
        handle_options: true,
        auto_recover: true,
        ..Settings::default()
    };

    let logger = Arc::new(LoggerMiddleware);
    let mut builder = RouterBuilder::with_settings(settings);
    builder
        .use_middleware(move |ctx: &mut Context| logger.handle(ctx))
        .get("/", |ctx: &mut Context| {
            ctx.send_string("Hello, World!");
        })
        .get("/hello/:name", |ctx: &mut Context| {
            let greeting = format!("Hello, {}!", ctx.param("name").unwrap_or("stranger"));
            ctx.send_string(greeting);
        })
        .post("/echo", |ctx: &mut Context| {
            let body = ctx.body().to_vec();
            ctx.send_bytes(body);
        })
        .get("/static/*", |ctx: &mut Context| {
            let file = ctx.param("wildcard").unwrap_or("/").to_owned();
            ctx.status(StatusCode::NotImplemented)
                .send_string(format!("would serve {file}"));
        })
        .get("/panic", |_ctx: &mut Context| panic!("handler exploded"));

    builder.group("/api", |api| {
        api.get("/status", |ctx: &mut Context| {
            if ctx
                .send_json(&serde_json::json!({ "status": "ok" }))
                .is_err()
            {
                ctx.status(StatusCode::InternalServerError);
            }
        });
    });

    let server = Server::bind("127.0.0.1:8080").await?;
    println!("Listening on http://{}", server.local_addr());
    server.serve(builder.build()).await?;
    Ok(())
}
