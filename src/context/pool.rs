//! Free-list of reusable [`Context`] objects.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use super::Context;

/// Default number of idle contexts kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// A concurrency-safe free-list of request contexts.
///
/// [`acquire`](Self::acquire) hands out a context exclusively owned by the
/// caller through a [`PooledContext`] guard; dropping the guard scrubs the
/// context and returns it. Because the guard owns the context outright, a
/// context can neither be released twice nor be reachable from two requests
/// at once.
///
/// # Examples
///
/// ```
/// use rtrouter::context::ContextPool;
///
/// let pool = ContextPool::new(8);
/// {
///     let mut ctx = pool.acquire();
///     ctx.set_local("scratch", 1u32);
/// }
/// assert_eq!(pool.idle(), 1);
/// assert!(pool.acquire().locals().is_empty());
/// ```
pub struct ContextPool {
    free: Mutex<Vec<Context>>,
    max_idle: usize,
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl ContextPool {
    /// Creates an empty pool that keeps at most `max_idle` contexts around.
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Takes an idle context, allocating a fresh one when none is available.
    pub fn acquire(&self) -> PooledContext<'_> {
        let ctx = self.free.lock().pop().unwrap_or_default();
        PooledContext { pool: self, ctx }
    }

    /// Number of contexts currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn release(&self, mut ctx: Context) {
        ctx.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(ctx);
        }
    }
}

/// Exclusive handle on a pooled [`Context`]; returns it to the pool on drop.
pub struct PooledContext<'a> {
    pool: &'a ContextPool,
    ctx: Context,
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        let ctx = std::mem::take(&mut self.ctx);
        self.pool.release(ctx);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::context::Parameters;
    use crate::middleware::handler;
    use crate::{Method, Request};

    #[test]
    fn released_context_is_reused_and_clean() {
        let pool = ContextPool::new(4);
        {
            let mut params = Parameters::new();
            params.insert("id".into(), "42".into());
            let mut ctx = pool.acquire();
            ctx.seed(
                Request::new(Method::Get, "/users/42"),
                vec![handler(|ctx: &mut Context| {
                    ctx.set_local("secret", String::from("s3cr3t"));
                    ctx.send_string("hi");
                })]
                .into(),
                &params,
            );
            ctx.start();
            assert_eq!(ctx.param("id"), Some("42"));
        }
        assert_eq!(pool.idle(), 1);

        let ctx = pool.acquire();
        assert_eq!(pool.idle(), 0);
        assert!(ctx.params().is_empty());
        assert!(ctx.get_local::<String>("secret").is_none());
        assert!(ctx.response().payload().is_empty());
        assert_eq!(ctx.request().path(), "");
        assert!(ctx.is_exhausted());
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool = ContextPool::new(2);
        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(held);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn concurrent_acquire_release() {
        let pool = Arc::new(ContextPool::new(16));
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..200 {
                        let mut ctx = pool.acquire();
                        assert!(ctx.locals().is_empty());
                        ctx.set_local("owner", (t, i));
                        assert_eq!(ctx.get_local::<(i32, i32)>("owner"), Some(&(t, i)));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(pool.idle() <= 16);
    }
}
