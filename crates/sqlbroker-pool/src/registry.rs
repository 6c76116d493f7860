//! One pool per distinct database target.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlbroker_backend::{Backend, ConnectSpec};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::pool::Pool;

/// Keeps exactly one [`Pool`] per distinct [`ConnectSpec`].
///
/// The registry replaces ad-hoc global pool caches: create one at process
/// start, hand it to whatever needs connections, and call
/// [`shutdown_all`](PoolRegistry::shutdown_all) at process shutdown.
///
/// Pool construction is serialized under the registry lock, so two
/// concurrent requests for the same target still produce a single pool.
pub struct PoolRegistry<B: Backend> {
    factory: Box<dyn Fn(&ConnectSpec) -> B + Send + Sync>,
    defaults: PoolConfig,
    pools: tokio::sync::Mutex<HashMap<ConnectSpec, Arc<Pool<B>>>>,
}

impl<B: Backend> PoolRegistry<B> {
    /// Create a registry that builds backends with `factory` and pools with
    /// the `defaults` configuration.
    pub fn new<F>(defaults: PoolConfig, factory: F) -> Self
    where
        F: Fn(&ConnectSpec) -> B + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            defaults,
            pools: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The pool for `spec`, creating it (and its minimum connections) on
    /// first request.
    pub async fn get_or_create(&self, spec: &ConnectSpec) -> Result<Arc<Pool<B>>, PoolError> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(spec) {
            return Ok(Arc::clone(pool));
        }
        tracing::info!(target = %spec.url, "creating connection pool");
        let backend = (self.factory)(spec);
        let pool = Arc::new(Pool::new(backend, self.defaults.clone()).await?);
        pools.insert(spec.clone(), Arc::clone(&pool));
        Ok(pool)
    }

    /// Number of pools currently registered.
    pub async fn len(&self) -> usize {
        self.pools.lock().await.len()
    }

    /// Whether no pools are registered.
    pub async fn is_empty(&self) -> bool {
        self.pools.lock().await.is_empty()
    }

    /// Shut down and drop every registered pool, waiting up to `wait` for
    /// each. Returns the total number of connections that had to be closed
    /// while still checked out.
    pub async fn shutdown_all(&self, wait: Duration) -> usize {
        let pools: Vec<Arc<Pool<B>>> = self.pools.lock().await.drain().map(|(_, p)| p).collect();
        let mut forced = 0;
        for pool in pools {
            match pool.shutdown(wait).await {
                Ok(()) => {}
                Err(PoolError::UnsafeShutdown { connections }) => forced += connections,
                Err(err) => tracing::warn!(error = %err, "pool shutdown reported an error"),
            }
        }
        forced
    }
}
