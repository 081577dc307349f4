//! Cache-aware wrapper around a fetch function
//!
//! [`Cached`] turns a plain `Fn(&A) -> anyhow::Result<V>` into a callable that
//! consults the [`QueryCache`] first. Keys are derived from the namespace,
//! the operation and a hash of the arguments, so every cached call of the
//! same wrapper can be invalidated with [`Cached::scope`].

use crate::cache::{
    key::{CacheKey, KeyPattern},
    store::QueryCache,
};
use crate::error::Result;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// A fetch function bound to a cache, a key space and a TTL
pub struct Cached<A: ?Sized, V, F> {
    cache: Arc<QueryCache<V>>,
    namespace: String,
    operation: String,
    ttl: Option<Duration>,
    fetch: F,
    _args: PhantomData<fn(&A)>,
}

impl<A, V, F> Cached<A, V, F>
where
    A: Hash + ?Sized,
    V: Clone + Send + Sync + 'static,
    F: Fn(&A) -> anyhow::Result<V>,
{
    /// Wrap `fetch`; `ttl = None` uses the cache default
    pub fn new(
        cache: Arc<QueryCache<V>>,
        namespace: impl Into<String>,
        operation: impl Into<String>,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let operation = operation.into();
        // Validates both segments up front
        CacheKey::operation_scope(&namespace, &operation)?;

        Ok(Self {
            cache,
            namespace,
            operation,
            ttl,
            fetch,
            _args: PhantomData,
        })
    }

    /// Key under which the result for `args` is cached
    pub fn key_for(&self, args: &A) -> Result<CacheKey> {
        CacheKey::for_args(&self.namespace, &self.operation, args)
    }

    /// Pattern covering every result this wrapper has cached
    pub fn scope(&self) -> KeyPattern {
        KeyPattern::Scope(format!("{}:{}", self.namespace, self.operation))
    }

    /// Cached result for `args`, fetching and storing it on a miss
    pub async fn call(&self, args: &A) -> Result<V> {
        let key = self.key_for(args)?;
        self.cache
            .get_or_fetch(key.as_str(), self.ttl, || (self.fetch)(args))
            .await
    }

    /// Drop the cached result for `args`
    pub async fn forget(&self, args: &A) -> Result<bool> {
        let key = self.key_for(args)?;
        Ok(self.cache.invalidate(key.as_str()).await)
    }
}
