//! Enrichment through memoized external lookups.
//!
//! A [`Resolver`] answers one key with one external call. [`LookupCache`]
//! wraps a resolver for the lifetime of a single run: every distinct key is
//! resolved at most once, "not found" answers included, and nothing is ever
//! invalidated mid-run. Failed calls are not cached.

use crate::error::Result;
use crate::pipeline::chain::{Outcome, Probe, Stage};
use crate::pipeline::counters::RatioStats;
use crate::types::{Record, Value};
use async_trait::async_trait;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One external source of answers keyed by a string.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Name used in logs, errors and progress labels.
    fn name(&self) -> String;

    /// `Ok(None)` means the external system definitively has no answer.
    /// Transport or status failures must be returned as errors.
    async fn resolve(&self, key: &str) -> Result<Option<Value>>;
}

#[async_trait]
impl<R: Resolver + ?Sized> Resolver for Arc<R> {
    fn name(&self) -> String {
        (**self).name()
    }

    async fn resolve(&self, key: &str) -> Result<Option<Value>> {
        (**self).resolve(key).await
    }
}

/// Per-run memo of resolver answers.
pub struct LookupCache<R> {
    resolver: R,
    entries: HashMap<String, Option<Value>>,
    stats: Arc<RatioStats>,
}

impl<R: Resolver> LookupCache<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            entries: HashMap::new(),
            stats: RatioStats::new(),
        }
    }

    pub async fn resolve(&mut self, key: &str) -> Result<Option<Value>> {
        if let Some(hit) = self.entries.get(key) {
            self.stats.observe(false);
            return Ok(hit.clone());
        }
        let answer = self.resolver.resolve(key).await?;
        self.stats.observe(true);
        counter!("registry_lookup_misses_total", "resolver" => self.resolver.name()).increment(1);
        debug!(resolver = %self.resolver.name(), key, found = answer.is_some(), "lookup cache miss");
        self.entries.insert(key.to_string(), answer.clone());
        Ok(answer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> Arc<RatioStats> {
        self.stats.clone()
    }

    /// Share of lookups that had to call the resolver, in percent.
    pub fn miss_percent(&self) -> f64 {
        self.stats.percent()
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }
}

/// Sets `target` to the cached answer for the value of `key_field`.
pub struct LookupEnricher<R> {
    key_field: String,
    target: String,
    cache: LookupCache<R>,
    not_found: Value,
    missing_key: Value,
}

impl<R: Resolver> LookupEnricher<R> {
    pub fn new(key_field: impl Into<String>, target: impl Into<String>, resolver: R) -> Self {
        Self {
            key_field: key_field.into(),
            target: target.into(),
            cache: LookupCache::new(resolver),
            not_found: Value::Null,
            missing_key: Value::Null,
        }
    }

    /// Existence checks: found keys carry `Bool(true)` from the resolver,
    /// unknown or missing keys become `Bool(false)`.
    pub fn existence(key_field: impl Into<String>, target: impl Into<String>, resolver: R) -> Self {
        Self::new(key_field, target, resolver)
            .when_not_found(Value::Bool(false))
            .when_key_missing(Value::Bool(false))
    }

    pub fn when_not_found(mut self, value: Value) -> Self {
        self.not_found = value;
        self
    }

    /// Value written when the key field is absent, null or empty. The
    /// resolver is not called for such records.
    pub fn when_key_missing(mut self, value: Value) -> Self {
        self.missing_key = value;
        self
    }

    pub fn cache(&self) -> &LookupCache<R> {
        &self.cache
    }
}

#[async_trait]
impl<R: Resolver> Stage for LookupEnricher<R> {
    fn name(&self) -> String {
        format!("lookup({} -> {} via {})", self.key_field, self.target, self.cache.resolver().name())
    }

    async fn handle(&mut self, mut record: Record) -> Result<Outcome> {
        let key = record.get(&self.key_field).and_then(Value::as_lookup_key);
        let value = match key {
            Some(key) => self
                .cache
                .resolve(&key)
                .await?
                .unwrap_or_else(|| self.not_found.clone()),
            None => self.missing_key.clone(),
        };
        record.set(self.target.clone(), value);
        Ok(Outcome::Pass(record))
    }

    fn probes(&self) -> Vec<Probe> {
        vec![Probe::new(
            format!("miss_cache_{}", self.target),
            self.cache.stats(),
        )]
    }
}
