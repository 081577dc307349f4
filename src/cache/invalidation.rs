//! Rule-driven cache invalidation
//!
//! Write paths report *what changed* as an operation type; the rule table
//! maps each operation type to the key patterns of the cached views it makes
//! stale. Adding a new cached view means adding its key to the relevant rules
//! here, not touching every write path.
//!
//! Rules are registered while the manager is still exclusively owned
//! (`&mut self`). Once it is shared behind an `Arc` the table can no longer
//! change, so lookups at request time need no lock.

use crate::cache::{key::KeyPattern, store::QueryCache};
use crate::error::{CacheError, Result};
use crate::observer::{CacheEvent, CacheObserver, TracingObserver};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Label for a domain write operation (e.g. `task_create`)
///
/// Opaque to this crate: any string the host emits is valid, and unknown
/// labels are simply ignored by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationType(String);

impl OperationType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for OperationType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperationType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OperationType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Extra facts about a write, used by conditional rules
pub type OperationContext = HashMap<String, String>;

type ContextPredicate = Arc<dyn Fn(&OperationContext) -> bool + Send + Sync>;

/// Patterns that only apply when a predicate holds for the operation context
#[derive(Clone)]
struct ConditionalPatterns {
    predicate: ContextPredicate,
    patterns: Vec<KeyPattern>,
}

/// Maps one operation type to the cache keys it makes stale
#[derive(Clone)]
pub struct InvalidationRule {
    /// Operation that triggers this rule
    pub operation_type: OperationType,

    /// Patterns invalidated every time the operation fires
    pub patterns: Vec<KeyPattern>,

    /// Documentation only
    pub description: String,

    conditional: Vec<ConditionalPatterns>,
}

impl InvalidationRule {
    /// Create a rule from textual patterns (`"key"` or `"prefix*"`)
    pub fn new<I, S>(
        operation_type: impl Into<OperationType>,
        patterns: I,
        description: impl Into<String>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self::with_patterns(
            operation_type,
            parse_patterns(patterns)?,
            description,
        ))
    }

    /// Create a rule from already-built patterns
    pub fn with_patterns(
        operation_type: impl Into<OperationType>,
        patterns: Vec<KeyPattern>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            operation_type: operation_type.into(),
            patterns,
            description: description.into(),
            conditional: Vec::new(),
        }
    }

    /// Add patterns that are invalidated only when `predicate` holds
    ///
    /// Conditional patterns never fire for an operation reported without
    /// context.
    pub fn when<F, I, S>(mut self, predicate: F, patterns: I) -> Result<Self>
    where
        F: Fn(&OperationContext) -> bool + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.conditional.push(ConditionalPatterns {
            predicate: Arc::new(predicate),
            patterns: parse_patterns(patterns)?,
        });
        Ok(self)
    }

    /// Patterns to invalidate for one occurrence of the operation
    pub fn patterns_for(&self, context: Option<&OperationContext>) -> Vec<&KeyPattern> {
        let mut selected: Vec<&KeyPattern> = self.patterns.iter().collect();

        if let Some(context) = context {
            for conditional in &self.conditional {
                if (conditional.predicate)(context) {
                    for pattern in &conditional.patterns {
                        if !selected.contains(&pattern) {
                            selected.push(pattern);
                        }
                    }
                }
            }
        }

        selected
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditional.is_empty()
    }
}

impl fmt::Debug for InvalidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationRule")
            .field("operation_type", &self.operation_type)
            .field("patterns", &self.patterns)
            .field("description", &self.description)
            .field("conditional_groups", &self.conditional.len())
            .finish()
    }
}

fn parse_patterns<I, S>(patterns: I) -> Result<Vec<KeyPattern>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| KeyPattern::parse(p.as_ref()))
        .collect()
}

/// Something whose entries can be invalidated by pattern
///
/// [`QueryCache`] is the in-process implementation; a remote cache would
/// surface its transport errors through the `Err` branch.
pub trait InvalidationTarget: Send + Sync {
    /// Remove every entry matching `pattern`, returning how many went away
    fn invalidate_pattern(
        &self,
        pattern: &KeyPattern,
    ) -> impl Future<Output = Result<usize>> + Send;
}

impl<V> InvalidationTarget for QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn invalidate_pattern(&self, pattern: &KeyPattern) -> Result<usize> {
        Ok(self.invalidate_matching(pattern).await)
    }
}

/// One pattern that failed during an invalidation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationFailure {
    pub pattern: String,
    pub error: String,
}

/// Outcome of [`AutomatedCacheManager::on_operation`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvalidationReport {
    pub operation: String,

    /// Whether a rule exists for the operation
    pub matched_rule: bool,

    pub patterns_applied: usize,
    pub keys_removed: usize,
    pub failures: Vec<InvalidationFailure>,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Counters for the invalidation engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub operations: u64,
    pub unknown_operations: u64,
    pub keys_invalidated: u64,
    pub invalidation_failures: u64,
}

#[derive(Debug, Default)]
struct ManagerCounters {
    operations: AtomicU64,
    unknown_operations: AtomicU64,
    keys_invalidated: AtomicU64,
    invalidation_failures: AtomicU64,
}

/// Evicts stale cache entries whenever a write operation is reported
pub struct AutomatedCacheManager<T> {
    target: Arc<T>,
    rules: HashMap<OperationType, InvalidationRule>,
    observer: Arc<dyn CacheObserver>,
    counters: ManagerCounters,
}

impl<T: InvalidationTarget> AutomatedCacheManager<T> {
    /// Create a manager with an empty rule table
    pub fn new(target: Arc<T>) -> Self {
        Self::with_observer(target, Arc::new(TracingObserver))
    }

    pub fn with_observer(target: Arc<T>, observer: Arc<dyn CacheObserver>) -> Self {
        Self {
            target,
            rules: HashMap::new(),
            observer,
            counters: ManagerCounters::default(),
        }
    }

    /// Register every rule in `rules`, later ones overwriting earlier ones
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = InvalidationRule>) -> Self {
        for rule in rules {
            self.add_rule(rule);
        }
        self
    }

    /// Add or overwrite the rule for `operation_type`
    pub fn register_rule<I, S>(
        &mut self,
        operation_type: impl Into<OperationType>,
        patterns: I,
        description: impl Into<String>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rule = InvalidationRule::new(operation_type, patterns, description)?;
        self.add_rule(rule);
        Ok(())
    }

    /// Add or overwrite a prebuilt rule, returning the one it replaced
    pub fn add_rule(&mut self, rule: InvalidationRule) -> Option<InvalidationRule> {
        debug!(
            "Registering invalidation rule {} -> {} patterns (conditional: {})",
            rule.operation_type,
            rule.patterns.len(),
            rule.has_conditions()
        );
        self.rules.insert(rule.operation_type.clone(), rule)
    }

    pub fn rule(&self, operation_type: &str) -> Option<&InvalidationRule> {
        self.rules.get(operation_type)
    }

    pub fn rules(&self) -> impl Iterator<Item = &InvalidationRule> {
        self.rules.values()
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Invalidate everything `operation_type` makes stale
    ///
    /// Never fails: unknown operation types are a no-op, and pattern failures
    /// are logged, counted, and reported to the observer and in the returned
    /// report, but do not abort the remaining patterns.
    pub async fn on_operation(
        &self,
        operation_type: &str,
        context: Option<&OperationContext>,
    ) -> InvalidationReport {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);

        let mut report = InvalidationReport {
            operation: operation_type.to_string(),
            ..Default::default()
        };

        let Some(rule) = self.rules.get(operation_type) else {
            self.counters
                .unknown_operations
                .fetch_add(1, Ordering::Relaxed);
            debug!("No invalidation rule for operation: {}", operation_type);
            return report;
        };
        report.matched_rule = true;

        for pattern in rule.patterns_for(context) {
            report.patterns_applied += 1;

            match self.target.invalidate_pattern(pattern).await {
                Ok(removed) => report.keys_removed += removed,
                Err(err) => {
                    let failure = InvalidationFailure {
                        pattern: pattern.to_string(),
                        error: failure_reason(&err),
                    };
                    // The observer owns the warn-level record
                    debug!(
                        "Invalidation of '{}' for operation {} failed: {}",
                        failure.pattern, operation_type, failure.error
                    );
                    self.counters
                        .invalidation_failures
                        .fetch_add(1, Ordering::Relaxed);
                    self.observer.on_event(&CacheEvent::InvalidationFailed {
                        operation: operation_type.to_string(),
                        pattern: failure.pattern.clone(),
                        error: failure.error.clone(),
                    });
                    report.failures.push(failure);
                }
            }
        }

        self.counters
            .keys_invalidated
            .fetch_add(report.keys_removed as u64, Ordering::Relaxed);
        self.observer.on_event(&CacheEvent::Invalidated {
            operation: operation_type.to_string(),
            keys_removed: report.keys_removed,
        });

        report
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            operations: self.counters.operations.load(Ordering::Relaxed),
            unknown_operations: self.counters.unknown_operations.load(Ordering::Relaxed),
            keys_invalidated: self.counters.keys_invalidated.load(Ordering::Relaxed),
            invalidation_failures: self
                .counters
                .invalidation_failures
                .load(Ordering::Relaxed),
        }
    }
}

fn failure_reason(err: &CacheError) -> String {
    match err {
        CacheError::InvalidationFailure { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}
