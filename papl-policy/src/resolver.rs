//! Path-inherited rule evaluation.
//!
//! [`FolderPolicy`] evaluates a query against the policy stored at a path and,
//! when that path has no policy or the query yields nothing, retries at each
//! ancestor in turn (`a/b/c.txt` -> `a/b/` -> `a/`). The first decided result
//! wins; if no ancestor decides, the result is `FAIL` with an empty result.
//!
//! An `OK` result whose query produced no values is treated exactly like a
//! missing policy: the walk continues upward.

use std::sync::Arc;

use papl_core::{
    ancestors, PaplResult, PolicyCacheConfig, QueryResults, ResultSet, SaveStatus, Stamp,
};
use papl_storage::VersionedStore;

use crate::cache::{CacheStats, PolicyEngineCache};
use crate::evaluator::{EvaluatorFactory, RuleEvaluator};

/// Outcome of a fold evaluation plus the ancestor that decided it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub result: ResultSet,
    /// Path whose policy produced `result`; `None` when nothing decided.
    pub decided_at: Option<String>,
}

impl Resolution {
    fn undecided() -> Self {
        Self {
            result: ResultSet::fail(),
            decided_at: None,
        }
    }
}

/// Rule-style resolver over a store of per-path policy text.
pub struct FolderPolicy<F>
where
    F: EvaluatorFactory,
    F::Evaluator: RuleEvaluator,
{
    cache: PolicyEngineCache<F>,
}

impl<F> FolderPolicy<F>
where
    F: EvaluatorFactory,
    F::Evaluator: RuleEvaluator,
{
    /// Create a resolver with the default cache capacity.
    pub fn new(store: Arc<dyn VersionedStore>, factory: F) -> Self {
        Self::from_config(store, factory, &PolicyCacheConfig::default())
    }

    pub fn with_capacity(store: Arc<dyn VersionedStore>, factory: F, capacity: usize) -> Self {
        Self {
            cache: PolicyEngineCache::new(store, factory, capacity),
        }
    }

    pub fn from_config(
        store: Arc<dyn VersionedStore>,
        factory: F,
        config: &PolicyCacheConfig,
    ) -> Self {
        Self {
            cache: PolicyEngineCache::from_config(store, factory, config),
        }
    }

    pub fn cache(&self) -> &PolicyEngineCache<F> {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Store policy text at `path`.
    pub fn prepare(&self, path: &str, policy: &str, version: &str, stamp: Stamp) -> SaveStatus {
        self.cache.store().save(path, policy, version, stamp)
    }

    /// Store a data document at `key`.
    pub fn prepare_data(&self, key: &str, data: &str, version: &str, stamp: Stamp) -> SaveStatus {
        self.cache.store().save(key, data, version, stamp)
    }

    /// Evaluate `query` against the policy at exactly `path`.
    ///
    /// `data` is loaded into the evaluator only when the path is first
    /// cached; later calls reuse whatever data the cached evaluator holds.
    /// A missing policy, a policy that fails to compile, and a failing query
    /// all yield `FAIL`.
    pub fn eval(&self, query: &str, path: &str, input: &str, data: Option<&str>) -> ResultSet {
        match self.try_eval(query, path, input, data) {
            Ok(Some(results)) => ResultSet::ok(results),
            Ok(None) => ResultSet::fail(),
            Err(e) => {
                tracing::warn!(path, query, error = %e, "policy evaluation failed");
                ResultSet::fail()
            }
        }
    }

    fn try_eval(
        &self,
        query: &str,
        path: &str,
        input: &str,
        data: Option<&str>,
    ) -> PaplResult<Option<QueryResults>> {
        let handle = self.cache.get_or_load(path, |evaluator, policy| {
            evaluator.add_policy(path, policy)?;
            evaluator.clear_data();
            if let Some(data) = data.filter(|d| !d.is_empty()) {
                evaluator.add_data_json(data)?;
            }
            Ok(())
        })?;

        let Some(handle) = handle else {
            return Ok(None);
        };

        handle
            .with(|evaluator| {
                evaluator.set_input_json(input)?;
                evaluator.eval_query(query)
            })
            .map(Some)
    }

    /// Evaluate at `path`, ascending through its ancestors until a result
    /// is decided.
    pub fn fold_eval(&self, query: &str, path: &str, input: &str, data: Option<&str>) -> ResultSet {
        self.resolve(query, path, input, data).result
    }

    /// Like [`fold_eval`](Self::fold_eval), also reporting which path decided.
    pub fn resolve(&self, query: &str, path: &str, input: &str, data: Option<&str>) -> Resolution {
        for candidate in ancestors(path) {
            let result = self.eval(query, &candidate, input, data);
            if result.is_decided() {
                tracing::debug!(path, decided_at = %candidate, "policy decided");
                return Resolution {
                    result,
                    decided_at: Some(candidate),
                };
            }
            tracing::debug!(path = %candidate, status = %result.status, "undecided, ascending");
        }

        tracing::debug!(path, query, "no ancestor decided");
        Resolution::undecided()
    }
}
