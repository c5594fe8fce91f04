//! Path-inherited tuple authorization.
//!
//! The nearest path with a policy decides. Unlike rule evaluation, a deny is
//! a decision: the walk only ascends past paths that have no usable policy.

use std::sync::Arc;

use papl_core::{ancestors, Decision, PaplResult, PolicyCacheConfig, SaveStatus, Stamp};
use papl_storage::VersionedStore;

use crate::cache::{CacheStats, PolicyEngineCache};
use crate::evaluator::{EvaluatorFactory, TupleAuthorizer};
use crate::handle::EvaluatorHandle;

/// Authorization request in principal/action/resource form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthzRequest<'a> {
    pub principal: &'a str,
    pub action: &'a str,
    pub resource: &'a str,
    /// JSON context document; may be empty.
    pub context: &'a str,
}

/// Tuple-style resolver over a store of per-path policy text.
pub struct FolderAuthorizer<F>
where
    F: EvaluatorFactory,
    F::Evaluator: TupleAuthorizer,
{
    cache: PolicyEngineCache<F>,
    entities: Option<String>,
}

impl<F> FolderAuthorizer<F>
where
    F: EvaluatorFactory,
    F::Evaluator: TupleAuthorizer,
{
    pub fn new(store: Arc<dyn VersionedStore>, factory: F) -> Self {
        Self::from_config(store, factory, &PolicyCacheConfig::default())
    }

    pub fn from_config(
        store: Arc<dyn VersionedStore>,
        factory: F,
        config: &PolicyCacheConfig,
    ) -> Self {
        Self {
            cache: PolicyEngineCache::from_config(store, factory, config),
            entities: None,
        }
    }

    /// Entities JSON loaded into every evaluator built after this call.
    pub fn with_entities(mut self, entities_json: impl Into<String>) -> Self {
        self.entities = Some(entities_json.into());
        self
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

    /// Decide `request` using the nearest ancestor of `path` that has a policy.
    ///
    /// Returns `None` when no ancestor has a usable policy. A request the
    /// deciding policy cannot evaluate is denied.
    pub fn authorize(&self, path: &str, request: AuthzRequest<'_>) -> Option<Decision> {
        self.resolve(path, request).map(|(decision, _)| decision)
    }

    /// Like [`authorize`](Self::authorize), also reporting which path decided.
    pub fn resolve(&self, path: &str, request: AuthzRequest<'_>) -> Option<(Decision, String)> {
        for candidate in ancestors(path) {
            let handle = match self.load(&candidate) {
                Ok(Some(handle)) => handle,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %candidate, error = %e, "policy failed to load, ascending");
                    continue;
                }
            };

            let decision = handle
                .with(|authorizer| {
                    authorizer.authorize(
                        request.principal,
                        request.action,
                        request.resource,
                        request.context,
                    )
                })
                .unwrap_or_else(|e| {
                    tracing::warn!(path = %candidate, error = %e, "authorization request failed");
                    Decision::Deny
                });

            tracing::debug!(path, decided_at = %candidate, %decision, "authorization decided");
            return Some((decision, candidate));
        }

        tracing::debug!(path, "no policy on any ancestor");
        None
    }

    fn load(&self, path: &str) -> PaplResult<Option<Arc<EvaluatorHandle<F::Evaluator>>>> {
        let entities = self.entities.as_deref();
        self.cache.get_or_load(path, |authorizer, policy| {
            authorizer.add_policy(policy)?;
            if let Some(entities) = entities.filter(|e| !e.is_empty()) {
                authorizer.add_entities_json(entities)?;
            }
            Ok(())
        })
    }
}
