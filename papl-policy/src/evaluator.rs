//! Evaluator capability traits.
//!
//! Policy languages are not implemented in this workspace. The resolver only
//! sequences calls on these traits and interprets what comes back: the
//! OK/FAIL envelope and whether the result is empty for rule-style
//! evaluators, or an allow/deny [`Decision`] for tuple-style authorizers.

use papl_core::{Decision, PaplResult, QueryResults};

/// Anything the evaluator cache can own.
///
/// # Implementation Requirements
///
/// - `release()` frees runtime resources held by the evaluator; it is called
///   exactly once by [`EvaluatorHandle`](crate::EvaluatorHandle) before the
///   evaluator is dropped
/// - Implementations must be `Send` so a cached evaluator can be used from
///   whichever thread hits the cache
pub trait PolicyEvaluator: Send {
    /// Free runtime resources. The default does nothing.
    fn release(&mut self) {}
}

/// Rule-evaluation style capability (package/rule queries over JSON input).
pub trait RuleEvaluator: PolicyEvaluator {
    /// Compile `text` as the policy located at `path`.
    fn add_policy(&mut self, path: &str, text: &str) -> PaplResult<()>;

    /// Merge a JSON document into the shared data tree.
    fn add_data_json(&mut self, data: &str) -> PaplResult<()>;

    /// Drop all shared data.
    fn clear_data(&mut self);

    /// Replace the per-call input document.
    fn set_input_json(&mut self, input: &str) -> PaplResult<()>;

    /// Evaluate a query such as `data.policy.allow`.
    ///
    /// An undefined rule yields an empty [`QueryResults`], not an error.
    fn eval_query(&mut self, query: &str) -> PaplResult<QueryResults>;
}

/// Authorization-tuple style capability (principal, action, resource).
pub trait TupleAuthorizer: PolicyEvaluator {
    /// Add policy statements to the policy set.
    fn add_policy(&mut self, text: &str) -> PaplResult<()>;

    /// Replace the entity store with the entities in `json`.
    fn add_entities_json(&mut self, json: &str) -> PaplResult<()>;

    /// Decide a single request. `context_json` may be empty.
    fn authorize(
        &mut self,
        principal: &str,
        action: &str,
        resource: &str,
        context_json: &str,
    ) -> PaplResult<Decision>;
}

/// Builds fresh evaluators on cache misses.
pub trait EvaluatorFactory: Send + Sync {
    type Evaluator: PolicyEvaluator;

    fn create(&self) -> PaplResult<Self::Evaluator>;
}
