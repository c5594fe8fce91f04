//! PAPL Policy - Path-Inherited Policy Resolution
//!
//! Resolves decisions for resources addressed by path-like keys with
//! filesystem-ACL-style inheritance: a path with no policy of its own defers
//! to the nearest ancestor that has one.
//!
//! - [`FolderPolicy`]: rule-style evaluation with fold/ascend fallback
//! - [`FolderAuthorizer`]: tuple-style (principal, action, resource) decisions
//! - [`PolicyEngineCache`]: bounded LRU of compiled evaluators per path
//! - [`import_bundle`]: load a directory of policy files into a store
//!
//! Policy languages themselves are external; they plug in through the
//! traits in [`evaluator`].

pub mod authz;
pub mod bundle;
pub mod cache;
pub mod evaluator;
pub mod handle;
pub mod resolver;

pub use authz::{AuthzRequest, FolderAuthorizer};
pub use bundle::import_bundle;
pub use cache::{CacheStats, PolicyEngineCache};
pub use evaluator::{EvaluatorFactory, PolicyEvaluator, RuleEvaluator, TupleAuthorizer};
pub use handle::EvaluatorHandle;
pub use resolver::{FolderPolicy, Resolution};
