//! PAPL Test Utilities
//!
//! Centralized test infrastructure for the PAPL workspace:
//! - Mock evaluators implementing the evaluator capability traits
//! - Proptest generators for paths, stamps, and store operations
//! - Store fixtures for both backends
//! - Custom assertions for result envelopes
//!
//! The mock evaluators understand a deliberately tiny statement form. They
//! exist to exercise caching and path resolution, not to model a policy
//! language.

pub use papl_core::{
    Decision, EvalError, Expression, Location, PaplError, PaplResult, QueryResult, QueryResults,
    ResultSet, ResultStatus, Stamp,
};
pub use papl_policy::{
    EvaluatorFactory, FolderAuthorizer, FolderPolicy, PolicyEvaluator, RuleEvaluator,
    TupleAuthorizer,
};
pub use papl_storage::{LmdbStore, MemoryStore, VersionedStore};

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

// ============================================================================
// EVALUATOR COUNTERS
// ============================================================================

/// Creation and release counts shared by a mock factory and its evaluators.
#[derive(Debug, Default)]
pub struct EvaluatorCounters {
    created: AtomicUsize,
    released: AtomicUsize,
}

impl EvaluatorCounters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Evaluators created and not yet released.
    pub fn live(&self) -> usize {
        self.created().saturating_sub(self.released())
    }

    fn record_created(&self) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn record_released(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// MOCK RULE EVALUATOR
// ============================================================================

/// Right-hand side of a mock rule.
#[derive(Debug, Clone, PartialEq)]
enum RuleExpr {
    Literal(Value),
    Input(Vec<String>),
    Data(Vec<String>),
}

#[derive(Debug, Clone, Default)]
struct RuleDef {
    body: Option<(RuleExpr, u32)>,
    default: Option<(Value, u32)>,
}

#[derive(Debug, Clone)]
struct MockModule {
    path: String,
    package: String,
    rules: BTreeMap<String, RuleDef>,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid_policy(path: &str, row: usize, reason: impl std::fmt::Display) -> PaplError {
    EvalError::InvalidPolicy {
        path: path.to_string(),
        reason: format!("line {}: {}", row, reason),
    }
    .into()
}

fn parse_expr(path: &str, row: usize, raw: &str) -> PaplResult<RuleExpr> {
    let raw = raw.trim();
    let reference = |root: &str| -> Option<Vec<String>> {
        if raw == root {
            Some(Vec::new())
        } else {
            raw.strip_prefix(root)?
                .strip_prefix('.')
                .map(|rest| rest.split('.').map(str::to_string).collect())
        }
    };

    if let Some(segments) = reference("input") {
        return Ok(RuleExpr::Input(segments));
    }
    if let Some(segments) = reference("data") {
        return Ok(RuleExpr::Data(segments));
    }
    serde_json::from_str(raw)
        .map(RuleExpr::Literal)
        .map_err(|e| invalid_policy(path, row, format!("bad expression '{}': {}", raw, e)))
}

/// Parse the mock rule form:
///
/// ```text
/// package policy
/// default allow := false
/// allow := input.user.admin
/// list := ["a", "b"]
/// ```
fn parse_module(path: &str, text: &str) -> PaplResult<MockModule> {
    let mut package = None;
    let mut rules: BTreeMap<String, RuleDef> = BTreeMap::new();

    for (idx, line) in text.lines().enumerate() {
        let row = idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix("package ") {
            let name = name.trim();
            if package.is_some() || !name.split('.').all(is_identifier) {
                return Err(invalid_policy(path, row, "bad package declaration"));
            }
            package = Some(name.to_string());
            continue;
        }

        if package.is_none() {
            return Err(invalid_policy(path, row, "rule before package declaration"));
        }

        let (is_default, rest) = match line.strip_prefix("default ") {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let Some((name, expr)) = rest.split_once(":=") else {
            return Err(invalid_policy(path, row, format!("unrecognised statement '{}'", line)));
        };
        let name = name.trim();
        if !is_identifier(name) {
            return Err(invalid_policy(path, row, format!("bad rule name '{}'", name)));
        }

        let expr = parse_expr(path, row, expr)?;
        let def = rules.entry(name.to_string()).or_default();
        let row = row as u32;
        if is_default {
            let RuleExpr::Literal(value) = expr else {
                return Err(invalid_policy(path, row as usize, "default must be a literal"));
            };
            def.default = Some((value, row));
        } else {
            def.body = Some((expr, row));
        }
    }

    let package = package.ok_or_else(|| invalid_policy(path, 1, "missing package declaration"))?;
    Ok(MockModule {
        path: path.to_string(),
        package,
        rules,
    })
}

fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
        .filter(|v| !v.is_null())
}

fn merge_json(target: &mut Value, incoming: Value) {
    match incoming {
        Value::Object(incoming) => match target.as_object_mut() {
            Some(existing) => {
                for (key, value) in incoming {
                    merge_json(existing.entry(key).or_insert(Value::Null), value);
                }
            }
            None => *target = Value::Object(incoming),
        },
        other => *target = other,
    }
}

fn parse_json(what: &str, raw: &str) -> PaplResult<Value> {
    serde_json::from_str(raw).map_err(|e| {
        EvalError::InvalidJson {
            what: what.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Rule-style mock evaluator.
///
/// A query `data.<package>.<rule>` yields the rule's value, falling back to
/// its default when the body refers to missing input or data. Unknown
/// packages and rules yield an empty result, never an error.
#[derive(Debug)]
pub struct MockRuleEvaluator {
    modules: Vec<MockModule>,
    data: Value,
    input: Value,
    counters: Arc<EvaluatorCounters>,
}

impl MockRuleEvaluator {
    pub fn new() -> Self {
        Self::with_counters(Arc::new(EvaluatorCounters::default()))
    }

    fn with_counters(counters: Arc<EvaluatorCounters>) -> Self {
        counters.record_created();
        Self {
            modules: Vec::new(),
            data: Value::Object(Map::new()),
            input: Value::Null,
            counters,
        }
    }

    /// Paths of every loaded policy, in load order.
    pub fn policy_paths(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.path.as_str()).collect()
    }

    fn rule_value(&self, def: &RuleDef) -> Option<(Value, u32)> {
        let from_body = def.body.as_ref().and_then(|(expr, row)| {
            let value = match expr {
                RuleExpr::Literal(value) => Some(value.clone()),
                RuleExpr::Input(segments) => lookup(&self.input, segments).cloned(),
                RuleExpr::Data(segments) => lookup(&self.data, segments).cloned(),
            };
            value.map(|v| (v, *row))
        });
        from_body.or_else(|| def.default.clone())
    }
}

impl Default for MockRuleEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEvaluator for MockRuleEvaluator {
    fn release(&mut self) {
        self.counters.record_released();
    }
}

impl RuleEvaluator for MockRuleEvaluator {
    fn add_policy(&mut self, path: &str, text: &str) -> PaplResult<()> {
        let module = parse_module(path, text)?;
        self.modules.retain(|m| m.path != path);
        self.modules.push(module);
        Ok(())
    }

    fn add_data_json(&mut self, data: &str) -> PaplResult<()> {
        let incoming = parse_json("data", data)?;
        if !incoming.is_object() {
            return Err(EvalError::InvalidJson {
                what: "data".to_string(),
                reason: "data document must be an object".to_string(),
            }
            .into());
        }
        merge_json(&mut self.data, incoming);
        Ok(())
    }

    fn clear_data(&mut self) {
        self.data = Value::Object(Map::new());
    }

    fn set_input_json(&mut self, input: &str) -> PaplResult<()> {
        self.input = if input.trim().is_empty() {
            Value::Null
        } else {
            parse_json("input", input)?
        };
        Ok(())
    }

    fn eval_query(&mut self, query: &str) -> PaplResult<QueryResults> {
        let Some(reference) = query.trim().strip_prefix("data.") else {
            return Err(EvalError::InvalidQuery {
                query: query.to_string(),
                reason: "query must start with 'data.'".to_string(),
            }
            .into());
        };

        let found = self.modules.iter().rev().find_map(|module| {
            let rule = reference.strip_prefix(module.package.as_str())?.strip_prefix('.')?;
            self.rule_value(module.rules.get(rule)?)
        });

        Ok(match found {
            Some((value, row)) => QueryResults {
                result: vec![QueryResult::single(Expression {
                    value,
                    text: query.to_string(),
                    location: Location::new(row, 1),
                })],
            },
            None => QueryResults::default(),
        })
    }
}

/// Factory for [`MockRuleEvaluator`]s sharing one set of counters.
#[derive(Debug, Clone, Default)]
pub struct MockRuleEvaluatorFactory {
    counters: Arc<EvaluatorCounters>,
    fail_create: bool,
}

impl MockRuleEvaluatorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose `create` always fails.
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub fn counters(&self) -> Arc<EvaluatorCounters> {
        Arc::clone(&self.counters)
    }
}

impl EvaluatorFactory for MockRuleEvaluatorFactory {
    type Evaluator = MockRuleEvaluator;

    fn create(&self) -> PaplResult<MockRuleEvaluator> {
        if self.fail_create {
            return Err(EvalError::InvalidPolicy {
                path: String::new(),
                reason: "evaluator runtime unavailable".to_string(),
            }
            .into());
        }
        Ok(MockRuleEvaluator::with_counters(Arc::clone(&self.counters)))
    }
}

// ============================================================================
// MOCK TUPLE AUTHORIZER
// ============================================================================

const UID_PATTERN: &str = r#"^[A-Za-z_][A-Za-z0-9_]*(?:::[A-Za-z_][A-Za-z0-9_]*)*::"[^"]*"$"#;
const STATEMENT_PATTERN: &str = r"^(permit|forbid)\s*\(([^)]*)\)$";
const SCOPE_PATTERN: &str = r"^(principal|action|resource)(?:\s*==\s*(.+))?$";

fn uid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(UID_PATTERN).expect("uid pattern is valid"))
}

fn statement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(STATEMENT_PATTERN).expect("statement pattern is valid"))
}

fn scope_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SCOPE_PATTERN).expect("scope pattern is valid"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Permit,
    Forbid,
}

/// One `permit(...)` or `forbid(...)` statement. `None` matches anything.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Statement {
    effect: Effect,
    principal: Option<String>,
    action: Option<String>,
    resource: Option<String>,
}

impl Statement {
    fn matches(&self, principal: &str, action: &str, resource: &str) -> bool {
        let slot = |want: &Option<String>, got: &str| match want {
            Some(w) => w == got,
            None => true,
        };
        slot(&self.principal, principal) && slot(&self.action, action) && slot(&self.resource, resource)
    }
}

fn policy_error(reason: impl Into<String>) -> PaplError {
    EvalError::InvalidPolicy {
        path: String::new(),
        reason: reason.into(),
    }
    .into()
}

fn parse_statements(text: &str) -> PaplResult<Vec<Statement>> {
    let stripped: String = text
        .lines()
        .map(|line| line.split("//").next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join(" ");

    let mut statements = Vec::new();
    for chunk in stripped.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        let caps = statement_regex()
            .captures(chunk)
            .ok_or_else(|| policy_error(format!("unrecognised statement '{}'", chunk)))?;
        let effect = if &caps[1] == "permit" {
            Effect::Permit
        } else {
            Effect::Forbid
        };

        let parts: Vec<&str> = caps[2].split(',').map(str::trim).collect();
        let [principal, action, resource] = parts.as_slice() else {
            return Err(policy_error(format!("expected three scope clauses in '{}'", chunk)));
        };

        statements.push(Statement {
            effect,
            principal: parse_scope("principal", principal)?,
            action: parse_scope("action", action)?,
            resource: parse_scope("resource", resource)?,
        });
    }
    Ok(statements)
}

fn parse_scope(expected: &str, clause: &str) -> PaplResult<Option<String>> {
    let caps = scope_regex()
        .captures(clause)
        .filter(|caps| &caps[1] == expected)
        .ok_or_else(|| policy_error(format!("expected {} clause, got '{}'", expected, clause)))?;
    match caps.get(2) {
        None => Ok(None),
        Some(uid) => {
            let uid = uid.as_str().trim();
            if !uid_regex().is_match(uid) {
                return Err(policy_error(format!("bad entity uid '{}'", uid)));
            }
            Ok(Some(uid.to_string()))
        }
    }
}

fn parse_uid(what: &str, raw: &str) -> PaplResult<String> {
    let uid = raw.trim();
    if uid_regex().is_match(uid) {
        Ok(uid.to_string())
    } else {
        Err(EvalError::InvalidRequest {
            reason: format!("bad {} uid '{}'", what, raw),
        }
        .into())
    }
}

/// Tuple-style mock authorizer.
///
/// Any matching `forbid` denies; otherwise any matching `permit` allows;
/// otherwise the request is denied.
#[derive(Debug)]
pub struct MockTupleAuthorizer {
    statements: Vec<Statement>,
    entities: Vec<Value>,
    counters: Arc<EvaluatorCounters>,
}

impl MockTupleAuthorizer {
    pub fn new() -> Self {
        Self::with_counters(Arc::new(EvaluatorCounters::default()))
    }

    fn with_counters(counters: Arc<EvaluatorCounters>) -> Self {
        counters.record_created();
        Self {
            statements: Vec::new(),
            entities: Vec::new(),
            counters,
        }
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

impl Default for MockTupleAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEvaluator for MockTupleAuthorizer {
    fn release(&mut self) {
        self.counters.record_released();
    }
}

impl TupleAuthorizer for MockTupleAuthorizer {
    fn add_policy(&mut self, text: &str) -> PaplResult<()> {
        let mut parsed = parse_statements(text)?;
        self.statements.append(&mut parsed);
        Ok(())
    }

    fn add_entities_json(&mut self, json: &str) -> PaplResult<()> {
        match parse_json("entities", json)? {
            Value::Array(entities) => {
                self.entities = entities;
                Ok(())
            }
            _ => Err(EvalError::InvalidJson {
                what: "entities".to_string(),
                reason: "entities document must be an array".to_string(),
            }
            .into()),
        }
    }

    fn authorize(
        &mut self,
        principal: &str,
        action: &str,
        resource: &str,
        context_json: &str,
    ) -> PaplResult<Decision> {
        let principal = parse_uid("principal", principal)?;
        let action = parse_uid("action", action)?;
        let resource = parse_uid("resource", resource)?;
        if !context_json.trim().is_empty() && !parse_json("context", context_json)?.is_object() {
            return Err(EvalError::InvalidJson {
                what: "context".to_string(),
                reason: "context must be an object".to_string(),
            }
            .into());
        }

        let matching = |effect: Effect| {
            self.statements
                .iter()
                .any(|s| s.effect == effect && s.matches(&principal, &action, &resource))
        };

        Ok(if matching(Effect::Forbid) {
            Decision::Deny
        } else if matching(Effect::Permit) {
            Decision::Allow
        } else {
            Decision::Deny
        })
    }
}

/// Factory for [`MockTupleAuthorizer`]s sharing one set of counters.
#[derive(Debug, Clone, Default)]
pub struct MockTupleAuthorizerFactory {
    counters: Arc<EvaluatorCounters>,
}

impl MockTupleAuthorizerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> Arc<EvaluatorCounters> {
        Arc::clone(&self.counters)
    }
}

impl EvaluatorFactory for MockTupleAuthorizerFactory {
    type Evaluator = MockTupleAuthorizer;

    fn create(&self) -> PaplResult<MockTupleAuthorizer> {
        Ok(MockTupleAuthorizer::with_counters(Arc::clone(&self.counters)))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for paths, stamps, and store operations.

    use super::*;
    use proptest::prelude::*;

    /// A single path segment.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{0,5}(\\.[a-z]{1,3})?"
    }

    /// A relative path of 1-5 segments, with or without a trailing `/`.
    pub fn arb_path() -> impl Strategy<Value = String> {
        (prop::collection::vec(arb_segment(), 1..=5), any::<bool>()).prop_map(
            |(segments, trailing)| {
                let mut path = segments.join("/");
                if trailing {
                    path.push('/');
                }
                path
            },
        )
    }

    pub fn arb_stamp() -> impl Strategy<Value = Stamp> {
        -1_000i64..1_000
    }

    /// A save operation: `(key, value, version, stamp)`.
    pub fn arb_save() -> impl Strategy<Value = (String, String, String, Stamp)> {
        ("[a-f]{1,3}", "[a-z]{0,8}", "v[0-9]{1,2}", arb_stamp())
    }

    pub fn arb_saves(max: usize) -> impl Strategy<Value = Vec<(String, String, String, Stamp)>> {
        prop::collection::vec(arb_save(), 0..max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores, policies, and resolvers for common scenarios.

    use super::*;
    use tempfile::TempDir;

    /// `allow` is true unless overridden.
    pub const ALLOW_TRUE: &str = "package policy\ndefault allow := true\n";

    /// `allow` is false unless overridden.
    pub const ALLOW_FALSE: &str = "package policy\ndefault allow := false\n";

    /// Defines only `list`.
    pub const LIST_ONLY: &str = "package policy\nlist := [\"report.pdf\", \"notes.txt\"]\n";

    /// `allow` follows `input.user.admin`, defaulting to false.
    pub const ADMIN_ONLY: &str =
        "package policy\ndefault allow := false\nallow := input.user.admin\n";

    pub const ALICE_VIEWS: &str =
        "permit(principal == User::\"alice\", action == Action::\"view\", resource);";

    pub const NOBODY_DELETES: &str =
        "permit(principal, action, resource);\nforbid(principal, action == Action::\"delete\", resource);";

    /// A store backend under test, keeping its directory alive.
    pub struct BackendFixture {
        pub name: &'static str,
        pub store: Arc<dyn VersionedStore>,
        _dir: Option<TempDir>,
    }

    pub fn memory_store() -> Arc<dyn VersionedStore> {
        Arc::new(MemoryStore::new())
    }

    /// An LMDB store in a fresh temporary directory.
    pub fn lmdb_store() -> BackendFixture {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(dir.path(), 16).expect("lmdb store should open");
        BackendFixture {
            name: "lmdb",
            store: Arc::new(store),
            _dir: Some(dir),
        }
    }

    /// One fresh store per backend.
    pub fn all_backends() -> Vec<BackendFixture> {
        vec![
            BackendFixture {
                name: "memory",
                store: memory_store(),
                _dir: None,
            },
            lmdb_store(),
        ]
    }

    /// A rule resolver over `store` plus the counters of its factory.
    pub fn folder_policy(
        store: Arc<dyn VersionedStore>,
        capacity: usize,
    ) -> (FolderPolicy<MockRuleEvaluatorFactory>, Arc<EvaluatorCounters>) {
        let factory = MockRuleEvaluatorFactory::new();
        let counters = factory.counters();
        (FolderPolicy::with_capacity(store, factory, capacity), counters)
    }

    /// A tuple authorizer over `store` plus the counters of its factory.
    pub fn folder_authorizer(
        store: Arc<dyn VersionedStore>,
    ) -> (FolderAuthorizer<MockTupleAuthorizerFactory>, Arc<EvaluatorCounters>) {
        let factory = MockTupleAuthorizerFactory::new();
        let counters = factory.counters();
        (FolderAuthorizer::new(store, factory), counters)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over result envelopes.

    use super::*;

    /// Assert that `rs` is decided and its first value equals `expected`.
    #[track_caller]
    pub fn assert_decided_value(rs: &ResultSet, expected: &Value) {
        assert!(rs.is_decided(), "Expected a decided result, got: {:?}", rs);
        assert_eq!(rs.first_value(), Some(expected), "Wrong decided value in {:?}", rs);
    }

    /// Assert that `rs` is the terminal failure envelope.
    #[track_caller]
    pub fn assert_failed(rs: &ResultSet) {
        assert_eq!(rs.status, ResultStatus::Fail, "Expected FAIL, got: {:?}", rs);
        assert!(rs.result.is_empty(), "FAIL must carry no results: {:?}", rs);
    }

    /// Assert that a PaplResult is an evaluator-boundary error.
    #[track_caller]
    pub fn assert_eval_error<T: std::fmt::Debug>(result: &PaplResult<T>) {
        match result {
            Err(PaplError::Eval(_)) => {}
            other => panic!("Expected Eval error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
