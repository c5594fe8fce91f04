//! Decision result model.
//!
//! Mirrors the query result envelope produced at the evaluator boundary:
//!
//! ```json
//! {"status": "OK", "result": [{"expressions": [{"value": true, "text": "data.policy.allow",
//!   "location": {"row": 1, "col": 1}}]}]}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a resolution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultStatus {
    /// A policy was found and evaluated.
    Ok,
    /// No policy was found, or evaluation failed.
    Fail,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultStatus::Ok => write!(f, "OK"),
            ResultStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// 1-based source position, used for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub row: u32,
    pub col: u32,
}

impl Location {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl Default for Location {
    fn default() -> Self {
        Self { row: 1, col: 1 }
    }
}

/// A single evaluated expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    /// Decoded value.
    pub value: serde_json::Value,
    /// Source fragment the value was produced from.
    pub text: String,
    pub location: Location,
}

/// One solution of a query: the expressions it bound.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub expressions: Vec<Expression>,
}

impl QueryResult {
    pub fn single(expression: Expression) -> Self {
        Self {
            expressions: vec![expression],
        }
    }
}

/// Results returned by a rule evaluator for one query.
///
/// An empty `result` means the query was undefined for the bound policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResults {
    pub result: Vec<QueryResult>,
}

impl QueryResults {
    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }
}

/// Structured decision returned across the resolver boundary.
///
/// Constructed per query call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub status: ResultStatus,
    #[serde(default)]
    pub result: Vec<QueryResult>,
}

impl ResultSet {
    /// Successful evaluation carrying the evaluator's results (possibly empty).
    pub fn ok(results: QueryResults) -> Self {
        Self {
            status: ResultStatus::Ok,
            result: results.result,
        }
    }

    /// Failure: no policy, or evaluation error. Always carries an empty result.
    pub fn fail() -> Self {
        Self {
            status: ResultStatus::Fail,
            result: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }

    /// True when the status is OK and at least one result was produced.
    ///
    /// Both a FAIL status and an OK status with an empty result count as
    /// undecided, and both cause ascension to the parent path.
    pub fn is_decided(&self) -> bool {
        self.is_ok() && !self.result.is_empty()
    }

    /// All expressions across all results, in order.
    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.result.iter().flat_map(|r| r.expressions.iter())
    }

    /// Value of the first expression of the first result, if any.
    pub fn first_value(&self) -> Option<&serde_json::Value> {
        self.expressions().next().map(|e| &e.value)
    }
}

/// Decision returned by a tuple-style authorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "Allow"),
            Decision::Deny => write!(f, "Deny"),
        }
    }
}
