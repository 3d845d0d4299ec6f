//! # `RulesEvaluator` collaborator
//!
//! The compiled rules DSL that governs per-collection read/write
//! permissions is out of scope for this workspace; callers that need
//! authorization decisions depend on this trait rather than a concrete
//! rule engine.

/// The resource a rule is evaluated against: a collection and, where
/// applicable, the specific document within it.
#[derive(Debug, Clone)]
pub struct RuleResource {
    pub collection: String,
    pub doc_id: Option<String>,
}

/// The operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    Read,
    Create,
    Update,
    Delete,
}

/// The authenticated principal a rule is evaluated on behalf of.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub role: Option<String>,
}

/// Evaluates whether an operation on a resource is permitted for a given
/// auth context. Real rule evaluation (the compiled DSL) lives outside
/// this workspace; this trait is the seam it would plug into.
pub trait RulesEvaluator: Send + Sync {
    fn evaluate(&self, resource: &RuleResource, op: RuleOp, ctx: &AuthContext) -> bool;
}

/// A trivial evaluator that permits everything. Used in tests that need a
/// `RulesEvaluator` but aren't exercising authorization semantics.
pub struct AllowAll;

impl RulesEvaluator for AllowAll {
    fn evaluate(&self, _resource: &RuleResource, _op: RuleOp, _ctx: &AuthContext) -> bool {
        true
    }
}
