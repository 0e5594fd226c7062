//! HTTP rule-based, group-selecting scheduler (§4.D "Rule-table / HTTP
//! scheduler"). Wraps a [`crate::rules::Table`] and turns its verdict into
//! the `sched_vhost` contract from §6.

use crate::message::MsgEnvelope;
use crate::rules::{Table, Verdict};

pub enum VhostDecision {
    /// Resolved vhost plus the mark accumulated while reaching it (§4.D
    /// `mark(u32)` action), which the engine consults for the
    /// non-idempotent-override rule in §4.G step 2.
    Vhost(String, u32),
    Block,
    NoMatch,
}

pub struct RuleTableScheduler {
    table: Table,
}

impl RuleTableScheduler {
    pub fn new(table: Table) -> Self {
        RuleTableScheduler { table }
    }

    pub fn sched_vhost(&self, env: &MsgEnvelope) -> VhostDecision {
        match self.table.eval(env) {
            (Verdict::Vhost, mark, Some(v)) => VhostDecision::Vhost(v, mark),
            (Verdict::Block, _, _) => VhostDecision::Block,
            _ => VhostDecision::NoMatch,
        }
    }
}
