//! Rule-matching table (component E, §4.D rule-table scheduler / §4.E).
//!
//! A [`Table`] is an ordered list of [`Chain`]s; the first unnamed chain is
//! the entry point. Evaluation starts there and follows `chain(...)` actions
//! until a terminal action (`vhost`, `block`) or no rule matches (502, by
//! convention of the caller).

use std::collections::HashSet;

use crate::error::{EngineError, Result};
use crate::hash::{eq_ignore_ascii_case_chunked, starts_with_ignore_ascii_case_chunked};
use crate::message::{HeaderId, MsgEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Uri,
    Host,
    HdrHost,
    HdrConn,
    HdrReferer,
    HdrRaw,
    Mark,
    Method,
    Wildcard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Prefix,
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Vhost(String),
    Chain(String),
    Mark(u32),
    Block,
}

/// Reserved `mark(u32)` values the engine reads back off a `Vhost` verdict to
/// resolve the non-idempotent-override rule (§4.G step 2: "unless a matching
/// non-idempotent-override location rule declares it idempotent, and
/// conversely"). An operator's rule table expresses the override as an
/// ordinary `mark = 1` / `mark = 2` rule on the request's location; any other
/// mark value is left for the operator's own use and has no engine meaning.
pub const MARK_FORCE_IDEMPOTENT: u32 = 1;
pub const MARK_FORCE_NON_IDEMPOTENT: u32 = 2;

/// A single rule `(field, op, inv, arg, action)` (§3 "Rule / Chain / Table").
/// For `Field::HdrRaw`, `arg` is the literal `name: value` form; for every
/// other field it's the plain comparison literal.
#[derive(Debug, Clone)]
pub struct Rule {
    pub field: Field,
    pub op: Op,
    pub inv: bool,
    pub arg: String,
    pub action: Action,
}

impl Rule {
    /// Evaluate against a request envelope plus the mark accumulated so far.
    /// Constant time per chunk traversed (§4.E).
    fn matches(&self, env: &MsgEnvelope, mark: u32) -> bool {
        let raw = match self.field {
            Field::Wildcard => return self.inv ^ true,
            Field::Uri => Self::eval_str(self.op, &env.uri, self.arg.as_bytes()),
            Field::Host | Field::HdrHost => Self::eval_str(self.op, &env.host, self.arg.as_bytes()),
            Field::HdrConn => match env.headers.get(HeaderId::Connection) {
                Some(v) => Self::eval_str(self.op, v, self.arg.as_bytes()),
                None => false,
            },
            Field::HdrReferer => match env.headers.get(HeaderId::Referer) {
                Some(v) => Self::eval_str(self.op, v, self.arg.as_bytes()),
                None => false,
            },
            Field::HdrRaw => self.eval_hdr_raw(env),
            Field::Mark => {
                let want: u32 = self.arg.parse().unwrap_or(0);
                mark == want
            }
            Field::Method => match self.op {
                Op::Wildcard => true,
                Op::Eq => env.method.as_str().eq_ignore_ascii_case(&self.arg),
                Op::Prefix => {
                    let name = env.method.as_str();
                    name.len() >= self.arg.len() && name[..self.arg.len()].eq_ignore_ascii_case(&self.arg)
                }
            },
        };
        self.inv ^ raw
    }

    fn eval_str(op: Op, value: &[crate::message::Chunk], lit: &[u8]) -> bool {
        match op {
            Op::Eq => eq_ignore_ascii_case_chunked(value, lit),
            Op::Prefix => starts_with_ignore_ascii_case_chunked(value, lit),
            Op::Wildcard => true,
        }
    }

    /// `HDR_RAW` compares against the literal `name: value` form (§4.E).
    /// Space/tab around `:` are tolerated in the configured literal.
    fn eval_hdr_raw(&self, env: &MsgEnvelope) -> bool {
        let Some((want_name, want_value)) = self.arg.split_once(':') else {
            return false;
        };
        let want_name = want_name.trim();
        let want_value = want_value.trim();
        env.headers.raw().iter().any(|(name, value)| {
            eq_ignore_ascii_case_chunked(name, want_name.as_bytes())
                && match self.op {
                    Op::Wildcard => true,
                    Op::Eq => eq_ignore_ascii_case_chunked(value, want_value.as_bytes()),
                    Op::Prefix => starts_with_ignore_ascii_case_chunked(value, want_value.as_bytes()),
                }
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chain {
    pub name: Option<String>,
    /// Mark-rules are evaluated before match-rules (§4.D).
    pub mark_rules: Vec<Rule>,
    pub match_rules: Vec<Rule>,
}

impl Chain {
    pub fn unnamed() -> Self {
        Chain::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Chain {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Vhost,
    Block,
    NoMatch,
}

pub struct Table {
    chains: Vec<Chain>,
}

impl Table {
    /// Build a table, validating the no-cycle invariant (T1) up front so a
    /// misconfigured chain loop is rejected at load time rather than at
    /// request time.
    pub fn new(chains: Vec<Chain>) -> Result<Self> {
        let table = Table { chains };
        table.check_no_cycles()?;
        Ok(table)
    }

    fn entry(&self) -> &Chain {
        &self.chains[0]
    }

    fn find(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.name.as_deref() == Some(name))
    }

    fn check_no_cycles(&self) -> Result<()> {
        for (i, chain) in self.chains.iter().enumerate() {
            let start = chain.name.clone().unwrap_or_default();
            self.dfs_no_cycle(i, &mut HashSet::new(), &start)?;
        }
        Ok(())
    }

    fn dfs_no_cycle(&self, idx: usize, visiting: &mut HashSet<usize>, origin: &str) -> Result<()> {
        if !visiting.insert(idx) {
            return Err(EngineError::ChainCycle(origin.to_owned()));
        }
        let chain = &self.chains[idx];
        for rule in chain.mark_rules.iter().chain(chain.match_rules.iter()) {
            if let Action::Chain(target) = &rule.action {
                let target_idx = self
                    .chains
                    .iter()
                    .position(|c| c.name.as_deref() == Some(target.as_str()))
                    .ok_or_else(|| EngineError::UnknownChain(target.clone()))?;
                self.dfs_no_cycle(target_idx, visiting, origin)?;
            }
        }
        visiting.remove(&idx);
        Ok(())
    }

    /// Evaluate starting from the entry chain, following `chain(...)`
    /// redirects, returning the verdict plus the accumulated mark and,
    /// on `Vhost`, the chosen vhost name (§4.D). Within a chain, mark-rules
    /// are scanned before match-rules; a `mark(u32)` action stamps the
    /// request and evaluation continues with the rule after the one that
    /// just fired, rather than rescanning the chain from its own start —
    /// a mark rule whose predicate doesn't depend on the mark it just set
    /// would otherwise re-fire on every pass and never reach a terminal
    /// rule.
    pub fn eval(&self, env: &MsgEnvelope) -> (Verdict, u32, Option<String>) {
        let mut mark = 0u32;
        let mut chain = self.entry();
        let mut steps = 0u32;
        'chain: loop {
            let rules: Vec<&Rule> = chain.mark_rules.iter().chain(chain.match_rules.iter()).collect();
            let mut from = 0;
            loop {
                steps += 1;
                if steps > 1_000 {
                    return (Verdict::NoMatch, mark, None);
                }
                let Some(offset) = rules[from..].iter().position(|r| r.matches(env, mark)) else {
                    return (Verdict::NoMatch, mark, None);
                };
                let rule = rules[from + offset];
                from += offset + 1;

                match &rule.action {
                    Action::Mark(m) => {
                        mark = *m;
                        continue;
                    }
                    Action::Vhost(v) => return (Verdict::Vhost, mark, Some(v.clone())),
                    Action::Block => return (Verdict::Block, mark, None),
                    Action::Chain(c) => match self.find(c) {
                        Some(next_chain) => {
                            chain = next_chain;
                            continue 'chain;
                        }
                        None => return (Verdict::NoMatch, mark, None),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{single, HeaderTable, Method, Version};

    fn env(uri: &str, host: &str) -> MsgEnvelope {
        MsgEnvelope {
            method: Method::Get,
            version: Version::Http11,
            uri: single(uri),
            host: single(host),
            headers: HeaderTable::new(),
            body: vec![],
            chunked: false,
            content_length: None,
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let entry = Chain {
            name: None,
            mark_rules: vec![],
            match_rules: vec![
                Rule {
                    field: Field::Uri,
                    op: Op::Prefix,
                    inv: false,
                    arg: "/api".into(),
                    action: Action::Vhost("api".into()),
                },
                Rule {
                    field: Field::Wildcard,
                    op: Op::Wildcard,
                    inv: false,
                    arg: String::new(),
                    action: Action::Vhost("default".into()),
                },
            ],
        };
        let table = Table::new(vec![entry]).unwrap();
        let (verdict, _, vhost) = table.eval(&env("/api/v1/status", "example.com"));
        assert_eq!(verdict, Verdict::Vhost);
        assert_eq!(vhost.as_deref(), Some("api"));

        let (verdict, _, vhost) = table.eval(&env("/other", "example.com"));
        assert_eq!(verdict, Verdict::Vhost);
        assert_eq!(vhost.as_deref(), Some("default"));
    }

    #[test]
    fn no_match_falls_through_to_no_match_verdict() {
        let entry = Chain {
            name: None,
            mark_rules: vec![],
            match_rules: vec![Rule {
                field: Field::Host,
                op: Op::Eq,
                inv: false,
                arg: "only-this-host.example".into(),
                action: Action::Vhost("v".into()),
            }],
        };
        let table = Table::new(vec![entry]).unwrap();
        let (verdict, _, _) = table.eval(&env("/", "example.com"));
        assert_eq!(verdict, Verdict::NoMatch);
    }

    #[test]
    fn chain_redirect_follows_to_named_chain() {
        let entry = Chain {
            name: None,
            mark_rules: vec![],
            match_rules: vec![Rule {
                field: Field::Wildcard,
                op: Op::Wildcard,
                inv: false,
                arg: String::new(),
                action: Action::Chain("next".into()),
            }],
        };
        let next = Chain {
            name: Some("next".into()),
            mark_rules: vec![],
            match_rules: vec![Rule {
                field: Field::Wildcard,
                op: Op::Wildcard,
                inv: false,
                arg: String::new(),
                action: Action::Block,
            }],
        };
        let table = Table::new(vec![entry, next]).unwrap();
        let (verdict, _, _) = table.eval(&env("/", "example.com"));
        assert_eq!(verdict, Verdict::Block);
    }

    #[test]
    fn cyclic_chains_are_rejected_at_load_time() {
        let a = Chain {
            name: Some("a".into()),
            mark_rules: vec![],
            match_rules: vec![Rule {
                field: Field::Wildcard,
                op: Op::Wildcard,
                inv: false,
                arg: String::new(),
                action: Action::Chain("b".into()),
            }],
        };
        let b = Chain {
            name: Some("b".into()),
            mark_rules: vec![],
            match_rules: vec![Rule {
                field: Field::Wildcard,
                op: Op::Wildcard,
                inv: false,
                arg: String::new(),
                action: Action::Chain("a".into()),
            }],
        };
        assert!(matches!(Table::new(vec![a, b]), Err(EngineError::ChainCycle(_))));
    }

    #[test]
    fn inv_flips_match_result() {
        let entry = Chain {
            name: None,
            mark_rules: vec![],
            match_rules: vec![Rule {
                field: Field::Host,
                op: Op::Eq,
                inv: true,
                arg: "excluded.example".into(),
                action: Action::Block,
            }],
        };
        let table = Table::new(vec![entry]).unwrap();
        let (verdict, _, _) = table.eval(&env("/", "excluded.example"));
        assert_eq!(verdict, Verdict::NoMatch);
        let (verdict, _, _) = table.eval(&env("/", "other.example"));
        assert_eq!(verdict, Verdict::Block);
    }

    #[test]
    fn method_eq_rule_matches_by_canonical_name_not_mask_bit() {
        let entry = Chain {
            name: None,
            mark_rules: vec![],
            match_rules: vec![
                Rule {
                    field: Field::Method,
                    op: Op::Eq,
                    inv: false,
                    arg: "get".into(),
                    action: Action::Vhost("reads".into()),
                },
                Rule {
                    field: Field::Wildcard,
                    op: Op::Wildcard,
                    inv: false,
                    arg: String::new(),
                    action: Action::Vhost("writes".into()),
                },
            ],
        };
        let table = Table::new(vec![entry]).unwrap();

        let mut get_env = env("/", "example.com");
        get_env.method = Method::Get;
        let (verdict, _, vhost) = table.eval(&get_env);
        assert_eq!(verdict, Verdict::Vhost);
        assert_eq!(vhost.as_deref(), Some("reads"), "METHOD EQ rule should match case-insensitively on the canonical name");

        let mut post_env = env("/", "example.com");
        post_env.method = Method::Post;
        let (verdict, _, vhost) = table.eval(&post_env);
        assert_eq!(verdict, Verdict::Vhost);
        assert_eq!(vhost.as_deref(), Some("writes"), "a non-matching method must fall through, not match by mask bit coincidence");
    }

    #[test]
    fn method_prefix_rule_honors_op() {
        let entry = Chain {
            name: None,
            mark_rules: vec![],
            match_rules: vec![Rule {
                field: Field::Method,
                op: Op::Prefix,
                inv: false,
                arg: "P".into(),
                action: Action::Block,
            }],
        };
        let table = Table::new(vec![entry]).unwrap();

        let mut patch_env = env("/", "example.com");
        patch_env.method = Method::Patch;
        let (verdict, _, _) = table.eval(&patch_env);
        assert_eq!(verdict, Verdict::Block);

        let mut get_env = env("/", "example.com");
        get_env.method = Method::Get;
        let (verdict, _, _) = table.eval(&get_env);
        assert_eq!(verdict, Verdict::NoMatch);
    }
}
