//! Scheduler registry (component D, §4.D). Keeps an ordered list of
//! connection-selecting strategies per server group and the one
//! group-selecting rule-table scheduler; lookup is a one-pass scan.

pub mod rendezvous;
pub mod round_robin;
pub mod rule_table;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::{SchedKind, ServerGroupPolicy};
use crate::error::{EngineError, Result};
use crate::message::Request;
use crate::srvconn::SrvConn;
use rendezvous::Rendezvous;
use round_robin::RoundRobin;
pub use rule_table::{RuleTableScheduler, VhostDecision};

struct Group {
    policy: ServerGroupPolicy,
    conns: Vec<Arc<SrvConn>>,
    round_robin: RoundRobin,
    rendezvous: Rendezvous,
}

/// Read-mostly registry (§5 "the scheduler registry uses a read-mostly
/// lock"): connection selection takes a read lock; `add_group`/`del_group`
/// take the single writer lock.
pub struct Registry {
    groups: RwLock<HashMap<String, Group>>,
    rule_table: Option<RuleTableScheduler>,
}

impl Registry {
    pub fn new(rule_table: Option<RuleTableScheduler>) -> Self {
        Registry {
            groups: RwLock::new(HashMap::new()),
            rule_table,
        }
    }

    pub fn add_group(&self, name: impl Into<String>, policy: ServerGroupPolicy) -> Result<()> {
        let name = name.into();
        let mut groups = self.groups.write().unwrap();
        if groups.contains_key(&name) {
            return Err(EngineError::DuplicateGroup(name));
        }
        groups.insert(
            name,
            Group {
                policy,
                conns: Vec::new(),
                round_robin: RoundRobin::new(),
                rendezvous: Rendezvous::new(),
            },
        );
        Ok(())
    }

    pub fn del_group(&self, name: &str) -> Result<()> {
        let mut groups = self.groups.write().unwrap();
        groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::UnknownGroup(name.to_owned()))
    }

    pub fn add_conn(&self, group: &str, conn: Arc<SrvConn>) -> Result<()> {
        let mut groups = self.groups.write().unwrap();
        let g = groups
            .get_mut(group)
            .ok_or_else(|| EngineError::UnknownGroup(group.to_owned()))?;
        g.conns.push(conn);
        Ok(())
    }

    /// §6 `sched_vhost(msg) -> (vhost | block | none)`.
    pub fn sched_vhost(&self, env: &crate::message::MsgEnvelope) -> VhostDecision {
        match &self.rule_table {
            Some(rt) => rt.sched_vhost(env),
            None => VhostDecision::NoMatch,
        }
    }

    /// §6 `sched_sg_conn(msg, group) -> conn | none`: pick a connection
    /// within a named server group, per the group's configured strategy.
    pub fn sched_sg_conn(&self, group: &str, req: &Request) -> Option<Arc<SrvConn>> {
        let groups = self.groups.read().unwrap();
        let g = groups.get(group)?;
        match g.policy.sched {
            SchedKind::RoundRobin => g.round_robin.select(&g.conns, &g.policy).cloned(),
            SchedKind::Hash => {
                let indexed: Vec<(Arc<SrvConn>, u32)> = g
                    .conns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.clone(), i as u32))
                    .collect();
                g.rendezvous.select(req, &indexed, &g.policy).cloned()
            }
        }
    }

    /// §6 `sched_srv_conn(msg, server) -> conn | none`: select within a
    /// single named server (here, a single peer address) rather than across
    /// the whole group.
    pub fn sched_srv_conn(&self, group: &str, peer_addr: &str, req: &Request) -> Option<Arc<SrvConn>> {
        let groups = self.groups.read().unwrap();
        let g = groups.get(group)?;
        let narrowed: Vec<Arc<SrvConn>> = g
            .conns
            .iter()
            .filter(|c| c.peer_addr == peer_addr)
            .cloned()
            .collect();
        match g.policy.sched {
            SchedKind::RoundRobin => g.round_robin.select(&narrowed, &g.policy).cloned(),
            SchedKind::Hash => {
                let indexed: Vec<(Arc<SrvConn>, u32)> = narrowed
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| (c, i as u32))
                    .collect();
                g.rendezvous.select(req, &indexed, &g.policy).cloned()
            }
        }
    }

    pub fn group_policy(&self, group: &str) -> Option<ServerGroupPolicy> {
        self.groups.read().unwrap().get(group).map(|g| g.policy.clone())
    }

    pub fn group_qsizes(&self, group: &str) -> Option<Vec<(String, usize, bool)>> {
        self.groups.read().unwrap().get(group).map(|g| {
            g.conns
                .iter()
                .map(|c| (c.peer_addr.clone(), c.qsize(), c.is_live()))
                .collect()
        })
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.read().unwrap().keys().cloned().collect()
    }

    /// Runs each group's `SrvConn::check_timeouts` under a read lock.
    /// Intended to be called on a fixed tick by whatever binary owns the
    /// registry (the core itself runs no background threads, §5).
    pub fn sweep_timeouts(&self) {
        for g in self.groups.read().unwrap().values() {
            for conn in &g.conns {
                conn.check_timeouts(&g.policy);
            }
        }
    }
}
