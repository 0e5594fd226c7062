//! Round-robin connection scheduler (§4.D).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::ServerGroupPolicy;
use crate::srvconn::SrvConn;

pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin {
            cursor: AtomicUsize::new(0),
        }
    }

    /// Two-pass skip (§4.D, §10.F): pass one additionally skips connections
    /// holding an in-flight non-idempotent request; pass two relaxes that
    /// skip if pass one found nothing, so a fully-busy group still makes
    /// progress once the hold is legitimately unavoidable.
    pub fn select<'a>(&self, conns: &'a [Arc<SrvConn>], policy: &ServerGroupPolicy) -> Option<&'a Arc<SrvConn>> {
        if conns.is_empty() {
            return None;
        }
        if let Some(c) = self.scan(conns, policy, true) {
            return Some(c);
        }
        self.scan(conns, policy, false)
    }

    fn scan<'a>(
        &self,
        conns: &'a [Arc<SrvConn>],
        policy: &ServerGroupPolicy,
        skip_nip_in_flight: bool,
    ) -> Option<&'a Arc<SrvConn>> {
        let len = conns.len();
        for _ in 0..len {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let c = &conns[idx];
            if !c.eligible(policy) {
                continue;
            }
            if skip_nip_in_flight && c.has_nip_in_flight() {
                continue;
            }
            return Some(c);
        }
        None
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}
