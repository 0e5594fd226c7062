//! Rendezvous (highest-random-weight) connection scheduler (§4.D, §10.F).
//!
//! Each connection carries a pre-computed `conn_hash`; for a request the
//! engine picks the eligible connection maximizing `msg_hash XOR conn_hash`.
//! Ties break toward the later-scanned connection (`>=`, not `>` —
//! `tfw_sched_hash.c:__find_best_conn`), so results are deterministic given
//! a fixed scan order rather than arbitrary on ties.

use std::sync::Arc;

use crate::config::ServerGroupPolicy;
use crate::message::Request;
use crate::srvconn::SrvConn;

pub struct Rendezvous;

impl Rendezvous {
    pub fn new() -> Self {
        Rendezvous
    }

    /// `conns` is `(connection, index_within_its_server)` so the caller can
    /// supply whatever per-server indexing scheme it tracks; this scheduler
    /// doesn't maintain that bookkeeping itself.
    pub fn select<'a>(
        &self,
        req: &Request,
        conns: &'a [(Arc<SrvConn>, u32)],
        policy: &ServerGroupPolicy,
    ) -> Option<&'a Arc<SrvConn>> {
        let msg_hash = req.key_hash();
        let mut best: Option<(&'a Arc<SrvConn>, u64)> = None;
        for (conn, idx) in conns {
            if !conn.eligible(policy) {
                continue;
            }
            let weight = msg_hash ^ conn.conn_hash(*idx);
            match best {
                Some((_, best_weight)) if weight < best_weight => {}
                _ => best = Some((conn, weight)),
            }
        }
        best.map(|(c, _)| c)
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}
