//! Server connection (component C): the forwarding-queue, the non-idempotent
//! hold, the sent/unsent cursor, and the retry/reconnect state machine.
//!
//! This is the largest and trickiest component in the engine (20% of the
//! core budget per SPEC_FULL.md §2) — it is where eviction, repair, and
//! rescheduling bookkeeping live.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitflags::bitflags;

use crate::config::ServerGroupPolicy;
use crate::message::{synth_error_response, Request, Status};
use crate::transport::ServerTransport;

static NEXT_SRV_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SrvConnId(u64);

impl SrvConnId {
    pub fn next() -> Self {
        SrvConnId(NEXT_SRV_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SrvConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srv#{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SrvConnFlags: u8 {
        /// nip-sublist is non-empty (S3).
        const HASNIP   = 1 << 0;
        /// Repair is replaying the probed-but-unacknowledged range.
        const QFORWD   = 1 << 1;
        /// A single-request repair probe is outstanding after reconnect.
        const RESEND   = 1 << 2;
        /// Reconnect attempts exhausted; eligible for wholesale reschedule.
        const FAULTY   = 1 << 3;
    }
}

/// Called by `SrvConn` to find an alternative connection, and that
/// connection's group policy (needed to re-`enqueue` onto it), for a
/// request that must be rescheduled away from a failed connection.
/// Implemented by the forwarding engine, which owns the scheduler registry
/// — kept as a callback rather than a direct dependency so this module
/// never needs to know about `crate::scheduler`.
pub type RescheduleFn<'a> = dyn Fn(&Arc<Request>) -> Option<(Arc<SrvConn>, ServerGroupPolicy)> + 'a;

/// Reconnect backoff ladder (§4.C *reconnect*): `{1, 10, 100, 250, 500, 1000}`
/// ms by attempt index, saturating at 1000 ms.
const RECONNECT_BACKOFF_MS: [u64; 6] = [1, 10, 100, 250, 500, 1000];

pub fn reconnect_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(RECONNECT_BACKOFF_MS.len() - 1);
    Duration::from_millis(RECONNECT_BACKOFF_MS[idx])
}

struct Inner {
    queue: VecDeque<Arc<Request>>,
    /// S1 cursor: number of contiguous entries from the front that have been
    /// transmitted and are awaiting a response.
    sent: usize,
    flags: SrvConnFlags,
}

impl Inner {
    fn has_nip(&self) -> bool {
        // Only requests not yet answered can still be "in flight" non-idempotent;
        // everything in the queue by definition hasn't been answered yet.
        self.queue.iter().any(|r| r.is_non_idempotent())
    }

    fn on_hold(&self) -> bool {
        self.sent > 0 && self.sent <= self.queue.len() && self.queue[self.sent - 1].is_non_idempotent()
    }
}

pub struct SrvConn {
    pub id: SrvConnId,
    pub peer_addr: String,
    transport: Mutex<Arc<dyn ServerTransport>>,
    inner: Mutex<Inner>,
    recns: AtomicU32,
}

impl SrvConn {
    pub fn new(peer_addr: String, transport: Arc<dyn ServerTransport>) -> Arc<Self> {
        Arc::new(SrvConn {
            id: SrvConnId::next(),
            peer_addr,
            transport: Mutex::new(transport),
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                sent: 0,
                flags: SrvConnFlags::empty(),
            }),
            recns: AtomicU32::new(0),
        })
    }

    pub fn is_live(&self) -> bool {
        self.transport.lock().unwrap().is_live()
    }

    pub fn flags(&self) -> SrvConnFlags {
        self.inner.lock().unwrap().flags
    }

    pub fn is_restricted(&self) -> bool {
        self.flags().intersects(SrvConnFlags::RESEND | SrvConnFlags::QFORWD)
    }

    pub fn is_faulty(&self) -> bool {
        self.flags().contains(SrvConnFlags::FAULTY)
    }

    /// True while the connection is holding at least one in-flight
    /// non-idempotent request (§4.D round-robin "first pass" skip, distinct
    /// from [`Self::is_restricted`]).
    pub fn has_nip_in_flight(&self) -> bool {
        self.flags().contains(SrvConnFlags::HASNIP)
    }

    pub fn qsize(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn recns(&self) -> u32 {
        self.recns.load(Ordering::Relaxed)
    }

    /// Rendezvous-hash connection weight (§4.D, §10.F): mixes the peer
    /// address bytes with the connection's index within its server so two
    /// connections to different servers never collide by index alone
    /// (`__calc_conn_hash` in the original).
    pub fn conn_hash(&self, index_within_server: u32) -> u64 {
        crate::hash::hash_bytes(self.peer_addr.as_bytes()) ^ u64::from(index_within_server)
    }

    /// Eligible to receive new work per §4.D: live, not restricted, not over
    /// the group's `max_qsize`.
    pub fn eligible(&self, policy: &ServerGroupPolicy) -> bool {
        self.is_live() && !self.is_restricted() && self.qsize() < policy.max_qsize
    }

    /// §4.C *enqueue(req)*.
    pub fn enqueue(self: &Arc<Self>, req: Arc<Request>, policy: &ServerGroupPolicy) {
        req.set_srv_conn(Arc::downgrade(self));
        let was_on_hold = {
            let mut inner = self.inner.lock().unwrap();
            inner.queue.push_back(req);
            if inner.has_nip() {
                inner.flags.insert(SrvConnFlags::HASNIP);
            }
            inner.on_hold()
        };
        if !was_on_hold {
            self.flush_unsent(policy);
        }
    }

    /// §4.C *flush_unsent()*. Stops after the first transmitted
    /// non-idempotent request (the queue becomes held, S2).
    pub fn flush_unsent(self: &Arc<Self>, policy: &ServerGroupPolicy) {
        loop {
            let candidate = {
                let inner = self.inner.lock().unwrap();
                if inner.sent >= inner.queue.len() || inner.on_hold() {
                    None
                } else {
                    Some(inner.queue[inner.sent].clone())
                }
            };
            let Some(req) = candidate else { break };

            if req.age() > policy.max_forward_timeout {
                self.evict_at_sent_cursor(&req, Status::GatewayTimeout504, "queue age exceeded");
                continue;
            }

            let send_result = self.transport.lock().unwrap().send_request(&req);
            match send_result {
                Ok(()) => {
                    req.mark_transmitted();
                    let is_nip = req.is_non_idempotent();
                    {
                        let mut inner = self.inner.lock().unwrap();
                        inner.sent += 1;
                    }
                    tracing::debug!(conn = %self.id, req = ?req.id, "transmitted to upstream");
                    if is_nip {
                        break; // queue is now on hold (S2)
                    }
                }
                Err(err) => {
                    tracing::warn!(conn = %self.id, req = ?req.id, error = %err, "forwarding error");
                    self.evict_at_sent_cursor(&req, Status::InternalError500, "forwarding error");
                }
            }
        }
    }

    /// Evict the request currently sitting at the `sent` cursor (used only
    /// by `flush_unsent`, where the candidate is always unsent).
    fn evict_at_sent_cursor(&self, req: &Arc<Request>, status: Status, reason: &'static str) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(pos) = inner.queue.iter().position(|r| Arc::ptr_eq(r, req)) {
                inner.queue.remove(pos);
            }
        }
        Self::synth_and_pair(req, status, reason);
        tracing::warn!(conn = %self.id, req = ?req.id, status = status.code(), reason, "evicted");
    }

    fn synth_and_pair(req: &Arc<Request>, status: Status, reason: &'static str) {
        req.set_error(status, reason);
        if let Some(cli) = req.cli_conn.upgrade() {
            let resp = synth_error_response(status, reason);
            cli.pair(req, resp);
        }
    }

    /// §4.C *response_arrived*. Returns the request the just-parsed response
    /// pairs with, or `None` if the forwarding-queue was empty (P3: the
    /// caller must drop the connection in that case).
    pub fn response_arrived(self: &Arc<Self>, policy: &ServerGroupPolicy) -> Option<Arc<Request>> {
        let popped = {
            let mut inner = self.inner.lock().unwrap();
            let popped = inner.queue.pop_front();
            if popped.is_some() && inner.sent > 0 {
                inner.sent -= 1;
            }
            popped
        };
        let Some(req) = popped else {
            tracing::warn!(conn = %self.id, "response arrived on an empty forwarding-queue; dropping connection");
            self.transport.lock().unwrap().close_sync();
            return None;
        };

        let (restricted, drained, on_hold) = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.has_nip() {
                inner.flags.remove(SrvConnFlags::HASNIP);
            }
            (
                inner.flags.intersects(SrvConnFlags::RESEND | SrvConnFlags::QFORWD),
                inner.sent >= inner.queue.len(),
                inner.on_hold(),
            )
        };

        if restricted {
            self.repair_after_response(policy);
        } else if !drained && !on_hold {
            self.flush_unsent(policy);
        }

        Some(req)
    }

    /// §4.C *repair_after_response*.
    fn repair_after_response(self: &Arc<Self>, policy: &ServerGroupPolicy) {
        let empty = self.inner.lock().unwrap().queue.is_empty();
        if empty {
            let mut inner = self.inner.lock().unwrap();
            inner.flags.remove(SrvConnFlags::RESEND | SrvConnFlags::QFORWD);
            return;
        }

        let already_qforwd = self.inner.lock().unwrap().flags.contains(SrvConnFlags::QFORWD);
        if !already_qforwd {
            let sent_range: Vec<Arc<Request>> = {
                let inner = self.inner.lock().unwrap();
                inner.queue.iter().take(inner.sent).cloned().collect()
            };
            for req in sent_range {
                self.resend_one(&req, policy);
            }
            self.inner.lock().unwrap().flags.insert(SrvConnFlags::QFORWD);
        }
        self.flush_unsent(policy);
    }

    /// Resend (retry) a single in-flight request during repair, applying
    /// both age- and retry-count-based eviction before the retransmit (§4.C
    /// "Eviction tie-breaks": age is checked before retry-count).
    fn resend_one(&self, req: &Arc<Request>, policy: &ServerGroupPolicy) {
        if req.age() > policy.max_forward_timeout {
            self.remove_from_queue(req);
            Self::synth_and_pair(req, Status::GatewayTimeout504, "queue age exceeded");
            return;
        }
        if req.retry_count() >= policy.max_forward_retries {
            self.remove_from_queue(req);
            Self::synth_and_pair(
                req,
                Status::GatewayTimeout504,
                "retries exceeded",
            );
            return;
        }
        req.bump_retry_count();
        match self.transport.lock().unwrap().send_request(req) {
            Ok(()) => {
                req.mark_transmitted();
                tracing::debug!(conn = %self.id, req = ?req.id, "resent during repair");
            }
            Err(err) => {
                tracing::warn!(conn = %self.id, req = ?req.id, error = %err, "resend failed");
                self.remove_from_queue(req);
                Self::synth_and_pair(req, Status::InternalError500, "forwarding error");
            }
        }
    }

    fn remove_from_queue(&self, req: &Arc<Request>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.queue.iter().position(|r| Arc::ptr_eq(r, req)) {
            inner.queue.remove(pos);
            if pos < inner.sent {
                inner.sent -= 1;
            }
        }
    }

    /// Periodic timeout sweep, driven by a background timer external to
    /// this module (the gateway's own tick, not a `SrvConn`-owned thread):
    /// a held non-idempotent request with no transport failure and no
    /// further client activity would otherwise sit past
    /// `max_forward_timeout` forever, since neither `flush_unsent` (unsent
    /// entries only) nor `response_arrived`'s repair path (triggered by a
    /// later response) would ever run for it.
    pub fn check_timeouts(&self, policy: &ServerGroupPolicy) {
        self.evict_timeouts(policy);
    }

    /// Evict every entry whose age exceeds the policy, wherever in the
    /// queue it sits (used by the transport-dropped repair path).
    fn evict_timeouts(&self, policy: &ServerGroupPolicy) {
        let stale: Vec<Arc<Request>> = {
            let inner = self.inner.lock().unwrap();
            inner
                .queue
                .iter()
                .filter(|r| r.age() > policy.max_forward_timeout)
                .cloned()
                .collect()
        };
        for req in stale {
            self.remove_from_queue(&req);
            Self::synth_and_pair(&req, Status::GatewayTimeout504, "queue age exceeded");
        }
    }

    /// §4.C *transport_dropped (repair path)*. Returns true if the caller
    /// should run `reschedule_all` (connection declared faulty or reconnect
    /// attempts exhausted).
    pub fn transport_dropped(&self, policy: &ServerGroupPolicy) -> bool {
        if self.is_live() {
            return false;
        }
        self.evict_timeouts(policy);

        let attempt = self.recns.fetch_add(1, Ordering::Relaxed) + 1;
        if self.is_faulty() || attempt > policy.max_connect_retries {
            let mut inner = self.inner.lock().unwrap();
            inner.flags.insert(SrvConnFlags::FAULTY);
            return true;
        }

        // Non-idempotent policy: drop to 504 unless retry-nip is configured.
        if !policy.retry_nonidempotent {
            let nip_entries: Vec<Arc<Request>> = {
                let inner = self.inner.lock().unwrap();
                inner
                    .queue
                    .iter()
                    .take(inner.sent)
                    .filter(|r| r.is_non_idempotent())
                    .cloned()
                    .collect()
            };
            for req in nip_entries {
                self.remove_from_queue(&req);
                Self::synth_and_pair(
                    &req,
                    Status::GatewayTimeout504,
                    "request dropped: non-idempotent requests are not re-forwarded",
                );
            }
        }

        // Repair probe: resend only the first unanswered request.
        let probe = {
            let inner = self.inner.lock().unwrap();
            inner.queue.front().cloned()
        };
        if let Some(req) = probe {
            self.resend_one(&req, policy);
        }
        self.inner.lock().unwrap().flags.insert(SrvConnFlags::RESEND);
        false
    }

    /// §4.C *reschedule_all*. After this call the forwarding-queue is empty
    /// and the sent cursor is reset.
    pub fn reschedule_all(&self, reschedule: &RescheduleFn<'_>) {
        let drained: Vec<Arc<Request>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.sent = 0;
            inner.flags = SrvConnFlags::FAULTY;
            inner.queue.drain(..).collect()
        };
        for req in drained {
            match reschedule(&req) {
                Some((new_conn, policy)) => {
                    tracing::info!(
                        from = %self.id, to = %new_conn.id, req = ?req.id,
                        "rescheduled after connection failure"
                    );
                    new_conn.enqueue(req.clone(), &policy);
                }
                None => {
                    Self::synth_and_pair(&req, Status::BadGateway502, "no alternative upstream available");
                }
            }
        }
    }

    /// Set to `DEAD`/`LIVE` by whoever owns the concrete transport (the
    /// connector loop); swapping the transport handle in place lets
    /// `reconnect` replace a dead socket without reallocating the `SrvConn`
    /// (and thus without disturbing anything that holds a `Weak<SrvConn>`).
    pub fn replace_transport(&self, transport: Arc<dyn ServerTransport>) {
        *self.transport.lock().unwrap() = transport;
    }

    pub fn reset_recns(&self) {
        self.recns.store(0, Ordering::Relaxed);
        self.inner.lock().unwrap().flags.remove(SrvConnFlags::FAULTY | SrvConnFlags::RESEND | SrvConnFlags::QFORWD);
    }
}

impl fmt::Debug for SrvConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrvConn")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("qsize", &self.qsize())
            .field("flags", &self.flags())
            .finish()
    }
}
