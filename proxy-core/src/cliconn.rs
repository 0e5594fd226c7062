//! Client connection (component B): owns the per-client sequence-queue and
//! serializes response emission in request-arrival order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::message::{Request, Response};
use crate::transport::ClientTransport;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub fn next() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cli#{}", self.0)
    }
}

/// Per-client connection. `seq_queue` is guarded by `seq-lock`; `ret_lock`
/// is held only across the synchronous flush of a batch of paired responses
/// so that unrelated flushes on other connections are never serialized
/// against each other (§9 "Per-object locks with two-lock traversal" — the
/// two locks must never be coalesced into one).
pub struct CliConn {
    pub id: ConnId,
    transport: Arc<dyn ClientTransport>,
    seq_queue: Mutex<VecDeque<Arc<Request>>>,
    ret_lock: Mutex<()>,
    last_activity: Mutex<Instant>,
}

impl CliConn {
    pub fn new(transport: Arc<dyn ClientTransport>) -> Arc<Self> {
        Arc::new(CliConn {
            id: ConnId::next(),
            transport,
            seq_queue: Mutex::new(VecDeque::new()),
            ret_lock: Mutex::new(()),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Opaque per-client identity the Frang limiter accounts against.
    pub fn client_key(&self) -> String {
        self.transport.peer_key()
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    pub fn queue_len(&self) -> usize {
        self.seq_queue.lock().unwrap().len()
    }

    /// §4.B *enqueue(req)*. Clears the non-idempotent bit on the previous
    /// tail (§9 "Non-idempotent downgrading"): a new request from the same
    /// client means the client already trusts pipelining, so the server may
    /// safely resume forwarding a held non-idempotent request too (§4.G
    /// step 3).
    pub fn enqueue(&self, req: Arc<Request>) {
        let mut q = self.seq_queue.lock().unwrap();
        if let Some(prev) = q.back() {
            prev.clear_non_idempotent();
        }
        tracing::debug!(conn = %self.id, req = ?req.id, "enqueued on sequence-queue");
        q.push_back(req);
    }

    /// §4.B *pair(req, resp)*. Sets the response, then flushes the longest
    /// answered prefix in order. A send failure mid-flush force-closes the
    /// transport rather than risk delivering responses out of order.
    pub fn pair(&self, req: &Arc<Request>, resp: Arc<Response>) {
        req.set_resp(resp);

        let ret_queue: Vec<Arc<Request>> = {
            let mut q = self.seq_queue.lock().unwrap();
            let cut = q.iter().take_while(|r| r.has_resp()).count();
            q.drain(..cut).collect()
        };

        if ret_queue.is_empty() {
            return;
        }

        let _ret_guard = self.ret_lock.lock().unwrap();
        for r in &ret_queue {
            let resp = r
                .take_resp()
                .expect("prefix request has a paired response by construction");
            match self.transport.send_response(&resp) {
                Ok(()) => {
                    tracing::debug!(conn = %self.id, req = ?r.id, "response flushed in order");
                }
                Err(err) => {
                    tracing::warn!(
                        conn = %self.id, req = ?r.id, error = %err,
                        "flush failed mid-batch, force-closing connection to preserve ordering"
                    );
                    self.transport.close_sync();
                    return;
                }
            }
        }
    }

    /// Transmitting a response while the sequence-queue is empty (or not at
    /// its head) is a protocol-integrity failure (§4.B "Failure semantics").
    /// Call this before handing an out-of-band response to `pair` if the
    /// caller cannot otherwise prove the request is still queued.
    pub fn contains(&self, req: &Arc<Request>) -> bool {
        self.seq_queue
            .lock()
            .unwrap()
            .iter()
            .any(|r| Arc::ptr_eq(r, req))
    }

    /// §4.B *drop*. Requests with a paired response are simply released;
    /// requests without one are unlinked here but remain alive through
    /// whatever `SrvConn` forwarding-queue still holds an `Arc` to them.
    pub fn drop_conn(&self) {
        let drained: Vec<Arc<Request>> = self.seq_queue.lock().unwrap().drain(..).collect();
        for r in drained {
            if r.has_resp() {
                tracing::debug!(conn = %self.id, req = ?r.id, "freeing answered request on drop");
            } else {
                tracing::debug!(
                    conn = %self.id, req = ?r.id,
                    "connection dropped with an unanswered request still owned by its server connection"
                );
            }
        }
    }
}

impl fmt::Debug for CliConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliConn")
            .field("id", &self.id)
            .field("queue_len", &self.queue_len())
            .finish()
    }
}
