//! Forwarding engine (component G, §4.G): the orchestrator tying the
//! message model, both connection kinds, the scheduler registry, the rule
//! table, and the Frang limiter together into the end-to-end request and
//! response paths.

use std::sync::Arc;

use crate::cache::Cache;
use crate::cliconn::CliConn;
use crate::config::FrangConfig;
use crate::frang::{FrangLimiter, Verdict as FrangVerdict};
use crate::message::{http_date_now, synth_error_response, HeaderId, MsgFlags, Request, Response, Status, Version};
use crate::scheduler::{Registry, VhostDecision};
use crate::srvconn::SrvConn;

/// Hop-by-hop headers stripped in both directions (§4.G "drop hop-by-hop
/// headers"). `Connection` itself is handled specially since its value
/// depends on which direction the message is travelling.
const HOP_BY_HOP: &[HeaderId] = &[HeaderId::TransferEncoding];

pub struct Engine {
    pub registry: Arc<Registry>,
    pub cache: Arc<dyn Cache>,
    pub frang: Arc<FrangLimiter>,
    pub frang_cfg: FrangConfig,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, cache: Arc<dyn Cache>, frang: Arc<FrangLimiter>) -> Self {
        Self::with_frang_config(registry, cache, frang, FrangConfig::default())
    }

    pub fn with_frang_config(
        registry: Arc<Registry>,
        cache: Arc<dyn Cache>,
        frang: Arc<FrangLimiter>,
        frang_cfg: FrangConfig,
    ) -> Self {
        Engine {
            registry,
            cache,
            frang,
            frang_cfg,
        }
    }

    /// §4.F `Conn_New`: called by whoever accepts the client transport (the
    /// listener, external to this core per §6) once a new client connection
    /// is established, before any request is read from it. Accounts the
    /// connection against `connection_burst`/`connection_rate` and the
    /// `concurrent_connections` ceiling; a `Block` verdict means the caller
    /// should close the transport without reading a request from it.
    pub fn handle_connection_established(&self, cli: &Arc<CliConn>) -> FrangVerdict {
        self.frang.on_connection(&cli.client_key(), &self.frang_cfg)
    }

    /// Pairs with [`Self::handle_connection_established`]: called once the
    /// transport actually closes, to release the `concurrent_connections`
    /// slot the connection held. Without this call the open-connection count
    /// only ever grows.
    pub fn handle_connection_closed(&self, cli: &Arc<CliConn>) {
        self.frang.on_connection_closed(&cli.client_key());
    }

    /// §4.G request path, steps 1-6. The Frang check (§4.F `Req_Start`, §7
    /// "400/403 — client classifier (Frang) rejected the request") runs
    /// right after the request joins the sequence-queue, so a block still
    /// produces exactly one ordered response (§8 P1/P2) rather than a
    /// response with nothing in the queue to flush it.
    pub fn handle_request(&self, cli: &Arc<CliConn>, req: Arc<Request>) {
        self.stamp_connection_intent(&req);
        self.classify_idempotency(&req, None);
        cli.enqueue(req.clone());

        if self.frang.on_request_start(&cli.client_key(), &self.frang_cfg) == FrangVerdict::Block {
            self.reject(cli, &req, Status::Forbidden403, "rejected by client classifier");
            return;
        }

        if let Some(resp) = self.cache.lookup(&req) {
            tracing::debug!(req = ?req.id, "cache hit");
            Self::adjust_response_for_client(&resp, &req);
            cli.pair(&req, resp);
            return;
        }

        tracing::debug!(req = ?req.id, "cache miss, dispatching to upstream");
        let group = match self.registry.sched_vhost(&req.envelope) {
            VhostDecision::Vhost(v, mark) => {
                self.classify_idempotency(&req, Some(mark));
                v
            }
            VhostDecision::Block => {
                self.reject(cli, &req, Status::Forbidden403, "blocked by rule table");
                return;
            }
            VhostDecision::NoMatch => {
                self.reject(cli, &req, Status::NotFound404, "no matching route");
                return;
            }
        };

        let Some(srv) = self.registry.sched_sg_conn(&group, &req) else {
            self.reject(cli, &req, Status::BadGateway502, "no live upstream connection");
            return;
        };
        let policy = self.registry.group_policy(&group).unwrap_or_default();

        Self::adjust_request_for_upstream(&req);
        srv.enqueue(req, &policy);
    }

    /// §4.G step 1: `CONN_CLOSE` for HTTP/0.9, and for HTTP/1.0 unless an
    /// explicit keep-alive was signalled.
    fn stamp_connection_intent(&self, req: &Arc<Request>) {
        match req.envelope.version {
            Version::Http09 => req.insert_flags(MsgFlags::CONN_CLOSE),
            Version::Http10 if !req.flags().contains(MsgFlags::CONN_KEEP_ALIVE) => {
                req.insert_flags(MsgFlags::CONN_CLOSE)
            }
            _ => {}
        }
    }

    /// §4.G step 2: non-idempotent unless method is safe, with the rule
    /// table able to override in either direction via a `mark`-based
    /// non-idempotent-override location rule (consulted through the same
    /// rule table used for vhost dispatch, since the grammar doesn't
    /// distinguish rule purposes; see [`crate::rules::MARK_FORCE_IDEMPOTENT`]
    /// / [`crate::rules::MARK_FORCE_NON_IDEMPOTENT`]). Called once from the
    /// method alone before the rule table has resolved a vhost, and again
    /// with the resolved mark once it has, since dispatch only runs on a
    /// cache miss.
    fn classify_idempotency(&self, req: &Arc<Request>, mark: Option<u32>) {
        use crate::rules::{MARK_FORCE_IDEMPOTENT, MARK_FORCE_NON_IDEMPOTENT};

        match mark {
            Some(MARK_FORCE_IDEMPOTENT) => {
                req.remove_flags(MsgFlags::NON_IDEMPOTENT);
                return;
            }
            Some(MARK_FORCE_NON_IDEMPOTENT) => {
                req.insert_flags(MsgFlags::NON_IDEMPOTENT);
                return;
            }
            _ => {}
        }
        if !req.envelope.method.is_safe() {
            req.insert_flags(MsgFlags::NON_IDEMPOTENT);
        }
    }

    fn reject(&self, cli: &Arc<CliConn>, req: &Arc<Request>, status: Status, reason: &'static str) {
        req.set_error(status, reason);
        let resp = synth_error_response(status, reason);
        cli.pair(req, resp);
    }

    /// §4.G step 6: "add `X-Forwarded-For`, `Via`, drop hop-by-hop headers,
    /// force `Connection: keep-alive` upstream".
    fn adjust_request_for_upstream(req: &Arc<Request>) {
        if let Some(xff) = req.envelope.headers.get(HeaderId::XForwardedFor) {
            let prior = crate::message::chunked_to_vec(xff);
            req.add_adjustment_header(
                "X-Forwarded-For",
                format!("{}, <client>", String::from_utf8_lossy(&prior)),
            );
        } else {
            req.add_adjustment_header("X-Forwarded-For", "<client>");
        }
        req.add_adjustment_header("Via", "1.1 proxy-core");
        req.add_adjustment_header("Connection", "keep-alive");
        for id in HOP_BY_HOP {
            req.drop_header(format!("{id:?}"));
        }
    }

    /// §4.G step 5: "remove hop-by-hop headers, set Date, Server,
    /// Connection per request intent, add stale warning if applicable".
    fn adjust_response_for_client(resp: &Arc<Response>, req: &Arc<Request>) {
        if resp.date().is_none() {
            resp.add_adjustment_header("Date", http_date_now());
        }
        resp.add_adjustment_header("Server", "proxy-core");
        let conn_value = if req.flags().contains(MsgFlags::CONN_CLOSE) {
            "close"
        } else {
            "keep-alive"
        };
        resp.add_adjustment_header("Connection", conn_value);
        if resp.is_stale() {
            resp.add_adjustment_header("Warning", "110 proxy-core \"Response is Stale\"");
        }
        for id in HOP_BY_HOP {
            resp.drop_header(format!("{id:?}"));
        }
    }

    /// §4.G response path, steps 1-3.
    pub fn handle_response(&self, srv: &Arc<SrvConn>, resp: Arc<Response>) {
        if resp.date().is_none() {
            resp.set_date(http_date_now());
        }
        let Some(policy) = self.srv_policy(srv) else {
            tracing::warn!(conn = %srv.id, "response arrived for an unregistered connection");
            return;
        };
        let Some(req) = srv.response_arrived(&policy) else {
            return;
        };

        self.cache.store(&req, &resp);
        Self::adjust_response_for_client(&resp, &req);

        if let Some(cli) = req.cli_conn.upgrade() {
            cli.pair(&req, resp);
        } else {
            tracing::debug!(req = ?req.id, "client connection already gone, dropping response");
        }
    }

    /// Looks up the policy for whichever group owns `srv`, by scanning
    /// registered groups (SrvConn itself doesn't know its own group name).
    fn srv_policy(&self, srv: &Arc<SrvConn>) -> Option<crate::config::ServerGroupPolicy> {
        self.srv_group(srv).and_then(|name| self.registry.group_policy(&name))
    }

    /// Name of whichever group owns `srv`, found the same way as
    /// [`Self::srv_policy`].
    fn srv_group(&self, srv: &Arc<SrvConn>) -> Option<String> {
        for name in self.registry.group_names() {
            if let Some(sizes) = self.registry.group_qsizes(&name) {
                if sizes.iter().any(|(addr, _, _)| addr == &srv.peer_addr) {
                    return Some(name);
                }
            }
        }
        None
    }

    /// §4.C repair path entry point: whoever owns the concrete transport
    /// (the connector loop, external to this core per §6) calls this when a
    /// server connection's `ServerTransport` reports not-live. Runs the
    /// retry/repair state machine and, if the connection has been declared
    /// faulty, reschedules its whole queue onto a live peer in the same
    /// group (or synthesizes 502s if none is available).
    pub fn handle_transport_dropped(&self, srv: &Arc<SrvConn>) {
        let Some(group) = self.srv_group(srv) else {
            tracing::warn!(conn = %srv.id, "transport_dropped for an unregistered connection");
            return;
        };
        let policy = self.registry.group_policy(&group).unwrap_or_default();

        if !srv.transport_dropped(&policy) {
            return;
        }

        let registry = &self.registry;
        let reschedule = move |req: &Arc<Request>| -> Option<(Arc<SrvConn>, crate::config::ServerGroupPolicy)> {
            let alt = registry.sched_sg_conn(&group, req)?;
            let alt_policy = registry.group_policy(&group)?;
            Some((alt, alt_policy))
        };
        srv.reschedule_all(&reschedule);
    }
}
