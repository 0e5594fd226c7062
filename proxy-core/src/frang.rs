//! Frang limiter (component F, §4.F): a staged per-client state machine
//! driven per parsed chunk, checked against the thresholds named in §6.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::config::FrangConfig;

/// Ring-buffer width for per-client accounting (§4.F).
const FRANG_FREQ: usize = 8;
const SLOT_WINDOW: Duration = Duration::from_millis(125); // 1s / FRANG_FREQ

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Block,
}

/// FSM states driven per parsed chunk (§4.F). Timeouts are cross-cuts
/// checked alongside whichever header/body state is current, not states of
/// their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrangState {
    ReqStart,
    ReqHdrStart,
    Method,
    UriLen,
    FieldDup,
    FieldLen,
    Crlf,
    FieldLenFinal,
    Host,
    ContentType,
    BodyStart,
    BodyTimeout,
    BodyChunkCnt,
    BodyLen,
    Done,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    slot_idx: Option<u64>,
    new_connections: u32,
    requests: u32,
}

struct Account {
    slots: [Slot; FRANG_FREQ],
    header_started_at: Option<Instant>,
    last_body_chunk_at: Option<Instant>,
    header_len_seen: u32,
    header_count_seen: u32,
    header_chunk_count_seen: u32,
    body_len_seen: u64,
    body_chunk_count_seen: u32,
    state: FrangState,
    /// Currently-open connections for this client (§4.F "connections-max").
    /// Incremented by `on_connection`, decremented by `on_connection_closed`.
    open_connections: u32,
}

impl Default for Account {
    fn default() -> Self {
        Account {
            slots: [Slot::default(); FRANG_FREQ],
            header_started_at: None,
            last_body_chunk_at: None,
            header_len_seen: 0,
            header_count_seen: 0,
            header_chunk_count_seen: 0,
            body_len_seen: 0,
            body_chunk_count_seen: 0,
            state: FrangState::ReqStart,
            open_connections: 0,
        }
    }
}

impl Account {
    fn current_slot_idx(now: Instant, epoch: Instant) -> u64 {
        (now.duration_since(epoch).as_millis() as u64 / SLOT_WINDOW.as_millis() as u64) % FRANG_FREQ as u64
    }

    fn slot_mut(&mut self, idx: u64) -> &mut Slot {
        let slot = &mut self.slots[(idx % FRANG_FREQ as u64) as usize];
        if slot.slot_idx != Some(idx) {
            *slot = Slot {
                slot_idx: Some(idx),
                new_connections: 0,
                requests: 0,
            };
        }
        slot
    }

    fn sum_recent(&self, idx: u64, field: impl Fn(&Slot) -> u32) -> u32 {
        self.slots
            .iter()
            .filter(|s| match s.slot_idx {
                Some(i) => idx.saturating_sub(i) < FRANG_FREQ as u64,
                None => false,
            })
            .map(field)
            .sum()
    }
}

/// Tracks per-client accounting and the IP blocklist. `client_key` is an
/// opaque identity (peer address string) chosen by the caller.
pub struct FrangLimiter {
    epoch: Instant,
    accounts: Mutex<HashMap<String, Account>>,
    blocklist: RwLock<std::collections::HashSet<String>>,
    block_count: AtomicU64,
}

impl FrangLimiter {
    pub fn new() -> Self {
        FrangLimiter {
            epoch: Instant::now(),
            accounts: Mutex::new(HashMap::new()),
            blocklist: RwLock::new(std::collections::HashSet::new()),
            block_count: AtomicU64::new(0),
        }
    }

    pub fn is_blocked(&self, client_key: &str) -> bool {
        self.blocklist.read().unwrap().contains(client_key)
    }

    /// Running total of blocked verdicts, surfaced on `/api/v1/status`
    /// (§10.D "Frang block counters").
    pub fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::Relaxed)
    }

    fn block(&self, client_key: &str, cfg: &FrangConfig, reason: &str) -> Verdict {
        tracing::warn!(client = client_key, reason, "frang: request blocked");
        self.block_count.fetch_add(1, Ordering::Relaxed);
        if cfg.ip_block {
            self.blocklist.write().unwrap().insert(client_key.to_owned());
        }
        Verdict::Block
    }

    pub fn on_connection(&self, client_key: &str, cfg: &FrangConfig) -> Verdict {
        if self.is_blocked(client_key) {
            return Verdict::Block;
        }
        let now = Instant::now();
        let idx = Account::current_slot_idx(now, self.epoch);
        let mut accounts = self.accounts.lock().unwrap();
        let acct = accounts.entry(client_key.to_owned()).or_default();
        acct.slot_mut(idx).new_connections += 1;

        if cfg.connection_burst > 0 && acct.slot_mut(idx).new_connections > cfg.connection_burst {
            drop(accounts);
            return self.block(client_key, cfg, "connection_burst exceeded");
        }
        if cfg.connection_rate > 0 {
            let rate = acct.sum_recent(idx, |s| s.new_connections);
            if rate > cfg.connection_rate {
                drop(accounts);
                return self.block(client_key, cfg, "connection_rate exceeded");
            }
        }

        if cfg.concurrent_connections > 0 && acct.open_connections + 1 > cfg.concurrent_connections {
            drop(accounts);
            return self.block(client_key, cfg, "concurrent_connections exceeded");
        }
        acct.open_connections += 1;
        Verdict::Pass
    }

    /// Decrements the open-connection count tracked against
    /// `concurrent_connections` (§4.F "connections-max"). Must be called
    /// once per connection that `on_connection` admitted, when that
    /// connection's transport closes; otherwise the count only ever grows.
    pub fn on_connection_closed(&self, client_key: &str) {
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(acct) = accounts.get_mut(client_key) {
            acct.open_connections = acct.open_connections.saturating_sub(1);
        }
    }

    /// §4.F `Req_Start`: per-request burst/rate accounting.
    pub fn on_request_start(&self, client_key: &str, cfg: &FrangConfig) -> Verdict {
        if self.is_blocked(client_key) {
            return Verdict::Block;
        }
        let now = Instant::now();
        let idx = Account::current_slot_idx(now, self.epoch);
        let mut accounts = self.accounts.lock().unwrap();
        let acct = accounts.entry(client_key.to_owned()).or_default();
        acct.state = FrangState::ReqStart;
        acct.header_started_at = Some(now);
        acct.last_body_chunk_at = None;
        acct.header_len_seen = 0;
        acct.header_count_seen = 0;
        acct.header_chunk_count_seen = 0;
        acct.body_len_seen = 0;
        acct.body_chunk_count_seen = 0;
        acct.slot_mut(idx).requests += 1;

        if cfg.request_burst > 0 && acct.slot_mut(idx).requests > cfg.request_burst {
            drop(accounts);
            return self.block(client_key, cfg, "request_burst exceeded");
        }
        if cfg.request_rate > 0 {
            let rate = acct.sum_recent(idx, |s| s.requests);
            if rate > cfg.request_rate {
                drop(accounts);
                return self.block(client_key, cfg, "request_rate exceeded");
            }
        }
        acct.state = FrangState::ReqHdrStart;
        Verdict::Pass
    }

    pub fn check_method(&self, client_key: &str, cfg: &FrangConfig, method: &str) -> Verdict {
        if !cfg.http_methods.is_empty() && !cfg.http_methods.iter().any(|m| m == method) {
            return self.block(client_key, cfg, "method not allowed");
        }
        self.advance(client_key, FrangState::Method);
        Verdict::Pass
    }

    pub fn check_uri_len(&self, client_key: &str, cfg: &FrangConfig, len: usize) -> Verdict {
        if cfg.http_uri_len > 0 && len as u32 > cfg.http_uri_len {
            return self.block(client_key, cfg, "http_uri_len exceeded");
        }
        self.advance(client_key, FrangState::UriLen);
        Verdict::Pass
    }

    /// One header field parsed: checks single-field length, running header
    /// count, and running header-chunk count together (§4.F `FieldDup` ->
    /// `FieldLen` loop).
    pub fn on_header_field(
        &self,
        client_key: &str,
        cfg: &FrangConfig,
        field_len: usize,
        chunk_count: u32,
    ) -> Verdict {
        let mut accounts = self.accounts.lock().unwrap();
        let acct = accounts.entry(client_key.to_owned()).or_default();
        acct.header_count_seen += 1;
        acct.header_chunk_count_seen += chunk_count;
        let header_count_seen = acct.header_count_seen;
        let header_chunk_count_seen = acct.header_chunk_count_seen;
        acct.state = FrangState::FieldDup;
        drop(accounts);

        if cfg.http_field_len > 0 && field_len as u32 > cfg.http_field_len {
            return self.block(client_key, cfg, "http_field_len exceeded");
        }
        if cfg.http_header_cnt > 0 && header_count_seen > cfg.http_header_cnt {
            return self.block(client_key, cfg, "http_header_cnt exceeded");
        }
        if cfg.http_header_chunk_cnt > 0 && header_chunk_count_seen > cfg.http_header_chunk_cnt {
            return self.block(client_key, cfg, "http_header_chunk_cnt exceeded");
        }
        self.advance(client_key, FrangState::FieldLen);
        Verdict::Pass
    }

    /// End of headers (§4.F `FieldLenFinal` -> `Host` -> `ContentType`):
    /// required-header checks.
    pub fn on_headers_complete(
        &self,
        client_key: &str,
        cfg: &FrangConfig,
        host_present: bool,
        content_type: Option<&str>,
    ) -> Verdict {
        if cfg.http_host_required && !host_present {
            return self.block(client_key, cfg, "Host header required");
        }
        if cfg.http_ct_required && content_type.is_none() {
            return self.block(client_key, cfg, "Content-Type header required");
        }
        if let Some(ct) = content_type {
            if !cfg.http_ct_vals.is_empty() && !cfg.http_ct_vals.iter().any(|allowed| ct.starts_with(allowed.as_str())) {
                return self.block(client_key, cfg, "Content-Type not allowed");
            }
        }
        self.advance(client_key, FrangState::BodyStart);
        Verdict::Pass
    }

    /// §4.F timeout cross-cut, checked alongside the header phase.
    pub fn check_header_timeout(&self, client_key: &str, cfg: &FrangConfig) -> Verdict {
        if cfg.client_header_timeout.is_zero() {
            return Verdict::Pass;
        }
        let accounts = self.accounts.lock().unwrap();
        let Some(acct) = accounts.get(client_key) else {
            return Verdict::Pass;
        };
        let Some(started) = acct.header_started_at else {
            return Verdict::Pass;
        };
        if started.elapsed() > cfg.client_header_timeout {
            drop(accounts);
            return self.block(client_key, cfg, "client_header_timeout exceeded");
        }
        Verdict::Pass
    }

    /// A body chunk arrived: §4.F `Body_ChunkCnt`/`Body_Len` loop, plus the
    /// inter-chunk timeout cross-cut.
    pub fn on_body_chunk(&self, client_key: &str, cfg: &FrangConfig, chunk_len: usize) -> Verdict {
        let now = Instant::now();
        let mut accounts = self.accounts.lock().unwrap();
        let acct = accounts.entry(client_key.to_owned()).or_default();

        if !cfg.client_body_timeout.is_zero() {
            if let Some(last) = acct.last_body_chunk_at {
                if now.duration_since(last) > cfg.client_body_timeout {
                    drop(accounts);
                    return self.block(client_key, cfg, "client_body_timeout exceeded");
                }
            }
        }
        acct.last_body_chunk_at = Some(now);
        acct.body_chunk_count_seen += 1;
        acct.body_len_seen += chunk_len as u64;
        let chunk_count_seen = acct.body_chunk_count_seen;
        let len_seen = acct.body_len_seen;
        acct.state = FrangState::BodyLen;
        drop(accounts);

        if cfg.http_body_chunk_cnt > 0 && chunk_count_seen > cfg.http_body_chunk_cnt {
            return self.block(client_key, cfg, "http_body_chunk_cnt exceeded");
        }
        if cfg.http_body_len > 0 && len_seen > cfg.http_body_len {
            return self.block(client_key, cfg, "http_body_len exceeded");
        }
        Verdict::Pass
    }

    pub fn on_done(&self, client_key: &str) {
        self.advance(client_key, FrangState::Done);
    }

    fn advance(&self, client_key: &str, state: FrangState) {
        if let Some(acct) = self.accounts.lock().unwrap().get_mut(client_key) {
            acct.state = state;
        }
    }

    pub fn state_of(&self, client_key: &str) -> Option<FrangState> {
        self.accounts.lock().unwrap().get(client_key).map(|a| a.state)
    }
}

impl Default for FrangLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_with_request_burst(n: u32) -> FrangConfig {
        FrangConfig {
            request_burst: n,
            ..FrangConfig::default()
        }
    }

    #[test]
    fn request_burst_blocks_the_nth_plus_one_request() {
        // Scenario 6: request_burst = 3, a 4th request in the same slot is rejected.
        let limiter = FrangLimiter::new();
        let cfg = cfg_with_request_burst(3);
        for _ in 0..3 {
            assert_eq!(limiter.on_request_start("1.2.3.4", &cfg), Verdict::Pass);
        }
        assert_eq!(limiter.on_request_start("1.2.3.4", &cfg), Verdict::Block);
    }

    #[test]
    fn ip_block_adds_to_blocklist_on_violation() {
        let limiter = FrangLimiter::new();
        let cfg = FrangConfig {
            request_burst: 1,
            ip_block: true,
            ..FrangConfig::default()
        };
        assert_eq!(limiter.on_request_start("5.6.7.8", &cfg), Verdict::Pass);
        assert_eq!(limiter.on_request_start("5.6.7.8", &cfg), Verdict::Block);
        assert!(limiter.is_blocked("5.6.7.8"));
        // Further requests are blocked immediately without re-evaluating thresholds.
        assert_eq!(limiter.on_request_start("5.6.7.8", &cfg), Verdict::Block);
    }

    #[test]
    fn uri_len_limit_is_enforced() {
        let limiter = FrangLimiter::new();
        let cfg = FrangConfig {
            http_uri_len: 8,
            ..FrangConfig::default()
        };
        assert_eq!(limiter.check_uri_len("c", &cfg, 8), Verdict::Pass);
        assert_eq!(limiter.check_uri_len("c", &cfg, 9), Verdict::Block);
    }

    #[test]
    fn required_host_header_is_enforced() {
        let limiter = FrangLimiter::new();
        let cfg = FrangConfig {
            http_host_required: true,
            ..FrangConfig::default()
        };
        assert_eq!(limiter.on_headers_complete("c", &cfg, false, None), Verdict::Block);
        assert_eq!(limiter.on_headers_complete("c", &cfg, true, None), Verdict::Pass);
    }

    #[test]
    fn disallowed_method_is_blocked() {
        let limiter = FrangLimiter::new();
        let cfg = FrangConfig {
            http_methods: vec!["GET".into(), "HEAD".into()],
            ..FrangConfig::default()
        };
        assert_eq!(limiter.check_method("c", &cfg, "GET"), Verdict::Pass);
        assert_eq!(limiter.check_method("c", &cfg, "POST"), Verdict::Block);
    }

    #[test]
    fn zero_means_unlimited() {
        let limiter = FrangLimiter::new();
        let cfg = FrangConfig::default();
        for _ in 0..100 {
            assert_eq!(limiter.on_request_start("unlimited", &cfg), Verdict::Pass);
        }
    }

    #[test]
    fn concurrent_connections_limit_is_enforced_and_closing_frees_a_slot() {
        let limiter = FrangLimiter::new();
        let cfg = FrangConfig {
            concurrent_connections: 2,
            ..FrangConfig::default()
        };
        assert_eq!(limiter.on_connection("c", &cfg), Verdict::Pass);
        assert_eq!(limiter.on_connection("c", &cfg), Verdict::Pass);
        assert_eq!(limiter.on_connection("c", &cfg), Verdict::Block, "third concurrent connection exceeds the limit");

        limiter.on_connection_closed("c");
        assert_eq!(limiter.on_connection("c", &cfg), Verdict::Pass, "closing a connection must free its slot");
    }

    #[test]
    fn concurrent_connections_zero_means_unlimited() {
        let limiter = FrangLimiter::new();
        let cfg = FrangConfig::default();
        for _ in 0..50 {
            assert_eq!(limiter.on_connection("c", &cfg), Verdict::Pass);
        }
    }
}
