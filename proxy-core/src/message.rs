//! Message & chunk model (component A).
//!
//! A request or response body or header value is represented as a sequence
//! of [`Chunk`]s — non-contiguous views into owned buffers — rather than a
//! single contiguous `Vec<u8>`. This mirrors how the upstream parser actually
//! hands data to the engine: a pipelined read may straddle several socket
//! reads, and re-copying everything into one buffer on every message would
//! defeat the point of streaming parsing.
//!
//! Once a [`Request`] or [`Response`] is constructed from a complete parse,
//! its envelope (method, URI, headers, body) is immutable. The engine only
//! ever mutates the small mutable slice described in the module docs below:
//! flags, timestamps, retry count, and the paired-response slot.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use bitflags::bitflags;

use crate::cliconn::CliConn;
use crate::hash::hash_chunks;
use crate::srvconn::SrvConn;

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkFlags: u8 {
        /// The chunk's bytes are fully received (no more data will be appended).
        const COMPLETE = 0b0000_0001;
    }
}

/// A non-owning view `(ptr, len, owning-buffer-handle, flags)` into part of a
/// parsed string or body. `buf` is reference-counted so many chunks (and many
/// messages, for headers shared by reference) can point into the same
/// underlying read buffer without copying.
#[derive(Debug, Clone)]
pub struct Chunk {
    buf: Arc<[u8]>,
    offset: usize,
    len: usize,
    flags: ChunkFlags,
}

impl Chunk {
    pub fn new(buf: Arc<[u8]>, offset: usize, len: usize) -> Self {
        assert!(offset + len <= buf.len(), "chunk out of bounds");
        Chunk {
            buf,
            offset,
            len,
            flags: ChunkFlags::COMPLETE,
        }
    }

    /// Build a single-chunk view over a standalone byte string (tests, and
    /// synthesized envelope fields such as `X-Forwarded-For`).
    pub fn owned(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let len = bytes.len();
        Chunk::new(Arc::from(bytes.into_boxed_slice()), 0, len)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn flags(&self) -> ChunkFlags {
        self.flags
    }
}

/// A string split across one or more non-contiguous chunks.
pub type ChunkedStr = Vec<Chunk>;

pub fn chunked_len(s: &[Chunk]) -> usize {
    s.iter().map(Chunk::len).sum()
}

pub fn chunked_to_vec(s: &[Chunk]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunked_len(s));
    for c in s {
        out.extend_from_slice(c.as_bytes());
    }
    out
}

pub fn single(bytes: impl Into<Vec<u8>>) -> ChunkedStr {
    vec![Chunk::owned(bytes)]
}

// ---------------------------------------------------------------------------
// Method / Version
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    Other,
}

impl Method {
    /// Safe methods never carry side effects; everything else is treated as
    /// non-idempotent unless a rule overrides it (§4.G step 2).
    pub fn is_safe(self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }

    pub fn mask_bit(self) -> u16 {
        match self {
            Method::Get => 1 << 0,
            Method::Head => 1 << 1,
            Method::Post => 1 << 2,
            Method::Put => 1 << 3,
            Method::Delete => 1 << 4,
            Method::Connect => 1 << 5,
            Method::Options => 1 << 6,
            Method::Trace => 1 << 7,
            Method::Patch => 1 << 8,
            Method::Other => 1 << 9,
        }
    }

    /// Canonical HTTP token, for rule-table `METHOD` matching (§4.E) and
    /// diagnostics. `Other` has no single token; rules that mean to match it
    /// use `wildcard` or the request's raw method is lost upstream of this
    /// enum.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
            Method::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http09,
    Http10,
    Http11,
    Http20,
}

// ---------------------------------------------------------------------------
// Header table
// ---------------------------------------------------------------------------

/// Numeric slots for headers the engine cares about directly. Anything else
/// lands in [`HeaderTable::raw`] and is only visible to `HDR_RAW` rule
/// matching (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum HeaderId {
    Host = 0,
    ContentType,
    ContentLength,
    Connection,
    Referer,
    Date,
    XForwardedFor,
    Via,
    SetCookie,
    Location,
    TransferEncoding,
    Server,
}

const HEADER_SLOT_COUNT: usize = HeaderId::Server as usize + 1;

#[derive(Debug, Clone, Default)]
pub enum HeaderSlot {
    #[default]
    Empty,
    Single(ChunkedStr),
    Dup(Vec<ChunkedStr>),
}

/// Header lookup is O(1) for known slots and O(k) over duplicates, per §4.A.
#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    slots: [HeaderSlot; HEADER_SLOT_COUNT],
    /// Headers the engine doesn't give a dedicated slot to; kept as
    /// `(name, value)` pairs for `HDR_RAW` rule evaluation.
    raw: Vec<(ChunkedStr, ChunkedStr)>,
}

// `[HeaderSlot; N]::default()` needs `HeaderSlot: Copy`, which it isn't
// (it owns `Vec`s), so the derive above relies on this manual array builder.
impl HeaderTable {
    pub fn new() -> Self {
        HeaderTable {
            slots: std::array::from_fn(|_| HeaderSlot::Empty),
            raw: Vec::new(),
        }
    }

    /// Insert a value into a known slot, promoting `Empty -> Single -> Dup`
    /// as duplicates arrive. Returns true if this insert created a duplicate
    /// (caller should set the `DUP_HEADER_SEEN` flag).
    pub fn insert(&mut self, id: HeaderId, value: ChunkedStr) -> bool {
        let slot = &mut self.slots[id as usize];
        match std::mem::take(slot) {
            HeaderSlot::Empty => {
                *slot = HeaderSlot::Single(value);
                false
            }
            HeaderSlot::Single(first) => {
                *slot = HeaderSlot::Dup(vec![first, value]);
                true
            }
            HeaderSlot::Dup(mut vs) => {
                vs.push(value);
                *slot = HeaderSlot::Dup(vs);
                true
            }
        }
    }

    pub fn remove(&mut self, id: HeaderId) {
        self.slots[id as usize] = HeaderSlot::Empty;
    }

    /// First value in the slot (or the single value), if any.
    pub fn get(&self, id: HeaderId) -> Option<&ChunkedStr> {
        match &self.slots[id as usize] {
            HeaderSlot::Empty => None,
            HeaderSlot::Single(v) => Some(v),
            HeaderSlot::Dup(vs) => vs.first(),
        }
    }

    pub fn get_all(&self, id: HeaderId) -> &[ChunkedStr] {
        match &self.slots[id as usize] {
            HeaderSlot::Empty => &[],
            HeaderSlot::Single(v) => std::slice::from_ref(v),
            HeaderSlot::Dup(vs) => vs,
        }
    }

    pub fn is_duplicate(&self, id: HeaderId) -> bool {
        matches!(&self.slots[id as usize], HeaderSlot::Dup(_))
    }

    pub fn push_raw(&mut self, name: ChunkedStr, value: ChunkedStr) {
        self.raw.push((name, value));
    }

    pub fn raw(&self) -> &[(ChunkedStr, ChunkedStr)] {
        &self.raw
    }

    pub fn header_count(&self) -> usize {
        let known: usize = self
            .slots
            .iter()
            .map(|s| match s {
                HeaderSlot::Empty => 0,
                HeaderSlot::Single(_) => 1,
                HeaderSlot::Dup(vs) => vs.len(),
            })
            .sum();
        known + self.raw.len()
    }
}

// ---------------------------------------------------------------------------
// Message flags / envelope
// ---------------------------------------------------------------------------

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MsgFlags: u16 {
        const CONN_CLOSE       = 1 << 0;
        const CONN_KEEP_ALIVE  = 1 << 1;
        const NON_IDEMPOTENT   = 1 << 2;
        const DUP_HEADER_SEEN  = 1 << 3;
        const FULL_URI         = 1 << 4;
        const VOID_BODY        = 1 << 5;
        const STALE            = 1 << 6;
        const HAS_DATE         = 1 << 7;
    }
}

/// The immutable, append-only part of a parsed message, shared by requests
/// and responses.
#[derive(Debug)]
pub struct MsgEnvelope {
    pub method: Method,
    pub version: Version,
    pub uri: ChunkedStr,
    pub host: ChunkedStr,
    pub headers: HeaderTable,
    pub body: Vec<Chunk>,
    pub chunked: bool,
    pub content_length: Option<u64>,
}

impl MsgEnvelope {
    pub fn uri_path_bytes(&self) -> Vec<u8> {
        chunked_to_vec(&self.uri)
    }
}

// ---------------------------------------------------------------------------
// Status taxonomy (§7)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok200,
    Found302,
    BadRequest400,
    Forbidden403,
    NotFound404,
    InternalError500,
    BadGateway502,
    GatewayTimeout504,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok200 => 200,
            Status::Found302 => 302,
            Status::BadRequest400 => 400,
            Status::Forbidden403 => 403,
            Status::NotFound404 => 404,
            Status::InternalError500 => 500,
            Status::BadGateway502 => 502,
            Status::GatewayTimeout504 => 504,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok200 => "OK",
            Status::Found302 => "Found",
            Status::BadRequest400 => "Bad Request",
            Status::Forbidden403 => "Forbidden",
            Status::NotFound404 => "Not Found",
            Status::InternalError500 => "Internal Server Error",
            Status::BadGateway502 => "Bad Gateway",
            Status::GatewayTimeout504 => "Gateway Timeout",
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A parsed client request plus the engine-owned envelope described in
/// §3 ("A request additionally carries...").
pub struct Request {
    pub id: RequestId,
    pub envelope: MsgEnvelope,
    pub cli_conn: Weak<CliConn>,
    /// Weak until the request is actually forwarded; set by `SrvConn::enqueue`.
    pub srv_conn: Mutex<Option<Weak<SrvConn>>>,
    pub resp: Mutex<Option<Arc<Response>>>,
    pub session: Option<String>,
    pub error: Mutex<Option<(Status, &'static str)>>,
    flags: Mutex<MsgFlags>,
    receipt_ts: Instant,
    tx_ts: Mutex<Option<Instant>>,
    retry_count: AtomicU32,
    key_hash: OnceLock<u64>,
    /// Headers the engine adds on top of the immutable parsed envelope
    /// before forwarding (`X-Forwarded-For`, `Via`, ...) — §4.G "Adjust
    /// request". Kept separate from [`MsgEnvelope::headers`] rather than
    /// mutating the parsed header table in place, since the envelope is
    /// otherwise append-only after a complete parse.
    adjustments: Mutex<Vec<(String, String)>>,
    dropped_headers: Mutex<Vec<String>>,
}

impl Request {
    pub fn new(envelope: MsgEnvelope, cli_conn: Weak<CliConn>, flags: MsgFlags) -> Arc<Self> {
        Arc::new(Request {
            id: RequestId::next(),
            envelope,
            cli_conn,
            srv_conn: Mutex::new(None),
            resp: Mutex::new(None),
            session: None,
            error: Mutex::new(None),
            flags: Mutex::new(flags),
            receipt_ts: Instant::now(),
            tx_ts: Mutex::new(None),
            retry_count: AtomicU32::new(0),
            key_hash: OnceLock::new(),
            adjustments: Mutex::new(Vec::new()),
            dropped_headers: Mutex::new(Vec::new()),
        })
    }

    pub fn add_adjustment_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.adjustments.lock().unwrap().push((name.into(), value.into()));
    }

    pub fn adjustment_headers(&self) -> Vec<(String, String)> {
        self.adjustments.lock().unwrap().clone()
    }

    pub fn drop_header(&self, name: impl Into<String>) {
        self.dropped_headers.lock().unwrap().push(name.into());
    }

    pub fn dropped_headers(&self) -> Vec<String> {
        self.dropped_headers.lock().unwrap().clone()
    }

    pub fn flags(&self) -> MsgFlags {
        *self.flags.lock().unwrap()
    }

    pub fn set_flags(&self, f: MsgFlags) {
        *self.flags.lock().unwrap() = f;
    }

    pub fn insert_flags(&self, f: MsgFlags) {
        *self.flags.lock().unwrap() |= f;
    }

    pub fn remove_flags(&self, f: MsgFlags) {
        self.flags.lock().unwrap().remove(f);
    }

    pub fn is_non_idempotent(&self) -> bool {
        self.flags().contains(MsgFlags::NON_IDEMPOTENT)
    }

    /// Clear the non-idempotent bit (§4.B enqueue / §9 "non-idempotent downgrading").
    pub fn clear_non_idempotent(&self) {
        self.remove_flags(MsgFlags::NON_IDEMPOTENT);
    }

    pub fn receipt_ts(&self) -> Instant {
        self.receipt_ts
    }

    pub fn age(&self) -> Duration {
        self.receipt_ts.elapsed()
    }

    pub fn mark_transmitted(&self) {
        *self.tx_ts.lock().unwrap() = Some(Instant::now());
    }

    pub fn tx_ts(&self) -> Option<Instant> {
        *self.tx_ts.lock().unwrap()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Monotonic: never decreases (P7).
    pub fn bump_retry_count(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn set_resp(&self, resp: Arc<Response>) {
        *self.resp.lock().unwrap() = Some(resp);
    }

    pub fn has_resp(&self) -> bool {
        self.resp.lock().unwrap().is_some()
    }

    pub fn take_resp(&self) -> Option<Arc<Response>> {
        self.resp.lock().unwrap().clone()
    }

    pub fn set_error(&self, status: Status, reason: &'static str) {
        *self.error.lock().unwrap() = Some((status, reason));
    }

    /// Memoized `H(uri) XOR method XOR H(host)` (§4.D hash scheduler), cached
    /// the way the original `tfw_http_req_key_calc` caches on `req->hash`
    /// (see SPEC_FULL.md §10.F) since a multi-chunk URI/Host is expensive to
    /// re-hash on every scheduler call.
    pub fn key_hash(&self) -> u64 {
        *self.key_hash.get_or_init(|| {
            hash_chunks(&self.envelope.uri)
                ^ u64::from(self.envelope.method.mask_bit())
                ^ hash_chunks(&self.envelope.host)
        })
    }

    pub fn set_srv_conn(&self, conn: Weak<SrvConn>) {
        *self.srv_conn.lock().unwrap() = Some(conn);
    }

    pub fn srv_conn(&self) -> Option<Weak<SrvConn>> {
        self.srv_conn.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.envelope.method)
            .field("flags", &self.flags())
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

/// A parsed upstream response (or a synthesized error response).
pub struct Response {
    pub envelope: MsgEnvelope,
    pub status: Status,
    pub srv_conn: Option<Weak<SrvConn>>,
    pub received_ts: Instant,
    date: Mutex<Option<String>>,
    stale: std::sync::atomic::AtomicBool,
    /// Headers the engine adds on top of the parsed envelope before
    /// returning to the client (`Date`, `Server`, hop-by-hop `Connection`,
    /// stale warning) — §4.G "Adjust response". See [`Request::adjustments`]
    /// for why this lives alongside rather than inside the envelope.
    adjustments: Mutex<Vec<(String, String)>>,
    dropped_headers: Mutex<Vec<String>>,
}

impl Response {
    pub fn new(envelope: MsgEnvelope, status: Status, srv_conn: Option<Weak<SrvConn>>) -> Arc<Self> {
        Arc::new(Response {
            envelope,
            status,
            srv_conn,
            received_ts: Instant::now(),
            date: Mutex::new(None),
            stale: std::sync::atomic::AtomicBool::new(false),
            adjustments: Mutex::new(Vec::new()),
            dropped_headers: Mutex::new(Vec::new()),
        })
    }

    pub fn add_adjustment_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.adjustments.lock().unwrap().push((name.into(), value.into()));
    }

    pub fn adjustment_headers(&self) -> Vec<(String, String)> {
        self.adjustments.lock().unwrap().clone()
    }

    pub fn drop_header(&self, name: impl Into<String>) {
        self.dropped_headers.lock().unwrap().push(name.into());
    }

    pub fn dropped_headers(&self) -> Vec<String> {
        self.dropped_headers.lock().unwrap().clone()
    }

    pub fn set_date(&self, date: String) {
        *self.date.lock().unwrap() = Some(date);
    }

    pub fn date(&self) -> Option<String> {
        self.date.lock().unwrap().clone()
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Relaxed);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }
}

/// Build a synthesized error response (§4.G "Error & retry path", §7) to be
/// routed through the originating `CliConn`'s sequence-queue so the client
/// sees the error in the request's original position.
pub fn synth_error_response(status: Status, reason: &'static str) -> Arc<Response> {
    let body = vec![Chunk::owned(reason.as_bytes().to_vec())];
    let envelope = MsgEnvelope {
        method: Method::Get,
        version: Version::Http11,
        uri: Vec::new(),
        host: Vec::new(),
        headers: HeaderTable::new(),
        content_length: Some(reason.len() as u64),
        body,
        chunked: false,
    };
    let resp = Response::new(envelope, status, None);
    resp.set_date(http_date_now());
    resp
}

/// IMF-fixdate timestamp for the literal `Date:` header (§6 error envelopes).
/// Deliberately hand-rolled rather than pulling in a date-formatting crate:
/// the only consumer is the fixed `HTTP/1.1 NNN ...` template in `engine.rs`.
pub fn http_date_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format_imf_fixdate(secs)
}

fn format_imf_fixdate(unix_secs: u64) -> String {
    const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let days_since_epoch = unix_secs / 86_400;
    let secs_of_day = unix_secs % 86_400;
    let (hour, minute, second) = (secs_of_day / 3600, (secs_of_day / 60) % 60, secs_of_day % 60);
    let weekday = DAYS[((days_since_epoch + 4) % 7) as usize]; // 1970-01-01 was a Thursday.

    // Civil-from-days (Howard Hinnant's algorithm).
    let z = days_since_epoch as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    format!(
        "{}, {:02} {} {} {:02}:{:02}:{:02} GMT",
        weekday,
        day,
        MONTHS[(month - 1) as usize],
        year,
        hour,
        minute,
        second
    )
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status.code())
            .field("stale", &self.is_stale())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_envelope() -> MsgEnvelope {
        MsgEnvelope {
            method: Method::Get,
            version: Version::Http11,
            uri: single("/"),
            host: single("example.com"),
            headers: HeaderTable::new(),
            body: vec![],
            chunked: false,
            content_length: None,
        }
    }

    #[test]
    fn header_table_promotes_empty_single_dup() {
        let mut t = HeaderTable::new();
        assert!(t.get(HeaderId::Via).is_none());
        assert!(!t.insert(HeaderId::Via, single("1.1 a")));
        assert!(!t.is_duplicate(HeaderId::Via));
        assert!(t.insert(HeaderId::Via, single("1.1 b")));
        assert!(t.is_duplicate(HeaderId::Via));
        assert_eq!(t.get_all(HeaderId::Via).len(), 2);
    }

    #[test]
    fn retry_count_is_monotonic() {
        let req = Request::new(empty_envelope(), Weak::new(), MsgFlags::empty());
        assert_eq!(req.retry_count(), 0);
        assert_eq!(req.bump_retry_count(), 1);
        assert_eq!(req.bump_retry_count(), 2);
        assert_eq!(req.retry_count(), 2);
    }

    #[test]
    fn key_hash_is_memoized_and_stable() {
        let req = Request::new(empty_envelope(), Weak::new(), MsgFlags::empty());
        let h1 = req.key_hash();
        let h2 = req.key_hash();
        assert_eq!(h1, h2);
    }

    #[test]
    fn imf_fixdate_matches_known_epoch_instants() {
        assert_eq!(format_imf_fixdate(0), "Thu, 01 Jan 1970 00:00:00 GMT");
        // 2000-01-01T00:00:00Z
        assert_eq!(format_imf_fixdate(946_684_800), "Sat, 01 Jan 2000 00:00:00 GMT");
    }

    #[test]
    fn non_idempotent_can_be_cleared() {
        let req = Request::new(empty_envelope(), Weak::new(), MsgFlags::NON_IDEMPOTENT);
        assert!(req.is_non_idempotent());
        req.clear_non_idempotent();
        assert!(!req.is_non_idempotent());
    }
}
