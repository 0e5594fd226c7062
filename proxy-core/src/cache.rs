//! External collaborator interface: the cache (§6 "To the cache").
//!
//! `cache_lookup`/`cache_store` are asynchronous from the engine's
//! standpoint and must be safe to call without holding any connection lock
//! (§5 "the cache callback executes without any connection lock held").
//! The Non-goal on an on-disk cache (SPEC_FULL.md) means no real
//! implementation ships in this crate, but the forwarding engine is built
//! against this trait so a cache can be plugged in without touching
//! `engine.rs`.

use std::sync::Arc;

use crate::message::{Request, Response};

pub trait Cache: Send + Sync {
    /// Look up a cached response for `req`. Returns `Some(resp)` on hit,
    /// `None` on miss; the engine adjusts and pairs the response itself
    /// rather than the cache driving a callback, since this port's engine
    /// path is synchronous per-request rather than callback-driven.
    fn lookup(&self, req: &Request) -> Option<Arc<Response>>;

    /// Store a freshly-forwarded response for future lookups.
    fn store(&self, req: &Request, resp: &Arc<Response>);
}

/// A cache that never has anything cached (§6 "cache invokes the engine
/// callback with ... `(req, None)` on miss"). The default collaborator
/// until a real cache is wired in.
pub struct NullCache;

impl Cache for NullCache {
    fn lookup(&self, _req: &Request) -> Option<Arc<Response>> {
        None
    }

    fn store(&self, _req: &Request, _resp: &Arc<Response>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{single, HeaderTable, Method, MsgEnvelope, MsgFlags, Version};
    use std::sync::Weak;

    #[test]
    fn null_cache_always_misses() {
        let cache = NullCache;
        let req = Request::new(
            MsgEnvelope {
                method: Method::Get,
                version: Version::Http11,
                uri: single("/"),
                host: single("example.com"),
                headers: HeaderTable::new(),
                body: vec![],
                chunked: false,
                content_length: None,
            },
            Weak::new(),
            MsgFlags::empty(),
        );
        assert!(cache.lookup(&req).is_none());
    }
}
