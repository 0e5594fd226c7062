//! §8 scenario 3: like scenario 2, but the upstream resets the connection
//! after accepting the `POST` rather than staying silent. With
//! `retry_nonidempotent = false` the held request is dropped with a 504
//! naming the reason, rather than re-forwarded on reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use proxy_core::cache::NullCache;
use proxy_core::config::ServerGroupPolicy;
use proxy_core::frang::FrangLimiter;
use proxy_core::message::{single, HeaderTable, Method, MsgEnvelope, MsgFlags, Request, Response, Version};
use proxy_core::rules::{Action, Chain, Field, Op, Rule, Table};
use proxy_core::scheduler::RuleTableScheduler;
use proxy_core::transport::{ClientTransport, ServerTransport};
use proxy_core::{CliConn, Engine, Registry, SrvConn};

fn catch_all_vhost(group: &str) -> RuleTableScheduler {
    let entry = Chain {
        name: None,
        mark_rules: vec![],
        match_rules: vec![Rule {
            field: Field::Wildcard,
            op: Op::Wildcard,
            inv: false,
            arg: String::new(),
            action: Action::Vhost(group.to_owned()),
        }],
    };
    RuleTableScheduler::new(Table::new(vec![entry]).unwrap())
}

#[derive(Debug, Default)]
struct RecordingClient {
    responses: Mutex<Vec<(u16, Option<&'static str>)>>,
}
impl ClientTransport for RecordingClient {
    fn send_response(&self, resp: &Response) -> std::io::Result<()> {
        self.responses.lock().unwrap().push((resp.status.code(), None));
        Ok(())
    }
    fn close_sync(&self) {}
    fn peer_key(&self) -> String {
        "203.0.113.1:55000".to_owned()
    }
}

#[derive(Debug, Default)]
struct ResettableUpstream {
    live: AtomicBool,
}
impl ResettableUpstream {
    fn live() -> Arc<Self> {
        Arc::new(ResettableUpstream {
            live: AtomicBool::new(true),
        })
    }
}
impl ServerTransport for ResettableUpstream {
    fn send_request(&self, _req: &Request) -> std::io::Result<()> {
        Ok(())
    }
    fn close_sync(&self) {
        self.live.store(false, Ordering::Relaxed);
    }
    fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }
}

fn envelope(method: Method) -> MsgEnvelope {
    MsgEnvelope {
        method,
        version: Version::Http11,
        uri: single("/x"),
        host: single("example.com"),
        headers: HeaderTable::new(),
        body: vec![],
        chunked: false,
        content_length: None,
    }
}

#[test]
fn upstream_reset_drops_the_held_non_idempotent_request_instead_of_retrying_it() {
    let registry = Arc::new(Registry::new(Some(catch_all_vhost("api"))));
    let policy = ServerGroupPolicy {
        retry_nonidempotent: false,
        ..ServerGroupPolicy::default()
    };
    registry.add_group("api", policy).unwrap();
    let upstream = ResettableUpstream::live();
    let srv = SrvConn::new("10.0.0.1:80".into(), upstream.clone());
    registry.add_conn("api", srv.clone()).unwrap();
    let engine = Engine::new(registry.clone(), Arc::new(NullCache), Arc::new(FrangLimiter::new()));

    let client = Arc::new(RecordingClient::default());
    let cli = CliConn::new(client.clone());
    let post = Request::new(envelope(Method::Post), Arc::downgrade(&cli), MsgFlags::empty());
    engine.handle_request(&cli, post.clone());
    assert!(srv.has_nip_in_flight());

    // Upstream resets the connection.
    upstream.close_sync();
    let group_policy = registry.group_policy("api").unwrap();
    srv.transport_dropped(&group_policy);

    assert_eq!(client.responses.lock().unwrap().as_slice(), &[(504, None)]);
    assert_eq!(
        post.error.lock().unwrap().as_ref().map(|(_, reason)| *reason),
        Some("request dropped: non-idempotent requests are not re-forwarded")
    );
    assert_eq!(srv.qsize(), 0, "the dropped request no longer occupies the forwarding queue");
}
