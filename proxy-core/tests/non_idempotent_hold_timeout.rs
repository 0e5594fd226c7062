//! §8 scenario 2: a `POST` is forwarded and the upstream never answers.
//! Once `max_forward_timeout` elapses the client gets a synthesized 504 and
//! the connection is not reused for later pipelined work until the hold
//! clears (S2 hold invariant, P4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

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
    statuses: Mutex<Vec<u16>>,
}
impl ClientTransport for RecordingClient {
    fn send_response(&self, resp: &Response) -> std::io::Result<()> {
        self.statuses.lock().unwrap().push(resp.status.code());
        Ok(())
    }
    fn close_sync(&self) {}
    fn peer_key(&self) -> String {
        "203.0.113.3:55002".to_owned()
    }
}

#[derive(Debug, Default)]
struct SilentUpstream {
    live: AtomicBool,
}
impl SilentUpstream {
    fn live() -> Arc<Self> {
        Arc::new(SilentUpstream {
            live: AtomicBool::new(true),
        })
    }
}
impl ServerTransport for SilentUpstream {
    fn send_request(&self, _req: &Request) -> std::io::Result<()> {
        Ok(()) // accepted, but never answered
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
fn post_with_no_upstream_answer_times_out_with_a_504_and_holds_the_connection() {
    let registry = Arc::new(Registry::new(Some(catch_all_vhost("api"))));
    let policy = ServerGroupPolicy {
        max_forward_timeout: Duration::from_millis(20),
        ..ServerGroupPolicy::default()
    };
    registry.add_group("api", policy).unwrap();
    let upstream = SilentUpstream::live();
    let srv = SrvConn::new("10.0.0.1:80".into(), upstream);
    registry.add_conn("api", srv.clone()).unwrap();
    let engine = Engine::new(registry.clone(), Arc::new(NullCache), Arc::new(FrangLimiter::new()));

    let client = Arc::new(RecordingClient::default());
    let cli = CliConn::new(client.clone());
    let post = Request::new(envelope(Method::Post), Arc::downgrade(&cli), MsgFlags::empty());
    engine.handle_request(&cli, post.clone());

    assert!(post.is_non_idempotent());
    assert!(srv.has_nip_in_flight(), "POST is held on the server connection");
    assert!(client.statuses.lock().unwrap().is_empty());

    std::thread::sleep(Duration::from_millis(40));
    let group_policy = registry.group_policy("api").unwrap();
    srv.check_timeouts(&group_policy);

    assert_eq!(client.statuses.lock().unwrap().as_slice(), &[504]);
}
