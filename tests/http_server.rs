use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::json;
use tickserve::{HttpServer, Param, Registry, ServerConfig, json_serializer};

const DEADLINE: Duration = Duration::from_secs(5);

/// Host state used by the test operations
#[derive(Default)]
struct Game {
    calls: Vec<i64>,
    spawned: u32,
}

struct Reply {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Reply {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

fn parse_reply(raw: &[u8]) -> Reply {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    let head = String::from_utf8_lossy(&raw[..split]);
    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
        .expect("bad status line");
    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    Reply { status, headers, body: raw[split + 4..].to_vec() }
}

fn send_raw(addr: SocketAddr, raw: String) -> JoinHandle<Reply> {
    thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(DEADLINE)).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        parse_reply(&buf)
    })
}

fn get(addr: SocketAddr, target: &str) -> JoinHandle<Reply> {
    send_raw(addr, format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target))
}

/// Keep ticking the host until the client has its answer.
fn pump_until(server: &mut HttpServer<Game>, game: &mut Game, client: JoinHandle<Reply>) -> Reply {
    let start = Instant::now();
    while !client.is_finished() {
        assert!(start.elapsed() < DEADLINE, "no response in time");
        server.pump(game);
        thread::sleep(Duration::from_millis(2));
    }
    client.join().unwrap()
}

fn wait_pending(server: &HttpServer<Game>, n: usize) {
    let start = Instant::now();
    while server.pending() < n {
        assert!(start.elapsed() < DEADLINE, "calls never reached the queue");
        thread::sleep(Duration::from_millis(2));
    }
}

fn registry() -> Registry<Game> {
    let mut registry = Registry::new();
    registry
        .register("Add", vec![Param::int("x"), Param::int("y")], |_, args| {
            Ok(Some((args.require::<i64>("x")? + args.require::<i64>("y")?).into()))
        })
        .register("Greet", vec![Param::string("name").with_default("world")], |_, args| {
            Ok(Some(format!("hello {}", args.require::<String>("name")?).into()))
        })
        .register("Record", vec![Param::int("n")], |game: &mut Game, args| {
            let n = args.require::<i64>("n")?;
            game.calls.push(n);
            Ok(Some(n.into()))
        })
        .register("SpawnCube", vec![], |game: &mut Game, _| {
            game.spawned += 1;
            Ok(None)
        })
        .register("Fail", vec![], |_, _| Err(anyhow::anyhow!("boom")))
        .register("Panic", vec![], |_, _| panic!("handler panicked"));
    registry
}

fn site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<html>home</html>").unwrap();
    fs::write(dir.path().join("data.bin"), (0u8..=255).cycle().take(5000).collect::<Vec<_>>()).unwrap();
    dir
}

fn config(root: &std::path::Path) -> ServerConfig {
    let mut config = ServerConfig::new(root, 0);
    config.bind_addr = "127.0.0.1".into();
    config.worker_threads = 4;
    config.shutdown_grace_ms = 200;
    config
}

fn started(config: ServerConfig) -> (HttpServer<Game>, SocketAddr) {
    let mut server = HttpServer::new(config, registry()).unwrap().with_serializer(json_serializer());
    let addr = server.start().unwrap();
    (server, addr)
}

#[test]
fn test_add_returns_serialized_sum() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();

    let reply = pump_until(&mut server, &mut game, get(addr, "/Add?x=2&y=3"));
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "5");
    assert_eq!(reply.header("content-type"), Some("application/json"));
    assert_eq!(reply.header("access-control-allow-origin"), Some("*"));
}

#[test]
fn test_default_and_no_value() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();

    let reply = pump_until(&mut server, &mut game, get(addr, "/Greet"));
    assert_eq!(reply.text(), "\"hello world\"");

    let reply = pump_until(&mut server, &mut game, get(addr, "/Greet?name=J%C3%BCrgen"));
    assert_eq!(reply.text(), "\"hello Jürgen\"");

    let reply = pump_until(&mut server, &mut game, get(addr, "/SpawnCube"));
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "{}");
    assert_eq!(game.spawned, 1);
}

#[test]
fn test_without_serializer_body_is_empty_object() {
    let root = site();
    let mut server = HttpServer::new(config(root.path()), registry()).unwrap();
    let addr = server.start().unwrap();
    let mut game = Game::default();

    let reply = pump_until(&mut server, &mut game, get(addr, "/Add?x=2&y=3"));
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "{}");
}

#[test]
fn test_conversion_error_is_500_with_detail() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();

    let reply = pump_until(&mut server, &mut game, get(addr, "/Add?x=two&y=3"));
    assert_eq!(reply.status, 500);
    let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("'x'"));

    let reply = pump_until(&mut server, &mut game, get(addr, "/Add?x=1"));
    assert_eq!(reply.status, 500);
}

#[test]
fn test_failing_call_does_not_affect_batch() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();

    let fail = get(addr, "/Fail");
    wait_pending(&server, 1);
    let panic = get(addr, "/Panic");
    wait_pending(&server, 2);
    let ok = get(addr, "/Record?n=7");
    wait_pending(&server, 3);

    assert_eq!(server.pump(&mut game), 3);

    let fail = fail.join().unwrap();
    assert_eq!(fail.status, 500);
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&fail.body).unwrap(), json!({"error": "Internal Server Error"}));
    assert_eq!(panic.join().unwrap().status, 500);
    let ok = ok.join().unwrap();
    assert_eq!(ok.status, 200);
    assert_eq!(ok.text(), "7");
    assert_eq!(game.calls, vec![7]);
}

#[test]
fn test_calls_run_in_arrival_order_on_one_pump() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();

    let clients: Vec<_> = (0..8)
        .map(|i| {
            let client = get(addr, &format!("/Record?n={}", i));
            wait_pending(&server, i as usize + 1);
            client
        })
        .collect();
    assert!(game.calls.is_empty());

    assert_eq!(server.pump(&mut game), 8);
    assert_eq!(game.calls, (0..8).collect::<Vec<i64>>());
    for (i, client) in clients.into_iter().enumerate() {
        assert_eq!(client.join().unwrap().text(), i.to_string());
    }
    assert_eq!(server.pump(&mut game), 0);
}

#[test]
fn test_static_files() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();

    let index = pump_until(&mut server, &mut game, get(addr, "/"));
    assert_eq!(index.status, 200);
    assert_eq!(index.header("content-type"), Some("text/html"));
    assert_eq!(index.text(), "<html>home</html>");

    let data = pump_until(&mut server, &mut game, get(addr, "/data.bin"));
    assert_eq!(data.status, 200);
    assert_eq!(data.header("content-type"), Some("application/octet-stream"));
    assert_eq!(data.header("content-length"), Some("5000"));
    assert_eq!(data.body, fs::read(root.path().join("data.bin")).unwrap());

    let missing = pump_until(&mut server, &mut game, get(addr, "/nonexistent.png"));
    assert_eq!(missing.status, 404);
    assert!(missing.text().contains("404"));

    let escape = pump_until(&mut server, &mut game, get(addr, "/../../etc/passwd"));
    assert_eq!(escape.status, 404);
    let encoded = pump_until(&mut server, &mut game, get(addr, "/%2e%2e/%2e%2e/etc/passwd"));
    assert_eq!(encoded.status, 404);
}

#[test]
fn test_case_insensitive_names() {
    let root = site();
    let mut cfg = config(root.path());
    cfg.case_sensitive_names = false;
    let (mut server, addr) = started(cfg);
    let mut game = Game::default();

    let reply = pump_until(&mut server, &mut game, get(addr, "/add?x=1&y=1"));
    assert_eq!(reply.text(), "2");
}

#[test]
fn test_case_sensitive_miss_falls_through_to_files() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();

    let reply = pump_until(&mut server, &mut game, get(addr, "/add?x=1&y=1"));
    assert_eq!(reply.status, 404);
}

#[test]
fn test_malformed_request_is_400() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();

    let reply = pump_until(&mut server, &mut game, send_raw(addr, "GET / FOO/1.1\r\n\r\n".into()));
    assert_eq!(reply.status, 400);
}

#[test]
fn test_request_body_is_ignored_without_reset() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();
    let body = "a".repeat(256 * 1024);

    let post = |target: &str| {
        send_raw(
            addr,
            format!("POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{}", target, body.len(), body),
        )
    };

    let reply = pump_until(&mut server, &mut game, post("/Add?x=2&y=3"));
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "5");

    let reply = pump_until(&mut server, &mut game, post("/index.html"));
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "<html>home</html>");
}

#[test]
fn test_stale_call_times_out() {
    let root = site();
    let mut cfg = config(root.path());
    cfg.invocation_timeout_ms = 20;
    let (mut server, addr) = started(cfg);
    let mut game = Game::default();

    let client = get(addr, "/Record?n=1");
    wait_pending(&server, 1);
    thread::sleep(Duration::from_millis(60));
    server.pump(&mut game);

    assert_eq!(client.join().unwrap().status, 504);
    assert!(game.calls.is_empty());
}

#[test]
fn test_stop_answers_queued_calls_and_is_idempotent() {
    let root = site();
    let (mut server, addr) = started(config(root.path()));
    let mut game = Game::default();

    let client = get(addr, "/Record?n=1");
    wait_pending(&server, 1);
    server.stop();

    assert_eq!(client.join().unwrap().status, 503);
    assert!(!server.is_running());
    assert_eq!(server.pump(&mut game), 0);
    assert!(game.calls.is_empty());

    server.stop();
    assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
}

#[test]
fn test_restart_after_stop() {
    let root = site();
    let (mut server, _) = started(config(root.path()));
    let mut game = Game::default();
    server.stop();

    let addr = server.start().unwrap();
    assert!(server.start().is_err());
    assert_eq!(server.local_addr(), Some(addr));

    let reply = pump_until(&mut server, &mut game, get(addr, "/Add?x=40&y=2"));
    assert_eq!(reply.text(), "42");
}
