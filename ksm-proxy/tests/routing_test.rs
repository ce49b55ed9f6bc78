//! Loads configuration from disk and checks routing decisions end to end.

use ksm_proxy::config::{load_backends, load_policy, ServerEntry};
use ksm_proxy::resolver::{Endpoint, Scheme};
use ksm_proxy::router::Router;
use ksm_proxy::{Decision, ProxyError};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn global_json(https_redirect: bool, blacklist: &[&str]) -> String {
    serde_json::json!({
        "env": {},
        "proxy": {
            "enable": true,
            "security": {
                "cert": { "public": "", "private": "" },
                "https-redirect": https_redirect,
                "ip-blacklist": blacklist,
            }
        }
    })
    .to_string()
}

struct Backend<'a> {
    domains: Vec<(&'a str, bool)>,
    http: u16,
    https: u16,
    block_by_default: bool,
    blacklist: Vec<&'a str>,
    whitelist: Vec<&'a str>,
}

impl<'a> Backend<'a> {
    fn literal(domain: &'a str, http: u16) -> Self {
        Self {
            domains: vec![(domain, false)],
            http,
            https: 0,
            block_by_default: false,
            blacklist: vec![],
            whitelist: vec![],
        }
    }

    fn json(&self) -> String {
        let domains: Vec<_> = self
            .domains
            .iter()
            .map(|(d, regex)| serde_json::json!({ "domain": d, "regex": regex, "regexFlags": "" }))
            .collect();
        serde_json::json!({
            "cwd": "/srv/app",
            "command": ["./app"],
            "env": {},
            "ports": { "http": self.http, "https": self.https },
            "proxy": {
                "enable": true,
                "domains": domains,
                "security": {
                    "ip-blacklist": self.blacklist,
                    "ip-whitelist": self.whitelist,
                    "block-by-default": self.block_by_default,
                }
            }
        })
        .to_string()
    }
}

/// Writes a global config, one descriptor per backend and the server list
fn setup(global: &str, backends: &[Backend]) -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.json", global);

    let entries: Vec<_> = backends
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let path = write(dir.path(), &format!("server-{}.json", i), &b.json());
            serde_json::json!({ "pid": -1, "path": path })
        })
        .collect();
    let serverlist = write(dir.path(), "serverlist.json", &serde_json::Value::from(entries).to_string());

    let policy = load_policy(&config, &serverlist).unwrap();
    (dir, Router::new(Arc::new(policy)))
}

#[test]
fn scenario_a_literal_domain_forwards_to_http_port() {
    let (_dir, router) = setup(&global_json(false, &[]), &[Backend::literal("api.example.com", 8080)]);

    assert_eq!(
        router.route(Some("api.example.com"), Some(ip("10.0.0.1")), Scheme::Plain),
        Decision::Forward(Endpoint::local(Scheme::Plain, 8080))
    );
}

#[test]
fn scenario_b_default_block_with_empty_whitelist_is_forbidden() {
    let backend = Backend {
        domains: vec![(r"^.*\.example\.com$", true)],
        http: 8080,
        https: 0,
        block_by_default: true,
        blacklist: vec![],
        whitelist: vec![],
    };
    let (_dir, router) = setup(&global_json(false, &[]), &[backend]);

    assert_eq!(
        router.route(Some("shop.example.com"), Some(ip("10.0.0.1")), Scheme::Plain),
        Decision::Forbidden
    );
}

#[test]
fn scenario_c_unknown_host_is_no_match() {
    let (_dir, router) = setup(&global_json(false, &[]), &[Backend::literal("api.example.com", 8080)]);

    assert_eq!(
        router.route(Some("unknown.test"), Some(ip("10.0.0.1")), Scheme::Plain),
        Decision::NoMatch
    );
}

#[test]
fn scenario_d_forced_https_with_inactive_tls_port() {
    let (_dir, router) = setup(&global_json(true, &[]), &[Backend::literal("api.example.com", 8080)]);

    assert_eq!(
        router.route(Some("api.example.com"), Some(ip("10.0.0.1")), Scheme::Plain),
        Decision::ServiceUnavailable
    );
}

#[test]
fn scenario_e_missing_host_is_bad_request() {
    let (_dir, router) = setup(&global_json(false, &[]), &[Backend::literal("api.example.com", 8080)]);

    assert_eq!(router.route(None, Some(ip("10.0.0.1")), Scheme::Plain), Decision::BadRequest);
}

#[test]
fn global_blacklist_applies_to_every_host() {
    let mut whitelisted = Backend::literal("api.example.com", 8080);
    whitelisted.block_by_default = true;
    whitelisted.whitelist = vec!["192.0.2.1"];
    let (_dir, router) = setup(&global_json(false, &["192.0.2.1"]), &[whitelisted]);

    for host in ["api.example.com", "unknown.test", "x"] {
        assert_eq!(
            router.route(Some(host), Some(ip("::ffff:192.0.2.1")), Scheme::Secure),
            Decision::Forbidden
        );
    }
}

#[test]
fn earlier_backend_wins_across_files() {
    let mut first = Backend::literal("shared.test", 8001);
    first.blacklist = vec!["10.0.0.1"];
    let second = Backend::literal("shared.test", 8002);
    let (_dir, router) = setup(&global_json(false, &[]), &[first, second]);

    assert_eq!(
        router.route(Some("shared.test"), Some(ip("10.0.0.1")), Scheme::Plain),
        Decision::Forbidden
    );
    assert_eq!(
        router.route(Some("shared.test"), Some(ip("10.0.0.2")), Scheme::Plain),
        Decision::Forward(Endpoint::local(Scheme::Plain, 8001))
    );
}

#[test]
fn broken_backends_are_excluded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let good = write(dir.path(), "good.json", &Backend::literal("good.test", 8080).json());
    let malformed = write(dir.path(), "malformed.json", "{ not json");
    let bad_regex = write(
        dir.path(),
        "bad-regex.json",
        &Backend {
            domains: vec![("(broken", true)],
            ..Backend::literal("", 8081)
        }
        .json(),
    );
    let wrong_type = write(
        dir.path(),
        "wrong-type.json",
        &Backend::literal("typed.test", 8082)
            .json()
            .replace(r#""enable":true"#, r#""enable":"yes""#),
    );

    let mut disabled = serde_json::from_str::<serde_json::Value>(&Backend::literal("off.test", 8083).json()).unwrap();
    disabled["proxy"]["enable"] = false.into();
    let disabled = write(dir.path(), "disabled.json", &disabled.to_string());

    let entries: Vec<ServerEntry> = [
        malformed,
        dir.path().join("missing.json"),
        dir.path().to_path_buf(),
        bad_regex,
        wrong_type,
        disabled,
        good,
    ]
    .into_iter()
    .map(|path| ServerEntry { pid: -1, path })
    .collect();

    let backends = load_backends(&entries);
    assert_eq!(backends.len(), 1);
    assert_eq!(backends[0].http_port, 8080);
}

#[test]
fn disabled_proxy_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(
        dir.path(),
        "config.json",
        r#"{"proxy": {"enable": false, "security": {"cert": {"public": "", "private": ""}}}}"#,
    );
    let serverlist = write(dir.path(), "serverlist.json", "[]");

    assert!(matches!(load_policy(&config, &serverlist), Err(ProxyError::ProxyDisabled)));
}

#[test]
fn unreadable_global_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let serverlist = write(dir.path(), "serverlist.json", "[]");

    assert!(load_policy(&dir.path().join("missing.json"), &serverlist).is_err());
}

#[test]
fn reloading_same_files_gives_same_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let config = write(dir.path(), "config.json", &global_json(false, &["203.0.113.9"]));
    let backend = write(dir.path(), "a.json", &Backend::literal("a.test", 8080).json());
    let serverlist = write(
        dir.path(),
        "serverlist.json",
        &serde_json::json!([{ "pid": 1, "path": backend }]).to_string(),
    );

    let first = Router::new(Arc::new(load_policy(&config, &serverlist).unwrap()));
    let second = Router::new(Arc::new(load_policy(&config, &serverlist).unwrap()));

    let inputs = [
        (Some("a.test"), Some(ip("10.0.0.1")), Scheme::Plain),
        (Some("a.test"), Some(ip("10.0.0.1")), Scheme::Secure),
        (Some("a.test"), Some(ip("203.0.113.9")), Scheme::Plain),
        (Some("b.test"), Some(ip("10.0.0.1")), Scheme::Plain),
        (Some("a.test"), None, Scheme::Plain),
    ];
    for (host, client, scheme) in inputs {
        assert_eq!(first.route(host, client, scheme), second.route(host, client, scheme));
    }
}
