//! End-to-end rule-file scenarios: each test loads a small YAML rule file
//! from a string, drives one hook against a [`TestAdaptor`], and checks the
//! resulting transaction state the way a host embedding the engine would.

use waypoint_core::adaptor::{RequestSide, TestAdaptor};
use waypoint_core::config::Config;
use waypoint_core::context::{Context, Shared};
use waypoint_core::hook::Hook;

fn load(yaml: &str) -> Config {
    let (config, errata) = Config::from_yaml_str(yaml, "test.yaml");
    assert!(errata.is_ok(), "config failed to load: {errata}");
    config
}

#[test]
fn host_rewrite_on_remap() {
    let config = load(
        r#"
txn_box:
  - when: remap
    do:
      - ua-req-host: "example.com"
"#,
    );
    let adaptor = TestAdaptor::default().with_ua_field("url-host", "old.example.net");
    let mut ctx = Context::new(Box::new(adaptor), Shared::default());
    config.invoke_hook(Hook::Remap, &mut ctx);
    ctx.run_finalizers();

    assert_eq!(
        ctx.request_field_side(RequestSide::UserAgent, "url-host"),
        Some("example.com".to_string())
    );
}

#[test]
fn prefix_strip_with_branching() {
    let config = load(
        r#"
txn_box:
  - when: creq
    do:
      - with: "{ua-req-path}"
        select:
          - prefix: "/api/"
            do:
              - ua-req-path: "/{active-feature}"
"#,
    );
    let adaptor = TestAdaptor::default().with_ua_field("url-path", "/api/v1/items");
    let mut ctx = Context::new(Box::new(adaptor), Shared::default());
    config.invoke_hook(Hook::Creq, &mut ctx);
    ctx.run_finalizers();

    assert_eq!(
        ctx.request_field_side(RequestSide::UserAgent, "url-path"),
        Some("/v1/items".to_string())
    );
}

#[test]
fn prefix_mismatch_leaves_path_untouched() {
    let config = load(
        r#"
txn_box:
  - when: creq
    do:
      - with: "{ua-req-path}"
        select:
          - prefix: "/api/"
            do:
              - ua-req-path: "/{active-feature}"
"#,
    );
    let adaptor = TestAdaptor::default().with_ua_field("url-path", "/static/logo.png");
    let mut ctx = Context::new(Box::new(adaptor), Shared::default());
    config.invoke_hook(Hook::Creq, &mut ctx);
    ctx.run_finalizers();

    assert_eq!(
        ctx.request_field_side(RequestSide::UserAgent, "url-path"),
        Some("/static/logo.png".to_string())
    );
}

#[test]
fn capture_and_reuse_on_proxy_header() {
    let config = load(
        r#"
txn_box:
  - when: creq
    do:
      - with: "{ua-req-path}"
        select:
          - rxp: "^/user/([0-9]+)/"
            do:
              - proxy-req-field<X-User>: "{1}"
"#,
    );
    let adaptor = TestAdaptor::default().with_ua_field("url-path", "/user/42/info");
    let mut ctx = Context::new(Box::new(adaptor), Shared::default());
    config.invoke_hook(Hook::Creq, &mut ctx);
    ctx.run_finalizers();

    assert_eq!(ctx.proxy_request_header("X-User"), Some("42".to_string()));
}

#[test]
fn stat_counter_accumulates_across_responses() {
    let config = load(
        r#"
txn_box:
  - stat-define:
      name: txnbox.hits
      value: 0
  - when: prsp
    do:
      - stat-update<txnbox.hits>: 1
"#,
    );
    let shared = Shared::default();

    // `stat-define` has no `when:` of its own, so it lands on the global
    // config's default hook (`PostLoad`) and must run once before the
    // counter is read.
    let mut load_ctx = Context::new(Box::new(TestAdaptor::default()), shared.clone());
    config.invoke_hook(Hook::PostLoad, &mut load_ctx);
    load_ctx.run_finalizers();

    let n = 5;
    for _ in 0..n {
        let mut ctx = Context::new(Box::new(TestAdaptor::default()), shared.clone());
        config.invoke_hook(Hook::Prsp, &mut ctx);
        ctx.run_finalizers();
    }

    assert_eq!(shared.stats.read("txnbox.hits"), n);
}

#[test]
fn redirect_marks_transaction_terminal() {
    let config = load(
        r#"
txn_box:
  - when: creq
    do:
      - with: "{ua-req-path}"
        select:
          - match: "/blocked"
            do:
              - redirect:
                  status: 451
                  location: "https://blocked.example/"
"#,
    );
    let adaptor = TestAdaptor::default().with_ua_field("url-path", "/blocked");
    let mut ctx = Context::new(Box::new(adaptor), Shared::default());
    config.invoke_hook(Hook::Creq, &mut ctx);
    ctx.run_finalizers();

    assert!(ctx.is_terminal());
}
