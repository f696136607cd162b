//! Rule-file loading: parse a YAML document into a `Config` — a per-hook
//! table of compiled directive trees — via `serde_yaml`, walking the
//! resulting value tree and building the directive/comparison forest
//! directly rather than through `serde`'s derive machinery (the grammar's
//! `name<arg>` key sugar and combined `when`/`do`, `with`/`select`/`for-each`
//! shapes don't map onto a fixed struct shape).
//!
//! Loading never aborts on the first bad directive: every problem is
//! recorded as an [`Errata`] note with a best-effort source mark and the
//! walker moves on to the next sibling. The caller decides whether
//! `Errata::is_ok()` means the config is usable.

use crate::adaptor::RequestSide;
use crate::comparison::{self, AllOf, AnyOf, Comparison, NoneOf};
use crate::context::Context;
use crate::directive::{self, Directive, DirectiveList, SelectCase};
use crate::error::{Errata, SourceMark};
use crate::expr::{self, Expr};
use crate::hook::Hook;
use crate::value::Feature;
use crate::yaml::{self, Node};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded rule file: a compiled directive list per hook, plus the regex
/// capture-group floor those directives impose.
pub struct Config {
    hooks: HashMap<Hook, Arc<DirectiveList>>,
    pub capture_groups: usize,
}

impl Config {
    /// The top-level directive list attached to `hook`, if the rule file
    /// declared any (via a top-level `when` for a global config, or a bare
    /// entry under the `.` remap root).
    pub fn directives_for(&self, hook: Hook) -> Option<Arc<DirectiveList>> {
        self.hooks.get(&hook).cloned()
    }

    /// Run everything scheduled for `hook`: the static list this config
    /// built at load time, then whatever was dynamically scheduled onto
    /// `ctx` by a directive that already ran this transaction — drained
    /// with "walk-while-growing" semantics: a callback invoked mid-drain may
    /// append another entry for the same hook, and that entry still runs
    /// before this call returns.
    pub fn invoke_hook(&self, hook: Hook, ctx: &mut Context) {
        if let Some(list) = self.hooks.get(&hook) {
            let _ = list.invoke(ctx);
        }
        if ctx.is_terminal() {
            ctx.clear_dynamic(hook);
            return;
        }
        let mut i = 0;
        while i < ctx.dynamic_len(hook) {
            if let Some(directive) = ctx.dynamic_get(hook, i) {
                if let Err(err) = directive.invoke(ctx) {
                    tracing::warn!(error = %err, hook = hook.name(), "scheduled directive failed, continuing hook");
                }
            }
            if ctx.is_terminal() {
                break;
            }
            i += 1;
        }
        ctx.clear_dynamic(hook);
    }

    pub fn from_file(path: impl AsRef<Path>) -> (Config, Errata) {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(source) => Config::from_yaml_str(&source, path.to_path_buf()),
            Err(e) => {
                let mut errata = Errata::new();
                errata.push_error(format!("failed to read '{}': {e}", path.display()));
                (empty_config(), errata)
            }
        }
    }

    pub fn from_yaml_str(source: &str, file: impl Into<PathBuf>) -> (Config, Errata) {
        let file: PathBuf = file.into();
        let mut errata = Errata::new();
        let (value, file) = match yaml::parse(source, file.clone()) {
            Ok(v) => v,
            Err(e) => {
                errata.push_error_at(format!("YAML syntax error: {e}"), SourceMark { file, line: None });
                return (empty_config(), errata);
            }
        };
        let root = Node::root(&value, &file, source);
        let mut ldc = LoadCtx {
            errata: &mut errata,
            capture_groups: 0,
        };
        let mut hooks: HashMap<Hook, Vec<Arc<dyn Directive>>> = HashMap::new();
        if let Some(remap) = root.get(".") {
            parse_top_level(&remap, Hook::Remap, &mut ldc, &mut hooks);
        } else if let Some(global) = root.get("txn_box") {
            parse_top_level(&global, Hook::PostLoad, &mut ldc, &mut hooks);
        } else {
            ldc.errata.push_error("rule file must have a 'txn_box' or '.' root key");
        }
        let capture_groups = ldc.capture_groups.max(1);
        let hooks = hooks
            .into_iter()
            .map(|(hook, directives)| (hook, Arc::new(DirectiveList(directives))))
            .collect();
        (Config { hooks, capture_groups }, errata)
    }
}

fn empty_config() -> Config {
    Config {
        hooks: HashMap::new(),
        capture_groups: 1,
    }
}

struct LoadCtx<'a> {
    errata: &'a mut Errata,
    capture_groups: usize,
}

/// What a single directive-object entry resolves to: either a plain node
/// in the tree, or a top-level `when` whose `do` list belongs to a
/// specific hook rather than the enclosing list.
enum ParsedDirective {
    Scheduled(Hook, Vec<Arc<dyn Directive>>),
    Plain(Arc<dyn Directive>),
}

/// Keys that are only ever consumed as a companion of some other key in
/// the same object (`when`+`do`, `with`+`select`+`for-each`) and are never
/// themselves a directive name to dispatch on.
const COMPANION_KEYS: [&str; 3] = ["do", "select", "for-each"];

fn parse_top_level(
    seq: &Node,
    default_hook: Hook,
    ldc: &mut LoadCtx,
    hooks: &mut HashMap<Hook, Vec<Arc<dyn Directive>>>,
) {
    for item in seq.as_sequence() {
        match parse_directive_object(&item, ldc) {
            Some(ParsedDirective::Plain(d)) => hooks.entry(default_hook).or_default().push(d),
            Some(ParsedDirective::Scheduled(hook, body)) => hooks.entry(hook).or_default().extend(body),
            None => {}
        }
    }
}

/// Parse a nested `do:` list. Unlike `parse_top_level`, a `when` entry
/// found here is a genuine runtime schedule (wrapped in
/// `directive::When`), since there's no static hook table to flatten it
/// into at this nesting depth.
fn parse_directive_list(seq: &Node, ldc: &mut LoadCtx) -> Vec<Arc<dyn Directive>> {
    let mut out = Vec::new();
    for item in seq.as_sequence() {
        match parse_directive_object(&item, ldc) {
            Some(ParsedDirective::Plain(d)) => out.push(d),
            Some(ParsedDirective::Scheduled(hook, body)) => {
                out.push(Arc::new(directive::When {
                    hook,
                    body: Arc::new(DirectiveList(body)),
                }) as Arc<dyn Directive>);
            }
            None => {}
        }
    }
    out
}

fn parse_directive_object(node: &Node, ldc: &mut LoadCtx) -> Option<ParsedDirective> {
    for (key, value_node) in node.as_mapping_entries() {
        if COMPANION_KEYS.contains(&key) {
            continue;
        }
        let (base, arg) = split_key(key);
        let mark = node.mark_for(key);
        let built = match base {
            "when" => return build_when(node, ldc),
            "with" => return build_with(node, ldc),
            "var" => return build_var(node, ldc),
            "redirect" => return build_redirect(node, ldc),
            "stat-define" => return build_stat_define(node, ldc),
            "text-block-define" => return build_text_block_define(node, ldc),
            "ip-space-define" => return build_ip_space_define(node, ldc),
            "debug" => build_debug(&value_node, mark, ldc),
            "status" => build_status(&value_node, mark, ldc),
            "txn-conf" => build_txn_conf(arg, &value_node, mark, ldc),
            "stat-update" => build_stat_update(arg, &value_node, mark, ldc),
            "ua-req-field" | "proxy-req-field" | "remove-ua-req-field" | "remove-proxy-req-field" => {
                build_request_field(base, arg, &value_node, mark, ldc)
            }
            "ua-req-host" | "ua-req-path" | "proxy-req-host" | "proxy-req-path" => {
                build_url_component(base, &value_node, mark, ldc)
            }
            _ => continue,
        };
        return built.map(ParsedDirective::Plain);
    }
    ldc.errata.push_warning(format!("no recognized directive key ({})", node.mark()));
    None
}

// ---- when / do ----

fn build_when(node: &Node, ldc: &mut LoadCtx) -> Option<ParsedDirective> {
    let mark = node.mark_for("when");
    let Some(hook_name) = node.get("when").and_then(|n| n.as_str().map(str::to_string)) else {
        ldc.errata.push_error_at("'when' expects a hook name", mark);
        return None;
    };
    let Some(hook) = Hook::from_name(hook_name.trim()) else {
        ldc.errata.push_error_at(format!("unknown hook '{hook_name}'"), mark);
        return None;
    };
    if !hook.is_schedulable_target() {
        ldc.errata.push_error_at(
            format!("'{hook_name}' is not a valid 'when' target; attach it via the '.' remap root instead"),
            mark,
        );
        return None;
    }
    let Some(do_node) = node.get("do") else {
        ldc.errata.push_error_at("'when' requires a 'do' list", mark);
        return None;
    };
    let body = parse_directive_list(&do_node, ldc);
    Some(ParsedDirective::Scheduled(hook, body))
}

// ---- with / select / for-each ----

fn build_with(node: &Node, ldc: &mut LoadCtx) -> Option<ParsedDirective> {
    let mark = node.mark_for("with");
    let with_node = node.get("with")?;
    let expr = parse_expr_value(with_node.value, mark, ldc)?;
    let for_each = node
        .get("for-each")
        .map(|n| value_is_truthy(n.value))
        .unwrap_or(false);

    let mut cases = Vec::new();
    let mut default = None;
    if let Some(select_node) = node.get("select") {
        for case_node in select_node.as_sequence() {
            match build_select_case(&case_node, ldc) {
                Some(CaseOrDefault::Case(c)) => cases.push(c),
                Some(CaseOrDefault::Default(d)) => {
                    if default.is_some() {
                        ldc.errata.push_warning("multiple default 'select' cases; keeping the first");
                    } else {
                        default = Some(d);
                    }
                }
                None => {}
            }
        }
    } else if let Some(do_node) = node.get("do") {
        let body = parse_directive_list(&do_node, ldc);
        default = Some(Arc::new(DirectiveList(body)) as Arc<dyn Directive>);
    }

    let directive: Arc<dyn Directive> = if for_each {
        Arc::new(directive::ForEach { expr, cases, default })
    } else {
        Arc::new(directive::With { expr, cases, default })
    };
    Some(ParsedDirective::Plain(directive))
}

enum CaseOrDefault {
    Case(SelectCase),
    Default(Arc<dyn Directive>),
}

/// One `select` entry: an optional comparison key (its absence means
/// "always match", i.e. the `default` arm) plus an optional `do` body.
fn build_select_case(node: &Node, ldc: &mut LoadCtx) -> Option<CaseOrDefault> {
    let needs_remainder = subtree_references_remainder(node.value);
    let mut comparison_key: Option<(&str, Option<&str>)> = None;
    let mut comparison_node = None;
    for (key, value_node) in node.as_mapping_entries() {
        if key == "do" {
            continue;
        }
        comparison_key = Some(split_key(key));
        comparison_node = Some(value_node);
        break;
    }
    let body: Arc<dyn Directive> = match node.get("do") {
        Some(do_node) => Arc::new(DirectiveList(parse_directive_list(&do_node, ldc))),
        None => Arc::new(DirectiveList(Vec::new())),
    };
    match (comparison_key, comparison_node) {
        (None, _) => Some(CaseOrDefault::Default(body)),
        (Some((base, arg)), Some(value_node)) => {
            let comparison = build_comparison(base, arg, &value_node, ldc)?;
            Some(CaseOrDefault::Case(SelectCase {
                comparison,
                body,
                needs_remainder,
            }))
        }
        _ => None,
    }
}

fn build_comparison(base: &str, arg: Option<&str>, value_node: &Node, ldc: &mut LoadCtx) -> Option<Arc<dyn Comparison>> {
    let nc = matches!(arg, Some(m) if m.eq_ignore_ascii_case("nc"));
    match base {
        "any-of" | "all-of" | "none-of" => {
            let mut children = Vec::new();
            for child in value_node.as_sequence() {
                for (key, child_value) in child.as_mapping_entries() {
                    let (cbase, carg) = split_key(key);
                    if let Some(c) = build_comparison(cbase, carg, &child_value, ldc) {
                        children.push(c);
                    }
                    break;
                }
            }
            Some(match base {
                "any-of" => Arc::new(AnyOf(children)) as Arc<dyn Comparison>,
                "all-of" => Arc::new(AllOf(children)) as Arc<dyn Comparison>,
                _ => Arc::new(NoneOf(children)) as Arc<dyn Comparison>,
            })
        }
        _ => {
            let Some(factory) = comparison::REGISTRY.get(base) else {
                ldc.errata.push_error(format!("unknown comparison '{base}'"));
                return None;
            };
            let arg_text = value_to_arg_string(value_node.value);
            match factory.build(&arg_text, nc) {
                Ok(c) => Some(c),
                Err(msg) => {
                    ldc.errata.push_error(format!("comparison '{base}' failed: {msg}"));
                    None
                }
            }
        }
    }
}

// ---- variables / txn-conf ----

fn build_var(node: &Node, ldc: &mut LoadCtx) -> Option<ParsedDirective> {
    let var_node = node.get("var")?;
    let mut sets: Vec<Arc<dyn Directive>> = Vec::new();
    for (name, value_node) in var_node.as_mapping_entries() {
        let mark = var_node.mark_for(name);
        if let Some(value) = parse_expr_value(value_node.value, mark, ldc) {
            sets.push(Arc::new(directive::SetVar {
                name: name.to_string(),
                value,
            }));
        }
    }
    Some(ParsedDirective::Plain(Arc::new(DirectiveList(sets))))
}

fn build_txn_conf(arg: Option<&str>, value_node: &Node, mark: SourceMark, ldc: &mut LoadCtx) -> Option<Arc<dyn Directive>> {
    let Some(name) = arg else {
        ldc.errata.push_error_at("'txn-conf' requires a <name> argument", mark);
        return None;
    };
    let value = parse_expr_value(value_node.value, mark, ldc)?;
    Some(Arc::new(directive::SetTxnConf {
        name: name.to_string(),
        value,
    }))
}

// ---- header / status mutators ----

fn build_request_field(
    base: &str,
    arg: Option<&str>,
    value_node: &Node,
    mark: SourceMark,
    ldc: &mut LoadCtx,
) -> Option<Arc<dyn Directive>> {
    let Some(name) = arg else {
        ldc.errata.push_error_at(format!("'{base}' requires a <header-name> argument"), mark);
        return None;
    };
    let side = if base.contains("proxy") {
        RequestSide::Proxy
    } else {
        RequestSide::UserAgent
    };
    if base.starts_with("remove-") {
        return Some(Arc::new(directive::RemoveRequestHeader {
            side,
            name: name.to_string(),
        }));
    }
    let value = parse_expr_value(value_node.value, mark, ldc)?;
    Some(Arc::new(directive::SetRequestHeader {
        side,
        name: name.to_string(),
        value,
    }))
}

fn build_url_component(
    base: &str,
    value_node: &Node,
    mark: SourceMark,
    ldc: &mut LoadCtx,
) -> Option<Arc<dyn Directive>> {
    let (side, field) = match base {
        "ua-req-host" => (RequestSide::UserAgent, "url-host"),
        "ua-req-path" => (RequestSide::UserAgent, "url-path"),
        "proxy-req-host" => (RequestSide::Proxy, "url-host"),
        "proxy-req-path" => (RequestSide::Proxy, "url-path"),
        _ => unreachable!(),
    };
    let value = parse_expr_value(value_node.value, mark, ldc)?;
    Some(Arc::new(directive::SetRequestField { side, field, value }))
}

fn build_status(value_node: &Node, mark: SourceMark, ldc: &mut LoadCtx) -> Option<Arc<dyn Directive>> {
    let status = parse_expr_value(value_node.value, mark, ldc)?;
    Some(Arc::new(directive::SetResponseStatus { status }))
}

fn build_debug(value_node: &Node, mark: SourceMark, ldc: &mut LoadCtx) -> Option<Arc<dyn Directive>> {
    let message = parse_expr_value(value_node.value, mark, ldc)?;
    Some(Arc::new(directive::Debug { message }))
}

fn build_redirect(node: &Node, ldc: &mut LoadCtx) -> Option<ParsedDirective> {
    let redirect_node = node.get("redirect")?;
    let status = redirect_node
        .get("status")
        .and_then(|n| n.value.as_u64())
        .unwrap_or(302) as u16;
    let Some(location_node) = redirect_node.get("location") else {
        ldc.errata
            .push_error_at("'redirect' requires a 'location'", node.mark_for("redirect"));
        return None;
    };
    let location = parse_expr_value(location_node.value, redirect_node.mark_for("location"), ldc)?;
    Some(ParsedDirective::Plain(Arc::new(directive::Redirect { location, status })))
}

// ---- stats / text-blocks / ip-space ----

fn build_stat_define(node: &Node, ldc: &mut LoadCtx) -> Option<ParsedDirective> {
    let sd_node = node.get("stat-define")?;
    let Some(name) = sd_node.get("name").and_then(|n| n.as_str()) else {
        ldc.errata
            .push_error_at("'stat-define' requires a 'name'", node.mark_for("stat-define"));
        return None;
    };
    Some(ParsedDirective::Plain(Arc::new(directive::StatDefine {
        name: name.to_string(),
    })))
}

fn build_stat_update(arg: Option<&str>, value_node: &Node, mark: SourceMark, ldc: &mut LoadCtx) -> Option<Arc<dyn Directive>> {
    let Some(name) = arg else {
        ldc.errata.push_error_at("'stat-update' requires a <name> argument", mark);
        return None;
    };
    let delta = match scalar_as_text(value_node.value) {
        Some(_) => parse_expr_value(value_node.value, mark, ldc).unwrap_or(Expr::Literal(Feature::Integer(1))),
        None => Expr::Literal(Feature::Integer(1)),
    };
    Some(Arc::new(directive::StatUpdate {
        name: name.to_string(),
        delta,
    }))
}

fn build_text_block_define(node: &Node, ldc: &mut LoadCtx) -> Option<ParsedDirective> {
    let tb_node = node.get("text-block-define")?;
    let mark = node.mark_for("text-block-define");
    let Some(name) = tb_node.get("name").and_then(|n| n.as_str()) else {
        ldc.errata.push_error_at("'text-block-define' requires a 'name'", mark);
        return None;
    };
    let content = if let Some(text_node) = tb_node.get("text") {
        text_node.as_str().unwrap_or_default().to_string()
    } else if let Some(path_node) = tb_node.get("path") {
        let path = path_node.as_str().unwrap_or_default();
        match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                ldc.errata
                    .push_error_at(format!("failed to read text block file '{path}': {e}"), mark);
                String::new()
            }
        }
    } else {
        ldc.errata.push_error_at("'text-block-define' requires 'text' or 'path'", mark);
        String::new()
    };
    Some(ParsedDirective::Plain(Arc::new(directive::TextBlockDefine {
        name: name.to_string(),
        content,
    })))
}

fn build_ip_space_define(node: &Node, ldc: &mut LoadCtx) -> Option<ParsedDirective> {
    let is_node = node.get("ip-space-define")?;
    let mark = node.mark_for("ip-space-define");
    let Some(name) = is_node.get("name").and_then(|n| n.as_str()) else {
        ldc.errata.push_error_at("'ip-space-define' requires a 'name'", mark);
        return None;
    };
    let Some(path) = is_node.get("path").and_then(|n| n.as_str()) else {
        ldc.errata.push_error_at("'ip-space-define' requires a 'path'", mark);
        return None;
    };
    // `duration`/`columns` are accepted in the YAML but not applied here:
    // the reload cadence is a single process-wide interval
    // (`reload::spawn`) rather than per-table, and columns are recovered
    // from the CSV's own header row (`ipspace::parse_csv`) instead of a
    // separate declaration.
    Some(ParsedDirective::Plain(Arc::new(directive::IpSpaceDefine {
        name: name.to_string(),
        path: PathBuf::from(path),
    })))
}

// ---- scalar helpers ----

fn split_key(key: &str) -> (&str, Option<&str>) {
    if let Some(lt) = key.find('<') {
        if let Some(gt_rel) = key[lt..].find('>') {
            let name = key[..lt].trim();
            let arg = &key[lt + 1..lt + gt_rel];
            return (name, Some(arg));
        }
    }
    (key.trim(), None)
}

fn scalar_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_to_arg_string(value: &Value) -> String {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_as_text).collect::<Vec<_>>().join(","),
        other => scalar_as_text(other).unwrap_or_default(),
    }
}

fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_i64().map(|v| v != 0).unwrap_or(true),
        Value::String(s) => matches!(
            s.to_ascii_lowercase().as_str(),
            "true" | "yes" | "on" | "enable" | "1" | "y"
        ),
        _ => true,
    }
}

fn parse_expr_value(value: &Value, mark: SourceMark, ldc: &mut LoadCtx) -> Option<Expr> {
    let Some(text) = scalar_as_text(value) else {
        ldc.errata.push_error_at("expected a scalar expression", mark);
        return None;
    };
    match expr::parse(&text) {
        Ok(e) => {
            if let Some(idx) = e.max_capture_index() {
                ldc.capture_groups = ldc.capture_groups.max(idx + 1);
            }
            Some(e)
        }
        Err(msg) => {
            ldc.errata.push_error_at(format!("bad expression '{text}': {msg}"), mark);
            None
        }
    }
}

/// Best-effort static scan for whether a `select` case's subtree refers to
/// `{unmatched}`/`{active-feature}`: gates whether the governing comparison
/// bothers trimming `Context::remainder`/`Context::active` on a match at
/// all, since nothing downstream reads either otherwise.
fn subtree_references_remainder(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains("unmatched") || s.contains("active-feature"),
        Value::Sequence(items) => items.iter().any(subtree_references_remainder),
        Value::Mapping(map) => map.iter().any(|(k, v)| {
            k.as_str()
                .is_some_and(|s| s.contains("unmatched") || s.contains("active-feature"))
                || subtree_references_remainder(v)
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::TestAdaptor;
    use crate::context::Shared;

    fn ctx() -> Context {
        Context::new(Box::new(TestAdaptor::default()), Shared::default())
    }

    #[test]
    fn remap_root_attaches_bare_directives_to_remap_hook() {
        let source = r#"
.:
  - ua-req-field<Host>: "example.com"
"#;
        let (config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(errata.is_ok(), "{errata}");
        let mut c = ctx();
        config.invoke_hook(Hook::Remap, &mut c);
        assert_eq!(c.request_header("Host"), Some("example.com".to_string()));
    }

    #[test]
    fn when_do_assigns_body_to_named_hook() {
        let source = r#"
txn_box:
  - when: creq
    do:
      - status: "204"
"#;
        let (config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(errata.is_ok(), "{errata}");
        assert!(config.directives_for(Hook::Creq).is_some());
        assert!(config.directives_for(Hook::Prsp).is_none());
    }

    #[test]
    fn with_select_builds_matching_prefix_case() {
        let source = r#"
.:
  - with: "/api/users"
    select:
      - prefix: "/api/"
        do:
          - status: "200"
"#;
        let (config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(errata.is_ok(), "{errata}");
        let mut c = ctx();
        config.invoke_hook(Hook::Remap, &mut c);
        assert_eq!(c.request_header("x"), None);
    }

    #[test]
    fn select_case_with_unmatched_reference_needs_remainder() {
        let source = r#"
.:
  - with: "/api/users"
    select:
      - prefix: "/api/"
        do:
          - ua-req-field<X-Rest>: "{unmatched}"
"#;
        let (_config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(errata.is_ok(), "{errata}");
    }

    #[test]
    fn unknown_root_key_is_an_error() {
        let source = "nonsense:\n  - debug: \"hi\"\n";
        let (_config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(!errata.is_ok());
    }

    #[test]
    fn when_targeting_remap_is_rejected() {
        let source = r#"
txn_box:
  - when: remap
    do:
      - status: "200"
"#;
        let (_config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(!errata.is_ok());
    }

    #[test]
    fn var_directive_sets_named_variable() {
        let source = r#"
.:
  - var:
      greeting: "hello"
"#;
        let (config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(errata.is_ok(), "{errata}");
        let mut c = ctx();
        config.invoke_hook(Hook::Remap, &mut c);
        assert!(matches!(c.get_var("greeting"), Some(Feature::String(_))));
    }

    #[test]
    fn stat_define_then_update_defaults_to_plus_one() {
        let source = r#"
.:
  - stat-define: { name: hits }
  - stat-update<hits>:
"#;
        let (config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(errata.is_ok(), "{errata}");
        let mut c = ctx();
        config.invoke_hook(Hook::Remap, &mut c);
        assert_eq!(c.stats().read("hits"), 1);
    }

    #[test]
    fn redirect_defaults_status_to_302() {
        let source = r#"
.:
  - redirect: { location: "https://example.com/" }
"#;
        let (config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(errata.is_ok(), "{errata}");
        let mut c = ctx();
        config.invoke_hook(Hook::Remap, &mut c);
        assert!(c.is_terminal());
    }

    #[test]
    fn capture_reference_raises_capture_groups_floor() {
        let source = r#"
.:
  - with: "/user/42"
    select:
      - rxp: "^/user/([0-9]+)$"
        do:
          - ua-req-field<X-User>: "{1}"
"#;
        let (config, errata) = Config::from_yaml_str(source, "rules.yaml");
        assert!(errata.is_ok(), "{errata}");
        assert!(config.capture_groups >= 2);
    }
}
