//! Directives: the executable nodes of a rule tree.
//!
//! `Directive` is the trait every node implements; `DirectiveList` chains a
//! hook's top-level directives together with non-terminal error semantics:
//! a `RuntimeError` on one directive logs and moves on, unless the
//! directive called `Context::mark_terminal`.

use crate::adaptor::RequestSide;
use crate::context::Context;
use crate::error::{RunResult, RuntimeError};
use crate::expr::{self, Expr};
use crate::hook::Hook;
use crate::value::Feature;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

pub trait Directive: Send + Sync {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()>;
}

/// A straight-line sequence of directives, run in order. A failing
/// directive is logged and does not stop the list unless it marked the
/// transaction terminal.
pub struct DirectiveList(pub Vec<Arc<dyn Directive>>);

impl Directive for DirectiveList {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        for directive in &self.0 {
            if let Err(err) = directive.invoke(ctx) {
                tracing::warn!(error = %err, "directive failed, continuing hook");
            }
            if ctx.is_terminal() {
                break;
            }
        }
        Ok(())
    }
}

// ---- header / URL / status mutators ----

pub struct SetRequestHeader {
    pub side: RequestSide,
    pub name: String,
    pub value: Expr,
}
impl Directive for SetRequestHeader {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let value = expr::evaluate(&self.value, ctx)?;
        let rendered = value.render();
        ctx.set_request_header_side(self.side, &self.name, &rendered);
        Ok(())
    }
}

pub struct RemoveRequestHeader {
    pub side: RequestSide,
    pub name: String,
}
impl Directive for RemoveRequestHeader {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        ctx.remove_request_header_side(self.side, &self.name);
        Ok(())
    }
}

/// Rewrites a URL component (`url-host`, `url-path`) rather than a header —
/// backs the `ua-req-host`/`ua-req-path`/`proxy-req-host`/`proxy-req-path`
/// sugar directives.
pub struct SetRequestField {
    pub side: RequestSide,
    pub field: &'static str,
    pub value: Expr,
}
impl Directive for SetRequestField {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let value = expr::evaluate(&self.value, ctx)?;
        let rendered = value.render();
        ctx.set_request_field_side(self.side, self.field, &rendered);
        Ok(())
    }
}

pub struct SetResponseStatus {
    pub status: Expr,
}
impl Directive for SetResponseStatus {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let value = expr::evaluate(&self.status, ctx)?;
        let status = value
            .as_integer()
            .ok_or_else(|| RuntimeError::directive("set-status", "expected an integer status code"))?;
        ctx.set_response_status(status as u16);
        Ok(())
    }
}

pub struct SetResponseHeader {
    pub name: String,
    pub value: Expr,
}
impl Directive for SetResponseHeader {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let value = expr::evaluate(&self.value, ctx)?;
        ctx.set_response_header(&self.name, &value.render());
        Ok(())
    }
}

pub struct Redirect {
    pub location: Expr,
    pub status: u16,
}
impl Directive for Redirect {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let value = expr::evaluate(&self.location, ctx)?;
        ctx.redirect(&value.render(), self.status);
        ctx.mark_terminal();
        Ok(())
    }
}

// ---- variables / txn-conf ----

pub struct SetVar {
    pub name: String,
    pub value: Expr,
}
impl Directive for SetVar {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let value = expr::evaluate(&self.value, ctx)?;
        ctx.set_var(&self.name, value);
        Ok(())
    }
}

pub struct SetTxnConf {
    pub name: String,
    pub value: Expr,
}
impl Directive for SetTxnConf {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let value = expr::evaluate(&self.value, ctx)?;
        ctx.set_txn_conf_override(&self.name, value);
        Ok(())
    }
}

// ---- stats / text-blocks / ip-space (definable from POST_LOAD) ----

pub struct StatDefine {
    pub name: String,
}
impl Directive for StatDefine {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        ctx.stats().define(self.name.as_str());
        Ok(())
    }
}

pub struct StatUpdate {
    pub name: String,
    /// Defaults to `+1` when not specified.
    pub delta: Expr,
}
impl Directive for StatUpdate {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let value = expr::evaluate(&self.delta, ctx)?;
        let delta = value.as_integer().unwrap_or(1);
        ctx.stat_update(&self.name, delta)
    }
}

pub struct TextBlockDefine {
    pub name: String,
    pub content: String,
}
impl Directive for TextBlockDefine {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        ctx.text_blocks().define(&self.name, self.content.as_str());
        Ok(())
    }
}

pub struct IpSpaceDefine {
    pub name: String,
    pub path: std::path::PathBuf,
}
impl Directive for IpSpaceDefine {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        match crate::ipspace::IpSpaceHandle::load(&self.path) {
            Ok(handle) => {
                ctx.ip_spaces().insert(self.name.clone(), Arc::new(handle));
                Ok(())
            }
            Err(errata) => Err(RuntimeError::directive(
                "ip-space-define",
                errata.to_string(),
            )),
        }
    }
}

pub struct Debug {
    pub message: Expr,
}
impl Directive for Debug {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let value = expr::evaluate(&self.message, ctx)?;
        tracing::debug!(message = %value.render(), "debug directive");
        Ok(())
    }
}

// ---- with / select / for-each ----

/// One arm of a `select`: a comparison factory instance plus the body to
/// run when it matches.
pub struct SelectCase {
    pub comparison: Arc<dyn crate::comparison::Comparison>,
    pub body: Arc<dyn Directive>,
    /// Whether this case's body references `{unmatched}`/`{active-feature}`
    /// (computed at load time by a one-pass scan) — gates whether the
    /// comparison bothers trimming `Context::remainder`/`Context::active`
    /// at all.
    pub needs_remainder: bool,
}

/// `with EXPR select { case ... }`: extracts `EXPR` once, sets it as the
/// active feature, then runs the first matching case's body.
pub struct With {
    pub expr: Expr,
    pub cases: Vec<SelectCase>,
    pub default: Option<Arc<dyn Directive>>,
}

impl Directive for With {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        let stack_depth = ctx.ip_space_depth();
        let active = expr::evaluate(&self.expr, ctx)?;
        ctx.set_active(active.clone());
        let mut result = Ok(());
        let mut matched = false;
        for case in &self.cases {
            ctx.set_update_remainder_p(case.needs_remainder);
            if case.comparison.test(&active, ctx)? {
                result = case.body.invoke(ctx);
                matched = true;
                break;
            }
        }
        if !matched {
            if let Some(default) = &self.default {
                result = default.invoke(ctx);
            }
        }
        ctx.truncate_ip_space_rows(stack_depth);
        result
    }
}

/// `with EXPR for-each select { ... }`: `EXPR` must evaluate to a tuple;
/// the governing expression is re-evaluated after each case body runs, so a
/// body that mutates state the expression depends on sees its own effect
/// reflected in the next element's scan.
pub struct ForEach {
    pub expr: Expr,
    pub cases: Vec<SelectCase>,
    pub default: Option<Arc<dyn Directive>>,
}

impl Directive for ForEach {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        loop {
            let stack_depth = ctx.ip_space_depth();
            let active = expr::evaluate(&self.expr, ctx)?;
            let crate::value::Feature::Tuple(items) = &active else {
                ctx.truncate_ip_space_rows(stack_depth);
                break;
            };
            if items.is_empty() {
                ctx.truncate_ip_space_rows(stack_depth);
                break;
            }
            let element = items[0].clone();
            ctx.set_active(element.clone());
            let mut matched = false;
            for case in &self.cases {
                ctx.set_update_remainder_p(case.needs_remainder);
                if case.comparison.test(&element, ctx)? {
                    case.body.invoke(ctx)?;
                    matched = true;
                    break;
                }
            }
            if !matched {
                if let Some(default) = &self.default {
                    default.invoke(ctx)?;
                }
            }
            ctx.truncate_ip_space_rows(stack_depth);
            if ctx.is_terminal() {
                break;
            }
        }
        Ok(())
    }
}

/// `when HOOK do { ... }`: schedules `body` to run the next time `hook`
/// fires for this transaction. Top-level `when` entries in
/// a rule file are resolved at load time instead (`config.rs` assigns their
/// `do` list straight to the target hook); this directive exists for the
/// dynamic case — a directive reached while running one hook schedules more
/// work for a hook still ahead of it.
pub struct When {
    pub hook: Hook,
    pub body: Arc<dyn Directive>,
}

impl Directive for When {
    fn invoke(&self, ctx: &mut Context) -> RunResult<()> {
        ctx.schedule_callback(self.hook, Arc::clone(&self.body));
        Ok(())
    }
}

// ---- registry (for YAML directive-name -> builder lookup) ----

pub trait DirectiveFactory: Send + Sync {
    /// Build a directive instance from a single YAML argument expression.
    /// Directives with richer shapes (`with`/`select`/`when`) are built
    /// directly by `config.rs`'s tree walker rather than through this
    /// single-`Expr` factory interface.
    fn build(&self, arg: Expr) -> Result<Arc<dyn Directive>, String>;
}

pub struct Registry {
    entries: DashMap<&'static str, Arc<dyn DirectiveFactory>>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            entries: DashMap::new(),
        }
    }

    pub fn register(&self, name: &'static str, factory: Arc<dyn DirectiveFactory>) {
        self.entries.insert(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DirectiveFactory>> {
        self.entries.get(name).map(|e| Arc::clone(&e))
    }
}

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let reg = Registry::new();
    builtins::register_all(&reg);
    reg
});

pub mod builtins {
    use super::*;

    pub fn register_all(reg: &Registry) {
        reg.register("ua-req-field", Arc::new(SetUaHeaderFactory));
        reg.register("proxy-req-field", Arc::new(SetProxyHeaderFactory));
        reg.register("status", Arc::new(SetStatusFactory));
        reg.register("var", Arc::new(SetVarFactory));
        reg.register("txn-conf", Arc::new(SetTxnConfFactory));
        reg.register("debug", Arc::new(DebugFactory));
    }

    struct SetUaHeaderFactory;
    impl DirectiveFactory for SetUaHeaderFactory {
        fn build(&self, _arg: Expr) -> Result<Arc<dyn Directive>, String> {
            Err("ua-req-field requires a header name; use config.rs's structured builder".to_string())
        }
    }

    struct SetProxyHeaderFactory;
    impl DirectiveFactory for SetProxyHeaderFactory {
        fn build(&self, _arg: Expr) -> Result<Arc<dyn Directive>, String> {
            Err("proxy-req-field requires a header name; use config.rs's structured builder".to_string())
        }
    }

    struct SetStatusFactory;
    impl DirectiveFactory for SetStatusFactory {
        fn build(&self, arg: Expr) -> Result<Arc<dyn Directive>, String> {
            Ok(Arc::new(SetResponseStatus { status: arg }))
        }
    }

    struct SetVarFactory;
    impl DirectiveFactory for SetVarFactory {
        fn build(&self, _arg: Expr) -> Result<Arc<dyn Directive>, String> {
            Err("var requires a name and value; use config.rs's structured builder".to_string())
        }
    }

    struct SetTxnConfFactory;
    impl DirectiveFactory for SetTxnConfFactory {
        fn build(&self, _arg: Expr) -> Result<Arc<dyn Directive>, String> {
            Err("txn-conf requires a name and value; use config.rs's structured builder".to_string())
        }
    }

    struct DebugFactory;
    impl DirectiveFactory for DebugFactory {
        fn build(&self, arg: Expr) -> Result<Arc<dyn Directive>, String> {
            Ok(Arc::new(Debug { message: arg }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::TestAdaptor;
    use crate::context::Shared;
    use crate::value::Feature;

    fn ctx() -> Context {
        Context::new(Box::new(TestAdaptor::default()), Shared::default())
    }

    #[test]
    fn failing_directive_does_not_abort_the_list() {
        struct AlwaysFails;
        impl Directive for AlwaysFails {
            fn invoke(&self, _ctx: &mut Context) -> RunResult<()> {
                Err(RuntimeError::directive("test", "boom"))
            }
        }
        let list = DirectiveList(vec![
            Arc::new(AlwaysFails),
            Arc::new(SetVar {
                name: "reached".to_string(),
                value: Expr::Literal(Feature::Boolean(true)),
            }),
        ]);
        let mut c = ctx();
        list.invoke(&mut c).unwrap();
        assert!(matches!(c.get_var("reached"), Some(Feature::Boolean(true))));
    }

    #[test]
    fn terminal_directive_stops_remaining_list() {
        let list = DirectiveList(vec![
            Arc::new(Redirect {
                location: Expr::Literal(Feature::string("https://example.com")),
                status: 302,
            }),
            Arc::new(SetVar {
                name: "unreached".to_string(),
                value: Expr::Literal(Feature::Boolean(true)),
            }),
        ]);
        let mut c = ctx();
        list.invoke(&mut c).unwrap();
        assert!(c.get_var("unreached").is_none());
    }

    #[test]
    fn stat_update_defaults_to_plus_one() {
        let directive = StatUpdate {
            name: "hits".to_string(),
            delta: Expr::Literal(Feature::Integer(1)),
        };
        let mut c = ctx();
        directive.invoke(&mut c).unwrap();
        assert_eq!(c.stats().read("hits"), 1);
    }

    #[test]
    fn with_select_runs_matching_case_body() {
        let comparison = crate::comparison::REGISTRY
            .get("prefix")
            .unwrap()
            .build("/api/", false)
            .unwrap();
        let body: Arc<dyn Directive> = Arc::new(SetVar {
            name: "matched".to_string(),
            value: Expr::Literal(Feature::Boolean(true)),
        });
        let with = With {
            expr: Expr::Literal(Feature::string("/api/users")),
            cases: vec![SelectCase {
                comparison,
                body,
                needs_remainder: false,
            }],
            default: None,
        };
        let mut c = ctx();
        with.invoke(&mut c).unwrap();
        assert!(matches!(c.get_var("matched"), Some(Feature::Boolean(true))));
    }
}
