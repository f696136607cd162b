//! Extractors: named feature producers plus the process-global registry
//! they're looked up in.
//!
//! The registry is built once at process start (each builtin calls
//! [`register`] from an `inventory`-free, explicit registration function)
//! and is read-only for the lifetime of the process afterward — so lookups
//! never need a lock, only a `dashmap` read for the rare case a host embeds
//! hot-reloadable extractor plugins.

use crate::context::Context;
use crate::error::RunResult;
use crate::value::{Feature, ValueMask};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// An extractor turns its (optional) argument plus the current `Context`
/// into a `Feature`. Extractors that don't reference the context at all
/// (e.g. `random`) still take one, for a uniform call signature.
pub trait Extractor: Send + Sync {
    /// Validate `arg` at config-load time (parse it, check required
    /// sub-syntax) without a `Context`. Most extractors accept any string or
    /// no argument; this is where `{ip-col<N>}`'s `N` gets parsed once.
    fn validate(&self, arg: Option<&str>) -> Result<(), String> {
        let _ = arg;
        Ok(())
    }

    /// The static type this extractor's results are masked by, used for
    /// early type-checking in `Expr`/`Spec` construction.
    fn result_type(&self) -> ValueMask {
        ValueMask::STRING
    }

    /// Whether this extractor reads `Context` state (vs. being independent
    /// of any in-flight transaction, e.g. a literal constant function).
    fn has_ctx_ref(&self) -> bool {
        true
    }

    fn extract(&self, arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature>;
}

pub struct Registry {
    entries: DashMap<&'static str, Arc<dyn Extractor>>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            entries: DashMap::new(),
        }
    }

    pub fn register(&self, name: &'static str, extractor: Arc<dyn Extractor>) {
        self.entries.insert(name, extractor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extractor>> {
        self.entries.get(name).map(|e| Arc::clone(&e))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| *e.key()).collect()
    }
}

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let reg = Registry::new();
    builtins::register_all(&reg);
    reg
});

pub mod builtins {
    use super::*;
    use crate::value::FeatureView;
    use chrono::Utc;
    use std::time::Duration;

    pub fn register_all(reg: &Registry) {
        reg.register("ua-req-method", Arc::new(UaReqMethod));
        reg.register("ua-req-url", Arc::new(UaReqUrl));
        reg.register("ua-req-url-host", Arc::new(UaReqUrlHost));
        // The rule grammar also uses the short forms `ua-req-host`/
        // `ua-req-path` in both extractor and directive position; these are
        // the same field read, just under a second name.
        reg.register("ua-req-host", Arc::new(UaReqUrlHost));
        reg.register("ua-req-url-port", Arc::new(UaReqUrlPort));
        reg.register("ua-req-url-scheme", Arc::new(UaReqUrlScheme));
        reg.register("ua-req-url-path", Arc::new(UaReqUrlPath));
        reg.register("ua-req-path", Arc::new(UaReqUrlPath));
        reg.register("ua-req-query", Arc::new(UaReqQuery));
        reg.register("ua-req-field", Arc::new(UaReqField));
        reg.register("proxy-req-url-host", Arc::new(ProxyReqUrlHost));
        reg.register("proxy-req-host", Arc::new(ProxyReqUrlHost));
        reg.register("proxy-req-field", Arc::new(ProxyReqField));
        reg.register("inbound-addr-remote", Arc::new(InboundAddrRemote));
        reg.register("inbound-addr-local", Arc::new(InboundAddrLocal));
        reg.register("outbound-addr-remote", Arc::new(OutboundAddrRemote));
        reg.register("is-internal", Arc::new(IsInternal));
        reg.register("random", Arc::new(Random));
        reg.register("now", Arc::new(Now));
        reg.register("active-feature", Arc::new(ActiveFeature));
        reg.register("unmatched", Arc::new(Unmatched));
        reg.register("var", Arc::new(Var));
        reg.register("txn-conf", Arc::new(TxnConf));
        reg.register("stat", Arc::new(Stat));
        reg.register("text-block", Arc::new(TextBlock));
        reg.register("ip-col", Arc::new(IpCol));
        for i in 0..=9 {
            reg.register(CAPTURE_NAMES[i], Arc::new(Capture(i)));
        }
    }

    const CAPTURE_NAMES: [&str; 10] =
        ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

    macro_rules! field_extractor {
        ($name:ident, $field:expr) => {
            struct $name;
            impl Extractor for $name {
                fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
                    Ok(Feature::String(FeatureView::direct(
                        ctx.request_field($field).unwrap_or_default(),
                    )))
                }
            }
        };
    }

    field_extractor!(UaReqMethod, "method");
    field_extractor!(UaReqUrl, "url");
    field_extractor!(UaReqUrlHost, "url-host");
    field_extractor!(UaReqUrlPath, "url-path");
    field_extractor!(UaReqUrlScheme, "url-scheme");
    field_extractor!(UaReqQuery, "query");

    struct ProxyReqUrlHost;
    impl Extractor for ProxyReqUrlHost {
        fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            Ok(Feature::String(FeatureView::direct(
                ctx.request_field_side(crate::adaptor::RequestSide::Proxy, "url-host")
                    .unwrap_or_default(),
            )))
        }
    }

    struct UaReqUrlPort;
    impl Extractor for UaReqUrlPort {
        fn result_type(&self) -> ValueMask {
            ValueMask::INTEGER
        }
        fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            Ok(Feature::Integer(ctx.request_port().unwrap_or(0) as i64))
        }
    }

    struct UaReqField;
    impl Extractor for UaReqField {
        fn extract(&self, arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            let name = arg.unwrap_or_default();
            Ok(Feature::String(FeatureView::direct(
                ctx.request_header(name).unwrap_or_default(),
            )))
        }
    }

    struct ProxyReqField;
    impl Extractor for ProxyReqField {
        fn extract(&self, arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            let name = arg.unwrap_or_default();
            Ok(Feature::String(FeatureView::direct(
                ctx.proxy_request_header(name).unwrap_or_default(),
            )))
        }
    }

    struct InboundAddrRemote;
    impl Extractor for InboundAddrRemote {
        fn result_type(&self) -> ValueMask {
            ValueMask::IP_ADDR
        }
        fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            Ok(ctx
                .inbound_addr_remote()
                .map(Feature::IpAddr)
                .unwrap_or(Feature::Nil))
        }
    }

    struct InboundAddrLocal;
    impl Extractor for InboundAddrLocal {
        fn result_type(&self) -> ValueMask {
            ValueMask::IP_ADDR
        }
        fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            Ok(ctx
                .inbound_addr_local()
                .map(Feature::IpAddr)
                .unwrap_or(Feature::Nil))
        }
    }

    struct OutboundAddrRemote;
    impl Extractor for OutboundAddrRemote {
        fn result_type(&self) -> ValueMask {
            ValueMask::IP_ADDR
        }
        fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            Ok(ctx
                .outbound_addr_remote()
                .map(Feature::IpAddr)
                .unwrap_or(Feature::Nil))
        }
    }

    struct IsInternal;
    impl Extractor for IsInternal {
        fn result_type(&self) -> ValueMask {
            ValueMask::BOOLEAN
        }
        fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            Ok(Feature::Boolean(ctx.is_internal()))
        }
    }

    struct Random;
    impl Extractor for Random {
        fn result_type(&self) -> ValueMask {
            ValueMask::INTEGER
        }
        fn has_ctx_ref(&self) -> bool {
            false
        }
        fn extract(&self, arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            let bound: i64 = arg.and_then(|a| a.parse().ok()).unwrap_or(100);
            Ok(Feature::Integer(ctx.random_source().next_bounded(bound)))
        }
    }

    struct Now;
    impl Extractor for Now {
        fn result_type(&self) -> ValueMask {
            ValueMask::TIMEPOINT
        }
        fn has_ctx_ref(&self) -> bool {
            false
        }
        fn extract(&self, _arg: Option<&str>, _ctx: &mut Context) -> RunResult<Feature> {
            Ok(Feature::TimePoint(Utc::now()))
        }
    }

    struct ActiveFeature;
    impl Extractor for ActiveFeature {
        fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            Ok(ctx.active().clone())
        }
    }

    struct Unmatched;
    impl Extractor for Unmatched {
        fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            Ok(Feature::String(FeatureView::direct(ctx.remainder())))
        }
    }

    struct Var;
    impl Extractor for Var {
        fn extract(&self, arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            let name = arg.unwrap_or_default();
            Ok(ctx.get_var(name).unwrap_or(Feature::Nil))
        }
    }

    struct TxnConf;
    impl Extractor for TxnConf {
        fn extract(&self, arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            let name = arg.unwrap_or_default();
            Ok(ctx.txn_conf_override(name).unwrap_or(Feature::Nil))
        }
    }

    struct Stat;
    impl Extractor for Stat {
        fn result_type(&self) -> ValueMask {
            ValueMask::INTEGER
        }
        fn extract(&self, arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            let name = arg.unwrap_or_default();
            Ok(Feature::Integer(ctx.stats().read(name)))
        }
    }

    struct TextBlock;
    impl Extractor for TextBlock {
        fn extract(&self, arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            let name = arg.unwrap_or_default();
            Ok(Feature::String(FeatureView::literal(
                ctx.text_blocks().get(name).unwrap_or_default(),
            )))
        }
    }

    /// `{ip-col<column>}`: read `column` from the row most recently pushed
    /// by an `ip-space` modifier in the enclosing expression. `{ip-col
    /// <table.column>}` (a dotted argument) is also accepted as a
    /// standalone form that looks `inbound-addr-remote` up in `table`
    /// directly, for use outside an `ip-space` pipe chain.
    struct IpCol;
    impl Extractor for IpCol {
        fn validate(&self, arg: Option<&str>) -> Result<(), String> {
            match arg {
                Some(a) if !a.is_empty() => Ok(()),
                _ => Err("ip-col requires a column (or 'table.column') argument".to_string()),
            }
        }
        fn extract(&self, arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            let arg = arg.unwrap_or_default();
            if let Some((table_name, column)) = arg.split_once('.') {
                let Some(addr) = ctx.inbound_addr_remote() else {
                    return Ok(Feature::Nil);
                };
                let Some(table) = ctx.ip_spaces().get(table_name) else {
                    return Ok(Feature::Nil);
                };
                let Some(row) = table.lookup(addr) else {
                    return Ok(Feature::Nil);
                };
                let Some(idx) = table.snapshot().column_index(column) else {
                    return Ok(Feature::Nil);
                };
                return Ok(render_ip_column(&row[idx]));
            }
            let Some((table, row)) = ctx.current_ip_space_row() else {
                return Ok(Feature::Nil);
            };
            let Some(idx) = table.column_index(arg) else {
                return Ok(Feature::Nil);
            };
            Ok(render_ip_column(&row[idx]))
        }
    }

    fn render_ip_column(value: &crate::ipspace::ColumnValue) -> Feature {
        match value {
            crate::ipspace::ColumnValue::Address(a) => Feature::IpAddr(*a),
            crate::ipspace::ColumnValue::String(s) => Feature::String(FeatureView::transient(s.to_string())),
            crate::ipspace::ColumnValue::Integer(i) => Feature::Integer(*i),
            crate::ipspace::ColumnValue::Enum(s) => Feature::String(FeatureView::transient(s.to_string())),
            crate::ipspace::ColumnValue::Flags(bits) => Feature::Integer(*bits as i64),
        }
    }

    struct Capture(usize);
    impl Extractor for Capture {
        fn extract(&self, _arg: Option<&str>, ctx: &mut Context) -> RunResult<Feature> {
            Ok(Feature::String(FeatureView::transient(
                ctx.rxp().active_capture(self.0).unwrap_or("").to_string(),
            )))
        }
    }

    #[allow(dead_code)]
    fn duration_zero() -> Duration {
        Duration::from_secs(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_core_builtins() {
        assert!(REGISTRY.get("ua-req-method").is_some());
        assert!(REGISTRY.get("inbound-addr-remote").is_some());
        assert!(REGISTRY.get("1").is_some());
        assert!(REGISTRY.get("does-not-exist").is_none());
    }

    #[test]
    fn ip_col_reads_pushed_row_when_no_dot_in_arg() {
        use crate::adaptor::TestAdaptor;
        use crate::context::{Context, Shared};
        use crate::ipspace::{parse_csv, ColumnValue};
        use std::path::Path;

        let table = parse_csv("range,country:STRING\n1.2.3.0/24,CN\n", Path::new("t.csv")).unwrap();
        let mut c = Context::new(Box::new(TestAdaptor::default()), Shared::default());
        let row: Vec<ColumnValue> = table.lookup("1.2.3.4".parse().unwrap()).unwrap().to_vec();
        c.push_ip_space_row(std::sync::Arc::new(table), row);

        let ip_col = REGISTRY.get("ip-col").unwrap();
        let value = ip_col.extract(Some("country"), &mut c).unwrap();
        assert_eq!(value.as_str(), Some("CN"));
    }

    #[test]
    fn ip_col_with_no_pushed_row_and_no_dot_returns_nil() {
        use crate::adaptor::TestAdaptor;
        use crate::context::{Context, Shared};

        let mut c = Context::new(Box::new(TestAdaptor::default()), Shared::default());
        let ip_col = REGISTRY.get("ip-col").unwrap();
        let value = ip_col.extract(Some("country"), &mut c).unwrap();
        assert!(matches!(value, Feature::Nil));
    }
}
