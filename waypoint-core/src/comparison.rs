//! Comparisons: the predicates a `select`/`when` case tests the active
//! feature against.
//!
//! String comparisons (`prefix`/`suffix`/`tld`/`contain`/`match`) carry the
//! exact remainder-trimming arithmetic recovered from
//! `examples/original_source/plugin/src/Comparison.cc`: the matched literal
//! is installed as capture `{0}` via [`RxpState::set_literal_capture`]
//! before the active view is trimmed to the unmatched remainder, and the
//! trim only happens at all when `update_remainder_p` is set on the
//! `Context` — the enclosing `select` case's body has to actually reference
//! `{unmatched}`/`{active-feature}` for the comparison to bother. When it
//! does trim, both `Context::remainder` and `Context::active` are updated
//! together, so `{active-feature}` inside the matched case's body sees the
//! unmatched tail rather than the pre-match string.

use crate::context::Context;
use crate::error::RunResult;
use crate::value::{Feature, FeatureView};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::RegexBuilder;
use std::net::IpAddr;
use std::sync::Arc;

pub trait Comparison: Send + Sync {
    fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool>;
}

pub trait ComparisonFactory: Send + Sync {
    fn build(&self, arg: &str, nc: bool) -> Result<Arc<dyn Comparison>, String>;
}

pub struct Registry {
    entries: DashMap<&'static str, Arc<dyn ComparisonFactory>>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            entries: DashMap::new(),
        }
    }

    pub fn register(&self, name: &'static str, factory: Arc<dyn ComparisonFactory>) {
        self.entries.insert(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ComparisonFactory>> {
        self.entries.get(name).map(|e| Arc::clone(&e))
    }
}

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let reg = Registry::new();
    builtins::register_all(&reg);
    reg
});

/// Install `remainder` as both `Context::remainder` and the new active
/// feature, but only when the enclosing case's body asked for it.
fn consume_remainder(ctx: &mut Context, remainder: String) {
    if ctx.update_remainder_p() {
        ctx.set_active(Feature::String(FeatureView::transient(remainder.clone())));
        ctx.set_remainder(remainder);
    }
}

fn ascii_fold_contains(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    let hb = haystack.as_bytes();
    let nb = needle.as_bytes();
    if nb.len() > hb.len() {
        return None;
    }
    (0..=hb.len() - nb.len()).find(|&start| hb[start..start + nb.len()].eq_ignore_ascii_case(nb))
}

pub mod builtins {
    use super::*;

    pub fn register_all(reg: &Registry) {
        reg.register("match", Arc::new(MatchFactory));
        reg.register("prefix", Arc::new(PrefixFactory));
        reg.register("suffix", Arc::new(SuffixFactory));
        reg.register("tld", Arc::new(TldFactory));
        reg.register("contain", Arc::new(ContainFactory));
        reg.register("rxp", Arc::new(RxpFactory));
        reg.register("eq", Arc::new(ScalarFactory(ScalarOp::Eq)));
        reg.register("ne", Arc::new(ScalarFactory(ScalarOp::Ne)));
        reg.register("lt", Arc::new(ScalarFactory(ScalarOp::Lt)));
        reg.register("le", Arc::new(ScalarFactory(ScalarOp::Le)));
        reg.register("gt", Arc::new(ScalarFactory(ScalarOp::Gt)));
        reg.register("ge", Arc::new(ScalarFactory(ScalarOp::Ge)));
        reg.register("in", Arc::new(InFactory));
        reg.register("true", Arc::new(ConstFactory(true)));
        reg.register("false", Arc::new(ConstFactory(false)));
    }

    /// `match`: literal equality, `s == t` (case-folded when `nc`). Unlike
    /// `rxp`, `arg` is never compiled as a regex — a value like `"a.b"` is
    /// a literal string to compare against, not a one-char wildcard.
    struct MatchFactory;
    impl ComparisonFactory for MatchFactory {
        fn build(&self, arg: &str, nc: bool) -> Result<Arc<dyn Comparison>, String> {
            Ok(Arc::new(Match {
                text: arg.to_string(),
                nc,
            }))
        }
    }
    struct Match {
        text: String,
        nc: bool,
    }
    impl Comparison for Match {
        fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool> {
            let text = active.as_str().unwrap_or_default();
            let matches = if self.nc {
                text.eq_ignore_ascii_case(&self.text)
            } else {
                text == self.text
            };
            if !matches {
                return Ok(false);
            }
            ctx.rxp_mut().set_literal_capture(text);
            consume_remainder(ctx, String::new());
            Ok(true)
        }
    }

    struct PrefixFactory;
    impl ComparisonFactory for PrefixFactory {
        fn build(&self, arg: &str, nc: bool) -> Result<Arc<dyn Comparison>, String> {
            Ok(Arc::new(Prefix {
                text: arg.to_string(),
                nc,
            }))
        }
    }
    struct Prefix {
        text: String,
        nc: bool,
    }
    impl Comparison for Prefix {
        fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool> {
            let text = active.as_str().unwrap_or_default();
            let matches = if self.nc {
                text.len() >= self.text.len() && text[..self.text.len()].eq_ignore_ascii_case(&self.text)
            } else {
                text.starts_with(&self.text)
            };
            if !matches {
                return Ok(false);
            }
            ctx.rxp_mut().set_literal_capture(&text[..self.text.len()]);
            consume_remainder(ctx, text[self.text.len()..].to_string());
            Ok(true)
        }
    }

    struct SuffixFactory;
    impl ComparisonFactory for SuffixFactory {
        fn build(&self, arg: &str, nc: bool) -> Result<Arc<dyn Comparison>, String> {
            Ok(Arc::new(Suffix {
                text: arg.to_string(),
                nc,
            }))
        }
    }
    struct Suffix {
        text: String,
        nc: bool,
    }
    impl Comparison for Suffix {
        fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool> {
            let text = active.as_str().unwrap_or_default();
            if text.len() < self.text.len() {
                return Ok(false);
            }
            let split = text.len() - self.text.len();
            let matches = if self.nc {
                text[split..].eq_ignore_ascii_case(&self.text)
            } else {
                &text[split..] == self.text.as_str()
            };
            if !matches {
                return Ok(false);
            }
            ctx.rxp_mut().set_literal_capture(&text[split..]);
            consume_remainder(ctx, text[..split].to_string());
            Ok(true)
        }
    }

    struct TldFactory;
    impl ComparisonFactory for TldFactory {
        fn build(&self, arg: &str, nc: bool) -> Result<Arc<dyn Comparison>, String> {
            Ok(Arc::new(Tld {
                text: arg.to_string(),
                nc,
            }))
        }
    }
    struct Tld {
        text: String,
        nc: bool,
    }
    impl Comparison for Tld {
        fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool> {
            let text = active.as_str().unwrap_or_default();
            let tld_eq = |s: &str| {
                if self.nc {
                    s.eq_ignore_ascii_case(&self.text)
                } else {
                    s == self.text.as_str()
                }
            };
            // `s == t` on its own: the whole string is the TLD, no
            // separating dot present at all.
            if tld_eq(text) {
                ctx.rxp_mut().set_literal_capture(&format!(".{text}"));
                consume_remainder(ctx, String::new());
                return Ok(true);
            }
            // Otherwise `s` must end in `.t`, with the dot counted as part
            // of what's trimmed and of the installed capture.
            let needed = self.text.len() + 1;
            if text.len() < needed {
                return Ok(false);
            }
            let split = text.len() - needed;
            let dot_and_tld = &text[split..];
            if dot_and_tld.as_bytes()[0] != b'.' || !tld_eq(&dot_and_tld[1..]) {
                return Ok(false);
            }
            ctx.rxp_mut().set_literal_capture(dot_and_tld);
            consume_remainder(ctx, text[..split].to_string());
            Ok(true)
        }
    }

    struct ContainFactory;
    impl ComparisonFactory for ContainFactory {
        fn build(&self, arg: &str, nc: bool) -> Result<Arc<dyn Comparison>, String> {
            Ok(Arc::new(Contain {
                text: arg.to_string(),
                nc,
            }))
        }
    }
    struct Contain {
        text: String,
        nc: bool,
    }
    impl Comparison for Contain {
        fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool> {
            let text = active.as_str().unwrap_or_default();
            let found = if self.nc {
                ascii_fold_contains(text, &self.text)
            } else {
                text.find(&self.text)
            };
            let Some(start) = found else {
                return Ok(false);
            };
            let end = start + self.text.len();
            ctx.rxp_mut().set_literal_capture(&text[start..end]);
            // remainder is whatever follows the matched substring
            consume_remainder(ctx, text[end..].to_string());
            Ok(true)
        }
    }

    struct RxpFactory;
    impl ComparisonFactory for RxpFactory {
        fn build(&self, arg: &str, nc: bool) -> Result<Arc<dyn Comparison>, String> {
            let re = RegexBuilder::new(arg)
                .case_insensitive(nc)
                .build()
                .map_err(|e| e.to_string())?;
            Ok(Arc::new(Rxp(re)))
        }
    }
    struct Rxp(regex::Regex);
    impl Comparison for Rxp {
        fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool> {
            let text = active.as_str().unwrap_or_default();
            match self.0.captures(text) {
                Some(caps) => {
                    ctx.rxp_mut().begin_match(&caps);
                    ctx.rxp_mut().commit_match();
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[derive(Clone, Copy)]
    enum ScalarOp {
        Eq,
        Ne,
        Lt,
        Le,
        Gt,
        Ge,
    }

    struct ScalarFactory(ScalarOp);
    impl ComparisonFactory for ScalarFactory {
        fn build(&self, arg: &str, nc: bool) -> Result<Arc<dyn Comparison>, String> {
            Ok(Arc::new(Scalar {
                op: self.0,
                text: arg.to_string(),
                nc,
            }))
        }
    }
    struct Scalar {
        op: ScalarOp,
        text: String,
        nc: bool,
    }
    impl Comparison for Scalar {
        fn test(&self, active: &Feature, _ctx: &mut Context) -> RunResult<bool> {
            let ordering = match (active, self.text.parse::<i64>()) {
                (Feature::Integer(i), Ok(n)) => i.cmp(&n),
                _ => {
                    let lhs = active.render();
                    if self.nc {
                        lhs.to_ascii_lowercase().cmp(&self.text.to_ascii_lowercase())
                    } else {
                        lhs.cmp(&self.text)
                    }
                }
            };
            Ok(match self.op {
                ScalarOp::Eq => ordering.is_eq(),
                ScalarOp::Ne => ordering.is_ne(),
                ScalarOp::Lt => ordering.is_lt(),
                ScalarOp::Le => ordering.is_le(),
                ScalarOp::Gt => ordering.is_gt(),
                ScalarOp::Ge => ordering.is_ge(),
            })
        }
    }

    /// One comma-separated member of an `in` list, classified once at load
    /// time so matching an integer/IP feature never falls back to string
    /// comparison.
    enum InItem {
        IntRange { raw: String, lo: i64, hi: i64 },
        IpRange { raw: String, lo: IpAddr, hi: IpAddr },
        IpNet { raw: String, net: ipnet::IpNet },
        Literal(String),
    }

    impl InItem {
        fn raw(&self) -> &str {
            match self {
                InItem::IntRange { raw, .. } => raw,
                InItem::IpRange { raw, .. } => raw,
                InItem::IpNet { raw, .. } => raw,
                InItem::Literal(raw) => raw,
            }
        }

        fn parse(raw: &str) -> InItem {
            let owned = raw.to_string();
            if let Ok(net) = raw.parse::<ipnet::IpNet>() {
                return InItem::IpNet { raw: owned, net };
            }
            if let Some((a, b)) = raw.split_once('-') {
                if let (Ok(lo), Ok(hi)) = (a.trim().parse::<IpAddr>(), b.trim().parse::<IpAddr>()) {
                    return InItem::IpRange { raw: owned, lo, hi };
                }
            }
            if let Some((lo, hi)) = parse_int_range(raw) {
                return InItem::IntRange { raw: owned, lo, hi };
            }
            if let Ok(addr) = raw.parse::<IpAddr>() {
                return InItem::IpRange {
                    raw: owned,
                    lo: addr,
                    hi: addr,
                };
            }
            InItem::Literal(owned)
        }
    }

    /// Parse `"min-max"` into bounds, tolerating a leading `-` on `min`
    /// (the first interior `-` is taken as the separator).
    fn parse_int_range(s: &str) -> Option<(i64, i64)> {
        let bytes = s.as_bytes();
        for i in 1..bytes.len() {
            if bytes[i] == b'-' {
                let lo = s[..i].parse::<i64>().ok()?;
                let hi = s[i + 1..].parse::<i64>().ok()?;
                return Some((lo, hi));
            }
        }
        None
    }

    fn ip_in_range(addr: IpAddr, lo: IpAddr, hi: IpAddr) -> bool {
        match (addr, lo, hi) {
            (IpAddr::V4(a), IpAddr::V4(l), IpAddr::V4(h)) => {
                let a = u32::from(a);
                (u32::from(l)..=u32::from(h)).contains(&a)
            }
            (IpAddr::V6(a), IpAddr::V6(l), IpAddr::V6(h)) => {
                let a = u128::from(a);
                (u128::from(l)..=u128::from(h)).contains(&a)
            }
            _ => false,
        }
    }

    fn str_eq(a: &str, b: &str, nc: bool) -> bool {
        if nc {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    struct InFactory;
    impl ComparisonFactory for InFactory {
        fn build(&self, arg: &str, nc: bool) -> Result<Arc<dyn Comparison>, String> {
            let items = arg.split(',').map(|s| InItem::parse(s.trim())).collect();
            Ok(Arc::new(In { items, nc }))
        }
    }
    struct In {
        items: Vec<InItem>,
        nc: bool,
    }
    impl Comparison for In {
        fn test(&self, active: &Feature, _ctx: &mut Context) -> RunResult<bool> {
            let text = active.render();
            Ok(self.items.iter().any(|item| match (item, active) {
                (InItem::IntRange { lo, hi, .. }, Feature::Integer(i)) => i >= lo && i <= hi,
                (InItem::IpNet { net, .. }, Feature::IpAddr(addr)) => net.contains(addr),
                (InItem::IpRange { lo, hi, .. }, Feature::IpAddr(addr)) => ip_in_range(*addr, *lo, *hi),
                (InItem::Literal(s), _) => str_eq(s, &text, self.nc),
                (item, _) => str_eq(item.raw(), &text, self.nc),
            }))
        }
    }

    struct ConstFactory(bool);
    impl ComparisonFactory for ConstFactory {
        fn build(&self, _arg: &str, _nc: bool) -> Result<Arc<dyn Comparison>, String> {
            Ok(Arc::new(Const(self.0)))
        }
    }
    struct Const(bool);
    impl Comparison for Const {
        fn test(&self, _active: &Feature, _ctx: &mut Context) -> RunResult<bool> {
            Ok(self.0)
        }
    }
}

/// `any-of`/`all-of`/`none-of`: combinators over a list of already-built
/// comparisons (built by the config loader from nested `select` cases).
pub struct AnyOf(pub Vec<Arc<dyn Comparison>>);
impl Comparison for AnyOf {
    fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool> {
        for c in &self.0 {
            if c.test(active, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub struct AllOf(pub Vec<Arc<dyn Comparison>>);
impl Comparison for AllOf {
    fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool> {
        for c in &self.0 {
            if !c.test(active, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub struct NoneOf(pub Vec<Arc<dyn Comparison>>);
impl Comparison for NoneOf {
    fn test(&self, active: &Feature, ctx: &mut Context) -> RunResult<bool> {
        for c in &self.0 {
            if c.test(active, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::TestAdaptor;
    use crate::context::Shared;
    use crate::value::FeatureView;

    fn ctx() -> Context {
        Context::new(Box::new(TestAdaptor::default()), Shared::default())
    }

    fn active(s: &str) -> Feature {
        Feature::String(FeatureView::literal(s))
    }

    #[test]
    fn prefix_trims_remainder_only_when_enabled() {
        let cmp = REGISTRY.get("prefix").unwrap().build("/api/", false).unwrap();
        let mut c = ctx();
        c.set_update_remainder_p(true);
        assert!(cmp.test(&active("/api/users"), &mut c).unwrap());
        assert_eq!(c.remainder(), "users");
        assert_eq!(c.rxp().active_capture(0), Some("/api/"));
    }

    #[test]
    fn prefix_skips_remainder_when_disabled() {
        let cmp = REGISTRY.get("prefix").unwrap().build("/api/", false).unwrap();
        let mut c = ctx();
        assert!(cmp.test(&active("/api/users"), &mut c).unwrap());
        assert_eq!(c.remainder(), "");
    }

    #[test]
    fn suffix_trims_matched_tail() {
        let cmp = REGISTRY.get("suffix").unwrap().build(".json", false).unwrap();
        let mut c = ctx();
        c.set_update_remainder_p(true);
        assert!(cmp.test(&active("report.json"), &mut c).unwrap());
        assert_eq!(c.remainder(), "report");
        assert_eq!(c.rxp().active_capture(0), Some(".json"));
    }

    #[test]
    fn tld_trims_dot_and_label() {
        let cmp = REGISTRY.get("tld").unwrap().build("com", false).unwrap();
        let mut c = ctx();
        c.set_update_remainder_p(true);
        assert!(cmp.test(&active("www.example.com"), &mut c).unwrap());
        assert_eq!(c.remainder(), "www.example");
        assert_eq!(c.rxp().active_capture(0), Some(".com"));
    }

    #[test]
    fn tld_matches_bare_label_with_no_dot() {
        let cmp = REGISTRY.get("tld").unwrap().build("com", false).unwrap();
        let mut c = ctx();
        c.set_update_remainder_p(true);
        assert!(cmp.test(&active("com"), &mut c).unwrap());
        assert_eq!(c.remainder(), "");
        assert_eq!(c.rxp().active_capture(0), Some(".com"));
    }

    #[test]
    fn tld_rejects_label_without_leading_dot() {
        let cmp = REGISTRY.get("tld").unwrap().build("com", false).unwrap();
        let mut c = ctx();
        assert!(!cmp.test(&active("notcom"), &mut c).unwrap());
    }

    #[test]
    fn contain_ascii_fold_only() {
        let cmp = REGISTRY.get("contain").unwrap().build("BOT", true).unwrap();
        let mut c = ctx();
        assert!(cmp.test(&active("some-bot-agent"), &mut c).unwrap());
    }

    #[test]
    fn match_is_exact_equality_not_regex() {
        let cmp = REGISTRY.get("match").unwrap().build("CN", false).unwrap();
        let mut c = ctx();
        assert!(cmp.test(&active("CN"), &mut c).unwrap());
        assert!(!cmp.test(&active("CNX"), &mut c).unwrap());
        assert!(!cmp.test(&active("INCN"), &mut c).unwrap());
    }

    #[test]
    fn match_treats_dot_as_literal_not_wildcard() {
        let cmp = REGISTRY.get("match").unwrap().build("a.b", false).unwrap();
        let mut c = ctx();
        assert!(cmp.test(&active("a.b"), &mut c).unwrap());
        assert!(!cmp.test(&active("aXb"), &mut c).unwrap());
    }

    #[test]
    fn match_consumes_whole_string_as_remainder() {
        let cmp = REGISTRY.get("match").unwrap().build("CN", true).unwrap();
        let mut c = ctx();
        c.set_update_remainder_p(true);
        assert!(cmp.test(&active("cn"), &mut c).unwrap());
        assert_eq!(c.remainder(), "");
        assert_eq!(c.rxp().active_capture(0), Some("cn"));
        assert_eq!(c.active().as_str(), Some(""));
    }

    #[test]
    fn prefix_updates_active_feature_to_remainder() {
        let cmp = REGISTRY.get("prefix").unwrap().build("/api/", false).unwrap();
        let mut c = ctx();
        c.set_update_remainder_p(true);
        assert!(cmp.test(&active("/api/v1/items"), &mut c).unwrap());
        assert_eq!(c.active().as_str(), Some("v1/items"));
    }

    #[test]
    fn eq_compares_integers_numerically() {
        let cmp = REGISTRY.get("eq").unwrap().build("42", false).unwrap();
        let mut c = ctx();
        assert!(cmp.test(&Feature::Integer(42), &mut c).unwrap());
        assert!(!cmp.test(&Feature::Integer(7), &mut c).unwrap());
    }

    #[test]
    fn in_matches_integer_range() {
        let cmp = REGISTRY.get("in").unwrap().build("200-299,404", false).unwrap();
        let mut c = ctx();
        assert!(cmp.test(&Feature::Integer(204), &mut c).unwrap());
        assert!(cmp.test(&Feature::Integer(404), &mut c).unwrap());
        assert!(!cmp.test(&Feature::Integer(500), &mut c).unwrap());
    }

    #[test]
    fn in_matches_cidr_network() {
        let cmp = REGISTRY.get("in").unwrap().build("10.0.0.0/8,192.168.1.1", false).unwrap();
        let mut c = ctx();
        let inside: std::net::IpAddr = "10.1.2.3".parse().unwrap();
        let outside: std::net::IpAddr = "172.16.0.1".parse().unwrap();
        let exact: std::net::IpAddr = "192.168.1.1".parse().unwrap();
        assert!(cmp.test(&Feature::IpAddr(inside), &mut c).unwrap());
        assert!(!cmp.test(&Feature::IpAddr(outside), &mut c).unwrap());
        assert!(cmp.test(&Feature::IpAddr(exact), &mut c).unwrap());
    }

    #[test]
    fn in_matches_ip_address_range() {
        let cmp = REGISTRY.get("in").unwrap().build("10.0.0.1-10.0.0.50", false).unwrap();
        let mut c = ctx();
        let inside: std::net::IpAddr = "10.0.0.25".parse().unwrap();
        let outside: std::net::IpAddr = "10.0.0.99".parse().unwrap();
        assert!(cmp.test(&Feature::IpAddr(inside), &mut c).unwrap());
        assert!(!cmp.test(&Feature::IpAddr(outside), &mut c).unwrap());
    }

    #[test]
    fn in_still_matches_plain_strings() {
        let cmp = REGISTRY.get("in").unwrap().build("GET, POST", false).unwrap();
        let mut c = ctx();
        assert!(cmp.test(&active("POST"), &mut c).unwrap());
        assert!(!cmp.test(&active("DELETE"), &mut c).unwrap());
    }

    #[test]
    fn any_of_short_circuits_on_first_match() {
        let a = REGISTRY.get("prefix").unwrap().build("a", false).unwrap();
        let b = REGISTRY.get("prefix").unwrap().build("x", false).unwrap();
        let combo = AnyOf(vec![a, b]);
        let mut c = ctx();
        assert!(combo.test(&active("xyz"), &mut c).unwrap());
    }
}
