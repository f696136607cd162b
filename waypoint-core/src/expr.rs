//! `Expr`: the compiled form of a rule-file value reference, and the
//! `{name<arg>:format}` composite-string parser.

use crate::context::Context;
use crate::error::{RunResult, RuntimeError};
use crate::extractor::{self, Extractor};
use crate::modifier::{self, Modifier};
use crate::value::{Feature, FeatureView, ValueMask};
use std::sync::Arc;

/// A single `{name<arg>:format}` reference, resolved against the extractor
/// registry at load time.
pub struct Spec {
    pub name: String,
    pub extractor: Arc<dyn Extractor>,
    pub arg: Option<String>,
    pub format: Option<String>,
    pub modifiers: Vec<ModifierCall>,
}

pub struct ModifierCall {
    pub name: String,
    pub modifier: Arc<dyn Modifier>,
    /// Pre-parsed argument for modifiers that need a sub-`Expr`
    /// (`else(expr)`) rather than a plain string.
    pub arg_expr: Option<Box<Expr>>,
    /// `filter(case, case, ...)` table: each case is a comparison plus the
    /// action to take on its first match.
    pub filter_cases: Vec<FilterCase>,
    /// `hash(n)`'s bucket count, validated `>= 2` when the call is built.
    pub hash_bound: Option<i64>,
}

/// One `filter` case: the comparison that selects it, and what to do with
/// the element when it does.
pub struct FilterCase {
    pub comparison: Arc<dyn crate::comparison::Comparison>,
    pub action: FilterAction,
}

pub enum FilterAction {
    /// Keep the element unchanged.
    Pass,
    /// Remove the element from the result.
    Drop,
    /// Replace the element with the result of evaluating this expression
    /// (so a replacement can reference the comparison's own captures).
    Replace(Box<Expr>),
}

pub enum Expr {
    Literal(Feature),
    Direct(Spec),
    /// A string built from literal runs interleaved with `Direct` specs
    /// (`"host={ua-req-url-host}"`).
    Composite(Vec<Part>),
    List(Vec<Expr>),
}

pub enum Part {
    Literal(String),
    Ref(Spec),
}

impl Expr {
    /// `max_capture_index`: the highest numeric capture (`{N}`) referenced,
    /// used to size the regex capture-group buffer ahead of time.
    pub fn max_capture_index(&self) -> Option<usize> {
        fn spec_index(spec: &Spec) -> Option<usize> {
            spec.name.parse::<usize>().ok()
        }
        match self {
            Expr::Literal(_) => None,
            Expr::Direct(spec) => spec_index(spec),
            Expr::Composite(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::Ref(spec) => spec_index(spec),
                    Part::Literal(_) => None,
                })
                .max(),
            Expr::List(items) => items.iter().filter_map(|e| e.max_capture_index()).max(),
        }
    }

    /// Whether evaluating this expression touches `Context` state at all
    /// (used by the config loader to skip building a `Context` for
    /// purely-literal rule subtrees).
    pub fn references_context(&self) -> bool {
        fn spec_refs(spec: &Spec) -> bool {
            spec.extractor.has_ctx_ref()
                || spec
                    .modifiers
                    .iter()
                    .any(|m| m.arg_expr.as_ref().is_some_and(|e| e.references_context()))
        }
        match self {
            Expr::Literal(_) => false,
            Expr::Direct(spec) => spec_refs(spec),
            Expr::Composite(parts) => parts.iter().any(|p| match p {
                Part::Ref(spec) => spec_refs(spec),
                Part::Literal(_) => false,
            }),
            Expr::List(items) => items.iter().any(|e| e.references_context()),
        }
    }
}

pub fn evaluate(expr: &Expr, ctx: &mut Context) -> RunResult<Feature> {
    match expr {
        Expr::Literal(f) => Ok(f.clone()),
        Expr::Direct(spec) => evaluate_spec(spec, ctx),
        Expr::Composite(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    Part::Literal(s) => out.push_str(s),
                    Part::Ref(spec) => {
                        let value = evaluate_spec(spec, ctx)?;
                        out.push_str(&render_formatted(&value, spec.format.as_deref()));
                    }
                }
            }
            Ok(Feature::String(FeatureView::transient(out)))
        }
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, ctx)?);
            }
            Ok(Feature::Tuple(Arc::from(values)))
        }
    }
}

fn evaluate_spec(spec: &Spec, ctx: &mut Context) -> RunResult<Feature> {
    let mut value = spec.extractor.extract(spec.arg.as_deref(), ctx)?;
    for call in &spec.modifiers {
        value = apply_modifier(call, value, ctx)?;
    }
    Ok(value)
}

fn apply_modifier(call: &ModifierCall, value: Feature, ctx: &mut Context) -> RunResult<Feature> {
    match call.name.as_str() {
        "else" => {
            if value.is_empty() {
                match &call.arg_expr {
                    Some(fallback) => evaluate(fallback, ctx),
                    None => Ok(value),
                }
            } else {
                Ok(value)
            }
        }
        "filter" => apply_filter(call, value, ctx),
        // `ip-space<table>`: look up the address in `table` and push the
        // matched row for `ip-col` to read back; passes the address
        // through untouched (or `Nil` on a miss) so a further modifier in
        // the same chain still sees a value of the expected type.
        "ip-space" => {
            let Feature::IpAddr(addr) = value else {
                return Ok(Feature::Nil);
            };
            let table_name = call
                .arg_expr
                .as_ref()
                .map(|e| evaluate(e, ctx))
                .transpose()?
                .and_then(|f| f.as_str().map(|s| s.to_string()));
            let Some(table_name) = table_name else {
                return Err(RuntimeError::Extraction {
                    name: "ip-space",
                    message: "missing table name".to_string(),
                });
            };
            let Some(handle) = ctx.ip_spaces().get(&table_name) else {
                return Ok(Feature::Nil);
            };
            let Some(row) = handle.lookup(addr) else {
                return Ok(Feature::Nil);
            };
            ctx.push_ip_space_row(handle.snapshot(), row);
            Ok(Feature::IpAddr(addr))
        }
        // `hash`'s own `Modifier::apply` only produces the raw, unbounded
        // hash (it has no access to the call's argument); the bound is
        // applied here, against the load-time-validated `hash_bound`.
        "hash" => {
            let n = call.hash_bound.filter(|&n| n >= 2).ok_or_else(|| {
                RuntimeError::Extraction {
                    name: "hash",
                    message: "missing or invalid bound".to_string(),
                }
            })?;
            match call.modifier.apply(value, ctx)? {
                Feature::Integer(h) => Ok(Feature::Integer(h.rem_euclid(n))),
                other => Ok(other),
            }
        }
        // `as-integer`'s fallback is always evaluated on parse failure,
        // including for an empty string; the built-in modifier itself only
        // ever returns `Integer`/`Nil`, so the fallback substitution
        // happens here, uniformly with `else`.
        "as-integer" => {
            let parsed = call.modifier.apply(value, ctx)?;
            match (parsed, &call.arg_expr) {
                (Feature::Nil, Some(fallback)) => evaluate(fallback, ctx),
                (other, _) => Ok(other),
            }
        }
        _ => call.modifier.apply(value, ctx),
    }
}

/// `filter`: test each element of a list (or the single scalar value,
/// treated as a one-element list) against the call's cases in order and
/// apply the first match's action. An element matching no case is dropped.
fn apply_filter(call: &ModifierCall, value: Feature, ctx: &mut Context) -> RunResult<Feature> {
    let was_list = matches!(value, Feature::Tuple(_));
    let elements: Vec<Feature> = match value {
        Feature::Tuple(items) => items.to_vec(),
        other => vec![other],
    };
    let mut kept = Vec::with_capacity(elements.len());
    for element in elements {
        let action = call
            .filter_cases
            .iter()
            .find_map(|case| match case.comparison.test(&element, ctx) {
                Ok(true) => Some(Ok(&case.action)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            })
            .transpose()?;
        match action {
            Some(FilterAction::Pass) => kept.push(element),
            Some(FilterAction::Replace(replacement)) => kept.push(evaluate(replacement, ctx)?),
            Some(FilterAction::Drop) | None => {}
        }
    }
    if was_list {
        Ok(Feature::Tuple(Arc::from(kept)))
    } else {
        Ok(kept.into_iter().next().unwrap_or(Feature::Nil))
    }
}

fn render_formatted(value: &Feature, format: Option<&str>) -> String {
    let Some(spec) = format else {
        return value.render();
    };
    // `format` is a minimal printf-style width/fill spec: an optional `0`
    // fill flag followed by a decimal width, e.g. `08` pads integers to 8
    // digits with zeros; anything else is treated as a plain minimum width
    // padded with spaces.
    let (fill, width_str) = match spec.strip_prefix('0') {
        Some(rest) => ('0', rest),
        None => (' ', spec),
    };
    let Ok(width) = width_str.parse::<usize>() else {
        return value.render();
    };
    let rendered = value.render();
    if rendered.len() >= width {
        rendered
    } else {
        let pad: String = std::iter::repeat(fill).take(width - rendered.len()).collect();
        format!("{pad}{rendered}")
    }
}

/// Parse a composite string in `{name<arg>:format}` syntax into an `Expr`.
/// A string with no `{...}` at all, or exactly one `{...}` spanning the
/// whole string, collapses to `Direct`/`Literal` rather than `Composite` —
/// a composite of one reference and no literal text behaves identically to
/// a direct reference, so there's no need to carry the distinction forward.
pub fn parse(input: &str) -> Result<Expr, String> {
    let parts = parse_parts(input)?;
    match parts.len() {
        0 => Ok(Expr::Literal(Feature::string(""))),
        1 => match parts.into_iter().next().unwrap() {
            Part::Literal(s) => Ok(Expr::Literal(Feature::string(s))),
            Part::Ref(spec) => Ok(Expr::Direct(spec)),
        },
        _ => Ok(Expr::Composite(parts)),
    }
}

fn parse_parts(input: &str) -> Result<Vec<Part>, String> {
    let mut parts = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(Part::Literal(rest[..open].to_string()));
        }
        let after_open = &rest[open + 1..];
        let close = after_open.find('}').ok_or("unterminated '{' in composite expression")?;
        let inner = &after_open[..close];
        parts.push(Part::Ref(parse_spec(inner)?));
        rest = &after_open[close + 1..];
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest.to_string()));
    }
    Ok(parts)
}

fn parse_spec(inner: &str) -> Result<Spec, String> {
    // `<...>` delimits the argument unambiguously; only look for a
    // `:format` suffix in whatever comes after its closing `>` (or in the
    // whole string, if there's no `<arg>` at all).
    let (name_and_arg, format) = match inner.find('<') {
        Some(lt) => {
            let gt = inner[lt..].find('>').ok_or("unterminated '<' in extractor reference")?
                + lt;
            match inner[gt + 1..].strip_prefix(':') {
                Some(f) => (&inner[..=gt], Some(f.to_string())),
                None => (inner, None),
            }
        }
        None => match inner.rsplit_once(':') {
            Some((h, f)) => (h, Some(f.to_string())),
            None => (inner, None),
        },
    };
    let (name, arg) = match name_and_arg.split_once('<') {
        Some((name, rest)) => {
            let arg = rest.strip_suffix('>').ok_or("unterminated '<' in extractor reference")?;
            (name.trim(), Some(arg.to_string()))
        }
        None => (name_and_arg.trim(), None),
    };
    if name.is_empty() {
        return Err("empty extractor name".to_string());
    }
    let ext = extractor::REGISTRY
        .get(name)
        .ok_or_else(|| format!("unknown extractor '{name}'"))?;
    ext.validate(arg.as_deref())?;
    Ok(Spec {
        name: name.to_string(),
        extractor: ext,
        arg,
        format,
        modifiers: Vec::new(),
    })
}

/// Attach a modifier by name (and optional construction-time argument text)
/// to an already-parsed `Spec`, resolving it against the modifier registry.
/// Used by `config.rs` when a directive's YAML attaches a `mods:` list.
///
/// `hash_bound` must be `Some(n)` with `n >= 2` whenever `name == "hash"`;
/// anything else is a load-time error rather than a silently-ignored bound.
pub fn push_modifier(
    spec: &mut Spec,
    name: &str,
    arg_expr: Option<Expr>,
    filter_cases: Vec<FilterCase>,
    hash_bound: Option<i64>,
) -> Result<(), String> {
    let modifier = modifier::REGISTRY
        .get(name)
        .ok_or_else(|| format!("unknown modifier '{name}'"))?;
    if name == "hash" && !hash_bound.is_some_and(|n| n >= 2) {
        return Err("hash(n) requires a bound of at least 2".to_string());
    }
    spec.modifiers.push(ModifierCall {
        name: name.to_string(),
        modifier,
        arg_expr: arg_expr.map(Box::new),
        filter_cases,
        hash_bound,
    });
    Ok(())
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
    fn plain_literal_parses_to_literal_expr() {
        let expr = parse("no braces here").unwrap();
        assert!(matches!(expr, Expr::Literal(_)));
    }

    #[test]
    fn single_ref_collapses_to_direct() {
        let expr = parse("{ua-req-method}").unwrap();
        assert!(matches!(expr, Expr::Direct(_)));
    }

    #[test]
    fn composite_with_multiple_refs_interleaves_literals() {
        let expr = parse("method={ua-req-method} host={ua-req-url-host}").unwrap();
        let mut c = ctx();
        let value = evaluate(&expr, &mut c).unwrap();
        assert_eq!(value.as_str(), Some("method= host="));
    }

    #[test]
    fn unknown_extractor_is_rejected() {
        assert!(parse("{nope-not-real}").is_err());
    }

    #[test]
    fn capture_ref_reports_correct_max_index() {
        let expr = parse("user={1} host={2}").unwrap();
        assert_eq!(expr.max_capture_index(), Some(2));
    }

    #[test]
    fn format_pads_integer_with_zero_fill() {
        let value = Feature::Integer(7);
        assert_eq!(render_formatted(&value, Some("03")), "007");
    }

    #[test]
    fn list_expr_evaluates_to_tuple() {
        let expr = Expr::List(vec![Expr::Literal(Feature::Integer(1)), Expr::Literal(Feature::Integer(2))]);
        let mut c = ctx();
        let value = evaluate(&expr, &mut c).unwrap();
        assert!(matches!(value, Feature::Tuple(ref t) if t.len() == 2));
    }

    fn call(name: &str, arg_expr: Option<Expr>, filter_cases: Vec<FilterCase>, hash_bound: Option<i64>) -> ModifierCall {
        ModifierCall {
            name: name.to_string(),
            modifier: modifier::REGISTRY.get(name).unwrap(),
            arg_expr: arg_expr.map(Box::new),
            filter_cases,
            hash_bound,
        }
    }

    #[test]
    fn hash_reduces_into_bound() {
        let modifier_call = call("hash", None, Vec::new(), Some(4));
        let mut c = ctx();
        for input in ["abc", "xyz", "a-much-longer-string"] {
            let result = apply_modifier(&modifier_call, Feature::String(FeatureView::literal(input)), &mut c).unwrap();
            match result {
                Feature::Integer(n) => assert!((0..4).contains(&n)),
                other => panic!("expected integer, got {other:?}"),
            }
        }
    }

    #[test]
    fn hash_without_a_valid_bound_is_an_error() {
        let modifier_call = call("hash", None, Vec::new(), None);
        let mut c = ctx();
        assert!(apply_modifier(&modifier_call, Feature::String(FeatureView::literal("abc")), &mut c).is_err());

        let modifier_call = call("hash", None, Vec::new(), Some(1));
        assert!(apply_modifier(&modifier_call, Feature::String(FeatureView::literal("abc")), &mut c).is_err());
    }

    #[test]
    fn filter_keeps_passed_drops_unmatched_and_explicit_drops() {
        let pass = crate::comparison::REGISTRY.get("match").unwrap().build("GET", false).unwrap();
        let drop = crate::comparison::REGISTRY.get("match").unwrap().build("DELETE", false).unwrap();
        let modifier_call = call(
            "filter",
            None,
            vec![
                FilterCase { comparison: pass, action: FilterAction::Pass },
                FilterCase { comparison: drop, action: FilterAction::Drop },
            ],
            None,
        );
        let mut c = ctx();
        let input = Feature::Tuple(Arc::from(vec![
            Feature::String(FeatureView::literal("GET")),
            Feature::String(FeatureView::literal("DELETE")),
            Feature::String(FeatureView::literal("PATCH")),
        ]));
        let result = apply_modifier(&modifier_call, input, &mut c).unwrap();
        let Feature::Tuple(items) = result else {
            panic!("expected tuple");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_str(), Some("GET"));
    }

    #[test]
    fn filter_replace_evaluates_its_expression() {
        let is_get = crate::comparison::REGISTRY.get("match").unwrap().build("GET", false).unwrap();
        let modifier_call = call(
            "filter",
            None,
            vec![FilterCase {
                comparison: is_get,
                action: FilterAction::Replace(Box::new(Expr::Literal(Feature::string("READ")))),
            }],
            None,
        );
        let mut c = ctx();
        let result = apply_modifier(&modifier_call, Feature::String(FeatureView::literal("GET")), &mut c).unwrap();
        assert_eq!(result.as_str(), Some("READ"));
    }

    #[test]
    fn filter_drops_scalar_with_no_matching_case() {
        let is_delete = crate::comparison::REGISTRY.get("match").unwrap().build("DELETE", false).unwrap();
        let modifier_call = call(
            "filter",
            None,
            vec![FilterCase { comparison: is_delete, action: FilterAction::Drop }],
            None,
        );
        let mut c = ctx();
        let result = apply_modifier(&modifier_call, Feature::String(FeatureView::literal("GET")), &mut c).unwrap();
        assert!(matches!(result, Feature::Nil));
    }

    #[test]
    fn ip_space_modifier_pushes_row_for_ip_col_to_read() {
        let path = std::env::temp_dir().join(format!("waypoint-ipspace-test-{}.csv", std::process::id()));
        std::fs::write(&path, "range,country:STRING\n1.2.3.0/24,CN\n").unwrap();
        let handle = crate::ipspace::IpSpaceHandle::load(&path).unwrap();
        let registry = crate::ipspace::IpSpaceRegistry::new();
        registry.insert("geo", Arc::new(handle));
        let shared = crate::context::Shared {
            ip_spaces: Arc::new(registry),
            ..crate::context::Shared::default()
        };
        let mut c = Context::new(Box::new(TestAdaptor::default()), shared);

        let modifier_call = call("ip-space", Some(Expr::Literal(Feature::string("geo"))), Vec::new(), None);
        let addr: std::net::IpAddr = "1.2.3.4".parse().unwrap();
        let result = apply_modifier(&modifier_call, Feature::IpAddr(addr), &mut c).unwrap();
        assert!(matches!(result, Feature::IpAddr(_)));

        let country = extractor::REGISTRY.get("ip-col").unwrap().extract(Some("country"), &mut c).unwrap();
        assert_eq!(country.as_str(), Some("CN"));

        std::fs::remove_file(&path).ok();
    }
}
