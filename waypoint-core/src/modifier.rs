//! Modifiers: post-processing steps applied to an extracted `Feature`
//! before it's handed back to its `Expr`.

use crate::context::Context;
use crate::error::RunResult;
use crate::value::{Feature, ValueMask};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

pub trait Modifier: Send + Sync {
    /// Whether this modifier can run on a value of type `input`.
    fn is_valid_for(&self, input: ValueMask) -> bool;

    /// The static type the modifier produces, given its input type.
    fn result_type(&self, input: ValueMask) -> ValueMask;

    fn apply(&self, input: Feature, ctx: &mut Context) -> RunResult<Feature>;
}

pub struct Registry {
    entries: DashMap<&'static str, Arc<dyn Modifier>>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            entries: DashMap::new(),
        }
    }

    pub fn register(&self, name: &'static str, modifier: Arc<dyn Modifier>) {
        self.entries.insert(name, modifier);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Modifier>> {
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
    use crate::value::FeatureView;
    use std::hash::{Hash, Hasher};

    pub fn register_all(reg: &Registry) {
        reg.register("hash", Arc::new(Hash_));
        reg.register("else", Arc::new(Else));
        reg.register("as-integer", Arc::new(AsInteger));
        reg.register("filter", Arc::new(Filter));
        reg.register("ip-space", Arc::new(IpSpace));
        reg.register("upper", Arc::new(Upper));
        reg.register("lower", Arc::new(Lower));
    }

    /// `hash(n)`: reduce a string feature to an integer in `0..n` via a
    /// stable (non-cryptographic) hash, for consistent bucketing. This impl
    /// only produces the raw hash; `expr::apply_modifier` reduces it into
    /// `0..n` against the call's load-time-validated bound, since a bare
    /// `Modifier` has no access to the call's argument.
    struct Hash_;
    impl Modifier for Hash_ {
        fn is_valid_for(&self, input: ValueMask) -> bool {
            input.intersects(ValueMask::STRING)
        }
        fn result_type(&self, _input: ValueMask) -> ValueMask {
            ValueMask::INTEGER
        }
        fn apply(&self, input: Feature, _ctx: &mut Context) -> RunResult<Feature> {
            let s = input.as_str().unwrap_or_default();
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            s.hash(&mut hasher);
            Ok(Feature::Integer(hasher.finish() as i64))
        }
    }

    /// `else(expr)`: substitutes a fallback value when the input is empty.
    /// `expr::apply_modifier` special-cases this by name and evaluates the
    /// fallback itself, since `Modifier::apply` doesn't have access to the
    /// modifier call's argument expression.
    pub struct Else;
    impl Modifier for Else {
        fn is_valid_for(&self, _input: ValueMask) -> bool {
            true
        }
        fn result_type(&self, input: ValueMask) -> ValueMask {
            input
        }
        fn apply(&self, input: Feature, _ctx: &mut Context) -> RunResult<Feature> {
            // No-op here; `expr::evaluate` special-cases `else` to thread
            // the fallback expression through. This impl exists only so
            // `else` has a registry entry other code can look up by name.
            Ok(input)
        }
    }

    /// `as-integer(fallback)`: parse a string as an integer, always
    /// evaluating `fallback` when parsing fails — including on the empty
    /// string.
    pub struct AsInteger;
    impl Modifier for AsInteger {
        fn is_valid_for(&self, input: ValueMask) -> bool {
            input.intersects(ValueMask::STRING | ValueMask::INTEGER)
        }
        fn result_type(&self, _input: ValueMask) -> ValueMask {
            ValueMask::INTEGER
        }
        fn apply(&self, input: Feature, _ctx: &mut Context) -> RunResult<Feature> {
            match input {
                Feature::Integer(i) => Ok(Feature::Integer(i)),
                other => match other.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
                    Some(i) => Ok(Feature::Integer(i)),
                    None => Ok(Feature::Nil),
                },
            }
        }
    }

    /// `filter(cases)`: tests each element of a list feature (or a scalar,
    /// treated as a one-element list) against a case table built at load
    /// time, keeping, dropping, or replacing each element per its first
    /// matching case; an element matching no case is dropped. The case
    /// table itself is carried on the `ModifierCall` and applied by
    /// `expr::apply_filter` — this impl is a no-op registry placeholder,
    /// same as `Else`.
    pub struct Filter;
    impl Modifier for Filter {
        fn is_valid_for(&self, input: ValueMask) -> bool {
            input.intersects(ValueMask::STRING)
        }
        fn result_type(&self, input: ValueMask) -> ValueMask {
            input
        }
        fn apply(&self, input: Feature, _ctx: &mut Context) -> RunResult<Feature> {
            Ok(input)
        }
    }

    /// `ip-space<table>`: look up the input address in the named IPSpace
    /// table and push the matched row onto `Context`'s ip-space stack,
    /// where `ip-col<column>` can read it back for the rest of the
    /// enclosing expression. The table name lives on the `ModifierCall`'s
    /// `arg_expr` (reusing the same slot `else`/`as-integer` use for their
    /// own arguments) and the lookup itself happens in
    /// `expr::apply_modifier`, since a bare `Modifier::apply` has no access
    /// to the call's argument. This impl passes the address through
    /// unchanged, same as `Else`/`Filter`.
    pub struct IpSpace;
    impl Modifier for IpSpace {
        fn is_valid_for(&self, input: ValueMask) -> bool {
            input.intersects(ValueMask::IP_ADDR)
        }
        fn result_type(&self, input: ValueMask) -> ValueMask {
            input
        }
        fn apply(&self, input: Feature, _ctx: &mut Context) -> RunResult<Feature> {
            Ok(input)
        }
    }

    struct Upper;
    impl Modifier for Upper {
        fn is_valid_for(&self, input: ValueMask) -> bool {
            input.intersects(ValueMask::STRING)
        }
        fn result_type(&self, input: ValueMask) -> ValueMask {
            input
        }
        fn apply(&self, input: Feature, _ctx: &mut Context) -> RunResult<Feature> {
            Ok(Feature::String(FeatureView::transient(
                input.as_str().unwrap_or_default().to_uppercase(),
            )))
        }
    }

    struct Lower;
    impl Modifier for Lower {
        fn is_valid_for(&self, input: ValueMask) -> bool {
            input.intersects(ValueMask::STRING)
        }
        fn result_type(&self, input: ValueMask) -> ValueMask {
            input
        }
        fn apply(&self, input: Feature, _ctx: &mut Context) -> RunResult<Feature> {
            Ok(Feature::String(FeatureView::transient(
                input.as_str().unwrap_or_default().to_lowercase(),
            )))
        }
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
    fn as_integer_falls_back_to_nil_on_empty_string() {
        let modifier = REGISTRY.get("as-integer").unwrap();
        let mut c = ctx();
        let result = modifier
            .apply(Feature::String(crate::value::FeatureView::literal("")), &mut c)
            .unwrap();
        assert!(matches!(result, Feature::Nil));
    }

    #[test]
    fn as_integer_parses_valid_digits() {
        let modifier = REGISTRY.get("as-integer").unwrap();
        let mut c = ctx();
        let result = modifier
            .apply(Feature::String(crate::value::FeatureView::literal("42")), &mut c)
            .unwrap();
        assert!(matches!(result, Feature::Integer(42)));
    }

    #[test]
    fn upper_transforms_ascii() {
        let modifier = REGISTRY.get("upper").unwrap();
        let mut c = ctx();
        let result = modifier
            .apply(Feature::String(crate::value::FeatureView::literal("abc")), &mut c)
            .unwrap();
        assert_eq!(result.as_str(), Some("ABC"));
    }
}
