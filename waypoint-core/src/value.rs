//! The typed value model: `ValueType`, `ValueMask`, `ActiveType`, and
//! `Feature` itself, plus the cons/tuple arithmetic (`car`/`cdr`/`join`/
//! `is_list`/`active_type`) built on top of them.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// The closed set of runtime value kinds a `Feature` can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Nil,
    String,
    Integer,
    Boolean,
    Float,
    IpAddr,
    Duration,
    TimePoint,
    Tuple,
    Cons,
    Generic,
}

impl ValueType {
    pub fn mask(self) -> ValueMask {
        match self {
            ValueType::Nil => ValueMask::NIL,
            ValueType::String => ValueMask::STRING,
            ValueType::Integer => ValueMask::INTEGER,
            ValueType::Boolean => ValueMask::BOOLEAN,
            ValueType::Float => ValueMask::FLOAT,
            ValueType::IpAddr => ValueMask::IP_ADDR,
            ValueType::Duration => ValueMask::DURATION,
            ValueType::TimePoint => ValueMask::TIMEPOINT,
            ValueType::Tuple => ValueMask::TUPLE,
            ValueType::Cons => ValueMask::CONS,
            ValueType::Generic => ValueMask::GENERIC,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Nil => "NIL",
            ValueType::String => "STRING",
            ValueType::Integer => "INTEGER",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Float => "FLOAT",
            ValueType::IpAddr => "IP_ADDR",
            ValueType::Duration => "DURATION",
            ValueType::TimePoint => "TIMEPOINT",
            ValueType::Tuple => "TUPLE",
            ValueType::Cons => "CONS",
            ValueType::Generic => "GENERIC",
        };
        f.write_str(s)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValueMask: u16 {
        const NIL       = 1 << 0;
        const STRING    = 1 << 1;
        const INTEGER   = 1 << 2;
        const BOOLEAN   = 1 << 3;
        const FLOAT     = 1 << 4;
        const IP_ADDR   = 1 << 5;
        const DURATION  = 1 << 6;
        const TIMEPOINT = 1 << 7;
        const TUPLE     = 1 << 8;
        const CONS      = 1 << 9;
        const GENERIC   = 1 << 10;
    }
}

impl ValueMask {
    pub const ANY: ValueMask = ValueMask::all();
}

/// Compile-time type description carried by an `Expr`.
///
/// `tuple_element` is only meaningful when `base` includes `TUPLE`/`CONS`;
/// it describes the refined element type for a homogeneous tuple, or `ANY`
/// for a heterogeneous or empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveType {
    pub base: ValueMask,
    pub tuple_element: ValueMask,
    pub cfg_const: bool,
}

impl ActiveType {
    pub fn scalar(base: ValueMask) -> Self {
        ActiveType {
            base,
            tuple_element: ValueMask::ANY,
            cfg_const: false,
        }
    }

    pub fn tuple_of(element: ValueMask) -> Self {
        ActiveType {
            base: ValueMask::TUPLE,
            tuple_element: element,
            cfg_const: false,
        }
    }

    /// `X.can_satisfy(required)` — the type described by `self` may be used
    /// where `required` is expected. `NIL` always satisfies; a tuple
    /// requirement additionally checks `tuple_element`.
    pub fn can_satisfy(&self, required: ValueMask) -> bool {
        if self.base == ValueMask::NIL {
            return true;
        }
        if required.contains(ValueMask::TUPLE) && self.base == ValueMask::TUPLE {
            return self.tuple_element.intersects(required) || required.contains(ValueMask::TUPLE);
        }
        required.contains(self.base) || self.base.difference(required).is_empty()
    }
}

/// A span of `Feature`s of fixed length, created once and never resized.
pub type TupleRef = Arc<[Feature]>;

/// `cdr` of a cons cell yields `cdr`; `car` yields `car`.
#[derive(Debug, Clone)]
pub struct ConsCell {
    pub car: Feature,
    pub cdr: Feature,
}

/// Tag describing where a string feature's bytes live: three distinct view
/// types rather than a flag bit, so `commit` is a type-directed promotion
/// instead of a runtime check.
///
/// - `Direct` views point at memory owned by the host's HTTP object; valid
///   only within the hook where they were produced.
/// - `Literal` views are permanent (config-arena scoped or promoted via
///   `commit`).
/// - `Transient` views are scratch data built during the current
///   extraction; callers crossing a hook boundary must `commit` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewLifetime {
    Direct,
    Literal,
    Transient,
}

#[derive(Debug, Clone)]
pub struct FeatureView {
    bytes: Arc<str>,
    pub lifetime: ViewLifetime,
}

impl FeatureView {
    pub fn direct(s: impl Into<Arc<str>>) -> Self {
        FeatureView {
            bytes: s.into(),
            lifetime: ViewLifetime::Direct,
        }
    }

    pub fn literal(s: impl Into<Arc<str>>) -> Self {
        FeatureView {
            bytes: s.into(),
            lifetime: ViewLifetime::Literal,
        }
    }

    pub fn transient(s: impl Into<Arc<str>>) -> Self {
        FeatureView {
            bytes: s.into(),
            lifetime: ViewLifetime::Transient,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_direct(&self) -> bool {
        self.lifetime == ViewLifetime::Direct
    }

    pub fn is_literal(&self) -> bool {
        self.lifetime == ViewLifetime::Literal
    }

    /// Promote this view to `Literal`. The backing `Arc<str>` is already
    /// immutable, so promotion never copies; it only changes what future
    /// callers are allowed to assume about the view's lifetime.
    pub fn commit(&self) -> FeatureView {
        FeatureView {
            bytes: Arc::clone(&self.bytes),
            lifetime: ViewLifetime::Literal,
        }
    }
}

impl fmt::Display for FeatureView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bytes)
    }
}

/// The tagged union of runtime value types.
#[derive(Debug, Clone)]
pub enum Feature {
    Nil,
    String(FeatureView),
    Integer(i64),
    Boolean(bool),
    Float(f64),
    IpAddr(IpAddr),
    Duration(Duration),
    TimePoint(DateTime<Utc>),
    Tuple(TupleRef),
    Cons(Arc<ConsCell>),
    Generic(Arc<dyn std::any::Any + Send + Sync>),
}

impl Feature {
    pub fn string(s: impl Into<String>) -> Self {
        Feature::String(FeatureView::literal(Arc::from(s.into().as_str())))
    }

    pub fn transient_string(s: impl Into<String>) -> Self {
        Feature::String(FeatureView::transient(Arc::from(s.into().as_str())))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Feature::Nil => ValueType::Nil,
            Feature::String(_) => ValueType::String,
            Feature::Integer(_) => ValueType::Integer,
            Feature::Boolean(_) => ValueType::Boolean,
            Feature::Float(_) => ValueType::Float,
            Feature::IpAddr(_) => ValueType::IpAddr,
            Feature::Duration(_) => ValueType::Duration,
            Feature::TimePoint(_) => ValueType::TimePoint,
            Feature::Tuple(_) => ValueType::Tuple,
            Feature::Cons(_) => ValueType::Cons,
            Feature::Generic(_) => ValueType::Generic,
        }
    }

    /// A feature is empty iff it's `NIL` or an empty string; every other
    /// type is never empty, even a zero-valued integer or a false boolean.
    pub fn is_empty(&self) -> bool {
        match self {
            Feature::Nil => true,
            Feature::String(v) => v.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Feature::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Feature::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Feature::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Render any feature into a display string (used for composite
    /// expression interpolation and rendering of non-string features).
    pub fn render(&self) -> String {
        match self {
            Feature::Nil => String::new(),
            Feature::String(v) => v.as_str().to_string(),
            Feature::Integer(i) => i.to_string(),
            Feature::Boolean(b) => b.to_string(),
            Feature::Float(f) => f.to_string(),
            Feature::IpAddr(ip) => ip.to_string(),
            Feature::Duration(d) => format!("{}s", d.as_secs_f64()),
            Feature::TimePoint(t) => t.to_rfc3339(),
            Feature::Tuple(_) | Feature::Cons(_) => join(self, ","),
            Feature::Generic(_) => "<generic>".to_string(),
        }
    }
}

/// `car(feature)` — head of cons/tuple; identity on scalars.
pub fn car(f: &Feature) -> Feature {
    match f {
        Feature::Tuple(t) => t.first().cloned().unwrap_or(Feature::Nil),
        Feature::Cons(c) => c.car.clone(),
        other => other.clone(),
    }
}

/// `cdr(feature)` — tail of cons/tuple; `NIL` otherwise.
pub fn cdr(f: &Feature) -> Feature {
    match f {
        Feature::Tuple(t) => {
            if t.len() <= 1 {
                Feature::Nil
            } else {
                Feature::Tuple(Arc::from(&t[1..]))
            }
        }
        Feature::Cons(c) => c.cdr.clone(),
        _ => Feature::Nil,
    }
}

pub fn is_list(f: &Feature) -> bool {
    matches!(f, Feature::Tuple(_) | Feature::Cons(_))
}

/// Serialize a tuple (recursively, parenthesizing nested tuples) with
/// `glue` between elements.
pub fn join(f: &Feature, glue: &str) -> String {
    match f {
        Feature::Tuple(t) => t
            .iter()
            .map(|elt| match elt {
                Feature::Tuple(_) | Feature::Cons(_) => format!("({})", join(elt, glue)),
                other => other.render(),
            })
            .collect::<Vec<_>>()
            .join(glue),
        Feature::Cons(c) => {
            let head = match &c.car {
                Feature::Tuple(_) | Feature::Cons(_) => format!("({})", join(&c.car, glue)),
                other => other.render(),
            };
            let tail = join(&c.cdr, glue);
            if tail.is_empty() {
                head
            } else {
                format!("{head}{glue}{tail}")
            }
        }
        other => other.render(),
    }
}

/// `active_type(feature)` with tuple-element refinement: an empty tuple is
/// "any", a homogeneous tuple refines to `TupleOf(T)`, a heterogeneous one
/// stays opaque (`TupleOf(ANY)`).
pub fn active_type(f: &Feature) -> ActiveType {
    match f {
        Feature::Tuple(t) => {
            if t.is_empty() {
                return ActiveType::tuple_of(ValueMask::ANY);
            }
            let first = t[0].value_type().mask();
            if t.iter().all(|e| e.value_type().mask() == first) {
                ActiveType::tuple_of(first)
            } else {
                ActiveType::tuple_of(ValueMask::ANY)
            }
        }
        other => ActiveType::scalar(other.value_type().mask()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(items: Vec<Feature>) -> Feature {
        Feature::Tuple(Arc::from(items))
    }

    #[test]
    fn is_empty_true_only_for_nil_and_empty_string() {
        assert!(Feature::Nil.is_empty());
        assert!(Feature::string("").is_empty());
        assert!(!Feature::string("x").is_empty());
        assert!(!Feature::Integer(0).is_empty());
    }

    #[test]
    fn cdr_chain_terminates_at_nil() {
        let t = tuple(vec![Feature::Integer(1), Feature::Integer(2), Feature::Integer(3)]);
        let c1 = cdr(&t);
        let c2 = cdr(&c1);
        let c3 = cdr(&c2);
        assert!(matches!(c1, Feature::Tuple(ref v) if v.len() == 2));
        assert!(matches!(c2, Feature::Tuple(ref v) if v.len() == 1));
        assert!(matches!(c3, Feature::Nil));
    }

    #[test]
    fn car_of_cons_after_cdr_recombines() {
        // car(a :: cdr(t)) == cdr(t) head, i.e. cdr(car(t) :: cdr(t)) == cdr(t)
        let t = tuple(vec![Feature::Integer(1), Feature::Integer(2)]);
        let rest = cdr(&t);
        let cons = Feature::Cons(Arc::new(ConsCell {
            car: car(&t),
            cdr: rest.clone(),
        }));
        assert!(matches!(cdr(&cons), Feature::Tuple(ref v) if v.len() == 1));
    }

    #[test]
    fn empty_tuple_has_any_element_type() {
        let t = tuple(vec![]);
        let at = active_type(&t);
        assert_eq!(at.tuple_element, ValueMask::ANY);
        assert!(at.can_satisfy(ValueMask::TUPLE));
    }

    #[test]
    fn homogeneous_tuple_refines_element_type() {
        let t = tuple(vec![Feature::Integer(1), Feature::Integer(2)]);
        let at = active_type(&t);
        assert_eq!(at.tuple_element, ValueMask::INTEGER);
    }

    #[test]
    fn nil_satisfies_any_mask() {
        let at = ActiveType::scalar(ValueMask::NIL);
        assert!(at.can_satisfy(ValueMask::STRING));
        assert!(at.can_satisfy(ValueMask::INTEGER));
    }

    #[test]
    fn join_parenthesizes_nested_tuples() {
        let inner = tuple(vec![Feature::Integer(1), Feature::Integer(2)]);
        let outer = tuple(vec![Feature::string("a"), inner]);
        assert_eq!(join(&outer, ","), "a,(1,2)");
    }
}
