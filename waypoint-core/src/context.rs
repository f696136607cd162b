//! The per-transaction `Context`: the single object that flows through
//! every directive invocation, carrying the active/remainder feature pair,
//! the transient arena, regex capture state, variables, and the host
//! adaptor back-pointer.

use crate::adaptor::{HostAdaptor, RequestSide};
use crate::arena::Arena;
use crate::directive::Directive;
use crate::error::RunResult;
use crate::hook::{Hook, HookMask};
use crate::ipspace::{ColumnValue, IpSpaceRegistry, Table};
use crate::rxp::RxpState;
use crate::stats::StatsTable;
use crate::textblock::TextBlockStore;
use crate::txnconf::{TxnConfDefaults, TxnConfOverrides};
use crate::value::Feature;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Read-only tables built once at config load and shared by every
/// transaction's `Context` — write-once, read-only after load. Cheap to
/// clone — it's a bundle of `Arc`s.
#[derive(Clone, Default)]
pub struct Shared {
    pub text_blocks: Arc<TextBlockStore>,
    pub stats: Arc<StatsTable>,
    pub ip_spaces: Arc<IpSpaceRegistry>,
    pub txn_conf_defaults: Arc<TxnConfDefaults>,
}

/// A non-cryptographic PRNG source for the `random` extractor, seeded
/// per-context so results are cheap and reproducible within a test but
/// not shared mutable state across transactions.
pub struct RandomSource(StdRng);

impl RandomSource {
    pub fn from_entropy() -> Self {
        RandomSource(StdRng::from_os_rng())
    }

    pub fn from_seed(seed: u64) -> Self {
        RandomSource(StdRng::seed_from_u64(seed))
    }

    pub fn next_bounded(&mut self, bound: i64) -> i64 {
        if bound <= 0 {
            return 0;
        }
        self.0.random_range(0..bound)
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        RandomSource::from_entropy()
    }
}

/// Per-transaction state.
pub struct Context {
    adaptor: Box<dyn HostAdaptor>,
    shared: Shared,

    arena: Arena,
    active: Feature,
    remainder: String,
    /// Whether the active comparison chain should update `remainder` after
    /// a match — computed at load time by scanning the enclosing `select`
    /// case's body for a reference to `{unmatched}`/`{active-feature}`, and
    /// copied in per directive.
    update_remainder_p: bool,

    rxp: RxpState,
    /// Rows pushed by the `ip-space` modifier, exposed to `ip-col` for the
    /// duration of the enclosing expression's evaluation. A stack rather
    /// than a single slot so a nested lookup (an `ip-space` chain inside
    /// another) shadows rather than clobbers its enclosing row.
    ip_space_rows: Vec<(Arc<Table>, Vec<ColumnValue>)>,
    vars: HashMap<String, Feature>,
    txn_conf_overrides: TxnConfOverrides,
    random: RandomSource,

    registered_hooks: HookMask,
    /// Directives scheduled at runtime by a `when` directive for a hook
    /// still ahead of `cur_hook` — dynamically scheduled callbacks.
    /// `Config::invoke_hook` drains these with walk-while-growing
    /// semantics: a callback invoked mid-drain may itself append to the
    /// same hook's list, and that new entry still runs in this pass.
    dynamic: HashMap<Hook, Vec<Arc<dyn Directive>>>,
    finalizers: Vec<Box<dyn FnOnce(&mut Context) + Send>>,
}

impl Context {
    pub fn new(adaptor: Box<dyn HostAdaptor>, shared: Shared) -> Self {
        Context {
            adaptor,
            shared,
            arena: Arena::default(),
            active: Feature::Nil,
            remainder: String::new(),
            update_remainder_p: false,
            rxp: RxpState::default(),
            ip_space_rows: Vec::new(),
            vars: HashMap::new(),
            txn_conf_overrides: TxnConfOverrides::new(),
            random: RandomSource::default(),
            registered_hooks: HookMask::empty(),
            dynamic: HashMap::new(),
            finalizers: Vec::new(),
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn active(&self) -> &Feature {
        &self.active
    }

    pub fn set_active(&mut self, feature: Feature) {
        self.active = feature;
    }

    pub fn remainder(&self) -> &str {
        &self.remainder
    }

    /// Replace the active view's unmatched remainder, used by string
    /// comparisons (`prefix`/`suffix`/`contain`/`tld`) once they've
    /// decided to consume part of the active string.
    pub fn set_remainder(&mut self, remainder: impl Into<String>) {
        self.remainder = remainder.into();
    }

    pub fn update_remainder_p(&self) -> bool {
        self.update_remainder_p
    }

    pub fn set_update_remainder_p(&mut self, value: bool) {
        self.update_remainder_p = value;
    }

    pub fn rxp(&self) -> &RxpState {
        &self.rxp
    }

    pub fn rxp_mut(&mut self) -> &mut RxpState {
        &mut self.rxp
    }

    pub fn get_var(&self, name: &str) -> Option<Feature> {
        self.vars.get(name).cloned()
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Feature) {
        self.vars.insert(name.into(), value);
    }

    pub fn txn_conf_override(&self, name: &str) -> Option<Feature> {
        self.txn_conf_overrides
            .get(name)
            .or_else(|| self.shared.txn_conf_defaults.get(name))
    }

    pub fn set_txn_conf_override(&mut self, name: impl Into<String>, value: Feature) {
        self.txn_conf_overrides.set(name, value);
    }

    pub fn random_source(&mut self) -> &mut RandomSource {
        &mut self.random
    }

    pub fn stats(&self) -> &StatsTable {
        &self.shared.stats
    }

    pub fn text_blocks(&self) -> &TextBlockStore {
        &self.shared.text_blocks
    }

    pub fn ip_spaces(&self) -> &IpSpaceRegistry {
        &self.shared.ip_spaces
    }

    /// Push a matched `ip-space` row onto the lookup stack. Pair with
    /// [`Context::ip_space_depth`] (read before the push) and
    /// [`Context::truncate_ip_space_rows`] (called after the enclosing
    /// expression finishes evaluating) to bound its visibility.
    pub fn push_ip_space_row(&mut self, table: Arc<Table>, row: Vec<ColumnValue>) {
        self.ip_space_rows.push((table, row));
    }

    /// Drop any rows pushed since `depth`, restoring the stack to the state
    /// it was in before the enclosing expression started evaluating.
    pub fn truncate_ip_space_rows(&mut self, depth: usize) {
        self.ip_space_rows.truncate(depth);
    }

    pub fn current_ip_space_row(&self) -> Option<(&Table, &[ColumnValue])> {
        self.ip_space_rows.last().map(|(table, row)| (table.as_ref(), row.as_slice()))
    }

    pub fn ip_space_depth(&self) -> usize {
        self.ip_space_rows.len()
    }

    // -- host field accessors (thin pass-through to the adaptor) --

    pub fn request_field(&self, field: &str) -> Option<String> {
        self.adaptor.request_field(RequestSide::UserAgent, field)
    }

    pub fn request_field_side(&self, side: RequestSide, field: &str) -> Option<String> {
        self.adaptor.request_field(side, field)
    }

    pub fn set_request_field_side(&mut self, side: RequestSide, field: &str, value: &str) {
        self.adaptor.set_request_field(side, field, value);
    }

    pub fn request_port(&self) -> Option<u16> {
        self.request_field("url-port").and_then(|s| s.parse().ok())
    }

    pub fn request_header(&self, name: &str) -> Option<String> {
        self.adaptor.request_header(RequestSide::UserAgent, name)
    }

    pub fn proxy_request_header(&self, name: &str) -> Option<String> {
        self.adaptor.request_header(RequestSide::Proxy, name)
    }

    pub fn set_request_header(&mut self, name: &str, value: &str) {
        self.adaptor.set_request_header(RequestSide::UserAgent, name, value);
    }

    pub fn remove_request_header(&mut self, name: &str) {
        self.adaptor.remove_request_header(RequestSide::UserAgent, name);
    }

    pub fn set_request_header_side(&mut self, side: RequestSide, name: &str, value: &str) {
        self.adaptor.set_request_header(side, name, value);
    }

    pub fn remove_request_header_side(&mut self, side: RequestSide, name: &str) {
        self.adaptor.remove_request_header(side, name);
    }

    pub fn set_response_status(&mut self, status: u16) {
        self.adaptor.set_response_status(status);
    }

    pub fn set_response_header(&mut self, name: &str, value: &str) {
        self.adaptor.set_response_header(name, value);
    }

    pub fn inbound_addr_remote(&self) -> Option<IpAddr> {
        self.adaptor.inbound_addr_remote()
    }

    pub fn inbound_addr_local(&self) -> Option<IpAddr> {
        self.adaptor.inbound_addr_local()
    }

    pub fn outbound_addr_remote(&self) -> Option<IpAddr> {
        self.adaptor.outbound_addr_remote()
    }

    pub fn is_internal(&self) -> bool {
        self.adaptor.is_internal()
    }

    pub fn redirect(&mut self, location: &str, status: u16) {
        self.adaptor.redirect(location, status);
    }

    pub fn schedule_hook(&mut self, hook: Hook) {
        self.registered_hooks.insert(hook.mask());
        self.adaptor.schedule_hook(hook);
    }

    pub fn is_hook_registered(&self, hook: Hook) -> bool {
        self.registered_hooks.contains_hook(hook)
    }

    /// Register interest in `hook` and queue `directive` to run the next
    /// time it fires (the runtime half of the `when` directive).
    pub fn schedule_callback(&mut self, hook: Hook, directive: Arc<dyn Directive>) {
        self.registered_hooks.insert(hook.mask());
        self.adaptor.schedule_hook(hook);
        self.dynamic.entry(hook).or_default().push(directive);
    }

    pub fn dynamic_len(&self, hook: Hook) -> usize {
        self.dynamic.get(&hook).map_or(0, Vec::len)
    }

    pub fn dynamic_get(&self, hook: Hook, index: usize) -> Option<Arc<dyn Directive>> {
        self.dynamic.get(&hook).and_then(|v| v.get(index)).cloned()
    }

    pub fn clear_dynamic(&mut self, hook: Hook) {
        self.dynamic.remove(&hook);
    }

    pub fn stat_update(&mut self, name: &str, delta: i64) -> RunResult<()> {
        self.shared.stats.update(name, delta);
        self.adaptor.stat_update(name, delta);
        Ok(())
    }

    pub fn mark_terminal(&mut self) {
        self.adaptor.mark_terminal();
    }

    pub fn is_terminal(&self) -> bool {
        self.adaptor.is_terminal()
    }

    /// Register a closure to run once, at `TXN_CLOSE`, regardless of which
    /// hooks actually fired for this transaction.
    pub fn add_finalizer(&mut self, f: impl FnOnce(&mut Context) + Send + 'static) {
        self.finalizers.push(Box::new(f));
    }

    pub fn run_finalizers(&mut self) {
        for f in std::mem::take(&mut self.finalizers) {
            f(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::TestAdaptor;

    fn ctx() -> Context {
        Context::new(Box::new(TestAdaptor::default()), Shared::default())
    }

    #[test]
    fn var_set_then_get_round_trips() {
        let mut c = ctx();
        assert!(c.get_var("x").is_none());
        c.set_var("x", Feature::Integer(42));
        assert!(matches!(c.get_var("x"), Some(Feature::Integer(42))));
    }

    #[test]
    fn txn_conf_override_shadows_shared_default() {
        let mut defaults = TxnConfDefaults::new();
        defaults.set_default("timeout", Feature::Integer(30));
        let shared = Shared {
            txn_conf_defaults: Arc::new(defaults),
            ..Shared::default()
        };
        let mut c = Context::new(Box::new(TestAdaptor::default()), shared);
        assert!(matches!(c.txn_conf_override("timeout"), Some(Feature::Integer(30))));
        c.set_txn_conf_override("timeout", Feature::Integer(5));
        assert!(matches!(c.txn_conf_override("timeout"), Some(Feature::Integer(5))));
    }

    #[test]
    fn finalizers_run_once_in_order() {
        let mut c = ctx();
        c.set_var("order", Feature::String(crate::value::FeatureView::literal("")));
        c.add_finalizer(|c| c.set_var("first", Feature::Boolean(true)));
        c.add_finalizer(|c| c.set_var("second", Feature::Boolean(true)));
        c.run_finalizers();
        assert!(matches!(c.get_var("first"), Some(Feature::Boolean(true))));
        assert!(matches!(c.get_var("second"), Some(Feature::Boolean(true))));
        assert!(c.finalizers.is_empty());
    }

    #[test]
    fn random_bounded_stays_in_range() {
        let mut rng = RandomSource::from_seed(7);
        for _ in 0..50 {
            let v = rng.next_bounded(10);
            assert!((0..10).contains(&v));
        }
    }
}
