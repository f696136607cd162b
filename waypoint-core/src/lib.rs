//! # waypoint-core
//!
//! An embeddable transaction-processing engine for an HTTP reverse proxy:
//! a typed expression language, a directive dispatcher driven by a fixed
//! sequence of request/response hooks, and reloadable IP-space lookup
//! tables. The engine itself never does I/O on the request path — a host
//! implements [`adaptor::HostAdaptor`] to bridge its own request/response
//! types, and drives the transaction by calling [`config::Config::invoke_hook`]
//! at each of its hook points.
//!
//! ## Example
//!
//! ```rust,no_run
//! use waypoint_core::adaptor::TestAdaptor;
//! use waypoint_core::config::Config;
//! use waypoint_core::context::{Context, Shared};
//! use waypoint_core::hook::Hook;
//!
//! let (config, errata) = Config::from_file("rules.yaml");
//! assert!(errata.is_ok(), "{errata}");
//!
//! let mut ctx = Context::new(Box::new(TestAdaptor::default()), Shared::default());
//! config.invoke_hook(Hook::Remap, &mut ctx);
//! ctx.run_finalizers();
//! ```
//!
//! ## Module map
//!
//! - [`value`] — the tagged-union `Feature` type every extractor/directive
//!   passes around, and its zero-copy `FeatureView` string representation.
//! - [`arena`] — the per-transaction bump allocator backing transient
//!   `FeatureView`s.
//! - [`expr`] / [`extractor`] / [`modifier`] — the `{name<arg>:format}`
//!   expression language: parsing, the extractor registry, and the
//!   modifier chain.
//! - [`comparison`] — the `select` case predicates (`prefix`, `rxp`,
//!   `in`, `any-of`, ...).
//! - [`directive`] — the executable rule-tree nodes (`with`/`select`,
//!   `when`, header/status mutators, stats, ...).
//! - [`hook`] — the hook enum, its bitmask, and dispatch ordering.
//! - [`context`] — the per-transaction state threaded through every call.
//! - [`rxp`] — regex capture-group lifecycle for `{1}`-style references.
//! - [`ipspace`] — the reloadable CIDR longest-prefix lookup tables.
//! - [`textblock`] / [`stats`] / [`txnconf`] — the write-once, read-after
//!   shared tables a loaded config populates.
//! - [`yaml`] / [`config`] — the rule-file loader.
//! - [`reload`] — the background IPSpace reload task.
//! - [`error`] — [`error::Errata`] (load-time) and [`error::RuntimeError`]
//!   (per-directive) error types.
//! - [`adaptor`] — the [`adaptor::HostAdaptor`] trait a host implements,
//!   plus [`adaptor::TestAdaptor`] for tests and dry runs.

pub mod adaptor;
pub mod arena;
pub mod comparison;
pub mod config;
pub mod context;
pub mod directive;
pub mod error;
pub mod expr;
pub mod extractor;
pub mod hook;
pub mod ipspace;
pub mod modifier;
pub mod reload;
pub mod rxp;
pub mod stats;
pub mod textblock;
pub mod txnconf;
pub mod value;
pub mod yaml;

/// Convenient re-exports for the common embedding path: load a config,
/// build a `Context` around a host's `HostAdaptor`, and drive hooks.
pub mod prelude {
    pub use crate::adaptor::{HostAdaptor, RequestSide, TestAdaptor};
    pub use crate::config::Config;
    pub use crate::context::{Context, Shared};
    pub use crate::error::{Errata, RuntimeError};
    pub use crate::hook::Hook;
    pub use crate::value::Feature;
}
