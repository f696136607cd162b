//! Hook identity, `HookMask`, and the per-hook directive dispatcher.

use bitflags::bitflags;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hook {
    TxnStart,
    Creq,
    PreRemap,
    Remap,
    PostRemap,
    Preq,
    Ursp,
    Prsp,
    TxnClose,
    PostLoad,
    Task,
}

impl Hook {
    pub const ALL: [Hook; 11] = [
        Hook::TxnStart,
        Hook::Creq,
        Hook::PreRemap,
        Hook::Remap,
        Hook::PostRemap,
        Hook::Preq,
        Hook::Ursp,
        Hook::Prsp,
        Hook::TxnClose,
        Hook::PostLoad,
        Hook::Task,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Hook::TxnStart => "txn-start",
            Hook::Creq => "creq",
            Hook::PreRemap => "pre-remap",
            Hook::Remap => "remap",
            Hook::PostRemap => "post-remap",
            Hook::Preq => "preq",
            Hook::Ursp => "ursp",
            Hook::Prsp => "prsp",
            Hook::TxnClose => "txn-close",
            Hook::PostLoad => "post-load",
            Hook::Task => "task",
        }
    }

    pub fn from_name(name: &str) -> Option<Hook> {
        Hook::ALL.into_iter().find(|h| h.name() == name)
    }

    pub fn mask(self) -> HookMask {
        match self {
            Hook::TxnStart => HookMask::TXN_START,
            Hook::Creq => HookMask::CREQ,
            Hook::PreRemap => HookMask::PRE_REMAP,
            Hook::Remap => HookMask::REMAP,
            Hook::PostRemap => HookMask::POST_REMAP,
            Hook::Preq => HookMask::PREQ,
            Hook::Ursp => HookMask::URSP,
            Hook::Prsp => HookMask::PRSP,
            Hook::TxnClose => HookMask::TXN_CLOSE,
            Hook::PostLoad => HookMask::POST_LOAD,
            Hook::Task => HookMask::TASK,
        }
    }

    /// Hooks whose directives may register a *later* hook's callback.
    /// `Remap` is special-cased as the only hook a directive tree is
    /// attached to directly by the config loader; all others are reached
    /// only via a `when` directive scheduling into them.
    pub fn is_schedulable_target(self) -> bool {
        !matches!(self, Hook::Remap)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HookMask: u16 {
        const TXN_START  = 1 << 0;
        const CREQ       = 1 << 1;
        const PRE_REMAP  = 1 << 2;
        const REMAP      = 1 << 3;
        const POST_REMAP = 1 << 4;
        const PREQ       = 1 << 5;
        const URSP       = 1 << 6;
        const PRSP       = 1 << 7;
        const TXN_CLOSE  = 1 << 8;
        const POST_LOAD  = 1 << 9;
        const TASK       = 1 << 10;
    }
}

impl HookMask {
    pub fn contains_hook(self, hook: Hook) -> bool {
        self.contains(hook.mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips() {
        for hook in Hook::ALL {
            assert_eq!(Hook::from_name(hook.name()), Some(hook));
        }
    }

    #[test]
    fn mask_contains_only_its_own_hook() {
        let mask = Hook::Preq.mask();
        assert!(mask.contains_hook(Hook::Preq));
        assert!(!mask.contains_hook(Hook::Ursp));
    }

    #[test]
    fn remap_is_not_a_schedulable_target() {
        assert!(!Hook::Remap.is_schedulable_target());
        assert!(Hook::Ursp.is_schedulable_target());
    }
}
