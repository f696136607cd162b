//! Regex capture-group lifecycle.
//!
//! A `Context` carries two capture buffers: the *working* set, populated by
//! the `rxp` comparison while it is still deciding whether the match
//! succeeds, and the *active* set, which is what `{1}`..`{9}` extractors
//! read. `commit_match` swaps working into active only on a successful
//! match; a failed match leaves whatever was active untouched.

use regex::Captures;
use std::sync::Arc;

/// A snapshot of capture groups, `0` is the whole match.
#[derive(Debug, Clone, Default)]
pub struct CaptureSet {
    groups: Vec<Option<Arc<str>>>,
}

impl CaptureSet {
    pub fn from_captures(caps: &Captures<'_>) -> Self {
        let groups = (0..caps.len())
            .map(|i| caps.get(i).map(|m| Arc::from(m.as_str())))
            .collect();
        CaptureSet { groups }
    }

    /// A one-element capture set standing in for a literal match (used by
    /// `prefix`/`suffix`/`tld` to install the matched text as `{0}` without
    /// running a regex at all).
    pub fn literal(text: &str) -> Self {
        CaptureSet {
            groups: vec![Some(Arc::from(text))],
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Regex capture state embedded in `Context`.
#[derive(Debug, Default)]
pub struct RxpState {
    working: CaptureSet,
    active: CaptureSet,
}

impl RxpState {
    pub fn begin_match(&mut self, caps: &Captures<'_>) {
        self.working = CaptureSet::from_captures(caps);
    }

    /// Promote the working set to active. Called only once a comparison
    /// using regex/literal capture decides the match is the one that wins.
    pub fn commit_match(&mut self) {
        self.active = std::mem::take(&mut self.working);
    }

    /// Install a single literal capture (`prefix`/`suffix`/`tld`), bypassing
    /// the working-set two-phase commit since there is no regex involved.
    pub fn set_literal_capture(&mut self, text: &str) {
        self.active = CaptureSet::literal(text);
    }

    pub fn active(&self) -> &CaptureSet {
        &self.active
    }

    pub fn active_capture(&self, index: usize) -> Option<&str> {
        self.active.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn commit_promotes_working_to_active() {
        let re = Regex::new(r"(\w+)@(\w+)").unwrap();
        let caps = re.captures("user@host").unwrap();
        let mut state = RxpState::default();
        state.begin_match(&caps);
        assert!(state.active_capture(1).is_none());
        state.commit_match();
        assert_eq!(state.active_capture(1), Some("user"));
        assert_eq!(state.active_capture(2), Some("host"));
    }

    #[test]
    fn literal_capture_sets_group_zero_only() {
        let mut state = RxpState::default();
        state.set_literal_capture("www");
        assert_eq!(state.active_capture(0), Some("www"));
        assert_eq!(state.active.len(), 1);
    }

    #[test]
    fn failed_match_leaves_active_untouched() {
        let re = Regex::new(r"(\d+)").unwrap();
        let mut state = RxpState::default();
        state.set_literal_capture("prior");
        if let Some(caps) = re.captures("no digits here") {
            state.begin_match(&caps);
            state.commit_match();
        }
        assert_eq!(state.active_capture(0), Some("prior"));
    }
}
