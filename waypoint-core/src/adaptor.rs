//! The host adaptor boundary, a thin interface: the only surface the engine
//! needs from whatever proxy process embeds it.
//!
//! The real C-ABI plugin glue (the actual shared-memory transaction object,
//! the real hook-registration syscalls) stays out of this crate entirely —
//! this trait is what a host implements to plug those in.
//! Everything in `context`/`directive`/`extractor` talks to the host only
//! through `&dyn HostAdaptor`, never through a concrete proxy type.

use crate::hook::Hook;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSide {
    UserAgent,
    Proxy,
}

/// Operations the engine needs on the in-flight transaction. A production
/// host implements this over its real request/response objects; tests and
/// `waypoint-cli`'s dry-run mode use [`TestAdaptor`].
pub trait HostAdaptor: Send {
    fn request_field(&self, side: RequestSide, field: &str) -> Option<String>;
    /// Rewrite a named URL component (`url-host`, `url-path`, ...) on the
    /// given side — backs the `ua-req-host`/`ua-req-path` sugar directives.
    fn set_request_field(&mut self, side: RequestSide, field: &str, value: &str);
    fn request_header(&self, side: RequestSide, name: &str) -> Option<String>;
    fn set_request_header(&mut self, side: RequestSide, name: &str, value: &str);
    fn remove_request_header(&mut self, side: RequestSide, name: &str);

    fn response_status(&self) -> Option<u16>;
    fn set_response_status(&mut self, status: u16);
    fn response_header(&self, name: &str) -> Option<String>;
    fn set_response_header(&mut self, name: &str, value: &str);

    fn inbound_addr_remote(&self) -> Option<IpAddr>;
    fn inbound_addr_local(&self) -> Option<IpAddr>;
    fn outbound_addr_remote(&self) -> Option<IpAddr>;

    fn is_internal(&self) -> bool;

    fn redirect(&mut self, location: &str, status: u16);

    /// Register interest in a later hook firing again for this transaction
    /// (`when` directive scheduling).
    fn schedule_hook(&mut self, hook: Hook);

    /// Plugin stat counters, delta-applied.
    fn stat_update(&mut self, name: &str, delta: i64);
    fn stat_read(&self, name: &str) -> i64;

    /// SSL/TLS session field lookup, if the connection is encrypted.
    fn ssl_session_field(&self, key: &str) -> Option<String>;

    fn mark_terminal(&mut self);
    fn is_terminal(&self) -> bool;
}

/// An in-memory `HostAdaptor` for unit tests and `waypoint-cli --dry-run`:
/// request/response state is just a couple of string maps, stats are a
/// local counter map, and `schedule_hook` records what was asked for so
/// tests can assert on it.
#[derive(Debug, Default)]
pub struct TestAdaptor {
    pub ua_headers: std::collections::HashMap<String, String>,
    pub proxy_headers: std::collections::HashMap<String, String>,
    pub ua_fields: std::collections::HashMap<String, String>,
    pub proxy_fields: std::collections::HashMap<String, String>,
    pub response_headers: std::collections::HashMap<String, String>,
    pub response_status: Option<u16>,
    pub remote: Option<IpAddr>,
    pub local: Option<IpAddr>,
    pub outbound_remote: Option<IpAddr>,
    pub internal: bool,
    pub redirected: Option<(String, u16)>,
    pub scheduled: Vec<Hook>,
    pub stats: std::collections::HashMap<String, i64>,
    pub ssl_fields: std::collections::HashMap<String, String>,
    pub terminal: bool,
}

impl TestAdaptor {
    pub fn with_ua_field(mut self, field: &str, value: &str) -> Self {
        self.ua_fields.insert(field.to_string(), value.to_string());
        self
    }

    pub fn with_ua_header(mut self, name: &str, value: &str) -> Self {
        self.ua_headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_proxy_field(mut self, field: &str, value: &str) -> Self {
        self.proxy_fields.insert(field.to_string(), value.to_string());
        self
    }
}

impl HostAdaptor for TestAdaptor {
    fn request_field(&self, side: RequestSide, field: &str) -> Option<String> {
        match side {
            RequestSide::UserAgent => self.ua_fields.get(field).cloned(),
            RequestSide::Proxy => self.proxy_fields.get(field).cloned(),
        }
    }

    fn set_request_field(&mut self, side: RequestSide, field: &str, value: &str) {
        let map = match side {
            RequestSide::UserAgent => &mut self.ua_fields,
            RequestSide::Proxy => &mut self.proxy_fields,
        };
        map.insert(field.to_string(), value.to_string());
    }

    fn request_header(&self, side: RequestSide, name: &str) -> Option<String> {
        match side {
            RequestSide::UserAgent => self.ua_headers.get(name).cloned(),
            RequestSide::Proxy => self.proxy_headers.get(name).cloned(),
        }
    }

    fn set_request_header(&mut self, side: RequestSide, name: &str, value: &str) {
        let map = match side {
            RequestSide::UserAgent => &mut self.ua_headers,
            RequestSide::Proxy => &mut self.proxy_headers,
        };
        map.insert(name.to_string(), value.to_string());
    }

    fn remove_request_header(&mut self, side: RequestSide, name: &str) {
        let map = match side {
            RequestSide::UserAgent => &mut self.ua_headers,
            RequestSide::Proxy => &mut self.proxy_headers,
        };
        map.remove(name);
    }

    fn response_status(&self) -> Option<u16> {
        self.response_status
    }

    fn set_response_status(&mut self, status: u16) {
        self.response_status = Some(status);
    }

    fn response_header(&self, name: &str) -> Option<String> {
        self.response_headers.get(name).cloned()
    }

    fn set_response_header(&mut self, name: &str, value: &str) {
        self.response_headers.insert(name.to_string(), value.to_string());
    }

    fn inbound_addr_remote(&self) -> Option<IpAddr> {
        self.remote
    }

    fn inbound_addr_local(&self) -> Option<IpAddr> {
        self.local
    }

    fn outbound_addr_remote(&self) -> Option<IpAddr> {
        self.outbound_remote
    }

    fn is_internal(&self) -> bool {
        self.internal
    }

    fn redirect(&mut self, location: &str, status: u16) {
        self.redirected = Some((location.to_string(), status));
    }

    fn schedule_hook(&mut self, hook: Hook) {
        self.scheduled.push(hook);
    }

    fn stat_update(&mut self, name: &str, delta: i64) {
        *self.stats.entry(name.to_string()).or_insert(0) += delta;
    }

    fn stat_read(&self, name: &str) -> i64 {
        *self.stats.get(name).unwrap_or(&0)
    }

    fn ssl_session_field(&self, key: &str) -> Option<String> {
        self.ssl_fields.get(key).cloned()
    }

    fn mark_terminal(&mut self) {
        self.terminal = true;
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptor_round_trips_headers() {
        let mut a = TestAdaptor::default();
        a.set_request_header(RequestSide::UserAgent, "host", "example.com");
        assert_eq!(
            a.request_header(RequestSide::UserAgent, "host"),
            Some("example.com".to_string())
        );
        a.remove_request_header(RequestSide::UserAgent, "host");
        assert_eq!(a.request_header(RequestSide::UserAgent, "host"), None);
    }

    #[test]
    fn test_adaptor_stat_update_accumulates() {
        let mut a = TestAdaptor::default();
        a.stat_update("hits", 1);
        a.stat_update("hits", 1);
        assert_eq!(a.stat_read("hits"), 2);
    }
}
