//! Transport subject naming.
//!
//! A bus subject is keyed on `<method>.<host>.<port>` only — coarser than
//! the full URL path. The concrete request path travels inside the
//! envelope (`Frame::dispatch_path`) and is resolved in-process by the
//! subscription engine's routing trie; the bus itself, a simplified
//! in-process stand-in for the real transport driver, only needs to route
//! a connector's whole inbox for one method and port, not one subject per
//! registered path pattern.
//!
//! Every subscribable (method, host, port) has two subjects. The plain
//! subject is used for unicast delivery: a service instance subscribes to
//! it under a queue group named after its own host, so exactly one
//! instance of the group handles any given call. The multicast subject
//! mirrors it and is subscribed to without a queue group, so every
//! instance receives a multicast publish. Keeping them distinct means a
//! unicast publish never also lands on an instance's plain (multicast)
//! subscription.

/// Builds the unicast subject for `method` calls to `host:port`.
pub fn unicast_subject(method: &str, host: &str, port: u16) -> String {
    format!("{}.{}.{port}", method.to_ascii_lowercase(), sanitize_host(host))
}

/// Builds the multicast subject for `method` calls to `host:port`.
pub fn multicast_subject(method: &str, host: &str, port: u16) -> String {
    format!("{}.m", unicast_subject(method, host, port))
}

/// The reply subject an originator listens on for responses to one call.
pub fn reply_subject(from_id: &str, call_id: &str) -> String {
    format!("{from_id}.r.{call_id}")
}

fn sanitize_host(host: &str) -> String {
    host.replace('.', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicast_subject_joins_method_host_and_port() {
        assert_eq!(
            unicast_subject("POST", "echo.example", 443),
            "post.echo-example.443"
        );
    }

    #[test]
    fn multicast_subject_mirrors_unicast_with_a_suffix() {
        let uni = unicast_subject("POST", "echo.example", 443);
        let multi = multicast_subject("POST", "echo.example", 443);
        assert_eq!(multi, format!("{uni}.m"));
        assert_ne!(uni, multi);
    }

    #[test]
    fn reply_subject_pairs_originator_and_call_id() {
        assert_eq!(reply_subject("abc123", "call-1"), "abc123.r.call-1");
    }
}
