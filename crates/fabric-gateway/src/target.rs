//! Parses the `/host:port/rest...` shape every inbound gateway path carries,
//! the HTTP mirror of the bus's `host:port` subject naming.

use fabric_errors::{error_args, Error};

/// The destination a request names: the internal service host, the NATS
/// port requested by the URL, and the remaining path to publish against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub requested_port: u16,
    pub path: String,
}

/// Splits `/host:port/rest` (or `/host:port` with no trailing path) into its
/// pieces. The leading slash is required; a missing `:port` segment or an
/// empty host is a `400`.
pub fn parse_target(path: &str) -> Result<Target, Error> {
    let trimmed = path.strip_prefix('/').ok_or_else(|| {
        Error::new(
            format!("bad request: path must start with '/': {path}"),
            error_args![400i32],
        )
    })?;
    let (first_segment, rest) = match trimmed.split_once('/') {
        Some((first, rest)) => (first, rest),
        None => (trimmed, ""),
    };
    let (host, port_str) = first_segment.split_once(':').ok_or_else(|| {
        Error::new(
            format!("bad request: missing ':port' in path {path}"),
            error_args![400i32],
        )
    })?;
    if host.is_empty() {
        return Err(Error::new(
            format!("bad request: empty host in path {path}"),
            error_args![400i32],
        ));
    }
    let requested_port: u16 = port_str.parse().map_err(|_| {
        Error::new(
            format!("bad request: invalid port in path {path}"),
            error_args![400i32],
        )
    })?;
    Ok(Target {
        host: host.to_string(),
        requested_port,
        path: format!("/{rest}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_port_and_path() {
        let t = parse_target("/echo.host:443/echo").unwrap();
        assert_eq!(t.host, "echo.host");
        assert_eq!(t.requested_port, 443);
        assert_eq!(t.path, "/echo");
    }

    #[test]
    fn path_with_no_remaining_segments_becomes_root() {
        let t = parse_target("/echo.host:443").unwrap();
        assert_eq!(t.path, "/");
    }

    #[test]
    fn missing_leading_slash_is_rejected() {
        assert!(parse_target("echo.host:443/echo").is_err());
    }

    #[test]
    fn missing_port_is_rejected() {
        assert!(parse_target("/echo.host/echo").is_err());
    }
}
