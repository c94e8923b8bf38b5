//! Pluggable source of random identifiers, so a Connector's instance id and
//! the publication engine's call ids can be swapped for deterministic
//! values in tests without threading a seed through every call site.

/// Mints opaque, unique identifier strings.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> String;
}

/// The default source: a 32-hex-character UUIDv4, matching the shape of
/// [`fabric_errors::new_trace_id`].
#[derive(Default)]
pub struct RandomIdSource;

impl IdSource for RandomIdSource {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_source_produces_32_hex_chars() {
        let id = RandomIdSource.next_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn random_source_does_not_repeat() {
        let a = RandomIdSource.next_id();
        let b = RandomIdSource.next_id();
        assert_ne!(a, b);
    }
}
