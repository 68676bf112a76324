//! Device id normalization and authority resolution records.
//!
//! A device id is `<domain>:<name>`. The domain part is optional: a
//! bare name gets the configured default domain, and a leading colon
//! denotes the empty domain — a local, non-routed namespace. All ids
//! are lowercased; normalization is idempotent.

use crate::error::Error;
use crate::gateway::Gateway;
use std::fmt;
use std::sync::Arc;

/// Wildcard gateway table entry matching any domain.
pub const WILDCARD_DOMAIN: &str = "*";

/// Split a raw id into its normalized `(deviceid, domain)` pair.
///
/// `default_domain` is prepended when the raw id carries no colon.
/// Fails on empty input and on an empty name part.
pub fn normalize(raw: &str, default_domain: &str) -> Result<(String, String), Error> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return Err(Error::InvalidId {
            raw: raw.to_string(),
            reason: "empty id".to_string(),
        });
    }

    let (domain, name) = match lowered.split_once(':') {
        Some((domain, name)) => (domain.to_string(), name.to_string()),
        None => (default_domain.to_lowercase(), lowered),
    };

    if name.is_empty() {
        return Err(Error::InvalidId {
            raw: raw.to_string(),
            reason: "empty name".to_string(),
        });
    }

    Ok((format!("{}:{}", domain, name), domain))
}

/// Where requests for a device id must go.
///
/// Computed on demand by [`crate::Node::resolve`] from the gateway
/// table and node configuration.
#[derive(Clone)]
pub struct Authority {
    /// Normalized device id (`<domain>:<name>`).
    pub deviceid: String,
    /// Normalized domain part; empty for the local non-routed namespace.
    pub domain: String,
    /// Whether the id lives in this node's local namespace.
    pub is_local: bool,
    /// Whether the id may be routed across node boundaries.
    pub is_routable: bool,
    /// Whether this node owns the middleware pipeline for the id.
    pub is_authoritative: bool,
    /// Gateway toward the authoritative node, when this node is not it.
    pub gateway: Option<Arc<dyn Gateway>>,
}

impl Authority {
    /// Record for an empty-domain id: always local, never routed.
    pub(crate) fn local_unrouted(deviceid: String) -> Self {
        Self {
            deviceid,
            domain: String::new(),
            is_local: true,
            is_routable: false,
            is_authoritative: true,
            gateway: None,
        }
    }

    /// Record for a routable id this node claims.
    pub(crate) fn claimed(deviceid: String, domain: String) -> Self {
        Self {
            deviceid,
            domain,
            is_local: true,
            is_routable: true,
            is_authoritative: true,
            gateway: None,
        }
    }

    /// Record for an id another node is authoritative for.
    pub(crate) fn routed(deviceid: String, domain: String, gateway: Option<Arc<dyn Gateway>>) -> Self {
        Self {
            deviceid,
            domain,
            is_local: false,
            is_routable: true,
            is_authoritative: false,
            gateway,
        }
    }
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authority")
            .field("deviceid", &self.deviceid)
            .field("domain", &self.domain)
            .field("is_local", &self.is_local)
            .field("is_routable", &self.is_routable)
            .field("is_authoritative", &self.is_authoritative)
            .field("gateway", &self.gateway.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_name_gets_default_domain() {
        let (id, domain) = normalize("Sensor-1", ".").unwrap();
        assert_eq!(id, ".:sensor-1");
        assert_eq!(domain, ".");
    }

    #[test]
    fn test_explicit_domain() {
        let (id, domain) = normalize("Lab:Sensor-1", ".").unwrap();
        assert_eq!(id, "lab:sensor-1");
        assert_eq!(domain, "lab");
    }

    #[test]
    fn test_leading_colon_is_empty_domain() {
        let (id, domain) = normalize(":local-thing", ".").unwrap();
        assert_eq!(id, ":local-thing");
        assert_eq!(domain, "");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for raw in ["Sensor", "Lab:Sensor", ":Sensor", "a:b:c"] {
            let (once, domain_once) = normalize(raw, ".").unwrap();
            let (twice, domain_twice) = normalize(&once, ".").unwrap();
            assert_eq!(once, twice);
            assert_eq!(domain_once, domain_twice);
        }
    }

    #[test]
    fn test_name_may_contain_colons() {
        // Only the first colon splits domain from name.
        let (id, domain) = normalize("lab:a:b", ".").unwrap();
        assert_eq!(id, "lab:a:b");
        assert_eq!(domain, "lab");
    }

    #[test]
    fn test_empty_inputs_rejected() {
        assert!(matches!(normalize("", "."), Err(Error::InvalidId { .. })));
        assert!(matches!(normalize("   ", "."), Err(Error::InvalidId { .. })));
        assert!(matches!(normalize("lab:", "."), Err(Error::InvalidId { .. })));
    }
}
