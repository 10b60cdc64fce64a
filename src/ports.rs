//! External port allocation
//!
//! Ports are derived from the manifest rather than tracked in a separate
//! ledger: the next port is one above the highest host port already published
//! to the internal app port, or the configured base when nothing is
//! registered yet. The registry lock serializes allocation with the mutation
//! that consumes the port.

use anyhow::Result;

use crate::manifest::Manifest;

/// Pick the next free external port for a new app
pub fn next_external_port(manifest: &Manifest, base: u16) -> Result<u16> {
    match manifest.published_to_internal().into_iter().max() {
        Some(highest) => highest.checked_add(1).ok_or_else(|| {
            anyhow::anyhow!("Host port space exhausted (highest mapping is {})", highest)
        }),
        None => Ok(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(yaml: &str) -> Manifest {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_empty_manifest_uses_base() {
        let m = Manifest::default();
        assert_eq!(next_external_port(&m, 8100).unwrap(), 8100);
    }

    #[test]
    fn test_allocates_one_above_highest() {
        let m = manifest(
            r#"
services:
  a:
    ports: ["8101:8000"]
  b:
    ports: ["8105:8000"]
  c:
    ports: ["8103:8000"]
"#,
        );
        assert_eq!(next_external_port(&m, 8100).unwrap(), 8106);
    }

    #[test]
    fn test_mappings_to_other_container_ports_do_not_count() {
        let m = manifest(
            r#"
services:
  db:
    ports: ["5432:5432"]
  cache:
    ports: ["6379:6379"]
"#,
        );
        assert_eq!(next_external_port(&m, 8100).unwrap(), 8100);
    }

    #[test]
    fn test_sequential_allocation() {
        let mut m = manifest(
            r#"
services:
  foo:
    ports: ["8100:8000"]
"#,
        );
        assert_eq!(next_external_port(&m, 8100).unwrap(), 8101);

        m.services.get_mut("foo").unwrap().ports =
            vec![crate::manifest::PortMapping::publish(8101, 8000)];
        assert_eq!(next_external_port(&m, 8100).unwrap(), 8102);
    }

    #[test]
    fn test_port_space_exhaustion() {
        let m = manifest(
            r#"
services:
  last:
    ports: ["65535:8000"]
"#,
        );
        assert!(next_external_port(&m, 8100).is_err());
    }
}
