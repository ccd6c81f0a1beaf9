//! Port classification.
//!
//! Classification is a pure function of the inventory port list, the tunnel
//! naming regex and the device's compiled external-interface patterns.

use super::types::PortInfo;
use gbp_types::PortId;
use log::warn;
use regex::Regex;
use std::collections::BTreeSet;

/// Result of classifying a device's ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortClassification {
    pub tunnel_port: Option<PortId>,
    pub external_ports: BTreeSet<PortId>,
}

/// Compiled external-interface patterns for one device.
///
/// Each pattern must match a port name in full.
#[derive(Debug, Clone, Default)]
pub struct ExternalPatterns {
    patterns: Vec<Regex>,
}

impl ExternalPatterns {
    /// Compiles `patterns`. Invalid patterns are logged and skipped.
    pub fn compile(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Regex::new(&format!("^(?:{})$", p)) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Skipping invalid external interface pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Classifies `ports` by name. Unnamed ports are skipped. When several ports
/// match the tunnel pattern the last one in inventory order wins.
pub fn classify_ports(
    ports: &[PortInfo],
    tunnel_pattern: &Regex,
    external: &ExternalPatterns,
) -> PortClassification {
    let mut result = PortClassification::default();
    for port in ports {
        let Some(name) = port.name.as_deref() else {
            continue;
        };
        if tunnel_pattern.is_match(name) {
            result.tunnel_port = Some(port.id.clone());
        }
        if external.is_match(name) {
            result.external_ports.insert(port.id.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TUNNEL_PORT_PATTERN;
    use pretty_assertions::assert_eq;

    fn tunnel_re() -> Regex {
        Regex::new(DEFAULT_TUNNEL_PORT_PATTERN).unwrap()
    }

    fn ports(names: &[&str]) -> Vec<PortInfo> {
        names.iter().map(|n| PortInfo::named(*n, *n)).collect()
    }

    #[test]
    fn test_tunnel_port_detection() {
        let result = classify_ports(
            &ports(&["eth0", "eth0_vxlan3", "eth1"]),
            &tunnel_re(),
            &ExternalPatterns::default(),
        );
        assert_eq!(result.tunnel_port, Some(PortId::new("eth0_vxlan3")));
        assert!(result.external_ports.is_empty());
    }

    #[test]
    fn test_last_tunnel_match_wins() {
        let result = classify_ports(
            &ports(&["a_tun1", "b_vxlan0", "c"]),
            &tunnel_re(),
            &ExternalPatterns::default(),
        );
        assert_eq!(result.tunnel_port, Some(PortId::new("b_vxlan0")));
    }

    #[test]
    fn test_suffix_requires_number() {
        let result = classify_ports(
            &ports(&["eth0_vxlan", "vxlan0_eth"]),
            &tunnel_re(),
            &ExternalPatterns::default(),
        );
        assert_eq!(result.tunnel_port, None);
    }

    #[test]
    fn test_external_patterns_match_whole_name() {
        let external = ExternalPatterns::compile(&["ext\\d+".to_string()]);
        let result = classify_ports(&ports(&["ext1", "ext22", "myext1", "ext1a"]), &tunnel_re(), &external);
        let expected: BTreeSet<PortId> = ["ext1", "ext22"].into_iter().map(PortId::from).collect();
        assert_eq!(result.external_ports, expected);
    }

    #[test]
    fn test_unnamed_ports_are_not_classified() {
        let external = ExternalPatterns::compile(&["openflow:\\d+:\\d+".to_string()]);
        let input = vec![PortInfo::new("eth0_vxlan3"), PortInfo::new("openflow:1:3")];
        let result = classify_ports(&input, &tunnel_re(), &external);
        assert_eq!(result, PortClassification::default());
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let external = ExternalPatterns::compile(&["(broken".to_string(), "uplink.*".to_string()]);
        assert_eq!(external.len(), 1);
        assert!(external.is_match("uplink0"));
    }

    #[test]
    fn test_classification_is_pure() {
        let external = ExternalPatterns::compile(&["eth1".to_string()]);
        let input = ports(&["eth0_tun4", "eth1"]);
        let first = classify_ports(&input, &tunnel_re(), &external);
        let second = classify_ports(&input, &tunnel_re(), &external);
        assert_eq!(first, second);
    }
}
