use anyhow::{bail, Result};
use ipnet::IpNet;

/// Validates that every entry is an IPv4 or IPv6 network with a prefix
/// length. All parse failures are reported together. An empty list is valid.
pub fn validate_cidrs(cidrs: &[String]) -> Result<()> {
    let failures = cidrs
        .iter()
        .filter_map(|cidr| {
            cidr.parse::<IpNet>()
                .err()
                .map(|error| format!("{cidr}: {error}"))
        })
        .collect::<Vec<_>>();

    if failures.is_empty() {
        return Ok(());
    }
    bail!("invalid CIDRs: {}", failures.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_valid() {
        assert!(validate_cidrs(&[]).is_ok());
    }

    #[test]
    fn accepts_v4_and_v6_networks() {
        let cidrs = vec![
            "140.82.112.0/20".to_string(),
            "2a0a:a440::/29".to_string(),
            "0.0.0.0/0".to_string(),
        ];
        assert!(validate_cidrs(&cidrs).is_ok());
    }

    #[test]
    fn rejects_addresses_without_prefix() {
        let cidrs = vec!["10.0.0.1".to_string()];
        assert!(validate_cidrs(&cidrs).is_err());
    }

    #[test]
    fn aggregates_all_failures() {
        let cidrs = vec![
            "not-a-cidr".to_string(),
            "10.0.0.0/8".to_string(),
            "300.0.0.0/8".to_string(),
        ];
        let error = validate_cidrs(&cidrs).unwrap_err().to_string();
        assert!(error.contains("not-a-cidr"));
        assert!(error.contains("300.0.0.0/8"));
        assert!(!error.contains("10.0.0.0/8:"));
    }
}
