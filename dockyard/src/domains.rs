//! Hostname validation.
//!
//! Every code path that accepts a hostname goes through [`validate_domain_list`]
//! so nothing unvalidated reaches reverse-proxy configuration.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::DockyardError;

/// Label rules of RFC 1123, at least two labels.
const DOMAIN_PATTERN: &str =
    r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)+$";

/// Longest hostname accepted
const MAX_DOMAIN_LEN: usize = 253;

fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DOMAIN_PATTERN).expect("domain pattern is valid"))
}

/// Check a single hostname
pub fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= MAX_DOMAIN_LEN && domain_regex().is_match(domain)
}

/// Validate a comma-separated list of hostnames.
///
/// Returns the normalized list (trimmed, lowercased, empties dropped) or a
/// validation error naming the first offending entry. An empty input is valid
/// and yields an empty list.
pub fn validate_domain_list(input: &str) -> Result<Vec<String>, DockyardError> {
    let mut domains = Vec::new();
    for raw in input.split(',') {
        let domain = raw.trim();
        if domain.is_empty() {
            continue;
        }
        if !is_valid_domain(domain) {
            return Err(DockyardError::ValidationError(format!(
                "Invalid domain '{}': must be a valid hostname such as app.example.com",
                domain
            )));
        }
        domains.push(domain.to_ascii_lowercase());
    }
    Ok(domains)
}

/// Validate an optional domain field and return it in canonical form
/// (`None` when empty).
pub fn normalize_domain_field(input: Option<&str>) -> Result<Option<String>, DockyardError> {
    match input {
        None => Ok(None),
        Some(raw) => {
            let domains = validate_domain_list(raw)?;
            if domains.is_empty() {
                Ok(None)
            } else {
                Ok(Some(domains.join(",")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_domains() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("app.example.com"));
        assert!(is_valid_domain("my-app.example.co.uk"));
    }

    #[test]
    fn test_invalid_domains() {
        assert!(!is_valid_domain("localhost"));
        assert!(!is_valid_domain("-bad.example.com"));
        assert!(!is_valid_domain("bad-.example.com"));
        assert!(!is_valid_domain("example.com; rm -rf /"));
        assert!(!is_valid_domain("exa mple.com"));
        assert!(!is_valid_domain("example.com\nserver_name evil"));
    }

    #[test]
    fn test_domain_list() {
        let domains = validate_domain_list(" A.example.com, b.example.com ,").unwrap();
        assert_eq!(domains, vec!["a.example.com", "b.example.com"]);

        assert!(validate_domain_list("").unwrap().is_empty());
        assert!(validate_domain_list("good.example.com,bad domain").is_err());
    }

    #[test]
    fn test_normalize_domain_field() {
        assert_eq!(normalize_domain_field(None).unwrap(), None);
        assert_eq!(normalize_domain_field(Some(" ")).unwrap(), None);
        assert_eq!(
            normalize_domain_field(Some("a.example.com, b.example.com")).unwrap(),
            Some("a.example.com,b.example.com".to_string())
        );
    }
}
