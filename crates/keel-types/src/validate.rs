//! Structural formats for identifiers, slugs and host names.

use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").expect("identifier regex")
});

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("slug regex"));

static DNS_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("dns label regex"));

static REPOSITORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("repository regex"));

pub const MAX_SLUG_LEN: usize = 63;
const MAX_HOST_LEN: usize = 253;
const MAX_DNS_LABEL_LEN: usize = 63;

/// Lowercase, hyphenated UUID.
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

pub fn is_valid_slug(value: &str) -> bool {
    value.len() <= MAX_SLUG_LEN && SLUG_RE.is_match(value)
}

/// Lowercase dot-separated DNS name, one label or more.
pub fn is_valid_dns_name(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_HOST_LEN
        && value
            .split('.')
            .all(|label| label.len() <= MAX_DNS_LABEL_LEN && DNS_LABEL_RE.is_match(label))
}

/// Fully qualified host name: a DNS name with at least two labels.
pub fn is_valid_host(value: &str) -> bool {
    value.contains('.') && is_valid_dns_name(value)
}

/// `owner/name` repository reference.
pub fn is_valid_repository(value: &str) -> bool {
    REPOSITORY_RE.is_match(value)
}

pub fn is_valid_port(port: u32) -> bool {
    (1..=65535).contains(&port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(is_valid_identifier("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_valid_identifier("550E8400-E29B-41D4-A716-446655440000"));
        assert!(!is_valid_identifier("550e8400e29b41d4a716446655440000"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn slugs() {
        assert!(is_valid_slug("web"));
        assert!(is_valid_slug("my-app-2"));
        assert!(!is_valid_slug("-web"));
        assert!(!is_valid_slug("web-"));
        assert!(!is_valid_slug("Web"));
        assert!(!is_valid_slug(&"a".repeat(64)));
    }

    #[test]
    fn hosts() {
        assert!(is_valid_host("web.apps.example.com"));
        assert!(!is_valid_host("localhost"));
        assert!(!is_valid_host("bad_host.example.com"));
        assert!(!is_valid_host("trailing.dot."));
        assert!(is_valid_dns_name("localhost"));
    }

    #[test]
    fn ports() {
        assert!(is_valid_port(3000));
        assert!(!is_valid_port(0));
        assert!(!is_valid_port(70000));
    }
}
