mod document;
mod part;
mod unspsc;

pub use document::PageDoc;
pub use part::PartValidator;

use crate::config::{PartPrecedence, TieBreak};
use crate::record::NOT_FOUND;

/// Tunable resolution behavior; one per run.
#[derive(Debug, Clone)]
pub struct ResolverPolicy {
    pub tie_break: TieBreak,
    pub part_precedence: PartPrecedence,
    pub company: String,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        ResolverPolicy {
            tie_break: TieBreak::Last,
            part_precedence: PartPrecedence::Url,
            company: crate::config::DEFAULT_COMPANY.to_string(),
        }
    }
}

/// Both extracted fields, with the `Not Found` sentinel standing in for
/// misses so consumers compare with plain equality.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub part: String,
    pub unspsc_feature: String,
    pub unspsc_code: String,
}

pub struct Resolver {
    policy: ResolverPolicy,
    validator: PartValidator,
}

impl Resolver {
    pub fn new(policy: ResolverPolicy) -> Self {
        let validator = PartValidator::new(&policy.company);
        Resolver { policy, validator }
    }

    /// Extract the part number and latest UNSPSC pair from one page.
    pub fn resolve(&self, body: &str, url: &str) -> Resolved {
        let page = PageDoc::parse(body);
        let part = part::resolve(&page, url, &self.validator, self.policy.part_precedence);
        let unspsc = unspsc::resolve(&page, self.policy.tie_break);
        let (feature, code) = match unspsc {
            Some((f, c)) => (f, c),
            None => (NOT_FOUND.to_string(), NOT_FOUND.to_string()),
        };
        Resolved {
            part: part.unwrap_or_else(|| NOT_FOUND.to_string()),
            unspsc_feature: feature,
            unspsc_code: code,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_on_bare_page() {
        let resolver = Resolver::new(ResolverPolicy::default());
        let got = resolver.resolve("<html><body>hi</body></html>", "https://example.com/x");
        assert_eq!(got.part, NOT_FOUND);
        assert_eq!(got.unspsc_feature, NOT_FOUND);
        assert_eq!(got.unspsc_code, NOT_FOUND);
    }

    #[test]
    fn fixture_resolves_both_fields() {
        let html = std::fs::read_to_string("tests/fixtures/product_page.html").unwrap();
        let resolver = Resolver::new(ResolverPolicy::default());
        let got = resolver.resolve(&html, "https://products.example.com/p/SS-4BMRG-TW");
        assert_eq!(got.part, "SS-4BMRG-TW");
        assert_eq!(got.unspsc_feature, "UNSPSC (17.1001)");
        assert_eq!(got.unspsc_code, "40183102");
    }
}
