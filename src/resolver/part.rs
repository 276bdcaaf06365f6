use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::config::PartPrecedence;

use super::document::PageDoc;

// Label patterns run case-insensitively over rendered text; the bare
// token patterns stay uppercase-only to keep prose like "e-mail" out.
static LABELED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)part\s*#\s*:\s*([A-Za-z0-9][A-Za-z0-9.\-_/]+)",
        r"(?i)part\s*number\s*:\s*([A-Za-z0-9][A-Za-z0-9.\-_/]+)",
        r"(?i)part\s*#\s*([A-Za-z0-9][A-Za-z0-9.\-_/]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static LABEL_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^part\s*(?:#|number)?\s*:?$").unwrap());

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,}[-.][A-Z0-9.\-]+)\b").unwrap());

static LOOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,}[-.][A-Z0-9.\-]{2,})\b").unwrap());

static PART_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.\-_/]+$").unwrap());

static DIGITS_DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\d\-]+$").unwrap());

const LOOSE_MIN_LEN: usize = 4;
const LOOSE_MAX_LEN: usize = 50;
const HEADING_LIMIT: usize = 5;

const DENYLIST: &[&str] = &[
    "charset",
    "utf",
    "html",
    "javascript",
    "http",
    "www.",
    ".com",
    ".net",
    "email",
    "lorem",
];

// ── Validation ─────────────────────────────────────────────────────

/// Accepts or rejects part-number candidates. The configured company name
/// joins the denylist so vendor branding never passes as a part.
pub struct PartValidator {
    company_token: String,
}

impl PartValidator {
    pub fn new(company: &str) -> Self {
        PartValidator {
            company_token: company.trim().to_lowercase(),
        }
    }

    pub fn accepts(&self, candidate: &str) -> bool {
        let c = candidate.trim();
        let len = c.chars().count();
        if !(2..=100).contains(&len) {
            return false;
        }
        if !PART_CHARS.is_match(c) {
            return false;
        }
        let has_alpha = c.chars().any(|ch| ch.is_ascii_alphabetic());
        let has_digit = c.chars().any(|ch| ch.is_ascii_digit());
        if !(has_alpha || (has_digit && len > 3)) {
            return false;
        }
        // Date-like tokens (2024-01-31) sneak past the digit rule.
        if DIGITS_DASHES.is_match(c) {
            return false;
        }
        let lower = c.to_lowercase();
        if DENYLIST.iter().any(|d| lower.contains(d)) {
            return false;
        }
        if !self.company_token.is_empty() && lower.contains(&self.company_token) {
            return false;
        }
        true
    }
}

// ── Candidate strategies ───────────────────────────────────────────

/// Page-derived candidates in strategy order: labels, labelled table rows,
/// breadcrumbs, title, headings, structured metadata, then the loose scan
/// over the raw markup.
fn page_candidates(page: &PageDoc) -> Vec<String> {
    let text = page.text();
    let mut out = Vec::new();

    for re in LABELED.iter() {
        for cap in re.captures_iter(&text) {
            out.push(cap[1].trim().to_string());
        }
    }
    for (label, value) in page.table_rows() {
        if LABEL_CELL.is_match(&label) {
            if let Some(tok) = value.split_whitespace().next() {
                out.push(tok.to_string());
            }
        }
    }

    out.extend(page.breadcrumb_tails());

    if let Some(title) = page.title() {
        if let Some(cap) = TOKEN.captures(&title) {
            out.push(cap[1].to_string());
        }
    }
    for heading in page.headings(HEADING_LIMIT) {
        if let Some(cap) = TOKEN.captures(&heading) {
            out.push(cap[1].to_string());
        }
    }

    for content in page.meta_contents(|name| {
        let n = name.to_lowercase();
        n.contains("part") || n.contains("product")
    }) {
        out.push(content);
    }
    out.extend(json_ld_candidates(page));

    // Raw markup, not rendered text: identifiers buried in attribute
    // values are still worth offering at this point.
    for cap in LOOSE.captures_iter(page.raw()) {
        let tok = &cap[1];
        if (LOOSE_MIN_LEN..=LOOSE_MAX_LEN).contains(&tok.len()) {
            out.push(tok.to_string());
        }
    }

    out
}

fn json_ld_candidates(page: &PageDoc) -> Vec<String> {
    let mut out = Vec::new();
    for value in page.json_ld() {
        match value {
            serde_json::Value::Object(obj) => push_product_keys(&obj, &mut out),
            serde_json::Value::Array(arr) => {
                for v in arr {
                    if let serde_json::Value::Object(obj) = v {
                        push_product_keys(&obj, &mut out);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

fn push_product_keys(
    obj: &serde_json::Map<String, serde_json::Value>,
    out: &mut Vec<String>,
) {
    for key in ["sku", "productID", "mpn"] {
        if let Some(serde_json::Value::String(s)) = obj.get(key) {
            out.push(s.trim().to_string());
        }
    }
}

/// Candidate from the URL itself: `?part=` query parameter, or the value
/// after a `/p/` or `/part/` path segment. Encoded slashes are restored.
fn url_candidate(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;

    if let Some((_, v)) = parsed.query_pairs().find(|(k, _)| k.as_ref() == "part") {
        let v = decode_slashes(v.trim());
        if !v.is_empty() {
            return Some(v);
        }
    }

    let segments: Vec<&str> = parsed.path_segments()?.collect();
    for (i, seg) in segments.iter().enumerate() {
        if (*seg == "p" || *seg == "part") && i + 1 < segments.len() {
            let v = decode_slashes(segments[i + 1].trim());
            if !v.is_empty() {
                return Some(v);
            }
        }
    }
    None
}

fn decode_slashes(s: &str) -> String {
    s.replace("%252F", "/").replace("%2F", "/").replace("%2f", "/")
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '.' | '-' | '/'))
        .collect::<String>()
        .to_lowercase()
}

// ── Resolution ─────────────────────────────────────────────────────

/// Best part number for the page, or None. When the URL carries its own
/// candidate, any page candidate agreeing with it (after normalization)
/// wins with the page's formatting; on disagreement `precedence` decides.
pub fn resolve(
    page: &PageDoc,
    url: &str,
    validator: &PartValidator,
    precedence: PartPrecedence,
) -> Option<String> {
    let url_cand = url_candidate(url).filter(|c| validator.accepts(c));
    let candidates = page_candidates(page);

    match url_cand {
        Some(u) => {
            let u_norm = normalize(&u);
            let mut first_valid = None;
            for c in candidates {
                if !validator.accepts(&c) {
                    continue;
                }
                if normalize(&c) == u_norm {
                    return Some(c);
                }
                if first_valid.is_none() {
                    first_valid = Some(c);
                }
            }
            match precedence {
                PartPrecedence::Url => Some(u),
                PartPrecedence::Page => first_valid.or(Some(u)),
            }
        }
        None => candidates.into_iter().find(|c| validator.accepts(c)),
    }
}

// ── Tests ──────────────────────────────────────────────────────────
