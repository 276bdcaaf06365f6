use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

static TR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static HEADINGS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1, h2").unwrap());
static META: LazyLock<Selector> = LazyLock::new(|| Selector::parse("meta[name]").unwrap());
static JSON_LD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

// Checked in order; every matching selector contributes its own trail.
static BREADCRUMBS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "nav ol li",
        ".breadcrumb li",
        r#"nav[aria-label="breadcrumb"] li"#,
        "ol.breadcrumb li",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect()
});

/// Parsed page handed to the resolver strategies; accessors expose the
/// views they read, nothing here decides what a field means.
pub struct PageDoc {
    raw: String,
    doc: Html,
}

impl PageDoc {
    pub fn parse(raw: &str) -> Self {
        PageDoc {
            raw: raw.to_string(),
            doc: Html::parse_document(raw),
        }
    }

    /// Source markup as fetched. The loose token scan runs over this, so
    /// identifiers that only appear in attribute values stay reachable.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Rendered text of the whole document, whitespace-squeezed.
    pub fn text(&self) -> String {
        squeeze(self.doc.root_element().text())
    }

    /// First two cell texts of every table row, in document order.
    pub fn table_rows(&self) -> Vec<(String, String)> {
        let mut rows = Vec::new();
        for tr in self.doc.select(&TR) {
            let mut cells = tr.select(&TD);
            let first = cells.next().map(element_text);
            let second = cells.next().map(element_text);
            if let (Some(a), Some(b)) = (first, second) {
                rows.push((a, b));
            }
        }
        rows
    }

    /// Last item of each matching breadcrumb list, in selector order. A
    /// junk tail under one selector must not hide a real one under the
    /// next, so every trail's tail is offered and the caller filters.
    pub fn breadcrumb_tails(&self) -> Vec<String> {
        BREADCRUMBS
            .iter()
            .filter_map(|sel| self.doc.select(sel).last().map(element_text))
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn title(&self) -> Option<String> {
        self.doc
            .select(&TITLE)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
    }

    /// Up to `limit` h1/h2 heading texts, in document order.
    pub fn headings(&self, limit: usize) -> Vec<String> {
        self.doc
            .select(&HEADINGS)
            .take(limit)
            .map(element_text)
            .collect()
    }

    /// `content` of meta tags whose `name` satisfies the predicate.
    pub fn meta_contents(&self, name_matches: impl Fn(&str) -> bool) -> Vec<String> {
        self.doc
            .select(&META)
            .filter_map(|el| {
                let name = el.value().attr("name")?;
                if !name_matches(name) {
                    return None;
                }
                el.value().attr("content").map(|c| c.trim().to_string())
            })
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Parsed JSON-LD blocks; unparsable ones are dropped.
    pub fn json_ld(&self) -> Vec<serde_json::Value> {
        self.doc
            .select(&JSON_LD)
            .filter_map(|el| {
                let text: String = el.text().collect();
                serde_json::from_str(&text).ok()
            })
            .collect()
    }
}

fn element_text(el: ElementRef) -> String {
    squeeze(el.text())
}

fn squeeze<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let joined = parts.collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}
