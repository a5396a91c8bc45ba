use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use leadscout_common::{extract_domain, RawResult};

/// Most candidates kept from a single results page.
pub const MAX_RESULTS_PER_PAGE: usize = 8;

const SNIPPET_MAX_CHARS: usize = 300;

/// Hosts that are part of the search engine itself, never candidates.
const BLOCKED_DOMAINS: &[&str] = &[
    "google.com",
    "google.com.br",
    "googleusercontent.com",
    "gstatic.com",
    "googleadservices.com",
    "doubleclick.net",
    "youtube.com",
    "youtu.be",
    "schema.org",
    "w3.org",
    "wikipedia.org",
    "wikimedia.org",
    "wikidata.org",
    "wiktionary.org",
];

/// Result-block containers, innermost first.
const CONTAINER_CLASSES: &[&str] = &["g", "MjjYud", "tF2Cxc", "b_algo", "result"];

const SNIPPET_SELECTOR: &str = ".VwiC3b, [data-sncf], .IsZvec, .st, .b_caption p, .result__snippet";

/// Pull outbound result links out of a search results page.
///
/// - Unwraps `/url?q=` redirect links and resolves relative hrefs
/// - Skips non-http schemes and hosts on the blocklist
/// - Title from the anchor text, else the nearest heading ancestor
/// - Drops titles of 3 characters or fewer
/// - Keeps the first occurrence of each URL, at most 8 per page
pub fn extract_results(dom: &Html, base_url: &str, page: u32) -> Vec<RawResult> {
    let base = match Url::parse(base_url) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };
    let anchor_selector = Selector::parse("a[href]").unwrap();

    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for anchor in dom.select(&anchor_selector) {
        if results.len() >= MAX_RESULTS_PER_PAGE {
            break;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(target) = resolve_target(&base, href) else {
            continue;
        };
        if is_blocked(&target) || seen.contains(target.as_str()) {
            continue;
        }

        let Some(title) = title_for(&anchor) else {
            continue;
        };
        if title.chars().count() <= 3 {
            continue;
        }
        seen.insert(target.to_string());

        let description = snippet_for(&anchor, &title).unwrap_or_default();
        results.push(RawResult {
            title,
            url: target.to_string(),
            description,
            position: results.len() as u32 + 1,
            source_page: page,
        });
    }

    results
}

/// Resolve `href` to an absolute http(s) URL, unwrapping redirect links.
fn resolve_target(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let resolved = base.join(href).ok()?;

    // /url?q=<target>&sa=... and /url?url=<target>
    let resolved = if resolved.path() == "/url" && is_blocked(&resolved) {
        let target = resolved
            .query_pairs()
            .find(|(k, _)| k == "q" || k == "url")
            .map(|(_, v)| v.into_owned())?;
        Url::parse(&target).ok()?
    } else {
        resolved
    };

    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

fn is_blocked(url: &Url) -> bool {
    let host = extract_domain(url.as_str());
    let host = host.strip_prefix("www.").unwrap_or(&host);
    BLOCKED_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: &ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn is_heading(el: &ElementRef) -> bool {
    matches!(el.value().name(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn title_for(anchor: &ElementRef) -> Option<String> {
    // Prefer a heading inside the anchor (the usual result layout).
    let heading_selector = Selector::parse("h1, h2, h3, h4, h5, h6").unwrap();
    if let Some(heading) = anchor.select(&heading_selector).next() {
        let text = element_text(&heading);
        if !text.is_empty() {
            return Some(text);
        }
    }

    let text = element_text(anchor);
    if !text.is_empty() {
        return Some(text);
    }

    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(is_heading)
        .map(|h| element_text(&h))
        .filter(|t| !t.is_empty())
}

/// Nearest result container around the anchor.
fn container_for<'a>(anchor: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    anchor.ancestors().filter_map(ElementRef::wrap).find(|el| {
        el.value()
            .classes()
            .any(|c| CONTAINER_CLASSES.contains(&c))
            || el.value().name() == "li"
    })
}

fn snippet_for(anchor: &ElementRef, title: &str) -> Option<String> {
    let container = container_for(anchor)?;
    let snippet_selector = Selector::parse(SNIPPET_SELECTOR).unwrap();

    let snippet = match container.select(&snippet_selector).next() {
        Some(el) => element_text(&el),
        // No marked snippet: whatever text the block has besides the title.
        None => element_text(&container).replacen(title, "", 1).trim().to_string(),
    };
    if snippet.is_empty() {
        return None;
    }
    Some(snippet.chars().take(SNIPPET_MAX_CHARS).collect())
}
