//! Page-content extraction
//!
//! Turns a rendered page into the record the indexer persists: title,
//! summary, body text, meta tags, detected language and document type,
//! keyword counts, and the outbound links that feed the frontier.

use scraper::{Html, Selector as CssSelector};
use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

use crate::browser::Page;
use crate::catalog::{DomainScope, PageInfo};
use crate::error::Result;

/// ISO 639-3 → 639-1 normalization for the statistical detector's output.
const LANG_ALIASES: &[(&str, &str)] = &[
    ("eng", "en"),
    ("fra", "fr"),
    ("deu", "de"),
    ("spa", "es"),
    ("ita", "it"),
    ("por", "pt"),
    ("nld", "nl"),
    ("rus", "ru"),
    ("jpn", "ja"),
    ("cmn", "zh"),
    ("kor", "ko"),
    ("ara", "ar"),
    ("hin", "hi"),
    ("ben", "bn"),
    ("pol", "pl"),
    ("ukr", "uk"),
    ("swe", "sv"),
    ("nob", "no"),
    ("dan", "da"),
    ("fin", "fi"),
    ("tur", "tr"),
    ("ell", "el"),
    ("heb", "he"),
    ("tha", "th"),
    ("vie", "vi"),
    ("ind", "id"),
    ("ces", "cs"),
    ("ron", "ro"),
    ("hun", "hu"),
];

/// URL extension → short document type code.
const DOC_TYPES: &[(&str, &str)] = &[
    (".html", "HTML"),
    (".htm", "HTML"),
    (".xhtml", "HTML"),
    (".pdf", "PDF"),
    (".doc", "DOC"),
    (".docx", "DOC"),
    (".xls", "XLS"),
    (".xlsx", "XLS"),
    (".ppt", "PPT"),
    (".pptx", "PPT"),
    (".txt", "TEXT"),
    (".md", "TEXT"),
    (".xml", "XML"),
    (".json", "JSON"),
    (".csv", "CSV"),
    (".png", "IMAGE"),
    (".jpg", "IMAGE"),
    (".jpeg", "IMAGE"),
    (".gif", "IMAGE"),
    (".svg", "IMAGE"),
    (".mp4", "VIDEO"),
    (".webm", "VIDEO"),
    (".mp3", "AUDIO"),
    (".zip", "ARCHIVE"),
    (".tar", "ARCHIVE"),
    (".gz", "ARCHIVE"),
];

/// Words carrying no indexing signal.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old",
    "see", "two", "way", "who", "did", "its", "let", "put", "say", "she", "too", "use", "that",
    "this", "with", "from", "have", "will", "your", "they", "them", "then", "than", "what",
    "when", "where", "which", "while", "would", "there", "their", "about", "were", "been",
    "into", "more", "other", "some", "such", "only", "over", "also", "just", "most", "very",
];

/// Extract everything the indexer needs from a rendered page.
///
/// The title is driver-reported; language prefers the document's `lang`
/// attribute and falls back to statistical detection over the body text.
pub async fn extract_page_info(page: &dyn Page, html: &str) -> Result<PageInfo> {
    let title = page.title().await.unwrap_or_default();
    let current_url = page.current_url().await.unwrap_or_default();

    let document = Html::parse_document(html);

    let summary_selector = CssSelector::parse("meta[name=\"description\"]").expect("static selector");
    let summary = document
        .select(&summary_selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .unwrap_or_default()
        .to_string();

    let body_selector = CssSelector::parse("body").expect("static selector");
    let body_text = document
        .select(&body_selector)
        .next()
        .map(|body| body.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    let body_text = body_text.split_whitespace().collect::<Vec<_>>().join(" ");

    let meta_tags = extract_meta_tags(&document);
    let detected_lang = detect_language(&document, &body_text);
    let detected_type = infer_document_type(&current_url);
    let keywords = extract_keywords(&title, &summary, &body_text);

    Ok(PageInfo {
        title,
        summary,
        body_text,
        meta_tags,
        detected_lang,
        detected_type,
        keywords,
    })
}

/// All `<meta>` tags carrying a name attribute, name → content.
fn extract_meta_tags(document: &Html) -> HashMap<String, String> {
    let selector = CssSelector::parse("meta[name]").expect("static selector");
    document
        .select(&selector)
        .filter_map(|el| {
            let name = el.value().attr("name")?;
            let content = el.value().attr("content").unwrap_or_default();
            Some((name.to_string(), content.to_string()))
        })
        .collect()
}

/// Prefer the document's own `lang` attribute; fall back to statistical
/// detection over the body text, normalized to a 2-letter code.
fn detect_language(document: &Html, body_text: &str) -> String {
    if let Some(root) = document
        .select(&CssSelector::parse("html").expect("static selector"))
        .next()
    {
        if let Some(lang) = root.value().attr("lang") {
            let lang = lang.trim();
            if !lang.is_empty() {
                return lang.to_lowercase();
            }
        }
    }

    match whatlang::detect(body_text) {
        Some(info) => {
            let code = info.lang().code();
            LANG_ALIASES
                .iter()
                .find(|(from, _)| *from == code)
                .map(|(_, to)| to.to_string())
                .unwrap_or_else(|| code.to_string())
        }
        None => "unknown".to_string(),
    }
}

/// Document type from the URL's extension; `UNKNOWN` when there is none
/// or it is not in the table.
pub fn infer_document_type(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|segment| segment.rfind('.').map(|i| &segment[i..]))
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if extension.is_empty() {
        return "UNKNOWN".to_string();
    }
    DOC_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, kind)| kind.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Lowercased word counts over title, summary, and body; stopwords and
/// short tokens dropped; most frequent first. Every surviving keyword
/// gets a posting, so none may be dropped here.
pub fn extract_keywords(title: &str, summary: &str, body_text: &str) -> Vec<(String, i64)> {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for source in [title, summary, body_text] {
        for word in source.unicode_words() {
            let word = word.to_lowercase();
            if word.chars().count() < 3 || STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            if word.chars().all(|c| c.is_numeric()) {
                continue;
            }
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    let mut keywords: Vec<(String, i64)> = counts.into_iter().collect();
    keywords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    keywords
}

/// Check the string parses as a URL, tolerating a missing scheme.
pub fn is_valid_url(candidate: &str) -> bool {
    if candidate.contains("://") {
        Url::parse(candidate).is_ok()
    } else {
        Url::parse(&format!("http://{candidate}")).is_ok()
    }
}

/// All `<a href>` values that are plausible absolute or relative URLs.
pub fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = CssSelector::parse("a[href]").expect("static selector");
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .filter(|href| href.starts_with('/') || is_valid_url(href))
        .map(str::to_string)
        .collect()
}

/// Resolve a relative URL against the source's scheme and host.
pub fn combine_urls(base_url: &str, relative: &str) -> Option<String> {
    let parsed = Url::parse(base_url).ok()?;
    if relative.starts_with('/') {
        let host = parsed.host_str()?;
        let port = parsed
            .port()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}{}", parsed.scheme(), host, port, relative))
    } else {
        Some(relative.to_string())
    }
}

/// Domain-scope filter: is `link_url` outside what the source's scope
/// allows? Relative URLs are never external; unparseable URLs are kept.
pub fn is_external_link(source_url: &str, link_url: &str, scope: DomainScope) -> bool {
    if scope == DomainScope::Unrestricted {
        return false;
    }

    let link_url = link_url.trim();
    if link_url.starts_with('/') {
        return false;
    }

    let Ok(source) = Url::parse(source_url) else {
        return false;
    };
    let Ok(link) = Url::parse(link_url) else {
        return false;
    };

    if scope == DomainScope::Exact {
        return source.as_str() != link.as_str();
    }

    let source_host: Vec<&str> = source.host_str().unwrap_or_default().split('.').collect();
    let link_host: Vec<&str> = link.host_str().unwrap_or_default().split('.').collect();

    let labels = match scope {
        DomainScope::L3 => 3,
        DomainScope::L2 => 2,
        DomainScope::L1 => 1,
        _ => unreachable!(),
    };
    last_labels(&source_host, labels) != last_labels(&link_host, labels)
}

fn last_labels<'a>(parts: &'a [&'a str], count: usize) -> Vec<&'a str> {
    if parts.len() >= count {
        parts[parts.len() - count..].to_vec()
    } else {
        parts.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html lang="en">
<head>
  <title>Example Domain</title>
  <meta name="description" content="A page for examples.">
  <meta name="keywords" content="example, test">
  <meta name="author" content="IANA">
  <meta charset="utf-8">
</head>
<body>
  <h1>Example heading</h1>
  <p>Illustrative examples of example content.</p>
  <a href="/about">About</a>
  <a href="https://a.test/more">More</a>
  <a href="   ">blank</a>
  <a href="https://other.test/external">External</a>
</body>
</html>"#;

    #[test]
    fn meta_tags_require_a_name_attribute() {
        let document = Html::parse_document(PAGE);
        let tags = extract_meta_tags(&document);
        assert_eq!(tags.get("description").unwrap(), "A page for examples.");
        assert_eq!(tags.get("author").unwrap(), "IANA");
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn language_prefers_document_attribute() {
        let document = Html::parse_document(PAGE);
        assert_eq!(detect_language(&document, "irrelevant"), "en");
    }

    #[test]
    fn language_falls_back_to_statistical_detection() {
        let document = Html::parse_document("<html><body>x</body></html>");
        let english = "The quick brown fox jumps over the lazy dog and keeps \
                       running through the quiet English countryside all day.";
        assert_eq!(detect_language(&document, english), "en");
    }

    #[test]
    fn document_type_from_extension() {
        assert_eq!(infer_document_type("http://a.test/report.pdf"), "PDF");
        assert_eq!(infer_document_type("http://a.test/page.html?x=1"), "HTML");
        assert_eq!(infer_document_type("http://a.test/data.json"), "JSON");
        assert_eq!(infer_document_type("http://a.test/path"), "UNKNOWN");
        assert_eq!(infer_document_type("http://a.test/archive.rar"), "UNKNOWN");
    }

    #[test]
    fn link_extraction_keeps_relative_and_absolute() {
        let links = extract_links(PAGE);
        assert_eq!(
            links,
            vec![
                "/about".to_string(),
                "https://a.test/more".to_string(),
                "https://other.test/external".to_string(),
            ]
        );
    }

    #[test]
    fn keyword_counts_filter_and_order() {
        let keywords = extract_keywords("Example title", "", "example content example pages");
        let example = keywords.iter().find(|(k, _)| k == "example").unwrap();
        assert_eq!(example.1, 3);
        // Most frequent first
        assert_eq!(keywords[0].0, "example");
        // Stopwords and short tokens never appear
        assert!(keywords.iter().all(|(k, _)| k.chars().count() >= 3));
        assert!(!keywords.iter().any(|(k, _)| k == "the"));
    }

    #[test]
    fn every_qualifying_keyword_survives() {
        // Each distinct word must reach the posting table, however many
        // a page has.
        let body: String = (0..250).map(|i| format!("keyword{i:03} ")).collect();
        let keywords = extract_keywords("", "", &body);
        assert_eq!(keywords.len(), 250);
        assert!(keywords.iter().all(|(_, count)| *count == 1));
    }

    #[test]
    fn relative_urls_resolve_against_scheme_and_host() {
        assert_eq!(
            combine_urls("http://a.test/deep/page", "/about").unwrap(),
            "http://a.test/about"
        );
        assert_eq!(
            combine_urls("http://a.test:8080/", "/x").unwrap(),
            "http://a.test:8080/x"
        );
        assert_eq!(
            combine_urls("http://a.test/", "https://b.test/y").unwrap(),
            "https://b.test/y"
        );
    }

    #[test]
    fn exact_scope_only_accepts_the_seed_itself() {
        let seed = "http://a.test/";
        assert!(!is_external_link(seed, "http://a.test/", DomainScope::Exact));
        assert!(is_external_link(seed, "http://a.test/b", DomainScope::Exact));
        assert!(is_external_link(seed, "http://other.test/", DomainScope::Exact));
    }

    #[test]
    fn l2_scope_compares_last_two_labels() {
        let seed = "http://www.a.test/";
        assert!(!is_external_link(seed, "http://blog.a.test/x", DomainScope::L2));
        assert!(!is_external_link(seed, "http://a.test/y", DomainScope::L2));
        assert!(is_external_link(seed, "http://other.test/", DomainScope::L2));
    }

    #[test]
    fn unrestricted_scope_never_filters() {
        let seed = "http://a.test/";
        assert!(!is_external_link(seed, "http://anything.example/", DomainScope::Unrestricted));
    }

    #[test]
    fn relative_links_are_never_external() {
        assert!(!is_external_link("http://a.test/", "/local", DomainScope::Exact));
    }

    #[test]
    fn l3_scope_compares_last_three_labels() {
        let seed = "http://x.team.a.test/";
        assert!(!is_external_link(seed, "http://y.team.a.test/", DomainScope::L3));
        assert!(is_external_link(seed, "http://y.other.a.test/", DomainScope::L3));
    }
}
