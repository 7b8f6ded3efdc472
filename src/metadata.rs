use easy_error::{err_msg, Error, ResultExt};
use scraper::{Html, Selector};
use serde_json::Value;

/// Paragraphs before this one are adverts.
const SUMMARY_START_MARKER: &str = "Skip Ads";
/// Paragraphs from this one on are recommendations for other books.
const SUMMARY_END_MARKER: &str = "Audiobooks for you!";
const TAGS_LABEL: &str = "Tags:";

lazy_static! {
    static ref LD_JSON_SELECTOR: Selector = Selector::parse(r#"script[type="application/ld+json"]"#).unwrap();
    static ref TAGS_SELECTOR: Selector = Selector::parse("span.tags-links").unwrap();
    static ref PARAGRAPH_SELECTOR: Selector = Selector::parse("p").unwrap();
}

/// Parses the page's ld+json structured data block.
pub fn extract_properties(doc: &Html) -> Result<Value, Error> {
    let block = doc
        .select(&LD_JSON_SELECTOR)
        .next()
        .ok_or_else(|| err_msg("no structured data (ld+json) block on page"))?
        .text()
        .collect::<String>();

    serde_json::from_str(&block).context("Could not parse structured data block")
}

/// Returns the page title recorded in the breadcrumb list of the structured data.
///
/// The breadcrumbs are `[Home, <title>]`; names are HTML escaped. Pages without a
/// breadcrumb list give an empty title.
pub fn extract_title(properties: &Value) -> String {
    let graph = match properties.get("@graph").and_then(Value::as_array) {
        Some(graph) => graph,
        None => return String::new(),
    };

    let breadcrumbs = match graph.iter().filter(|record| record["@type"] == "BreadcrumbList").last() {
        Some(breadcrumbs) => breadcrumbs,
        None => return String::new(),
    };

    let names: Vec<&str> = breadcrumbs["itemListElement"]
        .as_array()
        .map(|items| items.iter().map(|item| item["item"]["name"].as_str().unwrap_or("")).collect())
        .unwrap_or_default();

    match names.get(1) {
        Some(name) => html_escape::decode_html_entities(name).into_owned(),
        None => {
            tracing::warn!(?names, "breadcrumb list has no title entry");
            String::new()
        }
    }
}

pub fn extract_tags(doc: &Html) -> Result<Vec<String>, Error> {
    let label = doc
        .select(&TAGS_SELECTOR)
        .next()
        .ok_or_else(|| err_msg("no tags element (span.tags-links) on page"))?
        .text()
        .collect::<String>();
    let label = label.trim();
    let tags = label.strip_prefix(TAGS_LABEL).unwrap_or(label).trim();

    Ok(tags.split(", ").map(str::trim).filter(|tag| !tag.is_empty()).map(String::from).collect())
}

/// Collects the book description that sits between the advert block and the recommendations.
pub fn extract_summary(doc: &Html) -> String {
    let mut summary = String::new();
    let mut in_summary = false;

    for paragraph in doc.select(&PARAGRAPH_SELECTOR) {
        let text = paragraph.text().collect::<String>();
        let text = text.trim();
        if text.contains(SUMMARY_START_MARKER) {
            in_summary = true;
            continue;
        }
        if text.contains(SUMMARY_END_MARKER) {
            break;
        }
        if in_summary && !text.is_empty() {
            summary.push_str(text);
            summary.push('\n');
        }
    }

    summary
}

#[cfg(test)]
fn breadcrumb_page(names: &[&str]) -> String {
    let items: Vec<String> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(r#"{{"@type": "ListItem", "position": {}, "item": {{"@id": "https://tokybook.com/{i}", "name": "{name}"}}}}"#, i + 1)
        })
        .collect();
    format!(
        r#"<html><head><script type="application/ld+json">{{"@context": "https://schema.org", "@graph": [{{"@type": "WebPage", "name": "ignored"}}, {{"@type": "BreadcrumbList", "@id": "https://tokybook.com/#breadcrumb", "itemListElement": [{}]}}]}}</script></head><body></body></html>"#,
        items.join(", ")
    )
}

#[test]
fn test_extract_title() {
    let doc = Html::parse_document(&breadcrumb_page(&["Home", "My &amp; Title"]));
    let properties = extract_properties(&doc).unwrap();
    assert_eq!("My & Title", extract_title(&properties));
    assert_eq!("WebPage", properties["@graph"][0]["@type"]);
}

#[test]
fn test_extract_title_without_breadcrumbs() {
    let properties: Value = serde_json::from_str(r#"{"@graph": [{"@type": "WebPage"}]}"#).unwrap();
    assert_eq!("", extract_title(&properties));
    assert_eq!("", extract_title(&serde_json::json!({"name": "no graph"})));

    let doc = Html::parse_document(&breadcrumb_page(&["Home"]));
    assert_eq!("", extract_title(&extract_properties(&doc).unwrap()));
}

#[test]
fn test_extract_title_keeps_position_of_nameless_items() {
    let properties = serde_json::json!({"@graph": [{
        "@type": "BreadcrumbList",
        "itemListElement": [
            {"@type": "ListItem", "position": 1, "item": {"@id": "https://tokybook.com/"}},
            {"@type": "ListItem", "position": 2, "item": {"name": "Mistborn"}},
            {"@type": "ListItem", "position": 3, "item": {"name": "Chapter list"}}
        ]
    }]});
    assert_eq!("Mistborn", extract_title(&properties));
}

#[test]
fn test_extract_properties_missing() {
    let doc = Html::parse_document("<html><head><title>x</title></head></html>");
    assert!(extract_properties(&doc).is_err());
}

#[test]
fn test_extract_tags() {
    let doc = Html::parse_document(
        r#"<div><span class="cat-links">Posted in Fantasy</span>
        <span class="tags-links">Tags: <a href="/tag/a">Brandon Sanderson</a>, <a href="/tag/b">Michael Kramer</a>, <a href="/tag/c">Stormlight</a></span>
        <span class="tags-links">Tags: ignored</span></div>"#,
    );
    assert_eq!(
        vec!["Brandon Sanderson", "Michael Kramer", "Stormlight"],
        extract_tags(&doc).unwrap()
    );

    let doc = Html::parse_document("<div><span class='cat-links'>Posted in Fantasy</span></div>");
    assert!(extract_tags(&doc).is_err());
}

#[test]
fn test_extract_summary() {
    let doc = Html::parse_document(
        "<div><p>ad</p><p>Skip Ads</p><p> Hello </p><p></p><p>world</p><p>Audiobooks for you!</p><p>ignored</p></div>",
    );
    assert_eq!("Hello\nworld\n", extract_summary(&doc));

    let doc = Html::parse_document("<div><p>ad</p><p>Hello</p></div>");
    assert_eq!("", extract_summary(&doc));
}
