use crate::client::SiteClient;
use crate::metadata::{extract_properties, extract_title};
use crate::output::{allocate, save_timestamp, write_properties};
use easy_error::{err_msg, Error, ResultExt};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const SERIES_FILE: &str = "series.json";
/// Listings longer than this are assumed to never end.
pub const MAX_SERIES_PAGES: u32 = 1_000;
const NOT_FOUND_TITLE: &str = "Page not found";

lazy_static! {
    static ref TITLE_SELECTOR: Selector = Selector::parse("title").unwrap();
    static ref BOOKMARK_SELECTOR: Selector = Selector::parse(r#"a[rel~="bookmark"][href]"#).unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub link: String,
    pub title: String,
}

pub struct Series {
    pub title: String,
    pub books: Vec<SeriesEntry>,
    pub location: PathBuf,
    pub properties: Value,
}

impl Series {
    /// Writes `series.json` into the series folder: the first page's structured data
    /// with the title, book list, count and save time added.
    pub fn save_properties(&self) -> Result<PathBuf, Error> {
        let mut properties = match self.properties.clone() {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("properties".to_string(), other);
                map
            }
        };
        properties.insert("title".to_string(), Value::from(self.title.clone()));
        properties.insert(
            "books".to_string(),
            serde_json::to_value(&self.books).context("Could not serialize book list")?,
        );
        properties.insert("count".to_string(), Value::from(self.books.len()));
        properties.insert("save_timestamp".to_string(), Value::from(save_timestamp()));

        write_properties(&self.location, SERIES_FILE, &Value::Object(properties))
    }
}

#[derive(Clone, Copy)]
enum WalkState {
    Paging(u32),
    Done,
}

/// Collects the books of a series listing by visiting `<series_url>/page/1`, `/page/2`, ...
/// until the site answers with its "Page not found" page, then allocates the series folder.
pub fn walk(client: &SiteClient, series_url: &str, output_root: &Path) -> Result<Series, Error> {
    let base = series_url.trim_end_matches('/');
    let mut books = Vec::new();
    let mut first_page: Option<(String, Value)> = None;
    let mut state = WalkState::Paging(1);

    while let WalkState::Paging(page) = state {
        if page > MAX_SERIES_PAGES {
            return Err(err_msg(format!(
                "Series {series_url} still had books after {MAX_SERIES_PAGES} pages"
            )));
        }

        let doc = client.fetch_page(&format!("{base}/page/{page}"))?;
        if first_page.is_none() {
            let properties = extract_properties(&doc).context("Could not read series properties")?;
            first_page = Some((extract_title(&properties), properties));
        }

        let page_title = doc
            .select(&TITLE_SELECTOR)
            .next()
            .ok_or_else(|| err_msg(format!("no element named 'title' on page {page} of {series_url}")))?
            .text()
            .collect::<String>();

        state = if page_title.contains(NOT_FOUND_TITLE) {
            tracing::info!(pages = page - 1, books = books.len(), "reached end of series");
            WalkState::Done
        } else {
            let found: Vec<SeriesEntry> = doc
                .select(&BOOKMARK_SELECTOR)
                .filter_map(|link| {
                    Some(SeriesEntry {
                        link: link.value().attr("href")?.to_string(),
                        title: link.text().collect::<String>().trim().to_string(),
                    })
                })
                .collect();
            tracing::info!(page, books = found.len(), "read series page");
            books.extend(found);
            WalkState::Paging(page + 1)
        };
    }

    let (title, properties) = first_page.ok_or_else(|| err_msg("series walk visited no pages"))?;
    println!("Series Title: {title}");
    let location = allocate(output_root, &title)?;

    Ok(Series {
        title,
        books,
        location,
        properties,
    })
}

#[cfg(test)]
fn listing_page(title: &str, links: &[(&str, &str)]) -> Vec<u8> {
    let articles: String = links
        .iter()
        .map(|(href, text)| {
            format!(r#"<article><h2 class="entry-title"><a href="{href}" rel="bookmark"> {text} </a></h2><a href="{href}">Read more</a></article>"#)
        })
        .collect();
    format!(
        r#"<html><head><title>{title}</title>
<script type="application/ld+json">{{"@graph": [{{"@type": "CollectionPage"}}, {{"@type": "BreadcrumbList", "itemListElement": [{{"item": {{"name": "Home"}}}}, {{"item": {{"name": "Stormlight &amp; Archive"}}}}]}}]}}</script>
</head><body>{articles}</body></html>"#
    )
    .into_bytes()
}

#[test]
fn test_walk_until_not_found() {
    use crate::output::load_properties;
    use crate::test_server::StubSite;

    let site = StubSite::start(vec![
        (
            "/tag/stormlight/page/1",
            200,
            listing_page("Stormlight - Tokybook", &[("https://tokybook.com/way-of-kings/", "The Way of Kings"), ("https://tokybook.com/words-of-radiance/", "Words of Radiance")]),
        ),
        (
            "/tag/stormlight/page/2",
            200,
            listing_page("Stormlight - Page 2 - Tokybook", &[("https://tokybook.com/oathbringer/", "Oathbringer")]),
        ),
        ("/tag/stormlight/page/3", 404, listing_page("Page not found - Tokybook", &[("https://tokybook.com/popular/", "Popular")])),
        ("/tag/stormlight/page/4", 200, listing_page("Stormlight - Page 4 - Tokybook", &[("https://tokybook.com/never/", "Never")])),
    ]);
    let client = site.client();
    let root = tempfile::tempdir().unwrap();

    let series = walk(&client, &site.url("/tag/stormlight/"), root.path()).unwrap();
    assert_eq!("Stormlight & Archive", series.title);
    assert_eq!(root.path().join("Stormlight & Archive"), series.location);
    let titles: Vec<&str> = series.books.iter().map(|book| book.title.as_str()).collect();
    assert_eq!(vec!["The Way of Kings", "Words of Radiance", "Oathbringer"], titles);
    assert_eq!("https://tokybook.com/way-of-kings/", series.books[0].link);
    assert_eq!(
        vec!["/tag/stormlight/page/1", "/tag/stormlight/page/2", "/tag/stormlight/page/3"],
        site.requests()
    );

    let saved = load_properties(&series.save_properties().unwrap()).unwrap();
    assert_eq!(3, saved["count"]);
    assert_eq!("Stormlight & Archive", saved["title"]);
    assert_eq!("Oathbringer", saved["books"][2]["title"]);
    assert_eq!("CollectionPage", saved["@graph"][0]["@type"]);
}

#[test]
fn test_walk_empty_series() {
    use crate::test_server::StubSite;

    let site = StubSite::start(vec![("/tag/nothing/page/1", 404, listing_page("Page not found - Tokybook", &[]))]);
    let root = tempfile::tempdir().unwrap();

    let series = walk(&site.client(), &site.url("/tag/nothing"), root.path()).unwrap();
    assert!(series.books.is_empty());
    assert!(series.location.is_dir());
}

#[test]
fn test_walk_requires_page_title() {
    use crate::test_server::StubSite;

    let site = StubSite::start(vec![(
        "/tag/odd/page/1",
        200,
        br#"<html><head><script type="application/ld+json">{"@graph": []}</script></head></html>"#.to_vec(),
    )]);
    let root = tempfile::tempdir().unwrap();
    assert!(walk(&site.client(), &site.url("/tag/odd"), root.path()).is_err());
}
