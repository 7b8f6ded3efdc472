use crate::client::SiteClient;
use crate::metadata::{extract_properties, extract_summary, extract_tags, extract_title};
use crate::output::{allocate, save_timestamp, write_properties};
use crate::tracks::{extract_tracks, Track};
use easy_error::{err_msg, Error, ResultExt};
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const PROPERTIES_FILE: &str = "properties.json";
/// Site-wide intro clip present in every book's track list.
const WELCOME_TRACK: &str = "welcome";

/// What was downloaded for each track, saved alongside the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackProperties {
    pub track_number: u32,
    pub track_name: String,
    pub track_duration: String,
}

impl From<&Track> for TrackProperties {
    fn from(track: &Track) -> Self {
        Self {
            track_number: track.track,
            track_name: track.name.clone(),
            track_duration: track.duration.clone(),
        }
    }
}

pub struct AudioBook {
    pub title: String,
    pub tags: Vec<String>,
    pub tracks: Vec<Track>,
    /// Folder the audio and properties are written to.
    pub location: PathBuf,
    /// Structured data of the book page, saved as is.
    pub properties: Value,
    pub track_properties: Vec<TrackProperties>,
    pub summary: String,
}

impl AudioBook {
    /// Writes `properties.json` into the book's folder: the page's structured data
    /// with the tags, downloaded tracks, save time and summary added.
    pub fn save_properties(&self) -> Result<PathBuf, Error> {
        let mut properties = match self.properties.clone() {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("properties".to_string(), other);
                map
            }
        };
        properties.insert("tags".to_string(), Value::from(self.tags.clone()));
        properties.insert(
            "track_properties".to_string(),
            serde_json::to_value(&self.track_properties).context("Could not serialize track properties")?,
        );
        properties.insert("save_timestamp".to_string(), Value::from(save_timestamp()));
        properties.insert("summary".to_string(), Value::from(self.summary.clone()));

        write_properties(&self.location, PROPERTIES_FILE, &Value::Object(properties))
    }
}

/// Reads everything needed from a book page and allocates the book's folder under `output_root`.
pub fn get_audiobook(doc: &Html, output_root: &Path) -> Result<AudioBook, Error> {
    let properties = extract_properties(doc)?;
    let title = extract_title(&properties);
    println!("Book Title: {title}");

    let tags = extract_tags(doc)?;
    let summary = extract_summary(doc);
    let tracks = extract_tracks(doc).context(format!("Could not read the track list of '{title}'"))?;
    tracing::info!(tracks = tracks.len(), tags = tags.len(), "parsed book page");

    let location = allocate(output_root, &title)?;

    Ok(AudioBook {
        title,
        tags,
        tracks,
        location,
        properties,
        track_properties: Vec::new(),
        summary,
    })
}

/// Downloads every track except the welcome clip into the book's folder, in list order.
pub fn download_audiobook(client: &SiteClient, book: &mut AudioBook) -> Result<(), Error> {
    let mut track_properties = Vec::new();
    let total = book.tracks.len();

    for (index, track) in book.tracks.iter().enumerate() {
        if track.name == WELCOME_TRACK {
            tracing::debug!(track = track.track, "skipping welcome track");
            continue;
        }
        println!("Downloading: {} ({}/{total})", book.title, index + 1);

        let fragment = track.chapter_link_dropbox.replace('\\', "");
        let url = client
            .cdn_base()
            .join(&fragment)
            .context(format!("Could not resolve url for track '{}'", track.name))?;
        let file_name = file_name_of(&fragment)?;

        track_properties.push(TrackProperties::from(track));
        client.download_to(&url, &book.location.join(file_name), &track.name)?;
    }

    println!("\nDownload Complete!\n");
    book.track_properties = track_properties;
    Ok(())
}

/// Last path segment of a track's link, which names the local file.
fn file_name_of(link: &str) -> Result<&str, Error> {
    link.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| err_msg(format!("Track link '{link}' does not name a file")))
}

#[cfg(test)]
fn book_page(script: &str) -> String {
    format!(
        r#"<!doctype html><html><head><title>Oathbringer Audiobook - Tokybook</title>
<script type="application/ld+json">{{"@context": "https://schema.org", "@graph": [{{"@type": "Article", "headline": "Oathbringer"}}, {{"@type": "BreadcrumbList", "itemListElement": [{{"@type": "ListItem", "position": 1, "item": {{"name": "Home"}}}}, {{"@type": "ListItem", "position": 2, "item": {{"name": "Oathbringer &#8211; Audiobook"}}}}]}}]}}</script>
</head><body>
<p>Advert</p><p>Skip Ads</p><p>Dalinar remembers.</p><p>Audiobooks for you!</p>
<span class="tags-links">Tags: Brandon Sanderson, Stormlight</span>
<script>{script}</script>
</body></html>"#
    )
}

#[test]
fn test_file_name_of() {
    assert_eq!("01.mp3", file_name_of("Some Book/01.mp3").unwrap());
    assert_eq!("01.mp3", file_name_of("/a/b/01.mp3?dl=1").unwrap());
    assert!(file_name_of("Some Book/").is_err());
}

#[test]
fn test_download_skips_welcome_and_saves_properties() {
    use crate::output::load_properties;
    use crate::test_server::StubSite;

    let site = StubSite::start(vec![
        ("/audio/welcome.mp3", 200, b"welcome".to_vec()),
        ("/audio/Oathbringer/01.mp3", 200, vec![1u8; 9000]),
    ]);
    let client = site.client();
    let script = r#"var tracks = [{"track": 1, "name": "welcome", "duration": "5", "chapter_link_dropbox": "welcome.mp3"},\n{"track": 2, "name": "ch1", "duration": "1:00", "chapter_link_dropbox": "Oathbringer\/01.mp3"}];"#;
    let doc = Html::parse_document(&book_page(script));

    let root = tempfile::tempdir().unwrap();
    let mut book = get_audiobook(&doc, root.path()).unwrap();
    assert_eq!("Oathbringer – Audiobook", book.title);
    assert_eq!(root.path().join("Oathbringer – Audiobook"), book.location);
    assert_eq!("Dalinar remembers.\n", book.summary);
    assert_eq!(2, book.tracks.len());

    download_audiobook(&client, &mut book).unwrap();

    let files: Vec<_> = std::fs::read_dir(&book.location).unwrap().map(|entry| entry.unwrap().file_name()).collect();
    assert_eq!(vec![std::ffi::OsString::from("01.mp3")], files);
    assert_eq!(vec!["/audio/Oathbringer/01.mp3".to_string()], site.requests());
    assert_eq!(
        vec![TrackProperties {
            track_number: 2,
            track_name: "ch1".to_string(),
            track_duration: "1:00".to_string(),
        }],
        book.track_properties
    );

    let saved = load_properties(&book.save_properties().unwrap()).unwrap();
    assert_eq!(serde_json::json!(["Brandon Sanderson", "Stormlight"]), saved["tags"]);
    let track_properties: Vec<TrackProperties> = serde_json::from_value(saved["track_properties"].clone()).unwrap();
    assert_eq!(book.track_properties, track_properties);
    assert_eq!("Dalinar remembers.\n", saved["summary"]);
    assert_eq!("Article", saved["@graph"][0]["@type"]);
    assert!(saved["save_timestamp"].is_string());
}

#[test]
fn test_failed_track_aborts_download() {
    use crate::test_server::StubSite;

    let site = StubSite::start(vec![("/audio/b/02.mp3", 200, b"never reached".to_vec())]);
    let client = site.client();
    let script = r#"tracks = [{"track": 1, "name": "01", "duration": "5", "chapter_link_dropbox": "b/01.mp3"}, {"track": 2, "name": "02", "duration": "5", "chapter_link_dropbox": "b/02.mp3"}]"#;
    let root = tempfile::tempdir().unwrap();
    let mut book = get_audiobook(&Html::parse_document(&book_page(script)), root.path()).unwrap();

    assert!(download_audiobook(&client, &mut book).is_err());
    assert_eq!(vec!["/audio/b/01.mp3".to_string()], site.requests());
    assert!(book.track_properties.is_empty());
}

#[test]
fn test_broken_page_allocates_nothing() {
    let root = tempfile::tempdir().unwrap();
    let doc = Html::parse_document(&book_page("var nothing = 1;"));
    assert!(get_audiobook(&doc, root.path()).is_err());
    assert_eq!(0, std::fs::read_dir(root.path()).unwrap().count());
}
