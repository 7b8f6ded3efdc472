use regex::Regex;
use scraper::{Html, Selector};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use thiserror::Error;

/// Start of the track list assignment in the page's inline scripts.
const TRACKS_MARKER: &str = "tracks = [";

lazy_static! {
    static ref SCRIPT_SELECTOR: Selector = Selector::parse("script").unwrap();
    // The list is a JavaScript literal; JSON does not allow a comma before a closing bracket.
    static ref TRAILING_COMMA_REGEX: Regex = Regex::new(r",\s*([\]}])").unwrap();
}

/// One audio chapter of a book, as listed by the book page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Track {
    #[serde(deserialize_with = "ordinal")]
    pub track: u32,
    pub name: String,
    #[serde(deserialize_with = "loose_text")]
    pub duration: String,
    /// Path of the audio file relative to the CDN base, possibly still escaped.
    pub chapter_link_dropbox: String,
}

#[derive(Debug, Error)]
pub enum TrackListError {
    /// No inline script assigns the track list.
    #[error("no script on the page contains '{}'", TRACKS_MARKER)]
    MissingMarker,
    /// The list literal has no closing bracket.
    #[error("the track list is missing its closing ']'")]
    Unterminated,
    /// The list literal is not a list of track records.
    #[error("the track list could not be parsed: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Reads the track list from the last inline script that assigns one.
pub fn extract_tracks(doc: &Html) -> Result<Vec<Track>, TrackListError> {
    let script = doc
        .select(&SCRIPT_SELECTOR)
        .map(|script| script.text().collect::<String>())
        .filter(|text| text.contains(TRACKS_MARKER))
        .last()
        .ok_or(TrackListError::MissingMarker)?;

    parse_track_script(&script)
}

/// Slices the `tracks = [...]` literal out of a script's source and parses it.
///
/// The literal ends at the first `]` after the opening bracket, so track records
/// must not contain one.
pub fn parse_track_script(script: &str) -> Result<Vec<Track>, TrackListError> {
    let start = script.find(TRACKS_MARKER).ok_or(TrackListError::MissingMarker)? + TRACKS_MARKER.len() - 1;
    let end = script[start..].find(']').ok_or(TrackListError::Unterminated)? + start + 1;

    let literal = script[start..end].replace("\\n", "").replace('\\', "");
    let literal = TRAILING_COMMA_REGEX.replace_all(&literal, "$1");

    serde_json::from_str(&literal).map_err(TrackListError::Malformed)
}

/// Scalar that pages emit either quoted or bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Number(serde_json::Number),
    Text(String),
}

fn ordinal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match Loose::deserialize(deserializer)? {
        Loose::Number(number) => number
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| de::Error::custom(format!("invalid track number {number}"))),
        Loose::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid track number '{text}'"))),
    }
}

fn loose_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Number(number) => number.to_string(),
        Loose::Text(text) => text,
    })
}

#[cfg(test)]
const SAMPLE_SCRIPT: &str = r#"
    var trackIndex = 0;
    tracks = [\n{"track": 1, "name": "welcome", "chapter_link_dropbox": "\/welcome-you-to-tokybook.mp3", "duration": "8", "chapter_id": "0", "post_id": "0"},\n{"track": 2, "name": "01", "chapter_link_dropbox": "\/Some Book\/01.mp3", "duration": "1:02:03", "chapter_id": "1", "post_id": "12"},\n{"track": "3", "name": "02", "chapter_link_dropbox": "\/Some Book\/02.mp3", "duration": 95, "chapter_id": "2", "post_id": "12"},\n];
    jQuery(function($) { $('#player').init(tracks); });
"#;

#[test]
fn test_parse_track_script() {
    let tracks = parse_track_script(SAMPLE_SCRIPT).unwrap();
    assert_eq!(3, tracks.len());
    assert_eq!(
        Track {
            track: 2,
            name: "01".to_string(),
            duration: "1:02:03".to_string(),
            chapter_link_dropbox: "/Some Book/01.mp3".to_string(),
        },
        tracks[1]
    );
    assert_eq!(3, tracks[2].track);
    assert_eq!("95", tracks[2].duration);
    assert_eq!("welcome", tracks[0].name);
}

#[test]
fn test_extract_tracks_uses_last_matching_script() {
    let page = format!(
        r#"<html><head>
        <script>var tracks = [{{"track": 1, "name": "stale", "duration": "1", "chapter_link_dropbox": "old.mp3"}}];</script>
        </head><body>
        <script>console.log("unrelated");</script>
        <script>{SAMPLE_SCRIPT}</script>
        <script>var other = 1;</script>
        </body></html>"#
    );
    let tracks = extract_tracks(&Html::parse_document(&page)).unwrap();
    let names: Vec<&str> = tracks.iter().map(|track| track.name.as_str()).collect();
    assert_eq!(vec!["welcome", "01", "02"], names);
}

#[test]
fn test_track_list_errors() {
    let doc = Html::parse_document("<html><body><script>var nothing = [];</script></body></html>");
    assert!(matches!(extract_tracks(&doc), Err(TrackListError::MissingMarker)));

    assert!(matches!(
        parse_track_script(r#"tracks = [{"track": 1, "name": "a""#),
        Err(TrackListError::Unterminated)
    ));

    let err = parse_track_script(r#"tracks = [{"track": 1, "name": "a"}]"#).unwrap_err();
    assert!(matches!(err, TrackListError::Malformed(_)));
    assert!(err.to_string().contains("could not be parsed"));
    assert!(std::error::Error::source(&err).is_some());
    assert!(std::error::Error::source(&TrackListError::Unterminated).is_none());
    assert!(TrackListError::MissingMarker.to_string().contains("tracks = ["));

    assert!(matches!(
        parse_track_script(r#"tracks = [{"track": "one", "name": "a", "duration": "1", "chapter_link_dropbox": "a.mp3"}]"#),
        Err(TrackListError::Malformed(_))
    ));
}
