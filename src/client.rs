use easy_error::{err_msg, Error, ResultExt};
use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use scraper::Html;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// The only site pages are accepted from.
pub const SITE_DOMAIN: &str = "tokybook.com";
/// Directory the audio files are served from.
pub const CDN_BASE: &str = "https://files02.tokybook.com/audio/";

const CHUNK_SIZE: usize = 8192;

/// Wrapper around `reqwest::blocking::Client` that only talks to one site
/// and knows where that site keeps its audio.
pub struct SiteClient {
    client: Client,
    domain: String,
    cdn_base: Url,
}

impl SiteClient {
    pub fn tokybook() -> Result<Self, Error> {
        let cdn_base = Url::parse(CDN_BASE).context(format!("Could not create url from '{CDN_BASE}'"))?;
        Self::new(SITE_DOMAIN, cdn_base)
    }

    pub fn new(domain: &str, cdn_base: Url) -> Result<Self, Error> {
        let client = Client::builder()
            .user_agent(concat!("tokybook-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Could not build HTTP client")?;

        Ok(Self {
            client,
            domain: domain.to_string(),
            cdn_base,
        })
    }

    pub fn cdn_base(&self) -> &Url {
        &self.cdn_base
    }

    /// Fails unless the network location of `url` (host and explicit port) is the site's domain.
    pub fn check_domain(&self, url: &Url) -> Result<(), Error> {
        if network_location(url) == self.domain {
            Ok(())
        } else {
            Err(err_msg(format!("Please enter a tokybook URL! '{url}' is not on {}", self.domain)))
        }
    }

    fn send(&self, url: &Url) -> Result<Response, Error> {
        self.client
            .get(url.clone())
            .send()
            .context(format!("Could not retrieve page {url}"))
    }

    /// Fetches a page of the site and parses it.
    ///
    /// A 404 still yields its page, since the site's "Page not found" page is how
    /// listings signal their end. Any other error status fails.
    pub fn fetch_page(&self, url: &str) -> Result<Html, Error> {
        let url = Url::parse(url).context(format!("Please enter a tokybook URL! Could not parse '{url}'"))?;
        self.check_domain(&url)?;

        tracing::debug!(%url, "fetching page");
        let response = match self.send(&url)? {
            response if response.status() == StatusCode::NOT_FOUND => {
                tracing::debug!(%url, "page not found");
                response
            }
            response => response.error_for_status().context(format!("Server refused {url}"))?,
        };
        // Pages are UTF-8; decode lossily rather than trusting the Content-Type charset.
        let contents = response.bytes().context("Cannot extract text.")?;
        tracing::debug!(%url, bytes = contents.len(), "page received");

        Ok(Html::parse_document(&String::from_utf8_lossy(&contents)))
    }

    /// Streams the body of `url` into a new file at `path`, printing progress labelled with `label`.
    /// Returns the number of bytes written.
    pub fn download_to(&self, url: &Url, path: &Path, label: &str) -> Result<u64, Error> {
        let mut response = self
            .send(url)?
            .error_for_status()
            .context(format!("Server refused {url}"))?;
        let mut progress = Progress::new(label, response.content_length().unwrap_or(0));
        let mut file = File::create(path).context(format!("Could not create {path:?}"))?;

        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let read = response.read(&mut buf).context(format!("Could not read data from {url}"))?;
            if read == 0 {
                break;
            }
            file.write_all(&buf[..read]).context(format!("Could not write to {path:?}"))?;
            progress.advance(read as u64)?;
        }
        progress.finish()?;

        tracing::debug!(%url, bytes = progress.done, "download finished");
        Ok(progress.done)
    }
}

/// Equivalent of a URL's netloc: the host, plus the port when one is given explicitly.
fn network_location(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Single-line console progress for one transfer.
struct Progress<'a> {
    label: &'a str,
    total: u64,
    done: u64,
}

impl<'a> Progress<'a> {
    fn new(label: &'a str, total: u64) -> Self {
        Self { label, total, done: 0 }
    }

    fn advance(&mut self, bytes: u64) -> Result<(), Error> {
        self.done += bytes;
        self.draw()
    }

    fn draw(&self) -> Result<(), Error> {
        let mut stdout = io::stdout();
        let written = if self.total > 0 {
            let percent = self.done * 100 / self.total;
            write!(stdout, "\rDownloading {}: {}/{} bytes ({percent}%)", self.label, self.done, self.total)
        } else {
            write!(stdout, "\rDownloading {}: {} bytes", self.label, self.done)
        };
        written.context("Could not write progress")?;
        stdout.flush().context("Could not flush stdout")
    }

    fn finish(&self) -> Result<(), Error> {
        self.draw()?;
        println!();
        Ok(())
    }
}

#[test]
fn test_network_location() {
    let url = Url::parse("https://tokybook.com/some-book/").unwrap();
    assert_eq!("tokybook.com", network_location(&url));
    let url = Url::parse("http://127.0.0.1:8080/tag/series").unwrap();
    assert_eq!("127.0.0.1:8080", network_location(&url));
}

#[test]
fn test_rejects_other_domains_before_fetching() {
    let client = SiteClient::tokybook().unwrap();
    let err = client.fetch_page("https://example.com/some-book/").unwrap_err();
    assert!(err.to_string().contains("Please enter a tokybook URL!"));

    // Subdomains are a different network location.
    let err = client.fetch_page("https://www.tokybook.com/some-book/").unwrap_err();
    assert!(err.to_string().contains("Please enter a tokybook URL!"));

    assert!(client.fetch_page("not a url").is_err());
}

#[test]
fn test_fetch_and_download() {
    use crate::test_server::StubSite;

    let site = StubSite::start(vec![
        ("/book/", 200, b"<html><head><title>A book</title></head><body><p>Hi</p></body></html>".to_vec()),
        ("/audio/a/ch1.mp3", 200, vec![7u8; 20_000]),
        ("/broken/", 500, b"oops".to_vec()),
    ]);
    let client = site.client();

    let doc = client.fetch_page(&site.url("/book/")).unwrap();
    let title = doc.select(&scraper::Selector::parse("title").unwrap()).next().unwrap();
    assert_eq!("A book", title.text().collect::<String>());

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("ch1.mp3");
    let written = client.download_to(&client.cdn_base().join("a/ch1.mp3").unwrap(), &target, "ch1").unwrap();
    assert_eq!(20_000, written);
    assert_eq!(vec![7u8; 20_000], std::fs::read(&target).unwrap());

    assert!(client.fetch_page(&site.url("/missing/")).is_ok());
    assert!(client.fetch_page(&site.url("/broken/")).is_err());
    let missing_audio = client.cdn_base().join("a/missing.mp3").unwrap();
    assert!(client.download_to(&missing_audio, &dir.path().join("missing.mp3"), "missing").is_err());
}

#[test]
fn test_download_without_content_length() {
    use crate::test_server::StubSite;

    let body: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
    let site = StubSite::start_chunked(vec![("/audio/c/ch2.mp3", 200, body.clone())]);
    let client = site.client();

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("ch2.mp3");
    let written = client.download_to(&client.cdn_base().join("c/ch2.mp3").unwrap(), &target, "ch2").unwrap();
    assert_eq!(30_000, written);
    assert_eq!(body, std::fs::read(&target).unwrap());
}

#[test]
fn test_progress_counts_without_total() {
    let mut progress = Progress::new("ch2", 0);
    progress.advance(8192).unwrap();
    progress.advance(100).unwrap();
    progress.finish().unwrap();
    assert_eq!(0, progress.total);
    assert_eq!(8292, progress.done);
}
