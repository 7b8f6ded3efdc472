#[macro_use]
extern crate lazy_static;

mod book;
mod client;
mod logging;
mod metadata;
mod output;
mod series;
#[cfg(test)]
mod test_server;
mod tracks;

use book::{download_audiobook, get_audiobook};
use client::SiteClient;
use easy_error::{err_msg, Error, ResultExt};
use reqwest::Url;
use std::error::Error as _;
use std::io;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

/// Downloads all the tracks of an audiobook, or of every book in a series, from tokybook.com.
#[derive(StructOpt)]
struct Args {
    /// URL of the book
    #[structopt(short, long, conflicts_with = "series-url")]
    book_url: Option<String>,
    /// Location where the folder for the book is created. Defaults to the current directory
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,
    /// URL of the series (a tag page) of books
    #[structopt(short, long)]
    series_url: Option<String>,
    /// File with a list of links. Not implemented yet
    #[structopt(short, long, parse(from_os_str))]
    file: Option<PathBuf>,
}

fn main() {
    if std::env::args_os().len() == 1 {
        if let Err(err) = print_help() {
            eprintln!("Error: {err}");
        }
        process::exit(1);
    }

    if let Err(err) = run(Args::from_args()) {
        eprintln!("Error: {err}");
        let mut cause = err.source();
        while let Some(inner) = cause {
            eprintln!("  caused by: {inner}");
            cause = inner.source();
        }
        process::exit(1);
    }
}

fn print_help() -> Result<(), Error> {
    Args::clap().write_help(&mut io::stderr()).context("Could not print help")?;
    eprintln!();
    Ok(())
}

/// First segment of a URL's path; `tag` for series listings.
fn first_path_segment(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|url| url.path_segments().and_then(|mut segments| segments.next().map(String::from)))
        .unwrap_or_default()
}

fn run(args: Args) -> Result<(), Error> {
    logging::init()?;

    let book_url = args.book_url.filter(|url| !url.is_empty());
    let series_url = args.series_url.filter(|url| !url.is_empty());
    let url = match (&book_url, &series_url) {
        (Some(url), _) | (None, Some(url)) => url.clone(),
        (None, None) => {
            print_help()?;
            return Err(err_msg("Please enter a URL for the Book or Series!"));
        }
    };

    if args.file.is_some() {
        println!("Not yet implemented. Please check for an update and try again later.");
        return Ok(());
    }

    let output_root = match args.output {
        Some(path) => path,
        None => std::env::current_dir().context("Could not determine current directory")?,
    };
    println!("{url}");

    let client = SiteClient::tokybook()?;
    let mut book_urls = Vec::new();

    if let Some(series_url) = series_url {
        if first_path_segment(&series_url) != "tag" {
            return Err(err_msg("You did not enter a 'series' URL."));
        }
        println!("Getting Series Information and links....");

        let series = series::walk(&client, &series_url, &output_root)?;
        series.save_properties()?;
        book_urls.extend(series.books.into_iter().map(|entry| entry.link));
    }

    if let Some(book_url) = book_url {
        if first_path_segment(&book_url) == "tag" {
            return Err(err_msg("You entered a 'tag' URL as a book URL."));
        }
        book_urls.push(book_url);
    }

    for book_url in book_urls {
        println!("Retrieving book from {book_url}.");
        let doc = client.fetch_page(&book_url)?;

        let mut book = get_audiobook(&doc, &output_root)?;
        download_audiobook(&client, &mut book)?;
        book.save_properties()?;

        println!("-------------------------------");
        println!("Audiobook Grabbed Successfully!");
        println!("-------------------------------");
    }

    println!("All Books Grabbed Successfully!");
    println!("-------------------------------");
    Ok(())
}

#[test]
fn test_first_path_segment() {
    assert_eq!("tag", first_path_segment("https://tokybook.com/tag/stormlight-archive/"));
    assert_eq!("oathbringer", first_path_segment("https://tokybook.com/oathbringer/"));
    assert_eq!("", first_path_segment("https://tokybook.com"));
    assert_eq!("", first_path_segment("not a url"));
}
