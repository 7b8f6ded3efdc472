use assert_cmd::Command;
use predicates::prelude::*;

fn tokybook_dl() -> Command {
    Command::cargo_bin("tokybook-dl").expect("binary is built")
}

#[test]
fn no_arguments_prints_help_and_fails() {
    tokybook_dl()
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--book-url"))
        .stderr(predicate::str::contains("--series-url"));
}

#[test]
fn missing_url_fails() {
    let dir = tempfile::tempdir().unwrap();
    tokybook_dl()
        .arg("--output")
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Please enter a URL for the Book or Series!"));
}

#[test]
fn file_mode_is_not_implemented() {
    tokybook_dl()
        .args(["-f", "links.txt", "-b", "https://tokybook.com/oathbringer/"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Not yet implemented"));
}

#[test]
fn tag_url_as_book_fails() {
    tokybook_dl()
        .args(["--book-url", "https://tokybook.com/tag/stormlight-archive/"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("You entered a 'tag' URL as a book URL."));
}

#[test]
fn book_url_as_series_fails() {
    tokybook_dl()
        .args(["--series-url", "https://tokybook.com/oathbringer/"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("You did not enter a 'series' URL."));
}

#[test]
fn other_domains_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    tokybook_dl()
        .args(["-b", "https://example.com/oathbringer/", "-o"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Please enter a tokybook URL!"));
}

#[test]
fn book_and_series_together_fail() {
    tokybook_dl()
        .args([
            "-b",
            "https://tokybook.com/oathbringer/",
            "-s",
            "https://tokybook.com/tag/stormlight-archive/",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--series-url"))
        .stderr(predicate::str::contains("cannot be used with"));
}
