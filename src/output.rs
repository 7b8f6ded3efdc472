use chrono::Local;
use easy_error::{err_msg, Error, ResultExt};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Highest number appended to a folder name before giving up.
pub const MAX_FOLDER_SUFFIX: u32 = 10_000;
const FALLBACK_FOLDER_NAME: &str = "audio";

/// Creates a new folder named `desired` inside `root` and returns its path.
///
/// When the name is taken, ` 1`, ` 2`, ... is appended until a free one is found,
/// so nothing already on disk is ever written into.
pub fn allocate(root: &Path, desired: &str) -> Result<PathBuf, Error> {
    let desired = match desired.trim() {
        "" => FALLBACK_FOLDER_NAME,
        name => name,
    };
    fs::create_dir_all(root).context(format!("Could not create output directory {root:?}"))?;

    for suffix in 0..=MAX_FOLDER_SUFFIX {
        let name = if suffix == 0 {
            desired.to_string()
        } else {
            format!("{desired} {suffix}")
        };
        let path = root.join(name);
        if path.exists() {
            continue;
        }
        match fs::create_dir(&path) {
            Ok(()) => {
                println!("Output Path: {}", path.display());
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err).context(format!("Could not create folder {path:?}")),
        }
    }

    Err(err_msg(format!(
        "No free folder name for '{desired}' in {root:?} after {MAX_FOLDER_SUFFIX} attempts"
    )))
}

/// Local time in the format the properties files have always used.
pub fn save_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Writes `properties` as pretty-printed UTF-8 JSON to `dir/file_name`.
pub fn write_properties(dir: &Path, file_name: &str, properties: &Value) -> Result<PathBuf, Error> {
    let path = dir.join(file_name);
    let json = serde_json::to_string_pretty(properties).context("Could not serialize properties")?;
    fs::write(&path, json).context(format!("Could not write {path:?}"))?;
    tracing::debug!(path = %path.display(), "properties saved");
    Ok(path)
}

/// Reads back a file written by `write_properties`.
#[cfg(test)]
pub fn load_properties(path: &Path) -> Result<Value, Error> {
    let contents = fs::read_to_string(path).context(format!("Could not read {path:?}"))?;
    serde_json::from_str(&contents).context(format!("Could not parse {path:?}"))
}

#[test]
fn test_allocate_fresh_name() {
    let root = tempfile::tempdir().unwrap();
    let path = allocate(root.path(), "  The Way of Kings ").unwrap();
    assert_eq!(root.path().join("The Way of Kings"), path);
    assert!(path.is_dir());
}

#[test]
fn test_allocate_smallest_free_suffix() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("Book")).unwrap();
    fs::create_dir(root.path().join("Book 1")).unwrap();
    fs::create_dir(root.path().join("Book 3")).unwrap();

    let path = allocate(root.path(), "Book").unwrap();
    assert_eq!(root.path().join("Book 2"), path);
    assert!(path.is_dir());
    assert!(!root.path().join("Book 4").exists());

    assert_eq!(root.path().join("Book 4"), allocate(root.path(), "Book").unwrap());
}

#[test]
fn test_allocate_skips_files_and_empty_names() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("audio"), b"not a folder").unwrap();

    assert_eq!(root.path().join("audio 1"), allocate(root.path(), "   ").unwrap());
}

#[test]
fn test_allocate_creates_missing_root() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("nested").join("output");
    assert_eq!(root.join("Book"), allocate(&root, "Book").unwrap());
}

#[test]
fn test_properties_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let properties = serde_json::json!({"title": "Ærø & co", "count": 2});
    let path = write_properties(dir.path(), "series.json", &properties).unwrap();

    assert!(fs::read_to_string(&path).unwrap().contains("Ærø & co"));
    assert_eq!(properties, load_properties(&path).unwrap());
}

#[test]
fn test_save_timestamp_format() {
    let stamp = save_timestamp();
    assert!(chrono::NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S%.6f").is_ok(), "{stamp}");
}
