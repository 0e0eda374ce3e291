//! Input file selection.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{LoaderError, Result};

/// Expand input paths into the ordered list of files to load.
///
/// Directories contribute their files matching `pattern`, sorted by name.
/// Explicit files keep their position. A file listed twice is loaded once.
pub fn select_inputs<P: AsRef<Path>>(paths: &[P], pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob_regex(pattern)?;
    let mut seen = HashSet::new();
    let mut selected = Vec::new();

    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type()?.is_file() && matcher.is_match(&name) {
                    entries.push(entry.path());
                }
            }
            entries.sort();
            tracing::debug!(dir = %path.display(), files = entries.len(), pattern, "Expanded input directory");
            for entry in entries {
                if seen.insert(entry.clone()) {
                    selected.push(entry);
                }
            }
        } else if path.is_file() {
            if seen.insert(path.to_path_buf()) {
                selected.push(path.to_path_buf());
            }
        } else {
            return Err(LoaderError::Input(format!(
                "{} does not exist",
                path.display()
            )));
        }
    }

    if selected.is_empty() {
        return Err(LoaderError::Input(format!(
            "no input files matching '{pattern}'"
        )));
    }
    Ok(selected)
}

/// Translate a file-name glob (`*`, `?`) into an anchored regex.
fn glob_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| LoaderError::Config(format!("invalid file pattern '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "x\n").unwrap();
        path
    }

    #[test]
    fn test_glob_regex() {
        let re = glob_regex("*.txt").unwrap();
        assert!(re.is_match("case.txt"));
        assert!(!re.is_match("case.txt.bak"));
        assert!(!re.is_match("casetxt"));

        let re = glob_regex("file_?.tsv").unwrap();
        assert!(re.is_match("file_1.tsv"));
        assert!(!re.is_match("file_10.tsv"));
    }

    #[test]
    fn test_directory_is_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "sample.txt");
        touch(dir.path(), "case.txt");
        touch(dir.path(), "notes.md");
        std::fs::create_dir(dir.path().join("nested.txt")).unwrap();

        let files = select_inputs(&[dir.path()], "*.txt").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["case.txt", "sample.txt"]);
    }

    #[test]
    fn test_explicit_files_keep_order_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let sample = touch(dir.path(), "sample.txt");
        let case = touch(dir.path(), "case.txt");

        let files = select_inputs(&[sample.clone(), case.clone(), sample.clone()], "*.txt").unwrap();
        assert_eq!(files, vec![sample, case]);
    }

    #[test]
    fn test_missing_or_empty_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            select_inputs(&[dir.path().join("missing")], "*.txt"),
            Err(LoaderError::Input(_))
        ));
        assert!(matches!(
            select_inputs(&[dir.path()], "*.txt"),
            Err(LoaderError::Input(_))
        ));
    }
}
