//! Loading template sources from disk.

use crate::error::{EngineError, EngineResult};
use std::path::Path;

/// A template file: its base name (the template name) and contents.
pub(crate) struct SourceFile {
    pub name: String,
    pub text: String,
}

pub(crate) fn read_files(paths: &[String]) -> EngineResult<Vec<SourceFile>> {
    if paths.is_empty() {
        return Err(EngineError::NoFiles);
    }
    paths
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path).map_err(|err| EngineError::io(path, &err))?;
            Ok(SourceFile {
                name: base_name(path),
                text,
            })
        })
        .collect()
}

fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Files matching `pattern`, sorted. Wildcards are honoured in the final
/// path component; unreadable directories match nothing.
pub(crate) fn glob(pattern: &str) -> EngineResult<Vec<String>> {
    let path = Path::new(pattern);
    let file_pattern = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| EngineError::NoMatch(pattern.to_string()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    let pattern_chars: Vec<char> = file_pattern.chars().collect();

    let mut matches = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let name_chars: Vec<char> = name.chars().collect();
            if wildcard_match(&pattern_chars, &name_chars) {
                matches.push(dir.join(&name).to_string_lossy().into_owned());
            }
        }
    }
    matches.sort();
    tracing::trace!(pattern, count = matches.len(), "expanded template glob");
    if matches.is_empty() {
        return Err(EngineError::NoMatch(pattern.to_string()));
    }
    Ok(matches)
}

/// Match one path component against `*` and `?` wildcards.
fn wildcard_match(pattern: &[char], name: &[char]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some(('*', rest)) => (0..=name.len()).any(|skip| wildcard_match(rest, &name[skip..])),
        Some(('?', rest)) => !name.is_empty() && wildcard_match(rest, &name[1..]),
        Some((&p, rest)) => name.first() == Some(&p) && wildcard_match(rest, &name[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, name: &str) -> bool {
        let p: Vec<char> = pattern.chars().collect();
        let n: Vec<char> = name.chars().collect();
        wildcard_match(&p, &n)
    }

    #[test]
    fn wildcards() {
        assert!(matches("*.tpl", "a.tpl"));
        assert!(!matches("*.tpl", "a.tpl.bak"));
        assert!(matches("?.tpl", "b.tpl"));
        assert!(!matches("?.tpl", "ab.tpl"));
        assert!(matches("a*", "a"));
    }

    #[test]
    fn glob_without_matches_fails() {
        let err = glob("/invalid/path/to/template/dir/*").unwrap_err();
        assert_eq!(
            err.to_string(),
            "template: pattern matches no files: `/invalid/path/to/template/dir/*`"
        );
    }

    #[test]
    fn no_files() {
        assert!(matches!(read_files(&[]), Err(EngineError::NoFiles)));
    }

    #[test]
    fn base_names() {
        assert_eq!(base_name("/a/b/c.tpl"), "c.tpl");
        assert_eq!(base_name("c.tpl"), "c.tpl");
    }
}
