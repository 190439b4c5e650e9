use anyhow::Result;
use std::path::{Path, PathBuf};
use url::Url;

/// Last non-empty path segment of `url_str`, without query or fragment.
pub fn filename_from_url(url_str: &str) -> Result<Option<String>> {
    let url = Url::parse(url_str)?;

    Ok(url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(sanitize_filename))
}

pub fn get_filename_from_url(url_str: &str) -> Result<String> {
    match filename_from_url(url_str)? {
        Some(filename) => Ok(filename),
        // Fallback if no filename found in path
        None => Ok(format!("download_{}", uuid::Uuid::new_v4())),
    }
}

/// `filename=` parameter of a `Content-Disposition` header value.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (key, name) = param.split_once('=')?;
            key.trim().eq_ignore_ascii_case("filename").then_some(name)
        })
        .map(|name| name.trim().trim_matches('"'))
        .filter(|name| !name.is_empty())
        .map(sanitize_filename)
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// `path` if it is free, otherwise the first free `stem_N.ext` beside it.
pub fn get_unique_filepath(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let file_stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let new_filename = if extension.is_empty() {
            format!("{}_{}", file_stem, counter)
        } else {
            format!("{}_{}.{}", file_stem, counter, extension)
        };

        let candidate = dir.join(new_filename);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// `<name>-state.json` for `url`. Derived from the URL alone so reruns find
/// the same file.
pub fn default_state_path(url: &str) -> Result<PathBuf> {
    let name = filename_from_url(url)?.unwrap_or_else(|| "download".to_string());
    Ok(PathBuf::from(format!("{}-state.json", name)))
}
