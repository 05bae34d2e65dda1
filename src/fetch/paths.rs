//! URL joining and URL → cache path mapping, on top of [`reqwest::Url`].

use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::error::{Result, ReviewError};

fn parse(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| ReviewError::InvalidUrl(format!("{url}: {e}")))
}

/// Join a base URL (scheme optional, `http` assumed) with a path.
///
/// `path` is appended segment by segment below the base path; any query or
/// fragment on either side is dropped.
pub fn join_url(base: &str, path: &str) -> Result<String> {
    let mut url = if base.contains("://") {
        parse(base)?
    } else {
        parse(&format!("http://{base}"))?
    };
    if url.host_str().filter(|h| !h.is_empty()).is_none() {
        return Err(ReviewError::InvalidUrl(format!("no host in {base}")));
    }
    url.set_query(None);
    url.set_fragment(None);

    let rel = path.split(['?', '#']).next().unwrap_or_default();
    url.path_segments_mut()
        .map_err(|()| ReviewError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(rel.split('/').filter(|s| !s.is_empty()));
    Ok(url.into())
}

/// Resolve `reference` against the directory URL `base`.
///
/// A leading `/` on `reference` is ignored; `..` climbs above `base`.
pub fn relative_url(base: &str, reference: &str) -> Result<String> {
    let mut url = parse(base)?
        .join(reference.trim_start_matches('/'))
        .map_err(|e| ReviewError::InvalidUrl(format!("{reference}: {e}")))?;
    url.set_fragment(None);
    Ok(url.into())
}

/// Directory URL of a resource, ending in `/`, without query or fragment.
pub fn parent_url(url: &str) -> Result<String> {
    let parent = parse(url)?
        .join("./")
        .map_err(|e| ReviewError::InvalidUrl(format!("{url}: {e}")))?;
    Ok(parent.into())
}

/// Local cache location for `url`: `<cache_dir>/<host[:port]>/<path>`.
///
/// A URL without a path maps to `index.html`. `.` and `..` segments are
/// dropped so every result stays under `cache_dir`.
pub fn url_to_cache_path(cache_dir: &Path, url: &str) -> Result<PathBuf> {
    let parsed = parse(url)?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ReviewError::InvalidUrl(url.to_string()))?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let root = cache_dir.join(authority);
    let mut local = root.clone();
    for segment in parsed.path_segments().into_iter().flatten() {
        if !matches!(segment, "" | "." | "..") {
            local.push(segment);
        }
    }
    if local == root {
        local.push("index.html");
    }
    Ok(local)
}

/// Size of the partial file at `path`, or zero when there is none.
pub async fn resume_offset(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}

/// Sibling path holding the transduced JSON for a downloaded document
pub fn json_output_path(document: &Path) -> PathBuf {
    document.with_extension("json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("10.0.0.5", "/r/report.xml").unwrap(), "http://10.0.0.5/r/report.xml");
        assert_eq!(join_url("10.0.0.5:8080", "r/report.xml").unwrap(), "http://10.0.0.5:8080/r/report.xml");
        assert_eq!(join_url("http://h/base", "/x").unwrap(), "http://h/base/x");
        assert_eq!(join_url("https://h/base/?q=1", "x?y=1").unwrap(), "https://h/base/x");
        assert_eq!(join_url("h", "r//a b.xml").unwrap(), "http://h/r/a%20b.xml");
        assert!(join_url("", "/x").is_err());
    }

    #[test]
    fn test_relative_url() {
        let base = "http://h:81/r/7/";
        assert_eq!(relative_url(base, "img/a.png").unwrap(), "http://h:81/r/7/img/a.png");
        assert_eq!(relative_url(base, "/img/a.png").unwrap(), "http://h:81/r/7/img/a.png");
        assert_eq!(relative_url(base, "../shared/b.jpg").unwrap(), "http://h:81/r/shared/b.jpg");
    }

    #[test]
    fn test_parent_url() {
        assert_eq!(parent_url("http://h/a/b/report.xml").unwrap(), "http://h/a/b/");
        assert_eq!(parent_url("http://h/report.xml").unwrap(), "http://h/");
        assert_eq!(parent_url("http://h").unwrap(), "http://h/");
        assert!(parent_url("not a url").is_err());
    }

    #[test]
    fn test_parent_url_ignores_slash_in_query() {
        assert_eq!(
            parent_url("http://h/r/7/report.xml?from=a/b#x/y").unwrap(),
            "http://h/r/7/"
        );
    }

    #[test]
    fn test_url_to_cache_path() {
        let root = Path::new("/tmp/cache");
        assert_eq!(
            url_to_cache_path(root, "http://example.com/a/b/c.png").unwrap(),
            Path::new("/tmp/cache/example.com/a/b/c.png")
        );
        assert_eq!(
            url_to_cache_path(root, "http://example.com").unwrap(),
            Path::new("/tmp/cache/example.com/index.html")
        );
        assert_eq!(
            url_to_cache_path(root, "http://h:8080/r/../../etc/x?v=/q").unwrap(),
            Path::new("/tmp/cache/h:8080/etc/x")
        );
        assert_eq!(
            url_to_cache_path(root, "http://h:80/a.png").unwrap(),
            Path::new("/tmp/cache/h/a.png")
        );
        assert!(url_to_cache_path(root, "/just/a/path").is_err());
    }

    #[test]
    fn test_json_output_path() {
        assert_eq!(
            json_output_path(Path::new("/c/h/r/report.xml")),
            Path::new("/c/h/r/report.json")
        );
    }

    #[tokio::test]
    async fn test_resume_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.bin");
        assert_eq!(resume_offset(&path).await, 0);
        std::fs::write(&path, b"12345").unwrap();
        assert_eq!(resume_offset(&path).await, 5);
        assert_eq!(resume_offset(dir.path()).await, 0);
    }
}
