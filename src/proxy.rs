// ABOUTME: Streaming proxy: fetches a remote URL and pipes the body through
// ABOUTME: Bodies are never buffered whole; errors become JSON payloads

use crate::error::{RelayError, Result};
use url::Url;

/// Browser-like User-Agent, set on the shared client; some media CDNs
/// reject unknown clients
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Fallback download filename when the URL path has none
const DEFAULT_FILE_NAME: &str = "video.mp4";

/// Open a streaming GET against the source URL.
///
/// No whole-body timeout is set: the payload may be arbitrarily large and
/// the client carries a connect timeout. Non-success upstream statuses are
/// surfaced before any body byte is forwarded, so the caller never receives
/// partial binary content mixed with a JSON error.
pub async fn fetch_upstream(http: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    validate_source_url(url)?;

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| RelayError::upstream(format!("Failed to reach upstream: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::upstream_status(
            format!("Upstream returned status {}", status.as_u16()),
            status.as_u16(),
        ));
    }
    Ok(response)
}

/// Require an absolute http(s) URL so scheme mistakes fail as bad input
/// rather than as an opaque upstream error
pub fn validate_source_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|_| RelayError::InvalidInput("The url parameter must be an absolute URL".into()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RelayError::InvalidInput(format!(
            "Unsupported URL scheme: {}",
            other
        ))),
    }
}

/// Suggest a download filename from the URL's final path segment
pub fn file_name_for(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()?
                .filter(|s| !s.is_empty())
                .last()
                .filter(|s| s.contains('.'))
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_source_url() {
        assert!(validate_source_url("https://cdn.example.com/v.mp4").is_ok());
        assert!(validate_source_url("http://cdn.example.com/v.mp4").is_ok());
        assert!(matches!(
            validate_source_url("ftp://cdn.example.com/v.mp4"),
            Err(RelayError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_source_url("cdn.example.com/v.mp4"),
            Err(RelayError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_file_name_from_path() {
        assert_eq!(
            file_name_for("https://cdn.example.com/media/clip.mp4?token=abc"),
            "clip.mp4"
        );
    }

    #[test]
    fn test_file_name_falls_back() {
        assert_eq!(file_name_for("https://cdn.example.com/"), "video.mp4");
        assert_eq!(file_name_for("https://cdn.example.com/segments"), "video.mp4");
        assert_eq!(file_name_for("not a url"), "video.mp4");
    }

    #[tokio::test]
    async fn test_fetch_upstream_rejects_bad_input_before_network() {
        let err = fetch_upstream(&reqwest::Client::new(), "file:///etc/hosts")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
    }
}
