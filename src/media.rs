// ABOUTME: Media domain types and post-URL parsing
// ABOUTME: Wire shapes are camelCase to match the frontend contract

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// One media asset within a post, with its selectable quality variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    /// Ordinal position within the post (carousel index)
    pub index: usize,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<String>,
    /// Non-empty; first entry is the default/preview variant
    pub qualities: Vec<QualityVariant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Image,
}

/// One concrete rendition of a media item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityVariant {
    pub label: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Human-readable size estimate from the probe, e.g. "12.34 MB"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Result of resolving a post URL; produced fresh per request
#[derive(Debug, Clone, Serialize)]
pub struct PostResolution {
    pub shortcode: String,
    pub medias: Vec<MediaItem>,
}

/// Path segments that name post content, as opposed to profiles
const CONTENT_TYPES: &[&str] = &["p", "reel", "reels", "tv"];

/// Extract the shortcode from an Instagram post URL.
///
/// Accepts `/p/<code>/`, `/reel/<code>/`, `/reels/<code>/`, `/tv/<code>/`,
/// with or without a leading username segment. Returns None for any other
/// shape, without touching the network.
pub fn extract_shortcode(raw_url: &str) -> Option<String> {
    let url = Url::parse(raw_url).ok()?;
    let host = url.host_str()?.to_lowercase();
    if host != "instagram.com" && !host.ends_with(".instagram.com") {
        return None;
    }

    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let code = if segments.len() >= 2 && CONTENT_TYPES.contains(&segments[0]) {
        segments[1]
    } else if segments.len() >= 3 && CONTENT_TYPES.contains(&segments[1]) {
        segments[2]
    } else {
        return None;
    };

    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return None;
    }
    Some(code.to_string())
}

/// Collapse duplicate resolutions and order variants best-first.
///
/// Variants without dimensions keep their relative order at the tail.
pub fn dedupe_and_sort(variants: Vec<QualityVariant>) -> Vec<QualityVariant> {
    let mut seen: HashSet<(u32, u32)> = HashSet::new();
    let mut kept: Vec<QualityVariant> = Vec::with_capacity(variants.len());
    for variant in variants {
        if let (Some(w), Some(h)) = (variant.width, variant.height) {
            if !seen.insert((w, h)) {
                continue;
            }
        }
        kept.push(variant);
    }
    kept.sort_by_key(|v| {
        std::cmp::Reverse(match (v.width, v.height) {
            (Some(w), Some(h)) => u64::from(w) * u64::from(h),
            _ => 0,
        })
    });
    kept
}

/// Format a byte count the way the frontend displays it
pub fn format_size(bytes: u64) -> String {
    if bytes > 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_shortcode_reel() {
        assert_eq!(
            extract_shortcode("https://instagram.com/reel/ABC123/"),
            Some("ABC123".to_string())
        );
    }

    #[test]
    fn test_extract_shortcode_post_and_tv() {
        assert_eq!(
            extract_shortcode("https://www.instagram.com/p/DEF456/"),
            Some("DEF456".to_string())
        );
        assert_eq!(
            extract_shortcode("https://www.instagram.com/tv/JKL012/"),
            Some("JKL012".to_string())
        );
    }

    #[test]
    fn test_extract_shortcode_reels_plural() {
        assert_eq!(
            extract_shortcode("https://www.instagram.com/reels/GHI789/"),
            Some("GHI789".to_string())
        );
    }

    #[test]
    fn test_extract_shortcode_ignores_query() {
        assert_eq!(
            extract_shortcode("https://www.instagram.com/reel/ABC123/?igsh=xxx"),
            Some("ABC123".to_string())
        );
    }

    #[test]
    fn test_extract_shortcode_username_prefix() {
        assert_eq!(
            extract_shortcode("https://www.instagram.com/someuser/reel/B58TfHTnY2u/"),
            Some("B58TfHTnY2u".to_string())
        );
    }

    #[test]
    fn test_extract_shortcode_rejects_other_hosts() {
        assert_eq!(
            extract_shortcode("https://www.google.com/search?q=instagram"),
            None
        );
        assert_eq!(extract_shortcode("https://example.com/reel/ABC123/"), None);
    }

    #[test]
    fn test_extract_shortcode_rejects_profiles_and_garbage() {
        assert_eq!(extract_shortcode("https://www.instagram.com/cristiano/"), None);
        assert_eq!(extract_shortcode("https://www.instagram.com/"), None);
        assert_eq!(extract_shortcode("not a url"), None);
    }

    #[test]
    fn test_extract_shortcode_rejects_bad_charset() {
        assert_eq!(
            extract_shortcode("https://www.instagram.com/reel/AB%20C/"),
            None
        );
    }

    #[test]
    fn test_dedupe_and_sort_orders_best_first() {
        let variant = |w, h| QualityVariant {
            label: format!("{}x{}", w, h),
            url: format!("https://cdn.example.com/{}x{}.mp4", w, h),
            width: Some(w),
            height: Some(h),
            size: None,
        };
        let sorted = dedupe_and_sort(vec![
            variant(480, 854),
            variant(1080, 1920),
            variant(480, 854),
            variant(720, 1280),
        ]);

        let labels: Vec<&str> = sorted.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, vec!["1080x1920", "720x1280", "480x854"]);
    }

    #[test]
    fn test_dedupe_keeps_dimensionless_variants_last() {
        let sorted = dedupe_and_sort(vec![
            QualityVariant {
                label: "Best Quality".into(),
                url: "https://cdn.example.com/v.mp4".into(),
                width: None,
                height: None,
                size: None,
            },
            QualityVariant {
                label: "720x1280".into(),
                url: "https://cdn.example.com/720.mp4".into(),
                width: Some(720),
                height: Some(1280),
                size: None,
            },
        ]);
        assert_eq!(sorted[0].label, "720x1280");
        assert_eq!(sorted[1].label, "Best Quality");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "0.50 KB");
        assert_eq!(format_size(1024 * 1024), "1024.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_media_item_wire_shape() {
        let item = MediaItem {
            index: 0,
            media_type: MediaType::Video,
            preview_image: Some("https://cdn.example.com/thumb.jpg".into()),
            qualities: vec![QualityVariant {
                label: "Best Quality".into(),
                url: "https://cdn.example.com/v.mp4".into(),
                width: None,
                height: None,
                size: Some("1.00 MB".into()),
            }],
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["previewImage"], "https://cdn.example.com/thumb.jpg");
        assert_eq!(json["qualities"][0]["label"], "Best Quality");
        assert!(json["qualities"][0].get("width").is_none());
    }
}
