// ABOUTME: Instagram extraction backend using the internal GraphQL API
// ABOUTME: Implements the MediaExtractor capability behind a mockable trait

use crate::error::{RelayError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Instagram GraphQL API endpoint
const GRAPHQL_ENDPOINT: &str = "https://www.instagram.com/api/graphql";

/// Instagram internal app ID (public, embedded in the web app)
const IG_APP_ID: &str = "936619743392459";

/// Facebook LSD token (anti-CSRF, public static value used by web scrapers)
const FB_LSD_TOKEN: &str = "AVqbxe3J_YA";

/// Facebook ASBD ID (public, embedded in the web app)
const FB_ASBD_ID: &str = "129477";

/// Total timeout on the GraphQL call; extraction is a metadata fetch
const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// One media entry returned by the extraction backend, before normalization
#[derive(Debug, Clone)]
pub struct MediaCandidate {
    pub is_video: bool,
    pub video_url: Option<String>,
    pub display_url: Option<String>,
    /// Explicit renditions when the backend exposes them; usually empty
    pub video_versions: Vec<VideoVersion>,
}

#[derive(Debug, Clone)]
pub struct VideoVersion {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Narrow extraction boundary: post identifier in, direct media URLs out
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn fetch(&self, shortcode: &str, post_url: &str) -> Result<Vec<MediaCandidate>>;
}

pub struct InstagramExtractor {
    client: reqwest::Client,
    doc_id: String,
}

impl InstagramExtractor {
    pub fn new(client: reqwest::Client, doc_id: String) -> Self {
        Self { client, doc_id }
    }
}

#[async_trait]
impl MediaExtractor for InstagramExtractor {
    async fn fetch(&self, shortcode: &str, post_url: &str) -> Result<Vec<MediaCandidate>> {
        let variables = serde_json::json!({ "shortcode": shortcode }).to_string();

        let response = self
            .client
            .post(GRAPHQL_ENDPOINT)
            .timeout(EXTRACTION_TIMEOUT)
            .header("X-IG-App-ID", IG_APP_ID)
            .header("X-FB-LSD", FB_LSD_TOKEN)
            .header("X-ASBD-ID", FB_ASBD_ID)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Referer", post_url)
            .header("Origin", "https://www.instagram.com")
            .header("Accept", "*/*")
            .form(&[
                ("doc_id", self.doc_id.as_str()),
                ("variables", variables.as_str()),
                ("lsd", FB_LSD_TOKEN),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Extraction(format!("Extraction request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 400 || body.contains("doc_id") {
                warn!("possible doc_id expiry (HTTP {})", status);
            }
            return Err(RelayError::Extraction(format!(
                "Extraction backend returned HTTP {}",
                status
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            RelayError::Extraction(format!("Extraction backend returned non-JSON: {}", e))
        })?;

        parse_media_document(&body)
    }
}

/// Navigate a GraphQL response into flat media candidates.
///
/// Handles single videos, single images, and carousel (sidecar) posts.
pub fn parse_media_document(body: &Value) -> Result<Vec<MediaCandidate>> {
    let media = body
        .pointer("/data/xdt_shortcode_media")
        .or_else(|| body.pointer("/data/shortcode_media"))
        .ok_or_else(|| {
            if let Some(message) = body.pointer("/message").and_then(Value::as_str) {
                if message.contains("checkpoint_required") || message.contains("login_required") {
                    return RelayError::Extraction(
                        "The post is private or requires login".to_string(),
                    );
                }
            }
            RelayError::Extraction("Post not found or media unavailable".to_string())
        })?;

    let candidates = match media
        .pointer("/edge_sidecar_to_children/edges")
        .and_then(Value::as_array)
    {
        Some(edges) => edges
            .iter()
            .filter_map(|edge| edge.get("node"))
            .map(parse_media_node)
            .collect(),
        None => vec![parse_media_node(media)],
    };

    Ok(candidates)
}

fn parse_media_node(node: &Value) -> MediaCandidate {
    let video_versions = node
        .get("video_versions")
        .and_then(Value::as_array)
        .map(|versions| {
            versions
                .iter()
                .filter_map(|v| {
                    Some(VideoVersion {
                        url: v.get("url")?.as_str()?.to_string(),
                        width: v.get("width")?.as_u64()? as u32,
                        height: v.get("height")?.as_u64()? as u32,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    MediaCandidate {
        is_video: node
            .get("is_video")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        video_url: node
            .get("video_url")
            .and_then(Value::as_str)
            .map(String::from),
        display_url: node
            .get("display_url")
            .and_then(Value::as_str)
            .map(String::from),
        video_versions,
    }
}
