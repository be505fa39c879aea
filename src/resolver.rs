// ABOUTME: Resolution flow: post URL -> shortcode -> extraction -> media items
// ABOUTME: Size probes run concurrently with bounded parallelism

use crate::error::{RelayError, Result};
use crate::instagram::{MediaCandidate, MediaExtractor};
use crate::media::{
    dedupe_and_sort, extract_shortcode, format_size, MediaItem, MediaType, PostResolution,
    QualityVariant,
};
use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound on concurrent per-item size probes against the media host
const SIZE_PROBE_CONCURRENCY: usize = 4;

/// Total timeout on a single HEAD probe
const SIZE_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Resolver {
    extractor: Arc<dyn MediaExtractor>,
    http: reqwest::Client,
}

impl Resolver {
    pub fn new(extractor: Arc<dyn MediaExtractor>, http: reqwest::Client) -> Self {
        Self { extractor, http }
    }

    /// Resolve a post URL into media items with quality variants.
    ///
    /// Fails with InvalidInput before any network call when the URL matches
    /// no accepted post shape.
    pub async fn resolve(&self, raw_url: &str) -> Result<PostResolution> {
        let shortcode = extract_shortcode(raw_url)
            .ok_or_else(|| RelayError::InvalidInput("Invalid Instagram URL".into()))?;

        let candidates = self.extractor.fetch(&shortcode, raw_url).await?;
        let mut medias = build_media_items(candidates)?;
        self.probe_sizes(&mut medias).await;

        Ok(PostResolution { shortcode, medias })
    }

    /// Fill in size labels for each item's default variant.
    ///
    /// A failed probe leaves that item's size unknown; it never fails the
    /// resolution as a whole.
    async fn probe_sizes(&self, medias: &mut [MediaItem]) {
        let probes: Vec<(usize, String)> = medias
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.qualities.first().map(|q| (i, q.url.clone())))
            .collect();

        let results: Vec<(usize, Option<String>)> = stream::iter(probes)
            .map(|(i, url)| {
                let http = self.http.clone();
                async move {
                    let size = probe_content_length(&http, &url).await.map(format_size);
                    (i, size)
                }
            })
            .buffer_unordered(SIZE_PROBE_CONCURRENCY)
            .collect()
            .await;

        for (i, size) in results {
            if size.is_none() {
                debug!("size probe failed for media item {}", i);
            }
            if let Some(quality) = medias[i].qualities.first_mut() {
                quality.size = size;
            }
        }
    }
}

async fn probe_content_length(http: &reqwest::Client, url: &str) -> Option<u64> {
    let response = http
        .head(url)
        .timeout(SIZE_PROBE_TIMEOUT)
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Normalize extraction candidates into media items.
///
/// Candidates with no usable URL are dropped; an entirely empty result is an
/// extraction failure so callers never see an item with empty qualities.
pub fn build_media_items(candidates: Vec<MediaCandidate>) -> Result<Vec<MediaItem>> {
    let mut medias = Vec::new();

    for candidate in candidates {
        let item = if candidate.is_video {
            let qualities = if candidate.video_versions.is_empty() {
                match &candidate.video_url {
                    Some(url) => vec![QualityVariant {
                        label: "Best Quality".into(),
                        url: url.clone(),
                        width: None,
                        height: None,
                        size: None,
                    }],
                    None => continue,
                }
            } else {
                dedupe_and_sort(
                    candidate
                        .video_versions
                        .iter()
                        .map(|v| QualityVariant {
                            label: format!("{}x{}", v.width, v.height),
                            url: v.url.clone(),
                            width: Some(v.width),
                            height: Some(v.height),
                            size: None,
                        })
                        .collect(),
                )
            };
            MediaItem {
                index: medias.len(),
                media_type: MediaType::Video,
                preview_image: candidate.display_url.clone(),
                qualities,
            }
        } else {
            match &candidate.display_url {
                Some(url) => MediaItem {
                    index: medias.len(),
                    media_type: MediaType::Image,
                    preview_image: Some(url.clone()),
                    qualities: vec![QualityVariant {
                        label: "High".into(),
                        url: url.clone(),
                        width: None,
                        height: None,
                        size: None,
                    }],
                },
                None => continue,
            }
        };
        medias.push(item);
    }

    if medias.is_empty() {
        return Err(RelayError::Extraction(
            "Could not find any media. The post might be private or deleted.".into(),
        ));
    }
    Ok(medias)
}
