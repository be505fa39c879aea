// ABOUTME: Google Drive resumable-upload client: session creation and relays
// ABOUTME: Speaks the Content-Range/308 protocol directly over reqwest

use crate::error::{RelayError, Result};
use crate::token::TokenProvider;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const SESSION_ENDPOINT: &str =
    "https://www.googleapis.com/upload/drive/v3/files?uploadType=resumable&supportsAllDrives=true";

/// Chunk size for streamed relays; Drive requires a 256 KiB multiple
pub const CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Resume attempts per transfer before giving up
const MAX_RESUME_ATTEMPTS: u32 = 3;

/// Total timeout on the session-creation call
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// A one-time resumable upload session; consumed exactly once by a relay
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub upload_url: String,
    pub file_name: String,
    pub mime_type: String,
}

/// Creates upload sessions on behalf of the configured service account
pub struct DriveClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    folder_id: Option<String>,
}

impl DriveClient {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
        folder_id: Option<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            folder_id,
        }
    }

    /// Negotiate a resumable upload session for the given file.
    ///
    /// Every call creates a fresh session; session URLs are never reused.
    pub async fn create_session(&self, file_name: &str, mime_type: &str) -> Result<UploadSession> {
        let token = self.tokens.bearer_token(DRIVE_SCOPE).await?;
        let body = session_request_body(file_name, mime_type, self.folder_id.as_deref());

        let response = self
            .http
            .post(SESSION_ENDPOINT)
            .timeout(SESSION_TIMEOUT)
            .bearer_auth(&token)
            .header("X-Upload-Content-Type", mime_type)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::upstream(format!("Session creation failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::upstream_status(
                format!("Drive session creation returned {}: {}", status.as_u16(), body),
                status.as_u16(),
            ));
        }

        let upload_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                RelayError::upstream("Failed to retrieve upload URL from Google Drive")
            })?;

        info!("created upload session for {}", file_name);

        Ok(UploadSession {
            upload_url,
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
        })
    }
}

fn session_request_body(file_name: &str, mime_type: &str, folder_id: Option<&str>) -> Value {
    let mut body = serde_json::json!({
        "name": file_name,
        "mimeType": mime_type,
    });
    if let Some(folder) = folder_id {
        body["parents"] = serde_json::json!([folder]);
    }
    body
}

/// Push a fully buffered payload to the session URL in a single PUT.
///
/// The session URL is pre-authorized, so no Authorization header is sent.
/// Any provider status >= 400 is surfaced with its body, never masked.
pub async fn relay_bytes(
    http: &reqwest::Client,
    upload_url: &str,
    mime_type: &str,
    payload: Bytes,
) -> Result<()> {
    let length = payload.len();
    let response = http
        .put(upload_url)
        .header(CONTENT_TYPE, mime_type)
        .header(CONTENT_LENGTH, length)
        .body(payload)
        .send()
        .await
        .map_err(|e| RelayError::upstream(format!("Upload request failed: {}", e)))?;

    let status = response.status();
    if status.as_u16() >= 400 {
        let body = response.text().await.unwrap_or_default();
        return Err(RelayError::Relay {
            status: status.as_u16(),
            body,
        });
    }

    info!("relayed {} bytes to upload session", length);
    Ok(())
}

/// Stream a fetched source into the session in Content-Range chunks,
/// resuming from the provider-confirmed offset on a failed chunk.
///
/// The chunked protocol needs the total size up front; a source without a
/// Content-Length falls back to a buffered single PUT.
pub async fn relay_stream(
    http: &reqwest::Client,
    upload_url: &str,
    mime_type: &str,
    source: reqwest::Response,
) -> Result<u64> {
    let total = match source.content_length() {
        Some(len) if len > 0 => len,
        _ => {
            let payload = source
                .bytes()
                .await
                .map_err(|e| RelayError::upstream(format!("Failed to read source: {}", e)))?;
            let length = payload.len() as u64;
            relay_bytes(http, upload_url, mime_type, payload).await?;
            return Ok(length);
        }
    };

    let mut stream = source.bytes_stream();
    let mut pending = BytesMut::with_capacity(CHUNK_SIZE as usize);
    let mut offset: u64 = 0;
    let mut resume_attempts: u32 = 0;
    let mut source_done = false;

    while !source_done || !pending.is_empty() {
        while !source_done && (pending.len() as u64) < CHUNK_SIZE {
            match stream.next().await {
                Some(chunk) => {
                    let chunk = chunk
                        .map_err(|e| RelayError::upstream(format!("Source stream error: {}", e)))?;
                    pending.extend_from_slice(&chunk);
                }
                None => source_done = true,
            }
        }

        let take = pending.len().min(CHUNK_SIZE as usize);
        if take == 0 {
            break;
        }
        let chunk = pending.split_to(take).freeze();
        if offset + chunk.len() as u64 > total {
            return Err(RelayError::upstream("Source exceeded its declared length"));
        }

        match put_chunk(http, upload_url, mime_type, chunk.clone(), offset, total).await {
            Ok(ChunkStatus::Complete) => return Ok(total),
            Ok(ChunkStatus::Incomplete) => offset += chunk.len() as u64,
            Err(e) => {
                resume_attempts += 1;
                if resume_attempts > MAX_RESUME_ATTEMPTS {
                    return Err(e);
                }
                warn!("chunk at offset {} failed, querying session: {}", offset, e);

                let confirmed = query_offset(http, upload_url, total).await?;
                if confirmed >= total {
                    return Ok(total);
                }
                if confirmed < offset || confirmed > offset + chunk.len() as u64 {
                    // The stream cannot rewind past the current chunk
                    return Err(e);
                }
                // Push the unsent tail back so the next chunk is refilled to
                // a full 256 KiB multiple, which non-final PUTs require
                let remainder = chunk.slice((confirmed - offset) as usize..);
                let mut rebuilt = BytesMut::with_capacity(remainder.len() + pending.len());
                rebuilt.extend_from_slice(&remainder);
                rebuilt.extend_from_slice(&pending);
                pending = rebuilt;
                offset = confirmed;
            }
        }
    }

    Err(RelayError::upstream(format!(
        "Source ended at {} of {} declared bytes",
        offset, total
    )))
}

enum ChunkStatus {
    /// Provider acknowledged the range and expects more (308)
    Incomplete,
    /// Provider accepted the final range; the file is complete
    Complete,
}

async fn put_chunk(
    http: &reqwest::Client,
    upload_url: &str,
    mime_type: &str,
    chunk: Bytes,
    offset: u64,
    total: u64,
) -> Result<ChunkStatus> {
    let response = http
        .put(upload_url)
        .header(CONTENT_TYPE, mime_type)
        .header(CONTENT_LENGTH, chunk.len())
        .header(CONTENT_RANGE, content_range(offset, chunk.len() as u64, total))
        .body(chunk)
        .send()
        .await
        .map_err(|e| RelayError::upstream(format!("Chunk upload failed: {}", e)))?;

    let status = response.status();
    // Drive reuses 308 as "Resume Incomplete"; it carries no Location
    // header, so the client hands it back instead of following a redirect
    if status.as_u16() == 308 {
        Ok(ChunkStatus::Incomplete)
    } else if status.is_success() {
        Ok(ChunkStatus::Complete)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Relay {
            status: status.as_u16(),
            body,
        })
    }
}

/// Ask the provider how many bytes of the session it has persisted
async fn query_offset(http: &reqwest::Client, upload_url: &str, total: u64) -> Result<u64> {
    let response = http
        .put(upload_url)
        .header(CONTENT_LENGTH, 0)
        .header(CONTENT_RANGE, probe_range(total))
        .send()
        .await
        .map_err(|e| RelayError::upstream(format!("Session status query failed: {}", e)))?;

    let status = response.status();
    if status.as_u16() == 308 {
        Ok(persisted_bytes(
            response.headers().get(RANGE).and_then(|v| v.to_str().ok()),
        ))
    } else if status.is_success() {
        Ok(total)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Relay {
            status: status.as_u16(),
            body,
        })
    }
}

/// "bytes start-end/total" for a chunk PUT; end is inclusive
fn content_range(start: u64, len: u64, total: u64) -> String {
    format!("bytes {}-{}/{}", start, start + len - 1, total)
}

/// "bytes */total" probe used to query the persisted offset
fn probe_range(total: u64) -> String {
    format!("bytes */{}", total)
}

/// Parse a provider "Range: bytes=0-N" header into a persisted byte count
fn persisted_bytes(range_header: Option<&str>) -> u64 {
    range_header
        .and_then(|h| h.strip_prefix("bytes=0-"))
        .and_then(|end| end.parse::<u64>().ok())
        .map(|end| end + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_first_and_final_chunk() {
        assert_eq!(content_range(0, CHUNK_SIZE, 20_000_000), "bytes 0-8388607/20000000");
        // Final chunk is smaller than CHUNK_SIZE
        assert_eq!(
            content_range(16_777_216, 3_222_784, 20_000_000),
            "bytes 16777216-19999999/20000000"
        );
    }

    #[test]
    fn test_probe_range() {
        assert_eq!(probe_range(1234), "bytes */1234");
    }

    #[test]
    fn test_persisted_bytes() {
        assert_eq!(persisted_bytes(Some("bytes=0-999")), 1000);
        assert_eq!(persisted_bytes(Some("bytes=0-0")), 1);
        assert_eq!(persisted_bytes(None), 0);
        assert_eq!(persisted_bytes(Some("garbage")), 0);
    }

    #[test]
    fn test_session_request_body_with_folder() {
        let body = session_request_body("clip.mp4", "video/mp4", Some("folder123"));
        assert_eq!(body["name"], "clip.mp4");
        assert_eq!(body["mimeType"], "video/mp4");
        assert_eq!(body["parents"][0], "folder123");
    }

    #[test]
    fn test_session_request_body_without_folder() {
        let body = session_request_body("clip.mp4", "video/mp4", None);
        assert!(body.get("parents").is_none());
    }

    #[test]
    fn test_upload_session_wire_shape() {
        let session = UploadSession {
            upload_url: "https://upload.example.com/session/1".into(),
            file_name: "clip.mp4".into(),
            mime_type: "video/mp4".into(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["uploadUrl"], "https://upload.example.com/session/1");
        assert_eq!(json["fileName"], "clip.mp4");
        assert_eq!(json["mimeType"], "video/mp4");
    }
}
