//! Video download paths: segmented direct download, ffmpeg HLS remux,
//! and Mega's encrypted CDN stream.

use aes::Aes128;
use anyhow::{Context, Result};
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use futures::StreamExt;
use reqwest::Client;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::resolvers::{self, BROWSER_UA, mega, packed};

const SEGMENT_CONNECTIONS: u64 = 8;
const SEGMENT_RETRIES: u32 = 3;
const DIRECT_TIMEOUT: Duration = Duration::from_secs(3600);
const FFMPEG_TIMEOUT: Duration = Duration::from_secs(7200);

type MegaCipher = Ctr128BE<Aes128>;

fn is_hls(url: &str) -> bool {
    url.to_lowercase().contains(".m3u8")
}

fn is_mega(url: &str) -> bool {
    mega::parse_embed(url).is_some()
}

fn is_packed_embed(url: &str) -> bool {
    resolvers::requires_embed_archival(url) && !is_mega(url)
}

/// Download `url` into `dest`, dispatching on what the URL actually is:
/// Mega embeds decrypt from the CDN, packed embeds re-resolve fresh so the
/// CDN token binds to this process's network, playlists remux through
/// ffmpeg, everything else goes through the segmented downloader.
pub async fn fetch_video(client: &Client, url: &str, dest: &Path) -> Result<()> {
    if is_mega(url) {
        return download_mega(client, url, dest).await;
    }

    if is_packed_embed(url) {
        let fresh = packed::resolve(client, url)
            .await
            .context("embed re-resolve returned nothing")?;
        info!(url = %fresh, "re-resolved embed for download");
        return download_hls_ffmpeg(&fresh, dest).await;
    }

    if is_hls(url) {
        return download_hls_ffmpeg(url, dest).await;
    }

    download_segmented(client, url, dest).await
}

/// Copy-codec HLS remux into an MP4 container. Internal reconnects stay
/// off: mixing segments from two token-bound URLs corrupts the stream.
async fn download_hls_ffmpeg(url: &str, dest: &Path) -> Result<()> {
    let mut command = Command::new("ffmpeg");
    command
        .arg("-y")
        .args(["-user_agent", BROWSER_UA])
        .args(["-allowed_extensions", "ALL"])
        .args(["-protocol_whitelist", "file,http,https,tcp,tls,crypto"])
        .args(["-reconnect", "0"])
        .args(["-reconnect_streamed", "0"])
        .args(["-reconnect_on_network_error", "0"])
        .args(["-i", url])
        .args(["-c", "copy"])
        .args(["-bsf:a", "aac_adtstoasc"])
        .arg(dest)
        .kill_on_drop(true)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped());

    info!(url = %url, "ffmpeg HLS download started");
    let execution = timeout(FFMPEG_TIMEOUT, command.output())
        .await
        .context("ffmpeg timed out")?;
    let output = execution.context("ffmpeg failed to spawn")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .chars()
            .rev()
            .take(500)
            .collect::<String>()
            .chars()
            .rev()
            .collect();
        anyhow::bail!("ffmpeg exited with {}: {tail}", output.status);
    }

    verify_output(dest).await
}

/// Multi-connection downloader for plain CDN URLs: probe for range
/// support, split into fixed spans, fetch them concurrently with retries.
async fn download_segmented(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let probe = client
        .get(url)
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .header(reqwest::header::RANGE, "bytes=0-0")
        .timeout(Duration::from_secs(60))
        .send()
        .await
        .context("range probe failed")?;

    let total = probe
        .headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|v| v.parse::<u64>().ok());

    let ranged = probe.status() == reqwest::StatusCode::PARTIAL_CONTENT;
    drop(probe);

    match (ranged, total) {
        (true, Some(total)) if total > SEGMENT_CONNECTIONS => {
            download_ranged(client, url, dest, total).await
        }
        _ => {
            debug!(url = %url, "no usable range support, falling back to single stream");
            download_single(client, url, dest).await
        }
    }
}

async fn download_ranged(client: &Client, url: &str, dest: &Path, total: u64) -> Result<()> {
    File::create(dest)
        .await
        .with_context(|| format!("creating {}", dest.display()))?
        .set_len(total)
        .await?;

    let span = total.div_ceil(SEGMENT_CONNECTIONS);
    info!(url = %url, total, connections = SEGMENT_CONNECTIONS, "segmented download started");

    let tasks: Vec<_> = (0..SEGMENT_CONNECTIONS)
        .filter_map(|i| {
            let start = i * span;
            if start >= total {
                return None;
            }
            let end = (start + span - 1).min(total - 1);
            let client = client.clone();
            let url = url.to_string();
            let dest = dest.to_path_buf();
            Some(tokio::spawn(async move {
                fetch_span(&client, &url, &dest, start, end).await
            }))
        })
        .collect();

    for task in tasks {
        task.await.context("segment task panicked")??;
    }

    verify_output(dest).await
}

async fn fetch_span(client: &Client, url: &str, dest: &Path, start: u64, end: u64) -> Result<()> {
    let mut last_error = None;

    for attempt in 0..SEGMENT_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        match try_fetch_span(client, url, dest, start, end).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(start, end, attempt, error = %e, "segment fetch failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("segment fetch failed")))
}

async fn try_fetch_span(
    client: &Client,
    url: &str,
    dest: &Path,
    start: u64,
    end: u64,
) -> Result<()> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .header(reqwest::header::RANGE, format!("bytes={start}-{end}"))
        .timeout(DIRECT_TIMEOUT)
        .send()
        .await?;

    if response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
        anyhow::bail!("expected 206 for span, got {}", response.status());
    }

    let mut file = OpenOptions::new().write(true).open(dest).await?;
    file.seek(SeekFrom::Start(start)).await?;

    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    let expected = end - start + 1;
    if written != expected {
        anyhow::bail!("span {start}-{end} wrote {written} of {expected} bytes");
    }
    Ok(())
}

async fn download_single(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .timeout(DIRECT_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;

    verify_output(dest).await
}

/// Mega download: resolve the node to its CDN URL, then decrypt the
/// AES-128-CTR payload while streaming so the ciphertext never lands on
/// disk.
async fn download_mega(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let (node_id, key_b64) =
        mega::parse_embed(url).context("not a recognisable Mega embed URL")?;
    if key_b64.is_empty() {
        anyhow::bail!("Mega URL carries no key fragment; payload cannot be decrypted");
    }
    let (aes_key, nonce) = mega::decode_key(&key_b64).context("Mega key fragment malformed")?;

    let node = mega::fetch_node(client, &node_id)
        .await
        .context("Mega node resolution failed")?;
    info!(node = %node_id, size = node.size, "Mega CDN URL obtained");

    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&nonce);
    let mut cipher = MegaCipher::new(&aes_key.into(), &iv.into());

    let response = client
        .get(&node.cdn_url)
        .header(reqwest::header::USER_AGENT, BROWSER_UA)
        .timeout(DIRECT_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let mut chunk = chunk?.to_vec();
        cipher.apply_keystream(&mut chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    verify_output(dest).await
}

async fn verify_output(dest: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(dest)
        .await
        .with_context(|| format!("output {} missing", dest.display()))?;
    if metadata.len() == 0 {
        anyhow::bail!("output {} is empty", dest.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_classification() {
        assert!(is_hls("https://cdn.example/stream/index.m3u8?t=1"));
        assert!(!is_hls("https://cdn.example/video.mp4"));
        assert!(is_mega("https://mega.nz/embed/NODE#key"));
        assert!(is_packed_embed("https://vidhidepro.com/v/abc"));
        assert!(!is_packed_embed("https://mega.nz/embed/NODE#key"));
    }

    #[test]
    fn test_mega_ctr_keystream_roundtrip() {
        let key = [7u8; 16];
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let plaintext = b"streaming decrypt must be chunk-order independent".to_vec();

        let mut whole = plaintext.clone();
        let mut cipher = MegaCipher::new(&key.into(), &iv.into());
        cipher.apply_keystream(&mut whole);

        // Same bytes through two sequential chunks.
        let mut chunked = plaintext.clone();
        let mut cipher = MegaCipher::new(&key.into(), &iv.into());
        let (a, b) = chunked.split_at_mut(17);
        cipher.apply_keystream(a);
        cipher.apply_keystream(b);

        assert_eq!(whole, chunked);
    }
}
