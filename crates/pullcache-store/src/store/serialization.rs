use anyhow::{Context, Result, bail};
use bytes::Bytes;

use super::types::StoredResponse;

// Frame layout: u32 big-endian header length, JSON header, raw body.
const LEN_PREFIX: usize = 4;

pub fn encode(entry: &StoredResponse) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(entry).context("serializing stored response header")?;
    let len = u32::try_from(header.len()).context("stored response header too large")?;

    let mut out = Vec::with_capacity(LEN_PREFIX + header.len() + entry.body.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&entry.body);
    Ok(out)
}

/// Decodes the header only, leaving the body empty.
pub fn decode_header(raw: &[u8]) -> Result<StoredResponse> {
    let (header, _) = split_frame(raw)?;
    serde_json::from_slice(header).context("parsing stored response header")
}

/// Body size carried by a frame, without parsing the header.
pub fn body_len(raw: &[u8]) -> Result<u64> {
    let (_, body) = split_frame(raw)?;
    Ok(body.len() as u64)
}

pub fn decode(raw: &[u8]) -> Result<StoredResponse> {
    let (header, body) = split_frame(raw)?;
    let mut entry: StoredResponse =
        serde_json::from_slice(header).context("parsing stored response header")?;
    entry.body = Bytes::copy_from_slice(body);
    Ok(entry)
}

fn split_frame(raw: &[u8]) -> Result<(&[u8], &[u8])> {
    let Some((prefix, rest)) = raw.split_first_chunk::<LEN_PREFIX>() else {
        bail!("stored response frame truncated: {} bytes", raw.len());
    };
    let len = u32::from_be_bytes(*prefix) as usize;
    if rest.len() < len {
        bail!(
            "stored response frame truncated: header needs {len} bytes, {} available",
            rest.len()
        );
    }
    Ok(rest.split_at(len))
}
