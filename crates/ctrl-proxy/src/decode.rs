//! Content-Encoding decoding for bodies that are about to be rewritten.

use std::io::Read;

use brotli::Decompressor;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported content-encoding: {0}")]
    Unsupported(String),
    #[error("corrupt {encoding} body: {source}")]
    Corrupt {
        encoding: &'static str,
        source: std::io::Error,
    },
    #[error("decoded body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Undo every coding listed in a `Content-Encoding` header value.
/// Codings are removed in reverse order of application. No stage may
/// produce more than `limit` bytes.
pub fn decode_body(content_encoding: Option<&str>, body: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let codings: Vec<String> = content_encoding
        .unwrap_or_default()
        .split(',')
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty() && c != "identity")
        .collect();

    let mut data = body.to_vec();
    for coding in codings.iter().rev() {
        data = match coding.as_str() {
            "gzip" | "x-gzip" => read_capped(GzDecoder::new(data.as_slice()), "gzip", limit)?,
            "deflate" => inflate(&data, limit)?,
            "br" => read_capped(Decompressor::new(data.as_slice(), 4096), "br", limit)?,
            other => return Err(DecodeError::Unsupported(other.to_string())),
        };
    }
    Ok(data)
}

/// `deflate` is specified as zlib-wrapped, but plenty of servers send raw
/// deflate streams under the same name.
fn inflate(data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    match read_capped(ZlibDecoder::new(data), "deflate", limit) {
        Err(DecodeError::Corrupt { .. }) => read_capped(DeflateDecoder::new(data), "deflate", limit),
        other => other,
    }
}

fn read_capped(reader: impl Read, encoding: &'static str, limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|source| DecodeError::Corrupt { encoding, source })?;
    if out.len() > limit {
        return Err(DecodeError::TooLarge { limit });
    }
    Ok(out)
}
