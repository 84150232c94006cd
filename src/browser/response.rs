use std::collections::HashMap;
use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

/// A fully buffered HTTP response with the body already decompressed.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    /// Final URL after any redirects the client followed.
    pub url: String,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Body as text. Invalid UTF-8 is replaced rather than rejected since
    /// scripts mostly scrape pages that lie about their encoding anyway.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }
}

/// Decode a response body according to its `Content-Encoding` header.
///
/// Only the first encoding token is honored. Servers in the wild send
/// "deflate" meaning either zlib-wrapped or raw streams, so zlib is tried
/// first with raw deflate as the fallback. Unknown encodings pass through
/// untouched.
pub fn decompress_body(content_encoding: Option<&str>, raw: Vec<u8>) -> std::io::Result<Vec<u8>> {
    let token = content_encoding
        .unwrap_or("")
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match token.as_str() {
        "gzip" => {
            let mut out = Vec::new();
            GzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
            Ok(out)
        }
        "deflate" => {
            let mut out = Vec::new();
            match ZlibDecoder::new(raw.as_slice()).read_to_end(&mut out) {
                Ok(_) => Ok(out),
                Err(_) => {
                    let mut out = Vec::new();
                    DeflateDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
                    Ok(out)
                }
            }
        }
        _ => Ok(raw),
    }
}
