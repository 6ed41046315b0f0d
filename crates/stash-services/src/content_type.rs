//! Content-type sniffing from the leading bytes of an upload.

use stash_core::constants::{CONTENT_SNIFF_LEN, DEFAULT_CONTENT_TYPE};
use stash_storage::ObjectReader;
use std::io::Cursor;
use tokio::io::AsyncReadExt;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Fixed-offset magic numbers, checked in order.
const MAGIC: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"PK\x03\x04", "application/zip"),
    (b"PK\x05\x06", "application/zip"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
    (b"OggS\x00", "application/ogg"),
    (b"ID3", "audio/mpeg"),
];

fn riff_kind(data: &[u8]) -> Option<&'static str> {
    if data.len() < 12 || &data[..4] != b"RIFF" {
        return None;
    }
    match &data[8..12] {
        b"WEBP" => Some("image/webp"),
        b"WAVE" => Some("audio/wave"),
        _ => None,
    }
}

fn is_mp4(data: &[u8]) -> bool {
    data.len() >= 12 && &data[4..8] == b"ftyp"
}

fn is_mp3_frame(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && matches!(data[1], 0xFB | 0xF3 | 0xF2)
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Markup detected after leading whitespace.
fn markup_kind(data: &[u8]) -> Option<&'static str> {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let rest = &data[start..];

    const HTML: &[&[u8]] = &[
        b"<!doctype html",
        b"<html",
        b"<head",
        b"<body",
        b"<script",
        b"<!--",
    ];
    if HTML.iter().any(|p| starts_with_ignore_case(rest, p)) {
        return Some("text/html; charset=utf-8");
    }
    if rest.starts_with(b"<?xml") {
        return Some("text/xml; charset=utf-8");
    }
    None
}

/// No bytes outside printable text, tolerating a multi-byte sequence cut at the end.
fn is_text(data: &[u8]) -> bool {
    let valid = match std::str::from_utf8(data) {
        Ok(_) => data,
        Err(e) if e.error_len().is_none() => &data[..e.valid_up_to()],
        Err(_) => return false,
    };
    !valid
        .iter()
        .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0C))
        && !valid.contains(&0x7F)
}

fn looks_like_json(data: &[u8]) -> bool {
    data.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| matches!(b, b'{' | b'['))
}

/// Detect a content type from at most the first 512 bytes of a payload.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(CONTENT_SNIFF_LEN)];
    if data.is_empty() {
        return TEXT_PLAIN;
    }

    if let Some(kind) = markup_kind(data) {
        return kind;
    }
    if let Some((_, kind)) = MAGIC.iter().find(|(magic, _)| data.starts_with(magic)) {
        return kind;
    }
    if let Some(kind) = riff_kind(data) {
        return kind;
    }
    if is_mp4(data) {
        return "video/mp4";
    }
    if is_mp3_frame(data) {
        return "audio/mpeg";
    }
    if is_text(data) {
        if looks_like_json(data) {
            return "application/json";
        }
        return TEXT_PLAIN;
    }
    DEFAULT_CONTENT_TYPE
}

/// Read the sniff window off `reader` and hand back a reader that still yields
/// the whole payload.
pub async fn sniff_reader(mut reader: ObjectReader) -> std::io::Result<(String, ObjectReader)> {
    let mut head = vec![0u8; CONTENT_SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let n = reader.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);

    let content_type = sniff_content_type(&head).to_string();
    let chained: ObjectReader = Box::pin(Cursor::new(head).chain(reader));
    Ok((content_type, chained))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_numbers() {
        assert_eq!(sniff_content_type(b"%PDF-1.7\n%..."), "application/pdf");
        assert_eq!(
            sniff_content_type(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            "image/png"
        );
        assert_eq!(sniff_content_type(b"\xFF\xD8\xFF\xE0\0\x10JFIF"), "image/jpeg");
        assert_eq!(sniff_content_type(b"GIF89a\x01\0\x01\0"), "image/gif");
        assert_eq!(sniff_content_type(b"PK\x03\x04\x14\0\0\0"), "application/zip");
        assert_eq!(sniff_content_type(b"\x1F\x8B\x08\0\0\0"), "application/x-gzip");
        assert_eq!(sniff_content_type(b"OggS\0\x02\0\0"), "application/ogg");
        assert_eq!(sniff_content_type(b"ID3\x04\0\0\0\0"), "audio/mpeg");
    }

    #[test]
    fn test_container_formats() {
        assert_eq!(
            sniff_content_type(b"RIFF\x24\0\0\0WEBPVP8 "),
            "image/webp"
        );
        assert_eq!(sniff_content_type(b"RIFF\x24\0\0\0WAVEfmt "), "audio/wave");
        assert_eq!(
            sniff_content_type(b"\0\0\0\x18ftypmp42\0\0\0\0"),
            "video/mp4"
        );
    }

    #[test]
    fn test_text_formats() {
        assert_eq!(
            sniff_content_type(b"  <!DOCTYPE html><html></html>"),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            sniff_content_type(b"<?xml version=\"1.0\"?><a/>"),
            "text/xml; charset=utf-8"
        );
        assert_eq!(
            sniff_content_type(b"\n{\"key\": [1, 2]}"),
            "application/json"
        );
        assert_eq!(sniff_content_type(b"hello, world\n"), TEXT_PLAIN);
        assert_eq!(sniff_content_type(b""), TEXT_PLAIN);
    }

    #[test]
    fn test_binary_falls_back_to_octet_stream() {
        assert_eq!(
            sniff_content_type(&[0x00, 0x01, 0x02, 0xFE]),
            DEFAULT_CONTENT_TYPE
        );
    }

    #[test]
    fn test_utf8_cut_at_window_edge_is_text() {
        let mut data = vec![b'a'; CONTENT_SNIFF_LEN - 1];
        data.extend_from_slice("é".as_bytes());
        assert_eq!(sniff_content_type(&data), TEXT_PLAIN);
    }

    #[tokio::test]
    async fn test_sniff_reader_keeps_full_payload() {
        let mut payload = b"%PDF-1.4\n".to_vec();
        payload.extend(std::iter::repeat_n(b'x', 4096));
        let reader: ObjectReader = Box::pin(Cursor::new(payload.clone()));

        let (content_type, mut chained) = sniff_reader(reader).await.unwrap();
        assert_eq!(content_type, "application/pdf");

        let mut out = Vec::new();
        chained.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn test_sniff_reader_short_payload() {
        let reader: ObjectReader = Box::pin(Cursor::new(b"hi".to_vec()));
        let (content_type, mut chained) = sniff_reader(reader).await.unwrap();
        assert_eq!(content_type, TEXT_PLAIN);

        let mut out = Vec::new();
        chained.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hi");
    }
}
