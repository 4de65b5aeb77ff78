//! Best-effort mime type detection for job outputs.

use std::path::Path;

pub const DEFAULT_BINARY_MIME_TYPE: &str = "application/octet-stream";

/// Guesses the mime type of some content.
pub trait MimeSniffer: Send + Sync {
    /// `filename` is a hint only. Implementations fall back to
    /// [`DEFAULT_BINARY_MIME_TYPE`] rather than failing.
    fn sniff(&self, head: &[u8], filename: &str) -> String;
}

/// Checks well-known magic numbers, then the file extension.
#[derive(Clone, Copy, Debug, Default)]
pub struct MagicSniffer;

const MAGIC: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"BZh", "application/x-bzip2"),
    (b"\xfd7zXZ\x00", "application/x-xz"),
    (b"\x7fELF", "application/x-executable"),
    (b"<?xml", "application/xml"),
];

const EXTENSIONS: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("log", "text/plain"),
    ("csv", "text/csv"),
    ("tsv", "text/tab-separated-values"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("md", "text/markdown"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
];

impl MimeSniffer for MagicSniffer {
    fn sniff(&self, head: &[u8], filename: &str) -> String {
        if let Some((_, mime)) = MAGIC.iter().find(|(magic, _)| head.starts_with(magic)) {
            return mime.to_string();
        }

        let by_extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .and_then(|ext| {
                EXTENSIONS
                    .iter()
                    .find(|(known, _)| *known == ext)
                    .map(|(_, mime)| *mime)
            });
        if let Some(mime) = by_extension {
            return mime.to_string();
        }

        if !head.is_empty() && looks_like_text(head) {
            return "text/plain".to_string();
        }
        DEFAULT_BINARY_MIME_TYPE.to_string()
    }
}

/// Valid UTF-8, allowing the head to end partway through a character.
fn looks_like_text(head: &[u8]) -> bool {
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_beats_extension() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(MagicSniffer.sniff(png, "plot.txt"), "image/png");
    }

    #[test]
    fn falls_back_to_extension_then_text_then_binary() {
        assert_eq!(MagicSniffer.sniff(b"{}", "out.JSON"), "application/json");
        assert_eq!(MagicSniffer.sniff(b"hello\n", "out"), "text/plain");
        assert_eq!(
            MagicSniffer.sniff(&[0x00, 0xff, 0xfe], "out.bin"),
            DEFAULT_BINARY_MIME_TYPE
        );
        assert_eq!(MagicSniffer.sniff(b"", "out"), DEFAULT_BINARY_MIME_TYPE);
    }

    #[test]
    fn text_cut_inside_a_character_is_still_text() {
        let text = "é".repeat(8);
        let head = &text.as_bytes()[..text.len() - 1];
        assert_eq!(MagicSniffer.sniff(head, "notes"), "text/plain");

        let mut broken = text.into_bytes();
        broken[4] = 0xff;
        assert_eq!(MagicSniffer.sniff(&broken, "notes"), DEFAULT_BINARY_MIME_TYPE);
    }
}
