//! Image payloads for pipeline tests

/// Smallest byte string `image::guess_format` recognizes as PNG.
pub const PNG_IMAGE: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRpipeline-fixture";

/// JPEG magic followed by filler.
pub const JPEG_IMAGE: &[u8] = b"\xff\xd8\xff\xe0\0\x10JFIF\0pipeline-fixture";

/// Bytes that match no supported image format.
pub const NOT_AN_IMAGE: &[u8] = b"this is a plain text upload, not a photo";

pub const ALICE_SCANNER: &str = "/alice/scanner";
pub const BOB_SCANNER: &str = "/bob/scanner";
pub const BOB_NOTES: &str = "/bob/notes";
