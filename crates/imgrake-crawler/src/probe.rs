//! Image header probing
//!
//! Reads format and pixel dimensions from the first bytes of a payload without
//! decoding pixel data. Good enough to reject HTML error pages served with an
//! image URL and to apply size bounds.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Webp,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Webp => "webp",
        }
    }
}

/// Decoded image type and dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl ImageInfo {
    pub fn larger_side(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn smaller_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Payload does not start with a known image signature.
    UnknownFormat,
    /// Signature matched but the header is cut short or inconsistent.
    Truncated(ImageFormat),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFormat => write!(f, "not a recognised image format"),
            Self::Truncated(format) => write!(f, "truncated {} header", format.extension()),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Resource-decode capability used by validating strategies.
pub trait Decode: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<ImageInfo, ProbeError>;
}

/// [`Decode`] implementation that only inspects headers.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderProbe;

impl Decode for HeaderProbe {
    fn decode(&self, bytes: &[u8]) -> Result<ImageInfo, ProbeError> {
        probe(bytes)
    }
}

pub fn probe(b: &[u8]) -> Result<ImageInfo, ProbeError> {
    if b.starts_with(b"\x89PNG\r\n\x1a\n") {
        probe_png(b)
    } else if b.starts_with(b"GIF87a") || b.starts_with(b"GIF89a") {
        probe_gif(b)
    } else if b.starts_with(b"\xff\xd8") {
        probe_jpeg(b)
    } else if b.starts_with(b"BM") {
        probe_bmp(b)
    } else if b.len() >= 12 && &b[..4] == b"RIFF" && &b[8..12] == b"WEBP" {
        probe_webp(b)
    } else {
        Err(ProbeError::UnknownFormat)
    }
}

fn be16(b: &[u8], at: usize) -> Option<u32> {
    b.get(at..at + 2).map(|s| u16::from_be_bytes([s[0], s[1]]) as u32)
}

fn le16(b: &[u8], at: usize) -> Option<u32> {
    b.get(at..at + 2).map(|s| u16::from_le_bytes([s[0], s[1]]) as u32)
}

fn be32(b: &[u8], at: usize) -> Option<u32> {
    b.get(at..at + 4)
        .map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

fn le24(b: &[u8], at: usize) -> Option<u32> {
    b.get(at..at + 3)
        .map(|s| u32::from_le_bytes([s[0], s[1], s[2], 0]))
}

fn le32(b: &[u8], at: usize) -> Option<i32> {
    b.get(at..at + 4)
        .map(|s| i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

fn checked(format: ImageFormat, dims: Option<(u32, u32)>) -> Result<ImageInfo, ProbeError> {
    match dims {
        Some((width, height)) if width > 0 && height > 0 => Ok(ImageInfo {
            format,
            width,
            height,
        }),
        _ => Err(ProbeError::Truncated(format)),
    }
}

fn probe_png(b: &[u8]) -> Result<ImageInfo, ProbeError> {
    // IHDR must be the first chunk
    let dims = if b.get(12..16) == Some(&b"IHDR"[..]) {
        be32(b, 16).zip(be32(b, 20))
    } else {
        None
    };
    checked(ImageFormat::Png, dims)
}

fn probe_gif(b: &[u8]) -> Result<ImageInfo, ProbeError> {
    checked(ImageFormat::Gif, le16(b, 6).zip(le16(b, 8)))
}

fn probe_bmp(b: &[u8]) -> Result<ImageInfo, ProbeError> {
    // BITMAPINFOHEADER; height is negative for top-down bitmaps
    let dims = le32(b, 18)
        .zip(le32(b, 22))
        .map(|(w, h)| (w.unsigned_abs(), h.unsigned_abs()));
    checked(ImageFormat::Bmp, dims)
}

fn probe_jpeg(b: &[u8]) -> Result<ImageInfo, ProbeError> {
    let mut i = 2;
    while i + 4 <= b.len() {
        if b[i] != 0xff {
            break;
        }
        let marker = b[i + 1];
        // Fill bytes and standalone markers carry no length
        if marker == 0xff {
            i += 1;
            continue;
        }
        if marker == 0x01 || (0xd0..=0xd7).contains(&marker) {
            i += 2;
            continue;
        }
        let Some(len) = be16(b, i + 2) else { break };
        let is_sof = matches!(marker, 0xc0..=0xcf) && !matches!(marker, 0xc4 | 0xc8 | 0xcc);
        if is_sof {
            let dims = be16(b, i + 5).zip(be16(b, i + 7)).map(|(h, w)| (w, h));
            return checked(ImageFormat::Jpeg, dims);
        }
        if marker == 0xda || len < 2 {
            break;
        }
        i += 2 + len as usize;
    }
    Err(ProbeError::Truncated(ImageFormat::Jpeg))
}

fn probe_webp(b: &[u8]) -> Result<ImageInfo, ProbeError> {
    let dims = match b.get(12..16) {
        Some(b"VP8 ") => {
            // Key frame start code, then 14-bit dimensions
            if b.get(23..26) == Some(&[0x9d, 0x01, 0x2a][..]) {
                le16(b, 26).zip(le16(b, 28)).map(|(w, h)| (w & 0x3fff, h & 0x3fff))
            } else {
                None
            }
        }
        Some(b"VP8L") => {
            if b.get(20) == Some(&0x2f) {
                b.get(21..25).map(|s| {
                    let bits = u32::from_le_bytes([s[0], s[1], s[2], s[3]]);
                    ((bits & 0x3fff) + 1, ((bits >> 14) & 0x3fff) + 1)
                })
            } else {
                None
            }
        }
        Some(b"VP8X") => le24(b, 24).zip(le24(b, 27)).map(|(w, h)| (w + 1, h + 1)),
        _ => None,
    };
    checked(ImageFormat::Webp, dims)
}
