//! Rendering: compositing the captured surface and encoding the result

pub mod compose;
pub mod encode;

pub use compose::{compose, output_dimensions, Background, Composite};
pub use encode::{check_output_size, encode};

use std::fmt;
use std::str::FromStr;

use base64::Engine as Base64Engine;
use serde::{Deserialize, Serialize};

/// Output encodings. `Png` is lossless and keeps alpha; the others are
/// composited onto an opaque background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }

    /// Whether the output keeps an alpha channel
    pub fn preserves_alpha(&self) -> bool {
        matches!(self, ImageFormat::Png)
    }

    /// Whether `quality` affects the output
    pub fn is_lossy(&self) -> bool {
        matches!(self, ImageFormat::Jpeg | ImageFormat::Webp)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        };
        f.write_str(name)
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(format!("unknown image format '{}' (expected png, jpeg or webp)", other)),
        }
    }
}

/// An encoded image tagged with its MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    data: Vec<u8>,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl Blob {
    pub fn new(data: Vec<u8>, format: ImageFormat, width: u32, height: u32) -> Self {
        Self { data, format, width, height }
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Pixel width of the encoded image
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Pixel height of the encoded image
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Re-encode the bytes as `data:<mime>;base64,<payload>`.
    pub fn to_data_url(&self) -> String {
        let payload = base64::engine::general_purpose::STANDARD.encode(&self.data);
        format!("data:{};base64,{}", self.mime_type(), payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_mime_types() {
        assert_eq!(ImageFormat::Png.mime_type(), "image/png");
        assert_eq!(ImageFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(ImageFormat::Webp.mime_type(), "image/webp");
    }

    #[test]
    fn format_parses_aliases() {
        assert_eq!("JPG".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!("webp".parse::<ImageFormat>().unwrap(), ImageFormat::Webp);
        assert!("gif".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn only_png_is_lossless() {
        assert!(!ImageFormat::Png.is_lossy());
        assert!(ImageFormat::Jpeg.is_lossy());
        assert!(ImageFormat::Webp.is_lossy());
    }

    #[test]
    fn format_serializes_lowercase() {
        let json = serde_json::to_string(&ImageFormat::Jpeg).unwrap();
        assert_eq!(json, "\"jpeg\"");
    }

    #[test]
    fn data_url_is_base64_of_bytes() {
        let blob = Blob::new(b"hello".to_vec(), ImageFormat::Png, 1, 1);
        assert_eq!(blob.to_data_url(), "data:image/png;base64,aGVsbG8=");
    }
}
