use serde::{Deserialize, Serialize};
use std::str::FromStr;
use crate::utils::HdrError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    JPEG,
    PNG,
    TIFF,
    WebP,
    BMP,
}

impl ImageFormat {
    /// MIME type advertised to the download surface
    pub fn mime(&self) -> &'static str {
        match self {
            Self::JPEG => "image/jpeg",
            Self::PNG => "image/png",
            Self::TIFF => "image/tiff",
            Self::WebP => "image/webp",
            Self::BMP => "image/bmp",
        }
    }

    /// Get file extensions associated with this format
    pub fn extensions(&self) -> &[&str] {
        match self {
            Self::JPEG => &["jpg", "jpeg"],
            Self::PNG => &["png"],
            Self::TIFF => &["tif", "tiff"],
            Self::WebP => &["webp"],
            Self::BMP => &["bmp"],
        }
    }

    /// Get the primary extension for this format
    pub fn primary_extension(&self) -> &str {
        self.extensions()[0]
    }

    /// Whether the engine may emit this format as a merge result
    pub fn is_merge_output(&self) -> bool {
        matches!(self, Self::PNG | Self::TIFF)
    }

    /// Identifies a payload by its magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', ..] => Some(Self::PNG),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(Self::TIFF),
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::JPEG),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::WebP),
            [b'B', b'M', ..] => Some(Self::BMP),
            _ => None,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = HdrError;

    fn from_str(ext: &str) -> Result<Self, Self::Err> {
        let ext = ext.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Ok(Self::JPEG),
            "png" => Ok(Self::PNG),
            "tif" | "tiff" => Ok(Self::TIFF),
            "webp" => Ok(Self::WebP),
            "bmp" => Ok(Self::BMP),
            _ => Err(HdrError::format(format!(
                "Unsupported image format: {}", ext
            ))),
        }
    }
}

/// Get format from file extension
pub fn format_from_extension(path: &str) -> Result<ImageFormat, HdrError> {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| HdrError::format(
            format!("File has no extension: {}", path)
        ))?;

    ImageFormat::from_str(ext)
}

/// MIME type for a file name, `None` when it is not a recognised image
pub fn mime_for_name(name: &str) -> Option<&'static str> {
    format_from_extension(name).ok().map(|f| f.mime())
}
