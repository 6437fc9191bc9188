//! Export contract for rendered records.
//!
//! Card layout and rasterization belong to the renderer; this module only fixes
//! the artifact name and hands out the photo raster for a completed record.
use crate::models::{IdentityRecord, PhotoPayloadError};

/// Raster formats an export can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("record has no generated photo yet")]
    MissingPhoto,
    #[error("stored photo is unreadable: {0}")]
    CorruptPhoto(#[from] PhotoPayloadError),
}

/// Deterministic file name for a record's export, e.g.
/// `residence_permit_Elif_Yilmaz.png`.
///
/// Anything outside `[A-Za-z0-9_-]` is replaced with `_` so the name is safe
/// as a path component and in a `Content-Disposition` header.
pub fn export_file_name(record: &IdentityRecord, format: ExportFormat) -> String {
    let data = record.data();
    let stem = format!("residence_permit_{}_{}", data.name, data.surname);
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.{}", stem, format.extension())
}

/// Decoded photo bytes of a completed record.
pub fn photo_bytes(record: &IdentityRecord) -> Result<Vec<u8>, ExportError> {
    let photo = record.photo_url().ok_or(ExportError::MissingPhoto)?;
    Ok(photo.decode_image()?)
}
