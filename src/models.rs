use base64::{engine::general_purpose, Engine as _};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

// ============ Cell Values ============

/// A single spreadsheet cell as it arrives from the workbook.
///
/// Cells are carried through untouched; interpretation (date formatting,
/// prompt building) happens at the point of use.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Text cell.
    Text(String),
    /// Numeric cell (integers are widened).
    Number(f64),
    /// Boolean cell.
    Bool(bool),
    /// Date or date-time cell, truncated to the calendar date.
    Date(NaiveDate),
    /// Absent cell, error cell, or a date that could not be decoded.
    Blank,
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Blank)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(text) => f.write_str(text),
            // Whole numbers (ages, ID numbers) print without a trailing ".0"
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Date(date) => write!(f, "{}", date.format("%d.%m.%Y")),
            CellValue::Blank => Ok(()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(text: &str) -> Self {
        CellValue::Text(text.to_string())
    }
}

// ============ Identity Records ============

/// The personal columns of one spreadsheet row.
///
/// Serializes with the original column names so API consumers see the same
/// keys they uploaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PersonalData {
    pub name: CellValue,
    pub surname: CellValue,
    pub nationality: CellValue,
    pub birthdate: CellValue,
    pub mother_name: CellValue,
    pub father_name: CellValue,
    #[serde(rename = "IDNumber")]
    pub id_number: CellValue,
    pub permit_type: CellValue,
    pub valid_from: CellValue,
    pub valid_until: CellValue,
    /// Only used to build the generation prompt.
    pub gender: CellValue,
    /// Only used to build the generation prompt.
    pub age: CellValue,
}

/// One ingested row plus its photo enrichment state.
///
/// The personal data is fixed at ingestion. The generation state is the only
/// mutable part and only moves through the guarded transition methods, which
/// keeps "has a photo" and "is completed" in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    data: PersonalData,
    generation: GenerationState,
}

impl IdentityRecord {
    /// Creates a record that has not been enriched yet.
    pub fn new(data: PersonalData) -> Self {
        Self {
            data,
            generation: GenerationState::NotStarted,
        }
    }

    pub fn data(&self) -> &PersonalData {
        &self.data
    }

    pub fn generation_state(&self) -> &GenerationState {
        &self.generation
    }

    /// The generated photo, present exactly when generation completed.
    pub fn photo_url(&self) -> Option<&PhotoUri> {
        match &self.generation {
            GenerationState::Completed { photo_url } => Some(photo_url),
            _ => None,
        }
    }

    pub fn is_generating(&self) -> bool {
        matches!(self.generation, GenerationState::InProgress)
    }

    /// Moves `NotStarted`/`Failed` to `InProgress`.
    ///
    /// Returns `false` without touching the state when a request is already in
    /// flight or a photo already exists.
    pub fn begin_generation(&mut self) -> bool {
        if !self.generation.accepts_request() {
            return false;
        }
        self.generation = GenerationState::InProgress;
        true
    }

    /// Moves `InProgress` to `Completed`. Any other starting state is rejected.
    pub fn complete_generation(&mut self, photo_url: PhotoUri) -> bool {
        if !self.is_generating() {
            return false;
        }
        self.generation = GenerationState::Completed { photo_url };
        true
    }

    /// Moves `InProgress` to `Failed`. Any other starting state is rejected.
    pub fn fail_generation(&mut self, reason: FailureReason) -> bool {
        if !self.is_generating() {
            return false;
        }
        self.generation = GenerationState::Failed { reason };
        true
    }
}

/// Stable identity of a record: the load that produced it and its row index
/// within that load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RecordId {
    pub load: Uuid,
    pub index: usize,
}

// ============ Generation State ============

/// Lifecycle of a record's photo enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationState {
    NotStarted,
    InProgress,
    Completed { photo_url: PhotoUri },
    /// Retry-eligible, same as `NotStarted` for a new request.
    Failed { reason: FailureReason },
}

impl GenerationState {
    /// Whether a new generation request may start from this state.
    pub fn accepts_request(&self) -> bool {
        matches!(
            self,
            GenerationState::NotStarted | GenerationState::Failed { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            GenerationState::NotStarted => "not_started",
            GenerationState::InProgress => "in_progress",
            GenerationState::Completed { .. } => "completed",
            GenerationState::Failed { .. } => "failed",
        }
    }
}

/// Why a generation attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// No response arrived within the bounded wait.
    #[error("Image generation timed out. Please try again.")]
    Timeout,
    /// The service answered with a non-success status.
    #[error("API request failed: {status} - {message}")]
    Api { status: u16, message: String },
    /// Success status, but no usable image in the payload.
    #[error("No image data found in API response.")]
    UnknownResponse,
    /// The request never produced an HTTP response.
    #[error("Request to image service failed: {message}")]
    Transport { message: String },
    /// The caller cancelled the in-flight request.
    #[error("Image generation was cancelled.")]
    Cancelled,
}

// ============ Photos ============

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Errors turning a service payload into a photo.
#[derive(Debug, thiserror::Error)]
pub enum PhotoPayloadError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Opaque photo reference handed to renderers: a PNG data URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PhotoUri(String);

impl PhotoUri {
    /// Wraps a base64 PNG payload after checking it decodes.
    pub fn from_base64_png(payload: &str) -> Result<Self, PhotoPayloadError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(PhotoPayloadError::Empty);
        }
        general_purpose::STANDARD.decode(payload)?;
        Ok(Self(format!("{}{}", PNG_DATA_URI_PREFIX, payload)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw PNG bytes behind the data URI.
    pub fn decode_image(&self) -> Result<Vec<u8>, PhotoPayloadError> {
        let payload = self.0.trim_start_matches(PNG_DATA_URI_PREFIX);
        Ok(general_purpose::STANDARD.decode(payload)?)
    }
}

impl fmt::Display for PhotoUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
pub(crate) fn sample_personal_data(name: &str) -> PersonalData {
    PersonalData {
        name: name.into(),
        surname: "Yilmaz".into(),
        nationality: "German".into(),
        birthdate: CellValue::Date(NaiveDate::from_ymd_opt(1990, 5, 1).unwrap()),
        mother_name: "Ayse".into(),
        father_name: "Mehmet".into(),
        id_number: CellValue::Number(99123456789.0),
        permit_type: "Short Term".into(),
        valid_from: "01.01.2024".into(),
        valid_until: CellValue::Blank,
        gender: "female".into(),
        age: CellValue::Number(34.0),
    }
}
