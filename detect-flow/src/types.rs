use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Opaque user profile mapping, as saved by the profile screens.
pub type UserInfo = Map<String, Value>;

/// One medical record entry. The shape belongs to the server.
pub type MedicalRecord = Value;

/// Lifecycle phase of a detection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectPhase {
    #[default]
    Idle,
    Processing,
    Finished,
    Failed,
}

impl DetectPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, DetectPhase::Finished | DetectPhase::Failed)
    }
}

impl fmt::Display for DetectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectPhase::Idle => "idle",
            DetectPhase::Processing => "processing",
            DetectPhase::Finished => "finished",
            DetectPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Status plus progress percentage.
///
/// `progress` only carries meaning while [`DetectPhase::Processing`]; a finished job always
/// reports 100 and a failed one keeps the last value seen before the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectionStatus {
    pub status: DetectPhase,
    pub progress: u8,
}

impl DetectionStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn processing(progress: u8) -> Self {
        Self {
            status: DetectPhase::Processing,
            progress: progress.min(100),
        }
    }

    pub fn finished() -> Self {
        Self {
            status: DetectPhase::Finished,
            progress: 100,
        }
    }

    pub fn failed(last_progress: u8) -> Self {
        Self {
            status: DetectPhase::Failed,
            progress: last_progress.min(100),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Server acknowledgement for a started detection job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobAck {
    pub message: Option<String>,
}

/// Detection report, kept exactly as the server returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report(pub Value);

impl Report {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

/// Image modalities accepted by image detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageType {
    #[serde(rename = "MRI")]
    Mri,
    #[serde(rename = "CT")]
    Ct,
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::Mri => f.write_str("MRI"),
            ImageType::Ct => f.write_str("CT"),
        }
    }
}

impl std::str::FromStr for ImageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MRI" => Ok(ImageType::Mri),
            "CT" => Ok(ImageType::Ct),
            other => Err(format!("image type must be MRI or CT, got '{other}'")),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartDetectRequest<'a> {
    pub user_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartImageDetectRequest<'a> {
    pub user_id: &'a str,
    pub image_type: ImageType,
    pub file_id: &'a str,
}

/// Body of `api/detect/status`. `progress` is absent on some terminal answers.
#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    pub status: DetectPhase,
    #[serde(default)]
    pub progress: Option<i64>,
}

impl StatusResponse {
    pub fn into_status(self) -> DetectionStatus {
        let progress = self.progress.unwrap_or(0).clamp(0, 100) as u8;
        DetectionStatus {
            status: self.status,
            progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_uses_lowercase_wire_names() {
        let status = DetectionStatus::processing(40);
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            json!({"status": "processing", "progress": 40})
        );
    }

    #[test]
    fn status_response_without_progress_reads_zero() {
        let response: StatusResponse =
            serde_json::from_value(json!({"success": true, "status": "finished"})).unwrap();
        assert_eq!(
            response.into_status(),
            DetectionStatus {
                status: DetectPhase::Finished,
                progress: 0
            }
        );
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        let response: StatusResponse =
            serde_json::from_value(json!({"status": "processing", "progress": 140})).unwrap();
        assert_eq!(response.into_status().progress, 100);
    }

    #[test]
    fn image_request_uses_camel_case() {
        let body = StartImageDetectRequest {
            user_id: "u1",
            image_type: ImageType::Ct,
            file_id: "f-9",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"userId": "u1", "imageType": "CT", "fileId": "f-9"})
        );
    }

    #[test]
    fn image_type_parses_case_insensitively() {
        assert_eq!("mri".parse::<ImageType>().unwrap(), ImageType::Mri);
        assert!("xray".parse::<ImageType>().is_err());
    }
}
