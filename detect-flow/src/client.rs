use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{DetectError, Result};
use crate::gateway::{HttpGateway, check_envelope, with_user_query};
use crate::types::{
    DetectionStatus, ImageType, JobAck, Report, StartDetectRequest, StartImageDetectRequest,
    StatusResponse,
};

pub const START_PATH: &str = "api/detect/start";
pub const START_IMAGE_PATH: &str = "api/detect/image";
pub const STATUS_PATH: &str = "api/detect/status";
pub const REPORT_PATH: &str = "api/detect/report";

/// Single-shot calls against the detection endpoints.
///
/// Every method issues exactly one gateway request and returns a typed error; notifying the
/// user is left to the caller. Starting is not idempotent: calling `start` twice may create two
/// server-side jobs.
#[derive(Clone)]
pub struct DetectionClient {
    gateway: Arc<dyn HttpGateway>,
}

impl DetectionClient {
    pub fn new(gateway: Arc<dyn HttpGateway>) -> Self {
        Self { gateway }
    }

    pub async fn start(&self, user_id: &str) -> Result<JobAck> {
        require_user_id(user_id)?;
        let body = serde_json::to_value(StartDetectRequest { user_id })?;
        let response = self.gateway.post_json(START_PATH, body).await?;
        Ok(job_ack(check_envelope(response)?))
    }

    /// `file_id` must name a file uploaded earlier through the medical record upload.
    pub async fn start_image(
        &self,
        user_id: &str,
        image_type: ImageType,
        file_id: &str,
    ) -> Result<JobAck> {
        require_user_id(user_id)?;
        if file_id.trim().is_empty() {
            return Err(DetectError::caller("fileId must not be empty"));
        }
        let body = serde_json::to_value(StartImageDetectRequest {
            user_id,
            image_type,
            file_id,
        })?;
        let response = self.gateway.post_json(START_IMAGE_PATH, body).await?;
        Ok(job_ack(check_envelope(response)?))
    }

    pub async fn poll(&self, user_id: &str) -> Result<DetectionStatus> {
        require_user_id(user_id)?;
        let response = self
            .gateway
            .get(&with_user_query(STATUS_PATH, user_id))
            .await?;
        let body = check_envelope(response)?;
        let parsed: StatusResponse = serde_json::from_value(body)
            .map_err(|e| DetectError::InvalidResponse(format!("status body: {}", e)))?;
        let status = parsed.into_status();
        debug!(user_id, status = %status.status, progress = status.progress, "Polled detection status");
        Ok(status)
    }

    /// Only meaningful once the job reported `finished`; whatever the server sends is taken as-is.
    pub async fn fetch_report(&self, user_id: &str) -> Result<Report> {
        require_user_id(user_id)?;
        let response = self
            .gateway
            .get(&with_user_query(REPORT_PATH, user_id))
            .await?;
        let report = match check_envelope(response)? {
            Value::Object(mut body) if body.contains_key("report") => {
                body.remove("report").unwrap_or_default()
            }
            body => body,
        };
        Ok(Report(report))
    }
}

pub(crate) fn require_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(DetectError::caller("userId must not be empty"));
    }
    Ok(())
}

fn job_ack(body: Value) -> JobAck {
    JobAck {
        message: body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGateway;
    use crate::types::DetectPhase;
    use serde_json::json;

    fn client_with(gateway: &Arc<ScriptedGateway>) -> DetectionClient {
        DetectionClient::new(gateway.clone())
    }

    #[tokio::test]
    async fn start_posts_user_id() {
        let gateway = ScriptedGateway::new();
        gateway.respond(START_PATH, json!({"success": true, "message": "started"}));

        let ack = client_with(&gateway).start("u1").await.unwrap();
        assert_eq!(ack.message.as_deref(), Some("started"));

        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "POST");
        assert_eq!(calls[0].body, Some(json!({"userId": "u1"})));
    }

    #[tokio::test]
    async fn start_with_empty_user_is_caller_error_without_request() {
        let gateway = ScriptedGateway::new();
        let err = client_with(&gateway).start("").await.unwrap_err();
        assert!(matches!(err, DetectError::CallerError(_)));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn start_rejected_by_server() {
        let gateway = ScriptedGateway::new();
        gateway.respond(START_PATH, json!({"success": false, "message": "User not found"}));

        let err = client_with(&gateway).start("u1").await.unwrap_err();
        assert_eq!(err.user_message(), "User not found");
    }

    #[tokio::test]
    async fn start_image_sends_typed_body() {
        let gateway = ScriptedGateway::new();
        gateway.respond(START_IMAGE_PATH, json!({"success": true}));

        client_with(&gateway)
            .start_image("u1", ImageType::Mri, "file-7")
            .await
            .unwrap();
        assert_eq!(
            gateway.calls()[0].body,
            Some(json!({"userId": "u1", "imageType": "MRI", "fileId": "file-7"}))
        );
    }

    #[tokio::test]
    async fn start_image_requires_file_id() {
        let gateway = ScriptedGateway::new();
        let err = client_with(&gateway)
            .start_image("u1", ImageType::Ct, " ")
            .await
            .unwrap_err();
        assert!(matches!(err, DetectError::CallerError(_)));
    }

    #[tokio::test]
    async fn poll_reads_status_and_progress() {
        let gateway = ScriptedGateway::new();
        gateway.respond(
            "api/detect/status?userId=u1",
            json!({"success": true, "status": "processing", "progress": 40}),
        );

        let status = client_with(&gateway).poll("u1").await.unwrap();
        assert_eq!(status, DetectionStatus::processing(40));
    }

    #[tokio::test]
    async fn poll_with_unknown_status_is_invalid_response() {
        let gateway = ScriptedGateway::new();
        gateway.respond(
            "api/detect/status?userId=u1",
            json!({"success": true, "status": "exploded"}),
        );

        let err = client_with(&gateway).poll("u1").await.unwrap_err();
        assert!(matches!(err, DetectError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn poll_network_failure_passes_through() {
        let gateway = ScriptedGateway::new();
        let err = client_with(&gateway).poll("u1").await.unwrap_err();
        assert!(matches!(err, DetectError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn report_is_unwrapped_from_envelope() {
        let gateway = ScriptedGateway::new();
        gateway.respond(
            "api/detect/report?userId=u1",
            json!({"success": true, "report": {"score": 7}}),
        );

        let report = client_with(&gateway).fetch_report("u1").await.unwrap();
        assert_eq!(report, Report(json!({"score": 7})));
    }

    #[tokio::test]
    async fn report_without_field_uses_whole_body() {
        let gateway = ScriptedGateway::new();
        gateway.respond(
            "api/detect/report?userId=u1",
            json!({"riskLevel": "low", "status": "finished"}),
        );

        let report = client_with(&gateway).fetch_report("u1").await.unwrap();
        assert_eq!(report.get("riskLevel"), Some(&json!("low")));
        assert_eq!(
            serde_json::from_value::<DetectPhase>(report.get("status").unwrap().clone()).unwrap(),
            DetectPhase::Finished
        );
    }
}
