use serde_json::Value;
use std::sync::Arc;

use crate::client::require_user_id;
use crate::error::{DetectError, Result};
use crate::gateway::{HttpGateway, check_envelope, with_user_query};
use crate::types::{MedicalRecord, UserInfo};

/// One-shot profile and medical record calls. No lifecycle; results go straight to the caller.
#[derive(Clone)]
pub struct UserClient {
    gateway: Arc<dyn HttpGateway>,
}

impl UserClient {
    pub fn new(gateway: Arc<dyn HttpGateway>) -> Self {
        Self { gateway }
    }

    pub async fn save_basic_info(&self, info: &UserInfo) -> Result<()> {
        self.post("api/user/basic-info", info).await
    }

    pub async fn save_lifestyle(&self, lifestyle: &UserInfo) -> Result<()> {
        self.post("api/user/lifestyle", lifestyle).await
    }

    pub async fn save_symptoms(&self, symptoms: &UserInfo) -> Result<()> {
        self.post("api/user/symptoms", symptoms).await
    }

    /// Aggregated medical record (basic info, lifestyle, symptoms) for one user.
    pub async fn medical_record(&self, user_id: &str) -> Result<Value> {
        require_user_id(user_id)?;
        let body = self
            .get(&with_user_query("api/user/medical-record", user_id))
            .await?;
        Ok(field(body, "data"))
    }

    pub async fn profile(&self, user_id: &str) -> Result<UserInfo> {
        require_user_id(user_id)?;
        let body = self
            .get(&with_user_query("api/user/profile", user_id))
            .await?;
        match field(body, "profile") {
            Value::Object(profile) => Ok(profile),
            other => Err(DetectError::InvalidResponse(format!(
                "profile is not an object: {}",
                other
            ))),
        }
    }

    pub async fn medical_records(&self, user_id: &str) -> Result<Vec<MedicalRecord>> {
        require_user_id(user_id)?;
        let body = self
            .get(&with_user_query("api/user/medical-records", user_id))
            .await?;
        list_field(body, "records")
    }

    pub async fn delete_record(&self, record_id: &str) -> Result<()> {
        if record_id.trim().is_empty() {
            return Err(DetectError::caller("recordId must not be empty"));
        }
        let path = format!(
            "api/medical-record/delete/{}",
            urlencoding::encode(record_id)
        );
        check_envelope(self.gateway.delete(&path).await?)?;
        Ok(())
    }

    pub async fn symptoms_list(&self) -> Result<Vec<Value>> {
        let body = self.get("api/symptoms/list").await?;
        list_field(body, "symptoms")
    }

    pub async fn health_check(&self) -> Result<Value> {
        self.get("health").await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        check_envelope(self.gateway.get(path).await?)
    }

    async fn post(&self, path: &str, payload: &UserInfo) -> Result<()> {
        let body = Value::Object(payload.clone());
        check_envelope(self.gateway.post_json(path, body).await?)?;
        Ok(())
    }
}

fn field(body: Value, name: &str) -> Value {
    match body {
        Value::Object(mut map) => map.remove(name).unwrap_or_default(),
        _ => Value::Null,
    }
}

fn list_field(body: Value, name: &str) -> Result<Vec<Value>> {
    match field(body, name) {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(DetectError::InvalidResponse(format!(
            "{} is not a list: {}",
            name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGateway;
    use serde_json::json;

    fn object(value: Value) -> UserInfo {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn save_basic_info_posts_payload() {
        let gateway = ScriptedGateway::new();
        gateway.respond("api/user/basic-info", json!({"success": true, "message": "saved"}));
        let client = UserClient::new(gateway.clone());

        let info = object(json!({"userId": "u1", "age": 62, "gender": "female"}));
        client.save_basic_info(&info).await.unwrap();

        let call = &gateway.calls()[0];
        assert_eq!(call.method, "POST");
        assert_eq!(call.body, Some(Value::Object(info)));
    }

    #[tokio::test]
    async fn validation_failure_is_rejected() {
        let gateway = ScriptedGateway::new();
        gateway.respond(
            "api/user/symptoms",
            json!({"success": false, "message": "hasSymptoms must be yes or no"}),
        );
        let client = UserClient::new(gateway);

        let err = client
            .save_symptoms(&object(json!({"userId": "u1"})))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "hasSymptoms must be yes or no");
    }

    #[tokio::test]
    async fn records_are_unwrapped() {
        let gateway = ScriptedGateway::new();
        gateway.respond(
            "api/user/medical-records?userId=u1",
            json!({"success": true, "records": [{"id": "r1"}, {"id": "r2"}]}),
        );
        let client = UserClient::new(gateway);

        let records = client.medical_records("u1").await.unwrap();
        assert_eq!(records, vec![json!({"id": "r1"}), json!({"id": "r2"})]);
    }

    #[tokio::test]
    async fn missing_records_field_is_empty_list() {
        let gateway = ScriptedGateway::new();
        gateway.respond("api/user/medical-records?userId=u1", json!({"success": true}));
        let client = UserClient::new(gateway);
        assert!(client.medical_records("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn profile_must_be_an_object() {
        let gateway = ScriptedGateway::new();
        gateway.respond(
            "api/user/profile?userId=u1",
            json!({"success": true, "profile": {"name": "Chen", "age": 70}}),
        );
        gateway.respond(
            "api/user/profile?userId=u1",
            json!({"success": true, "profile": "Chen"}),
        );
        let client = UserClient::new(gateway);

        let profile = client.profile("u1").await.unwrap();
        assert_eq!(profile.get("age"), Some(&json!(70)));
        assert!(matches!(
            client.profile("u1").await,
            Err(DetectError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn delete_record_encodes_id() {
        let gateway = ScriptedGateway::new();
        gateway.respond(
            "api/medical-record/delete/a%2Fb",
            json!({"success": true, "message": "deleted"}),
        );
        let client = UserClient::new(gateway.clone());

        client.delete_record("a/b").await.unwrap();
        assert_eq!(gateway.calls()[0].method, "DELETE");
    }

    #[tokio::test]
    async fn symptoms_list_and_health() {
        let gateway = ScriptedGateway::new();
        gateway.respond(
            "api/symptoms/list",
            json!({"success": true, "symptoms": ["headache", "dizziness"]}),
        );
        gateway.respond("health", json!({"status": "ok"}));
        let client = UserClient::new(gateway);

        assert_eq!(
            client.symptoms_list().await.unwrap(),
            vec![json!("headache"), json!("dizziness")]
        );
        assert_eq!(client.health_check().await.unwrap(), json!({"status": "ok"}));
    }
}
