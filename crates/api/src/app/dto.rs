use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mailqueue_core::{
    EmailTask, MAX_SUBJECT_LEN, MAX_TEMPLATE_NAME_LEN, ValidationError, sanitize_template_data,
};
use mailqueue_infra::mail::validate_address;

/// Most emails accepted by one bulk request.
pub const MAX_BULK_EMAILS: usize = 50;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

impl SendEmailRequest {
    /// Validate every field and shape the request into a task.
    ///
    /// All field problems are collected, not just the first.
    pub fn into_task(self) -> Result<EmailTask, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let to = self.to.trim();
        if to.is_empty() {
            errors.push(ValidationError::required("to"));
        } else if let Err(e) = validate_address(to) {
            errors.push(e);
        }

        let subject = self.subject.trim();
        check_text(&mut errors, "subject", subject, MAX_SUBJECT_LEN);

        let template_name = self.template_name.trim();
        check_text(&mut errors, "templateName", template_name, MAX_TEMPLATE_NAME_LEN);

        let Some(data) = self.data else {
            errors.push(ValidationError::required("data"));
            return Err(errors);
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(EmailTask::new(to, subject, template_name)
            .with_template_data(sanitize_template_data(data)))
    }
}

fn check_text(errors: &mut Vec<ValidationError>, field: &'static str, value: &str, max: usize) {
    if value.is_empty() {
        errors.push(ValidationError::required(field));
    } else if value.chars().count() > max {
        errors.push(ValidationError::too_long(field, max));
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkSendRequest {
    #[serde(default)]
    pub emails: Vec<SendEmailRequest>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub message: &'static str,
    pub details: QueuedDetails,
}

#[derive(Debug, Serialize)]
pub struct QueuedDetails {
    pub recipient: String,
    pub subject: String,
}

impl QueuedResponse {
    pub fn new(task: &EmailTask) -> Self {
        Self {
            message: "email was successfully added to the queue",
            details: QueuedDetails {
                recipient: task.to.clone(),
                subject: task.subject.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendResponse {
    pub message: &'static str,
    pub success_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_count: Option<usize>,
    pub success_emails: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_emails: Option<Vec<String>>,
}

impl BulkSendResponse {
    pub fn new(success_emails: Vec<String>, failed_emails: Vec<String>) -> Self {
        if failed_emails.is_empty() {
            Self {
                message: "all emails successfully queued",
                success_count: success_emails.len(),
                failed_count: None,
                success_emails,
                failed_emails: None,
            }
        } else {
            Self {
                message: "partial success in queueing emails",
                success_count: success_emails.len(),
                failed_count: Some(failed_emails.len()),
                success_emails,
                failed_emails: Some(failed_emails),
            }
        }
    }

    pub fn is_partial(&self) -> bool {
        self.failed_count.is_some()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use mailqueue_core::TemplateValue;

    fn request(value: Value) -> SendEmailRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn valid_request_is_trimmed_and_sanitized() {
        let task = request(json!({
            "to": "  a@x.com ",
            "subject": " Hi ",
            "templateName": " welcome ",
            "data": {"name": "  Bob ", "tags": ["a", "b"], "n": 2},
        }))
        .into_task()
        .unwrap();

        assert_eq!(task.to, "a@x.com");
        assert_eq!(task.subject, "Hi");
        assert_eq!(task.template_name, "welcome");
        assert_eq!(task.retries, 0);
        assert_eq!(task.data["name"], TemplateValue::Text("Bob".into()));
        assert_eq!(task.data["tags"], TemplateValue::Text(r#"["a","b"]"#.into()));
        assert_eq!(task.data["n"], TemplateValue::Int(2));
    }

    #[test]
    fn every_bad_field_is_reported() {
        let errors = request(json!({
            "to": "not-an-email",
            "subject": "x".repeat(MAX_SUBJECT_LEN + 1),
            "templateName": "",
        }))
        .into_task()
        .unwrap_err();

        let fields: Vec<_> = errors.iter().map(ValidationError::field).collect();
        assert_eq!(fields, vec!["to", "subject", "templateName", "data"]);
        assert!(matches!(errors[0], ValidationError::InvalidAddress(_)));
        assert!(matches!(errors[1], ValidationError::TooLong { max: 200, .. }));
    }

    #[test]
    fn empty_data_object_is_accepted() {
        let task = request(json!({
            "to": "a@x.com",
            "subject": "S",
            "templateName": "T",
            "data": {},
        }))
        .into_task()
        .unwrap();
        assert!(task.data.is_empty());
    }

    #[test]
    fn bulk_response_shape_depends_on_failures() {
        let all = serde_json::to_value(BulkSendResponse::new(vec!["a@x.com".into()], vec![])).unwrap();
        assert_eq!(all["successCount"], 1);
        assert!(all.get("failedCount").is_none());

        let partial = BulkSendResponse::new(vec!["a@x.com".into()], vec!["bad".into()]);
        assert!(partial.is_partial());
        let partial = serde_json::to_value(partial).unwrap();
        assert_eq!(partial["failedCount"], 1);
        assert_eq!(partial["failedEmails"], json!(["bad"]));
    }
}
