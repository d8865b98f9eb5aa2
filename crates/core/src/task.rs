//! The email task: one unit of queued delivery work.

use serde::{Deserialize, Deserializer, Serialize};

use crate::data::{TemplateData, TemplateValue};
use crate::error::{DecodeError, ValidationError};

/// Maximum subject length accepted at intake (characters).
pub const MAX_SUBJECT_LEN: usize = 200;

/// Maximum template name length accepted at intake (characters).
pub const MAX_TEMPLATE_NAME_LEN: usize = 50;

/// One email-delivery work item.
///
/// The serialized form is the queue entry itself:
///
/// ```json
/// {"to":"a@x.com","subject":"Hi","templateName":"welcome","data":{"name":"Bob"},"retries":1}
/// ```
///
/// `retries` is omitted while it is zero and defaults to zero when absent.
/// Once a task is on the queue, `retries` is the only field that ever changes,
/// and only by being re-enqueued through [`EmailTask::requeued`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTask {
    pub to: String,
    pub subject: String,
    pub template_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: TemplateData,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retries: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<TemplateData, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<TemplateData>::deserialize(deserializer)?.unwrap_or_default())
}

impl EmailTask {
    /// Create a first-attempt task with no template data.
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        template_name: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            template_name: template_name.into(),
            data: TemplateData::new(),
            retries: 0,
        }
    }

    /// Add a template value.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<TemplateValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Replace the template data wholesale.
    pub fn with_template_data(mut self, data: TemplateData) -> Self {
        self.data = data;
        self
    }

    /// Reject tasks that cannot possibly be delivered.
    ///
    /// This is the check the queue applies on every enqueue (including
    /// requeues): recipient, subject and template name must be non-empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.to.trim().is_empty() {
            return Err(ValidationError::required("to"));
        }
        if self.subject.trim().is_empty() {
            return Err(ValidationError::required("subject"));
        }
        if self.template_name.trim().is_empty() {
            return Err(ValidationError::required("templateName"));
        }
        Ok(())
    }

    /// Length limits applied to intake requests.
    pub fn validate_limits(&self) -> Result<(), ValidationError> {
        if self.subject.chars().count() > MAX_SUBJECT_LEN {
            return Err(ValidationError::too_long("subject", MAX_SUBJECT_LEN));
        }
        if self.template_name.chars().count() > MAX_TEMPLATE_NAME_LEN {
            return Err(ValidationError::too_long("templateName", MAX_TEMPLATE_NAME_LEN));
        }
        Ok(())
    }

    /// The same task, one attempt further along.
    pub fn requeued(&self) -> Self {
        Self {
            retries: self.retries.saturating_add(1),
            ..self.clone()
        }
    }

    /// Encode into a queue entry.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a queue entry.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
