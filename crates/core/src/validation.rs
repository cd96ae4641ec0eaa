//! Store-boundary validation: turns raw documents into typed records or a
//! structured list of field errors.

use crate::error::{CampaignError, CampaignResult, FieldError};
use crate::types::{Campaign, Decision, DeliveryReceipt, Subscription, Template, User};
use serde::de::DeserializeOwned;

/// Field-level checks that serde cannot express.
pub trait Validate {
    fn validate(&self) -> Vec<FieldError>;
}

/// Decode a document into `T` and run its field checks.
pub fn decode<T>(document: serde_json::Value) -> CampaignResult<T>
where
    T: DeserializeOwned + Validate,
{
    let record: T = serde_json::from_value(document)
        .map_err(|e| CampaignError::Validation(vec![FieldError::new("document", e.to_string())]))?;
    check(&record)?;
    Ok(record)
}

/// Run field checks on an already-typed record before it is written.
pub fn check<T: Validate>(record: &T) -> CampaignResult<()> {
    let errors = record.validate();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CampaignError::Validation(errors))
    }
}

/// `+` followed by 2 to 15 digits, the first of which is non-zero.
pub fn is_e164(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('+') else {
        return false;
    };
    let len = digits.len();
    (2..=15).contains(&len)
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0')
}

fn require(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
    }
}

impl Validate for User {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if !is_e164(&self.id) {
            errors.push(FieldError::new(
                "id",
                "phone number must be in E.164 format (e.g. +14155552671)",
            ));
        }
        errors
    }
}

impl Validate for Subscription {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require(&mut errors, "user_id", &self.user_id);
        require(&mut errors, "topic", &self.topic);
        errors
    }
}

impl Validate for Template {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require(&mut errors, "id", &self.id);
        require(&mut errors, "content", &self.content);
        errors
    }
}

impl Validate for Campaign {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        require(&mut errors, "id", &self.id);
        require(&mut errors, "topic", &self.topic);
        require(&mut errors, "template_id", &self.template_id);
        if self.rate_limit == Some(0) {
            errors.push(FieldError::new("rate_limit", "must be greater than zero"));
        }
        if let (Some(start), Some(end)) = (self.schedule.start_time, self.schedule.end_time) {
            if end < start {
                errors.push(FieldError::new("schedule.end_time", "must not precede start_time"));
            }
        }
        errors
    }
}

impl Validate for DeliveryReceipt {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match self.decision {
            Some(Decision::Sent) => {
                if self.provider_message_id.is_none() {
                    errors.push(FieldError::new(
                        "provider_message_id",
                        "required when decision is SENT",
                    ));
                }
            }
            Some(decision) => {
                if self.reason.as_deref().map_or(true, |r| r.trim().is_empty()) {
                    errors.push(FieldError::new(
                        "reason",
                        format!("required when decision is {}", decision.as_str()),
                    ));
                }
                if self.provider_message_id.is_some() {
                    errors.push(FieldError::new(
                        "provider_message_id",
                        "only set when decision is SENT",
                    ));
                }
            }
            None => {}
        }
        errors
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ConsentState;
    use serde_json::json;

    #[test]
    fn test_e164() {
        assert!(is_e164("+14155552671"));
        assert!(is_e164("+15"));
        assert!(!is_e164("14155552671"));
        assert!(!is_e164("+04155552671"));
        assert!(!is_e164("+1415555267a"));
        assert!(!is_e164("+1234567890123456"));
    }

    #[test]
    fn test_decode_user() {
        let user: User = decode(json!({
            "id": "+15550001111",
            "consent_state": "STOPPED",
            "attributes": {"name": "Ann"}
        }))
        .unwrap();
        assert_eq!(user.consent_state, ConsentState::Stopped);
        assert_eq!(user.attributes["name"], json!("Ann"));
    }

    #[test]
    fn test_decode_rejects_bad_phone() {
        let err = decode::<User>(json!({"id": "5550001111"})).unwrap_err();
        match err {
            CampaignError::Validation(errors) => assert_eq!(errors[0].field, "id"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_decode_reports_serde_failure_as_field_error() {
        let err = decode::<Campaign>(json!({"id": "c1"})).unwrap_err();
        match err {
            CampaignError::Validation(errors) => {
                assert_eq!(errors[0].field, "document");
                assert!(errors[0].message.contains("topic"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_campaign_rate_limit_zero_rejected() {
        let err = decode::<Campaign>(json!({
            "id": "c1", "topic": "T", "template_id": "t1", "rate_limit": 0
        }))
        .unwrap_err();
        assert!(err.to_string().contains("rate_limit"));
    }

    #[test]
    fn test_receipt_requires_reason_unless_sent() {
        let receipt: DeliveryReceipt = serde_json::from_value(json!({
            "id": "r1",
            "decision": "SKIPPED",
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(receipt.validate()[0].field, "reason");
    }
}
