//! Interpretation of decoded QR badge text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::checkin::CheckInRequest;

/// Separator used by plain-text badges: `"<name> - <email>"`.
const PLAIN_SEPARATOR: &str = " - ";

/// Badge text that cannot become a check-in request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QrError {
    /// Not JSON and not the plain badge form.
    #[error("Unable to parse QR code data")]
    Unparseable,
    /// Parsed, but `name` or `email` is absent or blank.
    #[error("Missing name or email in QR code")]
    MissingField,
}

/// Attendee identity carried by a badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrIdentity {
    /// Name as printed on the badge.
    pub name: String,
    /// Email as printed on the badge.
    pub email: String,
}

impl QrIdentity {
    /// Request body for `POST /checkin`.
    pub fn into_request(self) -> CheckInRequest {
        CheckInRequest::new(self.name, self.email)
    }
}

/// Parses badge text into a name/email pair.
///
/// Accepts a JSON object, a JSON object written with single quotes, or the
/// plain `"<name> - <email>"` form.
pub fn parse_payload(text: &str) -> Result<QrIdentity, QrError> {
    let text = text.trim();

    let object = serde_json::from_str::<Value>(text)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&text.replace('\'', "\"")).ok());

    match object {
        Some(Value::Object(map)) => {
            let field = |key: &str| {
                map.get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            match (field("name"), field("email")) {
                (Some(name), Some(email)) => Ok(QrIdentity { name, email }),
                _ => Err(QrError::MissingField),
            }
        }
        Some(_) => Err(QrError::Unparseable),
        None => parse_plain(text),
    }
}

fn parse_plain(text: &str) -> Result<QrIdentity, QrError> {
    let (name, email) = text.rsplit_once(PLAIN_SEPARATOR).ok_or(QrError::Unparseable)?;
    let (name, email) = (name.trim(), email.trim());
    if !email.contains('@') {
        return Err(QrError::Unparseable);
    }
    if name.is_empty() {
        return Err(QrError::MissingField);
    }
    Ok(QrIdentity {
        name: name.to_string(),
        email: email.to_string(),
    })
}

/// Canonical badge text for a registration.
pub fn encode_payload(name: &str, email: &str) -> String {
    serde_json::json!({ "name": name.trim(), "email": email.trim() }).to_string()
}
