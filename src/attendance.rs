use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

static QR_CODE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

/// A syntactically valid attendance code, as printed on the QR code or barcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid QR code: {0:?}")]
pub struct InvalidCode(pub String);

impl QrCode {
    /// Trims the raw input and checks it against `[a-zA-Z0-9_-]+`.
    pub fn parse(raw: &str) -> Result<Self, InvalidCode> {
        let code = raw.trim();
        if QR_CODE_REGEX.is_match(code) {
            Ok(QrCode(code.to_string()))
        } else {
            Err(InvalidCode(code.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for QrCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize)]
pub struct CheckRequest<'a> {
    pub qr_code: &'a str,
}

/// Body of a successful check. Only `name` is required; other fields are kept as returned.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub status: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    pub detail: Option<String>,
}
