use crate::models::FileRef;
use serde::Serialize;
use std::path::Path;

/// Maximum file size: 50 MB
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Allowed MIME types: pitch decks, spreadsheets and text documents
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

#[derive(Debug, Clone, Serialize)]
pub struct ValidationRules {
    pub allowed_mimes: Vec<String>,
    pub max_file_size: u64,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            allowed_mimes: ALLOWED_MIME_TYPES.iter().map(|m| m.to_string()).collect(),
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Runs every local check a file must pass before it may be sent anywhere.
pub fn validate_file(file: &FileRef, rules: &ValidationRules) -> Result<(), ValidationError> {
    validate_file_name(&file.name)?;
    validate_mime_type(&file.mime_type, rules)?;
    validate_file_size(file.size, rules.max_file_size)?;
    Ok(())
}

/// Validates file size against maximum limit
pub fn validate_file_size(size: u64, max_size: u64) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError {
            code: "EMPTY_FILE",
            message: "File appears to be empty".to_string(),
        });
    }
    if size > max_size {
        return Err(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                size,
                max_size,
                max_size / 1024 / 1024
            ),
        });
    }
    Ok(())
}

/// Validates MIME type against allowlist
pub fn validate_mime_type(content_type: &str, rules: &ValidationRules) -> Result<(), ValidationError> {
    let normalized = normalize_mime(content_type);

    if rules
        .allowed_mimes
        .iter()
        .any(|allowed| normalize_mime(allowed) == normalized)
    {
        return Ok(());
    }

    Err(ValidationError {
        code: "INVALID_MIME_TYPE",
        message: format!(
            "File type '{}' is not supported. Upload PDF, PowerPoint, Excel or Word documents.",
            content_type
        ),
    })
}

/// Rejects names that carry no usable file name component
pub fn validate_file_name(filename: &str) -> Result<(), ValidationError> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .trim();

    if name.is_empty() {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// Lowercased essence of a content type, parameters stripped.
/// Falls back to a manual split for strings `mime` refuses to parse.
fn normalize_mime(content_type: &str) -> String {
    match content_type.trim().parse::<mime::Mime>() {
        Ok(parsed) => parsed.essence_str().to_lowercase(),
        Err(_) => content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase(),
    }
}
