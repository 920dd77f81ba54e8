//! API request and response models.

use serde::{Deserialize, Serialize};

/// Form body of `POST /new`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUrlForm {
    #[serde(default)]
    pub url: String,
}

/// Response of `POST /new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUrlResponse {
    pub url: String,
    pub sha_key: String,
    pub total_downloads: usize,
}

/// Response of `DELETE /urls/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionResponse {
    pub deletion: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliveResponse {
    pub alive: bool,
}

/// Request to update the log filter.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

/// Response for logging configuration.
#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

/// A log target that can be tuned at runtime.
#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_url_response_uses_camel_case() {
        let json = serde_json::to_value(NewUrlResponse {
            url: "https://example.com/v".to_string(),
            sha_key: "abc".to_string(),
            total_downloads: 3,
        })
        .unwrap();

        assert_eq!(json["shaKey"], "abc");
        assert_eq!(json["totalDownloads"], 3);
    }
}
