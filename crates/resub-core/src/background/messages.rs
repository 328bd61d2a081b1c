//! Message protocol between page agents, the background and observers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Application, ReplacementInfo};

/// Every message, tagged by `action` as on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Message {
    /// Page agent → background on navigation.
    #[serde(rename = "APP_INIT")]
    AppInit { url: String },
    /// Background → page: filename → content (data URL) or dev-server URL.
    #[serde(rename = "GET_FILE_LIST")]
    GetFileList { data: BTreeMap<String, String> },
    /// Background → observers.
    #[serde(rename = "REPLACEMENT_UPDATED")]
    ReplacementUpdated(ReplacementPayload),
    #[serde(rename = "getResource", rename_all = "camelCase")]
    GetResource { file_name: String, url: String },
    /// Flip or set an application's `enabled` flag.
    #[serde(rename = "toggleEnabled")]
    ToggleEnabled {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enabled: Option<bool>,
    },
    #[serde(rename = "updateMatchPattern")]
    UpdateMatchPattern { id: String, pattern: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplacementPayload {
    Files { files: Vec<String> },
    Replacements { replacements: Vec<ReplacementInfo> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInitResponse {
    pub is_pattern: bool,
    pub app: Option<Application>,
}

impl AppInitResponse {
    pub fn no_match() -> Self {
        Self {
            is_pattern: false,
            app: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceResponse {
    pub fn found(data_url: String) -> Self {
        Self {
            exists: true,
            data_url: Some(data_url),
            error: None,
        }
    }

    pub fn missing() -> Self {
        Self {
            exists: false,
            data_url: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            exists: false,
            data_url: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub app: Application,
}

/// Response to a request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    AppInit(AppInitResponse),
    Resource(ResourceResponse),
    Updated(UpdateResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_parse_from_wire_shape() {
        let m: Message = serde_json::from_value(json!({"action": "APP_INIT", "url": "https://a/"})).unwrap();
        assert_eq!(m, Message::AppInit { url: "https://a/".into() });

        let m: Message = serde_json::from_value(
            json!({"action": "getResource", "fileName": "w.umd.js", "url": "https://a/w.umd.js"}),
        )
        .unwrap();
        assert_eq!(
            m,
            Message::GetResource {
                file_name: "w.umd.js".into(),
                url: "https://a/w.umd.js".into()
            }
        );

        let m: Message = serde_json::from_value(json!({"action": "toggleEnabled", "id": "a1"})).unwrap();
        assert_eq!(m, Message::ToggleEnabled { id: "a1".into(), enabled: None });
    }

    #[test]
    fn replacement_updated_payloads() {
        let files = Message::ReplacementUpdated(ReplacementPayload::Files {
            files: vec!["w.umd.js".into()],
        });
        assert_eq!(
            serde_json::to_value(&files).unwrap(),
            json!({"action": "REPLACEMENT_UPDATED", "files": ["w.umd.js"]})
        );
        let back: Message = serde_json::from_value(json!({
            "action": "REPLACEMENT_UPDATED",
            "replacements": [{"originalUrl": "o", "replacedUrl": "r", "appId": "a", "appName": "n"}]
        }))
        .unwrap();
        assert!(matches!(
            back,
            Message::ReplacementUpdated(ReplacementPayload::Replacements { replacements }) if replacements.len() == 1
        ));
    }

    #[test]
    fn resource_response_omits_empty_fields() {
        assert_eq!(serde_json::to_value(ResourceResponse::missing()).unwrap(), json!({"exists": false}));
        assert_eq!(
            serde_json::to_value(ResourceResponse::found("data:x".into())).unwrap(),
            json!({"exists": true, "dataUrl": "data:x"})
        );
    }
}
