//! session.json document and camera identity parsing

use serde::{Deserialize, Serialize};

/// Template name that carries "Model (Serial)"
const CAMERA_NAME_TEMPLATE: &str = "[Camera Name]";

/// Session document served at `/session.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DccSession {
    pub name: String,
    pub folder: String,
    pub counter: u64,
    #[serde(default)]
    pub files: Vec<SessionFile>,
}

/// A file entry in the session document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionFile {
    pub file_name: String,
    pub short_name: String,
    #[serde(default)]
    pub file_name_templates: Vec<FileNameTemplate>,
}

/// Name/value pair used by the server's file naming templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileNameTemplate {
    pub name: String,
    pub value: String,
}

/// Camera identity as reported by the control server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DccCameraInfo {
    pub model: String,
    pub serial: String,
    /// False when the server runs without a camera attached
    pub connected: bool,
}

impl DccSession {
    /// Raw `[Camera Name]` value from the first file entry, if any
    pub fn camera_name(&self) -> Option<&str> {
        self.files
            .first()?
            .file_name_templates
            .iter()
            .find(|t| t.name == CAMERA_NAME_TEMPLATE)
            .map(|t| t.value.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    /// Camera identity derived from the session document
    pub fn camera_info(&self) -> DccCameraInfo {
        match self.camera_name() {
            Some(name) => DccCameraInfo::parse(name),
            None => DccCameraInfo {
                model: "No camera".to_string(),
                serial: "unknown".to_string(),
                connected: false,
            },
        }
    }
}

impl DccCameraInfo {
    /// Parse "Canon EOS RP (401029001101)" into model and serial.
    /// Other formats keep the whole string as the model.
    pub fn parse(camera_name: &str) -> Self {
        let trimmed = camera_name.trim();

        let split = trimmed
            .strip_suffix(')')
            .and_then(|rest| rest.rfind('(').map(|idx| (&rest[..idx], &rest[idx + 1..])))
            .filter(|(model, serial)| {
                !model.trim().is_empty()
                    && !serial.is_empty()
                    && serial.chars().all(|c| c.is_ascii_digit())
            });

        match split {
            Some((model, serial)) => Self {
                model: model.trim().to_string(),
                serial: serial.to_string(),
                connected: true,
            },
            None => Self {
                model: trimmed.to_string(),
                serial: "unknown".to_string(),
                connected: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_and_serial() {
        let info = DccCameraInfo::parse("Canon EOS RP (401029001101)");
        assert_eq!(info.model, "Canon EOS RP");
        assert_eq!(info.serial, "401029001101");
        assert!(info.connected);
    }

    #[test]
    fn test_parse_unexpected_format() {
        let info = DccCameraInfo::parse("Nikon D750 (abc)");
        assert_eq!(info.model, "Nikon D750 (abc)");
        assert_eq!(info.serial, "unknown");
        assert!(info.connected);
    }

    #[test]
    fn test_session_without_camera() {
        let json = r#"{"Name":"Default","Folder":"C:\\Pictures","Counter":3,"Files":[]}"#;
        let session: DccSession = serde_json::from_str(json).unwrap();
        let info = session.camera_info();
        assert!(!info.connected);
        assert_eq!(info.model, "No camera");
    }

    #[test]
    fn test_session_with_camera_template() {
        let json = r#"{
            "Name": "Default",
            "Folder": "C:\\Pictures\\digiCamControl\\Session1",
            "Counter": 12,
            "Files": [{
                "FileName": "DSC_0012.jpg",
                "ShortName": "DSC_0012",
                "FileNameTemplates": [
                    {"Name": "[Date]", "Value": "2024-01-01"},
                    {"Name": "[Camera Name]", "Value": "Canon EOS R6 (123456)"}
                ]
            }]
        }"#;
        let session: DccSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.camera_name(), Some("Canon EOS R6 (123456)"));
        let info = session.camera_info();
        assert_eq!(info.model, "Canon EOS R6");
        assert_eq!(info.serial, "123456");
    }
}
