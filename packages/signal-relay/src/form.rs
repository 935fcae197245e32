use crate::error::{RelayError, RelayResult};
use crate::types::{StreamKind, StreamRegistration};
use serde::{Deserialize, Serialize};

/// Maximum length of a stream name
const MAX_STREAM_NAME_LENGTH: usize = 256;

/// Registration form rendered by the platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormSchema {
    pub sections: Vec<FormSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormSection {
    pub kind: SectionKind,
    pub title: String,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Tab,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormField {
    Combobox {
        key: String,
        label: String,
        options: Vec<String>,
        default: String,
        required: bool,
    },
    Text {
        key: String,
        label: String,
        default: String,
        required: bool,
    },
    Button {
        key: String,
        label: String,
        action: ButtonAction,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ButtonAction {
    pub method: String,
    pub url: String,
    pub payload_fields: Vec<String>,
}

/// Build the stream registration form.
///
/// `base_url` is where the relay itself is reachable.
pub fn registration_form(base_url: &str) -> FormSchema {
    let connection = FormSection {
        kind: SectionKind::Tab,
        title: "Connection".to_string(),
        fields: vec![
            FormField::Combobox {
                key: "stream_type".to_string(),
                label: "Stream Connection Type".to_string(),
                options: vec![
                    StreamKind::Consumer.to_string(),
                    StreamKind::Producer.to_string(),
                ],
                default: StreamKind::Consumer.to_string(),
                required: true,
            },
            FormField::Text {
                key: "stream_name".to_string(),
                label: "Stream Name".to_string(),
                default: String::new(),
                required: true,
            },
        ],
    };

    let actions = FormSection {
        kind: SectionKind::Group,
        title: "Actions".to_string(),
        fields: vec![FormField::Button {
            key: "start_button".to_string(),
            label: "Visit".to_string(),
            action: ButtonAction {
                method: "POST".to_string(),
                url: format!("{}/start", base_url.trim_end_matches('/')),
                payload_fields: vec!["stream_type".to_string(), "stream_name".to_string()],
            },
        }],
    };

    FormSchema {
        sections: vec![connection, actions],
    }
}

/// Parse and validate a submitted registration form
pub fn parse_registration(data: &serde_json::Value) -> RelayResult<StreamRegistration> {
    let stream_type = match data.get("stream_type").and_then(|v| v.as_str()) {
        Some("consumer") => StreamKind::Consumer,
        Some("producer") => StreamKind::Producer,
        Some(other) => {
            return Err(RelayError::InvalidInput(format!(
                "Unknown stream type: {}",
                other
            )))
        }
        None => {
            return Err(RelayError::InvalidInput(
                "stream_type is required".to_string(),
            ))
        }
    };

    let stream_name = data
        .get("stream_name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();

    if stream_name.is_empty() {
        return Err(RelayError::InvalidInput(
            "stream_name is required".to_string(),
        ));
    }
    if stream_name.len() > MAX_STREAM_NAME_LENGTH {
        return Err(RelayError::InvalidInput(
            "stream_name too long".to_string(),
        ));
    }

    Ok(StreamRegistration {
        stream_type,
        stream_name: stream_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_form_layout() {
        let form = registration_form("http://127.0.0.1:9000/");
        assert_eq!(form.sections.len(), 2);
        assert_eq!(form.sections[0].title, "Connection");

        match &form.sections[1].fields[0] {
            FormField::Button { action, .. } => {
                assert_eq!(action.url, "http://127.0.0.1:9000/start");
                assert_eq!(action.payload_fields, vec!["stream_type", "stream_name"]);
            }
            other => panic!("expected button, got {:?}", other),
        }

        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["sections"][0]["fields"][0]["type"], "combobox");
        assert_eq!(json["sections"][0]["fields"][0]["default"], "consumer");
    }

    #[test]
    fn test_parse_registration() {
        let parsed = parse_registration(&json!({
            "stream_type": "producer",
            "stream_name": "  plant-1  "
        }))
        .unwrap();
        assert_eq!(parsed.stream_type, StreamKind::Producer);
        assert_eq!(parsed.stream_name, "plant-1");
    }

    #[test]
    fn test_parse_registration_rejects_bad_input() {
        assert!(parse_registration(&json!({"stream_name": "x"})).is_err());
        assert!(parse_registration(&json!({"stream_type": "sideways", "stream_name": "x"})).is_err());
        assert!(parse_registration(&json!({"stream_type": "consumer", "stream_name": "  "})).is_err());
        assert!(parse_registration(&json!({
            "stream_type": "consumer",
            "stream_name": "n".repeat(300)
        }))
        .is_err());
    }
}
