use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use feedwall_core::models::FilterSettings;

use crate::http::AppState;

/// Wire shape of the runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPayload {
    #[serde(rename = "hashTag")]
    pub hash_tag: String,
    pub channel: String,
    #[serde(rename = "isDisplayRT")]
    pub is_display_rt: bool,
}

impl From<FilterSettings> for SettingsPayload {
    fn from(settings: FilterSettings) -> Self {
        Self {
            hash_tag: settings.keyword,
            channel: settings.channel,
            is_display_rt: settings.show_reshares,
        }
    }
}

impl SettingsPayload {
    /// Read a settings body without rejecting it.
    ///
    /// A field that is missing or has the wrong type takes its zero value
    /// (`""` or `false`); a body that is not JSON at all yields all zero
    /// values.
    #[must_use]
    pub fn parse_lenient(body: &[u8]) -> Self {
        let value: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Self {
            hash_tag: text("hashTag"),
            channel: text("channel"),
            is_display_rt: value
                .get("isDisplayRT")
                .and_then(Value::as_bool)
                .unwrap_or_default(),
        }
    }
}

/// `GET /settings`
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsPayload> {
    Json(state.hub.settings().into())
}

/// `PUT /settings`: apply every field that differs, then `204`.
///
/// Keyword and channel changes return only after the matching upstream
/// connection has been retired.
pub async fn update_settings(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let request = SettingsPayload::parse_lenient(&body);
    let hub = &state.hub;

    let keyword = hub.set_keyword(&request.hash_tag).await;
    let channel = hub.set_channel(&request.channel).await;
    let reshares = hub.set_show_reshares(request.is_display_rt);

    info!(
        keyword = %request.hash_tag,
        keyword_outcome = ?keyword,
        channel = %request.channel,
        channel_outcome = ?channel,
        show_reshares = request.is_display_rt,
        reshares_changed = reshares,
        "Settings updated"
    );

    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_body() {
        let payload = SettingsPayload::parse_lenient(
            br##"{"hashTag":"#rust","channel":"#ferris","isDisplayRT":true}"##,
        );
        assert_eq!(
            payload,
            SettingsPayload {
                hash_tag: "#rust".to_string(),
                channel: "#ferris".to_string(),
                is_display_rt: true,
            }
        );
    }

    #[test]
    fn test_missing_and_mistyped_fields_take_zero_values() {
        let payload = SettingsPayload::parse_lenient(br##"{"hashTag":"#rust","isDisplayRT":"yes"}"##);

        assert_eq!(payload.hash_tag, "#rust");
        assert_eq!(payload.channel, "");
        assert!(!payload.is_display_rt);
    }

    #[test]
    fn test_non_json_body_is_all_zero() {
        let bodies: [&[u8]; 3] = [b"", b"not json", b"[1,2,3]"];
        for body in bodies {
            let payload = SettingsPayload::parse_lenient(body);
            assert_eq!(payload.hash_tag, "");
            assert_eq!(payload.channel, "");
            assert!(!payload.is_display_rt);
        }
    }

    #[test]
    fn test_serialized_field_names() {
        let payload = SettingsPayload::from(FilterSettings {
            channel: "#mogra".to_string(),
            keyword: "#mogra".to_string(),
            show_reshares: false,
        });
        let value = serde_json::to_value(payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"hashTag": "#mogra", "channel": "#mogra", "isDisplayRT": false})
        );
    }
}
