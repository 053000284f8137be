use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::config::SosConfig;
use crate::model::LocationFix;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedAlert {
    pub location_url: String,
    pub message: String,
    /// `message` percent-encoded for a URL query component.
    pub encoded_message: String,
}

/// Builds the emergency text and map link. Pure and deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertComposer {
    map_base_url: String,
    app_name: String,
}

impl AlertComposer {
    pub fn new(map_base_url: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            map_base_url: map_base_url.into(),
            app_name: app_name.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &SosConfig) -> Self {
        Self::new(config.map_base_url.clone(), config.app_name.clone())
    }

    /// `f64` `Display` is the shortest text that round-trips, so no precision
    /// from the fix is lost.
    #[must_use]
    pub fn location_url(&self, fix: LocationFix) -> String {
        format!(
            "{}?q={},{}",
            self.map_base_url.trim_end_matches('/'),
            fix.latitude(),
            fix.longitude()
        )
    }

    #[must_use]
    pub fn compose(&self, owner_name: &str, fix: LocationFix) -> ComposedAlert {
        let location_url = self.location_url(fix);
        let message = format!(
            "🚨 EMERGENCY ALERT 🚨\n\n{owner_name} needs help urgently!\n\nLocation: {location_url}\n\nThis is an automated emergency message from {}.",
            self.app_name
        );
        let encoded_message = encode_component(&message);
        ComposedAlert {
            location_url,
            message,
            encoded_message,
        }
    }
}

/// Form encoding writes spaces as `+` and escapes a literal `+` as `%2B`, so
/// every remaining `+` is a space and can be rewritten to `%20`.
fn encode_component(text: &str) -> String {
    form_urlencoded::byte_serialize(text.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composer() -> AlertComposer {
        AlertComposer::from_config(&SosConfig::default())
    }

    fn johannesburg() -> LocationFix {
        LocationFix::new(-26.2041, 28.0473).unwrap()
    }

    #[test]
    fn map_link_matches_expected_format() {
        let alert = composer().compose("Thandi", johannesburg());
        assert_eq!(
            alert.location_url,
            "https://www.google.com/maps?q=-26.2041,28.0473"
        );
    }

    #[test]
    fn message_embeds_name_and_link() {
        let alert = composer().compose("Thandi", johannesburg());
        assert!(alert.message.contains("Thandi needs help urgently!"));
        assert!(alert
            .message
            .contains("Location: https://www.google.com/maps?q=-26.2041,28.0473"));
        assert!(alert.message.starts_with("🚨 EMERGENCY ALERT 🚨"));
        assert!(alert.message.ends_with("from SAFEHIVE."));
    }

    #[test]
    fn high_precision_coordinates_survive() {
        let fix = LocationFix::new(-33.924_868_123, 18.424_055_987).unwrap();
        let url = composer().location_url(fix);
        assert_eq!(url, "https://www.google.com/maps?q=-33.924868123,18.424055987");
    }

    #[test]
    fn encoded_message_is_query_safe() {
        let alert = composer().compose("A+B & Co", johannesburg());
        let encoded = &alert.encoded_message;
        assert!(!encoded.contains(' '));
        assert!(!encoded.contains('\n'));
        assert!(!encoded.contains('&'));
        assert!(!encoded.contains('+'));
        assert!(encoded.contains("%20"));
        assert!(encoded.contains("A%2BB%20%26%20Co"));

        let decoded: String = form_urlencoded::parse(format!("t={encoded}").as_bytes())
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(decoded, alert.message);
    }

    #[test]
    fn composition_is_deterministic() {
        let c = composer();
        assert_eq!(c.compose("Sam", johannesburg()), c.compose("Sam", johannesburg()));
    }
}
