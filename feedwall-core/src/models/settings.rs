use serde::{Deserialize, Serialize};

use crate::config::HubConfig;

/// Upstream filters that can be changed while the process runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Chat channel the chat source is joined to
    pub channel: String,
    /// Keyword the stream source tracks
    pub keyword: String,
    /// Whether reshares from the stream source are delivered
    pub show_reshares: bool,
}

impl From<&HubConfig> for FilterSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            channel: config.default_channel.clone(),
            keyword: config.default_keyword.clone(),
            show_reshares: config.show_reshares,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hub_config() {
        let settings = FilterSettings::from(&HubConfig::default());
        assert_eq!(settings.channel, "#mogra");
        assert_eq!(settings.keyword, "#mogra");
        assert!(!settings.show_reshares);
    }
}
