use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Raw registry export as published by the open-data portal.
    pub raw_path: String,
    /// Cleaned registry produced by the `clean` step and consumed by
    /// everything downstream.
    pub clean_path: String,
    /// Directory holding the persisted pipeline artifact and its metrics.
    pub models_dir: String,
    /// Where the rendered dashboard page is written.
    pub dashboard_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            raw_path: "data/relacao-pessoas-vacinadas-covid19-recife.csv".into(),
            clean_path: "data/relacao-pessoas-limpo.csv".into(),
            models_dir: "models".into(),
            dashboard_path: "dashboard.html".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_round_trip() {
        let config = Config {
            raw_path: "raw.csv".into(),
            ..Default::default()
        };
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(r#"models_dir = "elsewhere""#).unwrap();
        assert_eq!(config.models_dir, "elsewhere");
        assert_eq!(config.clean_path, Config::default().clean_path);
    }
}
