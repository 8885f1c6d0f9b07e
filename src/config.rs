use serde::Deserialize;

/// Settings of a mounted instance.
///
/// Deserializes from camelCase JSON; every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Directive attribute prefix, e.g. `ba-` for `ba-bind`.
    pub prefix: String,
    /// Register `{{ ... }}` text nodes during scans.
    pub interpolation: bool,
    /// Stamp every plain object in the state graph with an identity.
    pub identity: bool,
    pub identity_key: String,
    /// Events drained per operation before dispatch gives up.
    pub max_dispatch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            prefix: "ba-".to_string(),
            interpolation: true,
            identity: false,
            identity_key: "baId".to_string(),
            max_dispatch: 10_000,
        }
    }
}

impl Config {
    pub fn from_json(input: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// The full attribute name of `directive`, e.g. `ba-bind`.
    pub fn attr(&self, directive: &str) -> String {
        format!("{}{}", self.prefix, directive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config::from_json(r#"{"prefix": "x-", "maxDispatch": 5}"#).unwrap();
        assert_eq!(config.prefix, "x-");
        assert_eq!(config.max_dispatch, 5);
        assert!(config.interpolation);
        assert_eq!(config.identity_key, "baId");
        assert_eq!(config.attr("bind"), "x-bind");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Config::from_json(r#"{"prefx": "x-"}"#).is_err());
    }
}
