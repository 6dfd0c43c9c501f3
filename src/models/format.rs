use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How command results are rendered on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    /// Complete JSON documents; answers are never streamed
    Json,
    #[value(alias = "md")]
    #[serde(alias = "md")]
    Markdown,
}

impl OutputFormat {
    /// Whether output is meant for another program rather than a terminal.
    pub fn is_machine_readable(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self
            .to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_default();
        f.write_str(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::from_str("JSON", true).unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("md", true).unwrap(), OutputFormat::Markdown);
        assert!(OutputFormat::from_str("yaml", true).is_err());
    }

    #[test]
    fn test_config_value() {
        let format: OutputFormat = serde_json::from_str("\"md\"").unwrap();
        assert_eq!(format, OutputFormat::Markdown);
        assert_eq!(format.to_string(), "markdown");
        assert!(OutputFormat::Json.is_machine_readable());
    }
}
