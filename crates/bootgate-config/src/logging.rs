use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Human-readable single line output for operators tailing container logs.
    #[default]
    Compact,
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;
