//! GRBL Response Parser
//!
//! Classifies each line the firmware sends. Acknowledgments (`ok`,
//! `error:N`) are correlated with sent lines by position; everything else is
//! out-of-band and never retires a pending command.

use super::error_decoder::{decode_alarm, decode_error};
use super::status_parser::{parse_status, StatusReport};
use serde::{Deserialize, Serialize};
use std::fmt;

/// GRBL response types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GrblResponse {
    /// OK acknowledgment
    Ok,
    /// Error acknowledgment with error code (0 when the code is not numeric)
    Error(u8),
    /// Alarm with alarm code
    Alarm(u8),
    /// Status report
    Status(StatusReport),
    /// Startup banner, printed after every reset
    Startup(String),
    /// Setting line from a `$$` query
    Setting { number: u16, value: String },
    /// Feedback messages and anything unrecognised
    Message(String),
}

impl GrblResponse {
    /// Check if this line retires a pending command
    pub fn is_acknowledgment(&self) -> bool {
        matches!(self, GrblResponse::Ok | GrblResponse::Error(_))
    }
}

impl fmt::Display for GrblResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error(code) => write!(f, "error {}: {}", code, decode_error(*code)),
            Self::Alarm(code) => write!(f, "alarm {}: {}", code, decode_alarm(*code)),
            Self::Status(report) => write!(f, "status {}", report.state_name),
            Self::Startup(banner) => write!(f, "startup: {}", banner),
            Self::Setting { number, value } => write!(f, "${}={}", number, value),
            Self::Message(msg) => write!(f, "{}", msg),
        }
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}

/// GRBL response parser
#[derive(Debug, Default, Clone, Copy)]
pub struct GrblResponseParser;

impl GrblResponseParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a GRBL response line. Blank lines yield `None`.
    pub fn parse(&self, line: &str) -> Option<GrblResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line.eq_ignore_ascii_case("ok") {
            return Some(GrblResponse::Ok);
        }

        if let Some(code) = strip_prefix_ignore_case(line, "error:") {
            return Some(GrblResponse::Error(code.trim().parse().unwrap_or(0)));
        }

        if let Some(code) = strip_prefix_ignore_case(line, "alarm:") {
            return Some(GrblResponse::Alarm(code.trim().parse().unwrap_or(0)));
        }

        if line.starts_with('<') {
            return Some(match parse_status(line) {
                Some(report) => GrblResponse::Status(report),
                None => GrblResponse::Message(line.to_string()),
            });
        }

        if strip_prefix_ignore_case(line, "grbl ").is_some() {
            return Some(GrblResponse::Startup(line.to_string()));
        }

        if let Some(rest) = line.strip_prefix('$') {
            if let Some((number, value)) = rest.split_once('=') {
                if let Ok(number) = number.parse::<u16>() {
                    return Some(GrblResponse::Setting {
                        number,
                        value: value.to_string(),
                    });
                }
            }
        }

        Some(GrblResponse::Message(line.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use g2burn_core::MachineState;

    #[test]
    fn test_acknowledgments() {
        let parser = GrblResponseParser::new();
        assert_eq!(parser.parse("ok"), Some(GrblResponse::Ok));
        assert_eq!(parser.parse(" OK \r"), Some(GrblResponse::Ok));
        assert_eq!(parser.parse("error:22"), Some(GrblResponse::Error(22)));
        assert_eq!(
            parser.parse("error: Bad number format"),
            Some(GrblResponse::Error(0))
        );
        assert!(parser.parse("error:9").unwrap().is_acknowledgment());
    }

    #[test]
    fn test_alarm_is_case_insensitive() {
        let parser = GrblResponseParser::new();
        assert_eq!(parser.parse("ALARM:1"), Some(GrblResponse::Alarm(1)));
        assert_eq!(parser.parse("alarm:3"), Some(GrblResponse::Alarm(3)));
        assert!(!parser.parse("ALARM:1").unwrap().is_acknowledgment());
    }

    #[test]
    fn test_status_startup_and_messages() {
        let parser = GrblResponseParser::new();
        match parser.parse("<Idle|MPos:0.000,0.000,0.000|FS:0,0>") {
            Some(GrblResponse::Status(report)) => {
                assert_eq!(report.state, Some(MachineState::Idle))
            }
            other => panic!("expected status, got {:?}", other),
        }
        assert_eq!(
            parser.parse("Grbl 1.1h ['$' for help]"),
            Some(GrblResponse::Startup("Grbl 1.1h ['$' for help]".to_string()))
        );
        assert_eq!(
            parser.parse("$30=1000"),
            Some(GrblResponse::Setting {
                number: 30,
                value: "1000".to_string()
            })
        );
        assert_eq!(
            parser.parse("[MSG:'$H'|'$X' to unlock]"),
            Some(GrblResponse::Message("[MSG:'$H'|'$X' to unlock]".to_string()))
        );
        assert_eq!(parser.parse("   "), None);
    }
}
