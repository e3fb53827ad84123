//! Classification results and the routing messages derived from them

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed acceptance gate: only scores strictly above this value are routed
pub const ACCEPTANCE_THRESHOLD: f64 = 0.8;

/// `File: <name>, Classification: <label>, Score: <score>`
static LEGACY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^File: (?P<file>.+), Classification: (?P<class>.+), Score: (?P<score>\S+)$")
        .expect("legacy routing line pattern is valid")
});

/// One classification candidate for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub file_name: String,
    pub classification: String,
    pub score: f64,
}

impl ClassificationResult {
    pub fn new(file_name: impl Into<String>, classification: impl Into<String>, score: f64) -> Self {
        Self {
            file_name: file_name.into(),
            classification: classification.into(),
            score,
        }
    }

    /// Score clears the acceptance gate
    pub fn qualifies(&self) -> bool {
        self.score > ACCEPTANCE_THRESHOLD
    }
}

/// Instruction to move one document into one classification folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingMessage {
    pub file_name: String,
    pub classification: String,
    pub score: f64,
}

/// Notification-topic envelope wrapping the real message
#[derive(Debug, Deserialize)]
struct TopicEnvelope {
    #[serde(rename = "Message")]
    message: String,
}

impl RoutingMessage {
    pub fn new(file_name: impl Into<String>, classification: impl Into<String>, score: f64) -> Self {
        Self {
            file_name: file_name.into(),
            classification: classification.into(),
            score,
        }
    }

    /// Parse a routing queue body.
    ///
    /// Accepts the JSON message itself, or a topic envelope whose `Message` is either that
    /// JSON or the legacy `File: .., Classification: .., Score: ..` line.
    pub fn parse(message_id: &str, body: &str) -> Result<Self> {
        if let Ok(msg) = serde_json::from_str::<RoutingMessage>(body) {
            return msg.validated(message_id);
        }

        let envelope: TopicEnvelope = serde_json::from_str(body).map_err(|e| {
            Error::malformed(message_id, format!("not a routing message: {}", e))
        })?;

        if let Ok(msg) = serde_json::from_str::<RoutingMessage>(&envelope.message) {
            return msg.validated(message_id);
        }

        Self::parse_legacy_line(message_id, envelope.message.trim())?.validated(message_id)
    }

    fn parse_legacy_line(message_id: &str, line: &str) -> Result<Self> {
        let caps = LEGACY_LINE.captures(line).ok_or_else(|| {
            Error::malformed(message_id, format!("unrecognised routing line '{}'", line))
        })?;

        let score = caps["score"].parse::<f64>().map_err(|e| {
            Error::malformed(message_id, format!("invalid score '{}': {}", &caps["score"], e))
        })?;

        Ok(Self::new(&caps["file"], &caps["class"], score))
    }

    fn validated(self, message_id: &str) -> Result<Self> {
        if self.file_name.trim().is_empty() || self.file_name.contains('/') {
            return Err(Error::malformed(
                message_id,
                format!("invalid file_name '{}'", self.file_name),
            ));
        }
        if self.classification.trim().is_empty() || self.classification.contains('/') {
            return Err(Error::malformed(
                message_id,
                format!("invalid classification '{}'", self.classification),
            ));
        }
        Ok(self)
    }

    /// Serialize as a routing queue body
    pub fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<ClassificationResult> for RoutingMessage {
    fn from(result: ClassificationResult) -> Self {
        Self {
            file_name: result.file_name,
            classification: result.classification,
            score: result.score,
        }
    }
}
