//! Per-partition crawl attempt records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AttemptId = i64;

/// 저장되는 에러 메시지 최대 길이 (문자 수)
pub const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// Lifecycle of a partition attempt.
///
/// `Pending -> Started -> (Completed | Failed)`. Only `Completed` carries an
/// end time; `Failed` carries an error message instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    Pending,
    Started,
    Completed,
    Failed,
}

impl AttemptState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown attempt state: {other}")),
        }
    }
}

/// Diagnostic view of an attempt that recorded an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub attempt_id: AttemptId,
    pub partition_id: i64,
    pub param: String,
    pub query: String,
    pub error_message: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_completed: bool,
}

/// Flattens newlines, trims, and bounds the message length.
///
/// Messages longer than [`MAX_ERROR_MESSAGE_CHARS`] are cut at a character
/// boundary and suffixed with `...`.
#[must_use]
pub fn format_error_message(message: &str) -> String {
    let flattened = message.replace(['\r', '\n'], " ");
    let trimmed = flattened.trim();
    if trimmed.chars().count() > MAX_ERROR_MESSAGE_CHARS {
        let head: String = trimmed.chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_messages_are_only_flattened() {
        assert_eq!(
            format_error_message("  connect timeout\nvia proxy 3 \n"),
            "connect timeout via proxy 3"
        );
    }

    #[test]
    fn long_messages_are_cut_on_char_boundary() {
        let msg = "가".repeat(250);
        let formatted = format_error_message(&msg);
        assert!(formatted.ends_with("..."));
        assert_eq!(formatted.chars().count(), MAX_ERROR_MESSAGE_CHARS + 3);
    }

    #[test]
    fn state_strings_round_trip() {
        for state in [
            AttemptState::Pending,
            AttemptState::Started,
            AttemptState::Completed,
            AttemptState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<AttemptState>(), Ok(state));
        }
        assert!(AttemptState::Failed.is_terminal());
        assert!(!AttemptState::Started.is_terminal());
    }

    proptest! {
        #[test]
        fn formatted_message_is_bounded_and_single_line(msg in "\\PC{0,400}(\n\\PC{0,50}){0,4}") {
            let formatted = format_error_message(&msg);
            prop_assert!(!formatted.contains('\n'));
            prop_assert!(formatted.chars().count() <= MAX_ERROR_MESSAGE_CHARS + 3);
        }
    }
}
