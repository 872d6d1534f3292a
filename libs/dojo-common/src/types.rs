use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Languages the grader can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Python,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Javascript, Language::Python, Language::Cpp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Python => "python",
            Language::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    /// Accepts the canonical names plus the aliases submissions arrive with
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(Language::Javascript),
            "python" | "py" => Ok(Language::Python),
            "cpp" | "c++" => Ok(Language::Cpp),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

/// One grading fixture: positional arguments and the expected return value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub input: Vec<Value>,
    pub expected: Value,
}

impl TestCase {
    pub fn new(input: Vec<Value>, expected: Value) -> Self {
        Self { input, expected }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Attempt as held by storage: everything a worker needs to grade it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

/// Queue payload; the record itself is loaded from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptJob {
    pub attempt_id: Uuid,
    pub language: String,
}

impl From<&AttemptRecord> for AttemptJob {
    fn from(record: &AttemptRecord) -> Self {
        Self {
            attempt_id: record.id,
            language: record.language.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Submitted,
    Running,
    Passed,
    Failed,
    Error,
}

/// Maximum stored transcript size in characters
pub const MAX_STORED_LOG_CHARS: usize = 20_000;
/// Maximum stored error message size in characters
pub const MAX_ERROR_MESSAGE_CHARS: usize = 2_000;

/// Final state written back to storage after grading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub status: AttemptStatus,
    pub passed_count: u32,
    pub total_count: u32,
    pub runtime_ms: u64,
    pub logs: String,
    pub error_message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl AttemptOutcome {
    /// Outcome for an attempt that ran; status derives from the counts
    pub fn graded(passed: u32, total: u32, runtime_ms: u64, logs: &[String]) -> Self {
        let status = if passed == total {
            AttemptStatus::Passed
        } else {
            AttemptStatus::Failed
        };
        Self {
            status,
            passed_count: passed,
            total_count: total,
            runtime_ms,
            logs: truncate_chars(&logs.join("\n"), MAX_STORED_LOG_CHARS),
            error_message: None,
            finished_at: Utc::now(),
        }
    }

    /// Outcome for an attempt that could not be graded at all
    pub fn errored(message: &str) -> Self {
        Self {
            status: AttemptStatus::Error,
            passed_count: 0,
            total_count: 0,
            runtime_ms: 0,
            logs: String::new(),
            error_message: Some(truncate_chars(message, MAX_ERROR_MESSAGE_CHARS)),
            finished_at: Utc::now(),
        }
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with an ellipsis
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}…", &text[..byte_idx]),
        None => text.to_string(),
    }
}
