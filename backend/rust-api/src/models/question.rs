use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    Coding,
    ShortAnswer,
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::Coding => "coding",
            QuestionType::ShortAnswer => "short_answer",
        };
        f.write_str(name)
    }
}

/// Read-only question definition supplied by the test-definition collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Question {
    #[validate(length(min = 1, message = "Question id must not be empty"))]
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    /// Only meaningful for multiple-choice questions.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub points: u32,
}

/// Answer value keyed by question id. The shape must match the question type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResponseValue {
    /// Indices of the chosen options.
    Choices(BTreeSet<usize>),
    Text(String),
}

impl ResponseValue {
    pub fn matches(&self, question_type: QuestionType) -> bool {
        matches!(
            (self, question_type),
            (ResponseValue::Choices(_), QuestionType::MultipleChoice)
                | (ResponseValue::Text(_), QuestionType::Coding)
                | (ResponseValue::Text(_), QuestionType::ShortAnswer)
        )
    }

    /// An empty choice set or blank text does not count as answered.
    pub fn is_answered(&self) -> bool {
        match self {
            ResponseValue::Choices(choices) => !choices.is_empty(),
            ResponseValue::Text(text) => !text.trim().is_empty(),
        }
    }
}
