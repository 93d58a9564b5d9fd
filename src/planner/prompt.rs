use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a topic.")]
    EmptyTopic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationUnit {
    Years,
    #[default]
    Months,
    Days,
    Hours,
}

impl DurationUnit {
    pub const ALL: [Self; 4] = [Self::Years, Self::Months, Self::Days, Self::Hours];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Years => "years",
            Self::Months => "months",
            Self::Days => "days",
            Self::Hours => "hours",
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyRequest {
    pub topic: String,
    pub duration_value: Option<u32>,
    pub duration_unit: DurationUnit,
}

/// Accepts only a plain run of ASCII digits naming a positive count.
fn parse_duration(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok().filter(|value| *value > 0)
}

impl StudyRequest {
    pub fn from_form(
        topic: &str,
        duration_value: &str,
        duration_unit: DurationUnit,
    ) -> Result<Self, ValidationError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ValidationError::EmptyTopic);
        }

        Ok(Self {
            topic: topic.to_string(),
            duration_value: parse_duration(duration_value),
            duration_unit,
        })
    }

    pub fn prompt(&self) -> String {
        match self.duration_value {
            Some(value) => format!(
                "Create a detailed study plan for the topic: {}. \
                 The user wants to study this topic within {} {}. \
                 Adjust the depth and schedule accordingly, and lessen time if the topic is simple.",
                self.topic, value, self.duration_unit
            ),
            None => format!(
                "Create a detailed study plan for the topic: {}, lessen the time if topic is less complex.",
                self.topic
            ),
        }
    }
}
