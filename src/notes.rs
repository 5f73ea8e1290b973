//! Progress-note generation
//!
//! Turns one goal's trial data from a therapy session into a paragraph a
//! clinician can paste into a student's record. The wording comes from fixed
//! phrase tables; the same inputs always produce the same note.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Degree of clinician support during a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptLevel {
    None,
    Min,
    Mod,
    Max,
}

impl PromptLevel {
    pub const ALL: [PromptLevel; 4] = [Self::None, Self::Min, Self::Mod, Self::Max];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Min => "min",
            Self::Mod => "mod",
            Self::Max => "max",
        }
    }

    /// Phrase describing how the student performed relative to support
    pub fn phrase(&self) -> &'static str {
        match self {
            Self::None => "independently",
            Self::Min => "with minimal prompting",
            Self::Mod => "with moderate prompting",
            Self::Max => "with maximum support",
        }
    }
}

impl FromStr for PromptLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "min" => Ok(Self::Min),
            "mod" => Ok(Self::Mod),
            "max" => Ok(Self::Max),
            other => Err(format!(
                "Invalid prompt level '{}'. Expected one of: none, min, mod, max",
                other
            )),
        }
    }
}

impl fmt::Display for PromptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-level engagement rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engagement {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl Engagement {
    pub const ALL: [Engagement; 4] = [Self::Poor, Self::Fair, Self::Good, Self::Excellent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }

    pub fn phrase(&self) -> &'static str {
        match self {
            Self::Poor => "showed limited engagement and required frequent redirection",
            Self::Fair => "demonstrated variable engagement throughout the session",
            Self::Good => "was engaged and participated well in activities",
            Self::Excellent => "was highly engaged and motivated throughout the session",
        }
    }
}

impl FromStr for Engagement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poor" => Ok(Self::Poor),
            "fair" => Ok(Self::Fair),
            "good" => Ok(Self::Good),
            "excellent" => Ok(Self::Excellent),
            other => Err(format!(
                "Invalid engagement '{}'. Expected one of: poor, fair, good, excellent",
                other
            )),
        }
    }
}

impl fmt::Display for Engagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Performance wording keyed by accuracy thresholds (80 / 60)
pub fn performance_phrase(accuracy: u8) -> &'static str {
    if accuracy >= 80 {
        "demonstrated strong progress and mastery emerging"
    } else if accuracy >= 60 {
        "showed steady progress with continued practice needed"
    } else {
        "is developing skills in this area and would benefit from continued focus"
    }
}

/// Session metadata shared by every goal worked on
#[derive(Debug, Clone)]
pub struct SessionContext<'a> {
    pub duration_minutes: u32,
    pub location: &'a str,
    pub engagement: Engagement,
}

/// Trial data recorded for one goal
#[derive(Debug, Clone)]
pub struct TrialData<'a> {
    pub accuracy: u8,
    pub trials: u32,
    pub prompt_level: PromptLevel,
    pub activity: &'a str,
    pub utterance: Option<&'a str>,
    pub observations: Option<&'a str>,
}

/// The goal template being targeted
#[derive(Debug, Clone)]
pub struct GoalFocus<'a> {
    pub target_area: &'a str,
    pub category: &'a str,
}

fn first_name(full_name: &str) -> &str {
    full_name.split(' ').next().unwrap_or(full_name)
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Build the progress-note paragraph for one goal
pub fn generate_note(
    student_name: &str,
    session: &SessionContext<'_>,
    data: &TrialData<'_>,
    goal: &GoalFocus<'_>,
) -> String {
    let first = first_name(student_name);

    let mut note = format!(
        "{} {} during today's {}-minute session in the {}. ",
        student_name,
        session.engagement.phrase(),
        session.duration_minutes,
        session.location
    );

    note.push_str(&format!(
        "When targeting {} ({}), {} achieved {}% accuracy across {} trials {}. ",
        goal.target_area.to_lowercase(),
        goal.category,
        first,
        data.accuracy,
        data.trials,
        data.prompt_level.phrase()
    ));

    if !data.activity.is_empty() {
        note.push_str(&format!("Activities included {}. ", data.activity.to_lowercase()));
    }

    if let Some(utterance) = present(data.utterance) {
        note.push_str(&format!("Sample production: \"{}\". ", utterance));
    }

    note.push_str(&format!("{} {} in this area.", first, performance_phrase(data.accuracy)));

    if let Some(observations) = present(data.observations) {
        note.push_str(&format!(" Additional observations: {}", observations));
    }

    note
}
