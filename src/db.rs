//! SQLite database with Diesel ORM
//!
//! Stores students, the goal bank, schedules and session documentation.
//! Tables are created on open; every write goes through [`Database`].

use crate::config::DefaultsConfig;
use crate::notes::{generate_note, Engagement, GoalFocus, PromptLevel, SessionContext, TrialData};
use crate::reports::DashboardStats;
use crate::schedule::{slot_end_time, week_end, week_start, EventStatus};
use crate::schema::*;
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

pub const DB_PATH_ENV: &str = "FLUENTFLOW_DB_PATH";

/// Walk up directory tree to find .fluentflow folder (like git finds .git)
/// Can be overridden with FLUENTFLOW_DB_PATH env var
fn get_db_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        return std::path::PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let data_dir = dir.join(crate::config::CONFIG_DIR);
            if data_dir.is_dir() {
                return data_dir.join("fluentflow.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    // fluentflow init will create it here
    std::path::PathBuf::from(".fluentflow/fluentflow.db")
}

/// Current schema version for fluentflow
pub const CURRENT_SCHEMA: PracticeSchema = PracticeSchema {
    major: 1,
    minor: 1,
    patch: 0,
    name: "practice-management",
    features: &[
        "students",
        "goal_bank",
        "student_goals",
        "schedule_events",
        "sessions",
        "session_goal_data",
        "notes",
        "holidays",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct PracticeSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl PracticeSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::fmt::Display for PracticeSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
}

pub type Result<T> = std::result::Result<T, DbError>;

fn invalid(message: impl Into<String>) -> DbError {
    DbError::Validation(message.into())
}

// ============================================================================
// Field helpers
// ============================================================================

/// Parse a date given as YYYY-MM-DD or an RFC 3339 timestamp
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(trimmed).map(|dt| dt.date_naive()))
        .map_err(|_| invalid(format!("Invalid {} '{}'. Expected YYYY-MM-DD", field, value)))
}

pub fn normalize_date(field: &str, value: &str) -> Result<String> {
    parse_date(field, value).map(|d| d.format("%Y-%m-%d").to_string())
}

pub fn normalize_time(field: &str, value: &str) -> Result<String> {
    chrono::NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|_| invalid(format!("Invalid {} '{}'. Expected HH:MM", field, value)))
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{} is required", field)));
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn encode_list<T: Serialize>(items: &[T]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list<T: DeserializeOwned>(column: &str, raw: &str) -> Vec<T> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        log::warn!("Failed to parse {} {:?}: {}", column, raw, e);
        Vec::new()
    })
}

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

/// Distinguish an absent field (None) from an explicit null (Some(None))
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}


// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = teachers)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: i32,
    pub name: String,
    pub email: Option<String>,
    pub classroom: Option<String>,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = teachers)]
struct NewTeacher<'a> {
    name: &'a str,
    email: Option<&'a str>,
    classroom: Option<&'a str>,
    created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = classrooms)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: i32,
    pub name: String,
    pub grade: Option<String>,
    pub teacher_id: Option<i32>,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = classrooms)]
struct NewClassroom<'a> {
    name: &'a str,
    grade: Option<&'a str>,
    teacher_id: Option<i32>,
    created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = students)]
struct StudentRow {
    id: i32,
    name: String,
    date_of_birth: String,
    grade: String,
    guardians_json: String,
    iep_dates_json: String,
    notes: Option<String>,
    is_active: bool,
    classroom_id: Option<i32>,
    teacher_id: Option<i32>,
    created_at: String,
    updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = students)]
struct NewStudent<'a> {
    name: &'a str,
    date_of_birth: &'a str,
    grade: &'a str,
    guardians_json: &'a str,
    iep_dates_json: &'a str,
    notes: Option<&'a str>,
    is_active: bool,
    classroom_id: Option<i32>,
    teacher_id: Option<i32>,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = students)]
struct StudentChangeset {
    name: Option<String>,
    date_of_birth: Option<String>,
    grade: Option<String>,
    guardians_json: Option<String>,
    iep_dates_json: Option<String>,
    notes: Option<Option<String>>,
    classroom_id: Option<Option<i32>>,
    teacher_id: Option<Option<i32>>,
    updated_at: String,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[diesel(table_name = goal_templates)]
#[serde(rename_all = "camelCase")]
pub struct GoalTemplate {
    pub id: i32,
    pub target_area: String,
    pub category: String,
    pub goal_text: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = goal_templates)]
struct NewGoalTemplate<'a> {
    target_area: &'a str,
    category: &'a str,
    goal_text: &'a str,
    description: Option<&'a str>,
    created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = student_goals)]
#[serde(rename_all = "camelCase")]
pub struct StudentGoal {
    pub id: i32,
    pub student_id: i32,
    pub goal_id: i32,
    pub is_active: bool,
    pub assigned_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = student_goals)]
struct NewStudentGoal<'a> {
    student_id: i32,
    goal_id: i32,
    is_active: bool,
    assigned_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schedule_events)]
struct ScheduleEventRow {
    id: i32,
    date: String,
    start_time: String,
    end_time: String,
    location: String,
    student_ids_json: String,
    teacher_id: Option<i32>,
    classroom_id: Option<i32>,
    session_type: String,
    status: String,
    recurrence_rule: Option<String>,
    created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = schedule_events)]
struct NewScheduleEvent<'a> {
    date: &'a str,
    start_time: &'a str,
    end_time: &'a str,
    location: &'a str,
    student_ids_json: &'a str,
    teacher_id: Option<i32>,
    classroom_id: Option<i32>,
    session_type: &'a str,
    status: &'a str,
    recurrence_rule: Option<&'a str>,
    created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = sessions)]
struct SessionRow {
    id: i32,
    event_id: Option<i32>,
    date: String,
    student_ids_json: String,
    duration_minutes: Option<i32>,
    location: Option<String>,
    engagement: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
struct NewSession<'a> {
    event_id: Option<i32>,
    date: &'a str,
    student_ids_json: &'a str,
    duration_minutes: Option<i32>,
    location: Option<&'a str>,
    engagement: Option<&'a str>,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = session_goal_data)]
#[serde(rename_all = "camelCase")]
pub struct SessionGoalData {
    pub id: i32,
    pub session_id: i32,
    pub student_goal_id: i32,
    pub student_id: i32,
    pub accuracy: i32,
    pub trials: i32,
    pub prompt_level: String,
    pub prompt_types: String,
    pub activity: String,
    pub utterance: Option<String>,
    pub observations: Option<String>,
}

/// Used both to insert and to overwrite a goal-data row on re-save
#[derive(Insertable, AsChangeset)]
#[diesel(table_name = session_goal_data, treat_none_as_null = true)]
struct GoalDataValues<'a> {
    session_id: i32,
    student_goal_id: i32,
    student_id: i32,
    accuracy: i32,
    trials: i32,
    prompt_level: &'a str,
    prompt_types: &'a str,
    activity: &'a str,
    utterance: Option<&'a str>,
    observations: Option<&'a str>,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = notes)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i32,
    pub session_id: i32,
    pub student_id: i32,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = notes)]
struct NewNote<'a> {
    session_id: i32,
    student_id: i32,
    content: &'a str,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = holidays)]
#[serde(rename_all = "camelCase")]
pub struct Holiday {
    pub id: i32,
    pub name: String,
    pub date: String,
}

#[derive(Insertable)]
#[diesel(table_name = holidays)]
struct NewHoliday<'a> {
    name: &'a str,
    date: &'a str,
}

// ============================================================================
// API Views
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i32,
    pub name: String,
    pub date_of_birth: String,
    pub grade: String,
    pub guardians: Vec<String>,
    pub iep_dates: Vec<String>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub classroom_id: Option<i32>,
    pub teacher_id: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<StudentRow> for Student {
    fn from(row: StudentRow) -> Self {
        Self {
            guardians: decode_list("guardians", &row.guardians_json),
            iep_dates: decode_list("iep_dates", &row.iep_dates_json),
            id: row.id,
            name: row.name,
            date_of_birth: row.date_of_birth,
            grade: row.grade,
            notes: row.notes,
            is_active: row.is_active,
            classroom_id: row.classroom_id,
            teacher_id: row.teacher_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub id: i32,
    pub name: String,
}

/// A goal template assigned to a student
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedGoal {
    pub student_goal_id: i32,
    pub student_id: i32,
    pub is_active: bool,
    pub assigned_at: String,
    pub goal: GoalTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetail {
    #[serde(flatten)]
    pub student: Student,
    pub teacher: Option<Teacher>,
    pub classroom: Option<Classroom>,
    pub goals: Vec<AssignedGoal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomSummary {
    #[serde(flatten)]
    pub classroom: Classroom,
    pub teacher: Option<Teacher>,
    pub student_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEvent {
    pub id: i32,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
    pub student_ids: Vec<i32>,
    pub teacher_id: Option<i32>,
    pub classroom_id: Option<i32>,
    pub session_type: String,
    pub status: String,
    pub recurrence_rule: Option<String>,
    pub created_at: String,
    pub students: Vec<StudentRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i32,
    pub event_id: Option<i32>,
    pub date: String,
    pub student_ids: Vec<i32>,
    pub duration_minutes: Option<i32>,
    pub location: Option<String>,
    pub engagement: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            student_ids: decode_list("student_ids", &row.student_ids_json),
            id: row.id,
            event_id: row.event_id,
            date: row.date,
            duration_minutes: row.duration_minutes,
            location: row.location,
            engagement: row.engagement,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalDataDetail {
    #[serde(flatten)]
    pub data: SessionGoalData,
    pub goal: Option<GoalTemplate>,
    pub student: Option<StudentRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDetail {
    #[serde(flatten)]
    pub note: Note,
    pub student: Option<StudentRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub goal_data: Vec<GoalDataDetail>,
    pub notes: Vec<NoteDetail>,
}

/// Result of saving a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSession {
    #[serde(flatten)]
    pub session: Session,
    pub note: Option<Note>,
    /// Goal ids whose data was not stored because the student has no active assignment
    pub skipped_goal_ids: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePreview {
    pub goal_id: i32,
    pub note: String,
}

/// One goal-data row flattened with its session date and goal template
#[derive(Debug, Clone, PartialEq)]
pub struct GoalDataPoint {
    pub session_id: i32,
    pub date: String,
    pub student_id: i32,
    pub goal_id: i32,
    pub target_area: String,
    pub category: String,
    pub accuracy: i32,
    pub trials: i32,
}

// ============================================================================
// Request Inputs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherInput {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub classroom: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomInput {
    pub name: String,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    pub name: String,
    pub date_of_birth: String,
    pub grade: String,
    #[serde(default)]
    pub classroom_id: Option<i32>,
    #[serde(default)]
    pub teacher_id: Option<i32>,
    #[serde(default)]
    pub guardians: Vec<String>,
    #[serde(default)]
    pub iep_dates: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial student update. Absent fields are left alone; an explicit null
/// clears a nullable field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPatch {
    pub name: Option<String>,
    pub date_of_birth: Option<String>,
    pub grade: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub classroom_id: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub teacher_id: Option<Option<i32>>,
    pub guardians: Option<Vec<String>>,
    pub iep_dates: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalTemplateInput {
    pub target_area: String,
    pub category: String,
    pub goal_text: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalFilter {
    #[serde(default)]
    pub target_area: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFilter {
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFilter {
    #[serde(default)]
    pub student_id: Option<i32>,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEventInput {
    pub date: String,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub student_ids: Vec<i32>,
    #[serde(default)]
    pub teacher_id: Option<i32>,
    #[serde(default)]
    pub classroom_id: Option<i32>,
    #[serde(default)]
    pub session_type: Option<String>,
    #[serde(default)]
    pub recurrence_rule: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolidayInput {
    pub name: String,
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalDataInput {
    pub goal_id: i32,
    pub accuracy: i32,
    pub trials: i32,
    pub prompt_level: PromptLevel,
    #[serde(default)]
    pub prompt_types: Option<String>,
    pub activity: String,
    #[serde(default)]
    pub utterance: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
}

impl GoalDataInput {
    fn validate(&self, index: usize) -> Result<()> {
        if !(0..=100).contains(&self.accuracy) {
            return Err(invalid(format!(
                "goalData[{}].accuracy must be between 0 and 100",
                index
            )));
        }
        if self.trials < 1 {
            return Err(invalid(format!("goalData[{}].trials must be at least 1", index)));
        }
        require_text(&format!("goalData[{}].activity", index), &self.activity)
    }

    fn trial_data(&self) -> TrialData<'_> {
        TrialData {
            accuracy: self.accuracy.clamp(0, 100) as u8,
            trials: self.trials.max(1) as u32,
            prompt_level: self.prompt_level,
            activity: self.activity.trim(),
            utterance: self.utterance.as_deref(),
            observations: self.observations.as_deref(),
        }
    }
}

fn default_duration() -> i32 {
    30
}

fn default_engagement() -> Engagement {
    Engagement::Good
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInput {
    pub date: String,
    pub student_id: i32,
    #[serde(default)]
    pub event_id: Option<i32>,
    #[serde(default = "default_duration")]
    pub duration: i32,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_engagement")]
    pub engagement: Engagement,
    pub goal_data: Vec<GoalDataInput>,
    /// Pre-written notes keyed by goal id. Generated server-side when absent.
    #[serde(default)]
    pub notes: Option<BTreeMap<String, String>>,
}

impl SessionInput {
    pub fn validate(&self) -> Result<()> {
        parse_date("date", &self.date)?;
        if !(5..=120).contains(&self.duration) {
            return Err(invalid("duration must be between 5 and 120 minutes"));
        }
        if self.goal_data.is_empty() {
            return Err(invalid("At least one goal is required"));
        }
        for (index, entry) in self.goal_data.iter().enumerate() {
            entry.validate(index)?;
        }
        Ok(())
    }

    fn context<'a>(&'a self, defaults: &'a DefaultsConfig) -> SessionContext<'a> {
        SessionContext {
            duration_minutes: self.duration as u32,
            location: non_empty(&self.location).unwrap_or(defaults.location.as_str()),
            engagement: self.engagement,
        }
    }
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

fn last_insert_id(conn: &mut SqliteConnection) -> Result<i32> {
    let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>(
        "last_insert_rowid()",
    ))
    .first(conn)?;
    Ok(id)
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> std::path::PathBuf {
        get_db_path()
    }

    /// Create a new database at a custom path
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path)
    }

    /// Open database at default path (respects FLUENTFLOW_DB_PATH env var)
    pub fn open() -> Result<Self> {
        let path = get_db_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbError::Connection(format!("could not create {}: {}", parent.display(), e))
                })?;
            }
        }
        Self::open_at(&path)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        log::debug!("Opened database at {}", path_str);
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS teachers (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                email TEXT,
                classroom TEXT,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS classrooms (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                grade TEXT,
                teacher_id INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (teacher_id) REFERENCES teachers(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS students (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                date_of_birth TEXT NOT NULL,
                grade TEXT NOT NULL,
                guardians_json TEXT NOT NULL DEFAULT '[]',
                iep_dates_json TEXT NOT NULL DEFAULT '[]',
                notes TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                classroom_id INTEGER,
                teacher_id INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (classroom_id) REFERENCES classrooms(id),
                FOREIGN KEY (teacher_id) REFERENCES teachers(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS goal_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                target_area TEXT NOT NULL,
                category TEXT NOT NULL,
                goal_text TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS student_goals (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                student_id INTEGER NOT NULL,
                goal_id INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                assigned_at TEXT NOT NULL,
                FOREIGN KEY (student_id) REFERENCES students(id),
                FOREIGN KEY (goal_id) REFERENCES goal_templates(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schedule_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                date TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                location TEXT NOT NULL,
                student_ids_json TEXT NOT NULL DEFAULT '[]',
                teacher_id INTEGER,
                classroom_id INTEGER,
                session_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'Upcoming'
                    CHECK (status IN ('Upcoming', 'Seen', 'Missed')),
                recurrence_rule TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (teacher_id) REFERENCES teachers(id),
                FOREIGN KEY (classroom_id) REFERENCES classrooms(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                event_id INTEGER UNIQUE,
                date TEXT NOT NULL,
                student_ids_json TEXT NOT NULL DEFAULT '[]',
                duration_minutes INTEGER,
                location TEXT,
                engagement TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (event_id) REFERENCES schedule_events(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS session_goal_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                session_id INTEGER NOT NULL,
                student_goal_id INTEGER NOT NULL,
                student_id INTEGER NOT NULL,
                accuracy INTEGER NOT NULL CHECK (accuracy BETWEEN 0 AND 100),
                trials INTEGER NOT NULL CHECK (trials >= 1),
                prompt_level TEXT NOT NULL
                    CHECK (prompt_level IN ('none', 'min', 'mod', 'max')),
                prompt_types TEXT NOT NULL DEFAULT '',
                activity TEXT NOT NULL,
                utterance TEXT,
                observations TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(id),
                FOREIGN KEY (student_goal_id) REFERENCES student_goals(id),
                FOREIGN KEY (student_id) REFERENCES students(id),
                UNIQUE(session_id, student_goal_id, student_id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                session_id INTEGER NOT NULL,
                student_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id),
                FOREIGN KEY (student_id) REFERENCES students(id),
                UNIQUE(session_id, student_id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS holidays (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                date TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        // Create indexes
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_students_active_name ON students(is_active, name)",
            "CREATE INDEX IF NOT EXISTS idx_goal_templates_area \
             ON goal_templates(target_area, category)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_student_goals_active \
             ON student_goals(student_id, goal_id) WHERE is_active = 1",
            "CREATE INDEX IF NOT EXISTS idx_schedule_events_date \
             ON schedule_events(date, start_time)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_date ON sessions(date)",
            "CREATE INDEX IF NOT EXISTS idx_goal_data_student ON session_goal_data(student_id)",
            "CREATE INDEX IF NOT EXISTS idx_holidays_date ON holidays(date)",
        ] {
            diesel::sql_query(statement).execute(&mut conn)?;
        }

        self.register_schema(&CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, schema: &PracticeSchema) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(&mut conn)?;

        Ok(())
    }


    // ========================================================================
    // Teachers and Classrooms
    // ========================================================================

    pub fn list_teachers(&self) -> Result<Vec<Teacher>> {
        let mut conn = self.get_conn()?;
        let teachers = teachers::table
            .order((teachers::name.asc(), teachers::id.asc()))
            .load::<Teacher>(&mut conn)?;
        Ok(teachers)
    }

    pub fn create_teacher(&self, input: &TeacherInput) -> Result<Teacher> {
        require_text("name", &input.name)?;
        let mut conn = self.get_conn()?;
        let now = now();

        let new_teacher = NewTeacher {
            name: input.name.trim(),
            email: non_empty(&input.email),
            classroom: non_empty(&input.classroom),
            created_at: &now,
        };
        diesel::insert_into(teachers::table)
            .values(&new_teacher)
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;

        Ok(teachers::table.find(id).first::<Teacher>(&mut conn)?)
    }

    pub fn list_classrooms(&self) -> Result<Vec<ClassroomSummary>> {
        let mut conn = self.get_conn()?;
        let rows = classrooms::table
            .order((classrooms::name.asc(), classrooms::id.asc()))
            .load::<Classroom>(&mut conn)?;
        summarize_classrooms(&mut conn, rows)
    }

    pub fn create_classroom(&self, input: &ClassroomInput) -> Result<ClassroomSummary> {
        require_text("name", &input.name)?;
        let mut conn = self.get_conn()?;
        ensure_teacher(&mut conn, input.teacher_id)?;
        let now = now();

        let new_classroom = NewClassroom {
            name: input.name.trim(),
            grade: non_empty(&input.grade),
            teacher_id: input.teacher_id,
            created_at: &now,
        };
        diesel::insert_into(classrooms::table)
            .values(&new_classroom)
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;

        let row = classrooms::table.find(id).first::<Classroom>(&mut conn)?;
        let mut summaries = summarize_classrooms(&mut conn, vec![row])?;
        summaries.pop().ok_or(DbError::NotFound("classroom"))
    }

    // ========================================================================
    // Students
    // ========================================================================

    /// Active students ordered by name, optionally matching name or grade
    pub fn list_active_students(&self, filter: &StudentFilter) -> Result<Vec<StudentDetail>> {
        let mut conn = self.get_conn()?;
        let mut rows = students::table
            .filter(students::is_active.eq(true))
            .order((students::name.asc(), students::id.asc()))
            .load::<StudentRow>(&mut conn)?;

        if let Some(term) = non_empty(&filter.search) {
            let needle = term.to_lowercase();
            rows.retain(|s| contains_ci(&s.name, &needle) || contains_ci(&s.grade, &needle));
        }

        hydrate_students(&mut conn, rows)
    }

    pub fn create_student(&self, input: &StudentInput) -> Result<StudentDetail> {
        require_text("name", &input.name)?;
        require_text("grade", &input.grade)?;
        let date_of_birth = normalize_date("dateOfBirth", &input.date_of_birth)?;
        let iep_dates = input
            .iep_dates
            .iter()
            .map(|d| normalize_date("iepDates", d))
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.get_conn()?;
        ensure_teacher(&mut conn, input.teacher_id)?;
        ensure_classroom(&mut conn, input.classroom_id)?;

        let now = now();
        let guardians_json = encode_list(&input.guardians);
        let iep_dates_json = encode_list(&iep_dates);
        let new_student = NewStudent {
            name: input.name.trim(),
            date_of_birth: &date_of_birth,
            grade: input.grade.trim(),
            guardians_json: &guardians_json,
            iep_dates_json: &iep_dates_json,
            notes: non_empty(&input.notes),
            is_active: true,
            classroom_id: input.classroom_id,
            teacher_id: input.teacher_id,
            created_at: &now,
            updated_at: &now,
        };
        diesel::insert_into(students::table)
            .values(&new_student)
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;

        load_student_detail(&mut conn, id)?.ok_or(DbError::NotFound("student"))
    }

    /// Any student by id, active or not
    pub fn get_student(&self, id: i32) -> Result<Option<StudentDetail>> {
        let mut conn = self.get_conn()?;
        load_student_detail(&mut conn, id)
    }

    pub fn update_student(&self, id: i32, patch: &StudentPatch) -> Result<Option<StudentDetail>> {
        if let Some(name) = &patch.name {
            require_text("name", name)?;
        }
        if let Some(grade) = &patch.grade {
            require_text("grade", grade)?;
        }
        let date_of_birth = patch
            .date_of_birth
            .as_deref()
            .map(|d| normalize_date("dateOfBirth", d))
            .transpose()?;
        let iep_dates = patch
            .iep_dates
            .as_ref()
            .map(|dates| {
                dates
                    .iter()
                    .map(|d| normalize_date("iepDates", d))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        let mut conn = self.get_conn()?;
        if let Some(teacher_id) = patch.teacher_id {
            ensure_teacher(&mut conn, teacher_id)?;
        }
        if let Some(classroom_id) = patch.classroom_id {
            ensure_classroom(&mut conn, classroom_id)?;
        }

        let changes = StudentChangeset {
            name: patch.name.as_ref().map(|n| n.trim().to_string()),
            date_of_birth,
            grade: patch.grade.as_ref().map(|g| g.trim().to_string()),
            guardians_json: patch.guardians.as_ref().map(|g| encode_list(g)),
            iep_dates_json: iep_dates.map(|d| encode_list(&d)),
            notes: patch.notes.clone(),
            classroom_id: patch.classroom_id,
            teacher_id: patch.teacher_id,
            updated_at: now(),
        };

        let updated = diesel::update(students::table.find(id))
            .set(&changes)
            .execute(&mut conn)?;
        if updated == 0 {
            return Ok(None);
        }
        load_student_detail(&mut conn, id)
    }

    /// Soft delete: the student disappears from active listings but their
    /// sessions, goal data and notes stay.
    pub fn deactivate_student(&self, id: i32) -> Result<Option<Student>> {
        let mut conn = self.get_conn()?;
        let updated = diesel::update(students::table.find(id))
            .set((
                students::is_active.eq(false),
                students::updated_at.eq(now()),
            ))
            .execute(&mut conn)?;
        if updated == 0 {
            return Ok(None);
        }
        let row = students::table.find(id).first::<StudentRow>(&mut conn)?;
        Ok(Some(row.into()))
    }

    pub fn count_active_students(&self) -> Result<i64> {
        let mut conn = self.get_conn()?;
        Ok(students::table
            .filter(students::is_active.eq(true))
            .count()
            .get_result(&mut conn)?)
    }

    // ========================================================================
    // Goal Bank
    // ========================================================================

    /// Goal templates ordered by target area then category
    pub fn list_goal_templates(&self, filter: &GoalFilter) -> Result<Vec<GoalTemplate>> {
        let mut conn = self.get_conn()?;
        let mut query = goal_templates::table.into_boxed();

        if let Some(area) = non_empty(&filter.target_area) {
            query = query.filter(goal_templates::target_area.eq(area.to_string()));
        }
        let goals = query
            .order((
                goal_templates::target_area.asc(),
                goal_templates::category.asc(),
                goal_templates::id.asc(),
            ))
            .load::<GoalTemplate>(&mut conn)?;

        let Some(term) = non_empty(&filter.search) else {
            return Ok(goals);
        };
        let needle = term.to_lowercase();
        Ok(goals
            .into_iter()
            .filter(|g| {
                contains_ci(&g.goal_text, &needle)
                    || contains_ci(&g.target_area, &needle)
                    || contains_ci(&g.category, &needle)
                    || g.description
                        .as_deref()
                        .map(|d| contains_ci(d, &needle))
                        .unwrap_or(false)
            })
            .collect())
    }

    /// Same filter as [`Database::list_goal_templates`], grouped target area → category
    pub fn grouped_goal_templates(
        &self,
        filter: &GoalFilter,
    ) -> Result<BTreeMap<String, BTreeMap<String, Vec<GoalTemplate>>>> {
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<GoalTemplate>>> = BTreeMap::new();
        for goal in self.list_goal_templates(filter)? {
            grouped
                .entry(goal.target_area.clone())
                .or_default()
                .entry(goal.category.clone())
                .or_default()
                .push(goal);
        }
        Ok(grouped)
    }

    pub fn get_goal_template(&self, id: i32) -> Result<Option<GoalTemplate>> {
        let mut conn = self.get_conn()?;
        Ok(goal_templates::table
            .find(id)
            .first::<GoalTemplate>(&mut conn)
            .optional()?)
    }

    pub fn find_goal_template(
        &self,
        target_area: &str,
        category: &str,
        goal_text: &str,
    ) -> Result<Option<GoalTemplate>> {
        let mut conn = self.get_conn()?;
        Ok(goal_templates::table
            .filter(goal_templates::target_area.eq(target_area))
            .filter(goal_templates::category.eq(category))
            .filter(goal_templates::goal_text.eq(goal_text))
            .first::<GoalTemplate>(&mut conn)
            .optional()?)
    }

    pub fn create_goal_template(&self, input: &GoalTemplateInput) -> Result<GoalTemplate> {
        require_text("targetArea", &input.target_area)?;
        require_text("category", &input.category)?;
        require_text("goalText", &input.goal_text)?;
        let mut conn = self.get_conn()?;
        let now = now();

        let new_goal = NewGoalTemplate {
            target_area: input.target_area.trim(),
            category: input.category.trim(),
            goal_text: input.goal_text.trim(),
            description: non_empty(&input.description),
            created_at: &now,
        };
        diesel::insert_into(goal_templates::table)
            .values(&new_goal)
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;

        Ok(goal_templates::table.find(id).first::<GoalTemplate>(&mut conn)?)
    }

    // ========================================================================
    // Student Goal Assignments
    // ========================================================================

    pub fn active_goals(&self, student_id: i32) -> Result<Vec<AssignedGoal>> {
        let mut conn = self.get_conn()?;
        if !student_exists(&mut conn, student_id)? {
            return Err(DbError::NotFound("student"));
        }
        let mut by_student = load_active_goals(&mut conn, &[student_id])?;
        Ok(by_student.remove(&student_id).unwrap_or_default())
    }

    /// Assign a goal template to a student. While an assignment for the pair
    /// is active this returns it unchanged; an inactive one is reactivated.
    pub fn assign_goal(&self, student_id: i32, goal_id: i32) -> Result<AssignedGoal> {
        let mut pooled = self.get_conn()?;
        let conn: &mut SqliteConnection = &mut pooled;

        conn.transaction::<_, DbError, _>(|conn| {
            if !student_exists(conn, student_id)? {
                return Err(DbError::NotFound("student"));
            }
            let goal = goal_templates::table
                .find(goal_id)
                .first::<GoalTemplate>(conn)
                .optional()?
                .ok_or(DbError::NotFound("goal"))?;

            let assignment = match find_active_student_goal(conn, student_id, goal_id)? {
                Some(active) => active,
                None => {
                    let now = now();
                    let inactive = student_goals::table
                        .filter(student_goals::student_id.eq(student_id))
                        .filter(student_goals::goal_id.eq(goal_id))
                        .order(student_goals::id.desc())
                        .first::<StudentGoal>(conn)
                        .optional()?;

                    let id = match inactive {
                        Some(previous) => {
                            diesel::update(student_goals::table.find(previous.id))
                                .set((
                                    student_goals::is_active.eq(true),
                                    student_goals::assigned_at.eq(&now),
                                ))
                                .execute(conn)?;
                            previous.id
                        }
                        None => {
                            diesel::insert_into(student_goals::table)
                                .values(&NewStudentGoal {
                                    student_id,
                                    goal_id,
                                    is_active: true,
                                    assigned_at: &now,
                                })
                                .execute(conn)?;
                            last_insert_id(conn)?
                        }
                    };
                    student_goals::table.find(id).first::<StudentGoal>(conn)?
                }
            };

            Ok(AssignedGoal {
                student_goal_id: assignment.id,
                student_id: assignment.student_id,
                is_active: assignment.is_active,
                assigned_at: assignment.assigned_at,
                goal,
            })
        })
    }

    /// Returns false when the student had no active assignment for the goal
    pub fn deactivate_goal(&self, student_id: i32, goal_id: i32) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let updated = diesel::update(
            student_goals::table
                .filter(student_goals::student_id.eq(student_id))
                .filter(student_goals::goal_id.eq(goal_id))
                .filter(student_goals::is_active.eq(true)),
        )
        .set(student_goals::is_active.eq(false))
        .execute(&mut conn)?;
        Ok(updated > 0)
    }

    pub fn count_active_goal_assignments(&self) -> Result<i64> {
        let mut conn = self.get_conn()?;
        Ok(student_goals::table
            .filter(student_goals::is_active.eq(true))
            .count()
            .get_result(&mut conn)?)
    }

    // ========================================================================
    // Schedule
    // ========================================================================

    /// Events ordered by date then start time, optionally within [from, to]
    pub fn list_schedule_events(
        &self,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<ScheduleEvent>> {
        let mut conn = self.get_conn()?;
        let mut query = schedule_events::table.into_boxed();
        if let Some((from, to)) = range {
            query = query.filter(schedule_events::date.between(
                from.format("%Y-%m-%d").to_string(),
                to.format("%Y-%m-%d").to_string(),
            ));
        }
        let rows = query
            .order((
                schedule_events::date.asc(),
                schedule_events::start_time.asc(),
                schedule_events::id.asc(),
            ))
            .load::<ScheduleEventRow>(&mut conn)?;
        hydrate_events(&mut conn, rows)
    }

    /// Events in the Monday-Friday week containing `date`
    pub fn list_week_events(&self, date: NaiveDate) -> Result<Vec<ScheduleEvent>> {
        let monday = week_start(date);
        self.list_schedule_events(Some((monday, week_end(monday))))
    }

    pub fn get_schedule_event(&self, id: i32) -> Result<Option<ScheduleEvent>> {
        let mut conn = self.get_conn()?;
        let row = schedule_events::table
            .find(id)
            .first::<ScheduleEventRow>(&mut conn)
            .optional()?;
        match row {
            Some(row) => Ok(hydrate_events(&mut conn, vec![row])?.pop()),
            None => Ok(None),
        }
    }

    pub fn create_schedule_event(
        &self,
        input: &ScheduleEventInput,
        defaults: &DefaultsConfig,
    ) -> Result<ScheduleEvent> {
        let date = normalize_date("date", &input.date)?;
        let start_time = normalize_time("startTime", &input.start_time)?;
        let end_time = match non_empty(&input.end_time) {
            Some(end) => {
                let end = normalize_time("endTime", end)?;
                if end <= start_time {
                    return Err(invalid("endTime must be after startTime"));
                }
                end
            }
            None => {
                let end = slot_end_time(&start_time).map_err(invalid)?;
                if end <= start_time {
                    return Err(invalid(format!(
                        "startTime {} leaves no room for a 30-minute session before midnight",
                        start_time
                    )));
                }
                end
            }
        };

        let mut conn = self.get_conn()?;
        ensure_teacher(&mut conn, input.teacher_id)?;
        ensure_classroom(&mut conn, input.classroom_id)?;
        for student_id in &input.student_ids {
            if !student_exists(&mut conn, *student_id)? {
                return Err(invalid(format!("Unknown studentId {}", student_id)));
            }
        }

        let now = now();
        let student_ids_json = encode_list(&input.student_ids);
        let new_event = NewScheduleEvent {
            date: &date,
            start_time: &start_time,
            end_time: &end_time,
            location: non_empty(&input.location).unwrap_or(defaults.location.as_str()),
            student_ids_json: &student_ids_json,
            teacher_id: input.teacher_id,
            classroom_id: input.classroom_id,
            session_type: non_empty(&input.session_type).unwrap_or(defaults.session_type.as_str()),
            status: EventStatus::Upcoming.as_str(),
            recurrence_rule: non_empty(&input.recurrence_rule),
            created_at: &now,
        };
        diesel::insert_into(schedule_events::table)
            .values(&new_event)
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;

        let row = schedule_events::table
            .find(id)
            .first::<ScheduleEventRow>(&mut conn)?;
        hydrate_events(&mut conn, vec![row])?
            .pop()
            .ok_or(DbError::NotFound("schedule event"))
    }

    pub fn update_event_status(
        &self,
        id: i32,
        status: EventStatus,
    ) -> Result<Option<ScheduleEvent>> {
        let mut conn = self.get_conn()?;
        let updated = diesel::update(schedule_events::table.find(id))
            .set(schedule_events::status.eq(status.as_str()))
            .execute(&mut conn)?;
        if updated == 0 {
            return Ok(None);
        }
        drop(conn);
        self.get_schedule_event(id)
    }

    pub fn count_events_between(&self, from: NaiveDate, to: NaiveDate) -> Result<i64> {
        let mut conn = self.get_conn()?;
        Ok(schedule_events::table
            .filter(schedule_events::date.between(
                from.format("%Y-%m-%d").to_string(),
                to.format("%Y-%m-%d").to_string(),
            ))
            .count()
            .get_result(&mut conn)?)
    }

    // ========================================================================
    // Holidays
    // ========================================================================

    pub fn list_holidays(&self, range: Option<(NaiveDate, NaiveDate)>) -> Result<Vec<Holiday>> {
        let mut conn = self.get_conn()?;
        let mut query = holidays::table.into_boxed();
        if let Some((from, to)) = range {
            query = query.filter(holidays::date.between(
                from.format("%Y-%m-%d").to_string(),
                to.format("%Y-%m-%d").to_string(),
            ));
        }
        Ok(query
            .order((holidays::date.asc(), holidays::id.asc()))
            .load::<Holiday>(&mut conn)?)
    }

    pub fn create_holiday(&self, input: &HolidayInput) -> Result<Holiday> {
        require_text("name", &input.name)?;
        let date = normalize_date("date", &input.date)?;
        let mut conn = self.get_conn()?;

        diesel::insert_into(holidays::table)
            .values(&NewHoliday {
                name: input.name.trim(),
                date: &date,
            })
            .execute(&mut conn)?;
        let id = last_insert_id(&mut conn)?;
        Ok(holidays::table.find(id).first::<Holiday>(&mut conn)?)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Create or update a session with its goal data and note, in one transaction.
    ///
    /// With an `eventId` the session for that event is updated in place.
    /// Goal-data entries whose goal is not actively assigned to the student
    /// are not stored; their goal ids come back in `skipped_goal_ids`.
    pub fn save_session(
        &self,
        input: &SessionInput,
        defaults: &DefaultsConfig,
    ) -> Result<SavedSession> {
        input.validate()?;
        let date = normalize_date("date", &input.date)?;
        let ctx = input.context(defaults);

        let mut pooled = self.get_conn()?;
        let conn: &mut SqliteConnection = &mut pooled;

        conn.transaction::<_, DbError, _>(|conn| {
            let student = students::table
                .find(input.student_id)
                .first::<StudentRow>(conn)
                .optional()?
                .ok_or(DbError::NotFound("student"))?;

            let now = now();
            let student_ids_json = encode_list(&[input.student_id]);
            let values = NewSession {
                event_id: input.event_id,
                date: &date,
                student_ids_json: &student_ids_json,
                duration_minutes: Some(input.duration),
                location: Some(ctx.location),
                engagement: Some(ctx.engagement.as_str()),
                created_at: &now,
                updated_at: &now,
            };

            let existing = match input.event_id {
                Some(event_id) => {
                    let event_exists = schedule_events::table
                        .find(event_id)
                        .select(schedule_events::id)
                        .first::<i32>(conn)
                        .optional()?
                        .is_some();
                    if !event_exists {
                        return Err(DbError::NotFound("schedule event"));
                    }
                    sessions::table
                        .filter(sessions::event_id.eq(event_id))
                        .select(sessions::id)
                        .first::<i32>(conn)
                        .optional()?
                }
                None => None,
            };

            let session_id = match existing {
                Some(id) => {
                    diesel::update(sessions::table.find(id))
                        .set((
                            sessions::date.eq(values.date),
                            sessions::student_ids_json.eq(values.student_ids_json),
                            sessions::duration_minutes.eq(values.duration_minutes),
                            sessions::location.eq(values.location),
                            sessions::engagement.eq(values.engagement),
                            sessions::updated_at.eq(values.updated_at),
                        ))
                        .execute(conn)?;
                    id
                }
                None => {
                    diesel::insert_into(sessions::table)
                        .values(&values)
                        .execute(conn)?;
                    last_insert_id(conn)?
                }
            };

            let mut skipped_goal_ids = Vec::new();
            let mut generated = Vec::new();
            for entry in &input.goal_data {
                let Some(student_goal) =
                    find_active_student_goal(conn, input.student_id, entry.goal_id)?
                else {
                    log::warn!(
                        "Session {}: goal {} is not assigned to student {}, skipping its data",
                        session_id,
                        entry.goal_id,
                        input.student_id
                    );
                    skipped_goal_ids.push(entry.goal_id);
                    continue;
                };

                upsert_goal_data(conn, session_id, &student_goal, entry)?;

                if input.notes.is_none() {
                    let goal = goal_templates::table
                        .find(entry.goal_id)
                        .first::<GoalTemplate>(conn)?;
                    generated.push(generate_note(
                        &student.name,
                        &ctx,
                        &entry.trial_data(),
                        &GoalFocus {
                            target_area: &goal.target_area,
                            category: &goal.category,
                        },
                    ));
                }
            }

            let content = match &input.notes {
                Some(written) => input
                    .goal_data
                    .iter()
                    .filter_map(|entry| written.get(&entry.goal_id.to_string()))
                    .map(|text| text.trim())
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n"),
                None => generated.join("\n\n"),
            };

            let note = if content.is_empty() {
                // Drop a note left over from an earlier save of this session
                diesel::delete(
                    notes::table
                        .filter(notes::session_id.eq(session_id))
                        .filter(notes::student_id.eq(input.student_id)),
                )
                .execute(conn)?;
                None
            } else {
                Some(upsert_note(conn, session_id, input.student_id, &content, &now)?)
            };

            let session = sessions::table.find(session_id).first::<SessionRow>(conn)?;
            Ok(SavedSession {
                session: session.into(),
                note,
                skipped_goal_ids,
            })
        })
    }

    /// Generate notes for a session form without saving anything
    pub fn preview_notes(
        &self,
        input: &SessionInput,
        defaults: &DefaultsConfig,
    ) -> Result<Vec<NotePreview>> {
        input.validate()?;
        let ctx = input.context(defaults);
        let mut conn = self.get_conn()?;

        let student = students::table
            .find(input.student_id)
            .first::<StudentRow>(&mut conn)
            .optional()?
            .ok_or(DbError::NotFound("student"))?;

        let mut previews = Vec::with_capacity(input.goal_data.len());
        for entry in &input.goal_data {
            let goal = goal_templates::table
                .find(entry.goal_id)
                .first::<GoalTemplate>(&mut conn)
                .optional()?
                .ok_or(DbError::NotFound("goal"))?;
            previews.push(NotePreview {
                goal_id: entry.goal_id,
                note: generate_note(
                    &student.name,
                    &ctx,
                    &entry.trial_data(),
                    &GoalFocus {
                        target_area: &goal.target_area,
                        category: &goal.category,
                    },
                ),
            });
        }
        Ok(previews)
    }

    /// Sessions newest first with their goal data and notes
    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionDetail>> {
        let mut conn = self.get_conn()?;
        let mut rows: Vec<Session> = sessions::table
            .order((sessions::date.desc(), sessions::id.desc()))
            .load::<SessionRow>(&mut conn)?
            .into_iter()
            .map(Session::from)
            .collect();

        if let Some(student_id) = filter.student_id {
            rows.retain(|s| s.student_ids.contains(&student_id));
        }

        let session_ids: Vec<i32> = rows.iter().map(|s| s.id).collect();
        let goal_data = session_goal_data::table
            .filter(session_goal_data::session_id.eq_any(&session_ids))
            .order(session_goal_data::id.asc())
            .load::<SessionGoalData>(&mut conn)?;
        let session_notes = notes::table
            .filter(notes::session_id.eq_any(&session_ids))
            .order(notes::id.asc())
            .load::<Note>(&mut conn)?;

        let student_goal_ids: Vec<i32> = goal_data.iter().map(|d| d.student_goal_id).collect();
        let goal_by_assignment: HashMap<i32, i32> = student_goals::table
            .filter(student_goals::id.eq_any(&student_goal_ids))
            .select((student_goals::id, student_goals::goal_id))
            .load::<(i32, i32)>(&mut conn)?
            .into_iter()
            .collect();
        let templates = load_goal_templates(&mut conn, goal_by_assignment.values().copied())?;

        let student_ids = goal_data
            .iter()
            .map(|d| d.student_id)
            .chain(session_notes.iter().map(|n| n.student_id));
        let names = load_student_refs(&mut conn, student_ids)?;

        let mut data_by_session: HashMap<i32, Vec<GoalDataDetail>> = HashMap::new();
        for data in goal_data {
            let goal = goal_by_assignment
                .get(&data.student_goal_id)
                .and_then(|goal_id| templates.get(goal_id))
                .cloned();
            let student = names.get(&data.student_id).cloned();
            data_by_session
                .entry(data.session_id)
                .or_default()
                .push(GoalDataDetail { data, goal, student });
        }

        let mut notes_by_session: HashMap<i32, Vec<NoteDetail>> = HashMap::new();
        for note in session_notes {
            let student = names.get(&note.student_id).cloned();
            notes_by_session
                .entry(note.session_id)
                .or_default()
                .push(NoteDetail { note, student });
        }

        let mut details: Vec<SessionDetail> = rows
            .into_iter()
            .map(|session| SessionDetail {
                goal_data: data_by_session.remove(&session.id).unwrap_or_default(),
                notes: notes_by_session.remove(&session.id).unwrap_or_default(),
                session,
            })
            .collect();

        if let Some(term) = non_empty(&filter.search) {
            let needle = term.to_lowercase();
            details.retain(|detail| session_matches(detail, &needle));
        }

        Ok(details)
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Every recorded goal-data row, joined to its session date and template
    pub fn goal_data_points(&self, student_id: Option<i32>) -> Result<Vec<GoalDataPoint>> {
        let mut conn = self.get_conn()?;
        let mut query = session_goal_data::table.into_boxed();
        if let Some(id) = student_id {
            query = query.filter(session_goal_data::student_id.eq(id));
        }
        let rows = query
            .order(session_goal_data::id.asc())
            .load::<SessionGoalData>(&mut conn)?;

        let session_ids: Vec<i32> = rows.iter().map(|r| r.session_id).collect();
        let dates: HashMap<i32, String> = sessions::table
            .filter(sessions::id.eq_any(&session_ids))
            .select((sessions::id, sessions::date))
            .load::<(i32, String)>(&mut conn)?
            .into_iter()
            .collect();

        let student_goal_ids: Vec<i32> = rows.iter().map(|r| r.student_goal_id).collect();
        let goal_by_assignment: HashMap<i32, i32> = student_goals::table
            .filter(student_goals::id.eq_any(&student_goal_ids))
            .select((student_goals::id, student_goals::goal_id))
            .load::<(i32, i32)>(&mut conn)?
            .into_iter()
            .collect();
        let templates = load_goal_templates(&mut conn, goal_by_assignment.values().copied())?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let date = dates.get(&row.session_id)?;
                let goal_id = goal_by_assignment.get(&row.student_goal_id)?;
                let goal = templates.get(goal_id)?;
                Some(GoalDataPoint {
                    session_id: row.session_id,
                    date: date.clone(),
                    student_id: row.student_id,
                    goal_id: *goal_id,
                    target_area: goal.target_area.clone(),
                    category: goal.category.clone(),
                    accuracy: row.accuracy,
                    trials: row.trials,
                })
            })
            .collect())
    }

    pub fn dashboard_stats(&self, today: NaiveDate) -> Result<DashboardStats> {
        let monday = week_start(today);
        Ok(DashboardStats {
            todays_sessions: self.count_events_between(today, today)?,
            active_students: self.count_active_students()?,
            sessions_this_week: self.count_events_between(monday, week_end(monday))?,
            goals_tracked: self.count_active_goal_assignments()?,
        })
    }
}

// ============================================================================
// Query helpers
// ============================================================================

fn student_exists(conn: &mut SqliteConnection, id: i32) -> Result<bool> {
    Ok(students::table
        .find(id)
        .select(students::id)
        .first::<i32>(conn)
        .optional()?
        .is_some())
}

fn ensure_teacher(conn: &mut SqliteConnection, id: Option<i32>) -> Result<()> {
    if let Some(id) = id {
        let found = teachers::table
            .find(id)
            .select(teachers::id)
            .first::<i32>(conn)
            .optional()?;
        if found.is_none() {
            return Err(invalid(format!("Unknown teacherId {}", id)));
        }
    }
    Ok(())
}

fn ensure_classroom(conn: &mut SqliteConnection, id: Option<i32>) -> Result<()> {
    if let Some(id) = id {
        let found = classrooms::table
            .find(id)
            .select(classrooms::id)
            .first::<i32>(conn)
            .optional()?;
        if found.is_none() {
            return Err(invalid(format!("Unknown classroomId {}", id)));
        }
    }
    Ok(())
}

fn find_active_student_goal(
    conn: &mut SqliteConnection,
    student_id: i32,
    goal_id: i32,
) -> Result<Option<StudentGoal>> {
    Ok(student_goals::table
        .filter(student_goals::student_id.eq(student_id))
        .filter(student_goals::goal_id.eq(goal_id))
        .filter(student_goals::is_active.eq(true))
        .first::<StudentGoal>(conn)
        .optional()?)
}

fn upsert_goal_data(
    conn: &mut SqliteConnection,
    session_id: i32,
    student_goal: &StudentGoal,
    entry: &GoalDataInput,
) -> Result<()> {
    let values = GoalDataValues {
        session_id,
        student_goal_id: student_goal.id,
        student_id: student_goal.student_id,
        accuracy: entry.accuracy,
        trials: entry.trials,
        prompt_level: entry.prompt_level.as_str(),
        prompt_types: entry.prompt_types.as_deref().unwrap_or(""),
        activity: entry.activity.trim(),
        utterance: entry.utterance.as_deref(),
        observations: entry.observations.as_deref(),
    };

    let existing = session_goal_data::table
        .filter(session_goal_data::session_id.eq(session_id))
        .filter(session_goal_data::student_goal_id.eq(student_goal.id))
        .filter(session_goal_data::student_id.eq(student_goal.student_id))
        .select(session_goal_data::id)
        .first::<i32>(conn)
        .optional()?;

    match existing {
        Some(id) => {
            diesel::update(session_goal_data::table.find(id))
                .set(&values)
                .execute(conn)?;
        }
        None => {
            diesel::insert_into(session_goal_data::table)
                .values(&values)
                .execute(conn)?;
        }
    }
    Ok(())
}

fn upsert_note(
    conn: &mut SqliteConnection,
    session_id: i32,
    student_id: i32,
    content: &str,
    now: &str,
) -> Result<Note> {
    let existing = notes::table
        .filter(notes::session_id.eq(session_id))
        .filter(notes::student_id.eq(student_id))
        .select(notes::id)
        .first::<i32>(conn)
        .optional()?;

    let id = match existing {
        Some(id) => {
            diesel::update(notes::table.find(id))
                .set((notes::content.eq(content), notes::updated_at.eq(now)))
                .execute(conn)?;
            id
        }
        None => {
            diesel::insert_into(notes::table)
                .values(&NewNote {
                    session_id,
                    student_id,
                    content,
                    created_at: now,
                    updated_at: now,
                })
                .execute(conn)?;
            last_insert_id(conn)?
        }
    };
    Ok(notes::table.find(id).first::<Note>(conn)?)
}

fn load_goal_templates(
    conn: &mut SqliteConnection,
    ids: impl Iterator<Item = i32>,
) -> Result<HashMap<i32, GoalTemplate>> {
    let ids: HashSet<i32> = ids.collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(goal_templates::table
        .filter(goal_templates::id.eq_any(ids.into_iter().collect::<Vec<_>>()))
        .load::<GoalTemplate>(conn)?
        .into_iter()
        .map(|g| (g.id, g))
        .collect())
}

fn load_student_refs(
    conn: &mut SqliteConnection,
    ids: impl Iterator<Item = i32>,
) -> Result<HashMap<i32, StudentRef>> {
    let ids: HashSet<i32> = ids.collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(students::table
        .filter(students::id.eq_any(ids.into_iter().collect::<Vec<_>>()))
        .select((students::id, students::name))
        .load::<(i32, String)>(conn)?
        .into_iter()
        .map(|(id, name)| (id, StudentRef { id, name }))
        .collect())
}

/// Active assignments with their templates, keyed by student id
fn load_active_goals(
    conn: &mut SqliteConnection,
    student_ids: &[i32],
) -> Result<HashMap<i32, Vec<AssignedGoal>>> {
    let assignments = student_goals::table
        .filter(student_goals::student_id.eq_any(student_ids))
        .filter(student_goals::is_active.eq(true))
        .order(student_goals::id.asc())
        .load::<StudentGoal>(conn)?;
    let templates = load_goal_templates(conn, assignments.iter().map(|a| a.goal_id))?;

    let mut by_student: HashMap<i32, Vec<AssignedGoal>> = HashMap::new();
    for assignment in assignments {
        if let Some(goal) = templates.get(&assignment.goal_id) {
            by_student
                .entry(assignment.student_id)
                .or_default()
                .push(AssignedGoal {
                    student_goal_id: assignment.id,
                    student_id: assignment.student_id,
                    is_active: assignment.is_active,
                    assigned_at: assignment.assigned_at,
                    goal: goal.clone(),
                });
        }
    }
    Ok(by_student)
}

fn hydrate_students(
    conn: &mut SqliteConnection,
    rows: Vec<StudentRow>,
) -> Result<Vec<StudentDetail>> {
    let teacher_ids: Vec<i32> = rows.iter().filter_map(|s| s.teacher_id).collect();
    let classroom_ids: Vec<i32> = rows.iter().filter_map(|s| s.classroom_id).collect();
    let student_ids: Vec<i32> = rows.iter().map(|s| s.id).collect();

    let teachers: HashMap<i32, Teacher> = teachers::table
        .filter(teachers::id.eq_any(&teacher_ids))
        .load::<Teacher>(conn)?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();
    let classrooms: HashMap<i32, Classroom> = classrooms::table
        .filter(classrooms::id.eq_any(&classroom_ids))
        .load::<Classroom>(conn)?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();
    let mut goals = load_active_goals(conn, &student_ids)?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let teacher = row.teacher_id.and_then(|id| teachers.get(&id).cloned());
            let classroom = row.classroom_id.and_then(|id| classrooms.get(&id).cloned());
            let goals = goals.remove(&row.id).unwrap_or_default();
            StudentDetail {
                student: row.into(),
                teacher,
                classroom,
                goals,
            }
        })
        .collect())
}

fn load_student_detail(conn: &mut SqliteConnection, id: i32) -> Result<Option<StudentDetail>> {
    let row = students::table
        .find(id)
        .first::<StudentRow>(conn)
        .optional()?;
    match row {
        Some(row) => Ok(hydrate_students(conn, vec![row])?.pop()),
        None => Ok(None),
    }
}

fn summarize_classrooms(
    conn: &mut SqliteConnection,
    rows: Vec<Classroom>,
) -> Result<Vec<ClassroomSummary>> {
    let teacher_ids: Vec<i32> = rows.iter().filter_map(|c| c.teacher_id).collect();
    let teachers: HashMap<i32, Teacher> = teachers::table
        .filter(teachers::id.eq_any(&teacher_ids))
        .load::<Teacher>(conn)?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    let mut summaries = Vec::with_capacity(rows.len());
    for classroom in rows {
        let student_count: i64 = students::table
            .filter(students::classroom_id.eq(classroom.id))
            .filter(students::is_active.eq(true))
            .count()
            .get_result(conn)?;
        summaries.push(ClassroomSummary {
            teacher: classroom.teacher_id.and_then(|id| teachers.get(&id).cloned()),
            classroom,
            student_count,
        });
    }
    Ok(summaries)
}

fn hydrate_events(
    conn: &mut SqliteConnection,
    rows: Vec<ScheduleEventRow>,
) -> Result<Vec<ScheduleEvent>> {
    let decoded: Vec<(ScheduleEventRow, Vec<i32>)> = rows
        .into_iter()
        .map(|row| {
            let ids = decode_list("student_ids", &row.student_ids_json);
            (row, ids)
        })
        .collect();
    let names = load_student_refs(conn, decoded.iter().flat_map(|(_, ids)| ids.iter().copied()))?;

    Ok(decoded
        .into_iter()
        .map(|(row, student_ids)| ScheduleEvent {
            students: student_ids
                .iter()
                .filter_map(|id| names.get(id).cloned())
                .collect(),
            student_ids,
            id: row.id,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            location: row.location,
            teacher_id: row.teacher_id,
            classroom_id: row.classroom_id,
            session_type: row.session_type,
            status: row.status,
            recurrence_rule: row.recurrence_rule,
            created_at: row.created_at,
        })
        .collect())
}

fn session_matches(detail: &SessionDetail, needle_lower: &str) -> bool {
    let in_notes = detail.notes.iter().any(|n| {
        contains_ci(&n.note.content, needle_lower)
            || n.student
                .as_ref()
                .map(|s| contains_ci(&s.name, needle_lower))
                .unwrap_or(false)
    });
    let in_goal_data = detail.goal_data.iter().any(|d| {
        contains_ci(&d.data.activity, needle_lower)
            || d.goal
                .as_ref()
                .map(|g| contains_ci(&g.target_area, needle_lower))
                .unwrap_or(false)
    });
    in_notes || in_goal_data
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn student_input(name: &str) -> StudentInput {
        StudentInput {
            name: name.to_string(),
            date_of_birth: "2018-03-15".to_string(),
            grade: "K".to_string(),
            classroom_id: None,
            teacher_id: None,
            guardians: vec!["Sarah Thompson".to_string()],
            iep_dates: vec!["2024-03-01".to_string()],
            notes: None,
        }
    }

    fn goal_input(area: &str, category: &str, text: &str) -> GoalTemplateInput {
        GoalTemplateInput {
            target_area: area.to_string(),
            category: category.to_string(),
            goal_text: text.to_string(),
            description: None,
        }
    }

    fn goal_entry(goal_id: i32, accuracy: i32) -> GoalDataInput {
        GoalDataInput {
            goal_id,
            accuracy,
            trials: 10,
            prompt_level: PromptLevel::Min,
            prompt_types: None,
            activity: "Picture cards".to_string(),
            utterance: None,
            observations: None,
        }
    }

    fn session_input(student_id: i32, entries: Vec<GoalDataInput>) -> SessionInput {
        SessionInput {
            date: "2025-01-13".to_string(),
            student_id,
            event_id: None,
            duration: 30,
            location: None,
            engagement: Engagement::Good,
            goal_data: entries,
            notes: None,
        }
    }

    #[derive(QueryableByName)]
    struct TableInfo {
        #[diesel(sql_type = diesel::sql_types::Text)]
        name: String,
    }

    fn table_names(db: &Database) -> Vec<String> {
        let mut conn = db.get_conn().unwrap();
        let tables: Vec<TableInfo> = diesel::sql_query(
            "SELECT name FROM sqlite_master \
             WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .load(&mut conn)
        .unwrap();
        tables.into_iter().map(|t| t.name).collect()
    }

    #[test]
    fn test_schema_tables_created() {
        let (_dir, db) = test_db();
        let tables = table_names(&db);
        for feature in CURRENT_SCHEMA.features {
            let table = match *feature {
                "goal_bank" => "goal_templates",
                other => other,
            };
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
        assert!(CURRENT_SCHEMA.features.contains(&"notes"));
        assert_eq!(CURRENT_SCHEMA.version_string(), "1.1.0");
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.create_student(&student_input("Emma Thompson")).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.count_active_students().unwrap(), 1);
    }

    #[test]
    fn test_create_and_get_student() {
        let (_dir, db) = test_db();
        let teacher = db
            .create_teacher(&TeacherInput {
                name: "Ms. Johnson".to_string(),
                email: Some("johnson@school.edu".to_string()),
                classroom: Some("Room 101".to_string()),
            })
            .unwrap();
        let mut input = student_input("Emma Thompson");
        input.teacher_id = Some(teacher.id);
        let created = db.create_student(&input).unwrap();

        assert!(created.student.is_active);
        assert_eq!(created.student.guardians, vec!["Sarah Thompson".to_string()]);
        assert_eq!(created.teacher.as_ref().map(|t| t.name.as_str()), Some("Ms. Johnson"));

        let fetched = db.get_student(created.student.id).unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(db.get_student(9999).unwrap().is_none());
    }

    #[test]
    fn test_create_student_validation() {
        let (_dir, db) = test_db();
        let mut bad_date = student_input("Emma");
        bad_date.date_of_birth = "03/15/2018".to_string();
        assert!(matches!(db.create_student(&bad_date), Err(DbError::Validation(_))));

        let mut unknown_teacher = student_input("Emma");
        unknown_teacher.teacher_id = Some(42);
        assert!(matches!(db.create_student(&unknown_teacher), Err(DbError::Validation(_))));

        let blank = student_input("  ");
        assert!(matches!(db.create_student(&blank), Err(DbError::Validation(_))));
    }

    #[test]
    fn test_rfc3339_dates_are_normalized() {
        let (_dir, db) = test_db();
        let mut input = student_input("Liam Chen");
        input.date_of_birth = "2017-11-22T00:00:00Z".to_string();
        let created = db.create_student(&input).unwrap();
        assert_eq!(created.student.date_of_birth, "2017-11-22");
    }

    #[test]
    fn test_update_student_patch_semantics() {
        let (_dir, db) = test_db();
        let teacher = db
            .create_teacher(&TeacherInput {
                name: "Mr. Smith".to_string(),
                email: None,
                classroom: None,
            })
            .unwrap();
        let mut input = student_input("Noah Williams");
        input.teacher_id = Some(teacher.id);
        input.notes = Some("Peer model".to_string());
        let id = db.create_student(&input).unwrap().student.id;

        // Absent fields untouched
        let patch = StudentPatch {
            grade: Some("1".to_string()),
            ..Default::default()
        };
        let updated = db.update_student(id, &patch).unwrap().unwrap();
        assert_eq!(updated.student.grade, "1");
        assert_eq!(updated.student.teacher_id, Some(teacher.id));
        assert_eq!(updated.student.notes.as_deref(), Some("Peer model"));

        // Explicit null clears
        let patch: StudentPatch =
            serde_json::from_str(r#"{"teacherId": null, "notes": null}"#).unwrap();
        let updated = db.update_student(id, &patch).unwrap().unwrap();
        assert_eq!(updated.student.teacher_id, None);
        assert_eq!(updated.student.notes, None);
        assert_eq!(updated.student.name, "Noah Williams");

        assert!(db.update_student(9999, &patch).unwrap().is_none());
    }

    #[test]
    fn test_soft_delete_hides_student_but_keeps_history() {
        let (_dir, db) = test_db();
        let emma = db.create_student(&student_input("Emma Thompson")).unwrap().student.id;
        let liam = db.create_student(&student_input("Liam Chen")).unwrap().student.id;
        let goal = db
            .create_goal_template(&goal_input("Articulation", "Initial /s/", "Produce /s/"))
            .unwrap();
        db.assign_goal(emma, goal.id).unwrap();
        db.save_session(
            &session_input(emma, vec![goal_entry(goal.id, 75)]),
            &DefaultsConfig::default(),
        )
        .unwrap();

        let removed = db.deactivate_student(emma).unwrap().unwrap();
        assert!(!removed.is_active);

        let active = db.list_active_students(&StudentFilter::default()).unwrap();
        let ids: Vec<i32> = active.iter().map(|s| s.student.id).collect();
        assert_eq!(ids, vec![liam]);

        // Still retrievable directly, and history intact
        assert!(db.get_student(emma).unwrap().is_some());
        let sessions = db
            .list_sessions(&SessionFilter {
                student_id: Some(emma),
                search: None,
            })
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].notes.len(), 1);
        assert_eq!(sessions[0].goal_data.len(), 1);

        assert!(db.deactivate_student(9999).unwrap().is_none());
    }

    #[test]
    fn test_student_search_matches_name_and_grade() {
        let (_dir, db) = test_db();
        db.create_student(&student_input("Emma Thompson")).unwrap();
        let mut liam = student_input("Liam Chen");
        liam.grade = "1".to_string();
        db.create_student(&liam).unwrap();

        let by_name = db
            .list_active_students(&StudentFilter { search: Some("CHEN".to_string()) })
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].student.name, "Liam Chen");

        let by_grade = db
            .list_active_students(&StudentFilter { search: Some("k".to_string()) })
            .unwrap();
        assert_eq!(by_grade.len(), 1);
        assert_eq!(by_grade[0].student.name, "Emma Thompson");
    }

    #[test]
    fn test_goal_filter_and_order() {
        let (_dir, db) = test_db();
        for (area, category, text) in [
            ("Phonology", "Fronting", "No fronting of /k/"),
            ("Articulation", "Initial /s/", "Produce /s/ initially"),
            ("Articulation", "Blends", "Produce /s/ blends"),
        ] {
            db.create_goal_template(&goal_input(area, category, text)).unwrap();
        }

        let all = db.list_goal_templates(&GoalFilter::default()).unwrap();
        let order: Vec<(&str, &str)> = all
            .iter()
            .map(|g| (g.target_area.as_str(), g.category.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Articulation", "Blends"),
                ("Articulation", "Initial /s/"),
                ("Phonology", "Fronting"),
            ]
        );

        let area = db
            .list_goal_templates(&GoalFilter {
                target_area: Some("Phonology".to_string()),
                search: None,
            })
            .unwrap();
        assert_eq!(area.len(), 1);

        let search = db
            .list_goal_templates(&GoalFilter {
                target_area: None,
                search: Some("blend".to_string()),
            })
            .unwrap();
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].category, "Blends");

        let wildcard = db
            .list_goal_templates(&GoalFilter {
                target_area: None,
                search: Some("%".to_string()),
            })
            .unwrap();
        assert!(wildcard.is_empty());

        let grouped = db.grouped_goal_templates(&GoalFilter::default()).unwrap();
        assert_eq!(grouped["Articulation"].len(), 2);
        assert_eq!(grouped["Phonology"]["Fronting"].len(), 1);
    }

    #[test]
    fn test_assign_goal_is_unique_while_active() {
        let (_dir, db) = test_db();
        let student = db.create_student(&student_input("Ava Patel")).unwrap().student.id;
        let goal = db
            .create_goal_template(&goal_input("AAC", "Requesting", "Use AAC to request"))
            .unwrap();

        let first = db.assign_goal(student, goal.id).unwrap();
        let second = db.assign_goal(student, goal.id).unwrap();
        assert_eq!(first.student_goal_id, second.student_goal_id);
        assert_eq!(db.active_goals(student).unwrap().len(), 1);
        assert_eq!(db.count_active_goal_assignments().unwrap(), 1);

        assert!(db.deactivate_goal(student, goal.id).unwrap());
        assert!(!db.deactivate_goal(student, goal.id).unwrap());
        assert!(db.active_goals(student).unwrap().is_empty());

        let again = db.assign_goal(student, goal.id).unwrap();
        assert_eq!(again.student_goal_id, first.student_goal_id);
        assert!(again.is_active);
        assert_eq!(db.active_goals(student).unwrap().len(), 1);

        assert!(matches!(db.assign_goal(student, 999), Err(DbError::NotFound("goal"))));
        assert!(matches!(db.assign_goal(999, goal.id), Err(DbError::NotFound("student"))));
    }

    #[test]
    fn test_save_session_generates_note_and_skips_unassigned() {
        let (_dir, db) = test_db();
        let student = db.create_student(&student_input("Emma Thompson")).unwrap().student.id;
        let assigned = db
            .create_goal_template(&goal_input("Articulation", "Initial /s/", "Produce /s/"))
            .unwrap();
        let unassigned = db
            .create_goal_template(&goal_input("Fluency", "Pacing", "Use appropriate rate"))
            .unwrap();
        db.assign_goal(student, assigned.id).unwrap();

        let saved = db
            .save_session(
                &session_input(
                    student,
                    vec![goal_entry(assigned.id, 85), goal_entry(unassigned.id, 40)],
                ),
                &DefaultsConfig::default(),
            )
            .unwrap();

        assert_eq!(saved.skipped_goal_ids, vec![unassigned.id]);
        assert_eq!(saved.session.student_ids, vec![student]);
        assert_eq!(saved.session.location.as_deref(), Some("Speech Room"));
        let note = saved.note.unwrap();
        assert!(note.content.contains("Emma Thompson"));
        assert!(note.content.contains("85%"));
        assert!(!note.content.contains("40%"));

        let sessions = db.list_sessions(&SessionFilter::default()).unwrap();
        assert_eq!(sessions[0].goal_data.len(), 1);
        assert_eq!(
            sessions[0].goal_data[0].goal.as_ref().map(|g| g.id),
            Some(assigned.id)
        );
    }

    #[test]
    fn test_save_session_with_event_updates_in_place() {
        let (_dir, db) = test_db();
        let student = db.create_student(&student_input("Sophia Rodriguez")).unwrap().student.id;
        let goal = db
            .create_goal_template(&goal_input("Phonology", "Fronting", "No fronting"))
            .unwrap();
        db.assign_goal(student, goal.id).unwrap();
        let event = db
            .create_schedule_event(
                &ScheduleEventInput {
                    date: "2025-01-14".to_string(),
                    start_time: "10:00".to_string(),
                    end_time: None,
                    location: None,
                    student_ids: vec![student],
                    teacher_id: None,
                    classroom_id: None,
                    session_type: None,
                    recurrence_rule: None,
                },
                &DefaultsConfig::default(),
            )
            .unwrap();

        let mut input = session_input(student, vec![goal_entry(goal.id, 55)]);
        input.event_id = Some(event.id);
        let first = db.save_session(&input, &DefaultsConfig::default()).unwrap();

        input.goal_data[0].accuracy = 72;
        input.notes = Some(BTreeMap::from([(goal.id.to_string(), "Rewritten note".to_string())]));
        let second = db.save_session(&input, &DefaultsConfig::default()).unwrap();

        assert_eq!(first.session.id, second.session.id);
        assert_eq!(second.note.as_ref().map(|n| n.content.as_str()), Some("Rewritten note"));

        let sessions = db.list_sessions(&SessionFilter::default()).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].goal_data.len(), 1);
        assert_eq!(sessions[0].goal_data[0].data.accuracy, 72);
        assert_eq!(sessions[0].notes.len(), 1);

        // A resave with only blank note text clears the earlier note
        input.notes = Some(BTreeMap::from([(goal.id.to_string(), "   ".to_string())]));
        let third = db.save_session(&input, &DefaultsConfig::default()).unwrap();
        assert_eq!(third.session.id, first.session.id);
        assert!(third.note.is_none());
        let sessions = db.list_sessions(&SessionFilter::default()).unwrap();
        assert!(sessions[0].notes.is_empty());

        input.event_id = Some(9999);
        assert!(matches!(
            db.save_session(&input, &DefaultsConfig::default()),
            Err(DbError::NotFound("schedule event"))
        ));
    }

    #[test]
    fn test_save_session_validation() {
        let (_dir, db) = test_db();
        let student = db.create_student(&student_input("Emma")).unwrap().student.id;
        let defaults = DefaultsConfig::default();

        let mut input = session_input(student, vec![goal_entry(1, 101)]);
        assert!(matches!(db.save_session(&input, &defaults), Err(DbError::Validation(_))));

        input.goal_data[0].accuracy = 50;
        input.goal_data[0].trials = 0;
        assert!(matches!(db.save_session(&input, &defaults), Err(DbError::Validation(_))));

        input.goal_data.clear();
        assert!(matches!(db.save_session(&input, &defaults), Err(DbError::Validation(_))));

        let mut short = session_input(student, vec![goal_entry(1, 50)]);
        short.duration = 2;
        assert!(matches!(db.save_session(&short, &defaults), Err(DbError::Validation(_))));

        let missing = session_input(4242, vec![goal_entry(1, 50)]);
        assert!(matches!(db.save_session(&missing, &defaults), Err(DbError::NotFound("student"))));
    }

    #[test]
    fn test_session_search() {
        let (_dir, db) = test_db();
        let student = db.create_student(&student_input("Liam Chen")).unwrap().student.id;
        let goal = db
            .create_goal_template(&goal_input(
                "Receptive Language",
                "Following Directions",
                "Follow 2-step directions",
            ))
            .unwrap();
        db.assign_goal(student, goal.id).unwrap();
        db.save_session(
            &session_input(student, vec![goal_entry(goal.id, 65)]),
            &DefaultsConfig::default(),
        )
        .unwrap();

        let hit = |term: &str| {
            db.list_sessions(&SessionFilter {
                student_id: None,
                search: Some(term.to_string()),
            })
            .unwrap()
            .len()
        };
        assert_eq!(hit("picture"), 1);
        assert_eq!(hit("receptive"), 1);
        assert_eq!(hit("liam"), 1);
        assert_eq!(hit("trampoline"), 0);
    }

    #[test]
    fn test_late_start_without_end_time_is_rejected() {
        let (_dir, db) = test_db();
        let input = ScheduleEventInput {
            date: "2025-01-15".to_string(),
            start_time: "23:45".to_string(),
            end_time: None,
            location: None,
            student_ids: vec![],
            teacher_id: None,
            classroom_id: None,
            session_type: None,
            recurrence_rule: None,
        };

        match db.create_schedule_event(&input, &DefaultsConfig::default()) {
            Err(DbError::Validation(message)) => {
                assert!(message.contains("startTime 23:45"), "{}", message);
                assert!(!message.contains("endTime"), "{}", message);
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let explicit = ScheduleEventInput {
            end_time: Some("23:00".to_string()),
            ..input
        };
        match db.create_schedule_event(&explicit, &DefaultsConfig::default()) {
            Err(DbError::Validation(message)) => assert!(message.contains("endTime")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_schedule_defaults_and_week_listing() {
        let (_dir, db) = test_db();
        let defaults = DefaultsConfig::default();
        let student = db.create_student(&student_input("Emma")).unwrap().student.id;
        let event = db
            .create_schedule_event(
                &ScheduleEventInput {
                    date: "2025-01-15".to_string(),
                    start_time: "09:30".to_string(),
                    end_time: None,
                    location: None,
                    student_ids: vec![student],
                    teacher_id: None,
                    classroom_id: None,
                    session_type: None,
                    recurrence_rule: None,
                },
                &defaults,
            )
            .unwrap();
        assert_eq!(event.end_time, "10:00");
        assert_eq!(event.location, "Speech Room");
        assert_eq!(event.session_type, "Individual");
        assert_eq!(event.status, "Upcoming");
        assert_eq!(event.students.len(), 1);

        let week = db
            .list_week_events(NaiveDate::from_ymd_opt(2025, 1, 13).unwrap())
            .unwrap();
        assert_eq!(week.len(), 1);
        let next_week = db
            .list_week_events(NaiveDate::from_ymd_opt(2025, 1, 20).unwrap())
            .unwrap();
        assert!(next_week.is_empty());

        let seen = db.update_event_status(event.id, EventStatus::Seen).unwrap().unwrap();
        assert_eq!(seen.status, "Seen");
        assert!(db.update_event_status(999, EventStatus::Seen).unwrap().is_none());
    }

    #[test]
    fn test_schedule_rejects_bad_times() {
        let (_dir, db) = test_db();
        let input = ScheduleEventInput {
            date: "2025-01-15".to_string(),
            start_time: "10:00".to_string(),
            end_time: Some("09:30".to_string()),
            location: None,
            student_ids: vec![],
            teacher_id: None,
            classroom_id: None,
            session_type: None,
            recurrence_rule: None,
        };
        assert!(matches!(
            db.create_schedule_event(&input, &DefaultsConfig::default()),
            Err(DbError::Validation(_))
        ));
    }

    #[test]
    fn test_goal_data_points_and_dashboard() {
        let (_dir, db) = test_db();
        let student = db.create_student(&student_input("Noah Williams")).unwrap().student.id;
        let goal = db
            .create_goal_template(&goal_input("Pragmatics", "Turn Taking", "Take turns"))
            .unwrap();
        db.assign_goal(student, goal.id).unwrap();
        db.save_session(
            &session_input(student, vec![goal_entry(goal.id, 90)]),
            &DefaultsConfig::default(),
        )
        .unwrap();

        let points = db.goal_data_points(Some(student)).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].target_area, "Pragmatics");
        assert_eq!(points[0].date, "2025-01-13");
        assert!(db.goal_data_points(Some(student + 1)).unwrap().is_empty());

        let stats = db
            .dashboard_stats(NaiveDate::from_ymd_opt(2025, 1, 13).unwrap())
            .unwrap();
        assert_eq!(stats.active_students, 1);
        assert_eq!(stats.goals_tracked, 1);
        assert_eq!(stats.todays_sessions, 0);
    }

    #[test]
    fn test_classrooms_and_holidays() {
        let (_dir, db) = test_db();
        let teacher = db
            .create_teacher(&TeacherInput {
                name: "Mrs. Davis".to_string(),
                email: None,
                classroom: None,
            })
            .unwrap();
        let room = db
            .create_classroom(&ClassroomInput {
                name: "Kindergarten - Room 101".to_string(),
                grade: Some("K".to_string()),
                teacher_id: Some(teacher.id),
            })
            .unwrap();
        let mut input = student_input("Emma");
        input.classroom_id = Some(room.classroom.id);
        db.create_student(&input).unwrap();

        let rooms = db.list_classrooms().unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].student_count, 1);
        assert_eq!(rooms[0].teacher.as_ref().map(|t| t.id), Some(teacher.id));

        db.create_holiday(&HolidayInput {
            name: "MLK Day".to_string(),
            date: "2025-01-20".to_string(),
        })
        .unwrap();
        let from = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        assert_eq!(db.list_holidays(Some((from, from))).unwrap().len(), 1);
        let before = from.pred_opt().unwrap();
        assert!(db.list_holidays(Some((before, before))).unwrap().is_empty());
    }
}
