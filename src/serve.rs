//! HTTP JSON API for the practice
//!
//! `fluentflow serve` → binds the configured address and answers `/api/*`.
//! Routing lives in [`Api::dispatch`] so it can be driven without a socket.

use crate::auth::Authenticator;
use crate::config::{Config, DefaultsConfig};
use crate::db::{
    parse_date, ClassroomInput, Database, DbError, GoalFilter, GoalTemplateInput, HolidayInput,
    ScheduleEventInput, SessionFilter, SessionInput, StudentFilter, StudentInput, StudentPatch,
    TeacherInput,
};
use crate::reports::{suggest_tier, ProgressReport, Tier};
use crate::schedule::{week_end, week_start, EventStatus, ScheduleGrid};
use chrono::NaiveDate;
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Read;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server};

/// Largest request body accepted
pub const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Failure of a single API request, mapped to an HTTP status
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(u64),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::PayloadTooLarge(_) => 413,
            Self::Internal => 500,
        }
    }

    fn not_found(what: &str) -> Self {
        let mut chars = what.chars();
        let label = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        Self::NotFound(format!("{} not found", label))
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Validation(message) => Self::BadRequest(message),
            DbError::NotFound(what) => Self::not_found(what),
            other => {
                log::error!("Database error: {}", other);
                Self::Internal
            }
        }
    }
}

/// Status code and JSON body of a handled request
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiReply {
    fn ok<T: Serialize>(value: &T) -> Result<Self, ApiError> {
        Self::with_status(200, value)
    }

    fn created<T: Serialize>(value: &T) -> Result<Self, ApiError> {
        Self::with_status(201, value)
    }

    fn with_status<T: Serialize>(status: u16, value: &T) -> Result<Self, ApiError> {
        let body = serde_json::to_value(value).map_err(|e| {
            log::error!("Failed to encode response: {}", e);
            ApiError::Internal
        })?;
        Ok(Self { status, body })
    }
}

impl From<ApiError> for ApiReply {
    fn from(err: ApiError) -> Self {
        Self {
            status: err.status(),
            body: json!({ "error": err.to_string() }),
        }
    }
}

// ============================================================================
// Request bodies that only the API layer needs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignGoalRequest {
    goal_id: i32,
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: String,
}

#[derive(Debug, Deserialize)]
struct TierRequest {
    accuracy: f64,
    trials: u32,
    sessions: u32,
}

#[derive(Debug, Serialize)]
struct TierResponse {
    tier: Tier,
}

#[derive(Debug, Default, Deserialize)]
struct WeekQuery {
    #[serde(default)]
    week: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportQuery {
    #[serde(default)]
    student_id: Option<i32>,
}

fn parse_query<T: DeserializeOwned>(query: &str) -> Result<T, ApiError> {
    serde_urlencoded::from_str(query)
        .map_err(|e| ApiError::BadRequest(format!("Invalid query string: {}", e)))
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))
}

fn parse_id(raw: &str) -> Result<i32, ApiError> {
    raw.parse::<i32>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid id '{}'", raw)))
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

// ============================================================================
// Dispatch
// ============================================================================

/// Everything a request handler needs
pub struct Api {
    db: Database,
    auth: Authenticator,
    defaults: DefaultsConfig,
}

impl Api {
    pub fn new(db: Database, auth: Authenticator, defaults: DefaultsConfig) -> Self {
        Self { db, auth, defaults }
    }

    pub fn from_config(db: Database, config: &Config) -> Self {
        Self::new(db, Authenticator::from_config(config), config.defaults.clone())
    }

    /// Handle one request. `authorization` is the raw Authorization header.
    pub fn dispatch(
        &self,
        method: &Method,
        url: &str,
        authorization: Option<&str>,
        body: &str,
    ) -> ApiReply {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));

        let reply = if self.auth.authorize(authorization) {
            self.route(method, path, query, body)
                .unwrap_or_else(ApiReply::from)
        } else {
            log::warn!("Rejected unauthenticated {} {}", method, path);
            ApiReply::from(ApiError::Unauthorized)
        };

        log::info!("{} {} {}", method, path, reply.status);
        reply
    }

    fn route(
        &self,
        method: &Method,
        path: &str,
        query: &str,
        body: &str,
    ) -> Result<ApiReply, ApiError> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            // Students
            (Method::Get, ["api", "students"]) => {
                let filter: StudentFilter = parse_query(query)?;
                ApiReply::ok(&self.db.list_active_students(&filter)?)
            }
            (Method::Post, ["api", "students"]) => {
                let input: StudentInput = parse_body(body)?;
                ApiReply::created(&self.db.create_student(&input)?)
            }
            (Method::Get, ["api", "students", id]) => {
                let student = self.db.get_student(parse_id(id)?)?;
                ApiReply::ok(&student.ok_or_else(|| ApiError::not_found("student"))?)
            }
            (Method::Patch, ["api", "students", id]) => {
                let patch: StudentPatch = parse_body(body)?;
                let student = self.db.update_student(parse_id(id)?, &patch)?;
                ApiReply::ok(&student.ok_or_else(|| ApiError::not_found("student"))?)
            }
            (Method::Delete, ["api", "students", id]) => {
                let student = self.db.deactivate_student(parse_id(id)?)?;
                ApiReply::ok(&student.ok_or_else(|| ApiError::not_found("student"))?)
            }

            // Goal assignments
            (Method::Get, ["api", "students", id, "goals"]) => {
                ApiReply::ok(&self.db.active_goals(parse_id(id)?)?)
            }
            (Method::Post, ["api", "students", id, "goals"]) => {
                let request: AssignGoalRequest = parse_body(body)?;
                ApiReply::created(&self.db.assign_goal(parse_id(id)?, request.goal_id)?)
            }
            (Method::Delete, ["api", "students", id, "goals", goal_id]) => {
                if !self.db.deactivate_goal(parse_id(id)?, parse_id(goal_id)?)? {
                    return Err(ApiError::not_found("goal assignment"));
                }
                ApiReply::ok(&json!({ "deactivated": true }))
            }

            // Teachers and classrooms
            (Method::Get, ["api", "teachers"]) => ApiReply::ok(&self.db.list_teachers()?),
            (Method::Post, ["api", "teachers"]) => {
                let input: TeacherInput = parse_body(body)?;
                ApiReply::created(&self.db.create_teacher(&input)?)
            }
            (Method::Get, ["api", "classrooms"]) => ApiReply::ok(&self.db.list_classrooms()?),
            (Method::Post, ["api", "classrooms"]) => {
                let input: ClassroomInput = parse_body(body)?;
                ApiReply::created(&self.db.create_classroom(&input)?)
            }

            // Goal bank
            (Method::Get, ["api", "goals"]) => {
                let filter: GoalFilter = parse_query(query)?;
                ApiReply::ok(&self.db.list_goal_templates(&filter)?)
            }
            (Method::Get, ["api", "goals", "grouped"]) => {
                let filter: GoalFilter = parse_query(query)?;
                ApiReply::ok(&self.db.grouped_goal_templates(&filter)?)
            }
            (Method::Post, ["api", "goals"]) => {
                let input: GoalTemplateInput = parse_body(body)?;
                ApiReply::created(&self.db.create_goal_template(&input)?)
            }
            (Method::Get, ["api", "goals", id]) => {
                let goal = self.db.get_goal_template(parse_id(id)?)?;
                ApiReply::ok(&goal.ok_or_else(|| ApiError::not_found("goal"))?)
            }

            // Schedule
            (Method::Get, ["api", "schedule"]) => {
                let week: WeekQuery = parse_query(query)?;
                let events = match week.week {
                    Some(date) => self.db.list_week_events(parse_date("week", &date)?)?,
                    None => self.db.list_schedule_events(None)?,
                };
                ApiReply::ok(&events)
            }
            (Method::Post, ["api", "schedule"]) => {
                let input: ScheduleEventInput = parse_body(body)?;
                ApiReply::created(&self.db.create_schedule_event(&input, &self.defaults)?)
            }
            (Method::Get, ["api", "schedule", "grid"]) => {
                let week: WeekQuery = parse_query(query)?;
                let anchor = match week.week {
                    Some(date) => parse_date("week", &date)?,
                    None => today(),
                };
                let monday = week_start(anchor);
                let range = Some((monday, week_end(monday)));
                let events = self.db.list_schedule_events(range)?;
                let holidays = self.db.list_holidays(range)?;
                ApiReply::ok(&ScheduleGrid::build(monday, events, &holidays))
            }
            (Method::Patch, ["api", "schedule", id, "status"]) => {
                let request: StatusRequest = parse_body(body)?;
                let status: EventStatus = request.status.parse().map_err(ApiError::BadRequest)?;
                let event = self.db.update_event_status(parse_id(id)?, status)?;
                ApiReply::ok(&event.ok_or_else(|| ApiError::not_found("schedule event"))?)
            }

            // Sessions and notes
            (Method::Get, ["api", "sessions"]) => {
                let filter: SessionFilter = parse_query(query)?;
                ApiReply::ok(&self.db.list_sessions(&filter)?)
            }
            (Method::Post, ["api", "sessions"]) => {
                let input: SessionInput = parse_body(body)?;
                let saved = self.db.save_session(&input, &self.defaults)?;
                if !saved.skipped_goal_ids.is_empty() {
                    log::info!(
                        "Session {} saved without goals {:?}",
                        saved.session.id,
                        saved.skipped_goal_ids
                    );
                }
                ApiReply::ok(&saved)
            }
            (Method::Post, ["api", "notes", "preview"]) => {
                let input: SessionInput = parse_body(body)?;
                ApiReply::ok(&self.db.preview_notes(&input, &self.defaults)?)
            }

            // Holidays
            (Method::Get, ["api", "holidays"]) => ApiReply::ok(&self.db.list_holidays(None)?),
            (Method::Post, ["api", "holidays"]) => {
                let input: HolidayInput = parse_body(body)?;
                ApiReply::created(&self.db.create_holiday(&input)?)
            }

            // Reports
            (Method::Get, ["api", "reports"]) => {
                let report: ReportQuery = parse_query(query)?;
                if let Some(student_id) = report.student_id {
                    if self.db.get_student(student_id)?.is_none() {
                        return Err(ApiError::not_found("student"));
                    }
                }
                let points = self.db.goal_data_points(report.student_id)?;
                ApiReply::ok(&ProgressReport::build(&points))
            }
            (Method::Post, ["api", "reports", "tier"]) => {
                let request: TierRequest = parse_body(body)?;
                if !(0.0..=100.0).contains(&request.accuracy) {
                    return Err(ApiError::BadRequest(
                        "accuracy must be between 0 and 100".to_string(),
                    ));
                }
                ApiReply::ok(&TierResponse {
                    tier: suggest_tier(request.accuracy, request.trials, request.sessions),
                })
            }
            (Method::Get, ["api", "dashboard"]) => ApiReply::ok(&self.db.dashboard_stats(today())?),

            _ => Err(ApiError::NotFound("Not found".to_string())),
        }
    }
}

// ============================================================================
// Server loop
// ============================================================================

/// Serve the API until the process is stopped
pub fn start_server(config: &Config, db: Database) -> std::io::Result<()> {
    let api = Api::from_config(db, config);
    let addr = config.bind_addr();
    let server = Server::http(&addr)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    if api.auth.is_empty() {
        log::warn!(
            "No API tokens configured; every request will be rejected. Run `fluentflow token`."
        );
    }

    eprintln!("\n{}", "FluentFlow".green().bold());
    eprintln!("   API: http://{}/api", addr);
    eprintln!("   Press Ctrl+C to stop\n");

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(&api, request) {
            log::error!("Failed to send response: {}", e);
        }
    }

    Ok(())
}

fn handle_request(api: &Api, mut request: Request) -> std::io::Result<()> {
    let method = request.method().clone();
    let url = request.url().to_string();
    let authorization = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string());

    let reply = match read_body(request.as_reader(), MAX_BODY_BYTES) {
        Ok(body) => api.dispatch(&method, &url, authorization.as_deref(), &body),
        Err(e) => {
            log::warn!("{} {} rejected: {}", method, url, e);
            ApiReply::from(e)
        }
    };

    let json = serde_json::to_string(&reply.body)?;
    let mut response = Response::from_string(json).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    request.respond(response)
}

/// Read at most `limit` bytes of body; anything longer is rejected unread
fn read_body(reader: impl Read, limit: u64) -> Result<String, ApiError> {
    let mut bytes = Vec::new();
    reader
        .take(limit + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| ApiError::BadRequest(format!("Failed to read body: {}", e)))?;
    if bytes.len() as u64 > limit {
        return Err(ApiError::PayloadTooLarge(limit));
    }
    String::from_utf8(bytes).map_err(|_| ApiError::BadRequest("Body is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_token;
    use tempfile::TempDir;

    const TOKEN: &str = "Bearer test-token";

    fn test_api() -> (TempDir, Api) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("api.db")).unwrap();
        let auth = Authenticator::from_hashes([hash_token("test-token")]);
        (dir, Api::new(db, auth, DefaultsConfig::default()))
    }

    // === ApiError Tests ===

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::Unauthorized.status(), 401);
        assert_eq!(ApiError::BadRequest("x".into()).status(), 400);
        assert_eq!(ApiError::not_found("student").status(), 404);
        assert_eq!(ApiError::Internal.status(), 500);
        assert_eq!(ApiError::PayloadTooLarge(MAX_BODY_BYTES).status(), 413);
    }

    #[test]
    fn test_read_body_limit() {
        let body = read_body("{\"name\": \"Emma\"}".as_bytes(), 64).unwrap();
        assert_eq!(body, "{\"name\": \"Emma\"}");

        let exact = "x".repeat(64);
        assert_eq!(read_body(exact.as_bytes(), 64).unwrap().len(), 64);

        let oversized = "x".repeat(65);
        let err = read_body(oversized.as_bytes(), 64).unwrap_err();
        assert_eq!(err.status(), 413);
        assert_eq!(err.to_string(), "Request body exceeds 64 bytes");
    }

    #[test]
    fn test_db_errors_map_to_api_errors() {
        let err = ApiError::from(DbError::NotFound("schedule event"));
        assert_eq!(err.to_string(), "Schedule event not found");

        let err = ApiError::from(DbError::Validation(
            "duration must be between 5 and 120 minutes".into(),
        ));
        assert_eq!(err.status(), 400);

        let err = ApiError::from(DbError::Connection("disk on fire at /secret/path".into()));
        assert_eq!(err.status(), 500);
        let reply = ApiReply::from(err);
        assert_eq!(reply.body["error"], "Internal server error");
    }

    // === Dispatch Tests ===

    #[test]
    fn test_missing_or_wrong_token_is_401() {
        let (_dir, api) = test_api();
        let reply = api.dispatch(&Method::Get, "/api/students", None, "");
        assert_eq!(reply.status, 401);
        let reply = api.dispatch(&Method::Get, "/api/students", Some("Bearer nope"), "");
        assert_eq!(reply.status, 401);
    }

    #[test]
    fn test_unknown_route_is_404() {
        let (_dir, api) = test_api();
        let reply = api.dispatch(&Method::Get, "/api/unicorns", Some(TOKEN), "");
        assert_eq!(reply.status, 404);
        assert_eq!(reply.body["error"], "Not found");
    }

    #[test]
    fn test_malformed_json_is_400() {
        let (_dir, api) = test_api();
        let reply = api.dispatch(&Method::Post, "/api/students", Some(TOKEN), "{not json");
        assert_eq!(reply.status, 400);
        let reply = api.dispatch(&Method::Get, "/api/students/abc", Some(TOKEN), "");
        assert_eq!(reply.status, 400);
    }

    #[test]
    fn test_tier_endpoint() {
        let (_dir, api) = test_api();
        let reply = api.dispatch(
            &Method::Post,
            "/api/reports/tier",
            Some(TOKEN),
            r#"{"accuracy": 85, "trials": 32, "sessions": 4}"#,
        );
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["tier"], "Advance");

        let reply = api.dispatch(
            &Method::Post,
            "/api/reports/tier",
            Some(TOKEN),
            r#"{"accuracy": 140, "trials": 32, "sessions": 4}"#,
        );
        assert_eq!(reply.status, 400);
    }

    #[test]
    fn test_bad_status_value_is_400() {
        let (_dir, api) = test_api();
        let reply = api.dispatch(
            &Method::Patch,
            "/api/schedule/1/status",
            Some(TOKEN),
            r#"{"status": "Cancelled"}"#,
        );
        assert_eq!(reply.status, 400);
    }
}
