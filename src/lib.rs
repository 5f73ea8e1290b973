//! FluentFlow - practice management for speech-language therapy
//!
//! Student records, a therapy-goal bank, session documentation with
//! generated progress notes, a weekly scheduler and progress reports,
//! served as a JSON API over SQLite.
//!
//! # Quick Start
//!
//! ```no_run
//! use fluentflow::db::{GoalFilter, StudentInput};
//! use fluentflow::Database;
//!
//! let db = Database::new("fluentflow.db").unwrap();
//! fluentflow::seed::seed_goal_bank(&db).unwrap();
//!
//! let student = db.create_student(&StudentInput {
//!     name: "Emma Thompson".into(),
//!     date_of_birth: "2018-03-15".into(),
//!     grade: "K".into(),
//!     classroom_id: None,
//!     teacher_id: None,
//!     guardians: vec![],
//!     iep_dates: vec![],
//!     notes: None,
//! }).unwrap();
//!
//! let goals = db.list_goal_templates(&GoalFilter::default()).unwrap();
//! db.assign_goal(student.student.id, goals[0].id).unwrap();
//! ```

pub mod auth;
pub mod config;
pub mod db;
pub mod init;
pub mod notes;
pub mod reports;
pub mod schedule;
pub mod schema;
pub mod seed;
pub mod serve;

pub use config::Config;
pub use db::{Database, DbError, CURRENT_SCHEMA};
pub use notes::generate_note;
pub use reports::{suggest_tier, Tier};
pub use schedule::ScheduleGrid;
pub use serve::{Api, ApiError, ApiReply};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        assert_eq!(CURRENT_SCHEMA.to_string(), "v1.1.0 (practice-management)");
        assert_eq!(suggest_tier(90.0, 30, 3), Tier::Advance);
    }
}
