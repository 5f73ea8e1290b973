//! Goal bank and demo data
//!
//! `fluentflow seed` loads the built-in goal bank; `--demo` adds a small
//! caseload (teachers, classrooms, students, assignments, one week of
//! schedule, school holidays) for trying the API out.

use crate::config::DefaultsConfig;
use crate::db::{
    ClassroomInput, Database, DbError, GoalFilter, GoalTemplate, GoalTemplateInput, HolidayInput,
    Result, ScheduleEventInput, StudentInput, TeacherInput,
};
use crate::schedule::{week_start, EventStatus};
use chrono::{Duration, NaiveDate};

const GOAL_BANK: &str = include_str!("goal_bank.json");

/// What a seeding run changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub goals_added: usize,
    pub goals_skipped: usize,
    pub students_added: usize,
    pub events_added: usize,
    pub holidays_added: usize,
    /// Demo data was requested but the database already had students
    pub demo_skipped: bool,
}

/// The built-in goal templates
pub fn goal_bank() -> Result<Vec<GoalTemplateInput>> {
    serde_json::from_str(GOAL_BANK)
        .map_err(|e| DbError::Validation(format!("built-in goal bank is invalid: {}", e)))
}

/// Insert every goal-bank template not already present
pub fn seed_goal_bank(db: &Database) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    for template in goal_bank()? {
        let existing =
            db.find_goal_template(&template.target_area, &template.category, &template.goal_text)?;
        if existing.is_some() {
            summary.goals_skipped += 1;
            continue;
        }
        db.create_goal_template(&template)?;
        summary.goals_added += 1;
    }
    log::info!(
        "Goal bank: {} added, {} already present",
        summary.goals_added,
        summary.goals_skipped
    );
    Ok(summary)
}

struct DemoStudent {
    name: &'static str,
    date_of_birth: &'static str,
    grade: &'static str,
    classroom: usize,
    guardians: [&'static str; 2],
    iep_dates: &'static [&'static str],
    notes: &'static str,
    goals: &'static [&'static str],
}

const DEMO_STUDENTS: [DemoStudent; 5] = [
    DemoStudent {
        name: "Emma Thompson",
        date_of_birth: "2018-03-15",
        grade: "K",
        classroom: 0,
        guardians: ["Sarah Thompson", "John Thompson"],
        iep_dates: &["2023-09-01", "2024-03-01"],
        notes: "Very engaged, responds well to visual supports",
        goals: &["/s/ in initial", "/s/ blends", "conversation"],
    },
    DemoStudent {
        name: "Liam Chen",
        date_of_birth: "2017-11-22",
        grade: "1",
        classroom: 1,
        guardians: ["Michelle Chen", "David Chen"],
        iep_dates: &["2023-10-15"],
        notes: "Benefits from movement breaks",
        goals: &["2-step directions", "5-7 word sentences", "wh-questions"],
    },
    DemoStudent {
        name: "Sophia Rodriguez",
        date_of_birth: "2018-07-08",
        grade: "K",
        classroom: 0,
        guardians: ["Maria Rodriguez", "Carlos Rodriguez"],
        iep_dates: &["2023-09-01"],
        notes: "Bilingual - Spanish/English",
        goals: &["final consonants", "fronting"],
    },
    DemoStudent {
        name: "Noah Williams",
        date_of_birth: "2017-05-30",
        grade: "1",
        classroom: 1,
        guardians: ["Ashley Williams", "Michael Williams"],
        iep_dates: &["2023-11-01", "2024-05-01"],
        notes: "Peer model in group sessions",
        goals: &["conversational turns", "maintain topic", "peer interactions"],
    },
    DemoStudent {
        name: "Ava Patel",
        date_of_birth: "2018-09-12",
        grade: "K",
        classroom: 0,
        guardians: ["Priya Patel", "Raj Patel"],
        iep_dates: &["2024-01-15"],
        notes: "Uses AAC device for communication",
        goals: &["AAC to make requests", "core vocabulary on AAC", "2+ words on AAC"],
    },
];

struct DemoEvent {
    weekday: i64,
    start: &'static str,
    end: &'static str,
    location: &'static str,
    students: &'static [usize],
    teacher: usize,
    status: EventStatus,
}

impl DemoEvent {
    const fn new(
        weekday: i64,
        (start, end): (&'static str, &'static str),
        location: &'static str,
        students: &'static [usize],
        teacher: usize,
        status: EventStatus,
    ) -> Self {
        Self {
            weekday,
            start,
            end,
            location,
            students,
            teacher,
            status,
        }
    }

    fn is_group(&self) -> bool {
        self.students.len() > 1
    }
}

const DEMO_EVENTS: [DemoEvent; 8] = [
    DemoEvent::new(0, ("09:00", "09:30"), "Speech Room", &[0], 0, EventStatus::Seen),
    DemoEvent::new(0, ("09:45", "10:15"), "Speech Room", &[1, 3], 1, EventStatus::Seen),
    DemoEvent::new(1, ("10:00", "10:30"), "Classroom", &[2], 0, EventStatus::Missed),
    DemoEvent::new(2, ("09:00", "09:30"), "Speech Room", &[0], 0, EventStatus::Upcoming),
    DemoEvent::new(2, ("13:00", "13:30"), "Speech Room", &[4], 0, EventStatus::Upcoming),
    DemoEvent::new(3, ("09:45", "10:15"), "Speech Room", &[1, 3], 1, EventStatus::Upcoming),
    DemoEvent::new(4, ("09:00", "09:30"), "Speech Room", &[0], 0, EventStatus::Upcoming),
    DemoEvent::new(4, ("10:00", "10:30"), "Speech Room", &[2], 0, EventStatus::Upcoming),
];

const DEMO_HOLIDAYS: [(&str, &str); 13] = [
    ("Winter Break", "2024-12-23"),
    ("Winter Break", "2024-12-24"),
    ("Winter Break", "2024-12-25"),
    ("Winter Break", "2024-12-26"),
    ("Winter Break", "2024-12-27"),
    ("New Year's Day", "2025-01-01"),
    ("MLK Day", "2025-01-20"),
    ("Presidents Day", "2025-02-17"),
    ("Spring Break", "2025-03-24"),
    ("Spring Break", "2025-03-25"),
    ("Spring Break", "2025-03-26"),
    ("Spring Break", "2025-03-27"),
    ("Spring Break", "2025-03-28"),
];

fn find_goal<'a>(bank: &'a [GoalTemplate], needle: &str) -> Result<&'a GoalTemplate> {
    bank.iter()
        .find(|g| g.goal_text.contains(needle))
        .ok_or(DbError::NotFound("goal template"))
}

/// Seed the goal bank plus demo records, with the schedule placed in the
/// week containing `today`. Demo records are only added to a database with
/// no active students.
pub fn seed_demo(
    db: &Database,
    today: NaiveDate,
    defaults: &DefaultsConfig,
) -> Result<SeedSummary> {
    let mut summary = seed_goal_bank(db)?;
    if db.count_active_students()? > 0 {
        log::info!("Students already exist, skipping demo data");
        summary.demo_skipped = true;
        return Ok(summary);
    }

    let teachers = [
        ("Ms. Johnson", "johnson@school.edu", "Room 101"),
        ("Mr. Smith", "smith@school.edu", "Room 102"),
        ("Mrs. Davis", "davis@school.edu", "Room 103"),
    ]
    .iter()
    .map(|(name, email, room)| {
        db.create_teacher(&TeacherInput {
            name: name.to_string(),
            email: Some(email.to_string()),
            classroom: Some(room.to_string()),
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let classrooms = [
        ("Kindergarten - Room 101", "K", teachers[0].id),
        ("1st Grade - Room 102", "1", teachers[1].id),
    ]
    .iter()
    .map(|(name, grade, teacher_id)| {
        db.create_classroom(&ClassroomInput {
            name: name.to_string(),
            grade: Some(grade.to_string()),
            teacher_id: Some(*teacher_id),
        })
    })
    .collect::<Result<Vec<_>>>()?;

    let bank = db.list_goal_templates(&GoalFilter::default())?;
    let mut student_ids = Vec::with_capacity(DEMO_STUDENTS.len());
    for demo in &DEMO_STUDENTS {
        let classroom = &classrooms[demo.classroom];
        let created = db.create_student(&StudentInput {
            name: demo.name.to_string(),
            date_of_birth: demo.date_of_birth.to_string(),
            grade: demo.grade.to_string(),
            classroom_id: Some(classroom.classroom.id),
            teacher_id: classroom.classroom.teacher_id,
            guardians: demo.guardians.iter().map(|g| g.to_string()).collect(),
            iep_dates: demo.iep_dates.iter().map(|d| d.to_string()).collect(),
            notes: Some(demo.notes.to_string()),
        })?;
        for needle in demo.goals {
            db.assign_goal(created.student.id, find_goal(&bank, needle)?.id)?;
        }
        student_ids.push(created.student.id);
        summary.students_added += 1;
    }

    let monday = week_start(today);
    for demo in &DEMO_EVENTS {
        let session_type = if demo.is_group() {
            "Group"
        } else {
            defaults.session_type.as_str()
        };
        let event = db.create_schedule_event(
            &ScheduleEventInput {
                date: (monday + Duration::days(demo.weekday)).format("%Y-%m-%d").to_string(),
                start_time: demo.start.to_string(),
                end_time: Some(demo.end.to_string()),
                location: Some(demo.location.to_string()),
                student_ids: demo.students.iter().map(|i| student_ids[*i]).collect(),
                teacher_id: Some(teachers[demo.teacher].id),
                classroom_id: (demo.location == "Classroom").then(|| classrooms[0].classroom.id),
                session_type: Some(session_type.to_string()),
                recurrence_rule: None,
            },
            defaults,
        )?;
        if demo.status != EventStatus::Upcoming {
            db.update_event_status(event.id, demo.status)?;
        }
        summary.events_added += 1;
    }

    for (name, date) in DEMO_HOLIDAYS {
        db.create_holiday(&HolidayInput {
            name: name.to_string(),
            date: date.to_string(),
        })?;
        summary.holidays_added += 1;
    }

    log::info!(
        "Demo data: {} students, {} events, {} holidays",
        summary.students_added,
        summary.events_added,
        summary.holidays_added
    );
    Ok(summary)
}
