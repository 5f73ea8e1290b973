//! Weekly scheduler grid
//!
//! A fixed Monday-Friday grid of 30-minute slots from 07:00 to 17:30. Events
//! land in the cell whose slot equals their start time and whose day equals
//! their date. Nothing is stretched across slots or nudged into a neighbour.

use crate::db::{Holiday, ScheduleEvent};
use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const TIME_SLOTS: [&str; 22] = [
    "07:00", "07:30", "08:00", "08:30", "09:00", "09:30", "10:00", "10:30", "11:00", "11:30",
    "12:00", "12:30", "13:00", "13:30", "14:00", "14:30", "15:00", "15:30", "16:00", "16:30",
    "17:00", "17:30",
];

pub const WEEK_DAYS: [&str; 5] = ["Mon", "Tue", "Wed", "Thu", "Fri"];

pub const SLOT_MINUTES: i64 = 30;

/// Attendance state of a scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventStatus {
    Upcoming,
    Seen,
    Missed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "Upcoming",
            Self::Seen => "Seen",
            Self::Missed => "Missed",
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Upcoming" => Ok(Self::Upcoming),
            "Seen" => Ok(Self::Seen),
            "Missed" => Ok(Self::Missed),
            other => Err(format!(
                "Invalid status '{}'. Expected one of: Upcoming, Seen, Missed",
                other
            )),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monday of the week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Friday of the week starting on `monday`
pub fn week_end(monday: NaiveDate) -> NaiveDate {
    monday + Duration::days(WEEK_DAYS.len() as i64 - 1)
}

/// End time for an event created in the slot starting at `start` ("HH:MM")
pub fn slot_end_time(start: &str) -> Result<String, String> {
    let time = NaiveTime::parse_from_str(start, "%H:%M")
        .map_err(|_| format!("Invalid time '{}'. Expected HH:MM", start))?;
    Ok((time + Duration::minutes(SLOT_MINUTES)).format("%H:%M").to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridDay {
    pub label: &'static str,
    pub date: String,
    pub holiday: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    pub date: String,
    pub events: Vec<ScheduleEvent>,
    /// End time offered when creating an event in this empty cell
    pub new_event_end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub time: &'static str,
    pub cells: Vec<GridCell>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleGrid {
    pub week_start: String,
    pub days: Vec<GridDay>,
    pub rows: Vec<GridRow>,
    /// Events of this week that start off-slot or outside the grid hours
    pub unplaced: Vec<ScheduleEvent>,
}

impl ScheduleGrid {
    /// Bucket already-fetched events into the week beginning at `monday`.
    /// Events from other weeks or weekends are ignored.
    pub fn build(monday: NaiveDate, events: Vec<ScheduleEvent>, holidays: &[Holiday]) -> Self {
        let dates: Vec<NaiveDate> = (0..WEEK_DAYS.len() as i64)
            .map(|offset| monday + Duration::days(offset))
            .collect();

        let days = WEEK_DAYS
            .iter()
            .zip(&dates)
            .map(|(label, date)| {
                let iso = date.format("%Y-%m-%d").to_string();
                let holiday = holidays.iter().find(|h| h.date == iso).map(|h| h.name.clone());
                GridDay {
                    label: *label,
                    date: iso,
                    holiday,
                }
            })
            .collect::<Vec<_>>();

        let mut rows: Vec<GridRow> = TIME_SLOTS
            .iter()
            .map(|time| GridRow {
                time: *time,
                cells: days
                    .iter()
                    .map(|day| GridCell {
                        date: day.date.clone(),
                        events: Vec::new(),
                        new_event_end_time: None,
                    })
                    .collect(),
            })
            .collect();

        let mut unplaced = Vec::new();
        for event in events {
            let Some(day_idx) = days.iter().position(|d| d.date == event.date) else {
                continue;
            };
            match TIME_SLOTS.iter().position(|slot| *slot == event.start_time) {
                Some(slot_idx) => rows[slot_idx].cells[day_idx].events.push(event),
                None => unplaced.push(event),
            }
        }

        for row in &mut rows {
            for (cell, day) in row.cells.iter_mut().zip(&days) {
                if cell.events.is_empty() && day.holiday.is_none() {
                    cell.new_event_end_time = slot_end_time(row.time).ok();
                }
            }
        }

        Self {
            week_start: monday.format("%Y-%m-%d").to_string(),
            days,
            rows,
            unplaced,
        }
    }
}
