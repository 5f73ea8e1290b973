// FluentFlow schema - practice management tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    teachers (id) {
        id -> Integer,
        name -> Text,
        email -> Nullable<Text>,
        classroom -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    classrooms (id) {
        id -> Integer,
        name -> Text,
        grade -> Nullable<Text>,
        teacher_id -> Nullable<Integer>,
        created_at -> Text,
    }
}

diesel::table! {
    students (id) {
        id -> Integer,
        name -> Text,
        date_of_birth -> Text,
        grade -> Text,
        guardians_json -> Text,          // JSON array of guardian names
        iep_dates_json -> Text,          // JSON array of YYYY-MM-DD
        notes -> Nullable<Text>,
        is_active -> Bool,
        classroom_id -> Nullable<Integer>,
        teacher_id -> Nullable<Integer>,
        created_at -> Text,
        updated_at -> Text,
    }
}

// ============================================================================
// Goal Bank
// ============================================================================

diesel::table! {
    goal_templates (id) {
        id -> Integer,
        target_area -> Text,
        category -> Text,
        goal_text -> Text,
        description -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    student_goals (id) {
        id -> Integer,
        student_id -> Integer,
        goal_id -> Integer,
        is_active -> Bool,
        assigned_at -> Text,
    }
}

// ============================================================================
// Scheduling and Session Documentation
// ============================================================================

diesel::table! {
    schedule_events (id) {
        id -> Integer,
        date -> Text,                    // YYYY-MM-DD
        start_time -> Text,              // HH:MM
        end_time -> Text,                // HH:MM
        location -> Text,
        student_ids_json -> Text,        // JSON array of student ids
        teacher_id -> Nullable<Integer>,
        classroom_id -> Nullable<Integer>,
        session_type -> Text,
        status -> Text,                  // Upcoming | Seen | Missed
        recurrence_rule -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    sessions (id) {
        id -> Integer,
        event_id -> Nullable<Integer>,   // FK to schedule_events, unique when set
        date -> Text,
        student_ids_json -> Text,
        duration_minutes -> Nullable<Integer>,
        location -> Nullable<Text>,
        engagement -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    session_goal_data (id) {
        id -> Integer,
        session_id -> Integer,
        student_goal_id -> Integer,
        student_id -> Integer,
        accuracy -> Integer,             // 0..=100
        trials -> Integer,               // >= 1
        prompt_level -> Text,            // none | min | mod | max
        prompt_types -> Text,
        activity -> Text,
        utterance -> Nullable<Text>,
        observations -> Nullable<Text>,
    }
}

diesel::table! {
    notes (id) {
        id -> Integer,
        session_id -> Integer,
        student_id -> Integer,
        content -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    holidays (id) {
        id -> Integer,
        name -> Text,
        date -> Text,
    }
}
