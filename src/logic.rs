/*
Task lifecycle and derived-time rules.
Module is independent from HTTP / Axum and from the store so it can be tested directly
*/

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::models::{Task, TaskStatus};

// Wire format used for every timestamp we write: RFC 3339, millis, Z suffix.
pub fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// Position for a newly created row: one past the owner's current max, 0 when empty.
pub fn next_position(last: Option<i64>) -> i64 {
    last.map_or(0, |p| p + 1)
}

// Actual time spent in whole minutes, rounded half up.
pub fn tempo_real_minutes(created_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> i64 {
    let ms = (completed_at - created_at).num_milliseconds();
    let minutes = (ms as f64 / 60_000.0 + 0.5).floor() as i64;
    minutes.max(0)
}

/// Side effect of a status change on `completed_at` / `tempo_real`.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionChange {
    Complete {
        completed_at: DateTime<Utc>,
        tempo_real: Option<i64>,
    },
    Reopen,
    Unchanged,
}

impl CompletionChange {
    // previous: status currently stored
    // requested: status in the incoming patch, if any
    // created_at: raw stored value; unparseable means tempo_real stays unset
    pub fn from_transition(
        previous: TaskStatus,
        requested: Option<TaskStatus>,
        created_at: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let Some(requested) = requested else {
            return CompletionChange::Unchanged;
        };

        match (previous == TaskStatus::Completed, requested == TaskStatus::Completed) {
            (false, true) => {
                let tempo_real = created_at.and_then(|raw| match DateTime::parse_from_rfc3339(raw) {
                    Ok(created) => Some(tempo_real_minutes(created.with_timezone(&Utc), now)),
                    Err(e) => {
                        tracing::warn!(created_at = raw, error = %e, "could not derive tempo_real");
                        None
                    }
                });
                CompletionChange::Complete { completed_at: now, tempo_real }
            }
            (true, false) => CompletionChange::Reopen,
            _ => CompletionChange::Unchanged,
        }
    }

    pub fn apply(&self, patch: &mut Map<String, Value>) {
        match self {
            CompletionChange::Complete { completed_at, tempo_real } => {
                patch.insert("completed_at".into(), Value::String(iso(*completed_at)));
                if let Some(minutes) = tempo_real {
                    patch.insert("tempo_real".into(), Value::from(*minutes));
                }
            }
            CompletionChange::Reopen => {
                patch.insert("completed_at".into(), Value::Null);
                patch.insert("tempo_real".into(), Value::Null);
            }
            CompletionChange::Unchanged => {}
        }
    }
}

// Toggle only flips between pending and completed.
pub fn toggled_status(current: TaskStatus) -> TaskStatus {
    match current {
        TaskStatus::Completed => TaskStatus::Pending,
        _ => TaskStatus::Completed,
    }
}

// (start_date or created_at) + estimated_time; None without an estimate.
pub fn expected_end(task: &Task) -> Option<DateTime<Utc>> {
    let minutes = TimeDelta::try_minutes(task.estimated_time?)?;
    task.start_date
        .or(task.created_at)?
        .checked_add_signed(minutes)
}

pub fn is_overdue(task: &Task, now: DateTime<Utc>) -> bool {
    task.status != TaskStatus::Completed && expected_end(task).is_some_and(|end| now > end)
}

// Overdue tasks, the longest overdue first.
pub fn overdue_tasks(tasks: Vec<Task>, now: DateTime<Utc>) -> Vec<Task> {
    let mut overdue: Vec<(DateTime<Utc>, Task)> = tasks
        .into_iter()
        .filter(|t| is_overdue(t, now))
        .filter_map(|t| expected_end(&t).map(|end| (end, t)))
        .collect();

    overdue.sort_by(|a, b| a.0.cmp(&b.0));
    overdue.into_iter().map(|(_, t)| t).collect()
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

/// `[local midnight, next local midnight)` of the day containing `now`, in UTC.
pub fn day_window<Tz: TimeZone>(now: &DateTime<Tz>) -> (DateTime<Utc>, DateTime<Utc>) {
    let tz = now.timezone();
    let date = now.date_naive();

    let start = local_midnight(&tz, date).unwrap_or_else(|| date.and_time(NaiveTime::MIN).and_utc());
    let end = date
        .succ_opt()
        .and_then(|next| local_midnight(&tz, next))
        .unwrap_or(start + TimeDelta::days(1));

    (start, end)
}

// urgent > high > medium > low; stable, so ties keep store order
pub fn sort_by_priority_desc(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| b.priority.rank().cmp(&a.priority.rank()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use rstest::rstest;
    use serde_json::json;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn task(title: &str, status: &str, priority: &str, created_at: &str) -> Task {
        serde_json::from_value(json!({
            "id": uuid::Uuid::new_v4(),
            "user_id": uuid::Uuid::new_v4(),
            "category_id": null,
            "title": title,
            "description": null,
            "priority": priority,
            "status": status,
            "start_date": null,
            "reminder_date": null,
            "completed_at": null,
            "recurrence_pattern": null,
            "recurrence_interval": null,
            "estimated_time": null,
            "tempo_real": null,
            "created_at": created_at,
            "updated_at": null
        }))
        .unwrap()
    }

    #[test]
    fn positions_start_at_zero() {
        assert_eq!(next_position(None), 0);
        assert_eq!(next_position(Some(0)), 1);
        assert_eq!(next_position(Some(41)), 42);
    }

    #[rstest]
    #[case("2025-01-01T10:00:00Z", "2025-01-01T10:00:00Z", 0)]
    #[case("2025-01-01T10:00:00Z", "2025-01-01T10:00:29.999Z", 0)]
    #[case("2025-01-01T10:00:00Z", "2025-01-01T10:00:30Z", 1)]
    #[case("2025-01-01T10:00:00Z", "2025-01-01T11:30:00Z", 90)]
    #[case("2025-01-01T10:00:00Z", "2025-01-01T09:59:00Z", 0)]
    fn tempo_real_rounds_half_up(#[case] created: &str, #[case] done: &str, #[case] expected: i64) {
        assert_eq!(tempo_real_minutes(at(created), at(done)), expected);
    }

    #[test]
    fn completing_sets_time_fields() {
        let now = at("2025-01-01T12:00:00Z");
        let change = CompletionChange::from_transition(
            TaskStatus::InProgress,
            Some(TaskStatus::Completed),
            Some("2025-01-01T10:00:00.000Z"),
            now,
        );
        assert_eq!(change, CompletionChange::Complete { completed_at: now, tempo_real: Some(120) });

        let mut patch = Map::new();
        change.apply(&mut patch);
        assert_eq!(patch["completed_at"], "2025-01-01T12:00:00.000Z");
        assert_eq!(patch["tempo_real"], 120);
    }

    #[test]
    fn unparseable_created_at_still_completes() {
        let now = at("2025-01-01T12:00:00Z");
        let change = CompletionChange::from_transition(
            TaskStatus::Pending,
            Some(TaskStatus::Completed),
            Some("yesterday"),
            now,
        );
        assert_eq!(change, CompletionChange::Complete { completed_at: now, tempo_real: None });

        let mut patch = Map::new();
        change.apply(&mut patch);
        assert!(patch.contains_key("completed_at"));
        assert!(!patch.contains_key("tempo_real"));
    }

    #[test]
    fn reopening_clears_time_fields() {
        let change = CompletionChange::from_transition(
            TaskStatus::Completed,
            Some(TaskStatus::Pending),
            None,
            Utc::now(),
        );
        assert_eq!(change, CompletionChange::Reopen);

        let mut patch = Map::new();
        change.apply(&mut patch);
        assert_eq!(patch["completed_at"], Value::Null);
        assert_eq!(patch["tempo_real"], Value::Null);
    }

    #[rstest]
    #[case(TaskStatus::Pending)]
    #[case(TaskStatus::InProgress)]
    #[case(TaskStatus::Archived)]
    fn leaving_completed_always_reopens(#[case] requested: TaskStatus) {
        let change = CompletionChange::from_transition(
            TaskStatus::Completed,
            Some(requested),
            Some("2025-01-01T10:00:00.000Z"),
            Utc::now(),
        );
        assert_eq!(change, CompletionChange::Reopen);
    }

    #[rstest]
    #[case(TaskStatus::Completed, None)]
    #[case(TaskStatus::Completed, Some(TaskStatus::Completed))]
    #[case(TaskStatus::Pending, Some(TaskStatus::InProgress))]
    #[case(TaskStatus::Pending, None)]
    fn other_transitions_leave_fields_alone(
        #[case] previous: TaskStatus,
        #[case] requested: Option<TaskStatus>,
    ) {
        let change = CompletionChange::from_transition(previous, requested, None, Utc::now());
        assert_eq!(change, CompletionChange::Unchanged);
    }

    #[rstest]
    #[case(TaskStatus::Pending, TaskStatus::Completed)]
    #[case(TaskStatus::InProgress, TaskStatus::Completed)]
    #[case(TaskStatus::Archived, TaskStatus::Completed)]
    #[case(TaskStatus::Completed, TaskStatus::Pending)]
    fn toggle_flips_to_completed_or_pending(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert_eq!(toggled_status(from), to);
    }

    #[test]
    fn overdue_uses_estimated_duration() {
        let now = at("2025-01-02T00:00:00Z");

        let mut late = task("late", "pending", "low", "2025-01-01T10:00:00Z");
        late.estimated_time = Some(60);

        let mut later = task("later", "in_progress", "low", "2025-01-01T09:00:00Z");
        later.start_date = Some(at("2025-01-01T20:00:00Z"));
        later.estimated_time = Some(30);

        let mut on_time = task("on time", "pending", "low", "2025-01-01T23:30:00Z");
        on_time.estimated_time = Some(60);

        let no_estimate = task("no estimate", "pending", "low", "2024-01-01T00:00:00Z");

        let mut done = task("done", "completed", "low", "2024-01-01T00:00:00Z");
        done.estimated_time = Some(1);

        assert_eq!(expected_end(&late), Some(at("2025-01-01T11:00:00Z")));
        assert_eq!(expected_end(&later), Some(at("2025-01-01T20:30:00Z")));
        assert!(!is_overdue(&no_estimate, now));
        assert!(!is_overdue(&done, now));

        let titles: Vec<String> = overdue_tasks(vec![later, on_time, no_estimate, done, late], now)
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, ["late", "later"]);
    }

    #[test]
    fn day_window_follows_local_midnight() {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let now = at("2025-03-10T01:30:00Z").with_timezone(&offset);

        let (start, end) = day_window(&now);
        assert_eq!(start, at("2025-03-09T03:00:00Z"));
        assert_eq!(end, at("2025-03-10T03:00:00Z"));
    }

    #[test]
    fn priority_sort_is_descending_and_stable() {
        let mut tasks = vec![
            task("a", "pending", "low", "2025-01-01T00:00:00Z"),
            task("b", "pending", "urgent", "2025-01-01T00:00:00Z"),
            task("c", "pending", "medium", "2025-01-01T00:00:00Z"),
            task("d", "pending", "urgent", "2025-01-01T00:00:00Z"),
            task("e", "pending", "high", "2025-01-01T00:00:00Z"),
        ];
        sort_by_priority_desc(&mut tasks);
        let titles: Vec<&str> = tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["b", "d", "e", "c", "a"]);
    }
}
