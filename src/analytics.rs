/*
Aggregations behind the analytics endpoints.
Folds are pure; the handlers in routes_analytics only fetch rows and serialize results
*/

use std::collections::BTreeMap;

use chrono::{DateTime, Months, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::is_overdue;
use crate::models::{CategorizedTask, Priority, Task, TaskStatus};

pub const UNCATEGORIZED_ID: &str = "uncategorized";
pub const UNCATEGORIZED_NAME: &str = "Uncategorized";
pub const UNCATEGORIZED_COLOR: &str = "#94A3B8";

// Days covered by the productivity series.
pub const PRODUCTIVITY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    #[default]
    Week,
    Month,
    Year,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    // Earliest created_at counted by the statistics fallback.
    pub fn start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let start = match self {
            Period::Day => now.checked_sub_signed(TimeDelta::days(1)),
            Period::Week => now.checked_sub_signed(TimeDelta::days(7)),
            Period::Month => now.checked_sub_months(Months::new(1)),
            Period::Year => now.checked_sub_months(Months::new(12)),
        };
        start.unwrap_or(now)
    }
}

// Nearest whole percent, halves rounded up.
fn percent(part: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (part * 200 + total) / (total * 2)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub in_progress_tasks: i64,
    pub overdue_tasks: i64,
    pub completion_rate: i64,
    pub total_time_spent: i64,
    pub average_completion_time: i64,
}

impl TaskStatistics {
    /// Client-side equivalent of the `get_task_statistics` store function.
    pub fn from_tasks(tasks: &[Task], now: DateTime<Utc>) -> Self {
        let mut stats = TaskStatistics::default();
        let mut timed = 0i64;

        for task in tasks {
            stats.total_tasks += 1;
            match task.status {
                TaskStatus::Completed => stats.completed_tasks += 1,
                TaskStatus::Pending => stats.pending_tasks += 1,
                TaskStatus::InProgress => stats.in_progress_tasks += 1,
                TaskStatus::Archived => {}
            }
            if is_overdue(task, now) {
                stats.overdue_tasks += 1;
            }
            if let (TaskStatus::Completed, Some(minutes)) = (task.status, task.tempo_real) {
                if minutes > 0 {
                    stats.total_time_spent += minutes;
                    timed += 1;
                }
            }
        }

        stats.completion_rate = percent(stats.completed_tasks, stats.total_tasks);
        if timed > 0 {
            stats.average_completion_time = (stats.total_time_spent * 2 + timed) / (timed * 2);
        }
        stats
    }
}

/// Completed-task columns read by the productivity series.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRow {
    pub completed_at: Option<DateTime<Utc>>,
    pub tempo_real: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductivityDay {
    pub date: NaiveDate,
    pub tasks_completed: i64,
    pub time_spent: i64,
}

// Grouped by UTC completion date, oldest day first.
pub fn productivity_by_day(rows: &[CompletionRow]) -> Vec<ProductivityDay> {
    let mut days: BTreeMap<NaiveDate, (i64, i64)> = BTreeMap::new();

    for row in rows {
        let Some(completed_at) = row.completed_at else { continue };
        let entry = days.entry(completed_at.date_naive()).or_default();
        entry.0 += 1;
        entry.1 += row.tempo_real.unwrap_or(0);
    }

    days.into_iter()
        .map(|(date, (tasks_completed, time_spent))| ProductivityDay { date, tasks_completed, time_spent })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryShare {
    pub id: String,
    pub name: String,
    pub color: String,
    pub count: i64,
}

// One bucket per category in first-seen order; tasks without one share a bucket.
pub fn category_distribution(rows: &[CategorizedTask]) -> Vec<CategoryShare> {
    let mut shares: Vec<CategoryShare> = Vec::new();

    for row in rows {
        let id = row
            .category_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNCATEGORIZED_ID.to_string());

        if let Some(share) = shares.iter_mut().find(|s| s.id == id) {
            share.count += 1;
            continue;
        }

        let (name, color) = match &row.categories {
            Some(c) => (c.name.clone(), c.color.clone()),
            None => (UNCATEGORIZED_NAME.to_string(), UNCATEGORIZED_COLOR.to_string()),
        };
        shares.push(CategoryShare { id, name, color, count: 1 });
    }

    shares
}

/// Columns read by the priority distribution.
#[derive(Debug, Clone, Deserialize)]
pub struct PriorityRow {
    pub priority: Priority,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorityShare {
    pub priority: Priority,
    pub total: i64,
    pub completed: i64,
    pub pending: i64,
    pub completion_rate: i64,
}

// Always four buckets, urgent first.
pub fn priority_distribution(rows: &[PriorityRow]) -> Vec<PriorityShare> {
    Priority::ALL
        .iter()
        .map(|&priority| {
            let bucket = rows.iter().filter(|r| r.priority == priority);
            let total = bucket.clone().count() as i64;
            let completed = bucket.filter(|r| r.status == TaskStatus::Completed).count() as i64;
            PriorityShare {
                priority,
                total,
                completed,
                pending: total - completed,
                completion_rate: percent(completed, total),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategorySummary;
    use rstest::rstest;
    use serde_json::json;
    use uuid::Uuid;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn task(status: &str, tempo_real: Option<i64>, estimated_time: Option<i64>) -> Task {
        serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "user_id": Uuid::new_v4(),
            "category_id": null,
            "title": "t",
            "description": null,
            "priority": "medium",
            "status": status,
            "start_date": null,
            "reminder_date": null,
            "completed_at": null,
            "recurrence_pattern": null,
            "recurrence_interval": null,
            "estimated_time": estimated_time,
            "tempo_real": tempo_real,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": null
        }))
        .unwrap()
    }

    fn prio(priority: Priority, status: TaskStatus) -> PriorityRow {
        PriorityRow { priority, status }
    }

    #[rstest]
    #[case(Period::Day, "2025-03-30T12:00:00Z")]
    #[case(Period::Week, "2025-03-24T12:00:00Z")]
    #[case(Period::Month, "2025-02-28T12:00:00Z")]
    #[case(Period::Year, "2024-03-31T12:00:00Z")]
    fn period_windows(#[case] period: Period, #[case] expected: &str) {
        assert_eq!(period.start(at("2025-03-31T12:00:00Z")), at(expected));
    }

    #[test]
    fn period_defaults_to_week() {
        assert_eq!(Period::default(), Period::Week);
        let parsed: Period = serde_json::from_value(json!("month")).unwrap();
        assert_eq!(parsed.as_str(), "month");
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(2, 3, 67)]
    #[case(1, 3, 33)]
    #[case(1, 8, 13)]
    #[case(3, 3, 100)]
    fn percentages_round_half_up(#[case] part: i64, #[case] total: i64, #[case] expected: i64) {
        assert_eq!(percent(part, total), expected);
    }

    #[test]
    fn statistics_fold() {
        let now = at("2025-01-02T00:00:00Z");
        let tasks = vec![
            task("completed", Some(30), None),
            task("completed", Some(45), None),
            task("completed", None, None),
            task("pending", None, Some(60)),
            task("in_progress", None, None),
            task("archived", None, None),
        ];

        let stats = TaskStatistics::from_tasks(&tasks, now);
        assert_eq!(
            stats,
            TaskStatistics {
                total_tasks: 6,
                completed_tasks: 3,
                pending_tasks: 1,
                in_progress_tasks: 1,
                overdue_tasks: 1,
                completion_rate: 50,
                total_time_spent: 75,
                average_completion_time: 38,
            }
        );
    }

    #[test]
    fn statistics_of_nothing_are_zero() {
        assert_eq!(TaskStatistics::from_tasks(&[], Utc::now()), TaskStatistics::default());
    }

    #[test]
    fn productivity_groups_by_completion_day() {
        let rows = vec![
            CompletionRow { completed_at: Some(at("2025-01-01T08:00:00Z")), tempo_real: Some(20) },
            CompletionRow { completed_at: Some(at("2025-01-01T23:59:00Z")), tempo_real: None },
            CompletionRow { completed_at: None, tempo_real: Some(99) },
            CompletionRow { completed_at: Some(at("2025-01-03T10:00:00Z")), tempo_real: Some(5) },
        ];

        let days = productivity_by_day(&rows);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date.to_string(), "2025-01-01");
        assert_eq!((days[0].tasks_completed, days[0].time_spent), (2, 20));
        assert_eq!((days[1].tasks_completed, days[1].time_spent), (1, 5));
        assert_eq!(serde_json::to_value(&days[1]).unwrap()["date"], "2025-01-03");
    }

    #[test]
    fn category_buckets_keep_first_seen_order() {
        let work = Uuid::new_v4();
        let row = |category_id: Option<Uuid>| CategorizedTask {
            category_id,
            categories: category_id.map(|_| CategorySummary { name: "Work".into(), color: "#FF0000".into() }),
        };

        let shares = category_distribution(&[row(None), row(Some(work)), row(None), row(Some(work)), row(Some(work))]);
        assert_eq!(
            shares,
            vec![
                CategoryShare {
                    id: UNCATEGORIZED_ID.into(),
                    name: UNCATEGORIZED_NAME.into(),
                    color: UNCATEGORIZED_COLOR.into(),
                    count: 2,
                },
                CategoryShare { id: work.to_string(), name: "Work".into(), color: "#FF0000".into(), count: 3 },
            ]
        );
    }

    #[test]
    fn priority_buckets_are_fixed() {
        let rows = vec![
            prio(Priority::Urgent, TaskStatus::Completed),
            prio(Priority::Urgent, TaskStatus::Completed),
            prio(Priority::Urgent, TaskStatus::Pending),
            prio(Priority::High, TaskStatus::InProgress),
        ];

        let shares = priority_distribution(&rows);
        let order: Vec<Priority> = shares.iter().map(|s| s.priority).collect();
        assert_eq!(order, Priority::ALL);

        assert_eq!(
            shares[0],
            PriorityShare { priority: Priority::Urgent, total: 3, completed: 2, pending: 1, completion_rate: 67 }
        );
        assert_eq!(
            shares[1],
            PriorityShare { priority: Priority::High, total: 1, completed: 0, pending: 1, completion_rate: 0 }
        );
        assert_eq!(shares[3].total, 0);
        assert_eq!(shares[3].completion_rate, 0);
    }
}
