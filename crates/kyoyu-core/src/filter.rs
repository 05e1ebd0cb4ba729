//! Display filters and summaries. Pure functions over view entries; they
//! never change ownership or relation.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use indexmap::IndexSet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kyoyu_types::{FinanceEntry, Flow, Payload, Priority, Task};

use crate::merge::ViewEntry;

fn category_matches(category: Option<&str>, needle: Option<&str>) -> bool {
    match needle.map(str::trim).filter(|n| !n.is_empty()) {
        None => true,
        Some(needle) => category
            .is_some_and(|c| c.to_lowercase().contains(&needle.to_lowercase())),
    }
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    All,
    Pending,
    Completed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub priority: Option<Priority>,
    pub status: TaskStatus,
    /// Case-insensitive substring of the category.
    pub category: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        let priority = self.priority.is_none_or(|p| p == task.priority);
        let status = match self.status {
            TaskStatus::All => true,
            TaskStatus::Pending => !task.completed,
            TaskStatus::Completed => task.completed,
        };
        priority && status && category_matches(task.category(), self.category.as_deref())
    }

    pub fn apply<'a>(&self, entries: &'a [ViewEntry<Task>]) -> Vec<&'a ViewEntry<Task>> {
        entries
            .iter()
            .filter(|e| self.matches(&e.record.payload))
            .collect()
    }
}

/// Most urgent first; within a priority, earliest due date first and
/// undated tasks last.
pub fn sort_by_priority(entries: &mut [ViewEntry<Task>]) {
    entries.sort_by_key(|e| {
        let t = &e.record.payload;
        (t.priority.rank(), t.due_date.is_none(), t.due_date)
    });
}

// ============================================================================
// Finances
// ============================================================================

/// A calendar month, rendered `YYYY-MM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::of(date) == *self
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid month {0:?}, expected YYYY-MM")]
pub struct ParseMonthError(String);

impl FromStr for YearMonth {
    type Err = ParseMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMonthError(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(err)?;
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        if !(1..=12).contains(&month) {
            return Err(err());
        }
        Ok(Self { year, month })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinanceFilter {
    pub flow: Option<Flow>,
    pub category: Option<String>,
    pub month: Option<YearMonth>,
}

impl FinanceFilter {
    pub fn matches(&self, entry: &FinanceEntry) -> bool {
        self.flow.is_none_or(|f| f == entry.flow)
            && self.month.is_none_or(|m| m.contains(entry.date))
            && category_matches(entry.category(), self.category.as_deref())
    }

    pub fn apply<'a>(
        &self,
        entries: &'a [ViewEntry<FinanceEntry>],
    ) -> Vec<&'a ViewEntry<FinanceEntry>> {
        entries
            .iter()
            .filter(|e| self.matches(&e.record.payload))
            .collect()
    }
}

/// Totals over a set of finance entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FinanceSummary {
    pub income: Decimal,
    pub expense: Decimal,
    pub balance: Decimal,
}

impl FinanceSummary {
    pub fn of<'a>(entries: impl IntoIterator<Item = &'a FinanceEntry>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            match entry.flow {
                Flow::Income => summary.income += entry.amount,
                Flow::Expense => summary.expense += entry.amount,
            }
        }
        summary.balance = summary.income - summary.expense;
        summary
    }
}

/// Newest first. Stable for equal dates.
pub fn sort_by_date_desc(entries: &mut [ViewEntry<FinanceEntry>]) {
    entries.sort_by(|a, b| b.record.payload.date.cmp(&a.record.payload.date));
}

/// Distinct months present, newest first.
pub fn months(entries: &[ViewEntry<FinanceEntry>]) -> Vec<YearMonth> {
    let mut months: Vec<_> = entries
        .iter()
        .map(|e| YearMonth::of(e.record.payload.date))
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect();
    months.sort_by(|a, b| b.cmp(a));
    months
}

// ============================================================================
// Shared
// ============================================================================

/// Distinct non-empty categories in first-seen order.
pub fn categories<P: Payload>(entries: &[ViewEntry<P>]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|e| e.record.payload.category())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyoyu_types::{PrincipalId, Record};

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn task(text: &str, priority: Priority, category: Option<&str>, done: bool) -> ViewEntry<Task> {
        let mut t = Task::new(text).with_priority(priority);
        t.category = category.map(String::from);
        t.completed = done;
        ViewEntry::owned(Record::new(PrincipalId::new(), t))
    }

    fn money(desc: &str, amount: i64, date: &str, flow: Flow, category: &str) -> ViewEntry<FinanceEntry> {
        let e = FinanceEntry::new(desc, Decimal::new(amount, 0), day(date), flow).with_category(category);
        ViewEntry::owned(Record::new(PrincipalId::new(), e))
    }

    #[test]
    fn test_task_filter() {
        let tasks = vec![
            task("a", Priority::High, Some("Work"), false),
            task("b", Priority::Low, Some("home"), true),
            task("c", Priority::High, None, true),
        ];

        let high = TaskFilter { priority: Some(Priority::High), ..Default::default() };
        assert_eq!(high.apply(&tasks).len(), 2);

        let done = TaskFilter { status: TaskStatus::Completed, ..Default::default() };
        assert_eq!(done.apply(&tasks).len(), 2);

        let work = TaskFilter { category: Some("WOR".into()), ..Default::default() };
        let hits = work.apply(&tasks);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.payload.text, "a");

        assert_eq!(TaskFilter::default().apply(&tasks).len(), 3);
    }

    #[test]
    fn test_sort_by_priority() {
        let mut tasks = vec![
            task("low", Priority::Low, None, false),
            task("high", Priority::High, None, false),
            task("mid", Priority::Medium, None, false),
        ];
        sort_by_priority(&mut tasks);
        let order: Vec<_> = tasks.iter().map(|t| t.record.payload.text.as_str()).collect();
        assert_eq!(order, ["high", "mid", "low"]);
    }

    #[test]
    fn test_finance_filter_and_summary() {
        let entries = vec![
            money("Salary", 3000, "2024-05-01", Flow::Income, "work"),
            money("Rent", 1200, "2024-05-03", Flow::Expense, "home"),
            money("Food", 300, "2024-06-10", Flow::Expense, "food"),
        ];

        let may = FinanceFilter { month: Some("2024-05".parse().unwrap()), ..Default::default() };
        let hits = may.apply(&entries);
        assert_eq!(hits.len(), 2);

        let summary = FinanceSummary::of(hits.iter().map(|e| &e.record.payload));
        assert_eq!(summary.income, Decimal::new(3000, 0));
        assert_eq!(summary.expense, Decimal::new(1200, 0));
        assert_eq!(summary.balance, Decimal::new(1800, 0));

        let expenses = FinanceFilter { flow: Some(Flow::Expense), ..Default::default() };
        assert_eq!(expenses.apply(&entries).len(), 2);
    }

    #[test]
    fn test_months_and_sorting() {
        let mut entries = vec![
            money("a", 1, "2024-05-01", Flow::Expense, "x"),
            money("b", 1, "2024-06-10", Flow::Expense, "y"),
            money("c", 1, "2024-05-20", Flow::Expense, "x"),
        ];
        let found: Vec<String> = months(&entries).iter().map(ToString::to_string).collect();
        assert_eq!(found, ["2024-06", "2024-05"]);

        sort_by_date_desc(&mut entries);
        let order: Vec<_> = entries.iter().map(|e| e.record.payload.description.as_str()).collect();
        assert_eq!(order, ["b", "c", "a"]);

        assert_eq!(categories(&entries), ["y", "x"]);
    }

    #[test]
    fn test_year_month_parse() {
        assert_eq!("2024-02".parse::<YearMonth>().unwrap(), YearMonth { year: 2024, month: 2 });
        assert!("2024-13".parse::<YearMonth>().is_err());
        assert!("May".parse::<YearMonth>().is_err());
    }
}
