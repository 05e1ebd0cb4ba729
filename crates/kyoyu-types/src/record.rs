//! Records: the unit of ownership and sharing.
//!
//! A [`Record`] wraps a kind-specific payload ([`Task`] or [`FinanceEntry`])
//! with its identity, its owner, and the set of principals the owner has
//! shared it with. The payload types know nothing about ownership.

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::{PrincipalId, RecordId};
use crate::principal::Profile;

/// Which table family a record lives in.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordKind {
    Task,
    Finance,
}

/// Why a payload was refused before reaching the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("amount must not be negative: {0}")]
    NegativeAmount(Decimal),
}

/// Kind-specific record content.
pub trait Payload:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: RecordKind;

    /// Check field-level constraints.
    fn validate(&self) -> Result<(), PayloadError>;

    /// One-line label for logs and listings.
    fn title(&self) -> &str;

    fn category(&self) -> Option<&str>;
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Sort rank, most urgent first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// A to-do item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: None,
            priority: Priority::default(),
            due_date: None,
            completed: false,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }
}

impl Payload for Task {
    const KIND: RecordKind = RecordKind::Task;

    fn validate(&self) -> Result<(), PayloadError> {
        if self.text.trim().is_empty() {
            return Err(PayloadError::Empty("task text"));
        }
        Ok(())
    }

    fn title(&self) -> &str {
        &self.text
    }

    fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}

// ============================================================================
// Finances
// ============================================================================

/// Direction of money movement.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Flow {
    Income,
    #[default]
    Expense,
}

/// One income or expense transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinanceEntry {
    pub description: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub flow: Flow,
}

impl FinanceEntry {
    pub fn new(description: impl Into<String>, amount: Decimal, date: NaiveDate, flow: Flow) -> Self {
        Self {
            description: description.into(),
            amount,
            category: None,
            date,
            flow,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Amount with the sign of its flow (income positive, expense negative).
    pub fn signed_amount(&self) -> Decimal {
        match self.flow {
            Flow::Income => self.amount,
            Flow::Expense => -self.amount,
        }
    }
}

impl Payload for FinanceEntry {
    const KIND: RecordKind = RecordKind::Finance;

    fn validate(&self) -> Result<(), PayloadError> {
        if self.description.trim().is_empty() {
            return Err(PayloadError::Empty("description"));
        }
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(PayloadError::NegativeAmount(self.amount));
        }
        Ok(())
    }

    fn title(&self) -> &str {
        &self.description
    }

    fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}

// ============================================================================
// Records
// ============================================================================

/// A stored record with ownership metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record<P> {
    pub id: RecordId,
    pub owner_id: PrincipalId,
    pub payload: P,
    /// Principals the owner has shared this record with.
    #[serde(default)]
    pub shared_with: BTreeSet<PrincipalId>,
    /// Creation time (Unix millis).
    pub created_at: u64,
}

impl<P: Payload> Record<P> {
    /// A freshly created, unshared record.
    pub fn new(owner_id: PrincipalId, payload: P) -> Self {
        Self {
            id: RecordId::new(),
            owner_id,
            payload,
            shared_with: BTreeSet::new(),
            created_at: crate::now_millis(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        P::KIND
    }

    pub fn is_shared(&self) -> bool {
        !self.shared_with.is_empty()
    }
}

/// One row of the shared-with-me fetch: the upstream record and its owner's
/// profile, when the backend has one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedIn<P> {
    pub record: Record<P>,
    pub owner: Option<Profile>,
}

impl<P> SharedIn<P> {
    /// Owner name for display, falling back to [`crate::UNKNOWN_NAME`].
    pub fn owner_name(&self) -> String {
        self.owner
            .as_ref()
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| crate::UNKNOWN_NAME.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_task_validation() {
        assert!(Task::new("Buy milk").validate().is_ok());
        assert_eq!(Task::new("   ").validate(), Err(PayloadError::Empty("task text")));
    }

    #[test]
    fn test_finance_validation() {
        let ok = FinanceEntry::new("Rent", Decimal::new(120_000, 0), day("2024-05-01"), Flow::Expense);
        assert!(ok.validate().is_ok());

        let mut blank = ok.clone();
        blank.description = String::new();
        assert_eq!(blank.validate(), Err(PayloadError::Empty("description")));

        let mut negative = ok.clone();
        negative.amount = Decimal::new(-5, 0);
        assert!(matches!(negative.validate(), Err(PayloadError::NegativeAmount(_))));
    }

    #[test]
    fn test_signed_amount() {
        let income = FinanceEntry::new("Salary", Decimal::new(10, 0), day("2024-05-01"), Flow::Income);
        let expense = FinanceEntry::new("Food", Decimal::new(3, 0), day("2024-05-02"), Flow::Expense);
        assert_eq!(income.signed_amount(), Decimal::new(10, 0));
        assert_eq!(expense.signed_amount(), Decimal::new(-3, 0));
    }

    #[test]
    fn test_priority_strings_and_rank() {
        assert_eq!(Priority::from_str("high").unwrap(), Priority::High);
        assert_eq!(Priority::Low.to_string(), "low");
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }

    #[test]
    fn test_record_kind() {
        let owner = PrincipalId::new();
        let task = Record::new(owner, Task::new("Write report"));
        assert_eq!(task.kind(), RecordKind::Task);
        assert!(!task.is_shared());
        assert_eq!(RecordKind::from_str("finance").unwrap(), RecordKind::Finance);
    }

    #[test]
    fn test_shared_in_owner_name_fallback() {
        let record = Record::new(PrincipalId::new(), Task::new("Plan trip"));
        let orphan = SharedIn { record: record.clone(), owner: None };
        assert_eq!(orphan.owner_name(), "Unknown");

        let owner = Profile::new(record.owner_id, "Ana", "ana@example.com");
        let named = SharedIn { record, owner: Some(owner) };
        assert_eq!(named.owner_name(), "Ana");
    }

    #[test]
    fn test_task_json_defaults() {
        let t: Task = serde_json::from_str(r#"{"text":"Call mom"}"#).unwrap();
        assert_eq!(t.priority, Priority::Medium);
        assert!(!t.completed);
        assert!(t.due_date.is_none());
    }
}
