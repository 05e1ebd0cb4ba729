//! Plain-text rendering of view entries.

use kyoyu_core::{Affordances, Directory, FinanceSummary, KyoyuConfig, Relation, SessionHandle, ViewEntry};
use kyoyu_types::{FinanceEntry, Payload, SharedIn, Task};

fn relation_suffix<P: Payload>(session: &SessionHandle, entry: &ViewEntry<P>, directory: &Directory) -> String {
    let name = entry.counterparty_name(directory);
    let mut suffix = match (entry.relation, name) {
        (Relation::Owned, Some(names)) => format!("  -> {names}"),
        (Relation::SharedIn, Some(owner)) => format!("  <- {owner}"),
        (_, None) => String::new(),
    };
    if !Affordances::for_entry(session, entry).any() {
        suffix.push_str(" (read-only)");
    }
    suffix
}

fn task_body(task: &Task) -> String {
    let mut line = format!(
        "[{}] {} ({})",
        if task.completed { "x" } else { " " },
        task.text,
        task.priority
    );
    if let Some(category) = &task.category {
        line.push_str(&format!(" #{category}"));
    }
    if let Some(due) = task.due_date {
        line.push_str(&format!(" due {due}"));
    }
    line
}

fn finance_body(entry: &FinanceEntry, config: &KyoyuConfig) -> String {
    let mut line = format!(
        "{} {:<7} {:>16}  {}",
        entry.date,
        entry.flow.as_ref(),
        config.format_amount(entry.amount),
        entry.description
    );
    if let Some(category) = &entry.category {
        line.push_str(&format!(" #{category}"));
    }
    line
}

pub fn task_line(session: &SessionHandle, entry: &ViewEntry<Task>, directory: &Directory) -> String {
    format!(
        "{}  {}{}",
        entry.id().short(),
        task_body(&entry.record.payload),
        relation_suffix(session, entry, directory)
    )
}

pub fn finance_line(
    session: &SessionHandle,
    entry: &ViewEntry<FinanceEntry>,
    directory: &Directory,
    config: &KyoyuConfig,
) -> String {
    format!(
        "{}  {}{}",
        entry.id().short(),
        finance_body(&entry.record.payload, config),
        relation_suffix(session, entry, directory)
    )
}

pub fn shared_task(shared: &SharedIn<Task>) -> String {
    format!(
        "{}  {}  from {}",
        shared.record.id.short(),
        task_body(&shared.record.payload),
        shared.owner_name()
    )
}

pub fn shared_finance(shared: &SharedIn<FinanceEntry>, config: &KyoyuConfig) -> String {
    format!(
        "{}  {}  from {}",
        shared.record.id.short(),
        finance_body(&shared.record.payload, config),
        shared.owner_name()
    )
}

pub fn summary(summary: &FinanceSummary, config: &KyoyuConfig) -> String {
    format!(
        "income  {}\nexpense {}\nbalance {}",
        config.format_amount(summary.income),
        config.format_amount(summary.expense),
        config.format_amount(summary.balance)
    )
}
