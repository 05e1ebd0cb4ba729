//! Command handlers.

use std::sync::Arc;

use anyhow::{Context, Result, bail};

use kyoyu_core::filter::{self, FinanceFilter, FinanceSummary, TaskFilter};
use kyoyu_core::{
    CoreError, Directory, KyoyuConfig, ProfileState, SessionChange, SessionHandle, SessionManager,
    ShareOutcome, SharedInbox, SqliteBackend, ViewController,
};
use kyoyu_types::{FinanceEntry, Payload, Principal, PrincipalId, RecordId, Task};

use crate::render;
use crate::{Command, FinanceCommand, TaskCommand};

pub(crate) struct App {
    config: KyoyuConfig,
    db: Arc<SqliteBackend>,
    as_email: Option<String>,
}

impl App {
    pub(crate) fn open(config: KyoyuConfig, as_email: Option<String>) -> Result<Self> {
        let db = SqliteBackend::open(&config.database)
            .with_context(|| format!("failed to open {}", config.database.display()))?;
        Ok(Self {
            config,
            db: Arc::new(db),
            as_email,
        })
    }

    pub(crate) async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Register { email, name } => self.register(&email, &name),
            Command::Confirm { email } => self.confirm(&email),
            Command::Provision => {
                let created = self.db.provision_profiles()?;
                println!("provisioned {created} profile(s)");
                Ok(())
            }
            Command::Users => self.users(),
            Command::Profile { name, email } => self.profile(name, email).await,
            Command::Task(cmd) => self.task(cmd).await,
            Command::Finance(cmd) => self.finance(cmd).await,
            Command::Shared => self.shared().await,
        }
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    fn register(&self, email: &str, name: &str) -> Result<()> {
        let principal = self.db.register(email, name)?;
        println!("registered {principal}");
        println!("confirm the email with `kyoyu confirm {}`", principal.email);
        Ok(())
    }

    fn confirm(&self, email: &str) -> Result<()> {
        let principal = self.principal(email)?;
        let principal = self.db.confirm_email(principal.id)?;
        println!("confirmed {principal}");
        Ok(())
    }

    fn users(&self) -> Result<()> {
        for (principal, provisioned) in self.db.principals()? {
            println!(
                "{}  {:<32} {:<11} {}",
                principal.id.short(),
                principal.email,
                if principal.email_confirmed { "confirmed" } else { "unconfirmed" },
                if provisioned { "profile" } else { "no profile yet" },
            );
        }
        Ok(())
    }

    fn principal(&self, email: &str) -> Result<Principal> {
        self.db
            .principal_by_email(email)?
            .with_context(|| format!("no account for {email}"))
    }

    async fn sessions(&self) -> Result<(SessionManager, SessionChange)> {
        let email = self.as_email.as_deref().ok_or(CoreError::NotAuthenticated)?;
        let principal = self.principal(email)?;
        self.db.sign_in(principal);

        let mut sessions = SessionManager::new(self.db.clone());
        let change = sessions.bootstrap(&*self.db).await?;
        Ok((sessions, change))
    }

    async fn session(&self) -> Result<SessionHandle> {
        let (sessions, _) = self.sessions().await?;
        Ok(sessions.require()?.clone())
    }

    /// Sign in and load `view` for the acting account.
    async fn open_view<P: Payload>(&self, view: &ViewController<P>) -> Result<SessionHandle> {
        let (sessions, change) = self.sessions().await?;
        let session = sessions.require()?.clone();
        view.on_session_change(change, Some(&session)).await?;
        Ok(session)
    }

    async fn profile(&self, name: Option<String>, email: Option<String>) -> Result<()> {
        let (mut sessions, _) = self.sessions().await?;
        if name.is_some() || email.is_some() {
            let profile = sessions
                .update_profile(name.as_deref(), email.as_deref())
                .await?;
            println!("updated {profile}");
            return Ok(());
        }

        let session = sessions.require()?;
        match session.profile() {
            ProfileState::Ready(profile) => println!("{profile}"),
            ProfileState::Pending | ProfileState::Unresolved => {
                println!("{}: profile not provisioned yet", session.principal())
            }
            ProfileState::Failed(reason) => {
                println!("{}: profile unavailable ({reason})", session.principal())
            }
        }
        Ok(())
    }

    async fn grantee(&self, session: &SessionHandle, email: &str) -> Result<PrincipalId> {
        let directory = self.directory(session).await?;
        if let Some(profile) = directory.find_by_email(email) {
            return Ok(profile.id);
        }
        // Fall back to the account table so sharing with oneself reaches the
        // gate instead of failing the lookup.
        Ok(self.principal(email)?.id)
    }

    async fn directory(&self, session: &SessionHandle) -> Result<Directory> {
        let view = ViewController::<Task>::from_backend(self.db.clone());
        Ok(view.share_targets(session).await?)
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    async fn task(&self, cmd: TaskCommand) -> Result<()> {
        let view = ViewController::<Task>::from_backend(self.db.clone());
        let session = self.open_view(&view).await?;

        match cmd {
            TaskCommand::Add {
                text,
                category,
                priority,
                due,
            } => {
                let mut task = Task::new(text).with_priority(priority);
                task.category = category;
                task.due_date = due;
                let entry = view.create(&session, task).await?;
                println!("added task {}", entry.id().short());
            }
            TaskCommand::List {
                priority,
                status,
                category,
                by_priority,
            } => {
                let mut entries = view.entries();
                if by_priority {
                    filter::sort_by_priority(&mut entries);
                }
                let task_filter = TaskFilter {
                    priority,
                    status,
                    category,
                };
                let directory = self.directory(&session).await?;
                for entry in task_filter.apply(&entries) {
                    println!("{}", render::task_line(&session, entry, &directory));
                }
            }
            TaskCommand::Edit {
                id,
                text,
                category,
                priority,
                due,
            } => {
                let id = find(&view, &id)?;
                let mut task = current_payload(&view, id)?;
                if let Some(text) = text {
                    task.text = text;
                }
                if let Some(category) = category {
                    task.category = Some(category).filter(|c| !c.trim().is_empty());
                }
                if let Some(priority) = priority {
                    task.priority = priority;
                }
                if due.is_some() {
                    task.due_date = due;
                }
                view.edit(&session, id, task).await?;
                println!("updated task {}", id.short());
            }
            TaskCommand::Done { id } => {
                let id = find(&view, &id)?;
                let entry = view.toggle_complete(&session, id).await?;
                let state = if entry.record.payload.completed { "completed" } else { "pending" };
                println!("task {} is {state}", id.short());
            }
            TaskCommand::Delete { id } => {
                let id = find(&view, &id)?;
                view.delete(&session, id).await?;
                println!("deleted task {}", id.short());
            }
            TaskCommand::Share { id, with } => {
                let id = find(&view, &id)?;
                let grantee = self.grantee(&session, &with).await?;
                let outcome = view.share(&session, id, grantee).await?;
                print_share(outcome, &with);
            }
        }
        notice(&view);
        Ok(())
    }

    // ========================================================================
    // Finances
    // ========================================================================

    async fn finance(&self, cmd: FinanceCommand) -> Result<()> {
        let view = ViewController::<FinanceEntry>::from_backend(self.db.clone());
        let session = self.open_view(&view).await?;

        match cmd {
            FinanceCommand::Add {
                description,
                amount,
                flow,
                date,
                category,
            } => {
                let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
                let mut entry = FinanceEntry::new(description, amount, date, flow);
                entry.category = category;
                let entry = view.create(&session, entry).await?;
                println!("added {} {}", entry.record.payload.flow, entry.id().short());
            }
            FinanceCommand::List {
                flow,
                category,
                month,
            } => {
                let mut entries = view.entries();
                filter::sort_by_date_desc(&mut entries);
                let finance_filter = FinanceFilter {
                    flow,
                    category,
                    month,
                };
                let directory = self.directory(&session).await?;
                for entry in finance_filter.apply(&entries) {
                    println!(
                        "{}",
                        render::finance_line(&session, entry, &directory, &self.config)
                    );
                }
                let months = filter::months(&entries);
                if !months.is_empty() {
                    let months: Vec<_> = months.iter().map(ToString::to_string).collect();
                    println!("months: {}", months.join(", "));
                }
            }
            FinanceCommand::Edit {
                id,
                description,
                amount,
                flow,
                date,
                category,
            } => {
                let id = find(&view, &id)?;
                let mut entry = current_payload(&view, id)?;
                if let Some(description) = description {
                    entry.description = description;
                }
                if let Some(amount) = amount {
                    entry.amount = amount;
                }
                if let Some(flow) = flow {
                    entry.flow = flow;
                }
                if let Some(date) = date {
                    entry.date = date;
                }
                if let Some(category) = category {
                    entry.category = Some(category).filter(|c| !c.trim().is_empty());
                }
                view.edit(&session, id, entry).await?;
                println!("updated {}", id.short());
            }
            FinanceCommand::Delete { id } => {
                let id = find(&view, &id)?;
                view.delete(&session, id).await?;
                println!("deleted {}", id.short());
            }
            FinanceCommand::Share { id, with } => {
                let id = find(&view, &id)?;
                let grantee = self.grantee(&session, &with).await?;
                let outcome = view.share(&session, id, grantee).await?;
                print_share(outcome, &with);
            }
            FinanceCommand::Summary { month, category } => {
                let finance_filter = FinanceFilter {
                    flow: None,
                    category,
                    month,
                };
                let summary = view.with_entries(|entries| {
                    FinanceSummary::of(finance_filter.apply(entries).into_iter().map(|e| &e.record.payload))
                });
                println!("{}", render::summary(&summary, &self.config));
                let categories = view.with_entries(filter::categories);
                if !categories.is_empty() {
                    println!("categories: {}", categories.join(", "));
                }
            }
        }
        notice(&view);
        Ok(())
    }

    // ========================================================================
    // Shared with me
    // ========================================================================

    async fn shared(&self) -> Result<()> {
        let session = self.session().await?;
        let inbox = SharedInbox::load_from(&session, &self.db).await?;
        if inbox.is_empty() {
            println!("nothing has been shared with you");
            return Ok(());
        }
        if !inbox.tasks.is_empty() {
            println!("tasks:");
            for shared in &inbox.tasks {
                println!("  {}", render::shared_task(shared));
            }
        }
        if !inbox.finances.is_empty() {
            println!("finances:");
            for shared in &inbox.finances {
                println!("  {}", render::shared_finance(shared, &self.config));
            }
        }
        Ok(())
    }
}

/// Resolve a full id or a unique hex prefix against the current view.
fn find<P: Payload>(view: &ViewController<P>, query: &str) -> Result<RecordId> {
    let needle = query.trim().to_lowercase().replace('-', "");
    if needle.is_empty() {
        bail!("empty record id");
    }
    let hits: Vec<RecordId> = view.with_entries(|entries| {
        entries
            .iter()
            .map(|e| e.id())
            .filter(|id| id.matches_hex_prefix(&needle))
            .collect()
    });
    match hits.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no record matches {query}"),
        _ => bail!("{query} is ambiguous ({} matches)", hits.len()),
    }
}

fn current_payload<P: Payload>(view: &ViewController<P>, id: RecordId) -> Result<P> {
    view.entry(id)
        .map(|e| e.record.payload)
        .ok_or_else(|| CoreError::UnknownRecord(id).into())
}

fn print_share(outcome: ShareOutcome, with: &str) {
    match outcome {
        ShareOutcome::Shared => println!("shared with {with}"),
        ShareOutcome::AlreadyShared => println!("already shared with {with}"),
    }
}

fn notice<P: Payload>(view: &ViewController<P>) {
    if let Some(err) = view.notice() {
        eprintln!("warning: {err}");
    }
}
