#![forbid(unsafe_code)]

//! `outreach-queue-ctl`: operator CLI for `outreach-queue`.
//!
//! Works directly on the queue database named in the configuration file,
//! so it can run while the daemon is up: every state change is a
//! conditional update and concurrent writers resolve per row.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use outreach_queue::app::Services;
use outreach_queue::config::GlobalConfig;
use outreach_queue::models::action::NewAction;
use outreach_queue::models::prospect::Prospect;
use outreach_queue::models::validation::RejectionCategory;
use outreach_queue::persistence::db;
use outreach_queue::persistence::message_repo::MessageRepo;
use outreach_queue::persistence::prospect_repo::ProspectRepo;
use outreach_queue::persistence::validation_repo::ListOrder;
use outreach_queue::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "outreach-queue-ctl",
    about = "Operator CLI for the outreach queue",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a prospect.
    AddProspect {
        /// Owning account.
        #[arg(long)]
        account: i64,
        /// Given name.
        #[arg(long)]
        first_name: String,
        /// Family name.
        #[arg(long)]
        last_name: String,
        /// Current employer.
        #[arg(long)]
        company: Option<String>,
        /// Current role.
        #[arg(long)]
        job_title: Option<String>,
    },

    /// Enqueue an action.
    Enqueue {
        /// Catalog action type, e.g. `send_followup_a1`.
        #[arg(long = "type")]
        action_type: String,
        /// Sending account.
        #[arg(long)]
        account: i64,
        /// Target prospect.
        #[arg(long)]
        prospect: Option<i64>,
        /// JSON object payload.
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Priority (lower runs first).
        #[arg(long)]
        priority: Option<i32>,
        /// RFC 3339 time before which the action must not run.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Execute immediately instead of waiting for the loop.
        #[arg(long)]
        now: bool,
    },

    /// List drafts awaiting validation.
    Pending {
        /// Only this action type.
        #[arg(long = "type")]
        action_type: Option<String>,
        /// Newest first instead of oldest first.
        #[arg(long)]
        newest: bool,
        /// Maximum number of items.
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// Approve a held draft and deliver it.
    Approve {
        /// Action ID.
        id: i64,
        /// Reviewer identity.
        #[arg(long)]
        reviewer: String,
        /// Optional reviewer note.
        #[arg(long)]
        feedback: Option<String>,
        /// Replacement text to send instead of the draft.
        #[arg(long)]
        content: Option<String>,
    },

    /// Reject a held draft.
    Reject {
        /// Action ID.
        id: i64,
        /// Reviewer identity.
        #[arg(long)]
        reviewer: String,
        /// Why the draft was rejected.
        #[arg(long)]
        reason: String,
        /// tone, timing, content, irrelevant, or other.
        #[arg(long, default_value = "other")]
        category: String,
    },

    /// Cancel a pending action.
    Cancel {
        /// Action ID.
        id: i64,
    },

    /// Status counts and today's quota usage.
    Status,

    /// Show one action with its validation record and sent messages.
    Show {
        /// Action ID.
        id: i64,
    },

    /// Run a single dispatch pass.
    RunOnce,
}

impl Command {
    /// Whether the command may deliver messages and so needs credentials.
    fn delivers(&self) -> bool {
        matches!(
            self,
            Self::Approve { .. } | Self::RunOnce | Self::Enqueue { now: true, .. }
        )
    }
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to build tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(output) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_default()
            );
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<Value> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if args.command.delivers() {
        config.load_credentials().await?;
    }
    let config = Arc::new(config);
    let db = Arc::new(db::connect(&config.db_path).await?);
    let services = Services::from_config(Arc::clone(&config), Arc::clone(&db))?;

    match args.command {
        Command::AddProspect {
            account,
            first_name,
            last_name,
            company,
            job_title,
        } => {
            let mut prospect = Prospect::new(account, first_name, last_name);
            prospect.company = company;
            prospect.job_title = job_title;
            let created = ProspectRepo::new(db).create(&prospect).await?;
            Ok(serde_json::to_value(created)?)
        }
        Command::Enqueue {
            action_type,
            account,
            prospect,
            payload,
            priority,
            at,
            now,
        } => {
            let payload: Value = serde_json::from_str(&payload)
                .map_err(|err| AppError::InvalidPayload(format!("payload is not JSON: {err}")))?;
            let mut new = NewAction::new(action_type, account, prospect, payload);
            new.priority = priority;
            new.scheduled_at = at;

            let id = services.store.enqueue(&new).await?;
            if now {
                let outcome = services.dispatcher.execute_now(id).await?;
                Ok(json!({ "id": id, "outcome": outcome }))
            } else {
                Ok(json!({ "id": id }))
            }
        }
        Command::Pending {
            action_type,
            newest,
            limit,
        } => {
            let order = if newest {
                ListOrder::NewestFirst
            } else {
                ListOrder::OldestFirst
            };
            let items = services
                .validation
                .list_pending(action_type.as_deref(), order, limit)
                .await?;
            let items: Vec<Value> = items
                .into_iter()
                .map(|(action, record)| json!({ "action": action, "validation": record }))
                .collect();
            Ok(Value::Array(items))
        }
        Command::Approve {
            id,
            reviewer,
            feedback,
            content,
        } => {
            let outcome = services
                .validation
                .approve(id, &reviewer, feedback.as_deref(), content.as_deref())
                .await?;
            Ok(serde_json::to_value(outcome)?)
        }
        Command::Reject {
            id,
            reviewer,
            reason,
            category,
        } => {
            let category: RejectionCategory = category.parse()?;
            let outcome = services
                .validation
                .reject(id, &reviewer, &reason, category)
                .await?;
            Ok(serde_json::to_value(outcome)?)
        }
        Command::Cancel { id } => {
            services.store.cancel(id).await?;
            Ok(json!({ "id": id, "status": "cancelled" }))
        }
        Command::Status => Ok(serde_json::to_value(services.status().await?)?),
        Command::Show { id } => {
            let action = services.store.require(id).await?;
            let record = services.validation.record(id).await?;
            let messages = MessageRepo::new(db).list_for_action(id).await?;
            Ok(json!({ "action": action, "validation": record, "messages": messages }))
        }
        Command::RunOnce => {
            let report = services.dispatcher.run_once().await?;
            Ok(serde_json::to_value(report)?)
        }
    }
}
