//! # TeamNest Admin
//!
//! Operator CLI over the TeamNest engine: schema migrations, membership
//! changes, team copies and JSON roster import/export against PostgreSQL.
//!
//! ## Usage
//!
//! ```bash
//! teamnest-admin migrate
//! teamnest-admin add-member --team <TEAM_ID> --user-name student1
//! teamnest-admin import --parent <ASSIGNMENT_ID> --parent-kind assignment --file roster.json
//! teamnest-admin export --parent <ASSIGNMENT_ID> --parent-kind assignment --mentor > roster.jsonl
//! ```
//!
//! Roster files are JSON arrays of rows, each row an array of strings:
//! `[["Alpha", "student1", "student2"], ["Beta", "student3"]]`.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use teamnest_shared::copy::TeamCopier;
use teamnest_shared::db::migrations::{ensure_database_exists, get_migration_status, run_migrations};
use teamnest_shared::db::pool::{close_pool, create_pool, get_pool_stats};
use teamnest_shared::hierarchy::TeamHierarchy;
use teamnest_shared::membership::MembershipEngine;
use teamnest_shared::models::{ParentKind, TeamKind};
use teamnest_shared::store::PgStore;
use teamnest_shared::transfer::{
    DuplicateTeamPolicy, ExportOptions, ImportOptions, MemberField, RosterRow, RosterTransfer,
};

use crate::config::Config;

/// TeamNest - team membership administration
#[derive(Parser, Debug)]
#[command(name = "teamnest-admin")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database if needed and apply pending migrations
    Migrate,

    /// Show migration and connection pool status
    Status,

    /// Add a user to a team
    AddMember {
        #[arg(long)]
        team: Uuid,

        /// User ID
        #[arg(long, conflicts_with = "user_name", required_unless_present = "user_name")]
        user: Option<Uuid>,

        /// User login name
        #[arg(long)]
        user_name: Option<String>,

        /// Assign the user as the team's mentor
        #[arg(long, conflicts_with = "user_name")]
        mentor: bool,
    },

    /// Remove a user from a team
    RemoveMember {
        #[arg(long)]
        team: Uuid,

        #[arg(long)]
        user: Uuid,
    },

    /// Remove memberships by ID; failures are reported and skipped
    RemoveMemberships {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },

    /// Show a team's remaining capacity
    Capacity {
        #[arg(long)]
        team: Uuid,
    },

    /// Create a team and its node
    CreateTeam {
        #[arg(long)]
        parent: Uuid,

        #[arg(long, value_enum)]
        kind: KindArg,

        /// Team name (generated when omitted)
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete a team with its memberships
    DeleteTeam {
        #[arg(long)]
        team: Uuid,
    },

    /// Copy a team and its members to an assignment or a course
    CopyTeam {
        #[arg(long)]
        team: Uuid,

        #[arg(long, conflicts_with = "to_course", required_unless_present = "to_course")]
        to_assignment: Option<Uuid>,

        #[arg(long)]
        to_course: Option<Uuid>,
    },

    /// Import a JSON roster
    Import {
        #[arg(long)]
        parent: Uuid,

        #[arg(long, value_enum)]
        parent_kind: ParentKindArg,

        /// JSON file holding an array of rows
        #[arg(long)]
        file: PathBuf,

        /// Rows hold member names only; team names are generated
        #[arg(long)]
        no_team_name: bool,

        #[arg(long, value_enum, default_value = "merge")]
        duplicates: PolicyArg,

        /// Enroll users under the parent before adding them
        #[arg(long)]
        enroll: bool,
    },

    /// Export every team under a parent as JSON lines (header first)
    Export {
        #[arg(long)]
        parent: Uuid,

        #[arg(long, value_enum)]
        parent_kind: ParentKindArg,

        /// Leave out the team name column
        #[arg(long)]
        no_team_name: bool,

        #[arg(long)]
        parent_name: bool,

        #[arg(long)]
        mentor: bool,

        #[arg(long)]
        permission_granted: bool,

        /// How members are rendered (defaults to TEAMNEST_DEFAULT_MEMBER_FIELD)
        #[arg(long, value_enum)]
        member_field: Option<MemberFieldArg>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ParentKindArg {
    Course,
    Assignment,
}

impl From<ParentKindArg> for ParentKind {
    fn from(arg: ParentKindArg) -> Self {
        match arg {
            ParentKindArg::Course => ParentKind::Course,
            ParentKindArg::Assignment => ParentKind::Assignment,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    CourseTeam,
    AssignmentTeam,
    MentoredTeam,
}

impl From<KindArg> for TeamKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::CourseTeam => TeamKind::CourseTeam,
            KindArg::AssignmentTeam => TeamKind::AssignmentTeam,
            KindArg::MentoredTeam => TeamKind::MentoredTeam,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    Merge,
    Ignore,
    Rename,
}

impl From<PolicyArg> for DuplicateTeamPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Merge => DuplicateTeamPolicy::Merge,
            PolicyArg::Ignore => DuplicateTeamPolicy::Ignore,
            PolicyArg::Rename => DuplicateTeamPolicy::Rename,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MemberFieldArg {
    Name,
    FullName,
    Email,
}

impl From<MemberFieldArg> for MemberField {
    fn from(arg: MemberFieldArg) -> Self {
        match arg {
            MemberFieldArg::Name => MemberField::Name,
            MemberFieldArg::FullName => MemberField::FullName,
            MemberFieldArg::Email => MemberField::Email,
        }
    }
}

fn init_tracing() {
    // Logs go to stderr so `export` output can be piped.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teamnest_admin=info,teamnest_shared=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_roster(path: &PathBuf) -> Result<Vec<RosterRow>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read roster file {}", path.display()))?;
    let rows: Vec<Vec<String>> = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a JSON array of string arrays", path.display()))?;
    Ok(rows.into_iter().map(|cells| RosterRow { cells }).collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    info!(version = teamnest_shared::VERSION, "TeamNest admin starting");

    if matches!(cli.command, Commands::Migrate) {
        ensure_database_exists(&config.database.url).await?;
    }

    let pool = create_pool(&config.database.pool_config())
        .await
        .context("Failed to connect to the database")?;
    let store = Arc::new(PgStore::new(pool.clone()));

    let result = run(cli.command, &config, store).await;
    close_pool(pool).await;
    result
}

async fn run(command: Commands, config: &Config, store: Arc<PgStore>) -> Result<()> {
    let engine = MembershipEngine::new(Arc::clone(&store));
    let hierarchy = TeamHierarchy::new(Arc::clone(&store));

    match command {
        Commands::Migrate => {
            run_migrations(store.pool()).await?;
            let status = get_migration_status(store.pool()).await?;
            println!(
                "Applied {} of {} migrations (latest: {:?})",
                status.applied_migrations, status.known_migrations, status.latest_version
            );
        }
        Commands::Status => {
            let status = get_migration_status(store.pool()).await?;
            let stats = get_pool_stats(store.pool());
            println!(
                "Migrations: {} applied, {} pending",
                status.applied_migrations,
                status.pending_migrations()
            );
            println!(
                "Pool: {} total, {} active, {} idle",
                stats.total_connections, stats.active_connections, stats.idle_connections
            );
        }
        Commands::AddMember {
            team,
            user,
            user_name,
            mentor,
        } => {
            let membership = match (user, user_name) {
                (Some(user), _) if mentor => engine.assign_mentor(team, user).await?,
                (Some(user), _) => engine.add_member(team, user).await?,
                (None, Some(name)) => engine.add_member_by_name(team, &name).await?,
                (None, None) => anyhow::bail!("either --user or --user-name is required"),
            };
            print_json(&membership)?;
        }
        Commands::RemoveMember { team, user } => {
            engine.remove_member(team, user).await?;
            println!("Removed user {} from team {}", user, team);
        }
        Commands::RemoveMemberships { ids } => {
            let batch = engine.remove_members(&ids).await;
            for membership in &batch.removed {
                println!("removed {}", membership.id);
            }
            for failure in &batch.failures {
                println!("failed  {}: {}", failure.id, failure.error);
            }
            if !batch.is_complete() {
                anyhow::bail!("{} of {} removals failed", batch.failures.len(), ids.len());
            }
        }
        Commands::Capacity { team } => {
            let members = engine.members(team).await?.len();
            match engine.capacity_remaining(team).await? {
                Some(remaining) => println!("{} members, {} slots left", members, remaining),
                None => println!("{} members, unbounded", members),
            }
        }
        Commands::CreateTeam { parent, kind, name } => {
            let team = hierarchy
                .create_team_and_node(parent, kind.into(), name.as_deref())
                .await?;
            print_json(&team)?;
        }
        Commands::DeleteTeam { team } => {
            let deletion = hierarchy.delete_team(team).await?;
            println!(
                "Deleted team {} ({} memberships)",
                deletion.team.name, deletion.memberships_removed
            );
        }
        Commands::CopyTeam {
            team,
            to_assignment,
            to_course,
        } => {
            let copier = TeamCopier::new(Arc::clone(&store));
            let report = match (to_assignment, to_course) {
                (Some(assignment_id), _) => copier.copy_to_assignment_team(team, assignment_id).await?,
                (None, Some(course_id)) => copier.copy_to_course_team(team, course_id).await?,
                (None, None) => anyhow::bail!("either --to-assignment or --to-course is required"),
            };
            println!(
                "Created {} \"{}\" with {} members",
                report.team.kind.as_str(),
                report.team.name,
                report.copied.len()
            );
            for failure in &report.failures {
                println!("not copied {}: {}", failure.id, failure.error);
            }
        }
        Commands::Import {
            parent,
            parent_kind,
            file,
            no_team_name,
            duplicates,
            enroll,
        } => {
            let rows = read_roster(&file)?;
            let options = ImportOptions {
                has_team_name: !no_team_name,
                duplicate_policy: duplicates.into(),
                enroll_missing_participants: enroll,
            };
            let transfer = RosterTransfer::new(Arc::clone(&store));
            let report = transfer
                .import(&rows, parent, parent_kind.into(), &options)
                .await?;

            for row in report.failed() {
                if let Some(error) = &row.error {
                    println!("row {}: {}", row.row, error);
                }
                for failure in &row.member_failures {
                    println!("row {}: {}: {}", row.row, failure.user_name, failure.error);
                }
            }
            println!(
                "{} rows, {} teams created, {} members added, {} rows with failures",
                report.rows.len(),
                report.teams_created(),
                report.members_added(),
                report.failed().count()
            );
        }
        Commands::Export {
            parent,
            parent_kind,
            no_team_name,
            parent_name,
            mentor,
            permission_granted,
            member_field,
        } => {
            let options = ExportOptions {
                team_name: !no_team_name,
                parent_name,
                member_field: member_field
                    .map(MemberField::from)
                    .unwrap_or(config.default_member_field),
                mentor,
                permission_granted,
            };
            let transfer = RosterTransfer::new(Arc::clone(&store));
            let export = transfer.export(parent, parent_kind.into(), &options).await?;

            println!("{}", serde_json::to_string(&export.header().cells)?);
            let mut rows = Box::pin(export.rows());
            while let Some(row) = rows.next().await {
                println!("{}", serde_json::to_string(&row?.cells)?);
            }
        }
    }

    Ok(())
}
