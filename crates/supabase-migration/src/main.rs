use anyhow::Context;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement};
use std::env;

use supabase_rls::config::RlsOptions;
use supabase_rls::declaration::{load_declarations, TableDeclaration};
use supabase_rls::diff::Autodetector;
use supabase_rls::executor::{PlanStep, Target};
use supabase_rls::state::ProjectState;
use supabase_rls::{checks, role, RlsProject};

#[derive(Parser, Debug)]
#[clap(name = "supabase-rls", version)]
#[clap(about = "Declarative row-level security migrations for Supabase", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// Optional database URL. If not provided, tries to read from DATABASE_URL environment variable.
    #[clap(long, global = true)]
    database_url: Option<String>,

    /// Directory holding migration files
    #[clap(long, global = true, default_value = "migrations")]
    migrations_dir: String,

    /// Table recording applied migrations
    #[clap(long, global = true, default_value = "rls_migrations")]
    history_table: String,

    /// Output debug logs to stderr
    #[clap(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create migrations for changes in the declared tables
    Makemigrations {
        /// JSON file with table declarations
        declarations: String,
        /// Use this name instead of a generated one
        #[clap(long)]
        name: Option<String>,
        /// Show the migrations without writing them
        #[clap(long)]
        dry_run: bool,
    },
    /// Apply pending migrations
    Migrate {
        /// Migrate up or down to this migration. Use "zero" to unapply all.
        #[clap(long)]
        target: Option<String>,
    },
    /// Unapply the most recently applied migrations
    Rollback {
        #[clap(long, default_value = "1")]
        steps: usize,
    },
    /// List migrations and whether they are applied
    Showmigrations,
    /// Print the SQL a migration runs
    Sqlmigrate {
        /// Migration name, e.g. 0001_initial
        name: String,
        /// Print the SQL that unapplies the migration
        #[clap(long)]
        backwards: bool,
    },
    /// Check that row-level security is effective for the current role
    Check {
        /// Check the tables of these declarations instead of the migrated ones
        #[clap(long)]
        declarations: Option<String>,
    },
    /// Create (or remove) an unprivileged role that row-level security applies to
    Role {
        /// Role name
        name: String,
        #[clap(short, long)]
        remove: bool,
    },
}

// --- Main application logic ---

async fn run() -> anyhow::Result<()> {
    dotenv::dotenv().ok(); // Load .env file if present
    let cli = Cli::parse();

    pretty_env_logger::formatted_builder()
        .filter_level(if cli.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    let options = RlsOptions::default()
        .with_migrations_dir(&cli.migrations_dir)
        .with_history_table(&cli.history_table);
    let project = RlsProject::new_with_options(options);

    // Handle commands that don't need a DB connection first
    match &cli.command {
        Commands::Makemigrations {
            declarations,
            name,
            dry_run,
        } => return makemigrations(&project, declarations, name.as_deref(), *dry_run),
        Commands::Sqlmigrate { name, backwards } => {
            let statements = project
                .sqlmigrate(name, *backwards)
                .await
                .with_context(|| format!("Failed to render SQL for {}", name))?;
            for statement in statements {
                println!("{}", statement);
            }
            return Ok(());
        }
        _ => {}
    }

    // Get DB connection for other commands
    let db_url = cli
        .database_url
        .clone()
        .or_else(|| env::var("DATABASE_URL").ok())
        .ok_or_else(|| {
            anyhow::anyhow!("Database URL not provided via --database-url or DATABASE_URL env var for this command")
        })?;

    log::debug!("Connecting to database...");
    let conn = sea_orm::Database::connect(&db_url)
        .await
        .with_context(|| format!("Failed to connect to database at {}", db_url))?;

    match cli.command {
        Commands::Migrate { target } => {
            let target = match target.as_deref() {
                None => Target::Latest,
                Some("zero") => Target::Zero,
                Some(name) => Target::Name(name.to_string()),
            };
            let steps = project.migrate(&conn, &target).await?;
            report_plan(&project, &steps)?;
        }
        Commands::Rollback { steps } => {
            let steps = project.rollback(&conn, steps).await?;
            report_plan(&project, &steps)?;
        }
        Commands::Showmigrations => {
            let mut app = String::new();
            for status in project.showmigrations(&conn).await? {
                if status.app != app {
                    println!("{}", status.app);
                    app = status.app.clone();
                }
                println!(" [{}] {}", if status.applied { "X" } else { " " }, status.name);
            }
        }
        Commands::Check { declarations } => {
            let state = match declarations {
                Some(path) => declared_state(&path)?,
                None => project.state()?,
            };
            let messages = checks::run_checks(&conn, &state).await?;
            if messages.is_empty() {
                println!("System check identified no issues.");
            } else {
                for message in &messages {
                    eprintln!("{}", message);
                }
                anyhow::bail!("System check identified {} issue(s)", messages.len());
            }
        }
        Commands::Role { name, remove } => {
            let database = current_database(&conn).await?;
            role::provision_role(
                &conn,
                &name,
                &database,
                &project.options.current_user_setting,
                remove,
            )
            .await
            .with_context(|| format!("Failed to provision role {}", name))?;
            println!("Role \"{}\" {}", name, if remove { "removed" } else { "created" });
        }
        Commands::Makemigrations { .. } | Commands::Sqlmigrate { .. } => {} // Handled above
    }

    Ok(())
}

fn read_declarations(path: &str) -> anyhow::Result<Vec<TableDeclaration>> {
    load_declarations(path).with_context(|| format!("Failed to load declarations from {}", path))
}

fn declared_state(path: &str) -> anyhow::Result<ProjectState> {
    let mut declarations = read_declarations(path)?;
    let empty = ProjectState::new();
    Ok(Autodetector::new(&empty).declared_state(&mut declarations)?)
}

fn makemigrations(
    project: &RlsProject,
    path: &str,
    name: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut declarations = read_declarations(path)?;
    let migrations = project.makemigrations(&mut declarations, name)?;
    if migrations.is_empty() {
        println!("No changes detected");
        return Ok(());
    }

    for migration in &migrations {
        println!("Migrations for '{}':", migration.app);
        println!("  {}", migration.name);
        for operation in &migration.operations {
            println!("    {}", operation);
        }
    }

    if !dry_run {
        let paths = project.write_migrations(&migrations)?;
        for path in paths {
            log::debug!("Created {}", path.display());
        }
    }
    Ok(())
}

fn report_plan(project: &RlsProject, steps: &[PlanStep]) -> anyhow::Result<()> {
    if steps.is_empty() {
        println!("No migrations to apply.");
        return Ok(());
    }
    let migrations = project.migrations()?;
    for step in steps {
        match *step {
            PlanStep::Apply(index) => println!("  Applying {}... OK", migrations[index].name),
            PlanStep::Unapply(index) => println!("  Unapplying {}... OK", migrations[index].name),
        }
    }
    Ok(())
}

async fn current_database(conn: &DatabaseConnection) -> anyhow::Result<String> {
    let row = conn
        .query_one(Statement::from_string(
            DbBackend::Postgres,
            "SELECT current_database()",
        ))
        .await?
        .context("current_database() returned no row")?;
    Ok(row.try_get_by_index::<String>(0)?)
}

// --- Entry point ---

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
