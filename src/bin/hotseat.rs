//! hotseat CLI: operator interface to queues in a Postgres document store.

use clap::{Parser, Subcommand};
use hotseat::config::Config;
use hotseat::db::{Db, PgStore};
use hotseat::telemetry::{TelemetryConfig, init_telemetry};
use hotseat::{BulkReport, DocId, Queue, RemoveOptions, WorkerId};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "hotseat", about = "Work queues inside your documents")]
struct Cli {
    /// Database to operate on (overrides HOTSEAT_DB)
    #[arg(long, global = true)]
    db: Option<String>,
    /// Worker identity stamped on enqueue, lease and remove
    #[arg(long, global = true)]
    worker: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register the queue views in the database
    Init,
    /// Show pending, locked, done and total counts
    Status,
    /// List databases that hold this queue
    Queues,
    /// Add documents to the queue
    Enqueue {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Lease pending documents and print their ids
    Lease {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Return a leased document to pending
    Unlease { id: String },
    /// Mark a leased document done
    Remove {
        id: String,
        /// Strip the annotation instead of marking done
        #[arg(long)]
        forget: bool,
    },
    /// Strip the queue annotation from documents
    Forget {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Forget every document in the queue
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "hotseat".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let database = cli.db.clone().unwrap_or_else(|| config.database.clone());
    let worker = cli
        .worker
        .clone()
        .map(WorkerId::new)
        .unwrap_or_else(WorkerId::generate);

    match cli.command {
        Command::Init => {
            Queue::open(db.store(&database), config.queue.clone()).await?;
            println!("{database}: queue {} ready", config.queue.design_doc);
        }
        Command::Status => cmd_status(&open(&db, &database, &config).await?).await?,
        Command::Queues => {
            let queues = db.queues(&config.queue).await?;
            if queues.is_empty() {
                println!("No queues found.");
            }
            for name in queues {
                println!("{name}");
            }
        }
        Command::Enqueue { ids } => {
            let queue = open(&db, &database, &config).await?;
            let report = queue.enqueue_bulk(&doc_ids(ids), &worker).await?;
            print_report("enqueued", &report);
        }
        Command::Lease { count } => {
            let queue = open(&db, &database, &config).await?;
            match queue.lease(&worker, count).await? {
                None => println!("Nothing pending."),
                Some(leased) if leased.is_empty() => {
                    println!("Lost every candidate to other workers; try again.")
                }
                Some(leased) => {
                    for doc in leased {
                        println!("{}", doc.id);
                    }
                }
            }
        }
        Command::Unlease { id } => {
            let queue = open(&db, &database, &config).await?;
            queue.unlease(&DocId::new(id.as_str())).await?;
            println!("{id}: returned to pending");
        }
        Command::Remove { id, forget } => {
            let queue = open(&db, &database, &config).await?;
            queue
                .remove(&DocId::new(id.as_str()), &worker, RemoveOptions { forget })
                .await?;
            println!("{id}: {}", if forget { "forgotten" } else { "done" });
        }
        Command::Forget { ids } => {
            let queue = open(&db, &database, &config).await?;
            let report = queue.forget_bulk(&doc_ids(ids)).await?;
            print_report("forgotten", &report);
        }
        Command::Purge => {
            let queue = open(&db, &database, &config).await?;
            let report = queue.purge().await?;
            print_report("purged", &report);
        }
    }
    Ok(())
}

/// Open a queue that must already exist.
async fn open(db: &Db, database: &str, config: &Config) -> anyhow::Result<Queue<PgStore>> {
    let store = db.store(database);
    if !Queue::is_queue(&store, &config.queue).await? {
        anyhow::bail!(
            "{database} has no queue {}; run `hotseat init` first",
            config.queue.design_doc
        );
    }
    Ok(Queue::open(store, config.queue.clone()).await?)
}

async fn cmd_status(queue: &Queue<PgStore>) -> anyhow::Result<()> {
    println!("{:<8}  {}", "pending", queue.num_pending().await?);
    println!("{:<8}  {}", "locked", queue.num_locked().await?);
    println!("{:<8}  {}", "done", queue.num_done().await?);
    println!("{:<8}  {}", "all", queue.num_all().await?);
    Ok(())
}

fn doc_ids(ids: Vec<String>) -> Vec<DocId> {
    ids.into_iter().map(DocId::from).collect()
}

fn print_report(verb: &str, report: &BulkReport) {
    println!("{} {verb}", report.processed.len());
    for error in &report.errors {
        println!("  {:<36}  {}", error.id.as_str(), error.reason);
    }
}
