use leaseflow::config::Config;
use leaseflow::db;
use leaseflow::jobs::{JobQueue, NewJob, PgJobStore, Reaper};
use serde_json::Value;
use std::env;
use std::sync::Arc;
use uuid::Uuid;

const USAGE: &str = "leaseflowctl <command>\n\
     Commands:\n\
     - migrate\n\
     - enqueue <owner> <subject> [payload-json] [max_attempts]\n\
     - status <job_id>\n\
     - reap\n\
     - counts\n\
     \n\
     Uses DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    leaseflow::telemetry::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let cfg = Config::from_env()?;
    let database_url = cfg
        .database_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;
    let pool = db::make_pool(&database_url).await?;

    if args[1] == "migrate" {
        db::run_migrations(&pool).await?;
        println!("migrations OK");
        return Ok(());
    }

    let queue = JobQueue::new(Arc::new(PgJobStore::new(pool)), cfg.backoff.clone())?;

    match args[1].as_str() {
        "enqueue" => {
            let (Some(owner), Some(subject)) = (args.get(2), args.get(3)) else {
                anyhow::bail!("usage: leaseflowctl enqueue <owner> <subject> [payload-json] [max_attempts]");
            };
            let payload: Value = match args.get(4) {
                Some(raw) => serde_json::from_str(raw)?,
                None => Value::Object(Default::default()),
            };
            let max_attempts = match args.get(5) {
                Some(raw) => raw.parse()?,
                None => cfg.default_max_attempts,
            };

            let job_id = queue
                .enqueue(NewJob::new(owner.as_str(), subject.as_str(), payload).max_attempts(max_attempts))
                .await?;
            println!("{job_id}");
        }
        "status" => {
            let id = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: leaseflowctl status <job_id>"))?;
            let job_id: Uuid = id.parse()?;
            let view = queue.get_status(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        "reap" => {
            let reaper = Reaper::new(queue, cfg.lease_timeout(), cfg.reap_interval())
                .batch_size(cfg.reap_batch_size);
            let report = reaper.sweep().await?;
            println!(
                "reaped: requeued={} failed={} skipped={}",
                report.requeued, report.failed, report.skipped
            );
        }
        "counts" => {
            let c = queue.counts().await?;
            println!(
                "jobs: queued={} running={} done={} failed={}",
                c.queued, c.running, c.done, c.failed
            );
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}
