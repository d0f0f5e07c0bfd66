use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use filmstrip_jobs::shutdown::install_shutdown_handler;
use filmstrip_jobs::{
    BatchContext, ContextError, JobManager, JobSnapshot, JobStatus, LogObserver, ManagerConfig,
    ShutdownReport, TrackingObserver,
};

#[derive(Parser, Debug)]
#[command(name = "filmstrip-jobs")]
#[command(version)]
#[command(about = "Run picture render jobs on grouped worker pools")]
struct Args {
    /// Worker threads for the default group (defaults to the CPU count)
    #[arg(long)]
    workers: Option<usize>,

    /// Additional groups (comma-separated, format: "name:workers")
    /// Example: "preview:1,export:2"
    #[arg(long, default_value = "")]
    groups: String,

    /// Number of render jobs to enqueue, spread over all groups
    #[arg(long, default_value = "4")]
    jobs: usize,

    /// Pictures rendered per job
    #[arg(long, default_value = "25")]
    pictures: u64,

    /// Simulated render time per picture in milliseconds
    #[arg(long, default_value = "20")]
    render_ms: u64,

    /// Interval between progress reports in milliseconds
    #[arg(long, default_value = "500")]
    report_ms: u64,

    /// Maximum time to wait for each worker on shutdown, in milliseconds
    #[arg(long, default_value = "3000")]
    join_timeout_ms: u64,

    /// Output format for the final job list
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct JobListOutput {
    jobs: Vec<JobSnapshot>,
    shutdown: ShutdownReport,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_groups(groups_str: &str) -> Vec<(String, usize)> {
    if groups_str.is_empty() {
        return Vec::new();
    }

    groups_str
        .split(',')
        .filter_map(|group| {
            let (name, workers) = group.trim().split_once(':')?;
            match workers.parse::<usize>() {
                Ok(workers) if !name.is_empty() => Some((name.to_string(), workers)),
                _ => {
                    tracing::warn!(group, "Invalid group format, expected name:workers");
                    None
                }
            }
        })
        .collect()
}

fn render_job(index: usize, group: &str, pictures: u64, render: Duration) -> BatchContext {
    let items = (0..pictures).map(move |_| {
        move || -> Result<(), ContextError> {
            std::thread::sleep(render);
            Ok(())
        }
    });
    BatchContext::new(format!("Render slideshow {}", index + 1), items).with_group(group)
}

fn report_progress(tracker: &TrackingObserver) {
    for job in tracker.jobs() {
        if job.status() != JobStatus::Active {
            continue;
        }
        if let Some(progress) = job.progress() {
            tracing::info!(
                name = job.name(),
                group = job.group(),
                current = progress.current,
                max = progress.max,
                "Rendering"
            );
        }
    }
}

fn print_jobs(
    jobs: Vec<JobSnapshot>,
    report: ShutdownReport,
    format: &OutputFormat,
) -> serde_json::Result<()> {
    match format {
        OutputFormat::Json => {
            let output = JobListOutput {
                jobs,
                shutdown: report,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<38} {:<10} {:<10} {:>9}  NAME",
                    "JOB ID", "GROUP", "STATUS", "PROGRESS"
                );
                println!("{}", "-".repeat(90));

                for job in &jobs {
                    let status = if job.aborted {
                        format!("{}*", job.status)
                    } else {
                        job.status.to_string()
                    };
                    let progress = job
                        .progress
                        .as_ref()
                        .map(|p| format!("{}/{}", p.current, p.max))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<38} {:<10} {:<10} {:>9}  {}",
                        job.id, job.group, status, progress, job.name
                    );
                    if let Some(ref error) = job.error {
                        println!("  error: {}", error);
                    }
                }
            }
            println!();
            println!("Workers joined: {}", report.joined);
            for worker in &report.timed_out {
                println!("Worker did not stop in time: {}", worker);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let shutdown = install_shutdown_handler();

    let config =
        ManagerConfig::default().with_join_timeout(Duration::from_millis(args.join_timeout_ms));
    let manager = JobManager::new(config);

    let tracker = Arc::new(TrackingObserver::new());
    manager.add_observer(tracker.clone());
    manager.add_observer(Arc::new(LogObserver));

    manager.init(None, args.workers)?;
    let mut groups = vec![manager.config().default_group.clone()];
    for (name, workers) in parse_groups(&args.groups) {
        manager.init(Some(&name), Some(workers))?;
        groups.push(name);
    }

    let render = Duration::from_millis(args.render_ms);
    for index in 0..args.jobs {
        let group = &groups[index % groups.len()];
        manager.enqueue(render_job(index, group, args.pictures, render))?;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(args.report_ms.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                for job in tracker.pending() {
                    job.abort();
                }
                break;
            }
            _ = ticker.tick() => {
                report_progress(&tracker);
                if tracker.pending().is_empty() {
                    break;
                }
            }
        }
    }

    // Joining workers blocks for up to the join timeout per worker
    let report = tokio::task::spawn_blocking(move || manager.destroy()).await?;
    print_jobs(tracker.snapshots(), report, &args.output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_groups_accepts_valid_entries() {
        let groups = parse_groups("preview:1, export:2");
        assert_eq!(
            groups,
            vec![("preview".to_string(), 1), ("export".to_string(), 2)]
        );
    }

    #[test]
    fn parse_groups_skips_invalid_entries() {
        assert!(parse_groups("").is_empty());
        assert_eq!(parse_groups("preview,export:x,:3,audio:1").len(), 1);
    }

    #[test]
    fn render_job_counts_pictures() {
        let job = render_job(0, "export", 7, Duration::ZERO);
        assert_eq!(filmstrip_jobs::JobContext::group_id(&job), "export");
        assert_eq!(filmstrip_jobs::JobContext::name(&job), "Render slideshow 1");
        let progress = filmstrip_jobs::JobContext::progress(&job).unwrap();
        assert_eq!(progress.max, 7);
    }
}
