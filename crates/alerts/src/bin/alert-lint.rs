//! alert-lint — validate an alert configuration tree.
//!
//! Scans `<config-dir>/<project>/<group>.yml`, reports every file as loaded,
//! skipped, or failed, and exits non-zero if anything failed to parse. Run it
//! before deploying config changes; the scheduler itself tolerates bad files
//! by skipping them.

use clap::Parser;
use tracing::info;

use lantern_alerts::loader::{ConfigSource, DirConfigSource, LoadStatus};
use lantern_alerts::schema::duration::format_duration;

/// Validate alert group files before the scheduler picks them up.
#[derive(Parser, Debug)]
#[command(name = "alert-lint", version, about)]
struct Cli {
    /// Path to the alert configuration directory.
    #[arg(long, env = "LANTERN_ALERTS_DIR", default_value = "data/alerts")]
    config_dir: String,

    /// Print loaded groups' rules as well.
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    lantern_alerts::config::load_dotenv();
    let cli = Cli::parse();

    let source = DirConfigSource::new(&cli.config_dir);
    info!(path = %cli.config_dir, "scanning alert configuration");
    let reports = source.load_all()?;

    if reports.is_empty() {
        println!("no alert group files found under {}", cli.config_dir);
        return Ok(());
    }

    let mut loaded = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for report in &reports {
        match &report.status {
            LoadStatus::Loaded {
                project,
                group,
                rules,
            } => {
                loaded += 1;
                println!(
                    "ok      {}  ({project}/{group}, {rules} rule{})",
                    report.path.display(),
                    if *rules == 1 { "" } else { "s" }
                );
                if cli.verbose {
                    if let Ok(group) = source.get_alert_group(project, group).await {
                        println!(
                            "          interval: {}",
                            format_duration(group.effective_interval())
                        );
                        for rule in &group.rules {
                            println!("          rule {}: {}", rule.id, rule.spec.name);
                        }
                    }
                }
            }
            LoadStatus::Skipped { reason } => {
                skipped += 1;
                println!("skip    {}  ({reason})", report.path.display());
            }
            LoadStatus::Failed { error } => {
                failed += 1;
                println!("FAIL    {}  {error}", report.path.display());
            }
        }
    }

    println!("\n{loaded} loaded, {skipped} skipped, {failed} failed");

    if failed > 0 {
        anyhow::bail!("{failed} group file(s) failed to parse");
    }
    Ok(())
}
