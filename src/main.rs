use anyhow::{Context, Result};
use clap::Parser;
use console::Style;

use healdec::FailureClassifier;
use healdec::cli::{Cli, Command};
use healdec::config::HealdecConfig;
use healdec::demo::{self, DemoSettings, ScenarioReport};
use healdec::logging::init_logging;
use healdec::state_machine::{Job, JobKind};
use healdec::ui::{HealingProgress, print_strategies};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = HealdecConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "failed to load config from {}",
            cli.config
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| healdec::config::DEFAULT_CONFIG_FILE.to_string())
        )
    })?;
    if let Some(max_retries) = cli.max_retries {
        config.retry.max_retries = max_retries;
    }

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    init_logging(level, cli.log_json);

    match cli.command {
        Command::Classify { error } => {
            let job = Job::new(JobKind::Maintenance, serde_json::json!({}));
            let classification = FailureClassifier::classify(&job, error.as_str());
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        Command::Strategies => {
            print_strategies(&config.retry, &config.restart);
        }
        Command::Demo {
            scenario,
            seed,
            real_time,
        } => {
            let settings = DemoSettings {
                config,
                seed,
                real_time,
            };
            for scenario in scenario.expand() {
                let progress = HealingProgress::start(&format!("{scenario:?}"));
                let report = demo::run(scenario, &settings).await;
                print_report(&progress, &report, cli.verbose);
            }
        }
    }

    Ok(())
}

fn print_report(progress: &HealingProgress, report: &ScenarioReport, verbose: bool) {
    progress.step(&report.error_text);
    progress.classification(&report.classification);

    let Some(last) = report.attempts.last() else {
        progress.abandon(report.failure.as_deref().unwrap_or("no healing attempt recorded"));
        return;
    };
    progress.complete(last);
    if let Some(failure) = &report.failure {
        println!("    {}", Style::new().red().apply_to(failure));
    }
    println!(
        "    job {} is {} after {} attempt(s)",
        report.job.id, report.job.status, report.job.attempts
    );
    if !report.worker_calls.is_empty() {
        println!("    worker calls: {:?}", report.worker_calls);
    }
    if verbose {
        for attempt in &report.attempts {
            progress.print_attempt(attempt);
        }
    }
    println!();
}
