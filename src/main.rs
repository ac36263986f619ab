mod app;
mod domain;
mod github;
mod staleness;
mod template;

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use log::{LevelFilter, error, info};
use simple_logger::SimpleLogger;

use app::{Config, RunError, RunSummary};
use domain::RepoRef;
use github::{GH_API, GithubClient};
use template::DEFAULT_TEMPLATE_PATH;

/// Send pending review notifications to reviewers as GitHub Discussions.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, help = "GitHub token used for API requests")]
    token: Option<String>,

    #[arg(long, help = "repository to inspect for pull requests, as owner/name")]
    repo: RepoRef,

    #[arg(long, help = "repository that hosts the notification discussions; defaults to --repo")]
    discussion_repo: Option<RepoRef>,

    #[arg(long, help = "discussion category that receives the notifications")]
    category: String,

    #[arg(long, help = "title of the notification run")]
    title: Option<String>,

    #[arg(long, help = "hours a review may stay pending before the reviewer is notified")]
    max_wait_hours: u32,

    #[arg(long, default_value = DEFAULT_TEMPLATE_PATH, help = "path to the message template")]
    template: PathBuf,

    #[arg(long, env = "GITHUB_API_URL", default_value = GH_API, help = "GitHub API base URL")]
    api_url: String,

    #[arg(long, default_value_t = false, help = "render notifications without touching discussions")]
    dry_run: bool,

    #[arg(short, long, default_value_t = false, help = "log progress of the run")]
    verbose: bool,
}

fn execute(args: Args) -> Result<RunSummary, RunError> {
    let client = GithubClient::new(args.token.as_deref().unwrap_or_default(), &args.api_url)?;

    let config = Config {
        discussion_repo: args.discussion_repo.unwrap_or_else(|| args.repo.clone()),
        repo: args.repo,
        category: args.category,
        title: args.title,
        max_wait: staleness::max_wait_from_hours(args.max_wait_hours),
        template_path: args.template,
        dry_run: args.dry_run,
    };

    let summary = app::run(&client, &config)?;
    if config.dry_run {
        for notification in &summary.notifications {
            println!("# {}\n\n{}\n", notification.title, notification.body);
        }
    }
    Ok(summary)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    if let Err(err) = SimpleLogger::new().with_level(level).env().init() {
        eprintln!("Failed to initialise logging: {err}");
    }

    match execute(args) {
        Ok(summary) => {
            info!(
                "Checked {} pull requests, deleted {} discussions, created {}",
                summary.pull_requests, summary.deleted, summary.created
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
