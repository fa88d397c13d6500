use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use thinktest_ingest::analysis::{AnalysisService, PatternAnalyzer};
use thinktest_ingest::error::IngestError;
use thinktest_ingest::generation::GenerationOptions;
use thinktest_ingest::github::{GitHubClient, RepositoryReference};
use thinktest_ingest::store::NewAnalysis;
use thinktest_ingest::utils::with_single_retry;
use thinktest_ingest::{logging, AppState, Config};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// User the request is made on behalf of
    #[arg(long, global = true, default_value_t = 1)]
    user_id: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a repository URL and show its metadata
    Validate {
        /// `https://github.com/owner/repo`, `git@github.com:owner/repo.git` or `owner/repo`
        url: String,
    },
    /// List the branches of a repository
    Branches(RepoArgs),
    /// Show the filtered file tree of a branch
    Tree {
        #[command(flatten)]
        repo: RepoArgs,
        /// Branch to list
        #[arg(short, long)]
        branch: String,
        /// List nested directories too
        #[arg(short, long)]
        recursive: bool,
    },
    /// Print one decoded file
    File {
        #[command(flatten)]
        repo: RepoArgs,
        /// Path inside the repository
        path: String,
        /// Branch to read from
        #[arg(short, long)]
        branch: String,
    },
    /// Ingest a branch, analyze it and generate tests
    Process {
        #[command(flatten)]
        repo: RepoArgs,
        /// Branch to ingest
        #[arg(short, long)]
        branch: String,
        /// AI provider
        #[arg(long, default_value = "openai")]
        provider: String,
        /// Test framework: phpunit or pest
        #[arg(long, default_value = "phpunit")]
        framework: String,
        /// Write the aggregated payload here
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write the generated tests here
        #[arg(short, long)]
        tests: Option<PathBuf>,
    },
    /// Check the configured GitHub token
    Token,
    /// Show GitHub's API budget for the configured token
    RateLimit,
}

#[derive(Args)]
struct RepoArgs {
    /// Repository owner
    owner: String,
    /// Repository name
    repo: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.validate()?;

    if let Err(err) = run(cli, config).await {
        match err.downcast_ref::<IngestError>() {
            Some(ingest) => {
                eprintln!("{} {}", "Error:".red().bold(), ingest.public_message());
                if let Some(delay) = ingest.retry_after() {
                    eprintln!("{} retry in {:?}", "Hint:".yellow(), delay);
                }
            }
            None => eprintln!("{} {:#}", "Error:".red().bold(), err),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let user_id = cli.user_id;
    match cli.command {
        Command::Validate { url } => {
            let state = AppState::from_config(config).await?;
            let reference = state.validation.validate_repository_url(&url, user_id)?;
            let client = state.github.client();
            let (owner, name) = (reference.owner.as_str(), reference.repo.as_str());
            let info = with_single_retry(|| async move {
                client
                    .get_repository_info(owner, name)
                    .await
                    .map_err(IngestError::from)
            })
            .await?;

            println!("{} {}", "Valid:".green().bold(), reference.full_name);
            println!("  default branch: {}", info.default_branch);
            println!("  size:           {} KiB", info.size);
            println!("  private:        {}", info.private);
            if let Some(language) = &info.language {
                println!("  language:       {}", language);
            }
            if let Some(description) = &info.description {
                println!("  description:    {}", description);
            }
        }
        Command::Branches(repo) => {
            let state = AppState::from_config(config).await?;
            let reference = checked(&state, &repo, user_id)?;
            let branches = state
                .github
                .branches(&reference.owner, &reference.repo)
                .await
                .map_err(IngestError::from)?;
            if let Some(message) = branches.status.message() {
                println!("{}", message.yellow());
            }
            for branch in &branches.value {
                let marker = if branch.protected { " (protected)" } else { "" };
                println!("{}{}", branch.name.cyan(), marker);
            }
        }
        Command::Tree {
            repo,
            branch,
            recursive,
        } => {
            let state = AppState::from_config(config).await?;
            let reference = checked(&state, &repo, user_id)?;
            state.validation.validate_branch_name(&branch)?;
            let tree = state
                .github
                .tree(&reference.owner, &reference.repo, &branch, recursive)
                .await
                .map_err(IngestError::from)?;
            if let Some(message) = tree.status.message() {
                println!("{}", message.yellow());
            }
            for entry in &tree.value {
                if entry.is_file() {
                    println!("{:>9}  {}", entry.size, entry.path);
                } else {
                    println!("{:>9}  {}/", "", entry.path.blue());
                }
            }
        }
        Command::File { repo, path, branch } => {
            let state = AppState::from_config(config).await?;
            let reference = checked(&state, &repo, user_id)?;
            state.validation.validate_branch_name(&branch)?;
            state.validation.validate_file_path(&path, user_id)?;
            let file = state
                .github
                .client()
                .get_file_content(&reference.owner, &reference.repo, &path, &branch)
                .await
                .map_err(IngestError::from)?;
            print!("{}", state.validation.sanitize_file_content(&file.content));
        }
        Command::Process {
            repo,
            branch,
            provider,
            framework,
            output,
            tests,
        } => {
            let state = AppState::from_config(config).await?;
            let reference = checked(&state, &repo, user_id)?;
            state.validation.validate_branch_name(&branch)?;

            let pb = create_progress_bar();
            pb.set_message(format!("Processing {}@{}", reference.full_name, branch));
            let result = state.orchestrator.process(user_id, &reference, &branch).await;
            pb.finish_and_clear();
            let outcome = result?;

            println!(
                "{} {}@{}: {} files, {} skipped",
                "Completed".green().bold(),
                reference.full_name,
                branch,
                outcome.files_processed,
                outcome.files_skipped
            );
            for path in &outcome.skipped_paths {
                println!("  {} {}", "skipped".yellow(), path);
            }
            println!("  content hash: {}", outcome.content_hash);

            let report = PatternAnalyzer::new()
                .analyze(&outcome.content, &reference.full_name)
                .await?;
            println!(
                "  {} functions, {} classes, {} hooks",
                report.functions.len(),
                report.classes.len(),
                report.hooks.len()
            );

            let options = GenerationOptions {
                provider,
                framework,
            };
            state
                .store
                .upsert_analysis(&NewAnalysis {
                    user_id,
                    filename: format!("{}@{}", reference.full_name, branch),
                    file_hash: outcome.content_hash.clone(),
                    analysis_data: serde_json::to_value(&report)?,
                    provider: options.provider.clone(),
                    framework: options.framework.clone(),
                })
                .await?;

            if let Some(path) = output {
                tokio::fs::write(&path, &outcome.content)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("  payload written to {}", path.display());
            }

            if let Some(path) = tests {
                let pb = create_progress_bar();
                pb.set_message(format!("Generating {} tests", options.framework));
                let generated = state.generator.generate(&outcome.content, &options).await;
                pb.finish_and_clear();
                let generated = generated?;
                tokio::fs::write(&path, &generated.tests)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("  tests ({}) written to {}", generated.model, path.display());
            }
        }
        Command::Token => {
            let client = GitHubClient::new(&config)?;
            let status = client.verify_api_token().await.map_err(IngestError::from)?;
            let label = if status.valid {
                "valid".green().bold()
            } else {
                "invalid".red().bold()
            };
            println!("Token: {} ({})", label, status.message);
            if let Some(login) = &status.login {
                println!("  login:  {}", login);
            }
            if !status.scopes.is_empty() {
                println!("  scopes: {}", status.scopes.join(", "));
            }
        }
        Command::RateLimit => {
            let client = GitHubClient::new(&config)?;
            let info = client.get_rate_limit_info().await.map_err(IngestError::from)?;
            println!(
                "{}/{} requests left, {} used, resets at {}",
                info.remaining, info.limit, info.used, info.reset
            );
        }
    }
    Ok(())
}

fn checked(state: &AppState, repo: &RepoArgs, user_id: i64) -> anyhow::Result<RepositoryReference> {
    let reference = RepositoryReference::new(&repo.owner, &repo.repo);
    let raw_input = format!("{}/{}", repo.owner, repo.repo);
    state
        .validation
        .validate_repository_components(&reference, &raw_input, user_id)?;
    Ok(reference)
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style.tick_strings(&["-", "\\", "|", "/", "-", "\\", "|", "/"]));
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
