//! Chainhub: define and launch ordered chains of shell scripts.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads configuration, sets up logging, and dispatches each
//! subcommand to the stores held by the application context.

mod app;
mod chains;
mod config;
mod detect;
mod error;
mod paths;
mod process;
mod rows;
mod runner;
mod settings;
mod shells;
mod txn;
mod validate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::app::AppContext;
use crate::process::ChainRun;
use crate::runner::{DetachedLauncher, DryRunLauncher};
use crate::settings::{ExitPolicy, FileDisplay, SettingOption};
use crate::validate::Area;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "chainhub",
    version,
    about = "Define and launch chains of shell scripts",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to chainhub.toml configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Ignore any chainhub.toml in the current directory.
    #[arg(long, global = true)]
    no_config: bool,
    /// Data directory holding Shells/, Chains/ and Settings/.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Print listings and reports as JSON.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create missing directories, stores and settings files.
    Init,
    /// Check the stores for consistency and print every problem.
    Validate,
    /// Launch every link of a chain.
    Run {
        /// Chain to run.
        chain: Option<String>,
        /// Resolve and print commands without launching anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Manage chains.
    #[command(subcommand)]
    Chain(ChainCommand),
    /// Manage registered shells.
    #[command(subcommand)]
    Shell(ShellCommand),
    /// Show or change settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Debug, Subcommand)]
enum ChainCommand {
    /// List chain names.
    List,
    /// Show the links of a chain.
    Show { name: String },
    /// Create an empty chain.
    New { name: String },
    /// Append a link (creates the chain if needed).
    AddLink {
        chain: String,
        /// Registered shell, by path or list index.
        #[arg(long)]
        shell: String,
        /// Script to run.
        #[arg(long)]
        script: String,
    },
    /// Overwrite the link at an index.
    SetLink {
        chain: String,
        index: usize,
        #[arg(long)]
        shell: String,
        #[arg(long)]
        script: String,
    },
    /// Delete the link at an index.
    DeleteLink { chain: String, index: usize },
    /// Save a copy of a chain under a new name.
    Copy { from: String, to: String },
    /// Delete one or more chains.
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ShellCommand {
    /// List registered shells.
    List,
    /// Register a shell executable and detect its identity.
    Add { path: String },
    /// Remove shells by index, along with every chain link using them.
    Remove {
        #[arg(required = true)]
        indices: Vec<usize>,
    },
    /// Print the detected identity of an executable without registering it.
    Detect { path: String },
    /// Edit the identity or flags of a shell.
    Edit {
        index: usize,
        #[arg(long)]
        identity: Option<String>,
        /// Flag placed before the script.
        #[arg(long, allow_hyphen_values = true)]
        pre: Option<String>,
        /// Flag placed after the script.
        #[arg(long, allow_hyphen_values = true)]
        post: Option<String>,
    },
    /// Re-run identity detection for a shell.
    Redetect { index: usize },
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    /// Show every setting with its options.
    Show,
    /// Set a setting (file-display, exit-after-execution).
    Set { key: String, value: String },
}

/// Values resolved from the command line, the config file and defaults.
#[derive(Debug, Clone)]
struct RunSettings {
    root: PathBuf,
    probe_timeout: Duration,
    log_level: Option<String>,
}

impl RunSettings {
    fn resolve(cli: &Cli, config: &config::Config) -> Result<Self> {
        let root = match (&cli.root, &config.root) {
            (Some(root), _) => root.clone(),
            (None, Some(root)) => PathBuf::from(root),
            (None, None) => std::env::current_dir().context("failed to read current directory")?,
        };
        let probe_timeout = config
            .probe_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(detect::DEFAULT_PROBE_TIMEOUT);
        Ok(Self {
            root,
            probe_timeout,
            log_level: config.log_level.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let settings = RunSettings::resolve(&cli, &config)?;
    init_logging(cli.verbose, settings.log_level.as_deref());

    let ctx = AppContext::new(&settings.root, settings.probe_timeout);
    tracing::debug!(root = %settings.root.display(), "using data root");
    if !matches!(cli.command, Commands::Init | Commands::Validate) {
        ctx.startup_check();
    }

    match &cli.command {
        Commands::Init => {
            let created = ctx.setup()?;
            if created.is_empty() {
                println!("Nothing to do; {} is already set up.", settings.root.display());
            }
            for path in created {
                println!("created {}", path.display());
            }
        }
        Commands::Validate => {
            let report = ctx.validate()?;
            if report.is_clean() {
                println!("No problems found.");
            } else {
                for issue in &report.issues {
                    println!("[{}] {}", issue.area, issue.message);
                }
                bail!(
                    "{} problem(s) found (chains: {}, settings: {}, shells: {})",
                    report.issues.len(),
                    report.count(Area::Chains),
                    report.count(Area::Settings),
                    report.count(Area::Shells)
                );
            }
        }
        Commands::Run { chain, dry_run } => {
            let selection: Vec<String> = chain.iter().cloned().collect();
            let run = if *dry_run {
                ctx.run_chain(&selection, &mut DryRunLauncher)
            } else {
                ctx.run_chain(&selection, &mut DetachedLauncher)
            };
            // A dry run always reports, whatever the exit policy says.
            report_run(&run, cli.json, !*dry_run)?;
        }
        Commands::Chain(command) => handle_chain(&ctx, command, cli.json)?,
        Commands::Shell(command) => handle_shell(&ctx, command, cli.json).await?,
        Commands::Settings(command) => handle_settings(&ctx, command, cli.json)?,
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<config::Config> {
    if cli.no_config {
        return Ok(config::Config::default());
    }
    let path = cli
        .config
        .clone()
        .or_else(default_config_path);
    match path {
        Some(path) => config::load_config(&path),
        None => Ok(config::Config::default()),
    }
}

fn default_config_path() -> Option<PathBuf> {
    let path = Path::new(config::DEFAULT_CONFIG_FILE);
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn init_logging(verbose: bool, config_level: Option<&str>) {
    let level = if verbose {
        "debug"
    } else {
        config_level.unwrap_or("warn")
    };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_run(run: &ChainRun, json: bool, honour_exit: bool) -> Result<()> {
    if honour_exit && run.exit_host {
        let code = if run.status.is_failure() { 1 } else { 0 };
        std::process::exit(code);
    }
    if json {
        print_json(run)?;
    } else {
        for launched in &run.launched {
            let pid = launched
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("[{}] pid {}: {}", launched.index, pid, launched.command.display());
        }
    }
    if run.status.is_failure() {
        bail!("{}", run.message());
    }
    if !json {
        println!("{}", run.message());
    }
    Ok(())
}

fn handle_chain(ctx: &AppContext, command: &ChainCommand, json: bool) -> Result<()> {
    match command {
        ChainCommand::List => {
            let names = ctx.chains.list()?;
            if json {
                return print_json(&names);
            }
            for name in names {
                println!("{}", name);
            }
        }
        ChainCommand::Show { name } => {
            if !ctx.chains.exists(name) {
                bail!("chain '{}' does not exist", name);
            }
            let links = ctx.chains.load(name)?;
            if json {
                return print_json(&links);
            }
            if links.is_empty() {
                println!("Chain '{}' has no links.", name);
            }
            for (idx, link) in links.iter().enumerate() {
                println!(
                    "Link-{}: {} -> {}",
                    idx,
                    ctx.display(&link.shell),
                    ctx.display(&link.script)
                );
            }
        }
        ChainCommand::New { name } => {
            let name = ctx.create_chain(name)?;
            println!("Chain '{}' created.", name);
        }
        ChainCommand::AddLink {
            chain,
            shell,
            script,
        } => {
            let index = ctx.add_link(chain, shell, script)?;
            println!("Added Link-{} to '{}'.", index, chain.trim());
        }
        ChainCommand::SetLink {
            chain,
            index,
            shell,
            script,
        } => {
            ctx.set_link(chain, *index, shell, script)?;
            println!("Selected link updated.");
        }
        ChainCommand::DeleteLink { chain, index } => {
            ctx.delete_link(chain, *index)?;
            println!("Selected link deleted.");
        }
        ChainCommand::Copy { from, to } => {
            let name = ctx.copy_chain(from, to)?;
            println!("Chain '{}' saved as '{}'.", from.trim(), name);
        }
        ChainCommand::Delete { names } => {
            let failures = ctx.chains.delete_chains(names);
            for (name, err) in &failures {
                eprintln!("Failed to delete {}: {}", name, err);
            }
            let deleted = names.len() - failures.len();
            println!("Deleted {} chain(s).", deleted);
            if !failures.is_empty() {
                bail!("{} chain(s) could not be deleted", failures.len());
            }
        }
    }
    Ok(())
}

async fn handle_shell(ctx: &AppContext, command: &ShellCommand, json: bool) -> Result<()> {
    match command {
        ShellCommand::List => {
            let shells = ctx.shells.list()?;
            if json {
                return print_json(&shells);
            }
            for shell in shells {
                println!(
                    "{}: {} [{}] {}",
                    shell.index,
                    ctx.display(&shell.path),
                    shell.identity,
                    format_options(&shell.options)
                );
            }
        }
        ShellCommand::Add { path } => {
            let entry = ctx
                .shells
                .add_shell(path)
                .await
                .context("Failed to add shell")?;
            if json {
                return print_json(&entry);
            }
            println!("{}: {} [{}]", entry.index, entry.path, entry.identity);
        }
        ShellCommand::Remove { indices } => {
            let removal = ctx
                .shells
                .remove_shells(indices)
                .context("Failed to remove shell")?;
            for shell in &removal.shells {
                println!("removed {}", shell);
            }
            println!("{} chain link(s) removed.", removal.links_dropped);
        }
        ShellCommand::Detect { path } => {
            let path = paths::normalize_path(path)?;
            println!("{}", detect::detect_shell(&path, ctx.shells.probe_timeout()).await);
        }
        ShellCommand::Edit {
            index,
            identity,
            pre,
            post,
        } => {
            if identity.is_none() && pre.is_none() && post.is_none() {
                bail!("nothing to change (use --identity, --pre or --post)");
            }
            if let Some(identity) = identity {
                ctx.shells.set_identity(*index, identity)?;
            }
            if pre.is_some() || post.is_some() {
                let current = ctx.shells.entry(*index)?.options;
                ctx.shells.set_options(
                    *index,
                    pre.as_deref().unwrap_or(&current.pre_script),
                    post.as_deref().unwrap_or(&current.post_script),
                )?;
            }
            println!("Shell options saved successfully!");
        }
        ShellCommand::Redetect { index } => {
            let identity = ctx.shells.redetect(*index).await?;
            println!("{}", identity);
        }
    }
    Ok(())
}

fn format_options(options: &shells::ShellOptions) -> String {
    [
        "<shell>",
        options.pre_script.as_str(),
        options.marker.as_str(),
        options.post_script.as_str(),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join(" ")
}

#[derive(Debug, Serialize)]
struct SettingView {
    key: &'static str,
    selected: &'static str,
    options: &'static [&'static str],
}

fn setting_view<T: SettingOption>(value: T) -> SettingView {
    SettingView {
        key: T::KEY,
        selected: value.label(),
        options: T::OPTIONS,
    }
}

fn handle_settings(ctx: &AppContext, command: &SettingsCommand, json: bool) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            let views = [
                setting_view(ctx.settings.get::<FileDisplay>()),
                setting_view(ctx.settings.get::<ExitPolicy>()),
            ];
            if json {
                return print_json(&views);
            }
            for view in views {
                println!("{}: {} (options: {})", view.key, view.selected, view.options.join(", "));
            }
        }
        SettingsCommand::Set { key, value } => {
            ctx.settings
                .set_by_key(key, value)
                .context("Failed to save settings")?;
            println!("Settings saved successfully!");
        }
    }
    Ok(())
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}
