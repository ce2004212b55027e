//! Pre-commit and CI gate.
//!
//! Works out what changed in the current git repository, optionally stages a
//! snapshot of it, renders a step-tree document with the change sets, and runs
//! the resulting checks. Exits non-zero on the first failed check.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use gitix::engine::{start_checks, wait_for_first_failure};
use gitix::exit_codes;
use gitix::io::config::{GitixConfig, SETTINGS_FILE, ToolchainKind, load_config};
use gitix::io::document::{load_check_tree, read_document};
use gitix::io::executor::CommandExecutor;
use gitix::io::git::Git;
use gitix::io::toolchain::{GoToolchain, NoPackages, Toolchain};
use gitix::logging;
use gitix::workspace::{MaterializeRequest, materialize};

#[derive(Parser, Debug)]
#[command(
    name = "gitix",
    version,
    about = "Run checks against the changed parts of a git repository"
)]
struct Cli {
    /// Git pathspec limiting which changes count (repeatable).
    #[arg(short = 'p', long = "path-spec", value_name = "PATHSPEC")]
    path_spec: Vec<String>,

    /// Verbose logging and a dump of the document variables.
    #[arg(short, long)]
    debug: bool,

    /// Print commands instead of running them.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Stage with a symlinked shadow copy instead of a full checkout.
    #[arg(long)]
    lndir: bool,

    /// Check a revision range instead of local changes.
    #[arg(long, value_name = "RANGE")]
    rev: Option<String>,

    /// Check only what is staged for commit.
    #[arg(long)]
    staged: bool,

    /// Step-tree document (built-in default if omitted).
    document: Option<PathBuf>,
}

impl Cli {
    /// Command-line flags win over the settings file.
    fn apply(&self, config: &mut GitixConfig) {
        if !self.path_spec.is_empty() {
            config.path_spec = self.path_spec.clone();
        }
        config.shadow_link |= self.lndir;
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);
    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let git_root = Git::new(&cwd).show_toplevel()?;
    let mut config = load_config(&git_root.join(SETTINGS_FILE))?;
    cli.apply(&mut config);

    // Read before activation moves the working directory.
    let raw_document = read_document(cli.document.as_deref())?;

    let toolchain: Box<dyn Toolchain> = match config.toolchain {
        ToolchainKind::Go => Box::new(GoToolchain),
        ToolchainKind::None => Box::new(NoPackages),
    };
    let request = MaterializeRequest {
        source_root: git_root,
        path_spec: config.path_spec.clone(),
        rev_spec: cli.rev.clone(),
        staging: cli.staged,
        shadow_link: config.shadow_link,
        activate: true,
    };
    let mut workspace = materialize(&request, toolchain.as_ref())?;

    let data = workspace.template_data();
    if cli.debug {
        let dump = serde_json::to_string_pretty(&data).context("serialize document variables")?;
        eprintln!("{dump}");
    }
    let tree = load_check_tree(&raw_document, &data)?;

    let executor = CommandExecutor {
        dry_run: cli.dry_run,
        shell: config.shell.clone(),
        workdir: workspace.effective_root().to_path_buf(),
        env: workspace.env().clone(),
        output_limit_bytes: config.output_limit_bytes,
    };

    println!("Running checks...");
    let results = start_checks(Arc::new(tree), Arc::new(executor));
    let outcome = wait_for_first_failure(results, |passed| {
        if passed.dry_run {
            println!("{} (dry run)", passed.name);
        } else {
            println!("{} passed", passed.name);
        }
    });

    let code = match outcome {
        Ok(_) => exit_codes::OK,
        Err(failure) => {
            eprintln!("{failure}");
            exit_codes::FAILED
        }
    };
    // The check verdict stands even if cleanup fails.
    if let Err(err) = workspace.close() {
        warn!(err = %err, "workspace cleanup failed");
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["gitix"]);
        assert!(cli.path_spec.is_empty());
        assert!(!cli.debug && !cli.dry_run && !cli.lndir && !cli.staged);
        assert!(cli.rev.is_none());
        assert!(cli.document.is_none());
    }

    #[test]
    fn parse_repeated_path_specs_and_document() {
        let cli = Cli::parse_from([
            "gitix", "-p", "*.rs", "--path-spec", "docs/", "-n", "--staged", "checks.yml",
        ]);
        assert_eq!(cli.path_spec, vec!["*.rs".to_string(), "docs/".to_string()]);
        assert!(cli.dry_run);
        assert!(cli.staged);
        assert_eq!(cli.document, Some(PathBuf::from("checks.yml")));
    }

    #[test]
    fn parse_revision_range() {
        let cli = Cli::parse_from(["gitix", "--rev", "main..HEAD", "-d"]);
        assert_eq!(cli.rev.as_deref(), Some("main..HEAD"));
        assert!(cli.debug);
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from(["gitix", "-p", "*.rs", "--lndir"]);
        let mut config = GitixConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.path_spec, vec!["*.rs".to_string()]);
        assert!(config.shadow_link);
    }

    #[test]
    fn settings_kept_without_flags() {
        let cli = Cli::parse_from(["gitix"]);
        let mut config = GitixConfig {
            shadow_link: true,
            ..GitixConfig::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.path_spec, GitixConfig::default().path_spec);
        assert!(config.shadow_link);
    }
}
