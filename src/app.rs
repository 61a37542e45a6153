use std::fs;
use std::path::{Path, PathBuf};

use crate::{
    display::{self, OutputFormat},
    local_logger::init_local_logger,
    prelude::*,
    project_config,
};
use clap::{
    Parser, ValueEnum,
    builder::{Styles, styling},
};
use proctree::{Config, ConfigOption, Pid, ProcTree, ProcessRecord, StaticSource, SysinfoSource};

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Cyan.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceKind {
    /// Portable process listing
    #[default]
    Sysinfo,
    /// Read /proc directly (Linux only)
    Procfs,
}

#[derive(Parser, Debug)]
#[command(version, about = "Print the tree of running processes", styles = create_styles())]
pub struct Cli {
    /// Include kernel threads (pid 2 and its children)
    #[arg(short = 'k', long, env = "PROCTREE_INCLUDE_KERNEL_THREADS")]
    pub include_kernel_threads: bool,

    /// Include the ancestors of the roots. No effect without --root
    #[arg(short = 'a', long, env = "PROCTREE_INCLUDE_ANCESTORS")]
    pub include_ancestors: bool,

    /// Pid of a root of the tree, may be repeated.
    /// By default, every process without a parent is a root.
    #[arg(
        short = 'r',
        long = "root",
        value_name = "PID",
        env = "PROCTREE_ROOTS",
        value_delimiter = ',',
        value_parser = clap::value_parser!(Pid).range(1..)
    )]
    pub roots: Vec<Pid>,

    /// Path to a YAML configuration file.
    /// Otherwise, proctree.yaml, proctree.yml, .proctree.yaml or .proctree.yml
    /// is loaded from the current directory when present.
    #[arg(long, env = "PROCTREE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where the process listing comes from
    #[arg(long, value_enum, default_value_t)]
    pub source: SourceKind,

    /// Read the processes from a JSON snapshot instead of the live system
    #[arg(long, value_name = "PATH", conflicts_with = "source")]
    pub snapshot: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_local_logger()?;

    let config = cli.resolve_config(&std::env::current_dir()?)?;
    debug!("Using {config:?}");
    let tree = cli.open_tree(config)?;
    print!("{}", display::render(&tree, cli.format)?);
    tree.close()?;
    Ok(())
}

impl Cli {
    /// Options set on the command line, applied on top of the configuration file.
    /// Unset flags leave the file's values untouched.
    fn config_options(&self) -> Vec<ConfigOption> {
        let mut options = Vec::new();
        if self.include_kernel_threads {
            options.push(ConfigOption::IncludeKernelThreads(true));
        }
        if self.include_ancestors {
            options.push(ConfigOption::IncludeRootAncestors(true));
        }
        options.extend(self.roots.iter().copied().map(ConfigOption::RootPid));
        options
    }

    fn resolve_config(&self, current_dir: &Path) -> Result<Config> {
        let base = project_config::discover_and_load(self.config.as_deref(), current_dir)?
            .unwrap_or_default();
        Ok(base.refine(self.config_options()))
    }

    fn open_tree(&self, config: Config) -> Result<ProcTree> {
        let tree = match (&self.snapshot, self.source) {
            (Some(path), _) => ProcTree::with_source(config, load_snapshot(path)?),
            (None, SourceKind::Sysinfo) => ProcTree::with_source(config, SysinfoSource),
            #[cfg(target_os = "linux")]
            (None, SourceKind::Procfs) => {
                ProcTree::with_source(config, proctree::ProcfsSource)
            }
            #[cfg(not(target_os = "linux"))]
            (None, SourceKind::Procfs) => bail!("The procfs source is only available on Linux"),
        };
        tree.context("Failed to build the process tree")
    }
}

fn load_snapshot(path: &Path) -> Result<StaticSource> {
    let content = fs::read(path)
        .with_context(|| format!("Failed to read snapshot at {}", path.display()))?;
    let records: Vec<ProcessRecord> = serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse snapshot at {}", path.display()))?;
    debug!("Loaded {} records from {}", records.len(), path.display());
    Ok(StaticSource::new(records))
}
