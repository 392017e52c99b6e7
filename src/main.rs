use clap::{Parser, Subcommand};
use optdoc::{config, output, pipeline};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Shared flags for commands that render fragments.
#[derive(clap::Args, Clone)]
struct CacheArgs {
    /// Disable the fragment cache and render every fragment again
    #[arg(long)]
    no_cache: bool,
}

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "optdoc")]
#[command(about = "Build option reference manuals from module option exports")]
#[command(long_about = "\
Build option reference manuals from module option exports

Every module set's raw option list is normalized, exported as canonical
JSON and rendered into a DocBook fragment. The fragments are combined with
the hand-authored documents, cross-references are resolved, and the result
is rendered to chunked HTML and man pages.

Project structure:

  optdoc.toml                # Build config (run 'optdoc gen-config')
  options.json               # Raw option list of a module set
  packages.json              # Package repository for related packages
  docs/
  ├── manual.xml             # Book root, includes <fragment_id>.xml
  ├── manpages.xml           # Man-page reference root
  └── chapters/intro.xml

Output:

  result/share/doc/<path_name>/index.html, <toc file>.html, style.css
  result/share/doc/<path_name>/options/<fragment_id>.json
  result/share/man/man<N>/<title>.<N>")]
#[command(version = version_string())]
struct Cli {
    /// Build configuration file
    #[arg(long, default_value = config::CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Output directory
    #[arg(long, default_value = "result", global = true)]
    output: PathBuf,

    /// Directory for intermediate files (fragments, fragment cache)
    #[arg(long, default_value = ".optdoc", global = true)]
    work_dir: PathBuf,

    /// Log pipeline progress
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize module sets and write canonical option JSON
    Export,
    /// Render option fragments into the work directory
    Fragments(CacheArgs),
    /// Validate documents and cross-reference targets without writing output
    Check,
    /// Run the full pipeline: export → fragments → combine → render
    Build(CacheArgs),
    /// Print a stock optdoc.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Command::Export => {
            let project = load_project(&cli)?;
            let summary = pipeline::run_export(&project, &cli.output)?;
            output::print_export_output(&summary, &cli.output);
        }
        Command::Fragments(cache_args) => {
            let project = load_project(&cli)?;
            let summary = pipeline::run_fragments(&project, &cli.work_dir, !cache_args.no_cache)?;
            output::print_fragment_output(&summary, &cli.work_dir);
        }
        Command::Check => {
            println!("==> Checking {}", cli.config.display());
            let project = load_project(&cli)?;
            let summary = pipeline::run_check(&project, &cli.work_dir)?;
            output::print_check_output(&summary);
            println!("==> Documents are valid");
        }
        Command::Build(cache_args) => {
            println!("==> Building {} → {}", cli.config.display(), cli.output.display());
            let project = load_project(&cli)?;
            let summary = pipeline::run_build(&project, &cli.output, &cli.work_dir, !cache_args.no_cache)?;
            output::print_build_output(&summary, &cli.output);
            println!("==> Build complete: {}", cli.output.display());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load the project config and size the thread pool from it.
fn load_project(cli: &Cli) -> Result<pipeline::Project, pipeline::BuildError> {
    let project = pipeline::Project::load(&cli.config)?;
    init_thread_pool(&project.config.processing);
    Ok(project)
}

/// `--verbose` logs at info, otherwise `RUST_LOG` decides, defaulting to warn.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
