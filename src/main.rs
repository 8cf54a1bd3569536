use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use flavorscan::{
    compare::{compare_files, CompareOptions, ComparisonOutcome},
    config::Config,
    logging,
    output::{emit, OutputFormat},
    reconcile::{
        FlavorScanResult, GitHubPackages, NameOverrides, PackagePlan, ReconcileOptions, Reconciler,
    },
    registry::RegistryClient,
    scanner::{Scanner, SystemRunner},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const NEW_VULNS: u8 = 2;
}

#[derive(Parser)]
#[command(name = "flavorscan")]
#[command(
    author,
    version,
    about = "Scan package flavors and diff their vulnerabilities against the last release"
)]
struct Cli {
    /// Debug logging, scanner output on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PackageArgs {
    /// Directory containing zarf.yaml and, optionally, releaser.yaml
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Only process this flavor
    #[arg(short, long)]
    flavor: Option<String>,

    /// Directory scan reports are written to
    #[arg(short, long, default_value = "scans")]
    output_dir: PathBuf,

    /// Repository prefix released packages are published under
    #[arg(short = 'r', long)]
    base_repo: Option<String>,

    /// Keep fetched SBOMs instead of deleting them
    #[arg(long)]
    debug: bool,
}

#[derive(Args)]
struct CompareArgs {
    /// Output format (markdown, simple)
    #[arg(long)]
    format: Option<String>,

    /// Write the comparison to a file instead of stdout
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// Warn instead of failing when the reports describe different images
    #[arg(long)]
    allow_different_images: bool,

    /// Exit with code 2 when new vulnerabilities are found
    #[arg(long)]
    fail_on_new_vulns: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the images each flavor builds
    Scan {
        #[command(flatten)]
        package: PackageArgs,
    },

    /// Scan the SBOMs of each flavor's latest release
    ScanReleased {
        #[command(flatten)]
        package: PackageArgs,
    },

    /// Scan current and released images, then compare them per flavor
    ScanAndCompare {
        #[command(flatten)]
        package: PackageArgs,

        #[command(flatten)]
        compare: CompareArgs,

        /// Released image name to use for a current one (repeatable)
        #[arg(long = "image-name-override", value_name = "RELEASED=CURRENT")]
        image_name_overrides: Vec<String>,
    },

    /// Compare two scan reports
    CompareScans {
        /// Baseline report
        base: PathBuf,

        /// Report to compare against the baseline
        new: PathBuf,

        #[command(flatten)]
        compare: CompareArgs,
    },

    /// Scan every SBOM in a directory
    ScanSboms {
        /// Directory containing *.json SBOMs
        dir: PathBuf,

        /// Directory scan reports are written to
        #[arg(short, long, default_value = "scans")]
        output_dir: PathBuf,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let code = match e.downcast_ref::<flavorscan::Error>() {
                Some(flavorscan::Error::NewVulnerabilities(_)) => exit_codes::NEW_VULNS,
                _ => exit_codes::ERROR,
            };
            eprintln!("Error: {:#}", e);
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<u8> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let log_format = cli.log_format.as_deref().unwrap_or(&config.log_format);
    logging::init_tracing(&config.log_level, log_format, cli.verbose)?;
    let verbose = cli.verbose;

    match cli.command {
        Commands::Scan { package } => {
            let plan = load_plan(&config, &package)?;
            let options = reconcile_options(
                &config,
                &package,
                CompareOptions::default(),
                NameOverrides::default(),
            );
            let results = with_reconciler(&config, verbose, options, |reconciler| {
                with_spinner("Scanning current images...", verbose, || {
                    reconciler.scan_current(&plan)
                })
            })?;
            print_scan_results(&results);
            Ok(exit_codes::SUCCESS)
        }
        Commands::ScanReleased { package } => {
            let plan = load_plan(&config, &package)?;
            let options = reconcile_options(
                &config,
                &package,
                CompareOptions::default(),
                NameOverrides::default(),
            );
            let results = with_reconciler(&config, verbose, options, |reconciler| {
                with_spinner("Scanning released SBOMs...", verbose, || {
                    reconciler.scan_released(&plan)
                })
            })?;
            print_scan_results(&results);
            Ok(exit_codes::SUCCESS)
        }
        Commands::ScanAndCompare {
            package,
            compare,
            image_name_overrides,
        } => {
            let plan = load_plan(&config, &package)?;
            let mut pairs = config.image_name_overrides.clone();
            pairs.extend(image_name_overrides);
            let overrides = NameOverrides::parse(pairs.as_slice())?;
            let options = reconcile_options(
                &config,
                &package,
                compare_options(&config, &compare)?,
                overrides,
            );

            let outcome = with_reconciler(&config, verbose, options, |reconciler| {
                with_spinner("Scanning and comparing...", verbose, || {
                    reconciler.scan_and_compare(&plan)
                })
            })?;
            finish_comparison(&outcome, &compare)
        }
        Commands::CompareScans { base, new, compare } => {
            let options = compare_options(&config, &compare)?;
            let outcome = compare_files(&base, &new, &options)?;
            finish_comparison(&outcome, &compare)
        }
        Commands::ScanSboms { dir, output_dir } => {
            let runner = SystemRunner;
            let scanner = Scanner::new(&runner, config.scan_options(verbose));
            let scans = with_spinner("Scanning SBOMs...", verbose, || {
                scanner.scan_sbom_dir(&dir, &output_dir)
            })?;

            let mut results = FlavorScanResult::new();
            results.insert(String::new(), scans);
            print_scan_results(&results);
            Ok(exit_codes::SUCCESS)
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
    }
}

fn load_plan(config: &Config, package: &PackageArgs) -> Result<PackagePlan> {
    let base_repository = package
        .base_repo
        .as_deref()
        .unwrap_or(&config.base_repository);
    let plan = PackagePlan::load(&package.dir, base_repository)?;
    match &package.flavor {
        Some(flavor) => Ok(plan.only(flavor)?),
        None => Ok(plan),
    }
}

fn compare_options(config: &Config, args: &CompareArgs) -> Result<CompareOptions> {
    let format = match &args.format {
        Some(format) => OutputFormat::from_str(format).map_err(|e| anyhow::anyhow!(e))?,
        None => config.output_format()?,
    };
    Ok(CompareOptions {
        format,
        allow_different_images: args.allow_different_images,
        fail_on_new: args.fail_on_new_vulns,
    })
}

fn reconcile_options(
    config: &Config,
    package: &PackageArgs,
    compare: CompareOptions,
    overrides: NameOverrides,
) -> ReconcileOptions {
    ReconcileOptions {
        output_dir: package.output_dir.clone(),
        registry_base_url: config.registry_base_url.clone(),
        overrides,
        compare,
        keep_sboms: package.debug,
        scratch_dir: config.sbom_scratch_dir.clone(),
    }
}

/// Wires the real scanner, package API and registry into a reconciler.
fn with_reconciler<T>(
    config: &Config,
    verbose: bool,
    options: ReconcileOptions,
    f: impl FnOnce(&Reconciler<'_>) -> Result<T>,
) -> Result<T> {
    let runner = SystemRunner;
    let releases = GitHubPackages::from_env(config.package_api_url.clone())?;
    let registry = RegistryClient::from_env()?;
    let scanner = Scanner::new(&runner, config.scan_options(verbose));
    let reconciler = Reconciler::new(scanner, &releases, &registry, options);
    f(&reconciler)
}

/// Runs `f` under a spinner when stderr is a terminal and logs are quiet.
fn with_spinner<T>(
    message: &str,
    verbose: bool,
    f: impl FnOnce() -> flavorscan::Result<T>,
) -> Result<T> {
    let spinner = if !verbose && std::io::stderr().is_terminal() {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(message.to_string());
        Some(pb)
    } else {
        None
    };

    let result = f();

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    Ok(result?)
}

fn finish_comparison(outcome: &ComparisonOutcome, args: &CompareArgs) -> Result<u8> {
    emit(&outcome.rendered, args.output_file.as_deref())?;
    if let Some(path) = &args.output_file {
        if std::io::stdout().is_terminal() {
            println!("Comparison written to: {}", path.display());
        }
    }

    outcome.enforce(args.fail_on_new_vulns)?;
    Ok(exit_codes::SUCCESS)
}

#[derive(Tabled)]
struct ScanRow {
    #[tabled(rename = "Flavor")]
    flavor: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Report")]
    report: String,
}

fn print_scan_results(results: &FlavorScanResult) {
    let rows: Vec<ScanRow> = results
        .iter()
        .flat_map(|(flavor, scans)| {
            scans.iter().map(move |(target, report)| ScanRow {
                flavor: if flavor.is_empty() {
                    "-".to_string()
                } else {
                    flavor.clone()
                },
                target: target.clone(),
                report: report.display().to_string(),
            })
        })
        .collect();

    if rows.is_empty() {
        println!("Nothing was scanned.");
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'flavorscan config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
