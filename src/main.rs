//! Recon Lane CLI
//!
//! Entry point for the `recon` command-line tool.

use clap::{Parser, Subcommand};
use recon_lane::cleanup::CleanupService;
use recon_lane::manager::check_job_id;
use recon_lane::signal::{SignalHandler, EXIT_CODE_INTERRUPTED};
use recon_lane::state::now_utc;
use recon_lane::store::load_and_reconcile;
use recon_lane::upload::UploadValidator;
use recon_lane::{
    logging, EffectiveConfig, FileJobPersistence, JobManager, JobRecord, JobStatus, LaneConfig,
    PassThroughReconstructor, RpcHandler,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often `run` re-reads the job while following it
const FOLLOW_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "recon")]
#[command(about = "Job lane for long-running image reconstruction", version)]
struct Cli {
    /// Path to config file (default: ./recon.toml when present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve line-delimited JSON requests on stdin/stdout
    Serve,

    /// Reconstruct one image and follow the job to completion
    Run {
        /// Input image
        input: PathBuf,

        /// Job ID (default: random)
        #[arg(long)]
        job_id: Option<String>,

        /// Print only the final record
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// Show the persisted record of a job
    Status {
        /// Job ID
        job_id: String,
    },

    /// Mark jobs interrupted by a previous process as failed
    Reconcile,

    /// Delete old uploads and outputs once
    Cleanup,

    /// Show the effective configuration and where it came from
    Config,
}

fn main() {
    let cli = Cli::parse();

    let effective = match EffectiveConfig::load(cli.config.as_deref()) {
        Ok(effective) => effective,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };
    let config = &effective.config;
    logging::init(&config.logging.level);

    match cli.command {
        Commands::Serve => run_serve(config),
        Commands::Run {
            input,
            job_id,
            quiet,
        } => run_job(config, &input, job_id, quiet, cli.json),
        Commands::Status { job_id } => run_status(config, &job_id, cli.json),
        Commands::Reconcile => run_reconcile(config, cli.json),
        Commands::Cleanup => run_cleanup(config, cli.json),
        Commands::Config => run_config(&effective, cli.json),
    }
}

fn open_manager(config: &LaneConfig) -> Arc<JobManager> {
    if let Err(e) = config.ensure_dirs() {
        eprintln!("Error creating directories: {}", e);
        process::exit(1);
    }

    let reconstructor = PassThroughReconstructor::new(
        config.reconstructor.device.clone(),
        config.jobs.step_delay(),
    );
    match JobManager::from_config(config, Arc::new(reconstructor)) {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            eprintln!("Error opening job state: {}", e);
            process::exit(1);
        }
    }
}

fn install_signal_handler(manager: &Arc<JobManager>) {
    if let Err(e) = SignalHandler::new().install(Arc::clone(manager)) {
        eprintln!("Error installing signal handler: {}", e);
        process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

fn print_record(record: &JobRecord, json: bool) {
    if json {
        print_json(record);
        return;
    }

    println!("Job {}", record.job_id);
    println!("  Status:   {}", record.status);
    println!("  Progress: {}%", record.progress);
    println!("  Message:  {}", record.message);
    println!("  Input:    {}", record.input_path.display());
    println!("  Output:   {}", record.output_path.display());
    if let Some(ref error) = record.error {
        println!("  Error:    {}", error);
    }
    if let Some(elapsed) = record.elapsed_seconds {
        println!("  Elapsed:  {:.2}s", elapsed);
    }
}

fn run_serve(config: &LaneConfig) {
    let manager = open_manager(config);
    install_signal_handler(&manager);

    let mut cleanup = CleanupService::from_config(config);
    if config.cleanup.enabled {
        if let Err(e) = cleanup.start() {
            eprintln!("Error starting cleanup service: {}", e);
            process::exit(1);
        }
    }

    let uploads = UploadValidator::new(&config.upload, config.directories.uploads_path());
    let handler = RpcHandler::new(Arc::clone(&manager), uploads);
    if let Err(e) = handler.run() {
        eprintln!("Error serving requests: {}", e);
        process::exit(1);
    }

    // Input closed: let accepted jobs finish
    while !manager.wait_for_idle(Duration::from_secs(1)) {}
    cleanup.stop();
}

fn run_job(config: &LaneConfig, input: &Path, job_id: Option<String>, quiet: bool, json: bool) {
    // Records stay in memory so a running `serve` keeps its state dir
    let manager = open_manager(&config.without_persistence());
    install_signal_handler(&manager);

    let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    if let Err(e) = check_job_id(&job_id) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
    let uploads = UploadValidator::new(&config.upload, config.directories.uploads_path());
    let stored = match uploads.import(&job_id, input) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = manager.enqueue(&job_id, stored) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let mut last_progress = None;
    let record = loop {
        let Some(record) = manager.get(&job_id) else {
            eprintln!("Error: job {} disappeared", job_id);
            process::exit(1);
        };
        if !quiet && last_progress != Some(record.progress) {
            eprintln!("[{:>3}%] {}", record.progress, record.message);
            last_progress = Some(record.progress);
        }
        if record.is_terminal() {
            break record;
        }
        thread::sleep(FOLLOW_INTERVAL);
    };

    print_record(&record, json);
    match record.status {
        JobStatus::Completed => process::exit(0),
        JobStatus::Cancelled => process::exit(EXIT_CODE_INTERRUPTED),
        _ => process::exit(1),
    }
}

fn run_status(config: &LaneConfig, job_id: &str, json: bool) {
    let persistence = match FileJobPersistence::open(config.directories.state_path()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error opening state directory: {}", e);
            process::exit(1);
        }
    };
    let path = match persistence.record_path(job_id) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    if !path.exists() {
        eprintln!("Job '{}' not found in {}", job_id, persistence.dir().display());
        process::exit(1);
    }

    match JobRecord::from_file(&path) {
        Ok(record) => print_record(&record, json),
        Err(e) => {
            eprintln!("Error reading {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn run_reconcile(config: &LaneConfig, json: bool) {
    let persistence = match FileJobPersistence::open(config.directories.state_path()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error opening state directory: {}", e);
            process::exit(1);
        }
    };

    let report = match load_and_reconcile(&persistence, now_utc()) {
        Ok((_, report)) => report,
        Err(e) => {
            eprintln!("Error reconciling job state: {}", e);
            process::exit(1);
        }
    };

    if json {
        print_json(&report);
        return;
    }
    println!("{}", report.summary());
    for (job_id, was) in &report.reconciled {
        println!("  {} ({} -> failed)", job_id, was);
    }
}

fn run_cleanup(config: &LaneConfig, json: bool) {
    let report = CleanupService::from_config(config).cleanup_now();

    if json {
        print_json(&report);
    } else {
        println!(
            "Scanned {} file(s), deleted {} ({} bytes reclaimed)",
            report.scanned, report.deleted, report.bytes_reclaimed
        );
        for error in &report.errors {
            eprintln!("  error: {}", error);
        }
    }

    if !report.errors.is_empty() {
        process::exit(1);
    }
}

fn run_config(effective: &EffectiveConfig, json: bool) {
    if json {
        match effective.to_json() {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing config: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let config = &effective.config;
    println!("Sources (later wins):");
    for source in &effective.sources {
        println!("  {}", source.describe());
    }
    println!("Uploads:     {}", config.directories.uploads_path().display());
    println!("Outputs:     {}", config.directories.outputs_path().display());
    println!("State:       {}", config.directories.state_path().display());
    println!(
        "Upload:      max {} MB, {}",
        config.upload.max_size_mb,
        config.upload.allowed_extensions.join(" ")
    );
    match config.jobs.max_concurrent_jobs {
        0 => println!("Concurrency: unbounded"),
        n => println!("Concurrency: {}", n),
    }
    println!("Device:      {}", config.reconstructor.device);
    println!(
        "Cleanup:     {} (every {}h, max age {}h)",
        if config.cleanup.enabled { "on" } else { "off" },
        config.cleanup.interval_hours,
        config.cleanup.max_age_hours
    );
    println!("Log level:   {}", config.logging.level);
}
