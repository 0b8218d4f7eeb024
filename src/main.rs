use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deck_shrink::config::job::JobFile;
use deck_shrink::config::merged::MergedConfig;
use deck_shrink::config::{self};
use deck_shrink::library::delete_converted;
use deck_shrink::pipeline::job_runner::{ConverterConfig, JobOutcome};
use deck_shrink::pipeline::orchestrator::{Collaborators, JobSpec, run_all_jobs};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: deck_shrink [--json] <jobs.yaml>...");
        eprintln!("  Export, shrink and merge presentation PDFs according to job files.");
        eprintln!("  --json  print one JSON outcome per job on stdout");
        return if args.is_empty() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        eprintln!("deck_shrink {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let json = args.iter().any(|a| a == "--json");
    let job_files: Vec<&String> = args.iter().filter(|a| *a != "--json").collect();
    if job_files.is_empty() {
        eprintln!("ERROR: No job file given");
        return ExitCode::FAILURE;
    }

    let mut has_error = false;
    for job_file_arg in job_files {
        let job_file_path = Path::new(job_file_arg);

        // Load settings from the same directory as the job file.
        let settings = match config::load_settings_for_job(job_file_path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("ERROR: Failed to load settings for {job_file_arg}: {e}");
                return ExitCode::FAILURE;
            }
        };

        let job_file = match JobFile::from_file(job_file_path) {
            Ok(jf) => jf,
            Err(e) => {
                eprintln!("ERROR: Failed to read job file {job_file_arg}: {e}");
                return ExitCode::FAILURE;
            }
        };
        if job_file.is_empty() {
            eprintln!("ERROR: Job file {job_file_arg} contains no jobs");
            has_error = true;
            continue;
        }

        // Resolve job file directory for relative paths.
        let job_dir = job_file_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut specs: Vec<JobSpec> = Vec::new();
        for job in &job_file.conversions {
            let merged = match MergedConfig::new(&settings, job) {
                Ok(merged) => merged,
                Err(e) => {
                    eprintln!("ERROR: Invalid options for {}: {e}", job.source);
                    has_error = true;
                    continue;
                }
            };
            specs.push(JobSpec::Convert {
                source: resolve_path(&job_dir, &job.source),
                config: ConverterConfig::from(&merged),
            });
        }
        for job in &job_file.merges {
            specs.push(JobSpec::Merge {
                convert_dir: settings.convert_dir.clone(),
                files: job.files.clone(),
            });
        }

        let collaborators = Collaborators::system(
            Duration::from_secs(settings.export_timeout_secs),
            Duration::from_secs(settings.pdfa_timeout_secs),
        );
        for outcome in run_all_jobs(&specs, &collaborators) {
            has_error |= !outcome.success;
            report(&outcome, json);
        }

        // Deletions run after every conversion and merge of this file.
        if !job_file.deletes.is_empty() {
            match delete_converted(&settings.convert_dir, &job_file.deletes) {
                Ok(deleted) => {
                    if json {
                        print_json(&deleted);
                    }
                    for name in &deleted.deleted {
                        eprintln!("OK: deleted {name}");
                    }
                    for name in &deleted.missing {
                        eprintln!("WARNING: not found, nothing deleted: {name}");
                    }
                    for name in &deleted.rejected {
                        eprintln!("ERROR: not a converted document: {name}");
                        has_error = true;
                    }
                }
                Err(e) => {
                    eprintln!("ERROR: Failed to delete files: {e}");
                    has_error = true;
                }
            }
        }
    }

    if has_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn report(outcome: &JobOutcome, json: bool) {
    if json {
        print_json(outcome);
    }
    if outcome.success {
        eprintln!("OK: {}", outcome.message);
    } else {
        eprintln!("ERROR: {}", outcome.message);
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => eprintln!("ERROR: Failed to serialize outcome: {e}"),
    }
}

/// Resolve a potentially relative path against a base directory.
/// If the path is already absolute, return it as-is.
fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}
