use clap::{Args, Parser, Subcommand};
use seqvault_core::Limits;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "seqvaultd run-folder archiver", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone)]
pub struct LimitArgs {
    /// Byte budget per container
    #[arg(long, default_value_t = 10 * 1024 * 1024 * 1024)]
    pub max_bytes: u64,

    /// File budget per container
    #[arg(long, default_value_t = 10_000)]
    pub max_files: u64,

    /// Seconds without a successful publish before a session ends
    #[arg(long, default_value_t = 3600)]
    pub session_timeout: u64,

    /// Seconds a filling container may sit idle before it is closed
    #[arg(long, default_value_t = 300)]
    pub archive_timeout: u64,

    /// Seconds between discovery scans inside a session
    #[arg(long, default_value_t = 15)]
    pub poll_interval: u64,

    /// Remove source files once archived (destructive move)
    #[arg(long)]
    pub remove_after_add: bool,
}

impl LimitArgs {
    pub fn to_limits(&self) -> Limits {
        Limits {
            max_bytes: self.max_bytes,
            max_files: self.max_files,
            session_timeout: Duration::from_secs(self.session_timeout),
            archive_timeout: Duration::from_secs(self.archive_timeout),
            poll_interval: Duration::from_secs(self.poll_interval),
            remove_after_add: self.remove_after_add,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch a staging tree and archive run folders as they appear
    Watch {
        staging: PathBuf,

        /// Directory receiving per-run containers and manifests
        #[arg(long)]
        dest: PathBuf,

        /// Content-store landing root (omit to skip upload)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Maximum concurrent run sessions
        #[arg(long, default_value_t = 4)]
        max_workers: usize,

        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Archive one run folder and exit once it goes idle
    Publish {
        run_dir: PathBuf,

        /// Directory receiving this run's containers and manifest
        #[arg(long)]
        dest: PathBuf,

        /// Content-store landing root (omit to skip upload)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Run name; parsed from instrument output when omitted
        #[arg(long)]
        run_id: Option<String>,

        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Print a persisted manifest
    Manifest { path: PathBuf },
}
