use std::path::PathBuf;

#[derive(clap::Parser)]
pub(crate) struct Cli {
    #[arg(
        long = "stderr-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Maximum stderr log level (warn by default)"
    )]
    pub(crate) stderr_log_level: Option<LogLevel>,
    #[arg(
        long = "log-file",
        value_name = "PATH",
        help = "File to write logs (besides stderr)"
    )]
    pub(crate) log_file: Option<PathBuf>,
    #[arg(
        long = "file-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Maximum file log level (debug by default)"
    )]
    pub(crate) file_log_level: Option<LogLevel>,
    #[arg(long = "no-progress", help = "Do not print progress")]
    pub(crate) no_progress: bool,
    #[arg(
        long = "conv-params",
        short = 'P',
        value_name = "FILE",
        help = "Conversion parameters"
    )]
    pub(crate) conv_params: PathBuf,
    #[arg(
        long = "project",
        short = 'p',
        value_name = "NAME",
        help = "Project to replay (may repeat; all configured projects by default)"
    )]
    pub(crate) projects: Vec<String>,
    #[arg(
        long = "db-dir",
        value_name = "PATH",
        help = "Directory for per-project revision databases (overrides the parameters file)"
    )]
    pub(crate) db_dir: Option<PathBuf>,
    #[arg(
        long = "workspace",
        value_name = "PATH",
        help = "Directory for project sandboxes (overrides the parameters file)"
    )]
    pub(crate) workspace: Option<PathBuf>,
    #[arg(
        long = "checkpoint",
        help = "Snapshot each project's sandbox after every finished line"
    )]
    pub(crate) checkpoint: bool,
    #[arg(
        long = "from-checkpoint",
        help = "Restore the latest checkpoint before replaying"
    )]
    pub(crate) from_checkpoint: bool,
    #[arg(
        long = "dry-run",
        help = "Report what would be replayed without committing anything"
    )]
    pub(crate) dry_run: bool,
    #[arg(
        long = "trim-below",
        value_name = "REV",
        help = "Delete stored entries below REV before replaying"
    )]
    pub(crate) trim_below: Option<u32>,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl LogLevel {
    pub(crate) fn to_log_level_filter(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}
