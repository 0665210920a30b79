#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]
#![allow(clippy::enum_variant_names, clippy::type_complexity)]

use std::process::ExitCode;

mod authors;
mod catalog;
mod checkpoint;
mod cli;
mod deps;
mod errors;
mod git;
mod model;
mod params_file;
mod progress;
mod provenance;
mod registry;
mod replay;
mod store;
mod svn;

pub(crate) type FHashMap<K, V> = std::collections::HashMap<K, V, foldhash::fast::RandomState>;

enum RunError {
    Generic,
    Usage,
}

fn main() -> ExitCode {
    match main_inner() {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Generic) => ExitCode::from(1),
        Err(RunError::Usage) => ExitCode::from(2),
    }
}

fn main_inner() -> Result<(), RunError> {
    let start = std::time::Instant::now();

    let args = match <cli::Cli as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return Err(RunError::Usage);
        }
    };

    let stderr_log_level = args
        .stderr_log_level
        .unwrap_or(cli::LogLevel::Warn)
        .to_log_level_filter();
    let file_log_level = args.file_log_level.map(cli::LogLevel::to_log_level_filter);

    if let Err(e) = init_logger(
        Some(stderr_log_level),
        args.log_file.as_deref(),
        file_log_level,
    ) {
        eprintln!("failed to initialize logging: {e}");
        return Err(RunError::Generic);
    }

    let params_raw = match std::fs::read_to_string(&args.conv_params) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to read {:?}: {e}", args.conv_params);
            return Err(RunError::Generic);
        }
    };
    let params: params_file::ConvParams = match toml::from_str(&params_raw) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to parse {:?}: {e}", args.conv_params);
            return Err(RunError::Generic);
        }
    };

    if params.projects.is_empty() {
        tracing::error!("no projects configured in {:?}", args.conv_params);
        return Err(RunError::Usage);
    }

    let selected: Vec<&params_file::ProjectParams> = if args.projects.is_empty() {
        params.projects.iter().collect()
    } else {
        let mut selected = Vec::new();
        for name in &args.projects {
            match params.projects.iter().find(|p| &p.name == name) {
                Some(proj) => selected.push(proj),
                None => {
                    tracing::error!("project \"{name}\" is not in {:?}", args.conv_params);
                    return Err(RunError::Usage);
                }
            }
        }
        selected
    };

    let authors = match &params.authors_file {
        None => authors::AuthorMap::with_fallback(),
        Some(path) => {
            let path = if path.is_relative() {
                let parent = args.conv_params.parent().ok_or_else(|| {
                    tracing::error!("invalid parameters file path: {:?}", args.conv_params);
                    RunError::Generic
                })?;
                parent.join(path)
            } else {
                path.to_path_buf()
            };
            authors::AuthorMap::load(&path).map_err(|e| {
                tracing::error!("{e}");
                RunError::Generic
            })?
        }
    };

    let db_dir = args.db_dir.clone().unwrap_or_else(|| params.db_dir.clone());
    let workspace = args
        .workspace
        .clone()
        .unwrap_or_else(|| params.workspace_dir.clone());
    if let Err(e) = std::fs::create_dir_all(&db_dir) {
        tracing::error!("failed to create {db_dir:?}: {e}");
        return Err(RunError::Generic);
    }

    let svn = svn::cmd::CmdSvn::new();
    let git = git::cmd::CmdGit::new();
    let progress = progress::Progress::new(!args.no_progress);

    let mut registry = registry::ProjectRegistry::new(db_dir);
    for proj in &params.projects {
        let info = errors::with_retry(&format!("info {}", proj.url), || {
            svn::SvnSource::info(&svn, &proj.url)
        })
        .map_err(|e| {
            tracing::error!("cannot resolve project \"{}\": {e}", proj.name);
            RunError::Generic
        })?;

        registry
            .register(model::ProjectMetadata {
                name: proj.name.clone(),
                root_url: info.root_url,
                base_path: info.rel_path,
                trunk_name: proj.trunk_name.clone(),
                branches_name: proj.branches_name.clone(),
                tags_name: proj.tags_name.clone(),
            })
            .map_err(|e| {
                tracing::error!("{e}");
                RunError::Generic
            })?;
    }

    if let Some(floor) = args.trim_below {
        for proj in &selected {
            let removed = registry
                .store(&proj.name)
                .and_then(|store| store.trim(floor))
                .map_err(|e| {
                    tracing::error!("{e}");
                    RunError::Generic
                })?;
            tracing::info!("{}: trimmed {removed} entries below r{floor}", proj.name);
        }
    }

    let checkpoints = if args.checkpoint || args.from_checkpoint {
        let dir = params
            .checkpoint_dir
            .clone()
            .unwrap_or_else(|| workspace.join("checkpoints"));
        Some(checkpoint::CheckpointManager::new(dir))
    } else {
        None
    };

    let opts = replay::ReplayOptions {
        workspace,
        main_branch: params.main_branch.clone(),
        dry_run: args.dry_run,
        checkpoint: args.checkpoint,
        from_checkpoint: args.from_checkpoint,
    };
    let mut tuning = FHashMap::<String, replay::ProjectTuning>::default();
    for proj in &params.projects {
        tuning.insert(
            proj.name.clone(),
            replay::ProjectTuning {
                remote_url: proj.remote_url.clone(),
                ignored_revisions: proj.ignore_revisions.clone(),
                ignored_line_parts: proj.ignore_branches.clone(),
            },
        );
    }

    let mut engine = replay::ReplayEngine::new(
        &svn,
        &git,
        &mut registry,
        &authors,
        checkpoints.as_ref(),
        &progress,
        &opts,
        &tuning,
    );

    let mut failed = false;
    for proj in &selected {
        // the engine already logged the failure; carry on with the
        // remaining projects and report it in the exit code
        let summary = match engine.replay_project(&proj.name) {
            Ok(summary) => summary,
            Err(_) => {
                failed = true;
                continue;
            }
        };

        println!(
            "{}: {} commits replayed, {} resumed, {} empty, {} skipped over {} lines{}",
            proj.name,
            summary.replayed,
            summary.resumed,
            summary.mapped_empty,
            summary.skipped.len(),
            summary.lines,
            if args.dry_run { " (dry run)" } else { "" },
        );
        if !summary.skipped.is_empty() {
            println!(
                "{}: skipped revisions: {}",
                proj.name,
                summary
                    .skipped
                    .iter()
                    .map(|r| format!("r{r}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
    }

    tracing::info!("finished in {:.1?}", start.elapsed());
    if failed {
        return Err(RunError::Generic);
    }
    Ok(())
}

fn init_logger(
    stderr_level: Option<tracing::Level>,
    file_path: Option<&std::path::Path>,
    file_level: Option<tracing::Level>,
) -> Result<(), std::io::Error> {
    use tracing_subscriber::layer::{Layer as _, SubscriberExt as _};
    use tracing_subscriber::util::SubscriberInitExt as _;

    let stderr_sub = if let Some(stderr_level) = stderr_level {
        let filter = tracing_subscriber::filter::LevelFilter::from_level(stderr_level);
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
    } else {
        None
    };

    let file_sub = if let Some(file_path) = file_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        let filter = tracing_subscriber::filter::LevelFilter::from_level(
            file_level.unwrap_or(tracing::Level::DEBUG),
        );
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(filter),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_sub)
        .with(file_sub)
        .init();

    Ok(())
}
