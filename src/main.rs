mod data;
mod loader;
mod solver;

use crate::data::{AssignmentInput, RunConfig};
use crate::loader::SheetLayout;
use crate::solver::SolveOutcome;
use log::{error, info, warn};
use std::path::Path;
use std::process::ExitCode;
use thiserror::Error;

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] data::ConfigError),
    #[error(transparent)]
    Load(#[from] loader::LoadError),
    #[error(transparent)]
    Solve(#[from] solver::SolveError),
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("usage: enrollment_solver <config.json>");
        return ExitCode::from(2);
    };

    match run(Path::new(&config_path)) {
        Ok(SolveOutcome::Optimal(output)) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Ok(SolveOutcome::Infeasible) => {
            println!(
                "Infeasible: no assignment satisfies every capacity, hours, slot, and subject constraint."
            );
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}

fn run(config_path: &Path) -> Result<SolveOutcome, RunError> {
    let config = RunConfig::from_file(config_path)?;
    let layout = SheetLayout::new(&config.value_cells, &config.label_cells)?;

    let loaded = loader::load_roster(&config.preferences_dir, &layout)?;
    for failure in &loaded.failures {
        warn!("skipped {}: {}", failure.file.display(), failure.error);
    }
    info!(
        "Loaded preferences for {} students ({} files failed)",
        loaded.roster.len(),
        loaded.failures.len()
    );

    let input = AssignmentInput {
        students: loaded.roster,
        sessions: config.sessions,
        required_hours: config.required_hours,
    };
    Ok(solver::solve(&input)?)
}
