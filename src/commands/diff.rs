//! `nodeup diff`: dry run that lists what would change

use anyhow::Result;
use converge::{ApplyResult, ExecuteOptions, NoProgress, TaskOutcome, execute};

use super::{Loaded, cancel_on_interrupt};
use crate::AppContext;
use crate::cli::DiffArgs;
use crate::ui;

pub fn run(app: &AppContext, args: DiffArgs) -> Result<()> {
    let loaded = Loaded::load(app.config.clone())?;
    let ctx = loaded.context();
    let opts = ExecuteOptions {
        dry_run: true,
        jobs: loaded.jobs(args.jobs),
    };
    let report = execute(&loaded.plan, &ctx, &opts, &cancel_on_interrupt(), &mut NoProgress)?;

    let mut changed = 0;
    for task in report.tasks() {
        let interesting = match &task.outcome {
            TaskOutcome::Converged(ApplyResult::NoChange | ApplyResult::Ignored) => app.verbose > 0,
            _ => true,
        };
        if matches!(
            task.outcome,
            TaskOutcome::Converged(ApplyResult::Planned { .. } | ApplyResult::Warned { .. })
        ) {
            changed += 1;
        }
        if interesting {
            println!("{}", ui::outcome_line(&task.key, &task.outcome));
        }
    }

    if !app.quiet {
        println!();
        if changed == 0 && report.is_success() {
            ui::success("Node is up to date");
        } else {
            ui::dim(&format!("{changed} task(s) would change"));
        }
    }

    report.ensure_success()?;
    Ok(())
}
