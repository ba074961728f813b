//! `nodeup apply`: converge the node

use anyhow::Result;
use converge::{ExecuteOptions, NoProgress, RunReport, execute};

use super::{Loaded, cancel_on_interrupt};
use crate::AppContext;
use crate::cli::ApplyArgs;
use crate::progress::BarProgress;
use crate::ui;

pub fn run(app: &AppContext, args: ApplyArgs) -> Result<()> {
    let loaded = Loaded::load(app.config.clone())?;
    let ctx = loaded.context();
    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        jobs: loaded.jobs(args.jobs),
    };
    let cancel = cancel_on_interrupt();

    if !args.json && !app.quiet {
        ui::header(if args.dry_run { "Apply (dry run)" } else { "Apply" });
        ui::kv("Cluster", &loaded.config.cluster.name);
        ui::kv("Tasks", &loaded.plan.len().to_string());
        ui::kv("Jobs", &opts.jobs.to_string());
        println!();
    }

    let report = if args.json || app.quiet {
        execute(&loaded.plan, &ctx, &opts, &cancel, &mut NoProgress)?
    } else {
        execute(&loaded.plan, &ctx, &opts, &cancel, &mut BarProgress::new(app.verbose > 0))?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !app.quiet {
        print_summary(&report);
    }

    report.ensure_success()?;
    Ok(())
}

pub(crate) fn print_summary(report: &RunReport) {
    let summary = report.summary();

    let causes: Vec<_> = report.root_causes().collect();
    if !causes.is_empty() {
        ui::section("Failures");
        for (key, err) in causes {
            ui::error(&format!("{key}: {err:#}"));
            let blocked = report.skipped().filter(|(_, cause)| *cause == key).count();
            if blocked > 0 {
                ui::dim(&format!("{blocked} dependent task(s) skipped"));
            }
        }
    }

    let cancelled = report.cancelled().count();
    if cancelled > 0 {
        ui::warn(&format!("Cancelled before {cancelled} task(s) started"));
    }

    println!();
    let elapsed = report.elapsed().as_secs_f64();
    if report.is_success() {
        if report.is_dry_run() {
            ui::success(&format!(
                "{} change(s) planned, {} unchanged ({elapsed:.1}s)",
                summary.planned, summary.no_change
            ));
        } else {
            ui::success(&format!(
                "{} created, {} updated, {} unchanged ({elapsed:.1}s)",
                summary.created, summary.updated, summary.no_change
            ));
        }
        if summary.warned > 0 {
            ui::warn(&format!("{} task(s) differ but were left alone", summary.warned));
        }
    } else {
        ui::error(&format!(
            "{} failed, {} skipped, {} cancelled of {} task(s) ({elapsed:.1}s)",
            summary.failed,
            summary.skipped,
            summary.cancelled,
            summary.total()
        ));
    }
}
