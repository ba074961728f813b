//! `nodeup graph`: print the validated task graph

use anyhow::Result;
use colored::Colorize;
use converge::ExecutionPlan;

use super::Loaded;
use crate::AppContext;
use crate::ui;

pub fn run(app: &AppContext) -> Result<()> {
    let loaded = Loaded::load(app.config.clone())?;
    let plan = &loaded.plan;

    if !app.quiet {
        ui::header("Task graph");
        for (kind, count) in plan.count_by_kind() {
            ui::kv(kind, &count.to_string());
        }
        println!();
    }

    for line in render(plan) {
        println!("{line}");
    }
    Ok(())
}

/// One line per task in execution order, followed by its dependencies
fn render(plan: &ExecutionPlan) -> Vec<String> {
    let mut lines = Vec::with_capacity(plan.len());
    for key in plan.keys() {
        let lifecycle = plan.lifecycle_of(key).unwrap_or_default();
        let source = plan.source_of(key).unwrap_or("-");
        lines.push(format!("{key} {}", format!("[{lifecycle}, {source}]").dimmed()));
        for dep in plan.dependencies_of(key) {
            lines.push(format!("  {} {dep}", "<-".dimmed()));
        }
    }
    lines
}
