//! Run result rendering for the terminal.

use anyhow::{Context, Result};
use datadeploy_core::report::RunResult;

const HEADERS: [&str; 6] = ["Operation", "Entity", "File", "Status", "Succeeded", "Failed"];

/// Renders one row per job as a fixed-width table. Count columns are right aligned.
pub fn render_table(result: &RunResult) -> String {
    if result.job_results.is_empty() {
        return "No jobs configured.\n".to_string();
    }

    let rows: Vec<[String; 6]> = result
        .job_results
        .iter()
        .map(|job| {
            [
                job.operation.to_string(),
                job.entity_name.clone(),
                job.data_file_name.clone(),
                job.status.to_string(),
                job.succeeded_count.to_string(),
                job.failed_count.to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS.map(String::from), &widths);
    push_row(&mut out, &widths.map(|w| "-".repeat(w)), &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(column, (cell, width))| {
            if column >= 4 {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            }
        })
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

pub fn render_json(result: &RunResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("Failed to serialize run result")
}

/// Prints the run result to stdout in the requested format.
pub fn print_summary(result: &RunResult, json: bool) -> Result<()> {
    if json {
        println!("{}", render_json(result)?);
    } else {
        print!("{}", render_table(result));
    }
    Ok(())
}
