//! Operator-facing console output.

use crate::bug_log::AnomalyEvent;
use crate::config::HarnessConfig;
use crate::coordinator::{RunSummary, Verdict};
use crate::operation::Operation;
use colored::*;
use std::path::Path;

const RULE: &str = "════════════════════════════════════════════════════════════════";

pub fn print_banner(target: &str, config: &HarnessConfig) {
    println!();
    println!("{}", RULE.bright_white());
    println!("{}", "  SCSI sg Race Condition Reproducer".bright_blue().bold());
    match config.target_opcode.as_deref() {
        Some(opcode) => println!("  Target: {} (op=0x{}) bogus elapsed time", opcode_label(opcode), opcode),
        None => println!("  Target: any bogus elapsed time"),
    }
    println!("{}", RULE.bright_white());
    println!();
    println!("Device:    {}", target.bright_cyan());
    println!("Workers:   {}", config.workers);
    println!("Threshold: {} ms", config.anomaly_threshold_ms);
    println!("Log file:  {}", config.bug_log_path.display().to_string().bright_cyan());
    println!();
}

pub fn print_anomaly(event: &AnomalyEvent, config: &HarnessConfig, log_path: &Path) {
    let opcode_note = if config.is_target_opcode(&event.opcode) {
        format!(" ← {} ★★★ target opcode", opcode_label(&event.opcode)).bright_red().bold()
    } else if Operation::from_opcode_hex(&event.opcode).is_some() {
        format!(" ← {}", opcode_label(&event.opcode)).normal()
    } else {
        "".normal()
    };

    println!();
    println!("{}", RULE.red());
    println!("{}", "BOGUS ELAPSED TIME DETECTED!".bright_red().bold());
    println!("{}", RULE.red());
    println!("Iteration:     {}", event.iteration);
    println!("Elapsed time:  {} ms", event.elapsed_ms.to_string().bright_yellow());
    println!("Opcode:        0x{}{}", event.opcode, opcode_note);
    println!("Debug line:    {}", event.line.trim());
    println!("Logged to:     {}", log_path.display());
    println!("{}", RULE.red());
}

pub fn progress_line(iteration: u64, max_iterations: u64, anomalies: u64) -> String {
    format!(
        "[Progress: {}/{} iterations, {} anomalies found]",
        iteration, max_iterations, anomalies
    )
}

pub fn print_progress(iteration: u64, max_iterations: u64, anomalies: u64) {
    let line = progress_line(iteration, max_iterations, anomalies);
    if anomalies > 0 {
        println!("{}", line.yellow());
    } else {
        println!("{}", line);
    }
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", RULE.bright_white());
    println!("{}", "  Test Complete!".bright_blue().bold());
    println!("{}", RULE.bright_white());
    println!("Iterations observed: {}/{}", summary.iterations, summary.max_iterations);
    println!(
        "Commands issued:     {} ({} failed)",
        summary.load.commands_issued, summary.load.command_failures
    );
    println!("Total anomalies found: {}", summary.anomalies);

    match summary.verdict {
        Verdict::Reproduced => {
            println!();
            println!("{} {}", "✓".green(), "BUG SUCCESSFULLY REPRODUCED!".bright_green().bold());
            println!("  Found {} instances of bogus elapsed time values", summary.anomalies);
            if let Some(first) = &summary.first_anomaly {
                println!(
                    "  First: iteration {}, {} ms, op=0x{}",
                    first.iteration, first.elapsed_ms, first.opcode
                );
            }
            println!();
            println!("  Complete debug logs saved to: {}", summary.bug_log_path.display());
        }
        Verdict::NotObserved => {
            println!();
            println!("{} {}", "✗".red(), "No anomalies detected in this run".bright_red());
            println!("  Try running again (race conditions are timing-dependent)");
        }
    }
    println!("{}", RULE.bright_white());
}

fn opcode_label(opcode: &str) -> &'static str {
    Operation::from_opcode_hex(opcode).map_or("unknown command", Operation::label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line_format() {
        assert_eq!(progress_line(100, 1000, 0), "[Progress: 100/1000 iterations, 0 anomalies found]");
        assert_eq!(progress_line(300, 1000, 2), "[Progress: 300/1000 iterations, 2 anomalies found]");
    }

    #[test]
    fn test_opcode_labels() {
        assert_eq!(opcode_label("0a"), "WRITE(6)");
        assert_eq!(opcode_label("08"), "READ(6)");
        assert_eq!(opcode_label("00"), "TEST UNIT READY");
        assert_eq!(opcode_label(""), "unknown command");
    }
}
