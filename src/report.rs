//! Human and JSON renderings for `gvimctl run` and `gvimctl config`.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::HarnessConfig;
use crate::verify::ScenarioReport;

/// Mismatches shown per scenario in the human rendering.
const MAX_MISMATCHES_SHOWN: usize = 5;

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<20} {value}\n"));
}

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .gvimctl/config.toml found)".to_string())
}

fn optional_path(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(auto)".to_string())
}

pub fn render_config_human(config: &HarnessConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Editor\n");
    push_kv(&mut output, "gvim", optional_path(config.editor.gvim.as_deref()));
    push_kv(&mut output, "vim", optional_path(config.editor.vim.as_deref()));
    if config.editor.startup_flags.is_empty() {
        push_kv(&mut output, "startup_flags", "(none)");
    } else {
        push_kv(&mut output, "startup_flags", config.editor.startup_flags.join(", "));
    }
    output.push('\n');

    output.push_str("Console\n");
    push_kv(&mut output, "script", config.console.script.display());
    push_kv(&mut output, "entry", &config.console.entry);
    push_kv(
        &mut output,
        "bootstrap_settle",
        format!("{}ms", config.console.bootstrap_settle_millis),
    );
    output.push('\n');

    output.push_str("Timing\n");
    push_kv(
        &mut output,
        "launch_settle",
        format!("{}ms", config.timing.launch_settle_millis),
    );
    push_kv(
        &mut output,
        "focus_settle",
        format!("{}ms", config.timing.focus_settle_millis),
    );
    push_kv(
        &mut output,
        "keystroke_settle",
        format!("{}ms", config.timing.keystroke_settle_millis),
    );
    push_kv(
        &mut output,
        "snapshot_settle",
        format!("{}ms", config.timing.snapshot_settle_millis),
    );
    push_kv(
        &mut output,
        "channel_timeout",
        format!("{}s", config.timing.channel_timeout_secs),
    );
    output.push('\n');

    output.push_str("Polling\n");
    push_kv(
        &mut output,
        "interval",
        format!("{}ms", config.polling.interval_millis),
    );
    push_kv(&mut output, "max_attempts", config.polling.max_attempts);
    push_kv(&mut output, "fail_on_timeout", config.polling.fail_on_timeout);
    output.push('\n');

    output.push_str("Bulk\n");
    push_kv(&mut output, "line_count", config.bulk.line_count);
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

pub fn render_config_json(config: &HarnessConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    payload["source_path"] = serde_json::Value::String(config_source_label(config_path));
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

pub fn render_reports_human(server: &str, reports: &[ScenarioReport]) -> String {
    let mut output = String::new();
    output.push_str(&format!("Session {server}\n"));

    for report in reports {
        let status = if report.passed { "PASS" } else { "FAIL" };
        output.push_str(&format!("\n{status} {}\n", report.scenario));

        if let Some(convergence) = &report.convergence {
            let state = if convergence.converged {
                "converged"
            } else {
                "timed out"
            };
            push_kv(
                &mut output,
                "convergence",
                format!("{state} after {} polls", convergence.attempts),
            );
            if let Some(count) = convergence.line_count {
                push_kv(&mut output, "line_count", count);
            }
        }
        if let Some(failure) = &report.failure {
            push_kv(&mut output, "failure", failure);
        }
        for mismatch in report.mismatches.iter().take(MAX_MISMATCHES_SHOWN) {
            let actual = mismatch
                .actual
                .as_deref()
                .map(|a| format!("{a:?}"))
                .unwrap_or_else(|| "(missing)".to_string());
            output.push_str(&format!(
                "  - line {}: expected {:?}, got {actual}\n",
                mismatch.line, mismatch.expected
            ));
        }
        if report.mismatches.len() > MAX_MISMATCHES_SHOWN {
            output.push_str(&format!(
                "  ... {} more\n",
                report.mismatches.len() - MAX_MISMATCHES_SHOWN
            ));
        }
    }

    let passed = reports.iter().filter(|r| r.passed).count();
    output.push_str(&format!("\n{passed}/{} scenarios passed\n", reports.len()));
    output
}

pub fn render_reports_json(server: &str, reports: &[ScenarioReport]) -> Result<String> {
    let payload = serde_json::json!({
        "server_name": server,
        "passed": reports.iter().all(|r| r.passed),
        "scenarios": reports,
    });
    serde_json::to_string_pretty(&payload).context("failed to serialize reports to JSON")
}
