//! Buffer snapshots.
//!
//! The console buffer is read back by making the editor write it to a scratch
//! file and reading that file. Before a scenario the harness records the
//! prompt baseline: how many lines the buffer had and what its last line (the
//! prompt) said. Output of the scenario starts right after that prompt, on the
//! same line, so extraction drops everything before the baseline's last line
//! and then the prompt text itself.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::channel::{self, fnameescape};
use crate::client::RemoteClient;
use crate::log::LogEvent;

const SCRATCH_FILE_NAME: &str = "snapshot.txt";

/// Buffer state recorded before a scenario starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBaseline {
    /// Value of `line('$')`; at least 1 for any Vim buffer.
    pub line_count: usize,
    /// Text of the last buffer line, i.e. the prompt new input is appended to.
    pub prompt: String,
}

/// Lines produced since the baseline was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub lines: Vec<String>,
}

/// Read the current line count and prompt through the channel.
pub fn record_baseline(client: &RemoteClient) -> Result<PromptBaseline> {
    let line_count = channel::parse_line_count(&client.eval("line('$')")?)?;
    let prompt = client.eval("getbufline('%','$')[0]")?;
    debug!(line_count, prompt = %prompt, "prompt baseline recorded");
    Ok(PromptBaseline { line_count, prompt })
}

/// Strip the pre-scenario buffer from a written-out copy of the buffer.
///
/// With `line_count = n` the returned lines are file line `n` (1-based) minus
/// the prompt prefix, followed by every line after it. If line `n` no longer
/// starts with the prompt text exactly, the prompt's character count is
/// skipped instead.
pub fn extract_output(text: &str, baseline: &PromptBaseline) -> Result<Vec<String>> {
    if baseline.line_count == 0 {
        bail!("prompt baseline has a zero line count");
    }

    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < baseline.line_count {
        bail!(
            "snapshot has {} lines but the baseline buffer had {}",
            lines.len(),
            baseline.line_count
        );
    }

    let prompt_line = lines[baseline.line_count - 1];
    let first = match prompt_line.strip_prefix(baseline.prompt.as_str()) {
        Some(rest) => rest.to_string(),
        None => prompt_line
            .chars()
            .skip(baseline.prompt.chars().count())
            .collect(),
    };

    let mut output = Vec::with_capacity(lines.len() - baseline.line_count + 1);
    output.push(first);
    output.extend(lines[baseline.line_count..].iter().map(|l| l.to_string()));
    Ok(output)
}

/// Ex command that writes the whole buffer to `path`, from any mode.
pub fn write_command(path: &Path) -> String {
    format!(
        "<esc>:w! {}<cr>",
        channel::escape_literal(&fnameescape(path))
    )
}

/// Write the buffer out, read it back and cut it down to the scenario output.
pub fn capture(
    client: &RemoteClient,
    baseline: &PromptBaseline,
    settle: Duration,
) -> Result<Snapshot> {
    let scratch = tempfile::Builder::new()
        .prefix("gvimctl-snapshot-")
        .tempdir()
        .context("failed to create snapshot scratch directory")?;
    let path = scratch.path().join(SCRATCH_FILE_NAME);

    client.send(&write_command(&path))?;
    // Back to insert mode so the console keeps accepting typed input.
    client.send("A")?;
    std::thread::sleep(settle);

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("editor did not write snapshot to {}", path.display()))?;
    std::fs::remove_file(&path)
        .with_context(|| format!("failed to remove snapshot {}", path.display()))?;

    let lines = extract_output(&text, baseline)?;
    debug!(lines = lines.len(), "snapshot captured");
    client.record(LogEvent::SnapshotCaptured { lines: lines.len() });
    Ok(Snapshot { lines })
}
