//! Console scenarios and their validation.
//!
//! Each scenario records a prompt baseline, types into the console, waits
//! until the buffer should be final, snapshots it and checks the snapshot.
//! The echo scenarios wait a fixed settle delay; the bulk scenario polls the
//! buffer line count until it stops changing.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::channel;
use crate::config::HarnessConfig;
use crate::log::LogEvent;
use crate::poll::{self, PollOutcome, PollSettings};
use crate::session::Session;
use crate::snapshot::{self, PromptBaseline};

pub const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";

/// Leading index of a bulk payload line: `<i> abcdefghijklmnopqrstuvwxyz`.
static INDEXED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\S+)").expect("valid indexed-line regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// `echo <server name>` echoes the server name back.
    EchoServerName,
    /// `echo abc...xyz` echoes the alphabet back.
    EchoAlphabet,
    /// `type <file>` of a large file lands line by line, in order.
    BulkType,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [
        Scenario::EchoServerName,
        Scenario::EchoAlphabet,
        Scenario::BulkType,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::EchoServerName => "echo-server-name",
            Scenario::EchoAlphabet => "echo-alphabet",
            Scenario::BulkType => "bulk-type",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One line that did not match what the scenario expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Index into the snapshot lines.
    pub line: usize,
    pub expected: String,
    /// `None` when the snapshot ended before this line.
    pub actual: Option<String>,
}

/// Convergence summary for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Convergence {
    pub converged: bool,
    pub attempts: u32,
    pub line_count: Option<usize>,
}

impl From<&PollOutcome<usize>> for Convergence {
    fn from(outcome: &PollOutcome<usize>) -> Self {
        let line_count = match outcome {
            PollOutcome::Converged { value, .. } => Some(*value),
            PollOutcome::TimedOut { last, .. } => *last,
        };
        Convergence {
            converged: outcome.converged(),
            attempts: outcome.attempts(),
            line_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence: Option<Convergence>,
    pub mismatches: Vec<Mismatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ScenarioReport {
    fn from_checks(
        scenario: Scenario,
        convergence: Option<Convergence>,
        mismatches: Vec<Mismatch>,
        fail_on_timeout: bool,
    ) -> Self {
        let timed_out = convergence.as_ref().is_some_and(|c| !c.converged);
        let failure = if timed_out && fail_on_timeout {
            Some("did not converge".to_string())
        } else if !mismatches.is_empty() {
            Some(format!("{} line(s) did not match", mismatches.len()))
        } else {
            None
        };

        Self {
            scenario: scenario.name().to_string(),
            passed: failure.is_none(),
            convergence,
            mismatches,
            failure,
        }
    }
}

/// Compare the leading snapshot lines against `expected`.
pub fn check_leading_lines(lines: &[String], expected: &[String]) -> Vec<Mismatch> {
    expected
        .iter()
        .enumerate()
        .filter_map(|(i, want)| {
            let got = lines.get(i);
            (got != Some(want)).then(|| Mismatch {
                line: i,
                expected: want.clone(),
                actual: got.cloned(),
            })
        })
        .collect()
}

/// Payload written for the bulk scenario, one `<i> <alphabet>` line per index.
pub fn bulk_payload(line_count: usize) -> String {
    let mut payload = String::with_capacity(line_count * (ALPHABET.len() + 6));
    for i in 0..line_count {
        payload.push_str(&format!("{i} {ALPHABET}\n"));
    }
    payload
}

/// Console command that types out the payload at `path`.
///
/// The path goes to the console as-is; only key notation is escaped.
pub fn bulk_command(path: &Path) -> String {
    format!(
        "{}<cr>",
        channel::escape_literal(&format!("type {}", path.display()))
    )
}

/// Check that snapshot line `i` starts with index `i - 1` for `i` in `1..=n`.
///
/// Line 0 is the `type <file>` command echo and is not checked.
pub fn check_bulk_numbering(lines: &[String], line_count: usize) -> Vec<Mismatch> {
    (1..=line_count)
        .filter_map(|i| {
            let expected = (i - 1).to_string();
            let actual = lines.get(i);
            let token = actual
                .and_then(|l| INDEXED_LINE.captures(l))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str());
            (token != Some(expected.as_str())).then(|| Mismatch {
                line: i,
                expected,
                actual: actual.cloned(),
            })
        })
        .collect()
}

/// Knobs a scenario run needs besides the session.
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub keystroke_settle: std::time::Duration,
    pub snapshot_settle: std::time::Duration,
    pub poll: PollSettings,
    pub fail_on_timeout: bool,
    pub bulk_line_count: usize,
}

impl From<&HarnessConfig> for ScenarioSettings {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            keystroke_settle: config.timing.keystroke_settle(),
            snapshot_settle: config.timing.snapshot_settle(),
            poll: PollSettings::from(&config.polling),
            fail_on_timeout: config.polling.fail_on_timeout,
            bulk_line_count: config.bulk.line_count,
        }
    }
}

/// Run one scenario against the live session.
///
/// Channel and injection failures are errors; wrong content or a line count
/// that never settles is a failed report.
pub fn run_scenario(
    session: &Session,
    scenario: Scenario,
    settings: &ScenarioSettings,
) -> Result<ScenarioReport> {
    info!(scenario = %scenario, "scenario started");
    let client = session.client();
    let baseline = snapshot::record_baseline(client)?;

    let report = match scenario {
        Scenario::EchoServerName => {
            let name = session.identity().to_string();
            run_echo(session, &baseline, &name, settings, scenario)?
        }
        Scenario::EchoAlphabet => run_echo(session, &baseline, ALPHABET, settings, scenario)?,
        Scenario::BulkType => run_bulk(session, &baseline, settings)?,
    };

    if report.passed {
        info!(scenario = %scenario, "scenario passed");
        client.record(LogEvent::ScenarioPassed {
            scenario: report.scenario.clone(),
        });
    } else {
        let reason = report.failure.clone().unwrap_or_default();
        warn!(scenario = %scenario, reason = %reason, mismatches = report.mismatches.len(), "scenario failed");
        client.record(LogEvent::ScenarioFailed {
            scenario: report.scenario.clone(),
            reason,
        });
    }
    Ok(report)
}

fn run_echo(
    session: &Session,
    baseline: &PromptBaseline,
    text: &str,
    settings: &ScenarioSettings,
    scenario: Scenario,
) -> Result<ScenarioReport> {
    let client = session.client();
    let command = format!("echo {text}");
    client.inject_keys(&format!("{}<cr>", channel::escape_literal(&command)))?;
    std::thread::sleep(settings.keystroke_settle);

    let snapshot = snapshot::capture(client, baseline, settings.snapshot_settle)?;
    let expected = vec![command, text.to_string()];
    let mismatches = check_leading_lines(&snapshot.lines, &expected);
    Ok(ScenarioReport::from_checks(
        scenario,
        None,
        mismatches,
        settings.fail_on_timeout,
    ))
}

fn run_bulk(
    session: &Session,
    baseline: &PromptBaseline,
    settings: &ScenarioSettings,
) -> Result<ScenarioReport> {
    let client = session.client();

    let mut payload = tempfile::Builder::new()
        .prefix("gvimctl-bulk-")
        .suffix(".tmp")
        .tempfile()
        .context("failed to create bulk payload file")?;
    payload
        .write_all(bulk_payload(settings.bulk_line_count).as_bytes())
        .context("failed to write bulk payload")?;
    payload.flush().context("failed to flush bulk payload")?;

    client.inject_keys(&bulk_command(payload.path()))?;

    let outcome = poll::poll_until_stable(settings.poll, |attempt| {
        let count = channel::parse_line_count(&client.eval("line('$')")?)?;
        client.record_poll_sample(attempt, count);
        Ok(count)
    })?;
    payload
        .close()
        .context("failed to remove bulk payload file")?;

    let convergence = Convergence::from(&outcome);
    let snapshot = snapshot::capture(client, baseline, settings.snapshot_settle)?;
    let mismatches = check_bulk_numbering(&snapshot.lines, settings.bulk_line_count);
    Ok(ScenarioReport::from_checks(
        Scenario::BulkType,
        Some(convergence),
        mismatches,
        settings.fail_on_timeout,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::Fixture;
    use crate::keys::testing::InjectorCall;
    use crate::keys::{Key, parse_key_sequence};
    use crate::log::RunLog;
    use std::time::Duration;

    fn launched_session(fixture: &Fixture) -> Session {
        launched_session_with(fixture, fixture.client())
    }

    fn launched_session_with(fixture: &Fixture, client: crate::client::RemoteClient) -> Session {
        let mut config = HarnessConfig::default();
        config.console.bootstrap_settle_millis = 0;
        let session = Session::launch(client, &config, Path::new("/work")).unwrap();
        // Scenario traffic starts after the launch and bootstrap calls.
        assert_eq!(fixture.runner.calls().len(), 3);
        session
    }

    fn instant_settings(max_attempts: u32) -> ScenarioSettings {
        ScenarioSettings {
            keystroke_settle: Duration::ZERO,
            snapshot_settle: Duration::ZERO,
            poll: PollSettings {
                interval: Duration::ZERO,
                max_attempts,
            },
            fail_on_timeout: true,
            bulk_line_count: 3,
        }
    }

    fn typed_text(keys: &[Key]) -> String {
        keys.iter()
            .filter_map(|k| match k {
                Key::Char(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    fn sent_keys(fixture: &Fixture) -> Vec<Vec<Key>> {
        fixture
            .injector
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                InjectorCall::Send(keys) => Some(keys),
                InjectorCall::Activate(_) => None,
            })
            .collect()
    }

    fn script_baseline(fixture: &Fixture, line_count: usize, prompt: &str) {
        fixture.runner.reply_ok(&format!("{line_count}\n"));
        fixture.runner.reply_ok(&format!("{prompt}\n"));
    }

    /// Buffer after typing the bulk payload of `line_count` lines.
    fn bulk_buffer(line_count: usize) -> String {
        format!(">>> type payload\n{}>>> \n", bulk_payload(line_count))
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn scenario_names_are_kebab_case() {
        let names: Vec<_> = Scenario::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, ["echo-server-name", "echo-alphabet", "bulk-type"]);
    }

    #[test]
    fn bulk_command_passes_path_through_unescaped() {
        assert_eq!(
            bulk_command(Path::new("/tmp/John Smith/gvimctl-bulk-1%.tmp")),
            "type /tmp/John Smith/gvimctl-bulk-1%.tmp<cr>"
        );
        assert_eq!(
            bulk_command(Path::new("/tmp/<odd>#.tmp")),
            "type /tmp/<lt>odd>#.tmp<cr>"
        );
    }

    #[test]
    fn bulk_command_types_the_raw_path() {
        let keys = parse_key_sequence(&bulk_command(Path::new("/tmp/a b/<x>.tmp")));
        assert_eq!(typed_text(&keys), "type /tmp/a b/<x>.tmp");
        assert_eq!(keys.last(), Some(&Key::Enter));
    }

    #[test]
    fn leading_lines_match() {
        let got = lines("echo 142530\n142530\n>>> ");
        let want = lines("echo 142530\n142530");
        assert!(check_leading_lines(&got, &want).is_empty());
    }

    #[test]
    fn leading_lines_report_wrong_and_missing() {
        let got = lines("echo abc");
        let want = lines("echo abcdefghijklmnopqrstuvwxyz\nabcdefghijklmnopqrstuvwxyz");
        let mismatches = check_leading_lines(&got, &want);
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].actual.as_deref(), Some("echo abc"));
        assert_eq!(mismatches[1].line, 1);
        assert_eq!(mismatches[1].actual, None);
    }

    #[test]
    fn bulk_payload_shape() {
        let payload = bulk_payload(4000);
        let rows: Vec<&str> = payload.lines().collect();
        assert_eq!(rows.len(), 4000);
        assert_eq!(rows[0], "0 abcdefghijklmnopqrstuvwxyz");
        assert_eq!(rows[3999], "3999 abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn bulk_numbering_accepts_typed_payload() {
        let mut snapshot = vec!["type /tmp/gvimctl-bulk-x.tmp".to_string()];
        snapshot.extend(lines(&bulk_payload(50)));
        snapshot.push(">>> ".to_string());
        assert!(check_bulk_numbering(&snapshot, 50).is_empty());
    }

    #[test]
    fn bulk_numbering_reports_gaps_and_truncation() {
        let mut snapshot = vec!["type f".to_string()];
        snapshot.extend(lines(&bulk_payload(5)));
        snapshot.remove(3); // drop "2 abc..."
        let mismatches = check_bulk_numbering(&snapshot, 5);
        assert_eq!(mismatches.first().map(|m| m.line), Some(3));
        assert_eq!(mismatches.first().map(|m| m.expected.as_str()), Some("2"));
        assert_eq!(mismatches.last().map(|m| m.actual.clone()), Some(None));
        assert_eq!(mismatches.len(), 3);
    }

    #[test]
    fn blank_line_is_a_mismatch() {
        let snapshot = vec!["type f".to_string(), String::new()];
        let mismatches = check_bulk_numbering(&snapshot, 1);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].actual.as_deref(), Some(""));
    }

    #[test]
    fn timeout_fails_report_even_with_matching_content() {
        let convergence = Convergence::from(&PollOutcome::TimedOut {
            last: Some(3000),
            attempts: 200,
        });
        let report =
            ScenarioReport::from_checks(Scenario::BulkType, Some(convergence), vec![], true);
        assert!(!report.passed);
        assert_eq!(report.failure.as_deref(), Some("did not converge"));
    }

    #[test]
    fn timeout_can_be_tolerated() {
        let convergence = Convergence::from(&PollOutcome::TimedOut {
            last: Some(4002),
            attempts: 200,
        });
        let report =
            ScenarioReport::from_checks(Scenario::BulkType, Some(convergence), vec![], false);
        assert!(report.passed);
        assert_eq!(report.convergence.as_ref().map(|c| c.converged), Some(false));
    }

    #[test]
    fn report_serializes_without_empty_fields() {
        let report = ScenarioReport::from_checks(Scenario::EchoAlphabet, None, vec![], true);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["scenario"], "echo-alphabet");
        assert_eq!(json["passed"], true);
        assert!(json.get("convergence").is_none());
        assert!(json.get("failure").is_none());
    }

    #[test]
    fn settings_follow_config() {
        let config = HarnessConfig::default();
        let settings = ScenarioSettings::from(&config);
        assert_eq!(settings.bulk_line_count, 4000);
        assert!(settings.fail_on_timeout);
        assert_eq!(settings.poll.max_attempts, 200);
    }

    #[test]
    fn echo_server_name_round_trip_passes() {
        let fixture = Fixture::new();
        let session = launched_session(&fixture);
        let name = session.identity().to_string();
        script_baseline(&fixture, 2, ">>> ");
        fixture
            .runner
            .write_buffer(&format!("Python 3.12\n>>> echo {name}\n{name}\n>>> \n"));

        let report =
            run_scenario(&session, Scenario::EchoServerName, &instant_settings(5)).unwrap();

        assert!(report.passed, "{report:?}");
        assert!(report.convergence.is_none());
        assert_eq!(
            fixture.injector.calls(),
            vec![
                InjectorCall::Activate(4242),
                InjectorCall::Send(parse_key_sequence(&format!("echo {name}\r"))),
            ]
        );

        let calls = fixture.runner.calls();
        assert_eq!(calls[3][3], "line('$')");
        assert_eq!(calls[4][3], "getbufline('%','$')[0]");
        assert!(calls[5][3].starts_with("<esc>:w! "));
        assert_eq!(calls[6][3], "A");
    }

    #[test]
    fn echo_alphabet_reports_truncated_echo() {
        let fixture = Fixture::new();
        let session = launched_session(&fixture);
        script_baseline(&fixture, 1, ">>> ");
        fixture
            .runner
            .write_buffer(">>> echo abcdefghijklmnopqrstuvwxyz\nabcdefghijklm\n>>> \n");

        let report =
            run_scenario(&session, Scenario::EchoAlphabet, &instant_settings(5)).unwrap();

        assert!(!report.passed);
        assert_eq!(report.failure.as_deref(), Some("1 line(s) did not match"));
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].line, 1);
        assert_eq!(report.mismatches[0].expected, ALPHABET);
        assert_eq!(report.mismatches[0].actual.as_deref(), Some("abcdefghijklm"));
    }

    #[test]
    fn echo_without_snapshot_aborts_the_scenario() {
        let fixture = Fixture::new();
        let session = launched_session(&fixture);
        script_baseline(&fixture, 1, ">>> ");

        let err = run_scenario(&session, Scenario::EchoAlphabet, &instant_settings(5))
            .unwrap_err();
        assert!(err.to_string().contains("did not write snapshot"));
    }

    #[test]
    fn bulk_type_converges_and_validates_numbering() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("run.jsonl");
        let fixture = Fixture::new();
        let client = fixture.client().with_run_log(RunLog::new(&log_path).unwrap());
        let session = launched_session_with(&fixture, client);
        script_baseline(&fixture, 1, ">>> ");
        for count in ["3", "5", "5"] {
            fixture.runner.reply_ok(&format!("{count}\n"));
        }
        fixture.runner.write_buffer(&bulk_buffer(3));

        let report = run_scenario(&session, Scenario::BulkType, &instant_settings(10)).unwrap();

        assert!(report.passed, "{report:?}");
        assert_eq!(
            report.convergence,
            Some(Convergence {
                converged: true,
                attempts: 3,
                line_count: Some(5),
            })
        );

        let sent = sent_keys(&fixture);
        assert_eq!(sent.len(), 1);
        let typed = typed_text(&sent[0]);
        let payload = typed.strip_prefix("type ").unwrap();
        assert!(!Path::new(payload).exists(), "payload left behind: {payload}");

        let calls = fixture.runner.calls();
        let polls = calls[5..8].iter().filter(|c| c[3] == "line('$')").count();
        assert_eq!(polls, 3);
        assert!(calls[8][3].starts_with("<esc>:w! "));

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.matches("\"poll_sample\"").count(), 3);
        assert!(log.contains("\"scenario_passed\""));
    }

    #[test]
    fn bulk_type_that_never_settles_fails_but_still_validates() {
        let fixture = Fixture::new();
        let session = launched_session(&fixture);
        script_baseline(&fixture, 1, ">>> ");
        for count in ["2", "3", "4"] {
            fixture.runner.reply_ok(&format!("{count}\n"));
        }
        fixture.runner.write_buffer(">>> type payload\n0 abcdefghijklmnopqrstuvwxyz\n>>> \n");

        let report = run_scenario(&session, Scenario::BulkType, &instant_settings(3)).unwrap();

        assert!(!report.passed);
        assert_eq!(report.failure.as_deref(), Some("did not converge"));
        assert_eq!(
            report.convergence,
            Some(Convergence {
                converged: false,
                attempts: 3,
                line_count: Some(4),
            })
        );
        // Line 2 holds the prompt and line 3 is missing.
        assert_eq!(
            report.mismatches.iter().map(|m| m.line).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn bulk_type_aborts_on_unreadable_line_count() {
        let fixture = Fixture::new();
        let session = launched_session(&fixture);
        script_baseline(&fixture, 1, ">>> ");
        fixture.runner.reply_ok("E15: Invalid expression\n");

        let err = run_scenario(&session, Scenario::BulkType, &instant_settings(5)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::HarnessError>(),
            Some(crate::error::HarnessError::Channel { .. })
        ));
    }
}
