//! Coding-agent subprocesses: parallel invocation, response scoring and
//! discovery on `PATH`.

use std::io;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use pyo3::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AgentSpec;
use crate::errors::{UnpycError, UnpycResult};
use crate::guards::AGENT_JOIN_GRACE_SECS;
use crate::pipeline::llm::extract::extract_code;
use crate::process::{run_with_timeout, ExitKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Opencode,
}

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::Claude, AgentKind::Opencode];

    pub fn id(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Opencode => "opencode",
        }
    }

    pub fn default_program(&self) -> &'static str {
        self.id()
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude-sonnet-4-20250514",
            AgentKind::Opencode => "gpt-5",
        }
    }

    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            AgentKind::Claude => 60,
            AgentKind::Opencode => 120,
        }
    }

    /// Argument layout with `{prompt}` and `{model}` placeholders.
    pub fn default_args(&self) -> &'static [&'static str] {
        match self {
            AgentKind::Claude => &[
                "-p",
                "{prompt}",
                "--model",
                "{model}",
                "--permission-mode",
                "bypassPermissions",
            ],
            AgentKind::Opencode => &["ask", "--model", "{model}", "{prompt}"],
        }
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Run one agent to completion. Only a clean exit with output counts.
pub fn ask_agent(spec: &AgentSpec, prompt: &str) -> UnpycResult<String> {
    let program = spec.program();
    let output = run_with_timeout(program, &spec.command_args(prompt), spec.timeout()).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            UnpycError::AgentUnavailable(program.to_string())
        } else {
            UnpycError::Io(e)
        }
    })?;
    match output.exit {
        ExitKind::TimedOut => Err(UnpycError::AgentTimeout(spec.kind.id().to_string())),
        ExitKind::Exited(0) if !output.stdout.trim().is_empty() => Ok(output.stdout),
        _ => Err(UnpycError::AgentUnavailable(format!(
            "{} produced no usable output",
            spec.kind.id()
        ))),
    }
}

/// Ask every agent concurrently. Slot `i` holds agent `i`'s response, or
/// `None` when it failed or did not answer within the overall deadline.
pub fn query_agents(agents: &[AgentSpec], prompt: &str) -> Vec<Option<String>> {
    let mut responses: Vec<Option<String>> = vec![None; agents.len()];
    if agents.is_empty() {
        return responses;
    }
    let deadline = agents
        .iter()
        .map(AgentSpec::timeout)
        .max()
        .unwrap_or_default()
        + Duration::from_secs(AGENT_JOIN_GRACE_SECS);

    let (tx, rx) = mpsc::channel();
    for (slot, spec) in agents.iter().enumerate() {
        let tx = tx.clone();
        let spec = spec.clone();
        let prompt = prompt.to_string();
        std::thread::spawn(move || {
            let _ = tx.send((slot, ask_agent(&spec, &prompt)));
        });
    }
    drop(tx);

    let started = Instant::now();
    let mut pending = agents.len();
    while pending > 0 {
        let Some(left) = deadline.checked_sub(started.elapsed()) else {
            break;
        };
        match rx.recv_timeout(left) {
            Ok((slot, Ok(text))) => {
                responses[slot] = Some(text);
                pending -= 1;
            }
            Ok((slot, Err(e))) => {
                debug!(agent = agents[slot].kind.id(), error = %e, "agent rejected");
                pending -= 1;
            }
            Err(_) => break,
        }
    }
    if pending > 0 {
        debug!(pending, "agents still running at deadline, ignoring them");
    }
    responses
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Higher is better: rewards code lines, returns and attribute access;
/// a one- or two-line body containing `pass` is penalised.
pub fn score_code(code: &str) -> i64 {
    let lines = code
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .count() as i64;
    let mut score = lines * 10 + code.matches("return ").count() as i64 * 5 + code.matches("self.").count() as i64 * 2;
    if code.contains("pass") && lines <= 2 {
        score -= 50;
    }
    score
}

/// Highest-scoring candidate; ties go to the earliest.
pub fn select_best(candidates: Vec<String>) -> Option<String> {
    let mut best: Option<(i64, String)> = None;
    for code in candidates {
        let score = score_code(&code);
        if best.as_ref().map_or(true, |(top, _)| score > *top) {
            best = Some((score, code));
        }
    }
    best.map(|(_, code)| code)
}

/// Ask all agents and return the best extractable, parseable code.
pub fn best_response(agents: &[AgentSpec], prompt: &str) -> Option<String> {
    let candidates: Vec<String> = query_agents(agents, prompt)
        .into_iter()
        .flatten()
        .filter_map(|response| extract_code(&response))
        .collect();
    select_best(candidates)
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Agent CLIs found on `PATH`, in preference order.
#[pyfunction]
pub fn agents_available() -> Vec<String> {
    AgentKind::ALL
        .iter()
        .filter(|kind| which::which(kind.default_program()).is_ok())
        .map(|kind| kind.id().to_string())
        .collect()
}

#[pyfunction]
pub fn find_coding_agent() -> Option<String> {
    agents_available().into_iter().next()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// An agent that ignores the prompt and prints `response`.
    pub(crate) fn scripted(kind: AgentKind, response: &str) -> AgentSpec {
        let mut spec = AgentSpec::new(kind);
        spec.program = Some("sh".to_string());
        spec.args = Some(vec![
            "-c".to_string(),
            "printf '%s' \"$1\"".to_string(),
            "sh".to_string(),
            response.to_string(),
        ]);
        spec.timeout_secs = Some(5);
        spec
    }

    const TRIVIAL: &str = "```python\ndef update(self):\n    pass\n```";

    fn substantial() -> String {
        let mut code = String::from("```python\ndef update(self, value):\n");
        for i in 0..4 {
            code.push_str(&format!("    if value == {i}:\n"));
            code.push_str(&format!("        self.level = {i}\n"));
            code.push_str(&format!("        return self.level + {i}\n"));
        }
        code.push_str("    self.level = None\n    self.refresh()\n```");
        code
    }

    #[test]
    fn test_score_prefers_real_bodies() {
        assert!(score_code("def f():\n    pass") < 0);
        assert_eq!(score_code("x = 1\n# note\n\nreturn self.x"), 2 * 10 + 5 + 2);
    }

    #[test]
    fn test_ties_go_to_first() {
        let best = select_best(vec!["a = 1".to_string(), "b = 2".to_string()]);
        assert_eq!(best.unwrap(), "a = 1");
        assert!(select_best(Vec::new()).is_none());
    }

    #[test]
    fn test_substantial_response_wins() {
        let agents = vec![
            scripted(AgentKind::Claude, TRIVIAL),
            scripted(AgentKind::Opencode, &substantial()),
        ];
        let best = best_response(&agents, "reconstruct").unwrap();
        assert_eq!(best.lines().count(), 15);
        assert_eq!(best.matches("return ").count(), 4);
    }

    #[test]
    fn test_failed_and_hung_agents_are_rejected() {
        let mut broken = scripted(AgentKind::Claude, "ignored");
        broken.args = Some(vec!["-c".into(), "echo '```python\nx = 1\n```'; exit 1".into()]);
        let mut hung = scripted(AgentKind::Opencode, "ignored");
        hung.args = Some(vec!["-c".into(), "exec sleep 5".into()]);
        hung.timeout_secs = Some(0);
        let missing = AgentSpec {
            program: Some("no-such-agent-binary".into()),
            ..AgentSpec::new(AgentKind::Claude)
        };
        let responses = query_agents(&[broken, hung, missing], "p");
        assert_eq!(responses, vec![None, None, None]);
    }

    #[test]
    fn test_prompt_is_passed_through() {
        let mut echo = AgentSpec::new(AgentKind::Claude);
        echo.program = Some("sh".into());
        echo.args = Some(vec!["-c".into(), "printf '%s' \"$1\"".into(), "sh".into(), "{prompt}".into()]);
        echo.timeout_secs = Some(5);
        let responses = query_agents(&[echo], "def f():\n    return 1");
        assert_eq!(responses[0].as_deref(), Some("def f():\n    return 1"));
    }
}
