//! One polymorphic surface over heterogeneous worker CLIs. The rest of
//! the system asks for argv/env/parse behavior through these functions
//! and never branches on [`AgentKind`] itself.

use std::collections::HashMap;
use std::path::Path;

use muster_types::{AgentKind, TeamError};

/// Declarative description of how one CLI family is driven.
#[derive(Debug, Clone, Copy)]
pub struct AgentContract {
    pub binary: &'static str,
    pub install_hint: &'static str,
    /// Whether the CLI accepts a one-shot headless instruction and exits
    /// after responding. Interactive-only agents get keystroke injection.
    pub prompt_mode: bool,
}

pub fn contract(kind: AgentKind) -> AgentContract {
    match kind {
        AgentKind::Claude => AgentContract {
            binary: "claude",
            install_hint: "npm install -g @anthropic-ai/claude-code",
            prompt_mode: true,
        },
        AgentKind::Codex => AgentContract {
            binary: "codex",
            install_hint: "npm install -g @openai/codex",
            prompt_mode: true,
        },
        AgentKind::Gemini => AgentContract {
            binary: "gemini",
            install_hint: "npm install -g @google/gemini-cli",
            prompt_mode: false,
        },
    }
}

/// Argv for launching an interactive worker session.
pub fn launch_args(kind: AgentKind, model: Option<&str>, extra_flags: &[String]) -> Vec<String> {
    let mut args = Vec::new();
    match kind {
        AgentKind::Claude => {
            if let Some(model) = model {
                args.push("--model".to_string());
                args.push(model.to_string());
            }
        }
        AgentKind::Codex => {
            if let Some(model) = model {
                args.push("-m".to_string());
                args.push(model.to_string());
            }
        }
        AgentKind::Gemini => {
            if let Some(model) = model {
                args.push("-m".to_string());
                args.push(model.to_string());
            }
        }
    }
    args.extend(extra_flags.iter().cloned());
    args
}

pub fn is_prompt_mode_agent(kind: AgentKind) -> bool {
    contract(kind).prompt_mode
}

/// Argv for a one-shot headless invocation, or `None` for agents that
/// only accept instructions through an interactive session.
pub fn prompt_mode_args(kind: AgentKind, instruction: &str) -> Option<Vec<String>> {
    match kind {
        AgentKind::Claude => Some(vec!["-p".to_string(), instruction.to_string()]),
        AgentKind::Codex => Some(vec!["exec".to_string(), instruction.to_string()]),
        AgentKind::Gemini => None,
    }
}

/// Normalizes raw CLI output to response text.
pub fn parse_output(kind: AgentKind, raw: &str) -> String {
    match kind {
        AgentKind::Claude => {
            // `claude -p --output-format json` wraps the answer; plain
            // runs are passed through.
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.trim()) {
                if let Some(result) = value.get("result").and_then(|v| v.as_str()) {
                    return result.trim().to_string();
                }
            }
            raw.trim().to_string()
        }
        AgentKind::Codex => raw
            .lines()
            .filter(|line| !line.trim_start().starts_with('['))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        AgentKind::Gemini => raw.trim().to_string(),
    }
}

/// Probes whether the CLI binary resolves on PATH.
pub fn is_cli_available(kind: AgentKind) -> bool {
    let binary = contract(kind).binary;
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(binary);
        candidate.is_file()
            || candidate.with_extension("exe").is_file()
            || candidate.with_extension("cmd").is_file()
    })
}

/// Fails loudly, naming the missing binary and how to install it.
pub fn validate_cli_available(kind: AgentKind) -> Result<(), TeamError> {
    if is_cli_available(kind) {
        return Ok(());
    }
    let contract = contract(kind);
    Err(TeamError::AgentUnavailable {
        binary: contract.binary.to_string(),
        install_hint: contract.install_hint.to_string(),
    })
}

/// Process environment for a launched worker: a copy of the ambient
/// environment with identity variables merged over it. The ambient
/// environment itself is never mutated.
pub fn build_worker_env(
    team_name: &str,
    worker_name: &str,
    kind: AgentKind,
    state_root: &Path,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.insert("MUSTER_TEAM".to_string(), team_name.to_string());
    env.insert("MUSTER_WORKER".to_string(), worker_name.to_string());
    env.insert(
        "MUSTER_AGENT_KIND".to_string(),
        kind.as_str().to_string(),
    );
    env.insert(
        "MUSTER_STATE_ROOT".to_string(),
        state_root.display().to_string(),
    );
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn launch_args_carry_model_per_cli_syntax() {
        assert_eq!(
            launch_args(AgentKind::Claude, Some("opus"), &[]),
            vec!["--model", "opus"]
        );
        assert_eq!(
            launch_args(AgentKind::Codex, Some("o4-mini"), &["--yolo".to_string()]),
            vec!["-m", "o4-mini", "--yolo"]
        );
        assert!(launch_args(AgentKind::Gemini, None, &[]).is_empty());
    }

    #[test]
    fn prompt_mode_matches_contract_table() {
        assert!(is_prompt_mode_agent(AgentKind::Claude));
        assert!(is_prompt_mode_agent(AgentKind::Codex));
        assert!(!is_prompt_mode_agent(AgentKind::Gemini));
        assert_eq!(
            prompt_mode_args(AgentKind::Codex, "run the tests"),
            Some(vec!["exec".to_string(), "run the tests".to_string()])
        );
        assert_eq!(prompt_mode_args(AgentKind::Gemini, "x"), None);
    }

    #[test]
    fn claude_json_result_is_unwrapped() {
        let raw = r#"{"type":"result","result":"  all tests pass  ","cost_usd":0.01}"#;
        assert_eq!(parse_output(AgentKind::Claude, raw), "all tests pass");
        assert_eq!(
            parse_output(AgentKind::Claude, "plain answer\n"),
            "plain answer"
        );
    }

    #[test]
    fn codex_log_banner_lines_are_stripped() {
        let raw = "[2026-08-30] codex session started\nthe fix is in\n[2026-08-30] done\n";
        assert_eq!(parse_output(AgentKind::Codex, raw), "the fix is in");
    }

    #[test]
    fn worker_env_adds_identity_without_mutating_ambient() {
        let before = std::env::var("MUSTER_WORKER").ok();
        let env = build_worker_env(
            "alpha",
            "fixer",
            AgentKind::Codex,
            &PathBuf::from("/state"),
        );
        assert_eq!(env.get("MUSTER_TEAM").map(String::as_str), Some("alpha"));
        assert_eq!(env.get("MUSTER_WORKER").map(String::as_str), Some("fixer"));
        assert_eq!(
            env.get("MUSTER_AGENT_KIND").map(String::as_str),
            Some("codex")
        );
        assert_eq!(std::env::var("MUSTER_WORKER").ok(), before);
    }

    #[test]
    fn validate_names_binary_and_hint_when_missing() {
        // The probe consults PATH; with an empty PATH nothing resolves.
        let original = std::env::var_os("PATH");
        std::env::set_var("PATH", "");
        let err = validate_cli_available(AgentKind::Gemini).expect_err("must be missing");
        match &err {
            TeamError::AgentUnavailable {
                binary,
                install_hint,
            } => {
                assert_eq!(binary, "gemini");
                assert!(install_hint.contains("gemini"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        if let Some(original) = original {
            std::env::set_var("PATH", original);
        }
    }
}
