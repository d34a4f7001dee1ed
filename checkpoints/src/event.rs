//! Tagged history events carried by checkpoint commits.
//!
//! Each commit written by the store has a human subject line followed by git
//! trailers (`Checkpoint-Event`, `Checkpoint-Path`, ...) from which the event
//! is recovered without interpreting the subject.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const EVENT: &str = "Checkpoint-Event";
const PATH: &str = "Checkpoint-Path";
const TARGET: &str = "Checkpoint-Target";
const FROM: &str = "Checkpoint-From";
const TO: &str = "Checkpoint-To";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEvent {
    /// Pre-existing content captured when the repository was created
    Baseline,
    Create {
        path: String,
    },
    Modify {
        path: String,
    },
    /// Safety snapshot taken before restoring `path` to `target`
    Restore {
        path: String,
        target: String,
    },
    /// `from` is `None` when the document had never been checkpointed
    Rename {
        from: Option<String>,
        to: String,
    },
    Delete {
        path: String,
    },
    /// Commit made outside the store
    External {
        summary: String,
    },
}

impl HistoryEvent {
    pub fn subject(&self) -> String {
        match self {
            HistoryEvent::Baseline => "Init checkpoints for existing untracked files".to_string(),
            HistoryEvent::Create { path } | HistoryEvent::Modify { path } => {
                format!("Checkpoint {}", path)
            }
            HistoryEvent::Restore { target, .. } => {
                format!("Committing changes and restoring to {}", target)
            }
            HistoryEvent::Rename {
                from: Some(from),
                to,
            } => format!("Renaming {} -> {}", from, to),
            HistoryEvent::Rename { from: None, to } => {
                format!("Renaming unsaved document -> {}", to)
            }
            HistoryEvent::Delete { path } => format!("Deleting {}", path),
            HistoryEvent::External { summary } => summary.clone(),
        }
    }

    fn trailers(&self) -> Vec<(&'static str, &str)> {
        match self {
            HistoryEvent::Baseline => vec![(EVENT, "baseline")],
            HistoryEvent::Create { path } => vec![(EVENT, "create"), (PATH, path.as_str())],
            HistoryEvent::Modify { path } => vec![(EVENT, "modify"), (PATH, path.as_str())],
            HistoryEvent::Restore { path, target } => {
                vec![
                    (EVENT, "restore"),
                    (PATH, path.as_str()),
                    (TARGET, target.as_str()),
                ]
            }
            HistoryEvent::Rename { from, to } => {
                let mut trailers = vec![(EVENT, "rename")];
                if let Some(from) = from {
                    trailers.push((FROM, from.as_str()));
                }
                trailers.push((TO, to.as_str()));
                trailers
            }
            HistoryEvent::Delete { path } => vec![(EVENT, "delete"), (PATH, path.as_str())],
            HistoryEvent::External { .. } => Vec::new(),
        }
    }

    /// Full commit message: subject, blank line, trailers.
    pub fn to_message(&self) -> String {
        let trailers = self.trailers();
        if trailers.is_empty() {
            return format!("{}\n", self.subject());
        }
        let block: Vec<String> = trailers
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        format!("{}\n\n{}\n", self.subject(), block.join("\n"))
    }

    pub fn from_message(message: &str) -> Self {
        let trailers: HashMap<&str, &str> = message
            .lines()
            .filter_map(|line| line.split_once(": "))
            .filter(|(key, _)| key.starts_with("Checkpoint-"))
            .map(|(key, value)| (key, value.trim()))
            .collect();
        let get = |key: &str| trailers.get(key).map(|value| value.to_string());

        let parsed = match trailers.get(EVENT).copied() {
            Some("baseline") => Some(HistoryEvent::Baseline),
            Some("create") => get(PATH).map(|path| HistoryEvent::Create { path }),
            Some("modify") => get(PATH).map(|path| HistoryEvent::Modify { path }),
            Some("restore") => match (get(PATH), get(TARGET)) {
                (Some(path), Some(target)) => Some(HistoryEvent::Restore { path, target }),
                _ => None,
            },
            Some("rename") => get(TO).map(|to| HistoryEvent::Rename {
                from: get(FROM),
                to,
            }),
            Some("delete") => get(PATH).map(|path| HistoryEvent::Delete { path }),
            _ => None,
        };

        parsed.unwrap_or_else(|| HistoryEvent::External {
            summary: message.lines().next().unwrap_or("").to_string(),
        })
    }
}
