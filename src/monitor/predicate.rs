//! Completion predicates over raw status text

use serde::{Deserialize, Serialize};

/// Decides from raw status text whether the monitored operation has finished
pub trait CompletionPredicate: Send + Sync {
    fn is_complete(&self, status: &str) -> bool;
}

impl<F> CompletionPredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_complete(&self, status: &str) -> bool {
        self(status)
    }
}

/// Matches when any indicator occurs in the status text (case-insensitive).
///
/// The default indicators treat "stopped on the source" and "no longer present
/// on the source" alike. That cannot tell a finished migration from a VM that
/// vanished for another reason, so callers with a stricter notion of success
/// should supply their own indicators or predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstringPredicate {
    indicators: Vec<String>,
}

impl SubstringPredicate {
    /// Empty indicators are dropped; an empty set never matches.
    pub fn new<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indicators: indicators
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    pub fn indicators(&self) -> &[String] {
        &self.indicators
    }
}

impl Default for SubstringPredicate {
    fn default() -> Self {
        Self::new(default_indicators())
    }
}

impl CompletionPredicate for SubstringPredicate {
    fn is_complete(&self, status: &str) -> bool {
        let status = status.to_lowercase();
        self.indicators.iter().any(|i| status.contains(i.as_str()))
    }
}

pub fn default_indicators() -> Vec<String> {
    vec![
        r#""status":"stopped""#.to_string(),
        "not found".to_string(),
        "does not exist".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_stopped_json() {
        let p = SubstringPredicate::default();
        assert!(p.is_complete(r#"{"status":"stopped","vmid":101}"#));
        assert!(!p.is_complete(r#"{"status":"running","vmid":101}"#));
    }

    #[test]
    fn test_default_matches_missing_vm() {
        let p = SubstringPredicate::default();
        assert!(p.is_complete("Configuration file 'nodes/pve1/qemu-server/101.conf' does not exist"));
        assert!(p.is_complete("404 Not Found"));
    }

    #[test]
    fn test_custom_indicators_replace_defaults() {
        let p = SubstringPredicate::new(["migration finished"]);
        assert!(p.is_complete("2026-10-16 12:00:01 Migration finished successfully"));
        assert!(!p.is_complete(r#"{"status":"stopped"}"#));
    }

    #[test]
    fn test_empty_indicator_never_matches() {
        let p = SubstringPredicate::new([""]);
        assert!(p.indicators().is_empty());
        assert!(!p.is_complete("anything"));
    }

    #[test]
    fn test_closure_predicate() {
        let p = |s: &str| s.trim() == "done";
        assert!(p.is_complete(" done\n"));
        assert!(!p.is_complete("pending"));
    }
}
