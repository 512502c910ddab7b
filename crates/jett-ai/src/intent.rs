//! Extraction of spoken infrastructure commands.
//!
//! Mutating verbs (start, stop, restart) only count when the whole utterance
//! is the command, so "don't stop the music" never becomes an operation.
//! Read-only requests (logs, status) may appear inside a longer sentence.

use std::sync::OnceLock;

use regex::Regex;

use jett_core::security::OperationKind;

const TARGET: &str = r"([a-z0-9][a-z0-9_.-]*)";

/// Words that land in the target slot but never name a container.
const NOT_TARGETS: &[&str] = &[
    "the", "it", "that", "this", "everything", "all", "me", "my", "music", "timer", "alarm",
];

struct CommandPattern {
    re: Regex,
    /// `None` means the kind is taken from the first capture group.
    kind: Option<OperationKind>,
}

fn patterns() -> &'static [CommandPattern] {
    static PATTERNS: OnceLock<Vec<CommandPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let specs: Vec<(String, Option<OperationKind>)> = vec![
            (
                format!(
                    r"^(?:(?:hey\s+)?jett[,\s]+)?(?:please\s+)?(start|stop|restart|reboot)\s+(?:the\s+)?{TARGET}(?:\s+(?:container|service))?(?:\s+please)?$"
                ),
                None,
            ),
            (
                format!(
                    r"\b(?:show|get|read|check|pull up)\s+(?:me\s+)?(?:the\s+)?logs?\s+(?:for|of|from)\s+(?:the\s+)?{TARGET}"
                ),
                Some(OperationKind::Logs),
            ),
            (
                format!(r"\b(?:show|get|read|check)\s+(?:me\s+)?(?:the\s+)?{TARGET}\s+logs?\b"),
                Some(OperationKind::Logs),
            ),
            (
                format!(r"\bstatus\s+(?:of|for)\s+(?:the\s+)?{TARGET}"),
                Some(OperationKind::Status),
            ),
            (
                format!(r"\bis\s+(?:the\s+)?{TARGET}\s+(?:container\s+|service\s+)?(?:running|up|down)\b"),
                Some(OperationKind::Status),
            ),
        ];
        specs
            .into_iter()
            .filter_map(|(p, kind)| Regex::new(&p).ok().map(|re| CommandPattern { re, kind }))
            .collect()
    })
}

fn normalize(transcript: &str) -> String {
    transcript
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .to_lowercase()
        .replace("what's", "what is")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find a container command in `transcript`.
pub fn parse_command(transcript: &str) -> Option<(OperationKind, String)> {
    let text = normalize(transcript);
    if text.is_empty() {
        return None;
    }
    for pattern in patterns() {
        let Some(caps) = pattern.re.captures(&text) else {
            continue;
        };
        let (kind, target) = match pattern.kind {
            Some(kind) => (kind, caps.get(1)?.as_str()),
            None => {
                let verb = caps.get(1)?.as_str();
                let kind = if verb == "reboot" {
                    OperationKind::Restart
                } else {
                    verb.parse().ok()?
                };
                (kind, caps.get(2)?.as_str())
            }
        };
        let target = target.trim_end_matches(['.', '-', '_']);
        if target.is_empty() || NOT_TARGETS.contains(&target) {
            continue;
        }
        return Some((kind, target.to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(kind: OperationKind, target: &str) -> Option<(OperationKind, String)> {
        Some((kind, target.to_string()))
    }

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(patterns().len(), 5);
    }

    #[test]
    fn imperative_mutations() {
        assert_eq!(parse_command("Restart n8n."), cmd(OperationKind::Restart, "n8n"));
        assert_eq!(parse_command("jett, stop the redis container"), cmd(OperationKind::Stop, "redis"));
        assert_eq!(parse_command("please start postgres"), cmd(OperationKind::Start, "postgres"));
        assert_eq!(parse_command("reboot qdrant"), cmd(OperationKind::Restart, "qdrant"));
    }

    #[test]
    fn read_only_requests_inside_sentences() {
        assert_eq!(
            parse_command("can you show me the logs for redis"),
            cmd(OperationKind::Logs, "redis")
        );
        assert_eq!(
            parse_command("What's the status of postgres?"),
            cmd(OperationKind::Status, "postgres")
        );
        assert_eq!(
            parse_command("is the n8n container running"),
            cmd(OperationKind::Status, "n8n")
        );
        assert_eq!(parse_command("check qdrant logs"), cmd(OperationKind::Logs, "qdrant"));
    }

    #[test]
    fn mutating_verbs_inside_sentences_ignored() {
        assert_eq!(parse_command("don't stop the music tonight"), None);
        assert_eq!(parse_command("how do I restart my router at home"), None);
        assert_eq!(parse_command("stop"), None);
        assert_eq!(parse_command("stop the timer"), None);
    }

    #[test]
    fn blocked_verbs_never_parse() {
        assert_eq!(parse_command("remove redis"), None);
        assert_eq!(parse_command("delete postgres"), None);
        assert_eq!(parse_command("exec n8n"), None);
    }

    #[test]
    fn ordinary_questions_are_not_commands() {
        assert_eq!(parse_command("what time is it"), None);
        assert_eq!(parse_command(""), None);
    }
}
