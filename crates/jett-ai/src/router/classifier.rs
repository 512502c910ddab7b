//! Rule-based complexity classifier.
//!
//! Evaluation order:
//! 1. empty or very short utterances go local, whatever they contain;
//! 2. the ordered rule list, first match wins;
//! 3. long utterances with no matching rule go to the cloud;
//! 4. everything else stays local.
//!
//! The result depends only on the text and the rule configuration.

use regex::Regex;
use serde::Serialize;

use jett_core::config::{Route, RouterConfig};
use jett_core::error::ConfigError;

pub const SIGNAL_EMPTY: &str = "empty";
pub const SIGNAL_SHORT: &str = "short-utterance";
pub const SIGNAL_LONG: &str = "long-utterance";
pub const SIGNAL_DEFAULT: &str = "default";

/// Built-in rules in priority order.
const BUILTIN_RULES: &[(&str, &str, Route)] = &[
    (
        "local.command",
        r"\b(timer|remind(er)?|alarm|volume|pause|resume|play|skip)\b",
        Route::Local,
    ),
    ("local.time", r"\bwhat (time|day|date)\b", Route::Local),
    (
        "local.confirm",
        r"^(yes|no|yeah|nah|sure|okay|ok)[\s.!?]*$",
        Route::Local,
    ),
    (
        "cloud.reasoning",
        r"\b(why|explain|compare|analy[sz]e|difference between|pros and cons|tradeoffs?)\b",
        Route::Cloud,
    ),
    (
        "cloud.generative",
        r"\b(write|compose|draft|summari[sz]e)\b",
        Route::Cloud,
    ),
    (
        "cloud.planning",
        r"\b(how would|what if|help me|step by step|walk me through)\b",
        Route::Cloud,
    ),
    (
        "cloud.technical",
        r"\b(debug|refactor|implement|architect)\b",
        Route::Cloud,
    ),
    (
        "local.factual",
        r"\b(what is|what's|who is|where is|define)\b",
        Route::Local,
    ),
    (
        "local.greeting",
        r"\b(hello|hi|hey|thanks|thank you|good morning|good night)\b",
        Route::Local,
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplexityVerdict {
    pub route: Route,
    /// Id of the rule or length signal that decided the route.
    pub matched_signal: String,
}

impl ComplexityVerdict {
    fn new(route: Route, signal: &str) -> Self {
        Self {
            route,
            matched_signal: signal.to_string(),
        }
    }
}

/// Diagnostic view of a classification.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub verdict: ComplexityVerdict,
    pub word_count: usize,
    /// Every rule that matched, in priority order.
    pub matched_rules: Vec<String>,
}

#[derive(Debug, Clone)]
struct Rule {
    id: String,
    re: Regex,
    route: Route,
}

#[derive(Debug, Clone)]
pub struct ComplexityClassifier {
    rules: Vec<Rule>,
    short_words: usize,
    long_words: usize,
}

impl ComplexityClassifier {
    /// Build from `(id, pattern, route)` triples. Patterns match case-insensitively.
    pub fn new<'a, I>(rules: I, short_words: usize, long_words: usize) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str, Route)>,
    {
        let rules = rules
            .into_iter()
            .map(|(id, pattern, route)| {
                let re = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
                    ConfigError::InvalidRule {
                        id: id.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Rule {
                    id: id.to_string(),
                    re,
                    route,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            rules,
            short_words,
            long_words,
        })
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::new(BUILTIN_RULES.iter().copied(), 5, 25)
    }

    /// Configured rules replace the built-in list when present.
    pub fn from_config(cfg: &RouterConfig) -> Result<Self, ConfigError> {
        if cfg.rules.is_empty() {
            Self::new(
                BUILTIN_RULES.iter().copied(),
                cfg.short_utterance_words,
                cfg.long_utterance_words,
            )
        } else {
            Self::new(
                cfg.rules
                    .iter()
                    .map(|r| (r.id.as_str(), r.pattern.as_str(), r.route)),
                cfg.short_utterance_words,
                cfg.long_utterance_words,
            )
        }
    }

    pub fn classify(&self, text: &str) -> ComplexityVerdict {
        let text = text.trim();
        let words = word_count(text);
        if words == 0 {
            return ComplexityVerdict::new(Route::Local, SIGNAL_EMPTY);
        }
        if words <= self.short_words {
            return ComplexityVerdict::new(Route::Local, SIGNAL_SHORT);
        }
        if let Some(rule) = self.rules.iter().find(|r| r.re.is_match(text)) {
            return ComplexityVerdict::new(rule.route, &rule.id);
        }
        if words >= self.long_words {
            return ComplexityVerdict::new(Route::Cloud, SIGNAL_LONG);
        }
        ComplexityVerdict::new(Route::Local, SIGNAL_DEFAULT)
    }

    pub fn explain(&self, text: &str) -> Explanation {
        let trimmed = text.trim();
        Explanation {
            verdict: self.classify(text),
            word_count: word_count(trimmed),
            matched_rules: self
                .rules
                .iter()
                .filter(|r| r.re.is_match(trimmed))
                .map(|r| r.id.clone())
                .collect(),
        }
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.id.as_str())
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
