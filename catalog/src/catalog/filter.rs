//! Streaming record filter chain
//!
//! Rules are compiled once; invalid ones are reported on the messages
//! channel and skipped. A single consumer task then reads records from the
//! input channel, applies the rules in order, and forwards survivors to the
//! output channel in arrival order. Dropping every input sender drains the
//! task and closes the output channel.

use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::catalog::Record;
use crate::storage::FilterRule;

pub const ACTION_DISCARD: &str = "discard";
pub const ACTION_REWRITE: &str = "rewrite";
pub const ACTION_SIEVE: &str = "sieve";

pub const TARGET_ANY: &str = "any";
pub const TARGET_ORIGIN: &str = "origin";
pub const TARGET_SOURCE: &str = "source";
pub const TARGET_METRIC: &str = "metric";

/// Default capacity of the diagnostic messages channel
pub const DEFAULT_MESSAGES_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Discard,
    Rewrite,
    Sieve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Any,
    Origin,
    Source,
    Metric,
}

impl Target {
    fn covers(self, field: Target) -> bool {
        self == Target::Any || self == field
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    action: Action,
    target: Target,
    pattern: Regex,
    into: String,
}

/// An ordered, compiled list of filter rules
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile `rules`, returning the valid subset plus one message per skipped rule
    pub fn compile(rules: &[FilterRule]) -> (Self, Vec<String>) {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut messages = Vec::new();

        for rule in rules {
            let action = match rule.action.as_str() {
                ACTION_DISCARD => Action::Discard,
                ACTION_REWRITE => Action::Rewrite,
                ACTION_SIEVE => Action::Sieve,
                other => {
                    messages.push(format!("unknown \"{}\" filter action, discarding", other));
                    continue;
                }
            };

            let target = match rule.target.as_str() {
                "" | TARGET_ANY => Target::Any,
                TARGET_ORIGIN => Target::Origin,
                TARGET_SOURCE => Target::Source,
                TARGET_METRIC => Target::Metric,
                other => {
                    messages.push(format!("unknown \"{}\" filter target, discarding", other));
                    continue;
                }
            };

            let pattern = match Regex::new(&rule.pattern) {
                Ok(re) => re,
                Err(e) => {
                    messages.push(format!("unable to compile filter pattern: {}, discarding", e));
                    continue;
                }
            };

            compiled.push(CompiledRule {
                action,
                target,
                pattern,
                into: rule.into.clone(),
            });
        }

        (Self { rules: compiled }, messages)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run `record` through the rules
    ///
    /// Returns the (possibly rewritten) record, or the diagnostic message
    /// explaining why it was dropped.
    pub fn apply(&self, mut record: Record) -> Result<Record, String> {
        record.preserve_originals();

        for rule in &self.rules {
            for field in [Target::Origin, Target::Source, Target::Metric] {
                if !rule.target.covers(field) {
                    continue;
                }

                let value = match field {
                    Target::Origin => &mut record.origin,
                    Target::Source => &mut record.source,
                    _ => &mut record.metric,
                };
                let matched = rule.pattern.is_match(value);

                match rule.action {
                    Action::Rewrite if matched => {
                        *value = rule.pattern.replace_all(value, rule.into.as_str()).into_owned();
                    }
                    Action::Discard if matched => {
                        return Err(format!(
                            "matches \"{}\" pattern, discarding: {}",
                            rule.pattern.as_str(),
                            record
                        ));
                    }
                    Action::Sieve if !matched => {
                        return Err(format!(
                            "does not match \"{}\" sieve pattern, discarding: {}",
                            rule.pattern.as_str(),
                            record
                        ));
                    }
                    _ => {}
                }
            }
        }

        Ok(record)
    }
}

/// Running filter chain: connector -> `input`, `output` -> catalog
pub struct FilterChain {
    pub input: mpsc::Sender<Record>,
    pub output: mpsc::Receiver<Record>,
    pub messages: mpsc::Receiver<String>,
    pub task: JoinHandle<()>,
}

impl FilterChain {
    /// Compile `rules` and spawn the consumer task on the current runtime
    pub fn new(rules: &[FilterRule], messages_capacity: usize) -> Self {
        let (input_tx, mut input_rx) = mpsc::channel::<Record>(1);
        let (output_tx, output_rx) = mpsc::channel::<Record>(1);
        let (messages_tx, messages_rx) = mpsc::channel::<String>(messages_capacity.max(1));

        let (rule_set, compile_messages) = RuleSet::compile(rules);
        for message in compile_messages {
            let _ = messages_tx.try_send(message);
        }

        let task = tokio::spawn(async move {
            while let Some(record) = input_rx.recv().await {
                match rule_set.apply(record) {
                    Ok(record) => {
                        if output_tx.send(record).await.is_err() {
                            break;
                        }
                    }
                    Err(message) => {
                        // Best effort: diagnostics never block the pipeline
                        let _ = messages_tx.try_send(message);
                    }
                }
            }
        });

        Self {
            input: input_tx,
            output: output_rx,
            messages: messages_rx,
            task,
        }
    }
}
