//! Ordered literal substitution rules
//!
//! Each rule replaces every non-overlapping occurrence of `from` with `to`,
//! scanning left to right. Rules apply in order, each to the output of the
//! previous one.

use crate::error::{EngineError, TransformError};
use crate::transform::ContentTransform;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub from: String,
    pub to: String,
}

impl Rule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Parse the CLI form `from=to`
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let (from, to) = raw
            .split_once('=')
            .ok_or_else(|| EngineError::Config(format!("rule '{raw}' is not in from=to form")))?;
        Ok(Self::new(from, to))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self, EngineError> {
        if let Some(position) = rules.iter().position(|rule| rule.from.is_empty()) {
            return Err(EngineError::Config(format!(
                "rule #{} has an empty search string",
                position + 1
            )));
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule in order to the whole content
    pub fn apply(&self, content: &str) -> String {
        let mut current = content.to_string();
        for rule in &self.rules {
            if current.contains(rule.from.as_str()) {
                current = current.replace(rule.from.as_str(), &rule.to);
            }
        }
        current
    }

    /// Incremental form of [`apply`](Self::apply) for chunked input
    pub fn streaming(&self) -> StreamingRules {
        StreamingRules {
            stages: self.rules.iter().cloned().map(StreamingRule::new).collect(),
        }
    }
}

impl ContentTransform for RuleSet {
    fn name(&self) -> &str {
        "literal-rules"
    }

    fn transform(&self, _path: &Path, content: &str) -> Result<Option<String>, TransformError> {
        Ok(Some(self.apply(content)))
    }
}

/// One rule applied to a text stream
///
/// Holds back just enough trailing text that a match straddling two pushes is
/// still found, so output is identical to a whole-content replacement.
struct StreamingRule {
    rule: Rule,
    carry: String,
}

impl StreamingRule {
    fn new(rule: Rule) -> Self {
        Self {
            rule,
            carry: String::new(),
        }
    }

    fn push(&mut self, input: &str) -> String {
        self.carry.push_str(input);
        let buffer = std::mem::take(&mut self.carry);

        let holdback = self.rule.from.len().saturating_sub(1);
        let mut safe = buffer.len().saturating_sub(holdback);
        while !buffer.is_char_boundary(safe) {
            safe -= 1;
        }

        let mut output = String::with_capacity(buffer.len());
        let mut consumed = 0;
        for (start, matched) in buffer.match_indices(self.rule.from.as_str()) {
            if start >= safe {
                break;
            }
            output.push_str(&buffer[consumed..start]);
            output.push_str(&self.rule.to);
            consumed = start + matched.len();
        }

        // Nothing between `consumed` and `safe` can start a match
        let emit_end = safe.max(consumed);
        output.push_str(&buffer[consumed..emit_end]);
        self.carry.push_str(&buffer[emit_end..]);
        output
    }

    fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.carry);
        rest.replace(self.rule.from.as_str(), &self.rule.to)
    }
}

/// Chain of streaming rules, fed decoded text chunk by chunk
pub struct StreamingRules {
    stages: Vec<StreamingRule>,
}

impl StreamingRules {
    pub fn push(&mut self, input: &str) -> String {
        let mut current = input.to_string();
        for stage in &mut self.stages {
            current = stage.push(&current);
        }
        current
    }

    /// Flush every stage; later stages see the flushed output of earlier ones
    pub fn finish(&mut self) -> String {
        let mut output = String::new();
        for index in 0..self.stages.len() {
            let flushed = self.stages[index].finish();
            let mut current = flushed;
            for stage in &mut self.stages[index + 1..] {
                current = stage.push(&current);
            }
            output.push_str(&current);
        }
        output
    }

    /// Bytes currently held back across all stages
    pub fn pending_bytes(&self) -> usize {
        self.stages.iter().map(|stage| stage.carry.len()).sum()
    }
}
