//! Content transforms
//!
//! A [`Transformer`] pairs an optional external [`ContentTransform`] with the
//! mandatory [`RuleSet`] fallback:
//!
//! ```text
//! provider.transform(path, content)
//!   Ok(Some(new))              -> new
//!   Ok(None)                   -> rules.apply(content)      (not applicable)
//!   Err(ProviderUnavailable)   -> rules.apply(content) + warning
//!   Err(other)                 -> file fails
//! ```

pub mod rules;
pub mod streaming;

pub use rules::{Rule, RuleSet, StreamingRules};
pub use streaming::{StreamOutcome, StreamingPipeline};

use crate::error::TransformError;
use std::path::Path;
use std::sync::Arc;

/// A `(path, content) -> content` change, usually backed by an external provider
pub trait ContentTransform: Send + Sync {
    /// Name used in logs and error records
    fn name(&self) -> &str;

    /// Return `Ok(None)` when the transform does not apply to this file
    fn transform(&self, path: &Path, content: &str) -> Result<Option<String>, TransformError>;
}

/// Which path produced a transform result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformSource {
    Provider,
    Rules,
}

#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub content: String,
    pub source: TransformSource,
    pub warning: Option<String>,
}

#[derive(Clone)]
pub struct Transformer {
    provider: Option<Arc<dyn ContentTransform>>,
    rules: Arc<RuleSet>,
}

impl Transformer {
    pub fn new(provider: Option<Arc<dyn ContentTransform>>, rules: RuleSet) -> Self {
        Self {
            provider,
            rules: Arc::new(rules),
        }
    }

    /// Literal substitution only
    pub fn rules_only(rules: RuleSet) -> Self {
        Self::new(None, rules)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn apply(&self, path: &Path, content: &str) -> Result<TransformOutput, TransformError> {
        let Some(provider) = &self.provider else {
            return Ok(self.fallback(content, None));
        };

        match provider.transform(path, content) {
            Ok(Some(content)) => Ok(TransformOutput {
                content,
                source: TransformSource::Provider,
                warning: None,
            }),
            Ok(None) => Ok(self.fallback(content, None)),
            Err(TransformError::ProviderUnavailable { provider, reason }) => {
                let warning = format!(
                    "{}: provider '{provider}' unavailable ({reason}), applied literal rules",
                    path.display()
                );
                tracing::warn!("{}", warning);
                Ok(self.fallback(content, Some(warning)))
            }
            Err(error) => Err(error),
        }
    }

    fn fallback(&self, content: &str, warning: Option<String>) -> TransformOutput {
        TransformOutput {
            content: self.rules.apply(content),
            source: TransformSource::Rules,
            warning,
        }
    }
}
