//! Prompt templates with `{key}` placeholders.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tsuzuri_core::{Inputs, StateKey, StepName, WorkflowError};

#[allow(clippy::expect_used)]
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

/// An instruction template checked against a step's declared inputs.
///
/// Placeholders are `{identifier}`. Braces around anything else, such as a
/// JSON snippet, are left untouched.
///
/// # Examples
///
/// ```
/// use tsuzuri::PromptTemplate;
/// use tsuzuri_core::StepName;
///
/// let template = PromptTemplate::new(
///     &StepName::new("WriterAgent"),
///     "Following this outline: {outline}",
///     &["outline".into()],
/// )?;
/// assert_eq!(template.placeholders().count(), 1);
///
/// let err = PromptTemplate::new(&StepName::new("WriterAgent"), "Edit {draft}", &[]);
/// assert!(err.is_err());
/// # Ok::<(), tsuzuri_core::WorkflowError>(())
/// ```
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
    placeholders: BTreeSet<String>,
}

impl PromptTemplate {
    /// Parses `source` and validates it against `declared` input keys.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if a placeholder names an
    /// undeclared key or a declared key is never referenced.
    pub fn new(
        step_name: &StepName,
        source: impl Into<String>,
        declared: &[StateKey],
    ) -> Result<Self, WorkflowError> {
        let source = source.into();
        let placeholders: BTreeSet<String> = PLACEHOLDER
            .captures_iter(&source)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();

        if let Some(undeclared) = placeholders
            .iter()
            .find(|p| !declared.iter().any(|k| k.as_str() == p.as_str()))
        {
            return Err(WorkflowError::Configuration(format!(
                "template of step '{}' references undeclared key '{}'",
                step_name, undeclared
            )));
        }
        if let Some(unused) = declared
            .iter()
            .find(|k| !placeholders.contains(k.as_str()))
        {
            return Err(WorkflowError::Configuration(format!(
                "step '{}' declares input '{}' but its template never uses it",
                step_name, unused
            )));
        }

        Ok(Self {
            source,
            placeholders,
        })
    }

    /// Returns the referenced keys in sorted order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    /// Returns the raw template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitutes resolved inputs into the template.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotText`] if a referenced value is not text.
    pub fn render(&self, inputs: &Inputs) -> Result<String, WorkflowError> {
        let mut rendered = String::with_capacity(self.source.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(&self.source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            rendered.push_str(&self.source[last..whole.start()]);
            rendered.push_str(inputs.text(name.as_str())?);
            last = whole.end();
        }
        rendered.push_str(&self.source[last..]);
        Ok(rendered)
    }
}
