//! `{{variable}}` prompt templates.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Result alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur during template operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    /// A required variable was not provided.
    #[error("missing required variable: {name}")]
    MissingVariable {
        /// Name of the missing variable.
        name: String,
    },

    /// The template text itself is malformed.
    #[error("malformed template: {reason}")]
    Malformed {
        /// Reason for the failure.
        reason: String,
    },
}

/// A prompt template with `{{variable}}` placeholders.
///
/// Variables are optional unless declared with [`Self::require`]; an unset
/// optional variable renders as the empty string.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use recall_prompts::PromptTemplate;
///
/// let template = PromptTemplate::parse("Answer as {{persona}}: {{question}}")
///     .unwrap()
///     .with_default("persona", "an analyst")
///     .require("question");
///
/// let vars = HashMap::from([("question", "what changed?")]);
/// assert_eq!(template.render(&vars).unwrap(), "Answer as an analyst: what changed?");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
    placeholders: Vec<String>,
    defaults: HashMap<String, String>,
    required: Vec<String>,
}

impl PromptTemplate {
    /// Parses `text`, collecting its placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Malformed`] for an unterminated or empty
    /// placeholder.
    pub fn parse(text: impl Into<String>) -> TemplateResult<Self> {
        let text = text.into();
        let placeholders = placeholders(&text)?;
        Ok(Self {
            text,
            placeholders,
            defaults: HashMap::new(),
            required: Vec::new(),
        })
    }

    /// Sets the value used when a render call omits `name`.
    #[must_use]
    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    /// Declares `name` as required at render time.
    #[must_use]
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Placeholder names in order of first appearance.
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Renders the template. Supplied values take precedence over defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::MissingVariable`] when a required variable has
    /// neither a supplied value nor a default.
    pub fn render(&self, vars: &HashMap<&str, &str>) -> TemplateResult<String> {
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text.as_str();
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                break;
            };
            out.push_str(&rest[..start]);
            out.push_str(self.value(&after[..end], vars)?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn value<'a>(&'a self, name: &str, vars: &HashMap<&str, &'a str>) -> TemplateResult<&'a str> {
        if let Some(value) = vars.get(name) {
            return Ok(*value);
        }
        if let Some(value) = self.defaults.get(name) {
            return Ok(value.as_str());
        }
        if self.required.iter().any(|required| required == name) {
            return Err(TemplateError::MissingVariable {
                name: name.to_owned(),
            });
        }
        Ok("")
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn placeholders(text: &str) -> TemplateResult<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| TemplateError::Malformed {
            reason: "unterminated placeholder".to_owned(),
        })?;
        let name = &after[..end];
        if name.trim().is_empty() || name.trim() != name {
            return Err(TemplateError::Malformed {
                reason: format!("invalid placeholder name {name:?}"),
            });
        }
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_owned());
        }
        rest = &after[end + 2..];
    }
    Ok(names)
}
