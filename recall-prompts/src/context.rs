//! Token-budgeted assembly of retrieved context.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::template::{PromptTemplate, TemplateResult};
use crate::tokens::estimate_tokens;

const DEFAULT_TEMPLATE: &str = "{{system_message}}\n\n\
Relevant context retrieved from memory, most relevant first:\n\
{{context}}\n\n\
Use this context when it helps answer the request and ignore it otherwise.";

/// One retrieved memory offered for inclusion in the prompt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContextSnippet {
    /// Identifier of the source memory entry.
    pub id: String,
    /// Entry text.
    pub text: String,
    /// Retrieval score; lower scores are dropped first.
    pub score: f64,
}

impl ContextSnippet {
    /// Creates a snippet.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
        }
    }
}

/// Context that fit the budget, rendered as numbered lines.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ContextBlock {
    /// Rendered lines, one per included snippet.
    pub text: String,
    /// Snippets that made it in, by descending score.
    pub included: Vec<ContextSnippet>,
    /// Number of snippets dropped to respect the budget.
    pub dropped: usize,
    /// Estimated tokens of `text`.
    pub estimated_tokens: usize,
}

impl ContextBlock {
    /// Returns `true` when nothing was included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }
}

/// Builds the context block and the system message that carries it.
#[derive(Clone, Debug)]
pub struct ContextAssembler {
    budget_tokens: usize,
    template: PromptTemplate,
}

impl ContextAssembler {
    /// Creates an assembler that spends at most `budget_tokens` on context.
    #[must_use]
    pub fn new(budget_tokens: usize) -> Self {
        let template = PromptTemplate::parse(DEFAULT_TEMPLATE)
            .expect("built-in context template is well formed")
            .require("context");
        Self {
            budget_tokens,
            template,
        }
    }

    /// Replaces the system template. It may use `{{system_message}}` and
    /// `{{context}}`.
    #[must_use]
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Token budget for the context block.
    #[must_use]
    pub const fn budget_tokens(&self) -> usize {
        self.budget_tokens
    }

    /// Includes snippets in descending score order until the next one would
    /// exceed the budget; it and every lower-scored snippet are dropped.
    #[must_use]
    pub fn assemble(&self, mut snippets: Vec<ContextSnippet>) -> ContextBlock {
        snippets.sort_by(|lhs, rhs| rhs.score.total_cmp(&lhs.score));

        let mut block = ContextBlock::default();
        let total = snippets.len();
        for snippet in snippets {
            let line = format!(
                "[{}] (relevance {:.2}) {}\n",
                block.included.len() + 1,
                snippet.score,
                snippet.text.trim()
            );
            let cost = estimate_tokens(&line);
            if block.estimated_tokens + cost > self.budget_tokens {
                break;
            }
            block.estimated_tokens += cost;
            block.text.push_str(&line);
            block.included.push(snippet);
        }
        block.dropped = total - block.included.len();
        if block.dropped > 0 {
            debug!(
                included = block.included.len(),
                dropped = block.dropped,
                budget = self.budget_tokens,
                "context truncated to token budget"
            );
        }
        block
    }

    /// Combines the caller's system message with the context block.
    ///
    /// Returns the system message unchanged when the block is empty.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::MissingVariable`](crate::TemplateError::MissingVariable)
    /// when a custom template requires a variable the assembler cannot supply.
    pub fn system_prompt(
        &self,
        system_message: Option<&str>,
        block: &ContextBlock,
    ) -> TemplateResult<Option<String>> {
        if block.is_empty() {
            return Ok(system_message.map(str::to_owned));
        }
        let mut vars = HashMap::from([("context", block.text.trim_end())]);
        if let Some(message) = system_message {
            vars.insert("system_message", message);
        }
        let rendered = self.template.render(&vars)?;
        Ok(Some(rendered.trim().to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippets() -> Vec<ContextSnippet> {
        vec![
            ContextSnippet::new("b", "second most relevant", 0.8),
            ContextSnippet::new("a", "most relevant fact", 0.95),
            ContextSnippet::new("c", "barely relevant", 0.71),
        ]
    }

    #[test]
    fn orders_by_score() {
        let block = ContextAssembler::new(1_000).assemble(snippets());
        let ids: Vec<_> = block.included.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(block.text.starts_with("[1] (relevance 0.95) most relevant fact"));
        assert_eq!(block.dropped, 0);
    }

    #[test]
    fn drops_lowest_scores_first() {
        let full = ContextAssembler::new(1_000).assemble(snippets());
        let first_line_tokens = estimate_tokens(full.text.lines().next().unwrap()) + 1;
        let budget = first_line_tokens + 2;
        let block = ContextAssembler::new(budget).assemble(snippets());
        assert_eq!(block.included.len(), 1);
        assert_eq!(block.included[0].id, "a");
        assert_eq!(block.dropped, 2);
        assert!(block.estimated_tokens <= budget);
    }

    #[test]
    fn zero_budget_drops_everything() {
        let block = ContextAssembler::new(0).assemble(snippets());
        assert!(block.is_empty());
        assert_eq!(block.dropped, 3);
    }

    #[test]
    fn system_prompt_carries_message_and_context() {
        let assembler = ContextAssembler::new(1_000);
        let block = assembler.assemble(snippets());
        let prompt = assembler
            .system_prompt(Some("You are a pricing analyst."), &block)
            .unwrap()
            .unwrap();
        assert!(prompt.starts_with("You are a pricing analyst."));
        assert!(prompt.contains("[1] (relevance 0.95) most relevant fact"));

        let without_message = assembler.system_prompt(None, &block).unwrap().unwrap();
        assert!(without_message.starts_with("Relevant context"));
    }

    #[test]
    fn empty_block_passes_system_message_through() {
        let assembler = ContextAssembler::new(1_000);
        let block = ContextBlock::default();
        assert_eq!(assembler.system_prompt(None, &block).unwrap(), None);
        assert_eq!(
            assembler.system_prompt(Some("sys"), &block).unwrap().as_deref(),
            Some("sys")
        );
    }

    #[test]
    fn custom_templates_are_honoured() {
        let template = PromptTemplate::parse("CTX:\n{{context}}").unwrap();
        let assembler = ContextAssembler::new(1_000).with_template(template);
        let block = assembler.assemble(vec![ContextSnippet::new("a", "fact", 0.9)]);
        let prompt = assembler.system_prompt(Some("ignored"), &block).unwrap().unwrap();
        assert_eq!(prompt, "CTX:\n[1] (relevance 0.90) fact");
    }
}
