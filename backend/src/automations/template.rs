// Template Renderer - placeholder substitution for message bodies

use ekklesia_shared::Person;
use regex::{Captures, Regex, RegexBuilder};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Resolver = Arc<dyn Fn(&Person) -> String + Send + Sync>;

/// Replaces `@token` placeholders with values taken from the recipient.
///
/// Tokens match case-insensitively. When several tokens share a prefix the
/// longest one wins, so `@nome_completo` is never read as `@nome` followed by
/// `_completo`.
#[derive(Clone, Default)]
pub struct TemplateRenderer {
    resolvers: HashMap<String, Resolver>,
    pattern: Option<Regex>,
}

impl TemplateRenderer {
    /// A renderer with no placeholders; templates pass through untouched.
    pub fn new() -> Self {
        Self::default()
    }

    /// The placeholder set available in the automation builder.
    pub fn standard() -> Self {
        Self::new()
            .with_placeholder("@nome", |person| person.first_name().to_string())
            .with_placeholder("@nome_completo", |person| {
                person.name.as_deref().map(str::trim).unwrap_or("").to_string()
            })
            .with_placeholder("@telefone", |person| {
                person.recipient_address().unwrap_or("").to_string()
            })
    }

    pub fn with_placeholder<F>(mut self, token: &str, resolve: F) -> Self
    where
        F: Fn(&Person) -> String + Send + Sync + 'static,
    {
        self.resolvers.insert(token.to_lowercase(), Arc::new(resolve));
        self.pattern = self.build_pattern();
        self
    }

    fn build_pattern(&self) -> Option<Regex> {
        let mut tokens: Vec<&String> = self.resolvers.keys().collect();
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let alternation = tokens
            .iter()
            .map(|token| regex::escape(token))
            .collect::<Vec<_>>()
            .join("|");

        match RegexBuilder::new(&alternation).case_insensitive(true).build() {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::warn!("Placeholder pattern rejected, templates will render verbatim: {}", e);
                None
            }
        }
    }

    pub fn render(&self, template: &str, person: &Person) -> String {
        let Some(pattern) = &self.pattern else {
            return template.to_string();
        };

        pattern
            .replace_all(template, |caps: &Captures| {
                self.resolvers
                    .get(&caps[0].to_lowercase())
                    .map(|resolve| resolve(person))
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

impl fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<&String> = self.resolvers.keys().collect();
        tokens.sort();
        f.debug_struct("TemplateRenderer").field("tokens", &tokens).finish()
    }
}
