//! Evaluates a user's category overrides against transactions.

use regex::{Regex, RegexBuilder};

use crate::{Error, category::CategoryOverride, transaction::NewTransaction};

/// A compiled category override matcher.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Lowercased needle for a case-insensitive substring search.
    Substring(String),
    Pattern(Regex),
}

impl Matcher {
    /// Compile `raw`, treating `/.../` as a regular expression.
    ///
    /// # Errors
    /// Returns [Error::InvalidPattern] if the matcher is empty or the regular expression does
    /// not compile.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();

        if let Some(pattern) = raw
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
            .filter(|pattern| !pattern.is_empty())
        {
            return RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(Matcher::Pattern)
                .map_err(|error| Error::InvalidPattern(error.to_string()));
        }

        if raw.is_empty() {
            return Err(Error::InvalidPattern("matcher cannot be empty".to_owned()));
        }

        Ok(Matcher::Substring(raw.to_lowercase()))
    }

    #[inline]
    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Substring(needle) => text.to_lowercase().contains(needle),
            Matcher::Pattern(regex) => regex.is_match(text),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    matcher: Matcher,
    category: String,
    subcategory: Option<String>,
}

/// A user's category overrides compiled once for a batch, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct CategoryRules {
    rules: Vec<CompiledRule>,
}

impl CategoryRules {
    /// Compile `overrides`, which must already be in insertion order.
    ///
    /// Overrides whose matcher no longer compiles are logged and left out.
    pub fn compile(overrides: &[CategoryOverride]) -> Self {
        let rules = overrides
            .iter()
            .filter_map(|rule| match Matcher::parse(&rule.matcher) {
                Ok(matcher) => Some(CompiledRule {
                    matcher,
                    category: rule.category.clone(),
                    subcategory: rule.subcategory.clone().filter(|sub| !sub.is_empty()),
                }),
                Err(error) => {
                    tracing::warn!("ignoring category override {}: {error}", rule.id);
                    None
                }
            })
            .collect();

        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the category for a transaction with the given merchant name and description.
    ///
    /// Rules are tried in order, each against the merchant name and then the description.
    /// The first rule that matches wins.
    pub fn resolve(&self, merchant_name: Option<&str>, description: &str) -> Option<(&str, Option<&str>)> {
        self.rules
            .iter()
            .find(|rule| {
                merchant_name.is_some_and(|merchant| rule.matcher.is_match(merchant))
                    || rule.matcher.is_match(description)
            })
            .map(|rule| (rule.category.as_str(), rule.subcategory.as_deref()))
    }

    /// Assign the category of the first matching rule to `transaction`.
    ///
    /// Returns `true` if a rule matched. Without a match the transaction stays uncategorized.
    pub fn categorize(&self, transaction: &mut NewTransaction) -> bool {
        match self.resolve(
            transaction.merchant_name.as_deref(),
            &transaction.description_raw,
        ) {
            Some((category, subcategory)) => {
                transaction.category = Some(category.to_owned());
                transaction.subcategory = subcategory.map(str::to_owned);
                true
            }
            None => false,
        }
    }
}
