//! Matching rules for handler registrations.
//!
//! A [`Matcher`] carries everything about a registration except the handler
//! itself: its name, owning plugin, post-type allowlist, predicate and
//! `block` flag. Build one with [`on_message`], [`on_command`] or
//! [`Matcher::new`] and pass it to
//! [`Registry::register`](crate::Registry::register).
//!
//! # Example
//!
//! ```rust,ignore
//! use linbot_framework::{on_command, on_message};
//! use linbot_core::PostType;
//!
//! registry.register(on_command("/echo").block(true), echo);
//! registry.register(on_message().post_types([PostType::MessageSent]), log_sent);
//! registry.register(
//!     on_message().predicate(|_, text| MatchResult::from(text.contains("hello"))),
//!     greet,
//! );
//! ```

use std::fmt;
use std::sync::Arc;

use linbot_core::{Event, PostType};

/// Outcome of a predicate for one (handler, event) pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchResult {
    pub matched: bool,
    /// Text extracted by the predicate, bound to `CommandArgs`.
    pub remainder: Option<String>,
}

impl MatchResult {
    /// A match with no remainder.
    pub fn matched() -> Self {
        Self {
            matched: true,
            remainder: None,
        }
    }

    /// A match carrying extracted text.
    pub fn with_remainder(remainder: impl Into<String>) -> Self {
        Self {
            matched: true,
            remainder: Some(remainder.into()),
        }
    }

    pub fn no_match() -> Self {
        Self::default()
    }
}

impl From<bool> for MatchResult {
    fn from(matched: bool) -> Self {
        Self {
            matched,
            remainder: None,
        }
    }
}

/// A match predicate: `(handler name, raw text) -> MatchResult`.
pub type Predicate = Arc<dyn Fn(&str, &str) -> MatchResult + Send + Sync>;

/// Matches when `text` starts with the literal `prefix`.
///
/// The remainder is everything after the prefix; an empty remainder is
/// reported as a single space so that "matched with no arguments" is never
/// confused with "no remainder".
pub fn command_match(prefix: &str, text: &str) -> MatchResult {
    match text.strip_prefix(prefix) {
        Some("") => MatchResult::with_remainder(" "),
        Some(rest) => MatchResult::with_remainder(rest),
        None => MatchResult::no_match(),
    }
}

/// Registration metadata.
#[derive(Clone)]
pub struct Matcher {
    pub(crate) name: Option<String>,
    pub(crate) plugin: Option<String>,
    pub(crate) post_types: Option<Vec<PostType>>,
    pub(crate) predicate: Option<Predicate>,
    pub(crate) block: bool,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("name", &self.name)
            .field("plugin", &self.plugin)
            .field("post_types", &self.post_types)
            .field("has_predicate", &self.predicate.is_some())
            .field("block", &self.block)
            .finish()
    }
}

impl Matcher {
    /// Creates a matcher that accepts every event.
    pub fn new() -> Self {
        Self {
            name: None,
            plugin: None,
            post_types: None,
            predicate: None,
            block: false,
        }
    }

    /// Sets the registration name (defaults to the handler's function name).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the owning plugin explicitly instead of using the ambient label.
    pub fn plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    /// Restricts the registration to events of the given categories.
    pub fn post_types<I, P>(mut self, post_types: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PostType>,
    {
        self.post_types = Some(post_types.into_iter().map(Into::into).collect());
        self
    }

    /// Sets a custom predicate.
    pub fn predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) -> MatchResult + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(f));
        self
    }

    /// Stops later registrations from being considered once this one runs.
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Returns `false` if the event's category is outside the allowlist.
    pub fn allows(&self, event: &Event) -> bool {
        match &self.post_types {
            Some(allowed) => allowed.iter().any(|p| p.as_str() == event.post_type()),
            None => true,
        }
    }

    /// Runs the predicate; no predicate always matches.
    pub fn check(&self, name: &str, text: &str) -> MatchResult {
        match &self.predicate {
            Some(predicate) => predicate(name, text),
            None => MatchResult::matched(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.block
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Matches every event; handlers are filtered only by their parameter types.
pub fn on_message() -> Matcher {
    Matcher::new()
}

/// Matches message text starting with `prefix`.
///
/// The registration is named after the prefix, and the text after it is
/// available to the handler as [`CommandArgs`](crate::CommandArgs).
pub fn on_command(prefix: impl Into<String>) -> Matcher {
    let prefix = prefix.into();
    let literal = prefix.clone();
    Matcher::new()
        .name(prefix)
        .predicate(move |_, text| command_match(&literal, text))
}
