//! Command syntax: prefixes, command names and arguments.
//!
//! A command message looks like `<prefix><name words> <args>`:
//!
//! - the main prefix (default `!`) is glued to the name: `!echo hi`;
//! - alternative prefixes are words such as the bot's name, matched
//!   case-insensitively and optionally followed by `,` or `:`:
//!   `natter, echo hi`;
//! - direct messages may omit the prefix entirely when
//!   `prefix_optional_on_chat` is set.
//!
//! Command names may span several words (`flows start`). Matching a name
//! against a message is case-insensitive and word-based.

mod split;

use serde::Serialize;

pub use split::shell_split;

use natter_core::Message;

// =============================================================================
// CommandSpec
// =============================================================================

/// Static description of a command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandSpec {
    name: String,
    #[serde(skip)]
    words: Vec<String>,
    help: String,
    admin_only: bool,
    hidden: bool,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        let words = name
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>();
        Self {
            name: words.join(" "),
            words,
            help: String::new(),
            admin_only: false,
            hidden: false,
        }
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Restricts the command to configured bot admins.
    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }

    /// Hides the command from `help` listings.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help_text(&self) -> &str {
        &self.help
    }

    pub fn is_admin_only(&self) -> bool {
        self.admin_only
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// If `text` starts with this command's words, returns the remaining
    /// argument text.
    pub fn match_text<'a>(&self, text: &'a str) -> Option<&'a str> {
        match_words(&self.words, text)
    }
}

impl From<&str> for CommandSpec {
    fn from(name: &str) -> Self {
        CommandSpec::new(name)
    }
}

impl From<String> for CommandSpec {
    fn from(name: String) -> Self {
        CommandSpec::new(name)
    }
}

/// Matches `words` case-insensitively against the leading words of `text`,
/// returning the untouched remainder.
pub(crate) fn match_words<'a>(words: &[String], text: &'a str) -> Option<&'a str> {
    if words.is_empty() {
        return None;
    }
    let mut rest = text.trim_start();
    for word in words {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if !rest[..end].eq_ignore_ascii_case(word) {
            return None;
        }
        rest = rest[end..].trim_start();
    }
    Some(rest)
}

// =============================================================================
// Parsing
// =============================================================================

/// Text of a message once its command prefix has been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stripped<'a> {
    pub text: &'a str,
    /// `true` when a prefix was actually written, `false` for a bare direct
    /// message accepted through `prefix_optional_on_chat`.
    pub explicit: bool,
}

/// Recognises command prefixes.
#[derive(Debug, Clone)]
pub struct CommandParser {
    prefix: String,
    alt_prefixes: Vec<String>,
    prefix_optional_on_chat: bool,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new("!")
    }
}

impl CommandParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            alt_prefixes: Vec::new(),
            prefix_optional_on_chat: false,
        }
    }

    pub fn with_alt_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alt_prefixes = prefixes
            .into_iter()
            .map(|p| p.into().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    pub fn prefix_optional_on_chat(mut self, optional: bool) -> Self {
        self.prefix_optional_on_chat = optional;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Strips the command prefix from `message`, if it has one.
    pub fn strip<'a>(&self, message: &'a Message) -> Option<Stripped<'a>> {
        let body = message.body.trim();
        if let Some(text) = body.strip_prefix(self.prefix.as_str()) {
            return Some(Stripped {
                text,
                explicit: true,
            });
        }
        for alt in &self.alt_prefixes {
            if let Some(text) = strip_alt_prefix(body, alt) {
                return Some(Stripped {
                    text,
                    explicit: true,
                });
            }
        }
        if self.prefix_optional_on_chat && message.is_direct() {
            return Some(Stripped {
                text: body,
                explicit: false,
            });
        }
        None
    }

    /// The text flow command triggers are matched against: the stripped
    /// command text when there is one, the bare body otherwise.
    pub fn command_text<'a>(&self, message: &'a Message) -> &'a str {
        self.strip(message)
            .map(|s| s.text)
            .unwrap_or_else(|| message.body.trim())
    }
}

fn strip_alt_prefix<'a>(body: &'a str, alt: &str) -> Option<&'a str> {
    let head = body.get(..alt.len())?;
    if !head.eq_ignore_ascii_case(alt) {
        return None;
    }
    let rest = &body[alt.len()..];
    let rest = match rest.strip_prefix([',', ':']) {
        Some(rest) => rest,
        // `natterbot` must not match the alt prefix `natter`.
        None if !rest.is_empty() && !rest.starts_with(char::is_whitespace) => return None,
        None => rest,
    };
    Some(rest.trim_start())
}

// =============================================================================
// Invocation
// =============================================================================

/// Arguments that followed a command name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    raw: String,
}

impl Args {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into().trim().to_owned(),
        }
    }

    /// The argument text exactly as written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Shell-style split honouring quotes and escapes.
    pub fn split(&self) -> Vec<String> {
        shell_split(&self.raw)
    }
}

/// A resolved command call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Args,
}
