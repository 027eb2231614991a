// Command names and parameter parsing

//! # Command Names
//!
//! Custom commands always live under the reserved `--` prefix, which keeps
//! them apart from the host's own keywords (`close`, `show-modal`, ...).
//!
//! An invoked command string is `name[:param[:param...]]`. Names may
//! themselves contain the delimiter (`--dom:remove`), which is why the
//! registry resolves by longest prefix rather than by splitting first.
//! Parameters escape a literal `:` as `\:` and a literal backslash as `\\`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved marker that starts every custom command name
pub const COMMAND_PREFIX: &str = "--";

/// Separates a command name from its parameters, and parameters from each other
pub const PARAM_DELIMITER: char = ':';

/// Host-native command keywords that may never be registered
pub const NATIVE_COMMANDS: &[&str] = &[
    "show-modal",
    "close",
    "request-close",
    "show-popover",
    "hide-popover",
    "toggle-popover",
];

/// A normalized command name, always starting with [`COMMAND_PREFIX`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandName(String);

impl CommandName {
    /// Trim the raw name and add the reserved prefix if it is missing.
    ///
    /// Returns `None` for names that are empty once trimmed (including a bare `--`).
    ///
    /// ```rust
    /// # use command_invokers::CommandName;
    /// assert_eq!(CommandName::normalize("  toggle ").unwrap().as_str(), "--toggle");
    /// assert_eq!(CommandName::normalize("--dom:remove").unwrap().as_str(), "--dom:remove");
    /// assert!(CommandName::normalize("   ").is_none());
    /// ```
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let bare = trimmed.strip_prefix(COMMAND_PREFIX).unwrap_or(trimmed);
        if bare.trim().is_empty() {
            return None;
        }
        Some(CommandName(format!("{COMMAND_PREFIX}{bare}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name without the reserved prefix
    pub fn bare(&self) -> &str {
        &self.0[COMMAND_PREFIX.len()..]
    }

    /// Whether the bare name collides with a host-native keyword
    pub fn is_native_keyword(&self) -> bool {
        NATIVE_COMMANDS.contains(&self.bare())
    }

    /// Whether the last segment of the name is `toggle`, as in `--toggle`
    /// or `--class:toggle`
    pub fn is_toggle(&self) -> bool {
        self.bare().rsplit(PARAM_DELIMITER).next() == Some("toggle")
    }

    /// Whether `invoked` addresses this command: either exactly, or followed
    /// immediately by the parameter delimiter.
    pub fn matches(&self, invoked: &str) -> bool {
        match invoked.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(PARAM_DELIMITER),
            None => false,
        }
    }

    /// Parameters carried by `invoked` after this name. Empty when the
    /// invoked string is exactly the name.
    pub fn params_of(&self, invoked: &str) -> Vec<String> {
        match invoked.strip_prefix(self.0.as_str()) {
            Some(rest) if !rest.is_empty() => split_params(&rest[PARAM_DELIMITER.len_utf8()..]),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CommandName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Split a parameter string on unescaped delimiters, unescaping `\:` and `\\`.
///
/// Any other backslash sequence is kept verbatim. Always yields at least one
/// (possibly empty) parameter.
///
/// ```rust
/// # use command_invokers::models::split_params;
/// assert_eq!(split_params(r"a:b\:c:d\\e"), vec!["a", "b:c", r"d\e"]);
/// ```
pub fn split_params(raw: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(next) if next == PARAM_DELIMITER || next == '\\' => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            c if c == PARAM_DELIMITER => params.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    params.push(current);
    params
}

/// Split a comma-separated command list as found in the chain attribute
/// slots. Entries are trimmed and empty entries dropped.
pub fn split_command_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Edit distance used to suggest registered names for a mistyped command
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, a_ch) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr[j + 1] = (curr[j] + 1).min(prev[j + 1] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}
