// Path and branch filter patterns
// Translates trigger-style globs into anchored regular expressions

use crate::error::{ParseError, ParseResult};

use regex::Regex;

/// A single glob compiled to an anchored regex
#[derive(Debug, Clone)]
pub struct Pattern {
    glob: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(glob: &str) -> ParseResult<Self> {
        let source = glob_to_regex(glob)?;
        let regex = Regex::new(&source).map_err(|e| {
            ParseError::validation(format!("Invalid pattern '{}': {}", glob, e))
        })?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Translate a glob into regex source.
///
/// `**` matches across `/`, `*` and `?` stay within one segment, and
/// `[...]` is a character class where a leading `!` negates it.
fn glob_to_regex(glob: &str) -> ParseResult<String> {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // `/**` at the end also matches the directory itself
                if i + 2 == chars.len() && out.ends_with('/') {
                    out.pop();
                    out.push_str("(/.*)?");
                } else {
                    out.push_str(".*");
                }
                i += 2;
                // `**/` may match zero directories
                if chars.get(i) == Some(&'/') && out.ends_with(".*") {
                    out.truncate(out.len() - 2);
                    out.push_str("(.*/)?");
                    i += 1;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i + 1)
                    .ok_or_else(|| {
                        ParseError::validation(format!(
                            "Invalid pattern '{}': unterminated character class",
                            glob
                        ))
                    })?;
                out.push('[');
                let mut body = &chars[i + 1..close];
                if body.first() == Some(&'!') {
                    out.push('^');
                    body = &body[1..];
                }
                for c in body {
                    if matches!(c, '\\' | '[' | ']' | '^') {
                        out.push('\\');
                    }
                    out.push(*c);
                }
                out.push(']');
                i = close + 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }

    out.push('$');
    Ok(out)
}

/// Include/exclude filter list. Entries starting with `!` exclude.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> ParseResult<Self> {
        let mut set = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            match entry.strip_prefix('!') {
                Some(exclude) => set.excludes.push(Pattern::new(exclude)?),
                None => set.includes.push(Pattern::new(entry)?),
            }
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// True when an include matches (or there are none) and no exclude does
    pub fn matches(&self, path: &str) -> bool {
        let included = self.includes.is_empty() || self.includes.iter().any(|p| p.is_match(path));
        included && !self.excludes.iter().any(|p| p.is_match(path))
    }
}
