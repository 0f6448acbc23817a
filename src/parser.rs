//! Script line parser
//!
//! Script syntax:
//! - `#` at line start is a section comment (handled by the engine)
//! - `#` mid-line ends the argument list
//! - `!` prefix: the command must fail
//! - `?` prefix: the command may fail
//! - Single quotes disable word splitting and variable expansion; `''`
//!   inside quotes is a literal `'`
//!
//! Variables (`$VAR`, `${VAR}`) are expanded by the engine, so arguments keep
//! track of which fragments were quoted.

use std::fmt;

/// A fragment of a parsed argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgFragment {
    pub s: String,
    /// Inside single quotes: not expanded
    pub quoted: bool,
}

/// A parsed script line
#[derive(Debug, Clone)]
pub struct ScriptLine {
    /// The command must fail
    pub negate: bool,
    /// The command may fail
    pub may_fail: bool,
    pub command: String,
    pub raw_args: Vec<Vec<ArgFragment>>,
    /// The line as written (for logs and error messages)
    pub raw: String,
    pub line_number: usize,
}

/// A syntax error on one line
#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl ParseError {
    fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// Parse a single script line.
///
/// Returns `Ok(None)` for blank and comment-only lines.
pub fn parse_line(line: &str, line_number: usize) -> Result<Option<ScriptLine>, ParseError> {
    let mut words = split_words(line, line_number)?.into_iter();

    let mut negate = false;
    let mut may_fail = false;
    let mut command = None;

    for word in words.by_ref() {
        let bare = match word.as_slice() {
            [ArgFragment { s, quoted: false }] => Some(s.as_str()),
            _ => None,
        };
        match bare {
            Some(prefix @ ("!" | "?")) => {
                if negate || may_fail {
                    return Err(ParseError::new("duplicated '!' or '?' token", line_number));
                }
                if prefix == "!" {
                    negate = true;
                } else {
                    may_fail = true;
                }
            }
            Some(name) => {
                command = Some(name.to_string());
                break;
            }
            None => return Err(ParseError::new("command name must be a bare word", line_number)),
        }
    }

    let Some(command) = command else {
        if negate || may_fail {
            return Err(ParseError::new("missing command", line_number));
        }
        return Ok(None);
    };

    Ok(Some(ScriptLine {
        negate,
        may_fail,
        command,
        raw_args: words.collect(),
        raw: line.to_string(),
        line_number,
    }))
}

/// Split a line into words made of fragments. Stops at an unquoted `#`.
fn split_words(line: &str, line_number: usize) -> Result<Vec<Vec<ArgFragment>>, ParseError> {
    let mut words = Vec::new();
    let mut word: Vec<ArgFragment> = Vec::new();
    let mut text = String::new();
    let mut chars = line.chars().peekable();

    fn flush_text(text: &mut String, word: &mut Vec<ArgFragment>) {
        if !text.is_empty() {
            word.push(ArgFragment {
                s: std::mem::take(text),
                quoted: false,
            });
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '#' => break,
            c if c.is_whitespace() => {
                flush_text(&mut text, &mut word);
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            '\'' => {
                flush_text(&mut text, &mut word);
                let mut quoted = String::new();
                loop {
                    match chars.next() {
                        None => return Err(ParseError::new("unterminated quoted argument", line_number)),
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            quoted.push('\'');
                        }
                        Some('\'') => break,
                        Some(c) => quoted.push(c),
                    }
                }
                word.push(ArgFragment {
                    s: quoted,
                    quoted: true,
                });
            }
            c => text.push(c),
        }
    }
    flush_text(&mut text, &mut word);
    if !word.is_empty() {
        words.push(word);
    }
    Ok(words)
}

/// Expand `$VAR` and `${VAR}` in `s`. Unknown variables expand to nothing;
/// `${/}` is the path separator.
///
/// With `in_regexp`, expanded values are escaped so they match literally.
pub fn expand_env(s: &str, lookup: &dyn Fn(&str) -> Option<String>, in_regexp: bool) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    let push_value = |out: &mut String, name: &str| {
        let value = lookup(name).unwrap_or_default();
        if in_regexp {
            out.push_str(&regex::escape(&value));
        } else {
            out.push_str(&value);
        }
    };

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            if name == "/" {
                out.push(std::path::MAIN_SEPARATOR);
            } else {
                push_value(&mut out, &name);
            }
            continue;
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if !(c.is_alphanumeric() || c == '_') {
                break;
            }
            name.push(c);
            chars.next();
        }
        if name.is_empty() {
            out.push('$');
        } else {
            push_value(&mut out, &name);
        }
    }
    out
}
