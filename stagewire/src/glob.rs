//! Shell-style file name patterns.
//!
//! - `*` matches zero or more characters
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]`, `[!abc]` / `[^abc]` character classes
//! - `{a,b}` alternatives (nested braces allowed)
//! - `\x` matches `x` literally
//!
//! Patterns apply to a single file name, never to a path. Besides plain
//! matching, a [`Pattern`] reports which brace alternative matched and what
//! each `*` consumed, which seed discovery uses to derive item keys.

use thiserror::Error;
use tracing::warn;

/// Upper bound on matcher steps so patterns like `*a*a*a*a*b` can't blow up.
const MAX_MATCH_CALLS: usize = 100_000;

/// The matcher ran out of steps before deciding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Pattern '{pattern}' is too complex to match against '{name}'")]
pub struct MatchBudgetExceeded {
    /// The pattern text.
    pub pattern: String,
    /// The file name being matched.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    Star,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

/// Result of a successful capture match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobMatch {
    /// Index of the brace alternative that matched, in expansion order.
    pub alternative: usize,
    /// Text consumed by each `*`, left to right.
    pub stars: Vec<String>,
}

/// A compiled file name pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    alternatives: Vec<Vec<Token>>,
}

impl Pattern {
    /// Compiles a pattern. Malformed classes degrade to literals.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let alternatives = expand_braces(pattern)
            .iter()
            .map(|alt| tokenize(alt))
            .collect();
        Self {
            source: pattern.to_string(),
            alternatives,
        }
    }

    /// The original pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of brace alternatives (1 when there are no braces).
    #[must_use]
    pub fn alternative_count(&self) -> usize {
        self.alternatives.len()
    }

    /// Returns true if `name` matches the whole pattern.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.captures(name).is_some()
    }

    /// Matches `name` and reports the alternative and star captures.
    ///
    /// A match abandoned for exceeding the step budget is logged and treated
    /// as no match; use [`Pattern::try_captures`] to tell the two apart.
    #[must_use]
    pub fn captures(&self, name: &str) -> Option<GlobMatch> {
        self.try_captures(name).unwrap_or_else(|err| {
            warn!(error = %err, "Giving up on pattern match");
            None
        })
    }

    /// Like [`Pattern::captures`], but reports an exhausted step budget.
    ///
    /// # Errors
    ///
    /// [`MatchBudgetExceeded`] when some alternative needs more than the
    /// matcher's step budget.
    pub fn try_captures(&self, name: &str) -> Result<Option<GlobMatch>, MatchBudgetExceeded> {
        let input: Vec<char> = name.chars().collect();
        for (index, tokens) in self.alternatives.iter().enumerate() {
            let mut spans = Vec::new();
            let mut calls = 0usize;
            if match_tokens(tokens, 0, &input, 0, &mut spans, &mut calls) {
                let stars = spans
                    .iter()
                    .map(|&(start, end)| input[start..end].iter().collect())
                    .collect();
                return Ok(Some(GlobMatch {
                    alternative: index,
                    stars,
                }));
            }
            if calls > MAX_MATCH_CALLS {
                return Err(MatchBudgetExceeded {
                    pattern: self.source.clone(),
                    name: name.to_string(),
                });
            }
        }
        Ok(None)
    }
}

/// Matches a file name against a pattern string.
#[must_use]
pub fn glob_match(pattern: &str, name: &str) -> bool {
    Pattern::new(pattern).matches(name)
}

/// Returns true if `s` contains glob metacharacters.
#[must_use]
pub fn contains_glob(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('[') || s.contains('{')
}

/// Expands `{a,b}` groups into every alternative, left to right.
#[must_use]
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let chars: Vec<char> = pattern.chars().collect();

    let mut depth = 0usize;
    let mut start = None;
    let mut end = None;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let (Some(start), Some(end)) = (start, end) else {
        return vec![pattern.to_string()];
    };

    let prefix: String = chars[..start].iter().collect();
    let suffix: String = chars[end + 1..].iter().collect();
    let body: String = chars[start + 1..end].iter().collect();

    split_alternatives(&body)
        .into_iter()
        .flat_map(|alt| expand_braces(&format!("{prefix}{alt}{suffix}")))
        .collect()
}

fn split_alternatives(body: &str) -> Vec<String> {
    let mut alternatives = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in body.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => alternatives.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    alternatives.push(current);
    alternatives
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                if tokens.last() != Some(&Token::Star) {
                    tokens.push(Token::Star);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::AnyOne);
                i += 1;
            }
            '\\' if i + 1 < chars.len() => {
                tokens.push(Token::Literal(chars[i + 1]));
                i += 2;
            }
            '[' => {
                if let Some((token, next)) = parse_class(&chars, i) {
                    tokens.push(token);
                    i = next;
                } else {
                    tokens.push(Token::Literal('['));
                    i += 1;
                }
            }
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }

    tokens
}

/// Parses `[...]` starting at `open`; returns the token and the index past `]`.
fn parse_class(chars: &[char], open: usize) -> Option<(Token, usize)> {
    let mut i = open + 1;
    let negated = matches!(chars.get(i), Some('!' | '^'));
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    let mut first = true;
    while i < chars.len() {
        let c = chars[i];
        if c == ']' && !first {
            return Some((Token::Class { negated, ranges }, i + 1));
        }
        first = false;
        if i + 2 < chars.len() && chars[i + 1] == '-' && chars[i + 2] != ']' {
            ranges.push((c, chars[i + 2]));
            i += 3;
        } else {
            ranges.push((c, c));
            i += 1;
        }
    }
    None
}

fn match_tokens(
    tokens: &[Token],
    ti: usize,
    input: &[char],
    ii: usize,
    spans: &mut Vec<(usize, usize)>,
    calls: &mut usize,
) -> bool {
    *calls += 1;
    if *calls > MAX_MATCH_CALLS {
        return false;
    }

    let Some(token) = tokens.get(ti) else {
        return ii == input.len();
    };

    match token {
        Token::Star => {
            for end in ii..=input.len() {
                spans.push((ii, end));
                if match_tokens(tokens, ti + 1, input, end, spans, calls) {
                    return true;
                }
                spans.pop();
            }
            false
        }
        Token::AnyOne => {
            ii < input.len() && match_tokens(tokens, ti + 1, input, ii + 1, spans, calls)
        }
        Token::Literal(c) => {
            input.get(ii) == Some(c) && match_tokens(tokens, ti + 1, input, ii + 1, spans, calls)
        }
        Token::Class { negated, ranges } => {
            let Some(&c) = input.get(ii) else {
                return false;
            };
            let in_class = ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
            in_class != *negated && match_tokens(tokens, ti + 1, input, ii + 1, spans, calls)
        }
    }
}
