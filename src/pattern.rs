//! Route pattern compiler.
//!
//! A pattern is literal text interleaved with variables:
//!
//! ```text
//! /users/{id:\d+}/posts/{slug}
//!        ^^^^^^^^       ^^^^^^ variable, regex defaults to [^/]+
//! ```
//!
//! Optional trailing sections are written with brackets and may nest, but
//! only at the very end of the pattern:
//!
//! ```text
//! /archive[/{year:\d{4}}[/{month:\d{2}}]]
//! ```
//!
//! expands into three variants: `/archive`, `/archive/{year}` and
//! `/archive/{year}/{month}`. Every variant is compiled into one anchored
//! regex with a named capture group per variable; the router feeds those
//! regexes into a [`RegexSet`](regex::RegexSet).

use std::fmt;

use regex::Regex;

use crate::error::{MalformedPattern, PatternErrorKind};

/// Matches one path segment when a variable does not name its own regex.
pub const DEFAULT_VARIABLE_REGEX: &str = "[^/]+";

/// Prefix of the capture group names generated for variables. Variable names
/// may contain `-`, which regex group names may not.
const GROUP_PREFIX: &str = "__kite";

// ── Segments ──────────────────────────────────────────────────────────────────

/// One piece of a compiled route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Variable(Variable),
}

/// A named route variable and the regex its value must satisfy.
#[derive(Clone)]
pub struct Variable {
    name: String,
    pattern: String,
    anchored: Regex,
}

impl Variable {
    fn new(name: String, pattern: String) -> Result<Self, PatternErrorKind> {
        let anchored = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            PatternErrorKind::InvalidRegex { name: name.clone(), source }
        })?;
        Ok(Self { name, pattern, anchored })
    }

    pub fn name(&self) -> &str { &self.name }

    /// The regex as written in the pattern, without anchors.
    pub fn pattern(&self) -> &str { &self.pattern }

    /// Whether `value` satisfies the variable's regex in full.
    pub fn accepts(&self, value: &str) -> bool {
        self.anchored.is_match(value)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .finish()
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.pattern == other.pattern
    }
}

impl Eq for Variable {}

// ── Params ────────────────────────────────────────────────────────────────────

/// Variables extracted from a matched path, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self { Self(Vec::new()) }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for Params {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

// ── CompiledPattern ───────────────────────────────────────────────────────────

/// A pattern without optional sections, ready for matching.
#[derive(Clone, Debug)]
pub struct CompiledPattern {
    source: String,
    segments: Vec<Segment>,
    matcher: Regex,
}

impl CompiledPattern {
    fn new(source: String, segments: Vec<Segment>) -> Result<Self, PatternErrorKind> {
        let mut re = String::from("^");
        let mut group = 0usize;
        for segment in &segments {
            match segment {
                Segment::Literal(text) => re.push_str(&regex::escape(text)),
                Segment::Variable(var) => {
                    re.push_str(&format!("(?P<{GROUP_PREFIX}{group}>{})", var.pattern));
                    group += 1;
                }
            }
        }
        re.push('$');

        // Each variable regex compiled on its own already; a failure here
        // means two of them combine badly (e.g. clashing group names).
        let matcher = Regex::new(&re).map_err(|source| PatternErrorKind::InvalidRegex {
            name: source_name(&segments),
            source,
        })?;
        Ok(Self { source, segments, matcher })
    }

    /// The variant's pattern text, with optional brackets removed.
    pub fn source(&self) -> &str { &self.source }

    pub fn segments(&self) -> &[Segment] { &self.segments }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(v) => Some(v),
            Segment::Literal(_) => None,
        })
    }

    /// True when the pattern has no variables and matches exactly one path.
    pub fn is_static(&self) -> bool {
        self.variables().next().is_none()
    }

    /// The literal path of a static pattern.
    pub(crate) fn static_path(&self) -> Option<String> {
        if !self.is_static() {
            return None;
        }
        Some(self.segments.iter().map(|s| match s {
            Segment::Literal(text) => text.as_str(),
            Segment::Variable(_) => "",
        }).collect())
    }

    pub(crate) fn regex_source(&self) -> &str { self.matcher.as_str() }

    /// Matches the whole of `path`, returning the variables on success.
    pub fn captures(&self, path: &str) -> Option<Params> {
        let caps = self.matcher.captures(path)?;
        let mut params = Params::new();
        for (i, var) in self.variables().enumerate() {
            let value = caps.name(&format!("{GROUP_PREFIX}{i}"))?;
            params.push(var.name.as_str(), value.as_str());
        }
        Some(params)
    }
}

fn source_name(segments: &[Segment]) -> String {
    segments.iter().filter_map(|s| match s {
        Segment::Variable(v) => Some(v.name.as_str()),
        Segment::Literal(_) => None,
    }).collect::<Vec<_>>().join(",")
}

// ── Compilation ───────────────────────────────────────────────────────────────

/// Compiles a pattern that has no optional sections.
pub fn compile(pattern: &str) -> Result<CompiledPattern, MalformedPattern> {
    let mut variants = compile_variants(pattern)?;
    if variants.len() != 1 {
        return Err(malformed(pattern, PatternErrorKind::UnexpectedOptional));
    }
    Ok(variants.remove(0))
}

/// Compiles every variant of a pattern, shortest first.
pub fn compile_variants(pattern: &str) -> Result<Vec<CompiledPattern>, MalformedPattern> {
    let tokens = tokenize(pattern).map_err(|kind| malformed(pattern, kind))?;
    let parts = split_optionals(tokens).map_err(|kind| malformed(pattern, kind))?;

    let mut seen: Vec<&str> = Vec::new();
    for token in parts.iter().flatten() {
        if let Token::Variable { name, .. } = token {
            if seen.contains(&name.as_str()) {
                return Err(malformed(pattern, PatternErrorKind::DuplicateVariable(name.clone())));
            }
            seen.push(name.as_str());
        }
    }

    let mut variants = Vec::with_capacity(parts.len());
    let mut source = String::new();
    let mut segments: Vec<Segment> = Vec::new();
    for part in &parts {
        for token in part {
            match token {
                Token::Text(text) => {
                    source.push_str(text);
                    match segments.last_mut() {
                        Some(Segment::Literal(prev)) => prev.push_str(text),
                        _ => segments.push(Segment::Literal(text.clone())),
                    }
                }
                Token::Variable { name, regex, .. } => {
                    match regex {
                        Some(re) => source.push_str(&format!("{{{name}:{re}}}")),
                        None => source.push_str(&format!("{{{name}}}")),
                    }
                    let re = regex.clone().unwrap_or_else(|| DEFAULT_VARIABLE_REGEX.to_owned());
                    let var = Variable::new(name.clone(), re).map_err(|k| malformed(pattern, k))?;
                    segments.push(Segment::Variable(var));
                }
                Token::Open(_) | Token::Close(_) => {}
            }
        }
        let compiled = CompiledPattern::new(source.clone(), segments.clone())
            .map_err(|k| malformed(pattern, k))?;
        variants.push(compiled);
    }
    Ok(variants)
}

fn malformed(pattern: &str, kind: PatternErrorKind) -> MalformedPattern {
    MalformedPattern { pattern: pattern.to_owned(), kind }
}

#[derive(Debug)]
enum Token {
    Text(String),
    Variable { name: String, regex: Option<String> },
    Open(usize),
    Close(usize),
}

fn tokenize(pattern: &str) -> Result<Vec<Token>, PatternErrorKind> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut chars = pattern.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '{' => {
                if !text.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut text)));
                }
                // Regexes may contain their own braces (`\d{4}`); track depth.
                let mut depth = 1usize;
                let mut body = String::new();
                for (_, c) in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    body.push(c);
                }
                if depth != 0 {
                    return Err(PatternErrorKind::Unbalanced { delimiter: '{', offset });
                }
                tokens.push(parse_variable(&body, offset)?);
            }
            '}' => return Err(PatternErrorKind::Unbalanced { delimiter: '}', offset }),
            '[' | ']' => {
                if !text.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut text)));
                }
                tokens.push(if c == '[' { Token::Open(offset) } else { Token::Close(offset) });
            }
            _ => text.push(c),
        }
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    Ok(tokens)
}

fn parse_variable(body: &str, offset: usize) -> Result<Token, PatternErrorKind> {
    let (name, regex) = match body.split_once(':') {
        Some((name, regex)) => (name.trim(), Some(regex.trim())),
        None => (body.trim(), None),
    };
    if !is_identifier(name) {
        return Err(PatternErrorKind::InvalidVariableName { name: name.to_owned(), offset });
    }
    Ok(Token::Variable {
        name: name.to_owned(),
        regex: regex.filter(|r| !r.is_empty()).map(str::to_owned),
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Splits the token stream at each `[`, checking that every `]` sits at the
/// end of the pattern. The first part is the mandatory base.
fn split_optionals(tokens: Vec<Token>) -> Result<Vec<Vec<Token>>, PatternErrorKind> {
    let mut parts: Vec<Vec<Token>> = vec![Vec::new()];
    let mut open = 0usize;
    let mut last_open = 0usize;
    let mut closing = false;

    for token in tokens {
        match token {
            Token::Open(offset) => {
                if closing {
                    return Err(PatternErrorKind::OptionalNotTrailing);
                }
                if open > 0 && parts.last().is_some_and(Vec::is_empty) {
                    return Err(PatternErrorKind::EmptyOptional);
                }
                open += 1;
                last_open = offset;
                parts.push(Vec::new());
            }
            Token::Close(offset) => {
                if open == 0 {
                    return Err(PatternErrorKind::Unbalanced { delimiter: ']', offset });
                }
                if !closing && parts.last().is_some_and(Vec::is_empty) {
                    return Err(PatternErrorKind::EmptyOptional);
                }
                open -= 1;
                closing = true;
            }
            other => {
                if closing {
                    return Err(PatternErrorKind::OptionalNotTrailing);
                }
                if let Some(part) = parts.last_mut() {
                    part.push(other);
                }
            }
        }
    }

    if open > 0 {
        return Err(PatternErrorKind::Unbalanced { delimiter: '[', offset: last_open });
    }
    Ok(parts)
}
