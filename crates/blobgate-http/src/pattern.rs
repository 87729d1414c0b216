//! Route pattern grammar.
//!
//! A pattern has the form `[METHOD ][HOST]/[PATH]`:
//!
//! - `METHOD` is an HTTP token followed by at least one space or tab.
//! - `HOST` is everything before the first `/` and may not contain `{`.
//! - `PATH` is a sequence of `/`-separated segments. A segment is a literal,
//!   a single-segment wildcard `{name}`, a trailing multi-segment wildcard
//!   `{name...}`, or the end marker `{$}`. A path ending in `/` matches any
//!   path with that prefix.
//!
//! Patterns with a method other than `CONNECT` must use a canonical path,
//! since request paths are cleaned before matching.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use http::Method;
use percent_encoding::percent_decode_str;

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    method: Option<Method>,
    host: String,
    path: String,
    segments: Vec<Segment>,
}

/// One path segment of a [`Pattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Matches exactly this (percent-decoded) text.
    Literal(String),
    /// `{name}`: matches any single non-empty segment.
    Wildcard(String),
    /// `{name...}`: matches the remainder of the path. An empty name is the
    /// anonymous wildcard implied by a trailing `/`.
    Rest(String),
    /// `{$}`: matches only the end of a path that ends in `/`.
    End,
}

/// Why a pattern string was rejected, and where.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pattern at offset {offset}: {kind}")]
pub struct PatternError {
    /// Byte offset into the pattern string where the problem was detected.
    pub offset: usize,
    /// What is wrong.
    pub kind: PatternErrorKind,
}

/// Categories of [`PatternError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternErrorKind {
    /// The pattern string is empty.
    #[error("empty pattern")]
    EmptyPattern,
    /// The method is not an HTTP token.
    #[error("invalid method {0:?}")]
    InvalidMethod(String),
    /// There is no `/` to start the path.
    #[error("host/path missing /")]
    MissingSlash,
    /// The host contains `{`, usually a missing leading `/`.
    #[error("host contains '{{' (missing initial '/'?)")]
    MalformedHost,
    /// A non-`CONNECT` pattern whose path is not canonical.
    #[error("non-CONNECT pattern with unclean path can never match")]
    UncleanPath,
    /// Braces that do not span a whole segment.
    #[error("bad wildcard segment (must be '{{name}}', '{{name...}}' or '{{$}}')")]
    BadWildcard,
    /// `{}` or `{...}`.
    #[error("empty wildcard name")]
    EmptyWildcardName,
    /// A wildcard name that is not an identifier.
    #[error("bad wildcard name {0:?}")]
    InvalidWildcardName(String),
    /// `{$}` or `{name...}` followed by more segments.
    #[error("{{$}} and {{name...}} must be the final segment")]
    MisplacedWildcard,
    /// The same wildcard name used twice.
    #[error("duplicate wildcard name {0:?}")]
    DuplicateWildcard(String),
}

impl PatternErrorKind {
    fn at(self, offset: usize) -> PatternError {
        PatternError { offset, kind: self }
    }
}

impl Pattern {
    /// Parse a pattern string.
    ///
    /// # Examples
    ///
    /// ```
    /// use blobgate_http::pattern::{Pattern, Segment};
    ///
    /// let p = Pattern::parse("GET /cloud-storage/files/{file}").unwrap();
    /// assert_eq!(p.method().map(http::Method::as_str), Some("GET"));
    /// assert_eq!(p.host(), "");
    /// assert_eq!(p.segments().last(), Some(&Segment::Wildcard("file".into())));
    /// ```
    pub fn parse(s: &str) -> Result<Self, PatternError> {
        if s.is_empty() {
            return Err(PatternErrorKind::EmptyPattern.at(0));
        }

        let (method, rest) = match s.find([' ', '\t']) {
            Some(i) => (Some(&s[..i]), s[i + 1..].trim_start_matches([' ', '\t'])),
            None => (None, s),
        };
        let method = match method {
            Some(m) if is_token(m) => Some(
                Method::from_bytes(m.as_bytes())
                    .map_err(|_| PatternErrorKind::InvalidMethod(m.to_owned()).at(0))?,
            ),
            Some(m) => return Err(PatternErrorKind::InvalidMethod(m.to_owned()).at(0)),
            None => None,
        };

        let rest_start = s.len() - rest.len();
        let slash = rest
            .find('/')
            .ok_or_else(|| PatternErrorKind::MissingSlash.at(rest_start))?;
        let (host, path) = rest.split_at(slash);
        if let Some(j) = host.find('{') {
            return Err(PatternErrorKind::MalformedHost.at(rest_start + j));
        }

        let path_start = rest_start + slash;
        if method.as_ref().is_some_and(|m| *m != Method::CONNECT) && path != clean_path(path) {
            return Err(PatternErrorKind::UncleanPath.at(path_start));
        }

        let segments = parse_segments(path, path_start)?;
        Ok(Self {
            method,
            host: host.to_owned(),
            path: path.to_owned(),
            segments,
        })
    }

    /// The method this pattern is restricted to, if any.
    #[must_use]
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// The host this pattern is restricted to; empty for any host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The path part as written, starting with `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The parsed path segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of all named wildcards, in order.
    pub fn wildcard_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Wildcard(name) => Some(name.as_str()),
            Segment::Rest(name) if !name.is_empty() => Some(name.as_str()),
            _ => None,
        })
    }
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(method) = &self.method {
            write!(f, "{method} ")?;
        }
        write!(f, "{}{}", self.host, self.path)
    }
}

fn parse_segments(path: &str, path_start: usize) -> Result<Vec<Segment>, PatternError> {
    let mut segments = Vec::new();
    let mut seen = HashSet::new();
    let mut rest = &path[1..];
    let mut offset = path_start + 1;

    loop {
        if rest.is_empty() {
            // Trailing slash: match everything below this prefix.
            segments.push(Segment::Rest(String::new()));
            break;
        }
        let (seg, tail) = match rest.find('/') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };

        let segment = parse_segment(seg, offset)?;
        match &segment {
            Segment::End | Segment::Rest(_) if tail.is_some() => {
                return Err(PatternErrorKind::MisplacedWildcard.at(offset));
            }
            Segment::Wildcard(name) | Segment::Rest(name) if !seen.insert(name.clone()) => {
                return Err(PatternErrorKind::DuplicateWildcard(name.clone()).at(offset));
            }
            _ => {}
        }
        segments.push(segment);

        match tail {
            Some(tail) => {
                offset += seg.len() + 1;
                rest = tail;
            }
            None => break,
        }
    }

    Ok(segments)
}

fn parse_segment(seg: &str, offset: usize) -> Result<Segment, PatternError> {
    let Some(brace) = seg.find('{') else {
        return Ok(Segment::Literal(
            percent_decode_str(seg).decode_utf8_lossy().into_owned(),
        ));
    };
    if brace != 0 || !seg.ends_with('}') {
        return Err(PatternErrorKind::BadWildcard.at(offset + brace));
    }

    let name = &seg[1..seg.len() - 1];
    if name == "$" {
        return Ok(Segment::End);
    }
    let (name, rest) = match name.strip_suffix("...") {
        Some(name) => (name, true),
        None => (name, false),
    };
    if name.is_empty() {
        return Err(PatternErrorKind::EmptyWildcardName.at(offset));
    }
    if !is_identifier(name) {
        return Err(PatternErrorKind::InvalidWildcardName(name.to_owned()).at(offset));
    }
    Ok(if rest {
        Segment::Rest(name.to_owned())
    } else {
        Segment::Wildcard(name.to_owned())
    })
}

/// Return the canonical form of `path`.
///
/// Removes `.` and `..` elements and duplicate slashes, roots the path at
/// `/`, and keeps a trailing slash when the input had one.
///
/// # Examples
///
/// ```
/// use blobgate_http::pattern::clean_path;
///
/// assert_eq!(clean_path("/a/./b/../c/"), "/a/c/");
/// assert_eq!(clean_path("a//b"), "/a/b");
/// assert_eq!(clean_path(""), "/");
/// ```
#[must_use]
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }

    let mut kept: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                kept.pop();
            }
            seg => kept.push(seg),
        }
    }

    let mut cleaned = String::with_capacity(path.len() + 1);
    for seg in &kept {
        cleaned.push('/');
        cleaned.push_str(seg);
    }
    if cleaned.is_empty() {
        cleaned.push('/');
    } else if path.ends_with('/') {
        cleaned.push('/');
    }
    cleaned
}

/// Whether `s` is a non-empty HTTP token (RFC 9110 `tchar`s).
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
}
