//! Path matching for the route table.
//!
//! Literal paths are compared segment by segment (`:name` and `{name}`
//! capture one segment, a trailing `*` captures the rest). Regex paths are
//! anchored full matches. Request paths are normalized before matching.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;

use crate::resolver::normalize;

/// Parameter name under which a trailing `*` stores the matched remainder.
pub const WILDCARD_PARAM: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

#[derive(Debug, Clone)]
enum Kind {
    Segments { segments: Vec<Segment>, wildcard: bool },
    Regex { regex: Regex, names: Vec<String> },
}

#[derive(Clone)]
pub struct PathMatcher {
    raw: String,
    kind: Kind,
}

impl PathMatcher {
    pub fn literal(path: &str) -> Self {
        let raw = normalize(path);
        let mut parts: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        let wildcard = parts.last() == Some(&"*");
        if wildcard {
            parts.pop();
        }
        let segments = parts
            .into_iter()
            .map(|p| {
                if let Some(name) = p.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else if let Some(name) = p.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Static(p.to_string())
                }
            })
            .collect();
        Self {
            raw,
            kind: Kind::Segments { segments, wildcard },
        }
    }

    /// Compiles `pattern` as a full-path match. Unnamed groups are exposed
    /// as `param0`, `param1`, ... in group order.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        let mut unnamed = 0usize;
        let names = regex
            .capture_names()
            .skip(1)
            .map(|n| match n {
                Some(n) => n.to_string(),
                None => {
                    let name = format!("param{unnamed}");
                    unnamed += 1;
                    name
                }
            })
            .collect();
        Ok(Self {
            raw: pattern.to_string(),
            kind: Kind::Regex { regex, names },
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.kind, Kind::Regex { .. })
    }

    /// Captured parameters when `path` matches.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let path = normalize(path);
        match &self.kind {
            Kind::Regex { regex, names } => {
                let caps = regex.captures(&path)?;
                let params = names
                    .iter()
                    .enumerate()
                    .filter_map(|(i, name)| {
                        caps.get(i + 1)
                            .map(|m| (name.clone(), m.as_str().to_string()))
                    })
                    .collect();
                Some(params)
            }
            Kind::Segments { segments, wildcard } => {
                let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if parts.len() < segments.len() || (!wildcard && parts.len() != segments.len()) {
                    return None;
                }
                let mut params = HashMap::new();
                for (seg, part) in segments.iter().zip(&parts) {
                    match seg {
                        Segment::Static(s) if s == part => {}
                        Segment::Static(_) => return None,
                        Segment::Param(name) => {
                            let value = urlencoding::decode(part)
                                .map(|v| v.into_owned())
                                .unwrap_or_else(|_| (*part).to_string());
                            params.insert(name.clone(), value);
                        }
                    }
                }
                if *wildcard {
                    params.insert(
                        WILDCARD_PARAM.to_string(),
                        parts[segments.len()..].join("/"),
                    );
                }
                Some(params)
            }
        }
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathMatcher")
            .field("path", &self.raw)
            .field("regex", &self.is_regex())
            .finish()
    }
}
