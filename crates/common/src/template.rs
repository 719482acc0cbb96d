//! Placeholder templates
//!
//! Templates such as `{dag_id}/{task_id}/{try_number}.log` or
//! `[{asctime}] {levelname} - {message}` are parsed once and rendered many
//! times. `{{` and `}}` produce literal braces.

use std::fmt;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed placeholder template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses a template, rejecting unbalanced or empty placeholders
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut terminated = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            terminated = true;
                            break;
                        }
                        if c == '{' {
                            break;
                        }
                        name.push(c);
                    }
                    if !terminated {
                        return Err(Error::Template(format!(
                            "unclosed placeholder at offset {} in `{}`",
                            pos, source
                        )));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(Error::Template(format!(
                            "empty placeholder at offset {} in `{}`",
                            pos, source
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                }
                '}' => {
                    return Err(Error::Template(format!(
                        "unmatched `}}` at offset {} in `{}`",
                        pos, source
                    )));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The template text as configured
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Renders the template, failing on the first placeholder `lookup` cannot resolve
    pub fn render<F>(&self, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        return Err(Error::Template(format!(
                            "unknown placeholder `{}` in `{}`",
                            name, self.source
                        )))
                    }
                },
            }
        }
        Ok(out)
    }

    /// Renders the template, substituting an empty string for unknown placeholders
    pub fn render_lossy<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    if let Some(value) = lookup(name) {
                        out.push_str(&value);
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "dag_id" => Some("etl".to_string()),
            "try_number" => Some("3".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_render() {
        let template = Template::parse("{dag_id}/{ try_number }.log").unwrap();
        assert_eq!(template.render(lookup).unwrap(), "etl/3.log");
        assert_eq!(template.placeholders().collect::<Vec<_>>(), vec!["dag_id", "try_number"]);
    }

    #[test]
    fn test_escaped_braces() {
        let template = Template::parse("{{literal}} {dag_id}").unwrap();
        assert_eq!(template.render(lookup).unwrap(), "{literal} etl");
    }

    #[test]
    fn test_unknown_placeholder() {
        let template = Template::parse("{dag_id}/{owner}.log").unwrap();
        let err = template.render(lookup).unwrap_err();
        assert!(err.is_template());
        assert_eq!(template.render_lossy(lookup), "etl/.log");
    }

    #[test]
    fn test_malformed() {
        assert!(Template::parse("{dag_id").unwrap_err().is_template());
        assert!(Template::parse("dag_id}").unwrap_err().is_template());
        assert!(Template::parse("{}").unwrap_err().is_template());
        assert!(Template::parse("{a{b}").unwrap_err().is_template());
    }
}
