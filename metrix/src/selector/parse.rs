//! Parser for `metric_name{key="value", ...}` selector text.

use crate::error::ParseError;
use crate::labels::{is_label_key_char, is_label_key_start};

use super::Selector;
use super::matcher::{LabelMatcher, MatchOp, MetricSelector};

/// Compiles selector text into a [`Selector::Metric`].
///
/// Accepted forms are a bare metric name (`up`), a name with label matchers
/// (`up{job="api",env!="dev"}`) and matchers alone (`{job="api"}`). The
/// operators are `=`, `!=`, `=*` (glob) and `!*` (negated glob). A trailing
/// comma inside the braces is allowed.
///
/// # Errors
///
/// Returns a [`ParseError`] pointing at the first offending byte.
///
/// # Examples
///
/// ```rust
/// use metrix::labels::LabelSet;
/// use metrix::selector::parse;
///
/// let sel = parse(r#"http_requests_total{job="api"}"#)?;
/// assert!(sel.matches("http_requests_total", &LabelSet::from_pairs(&[("job", "api")])));
/// assert!(!sel.matches("http_requests_total", &LabelSet::from_pairs(&[("job", "db")])));
/// # Ok::<(), metrix::error::ParseError>(())
/// ```
pub fn parse(text: &str) -> Result<Selector, ParseError> {
    Parser { src: text, pos: 0 }.selector()
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn selector(mut self) -> Result<Selector, ParseError> {
        self.skip_ws();
        let name = match self.peek() {
            None => return Err(self.error("empty selector")),
            Some(c) if is_name_start(c) => Some(self.metric_name()),
            Some('{') => None,
            Some(c) => return Err(self.error(format!("expected metric name or '{{', found '{c}'"))),
        };

        self.skip_ws();
        let mut matchers = Vec::new();
        if self.peek() == Some('{') {
            self.bump();
            matchers = self.matchers()?;
        }

        self.skip_ws();
        if let Some(c) = self.peek() {
            return Err(self.error(format!("unexpected trailing input starting at '{c}'")));
        }

        if name.is_none() && matchers.is_empty() {
            return Err(ParseError::new(0, "selector has neither a metric name nor label matchers"));
        }

        Ok(Selector::Metric(MetricSelector { name, matchers }))
    }

    /// Parses matchers after the opening brace, through the closing brace.
    fn matchers(&mut self) -> Result<Vec<LabelMatcher>, ParseError> {
        let mut matchers = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.bump();
                    return Ok(matchers);
                }
                None => return Err(self.error("unterminated '{'")),
                _ => {}
            }

            matchers.push(self.matcher()?);

            self.skip_ws();
            match self.peek() {
                Some(',') => self.bump(),
                Some('}') => {
                    self.bump();
                    return Ok(matchers);
                }
                None => return Err(self.error("unterminated '{'")),
                Some(c) => return Err(self.error(format!("expected ',' or '}}', found '{c}'"))),
            }
        }
    }

    fn matcher(&mut self) -> Result<LabelMatcher, ParseError> {
        let key = self.label_name()?;
        self.skip_ws();
        let op = self.op()?;
        self.skip_ws();
        let value = self.quoted()?;
        Ok(LabelMatcher::new(key, op, value))
    }

    fn metric_name(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !is_name_char(c) {
                break;
            }
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn label_name(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if is_label_key_start(c) => self.bump(),
            Some(c) => return Err(self.error(format!("expected label name, found '{c}'"))),
            None => return Err(self.error("expected label name")),
        }
        while let Some(c) = self.peek() {
            if !is_label_key_char(c) {
                break;
            }
            self.bump();
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn op(&mut self) -> Result<MatchOp, ParseError> {
        let op = match (self.peek(), self.peek_second()) {
            (Some('='), Some('*')) => MatchOp::Glob,
            (Some('='), Some('~')) | (Some('!'), Some('~')) => {
                return Err(self.error("regular expression matchers are not supported"));
            }
            (Some('='), _) => {
                self.bump();
                return Ok(MatchOp::Equal);
            }
            (Some('!'), Some('=')) => MatchOp::NotEqual,
            (Some('!'), Some('*')) => MatchOp::NotGlob,
            _ => return Err(self.error("expected one of '=', '!=', '=*', '!*'")),
        };
        self.bump();
        self.bump();
        Ok(op)
    }

    fn quoted(&mut self) -> Result<String, ParseError> {
        if self.peek() != Some('"') {
            return Err(self.error("expected '\"'"));
        }
        let open = self.pos;
        self.bump();

        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(ParseError::new(open, "unterminated string")),
                Some('"') => {
                    self.bump();
                    return Ok(value);
                }
                Some('\\') => {
                    self.bump();
                    let escaped = match self.peek() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(c) => return Err(self.error(format!("unknown escape '\\{c}'"))),
                        None => return Err(ParseError::new(open, "unterminated string")),
                    };
                    value.push(escaped);
                    self.bump();
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn error(&self, reason: impl Into<String>) -> ParseError {
        ParseError::new(self.pos, reason)
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':' || c == '*'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '-' | '*')
}

/// Returns `true` if `name` is a literal (non-glob) metric name the parser accepts.
pub(crate) fn is_literal_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c != '*' && is_name_start(c))
        && chars.all(|c| c != '*' && is_name_char(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;

    fn metric(sel: Selector) -> MetricSelector {
        match sel {
            Selector::Metric(m) => m,
            other => panic!("expected metric selector, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_name_and_matchers() {
        let sel = metric(parse(r#"http_requests_total{job="api", env!="dev"}"#).unwrap());
        assert_eq!(sel.name.as_deref(), Some("http_requests_total"));
        assert_eq!(
            sel.matchers,
            vec![
                LabelMatcher::equal("job", "api"),
                LabelMatcher::new("env", MatchOp::NotEqual, "dev"),
            ]
        );
    }

    #[test]
    fn test_parse_bare_name_with_dots() {
        let sel = metric(parse("svc.load").unwrap());
        assert_eq!(sel.name.as_deref(), Some("svc.load"));
        assert!(sel.matchers.is_empty());
    }

    #[test]
    fn test_parse_matchers_only_and_trailing_comma() {
        let sel = metric(parse(r#" { instance =* "web-*" , } "#).unwrap());
        assert_eq!(sel.name, None);
        assert_eq!(sel.matchers, vec![LabelMatcher::new("instance", MatchOp::Glob, "web-*")]);
    }

    #[test]
    fn test_parse_dotted_and_dashed_label_keys() {
        let sel = metric(parse(r#"svc.load{k8s.pod="web-1",app-name!="x"}"#).unwrap());
        assert_eq!(
            sel.matchers,
            vec![
                LabelMatcher::equal("k8s.pod", "web-1"),
                LabelMatcher::new("app-name", MatchOp::NotEqual, "x"),
            ]
        );
    }

    #[test]
    fn test_literal_names() {
        for good in ["up", "svc.load", "_x", "ns:sub-1"] {
            assert!(is_literal_name(good), "{good:?}");
        }
        for bad in ["", "9p", "disk/io", "a*", "*", "a b", "a?", "a+b", "naïve"] {
            assert!(!is_literal_name(bad), "{bad:?}");
        }
    }

    #[test]
    fn test_parse_escapes() {
        let sel = metric(parse(r#"m{path="a\"b\\c\n"}"#).unwrap());
        assert_eq!(sel.matchers[0].value, "a\"b\\c\n");
    }

    #[test]
    fn test_parse_empty_braces_after_name() {
        let sel = metric(parse("up{}").unwrap());
        assert_eq!(sel.name.as_deref(), Some("up"));
        assert!(sel.matchers.is_empty());
    }

    #[test]
    fn test_parse_errors() {
        let cases = [
            ("", 0),
            ("   ", 3),
            ("{}", 0),
            ("9up", 0),
            (r#"up{job="api""#, 12),
            (r#"up{job="api"#, 7),
            (r#"up{job:"api"}"#, 6),
            (r#"up{job=api}"#, 7),
            (r#"up{job=~"a.*"}"#, 6),
            (r#"up{job="a"} extra"#, 12),
            (r#"up{="a"}"#, 3),
            (r#"up{job="a" env="b"}"#, 11),
            (r#"up{job="\q"}"#, 9),
        ];

        for (input, offset) in cases {
            let err = parse(input).unwrap_err();
            assert_eq!(err.offset, offset, "input {input:?}: {err}");
        }
    }

    #[test]
    fn test_display_round_trip() {
        for input in [
            r#"up{job="api",env!="dev"}"#,
            r#"{instance=*"web-*"}"#,
            r#"svc.load{path!*"/tmp/\"x\""}"#,
            "svc.load",
        ] {
            let sel = parse(input).unwrap();
            let again = parse(&sel.to_string()).unwrap();
            assert_eq!(sel, again, "round trip of {input}");
        }
    }

    #[test]
    fn test_matches_subset_of_labels() {
        let sel = parse(r#"http_requests_total{job="api"}"#).unwrap();
        let labels = LabelSet::from_pairs(&[("job", "api"), ("instance", "a")]);

        assert!(sel.matches("http_requests_total", &labels));
        assert!(!sel.matches("http_requests", &labels));
        assert!(!sel.matches("http_requests_total", &LabelSet::from_pairs(&[("job", "db")])));
        assert!(!sel.matches("http_requests_total", &LabelSet::empty()));
    }
}
