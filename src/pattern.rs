use regex::Regex;
use tracing::warn;

/// A shell-style glob compiled into an anchored regex.
///
/// Only `*` (zero or more characters) and `?` (exactly one character) are
/// treated as metacharacters; everything else matches literally. An empty
/// pattern matches everything. A pattern that fails to compile matches
/// nothing, so a bad skip-list entry can never select or drop more than
/// intended.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Option<Regex>,
}

impl Pattern {
    pub fn compile(glob: &str) -> Self {
        let mut expr = String::with_capacity(glob.len() + 8);
        expr.push('^');
        for ch in glob.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                _ => expr.push_str(&regex::escape(&ch.to_string())),
            }
        }
        expr.push('$');

        let regex = match Regex::new(&expr) {
            Ok(re) => Some(re),
            Err(err) => {
                warn!("Ignoring unusable pattern '{}': {}", glob, err);
                None
            }
        };

        Pattern {
            source: glob.to_string(),
            regex,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        if self.source.is_empty() {
            return true;
        }
        match &self.regex {
            Some(re) => re.is_match(candidate),
            None => false,
        }
    }
}

/// A comma-separated list of globs, used for workspace selection and for
/// the variable skip filter.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    pub fn parse(list: &str) -> Self {
        let patterns = list
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Pattern::compile)
            .collect();
        PatternList { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True when the list is exactly one `*`, meaning "everything".
    pub fn matches_all(&self) -> bool {
        self.patterns.len() == 1 && self.patterns[0].source() == "*"
    }

    pub fn is_match_any(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(candidate))
    }
}
