//! Wildcard matching for stacked file names and paths
//!
//! Supports wildcards:
//! - `*` - Matches any run of characters, including `/`
//! - `?` - Matches exactly one character
//!
//! Matching is case-sensitive and anchored to the whole candidate. Path
//! separators are normalized to `/` on both sides before matching.

use crate::stack::error::{Result, StackError};
use regex::Regex;
use std::path::Path;

/// Compiled file pattern
#[derive(Debug, Clone)]
pub struct FilePattern {
    source: String,
    regex: Regex,
}

impl FilePattern {
    /// Compile a wildcard pattern
    ///
    /// # Examples
    /// ```
    /// use blockstack::stack::FilePattern;
    ///
    /// let pattern = FilePattern::new("report-*.txt").unwrap();
    /// assert!(pattern.matches("report-2024.txt"));
    /// assert!(!pattern.matches("report-2024.csv"));
    /// ```
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(StackError::InvalidPattern(
                "pattern cannot be empty".to_string(),
            ));
        }

        let normalized = normalize(pattern);
        let mut expr = String::with_capacity(normalized.len() + 8);
        expr.push('^');
        for c in normalized.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| StackError::InvalidPattern(format!("'{}': {}", pattern, e)))?;

        Ok(FilePattern {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(&normalize(candidate))
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        self.matches(&path.to_string_lossy())
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn normalize(value: &str) -> String {
    value.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let pattern = FilePattern::new("notes.txt").unwrap();
        assert!(pattern.matches("notes.txt"));
        assert!(!pattern.matches("notes.txt.bak"));
        assert!(!pattern.matches("my-notes.txt"));
    }

    #[test]
    fn test_star_wildcard() {
        let pattern = FilePattern::new("*.txt").unwrap();
        assert!(pattern.matches("a.txt"));
        assert!(pattern.matches(".txt"));
        assert!(!pattern.matches("a.txt.gz"));
    }

    #[test]
    fn test_question_wildcard() {
        let pattern = FilePattern::new("file-?.log").unwrap();
        assert!(pattern.matches("file-1.log"));
        assert!(!pattern.matches("file-10.log"));
        assert!(!pattern.matches("file-.log"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = FilePattern::new("a+b(1).txt").unwrap();
        assert!(pattern.matches("a+b(1).txt"));
        assert!(!pattern.matches("aab1.txt"));
    }

    #[test]
    fn test_paths_normalize_separators() {
        let pattern = FilePattern::new("*/docs/*.md").unwrap();
        assert!(pattern.matches("C:\\work\\docs\\readme.md"));
        assert!(pattern.matches_path(Path::new("/home/me/docs/readme.md")));
        assert!(!pattern.matches("/home/me/src/readme.md"));
    }

    #[test]
    fn test_case_sensitive() {
        let pattern = FilePattern::new("README*").unwrap();
        assert!(!pattern.matches("readme.md"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(matches!(
            FilePattern::new(""),
            Err(StackError::InvalidPattern(_))
        ));
    }
}
