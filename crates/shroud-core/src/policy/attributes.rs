//! A gitattributes evaluator covering what the policy needs: glob patterns,
//! set/unset/unspecified/value states and directory precedence.

use std::collections::HashMap;

use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

/// State of one attribute for one path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttrState {
    /// Not mentioned, or reset with `!attr`.
    #[default]
    Unspecified,
    /// `attr`
    Set,
    /// `-attr`
    Unset,
    /// `attr=value`
    Value(String),
}

#[derive(Debug)]
struct Rule {
    matcher: GlobMatcher,
    /// Pattern had no `/`: match the basename at any depth.
    basename_only: bool,
    assignments: Vec<(String, AttrState)>,
}

/// The rules of one `.gitattributes` file (or of the site-level rule list),
/// scoped to the directory it was found in.
#[derive(Debug)]
pub struct AttributeFile {
    dir: String,
    rules: Vec<Rule>,
}

fn parse_assignment(token: &str) -> Option<(String, AttrState)> {
    let (name, state) = if let Some(name) = token.strip_prefix('-') {
        (name, AttrState::Unset)
    } else if let Some(name) = token.strip_prefix('!') {
        (name, AttrState::Unspecified)
    } else if let Some((name, value)) = token.split_once('=') {
        (name, AttrState::Value(value.to_string()))
    } else {
        (token, AttrState::Set)
    };
    if name.is_empty() {
        None
    } else {
        Some((name.to_string(), state))
    }
}

impl AttributeFile {
    /// Parse attribute lines that apply below `dir` ("" for the top level).
    pub fn parse(dir: &str, text: &str) -> Self {
        let mut rules = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("[attr]") {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(pattern) = tokens.next() else {
                continue;
            };
            if pattern.starts_with('!') {
                warn!(dir, pattern, "negative patterns are ignored in attribute files");
                continue;
            }
            if pattern.ends_with('/') {
                // directory-only patterns never match a file
                continue;
            }
            let assignments: Vec<_> = tokens.filter_map(parse_assignment).collect();
            if assignments.is_empty() {
                continue;
            }

            let anchored = pattern.strip_prefix('/').unwrap_or(pattern);
            let basename_only = !pattern.contains('/');
            let matcher = match GlobBuilder::new(anchored)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
            {
                Ok(glob) => glob.compile_matcher(),
                Err(e) => {
                    warn!(dir, pattern, error = %e, "skipping invalid attribute pattern");
                    continue;
                }
            };
            rules.push(Rule {
                matcher,
                basename_only,
                assignments,
            });
        }
        Self {
            dir: dir.trim_matches('/').to_string(),
            rules,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Path relative to this file's directory, if `path` lies below it.
    fn relative<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.dir.is_empty() {
            return Some(path);
        }
        path.strip_prefix(self.dir.as_str())?.strip_prefix('/')
    }

    /// Apply matching rules in file order; later lines win.
    fn apply(&self, path: &str, states: &mut HashMap<String, AttrState>) {
        let Some(relative) = self.relative(path) else {
            return;
        };
        let basename = relative.rsplit('/').next().unwrap_or(relative);
        for rule in &self.rules {
            let candidate = if rule.basename_only { basename } else { relative };
            if rule.matcher.is_match(candidate) {
                for (name, state) in &rule.assignments {
                    states.insert(name.clone(), state.clone());
                }
            }
        }
    }
}

/// Evaluate attributes for `path` against files ordered from the least to
/// the most specific (top-level file first, site rules last).
pub fn evaluate<'a>(
    files: impl IntoIterator<Item = &'a AttributeFile>,
    path: &str,
) -> HashMap<String, AttrState> {
    let mut states = HashMap::new();
    for file in files {
        file.apply(path, &mut states);
    }
    states
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(files: &[&AttributeFile], path: &str, attr: &str) -> AttrState {
        evaluate(files.iter().copied(), path)
            .remove(attr)
            .unwrap_or_default()
    }

    #[test]
    fn parses_all_state_forms() {
        let f = AttributeFile::parse("", "*.key shroud -diff !merge eol=lf\n");
        let states = evaluate([&f], "a/b/id.key");
        assert_eq!(states["shroud"], AttrState::Set);
        assert_eq!(states["diff"], AttrState::Unset);
        assert_eq!(states["merge"], AttrState::Unspecified);
        assert_eq!(states["eol"], AttrState::Value("lf".into()));
    }

    #[test]
    fn basename_pattern_matches_at_any_depth() {
        let f = AttributeFile::parse("", "*.pem shroud\n");
        assert_eq!(state(&[&f], "cert.pem", "shroud"), AttrState::Set);
        assert_eq!(state(&[&f], "deep/dir/cert.pem", "shroud"), AttrState::Set);
        assert_eq!(state(&[&f], "cert.pem.txt", "shroud"), AttrState::Unspecified);
    }

    #[test]
    fn slash_pattern_is_anchored() {
        let f = AttributeFile::parse("", "/secrets/*.txt shroud\nconfig/prod.yaml shroud\n");
        assert_eq!(state(&[&f], "secrets/a.txt", "shroud"), AttrState::Set);
        assert_eq!(state(&[&f], "x/secrets/a.txt", "shroud"), AttrState::Unspecified);
        assert_eq!(state(&[&f], "secrets/sub/a.txt", "shroud"), AttrState::Unspecified);
        assert_eq!(state(&[&f], "config/prod.yaml", "shroud"), AttrState::Set);
    }

    #[test]
    fn double_star_crosses_directories() {
        let f = AttributeFile::parse("", "vault/** shroud\n");
        assert_eq!(state(&[&f], "vault/a", "shroud"), AttrState::Set);
        assert_eq!(state(&[&f], "vault/a/b/c", "shroud"), AttrState::Set);
        assert_eq!(state(&[&f], "other/a", "shroud"), AttrState::Unspecified);
    }

    #[test]
    fn later_lines_and_deeper_files_win() {
        let top = AttributeFile::parse("", "*.txt shroud\nnotes.txt -shroud\n");
        assert_eq!(state(&[&top], "notes.txt", "shroud"), AttrState::Unset);
        assert_eq!(state(&[&top], "todo.txt", "shroud"), AttrState::Set);

        let nested = AttributeFile::parse("docs", "*.txt !shroud\n");
        assert_eq!(
            state(&[&top, &nested], "docs/todo.txt", "shroud"),
            AttrState::Unspecified
        );
        assert_eq!(state(&[&top, &nested], "todo.txt", "shroud"), AttrState::Set);
    }

    #[test]
    fn nested_file_patterns_are_relative_to_its_directory() {
        let nested = AttributeFile::parse("app", "/local.env shroud\n");
        assert_eq!(state(&[&nested], "app/local.env", "shroud"), AttrState::Set);
        assert_eq!(state(&[&nested], "local.env", "shroud"), AttrState::Unspecified);
        assert_eq!(state(&[&nested], "application/local.env", "shroud"), AttrState::Unspecified);
    }

    #[test]
    fn comments_macros_and_directory_patterns_are_ignored() {
        let f = AttributeFile::parse(
            "",
            "# comment\n\n[attr]binary -diff -merge -text\nbuild/ shroud\n!neg shroud\n",
        );
        assert!(f.is_empty());
    }
}
