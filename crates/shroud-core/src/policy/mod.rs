pub mod attributes;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::warn;

pub use attributes::{AttrState, AttributeFile};

pub const ENCODE_ATTR: &str = "shroud";
pub const DELTA_SIZE_ATTR: &str = "delta-encoding-enabling-size";
pub const DELTA_RATIO_ATTR: &str = "delta-encoding-target-ratio";
pub const COMPRESSION_RATIO_ATTR: &str = "compression-target-ratio";

/// File name of per-directory attribute files. Always stored as-is.
pub const ATTRIBUTES_FILE: &str = ".gitattributes";

const DEFAULT_DELTA_SIZE: u64 = 100;
const MIN_DELTA_SIZE: u64 = 50;

/// Bounds and default of a ratio attribute, in whole percent.
struct RatioAttr {
    name: &'static str,
    default_pct: u32,
    min_pct: u32,
    max_pct: u32,
}

const DELTA_RATIO: RatioAttr = RatioAttr {
    name: DELTA_RATIO_ATTR,
    default_pct: 60,
    min_pct: 20,
    max_pct: 80,
};

const COMPRESSION_RATIO: RatioAttr = RatioAttr {
    name: COMPRESSION_RATIO_ATTR,
    default_pct: 80,
    min_pct: 10,
    max_pct: 90,
};

/// How one blob at one path is stored in the ciphertext store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyDecision {
    pub encode: bool,
    /// Minimum blob size for delta encoding; 0 disables it.
    pub delta_enabling_size: u64,
    /// Delta is kept only at or below this fraction of the plaintext; 0 disables it.
    pub delta_target_ratio: f64,
    /// Compression is kept only at or below this fraction of the plaintext; 0 disables it.
    pub compression_target_ratio: f64,
}

impl PolicyDecision {
    pub fn pass_through() -> Self {
        Self {
            encode: false,
            delta_enabling_size: 0,
            delta_target_ratio: 0.0,
            compression_target_ratio: 0.0,
        }
    }

    pub fn delta_enabled(&self) -> bool {
        self.delta_enabling_size > 0 && self.delta_target_ratio > 0.0
    }
}

/// The attribute files visible in one directory, shallowest first.
pub type AttributeStack = Vec<Rc<AttributeFile>>;

/// Turns attribute state into policy decisions. Site rules are applied
/// after every in-tree file so they always win.
pub struct PolicyResolver {
    site: AttributeFile,
    /// Fallback warnings already emitted, keyed by attribute and value.
    warned: RefCell<HashSet<(String, String)>>,
}

impl PolicyResolver {
    pub fn new(site_rules: &[String]) -> Self {
        Self {
            site: AttributeFile::parse("", &site_rules.join("\n")),
            warned: RefCell::new(HashSet::new()),
        }
    }

    /// Decide for `path`, given the attribute files found along it.
    pub fn resolve(&self, path: &str, stack: &[Rc<AttributeFile>]) -> PolicyDecision {
        let basename = path.rsplit('/').next().unwrap_or(path);
        if basename == ATTRIBUTES_FILE {
            return PolicyDecision::pass_through();
        }
        let files = stack
            .iter()
            .map(|f| f.as_ref())
            .chain(std::iter::once(&self.site));
        let states = attributes::evaluate(files, path);
        self.decide(path, &states)
    }

    /// Map evaluated attribute states to a decision.
    pub fn decide(&self, path: &str, states: &HashMap<String, AttrState>) -> PolicyDecision {
        let state = |name: &str| states.get(name).cloned().unwrap_or_default();
        let encode = match state(ENCODE_ATTR) {
            AttrState::Set => true,
            AttrState::Unset | AttrState::Unspecified => false,
            AttrState::Value(v) => match v.as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    self.fallback(path, ENCODE_ATTR, &v, "false");
                    false
                }
            },
        };
        if !encode {
            return PolicyDecision::pass_through();
        }
        PolicyDecision {
            encode,
            delta_enabling_size: self.delta_size(path, state(DELTA_SIZE_ATTR)),
            delta_target_ratio: self.ratio(path, &DELTA_RATIO, state(DELTA_RATIO_ATTR)),
            compression_target_ratio: self.ratio(
                path,
                &COMPRESSION_RATIO,
                state(COMPRESSION_RATIO_ATTR),
            ),
        }
    }

    fn delta_size(&self, path: &str, state: AttrState) -> u64 {
        match state {
            AttrState::Unspecified | AttrState::Unset => 0,
            AttrState::Set => DEFAULT_DELTA_SIZE,
            AttrState::Value(v) => match v.trim().parse::<u64>() {
                Ok(n) if n >= MIN_DELTA_SIZE => n,
                _ => {
                    self.fallback(path, DELTA_SIZE_ATTR, &v, &DEFAULT_DELTA_SIZE.to_string());
                    DEFAULT_DELTA_SIZE
                }
            },
        }
    }

    fn ratio(&self, path: &str, attr: &RatioAttr, state: AttrState) -> f64 {
        let pct = match state {
            AttrState::Unspecified | AttrState::Unset => 0,
            AttrState::Set => attr.default_pct,
            AttrState::Value(v) => match v.trim().parse::<u32>() {
                Ok(n) if (attr.min_pct..=attr.max_pct).contains(&n) => n,
                _ => {
                    self.fallback(path, attr.name, &v, &attr.default_pct.to_string());
                    attr.default_pct
                }
            },
        };
        f64::from(pct) / 100.0
    }

    fn fallback(&self, path: &str, attr: &str, value: &str, used: &str) {
        let first = self
            .warned
            .borrow_mut()
            .insert((attr.to_string(), value.to_string()));
        if first {
            warn!(path, attribute = attr, value, using = used, "invalid attribute value, using default");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(attrs: &[(&str, AttrState)]) -> PolicyDecision {
        let states = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        PolicyResolver::new(&[]).decide("f", &states)
    }

    fn value(s: &str) -> AttrState {
        AttrState::Value(s.to_string())
    }

    #[test]
    fn unflagged_path_passes_through() {
        assert_eq!(decide(&[]), PolicyDecision::pass_through());
        assert_eq!(
            decide(&[(ENCODE_ATTR, AttrState::Unset)]),
            PolicyDecision::pass_through()
        );
        assert_eq!(decide(&[(ENCODE_ATTR, value("false"))]).encode, false);
        assert_eq!(decide(&[(ENCODE_ATTR, value("maybe"))]).encode, false);
    }

    #[test]
    fn encode_alone_disables_everything_else() {
        let d = decide(&[(ENCODE_ATTR, AttrState::Set)]);
        assert!(d.encode);
        assert_eq!(d.delta_enabling_size, 0);
        assert_eq!(d.delta_target_ratio, 0.0);
        assert_eq!(d.compression_target_ratio, 0.0);
        assert!(!d.delta_enabled());
        assert!(decide(&[(ENCODE_ATTR, value("true"))]).encode);
    }

    #[test]
    fn set_attributes_take_defaults() {
        let d = decide(&[
            (ENCODE_ATTR, AttrState::Set),
            (DELTA_SIZE_ATTR, AttrState::Set),
            (DELTA_RATIO_ATTR, AttrState::Set),
            (COMPRESSION_RATIO_ATTR, AttrState::Set),
        ]);
        assert_eq!(d.delta_enabling_size, 100);
        assert_eq!(d.delta_target_ratio, 0.6);
        assert_eq!(d.compression_target_ratio, 0.8);
        assert!(d.delta_enabled());
    }

    #[test]
    fn ratio_values_are_bounded() {
        let ratio = |s: &str| decide(&[(ENCODE_ATTR, AttrState::Set), (DELTA_RATIO_ATTR, value(s))]);
        assert_eq!(ratio("19").delta_target_ratio, 0.6);
        assert_eq!(ratio("20").delta_target_ratio, 0.2);
        assert_eq!(ratio("80").delta_target_ratio, 0.8);
        assert_eq!(ratio("81").delta_target_ratio, 0.6);
        assert_eq!(ratio("abc").delta_target_ratio, 0.6);

        let compression =
            |s: &str| decide(&[(ENCODE_ATTR, AttrState::Set), (COMPRESSION_RATIO_ATTR, value(s))]);
        assert_eq!(compression("80").compression_target_ratio, 0.8);
        assert_eq!(compression("10").compression_target_ratio, 0.1);
        assert_eq!(compression("9").compression_target_ratio, 0.8);
        assert_eq!(compression("90").compression_target_ratio, 0.9);
    }

    #[test]
    fn delta_size_has_a_floor() {
        let size = |s: &str| decide(&[(ENCODE_ATTR, AttrState::Set), (DELTA_SIZE_ATTR, value(s))]);
        assert_eq!(size("49").delta_enabling_size, 100);
        assert_eq!(size("50").delta_enabling_size, 50);
        assert_eq!(size("4096").delta_enabling_size, 4096);
        assert_eq!(size("-1").delta_enabling_size, 100);
    }

    #[test]
    fn site_rules_override_tree_files() {
        let resolver = PolicyResolver::new(&["*.txt -shroud".to_string()]);
        let tree = Rc::new(AttributeFile::parse("", "*.txt shroud\n*.key shroud\n"));
        assert!(!resolver.resolve("notes.txt", &[tree.clone()]).encode);
        assert!(resolver.resolve("id.key", &[tree]).encode);
    }

    #[test]
    fn attribute_files_are_never_encoded() {
        let resolver = PolicyResolver::new(&["* shroud".to_string()]);
        assert!(resolver.resolve("a/b/secret", &[]).encode);
        assert!(!resolver.resolve(".gitattributes", &[]).encode);
        assert!(!resolver.resolve("sub/.gitattributes", &[]).encode);
    }
}
