//! Dotted version strings such as `1.8.0_392`, `17.0.9+9` or `2.0.0-beta-1`.
//!
//! Tokens are compared pairwise: leading digit runs numerically, then the
//! remaining suffixes, where a bare number (a final release) sorts after any
//! suffixed pre-release at the same numeric value. If every shared token ties,
//! the version with more tokens is greater.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Binary major numbers are offset from release numbers by this amount
/// (major 52 is release 8).
const CLASS_VERSION_OFFSET: i64 = 44;

/// First release named by its bare number instead of `1.x`.
const BARE_RELEASE_CUTOFF: i64 = 9;

#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    digits: usize,
}

impl Token {
    fn new(text: &str) -> Self {
        let digits = text.bytes().take_while(u8::is_ascii_digit).count();
        Self {
            text: text.to_string(),
            digits,
        }
    }

    fn number(&self) -> &str {
        &self.text[..self.digits]
    }

    fn suffix(&self) -> &str {
        &self.text[self.digits..]
    }
}

impl Version {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let tokens = if raw.is_empty() {
            Vec::new()
        } else {
            raw.split('.').map(Token::new).collect()
        };
        Self {
            raw: raw.to_string(),
            tokens,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tokens
            .iter()
            .zip(&other.tokens)
            .map(|(a, b)| compare_tokens(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| self.tokens.len().cmp(&other.tokens.len()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Version {}

/// Compare two version strings.
#[must_use]
pub fn compare(a: &str, b: &str) -> Ordering {
    Version::new(a).cmp(&Version::new(b))
}

fn compare_tokens(a: &Token, b: &Token) -> Ordering {
    let (suffix_a, suffix_b) = if a.digits > 0 && b.digits > 0 {
        let ordering = compare_digit_runs(a.number(), b.number());
        if ordering.is_ne() {
            return ordering;
        }
        (a.suffix(), b.suffix())
    } else {
        (a.text.as_str(), b.text.as_str())
    };

    match (suffix_a.is_empty(), suffix_b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => suffix_a.cmp(suffix_b),
    }
}

// Arbitrary precision: strip leading zeros, then longer means larger.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Map a binary `major.minor` descriptor to the release number users know:
/// `52.0` is `1.8`, `61.0` is `17`.
///
/// Returns `None` when the major number is malformed or predates the first
/// release.
#[must_use]
pub fn class_version_to_release(class_version: &str) -> Option<String> {
    let major = class_version
        .split_once('.')
        .map_or(class_version, |(major, _)| major)
        .trim();
    let value = major.parse::<f64>().ok().filter(|value| value.is_finite())?;
    #[allow(clippy::cast_possible_truncation)]
    let release = value.trunc() as i64 - CLASS_VERSION_OFFSET;
    if release < 1 {
        return None;
    }
    Some(if release >= BARE_RELEASE_CUTOFF {
        release.to_string()
    } else {
        format!("1.{release}")
    })
}

/// Pull the `class file version N.M` figure out of a launch failure message.
#[must_use]
pub fn extract_class_version(message: &str) -> Option<&str> {
    const MARKER: &str = "class file version ";
    let start = message.rfind(MARKER)? + MARKER.len();
    let rest = &message[start..];
    let end = rest
        .find(|ch: char| !ch.is_ascii_digit() && ch != '.')
        .unwrap_or(rest.len());
    let figure = rest[..end].trim_end_matches('.');
    (!figure.is_empty()).then_some(figure)
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{Version, class_version_to_release, compare, extract_class_version};

    const SAMPLES: &[&str] = &[
        "",
        "1",
        "1.",
        "1.5",
        "1.5.1",
        "1.8.0_392",
        "1.9",
        "1.10",
        "01.10",
        "2.0.0",
        "2.0.0-beta-1",
        "2.0.0-beta-2",
        "2.0.0-rc",
        "17",
        "17.0.9+9",
        "21-ea",
        "a",
        "b.1",
        "-1",
    ];

    #[test]
    fn documented_orderings_hold() {
        assert_eq!(compare("1.5", "1.5.1"), Ordering::Less);
        assert_eq!(compare("2.0.0-beta-1", "2.0.0"), Ordering::Less);
        assert_eq!(compare("1.9", "1.10"), Ordering::Less);
        assert_eq!(compare("2.0.0-beta-1", "2.0.0-beta-2"), Ordering::Less);
        assert_eq!(compare("17.0.9+9", "1.8.0_392"), Ordering::Greater);
        assert_eq!(compare("21-ea", "21"), Ordering::Less);
    }

    #[test]
    fn empty_string_has_no_tokens() {
        assert_eq!(compare("", ""), Ordering::Equal);
        assert_eq!(compare("", "0"), Ordering::Less);
        assert_eq!(Version::new("").token_count(), 0);
        assert_eq!(Version::new("1.").token_count(), 2);
    }

    #[test]
    fn numbers_beyond_u64_compare_by_magnitude() {
        assert_eq!(
            compare("99999999999999999999999", "100000000000000000000000"),
            Ordering::Less
        );
        assert_eq!(compare("007", "7"), Ordering::Equal);
    }

    #[test]
    fn comparison_is_reflexive_and_antisymmetric() {
        for a in SAMPLES {
            assert_eq!(compare(a, a), Ordering::Equal, "{a:?}");
            for b in SAMPLES {
                assert_eq!(compare(a, b), compare(b, a).reverse(), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn comparison_is_transitive() {
        for a in SAMPLES {
            for b in SAMPLES {
                for c in SAMPLES {
                    if compare(a, b).is_le() && compare(b, c).is_le() {
                        assert!(compare(a, c).is_le(), "{a:?} <= {b:?} <= {c:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn sorting_versions_uses_the_comparator() {
        let mut versions: Vec<Version> = ["1.10", "1.9", "2.0.0", "2.0.0-beta-1", "1.5.1"]
            .iter()
            .map(|v| v.parse().expect("infallible"))
            .collect();
        versions.sort();
        let sorted: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(sorted, ["1.5.1", "1.9", "1.10", "2.0.0-beta-1", "2.0.0"]);
    }

    #[test]
    fn class_versions_map_to_release_names() {
        assert_eq!(class_version_to_release("61.0").as_deref(), Some("17"));
        assert_eq!(class_version_to_release("52.0").as_deref(), Some("1.8"));
        assert_eq!(class_version_to_release("53.0").as_deref(), Some("9"));
        assert_eq!(class_version_to_release("45.3").as_deref(), Some("1.1"));
        assert_eq!(class_version_to_release("65").as_deref(), Some("21"));
    }

    #[test]
    fn malformed_class_versions_are_unknown() {
        assert_eq!(class_version_to_release("abc"), None);
        assert_eq!(class_version_to_release(""), None);
        assert_eq!(class_version_to_release("12.0"), None);
    }

    #[test]
    fn class_version_is_found_in_launch_failure_message() {
        let message = "org/example/Main has been compiled by a more recent version of the \
                       Java Runtime (class file version 61.0), this version of the Java \
                       Runtime only recognizes class file versions up to 52.0";
        assert_eq!(extract_class_version(message), Some("61.0"));
        assert_eq!(
            extract_class_version("Unsupported class file version 61.0"),
            Some("61.0")
        );
        assert_eq!(extract_class_version("no version here"), None);
    }
}
