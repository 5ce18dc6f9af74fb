//! Per-language boundary signatures for code chunking.
//!
//! Each language registers an ordered set of regular expressions matching
//! declaration lines (functions, classes, structs, impls). The chunker
//! treats matching lines as candidate chunk boundaries. This is a heuristic,
//! not a parser: signatures are line-anchored and best-effort. Extensions
//! with no registered profile produce no boundaries, and the chunker falls
//! back to fixed-size windowing.
//!
//! New languages are added by appending a profile here; the chunker's
//! control flow never changes.

use regex::Regex;
use std::sync::OnceLock;

pub struct LanguageProfile {
    pub extensions: &'static [&'static str],
    pub boundaries: Vec<Regex>,
}

fn profile(extensions: &'static [&'static str], patterns: &[&str]) -> LanguageProfile {
    LanguageProfile {
        extensions,
        boundaries: patterns
            .iter()
            .map(|p| Regex::new(p).expect("boundary pattern must compile"))
            .collect(),
    }
}

fn build_registry() -> Vec<LanguageProfile> {
    vec![
        profile(
            &["rs"],
            &[
                r"^\s*(pub(\([^)]*\))?\s+)?(async\s+)?fn\s+\w+",
                r"^\s*(pub(\([^)]*\))?\s+)?struct\s+\w+",
                r"^\s*(pub(\([^)]*\))?\s+)?enum\s+\w+",
                r"^\s*(pub(\([^)]*\))?\s+)?trait\s+\w+",
                r"^\s*impl(\s|<)",
                r"^\s*(pub(\([^)]*\))?\s+)?mod\s+\w+",
            ],
        ),
        profile(
            &["py"],
            &[r"^\s*(async\s+)?def\s+\w+", r"^\s*class\s+\w+"],
        ),
        profile(
            &["js", "jsx"],
            &[
                r"^\s*(export\s+)?(default\s+)?(async\s+)?function\s*\*?\s*\w*",
                r"^\s*(export\s+)?class\s+\w+",
                r"^\s*(export\s+)?const\s+\w+\s*=\s*(async\s+)?\([^)]*\)\s*=>",
            ],
        ),
        profile(
            &["ts", "tsx"],
            &[
                r"^\s*(export\s+)?(default\s+)?(async\s+)?function\s*\*?\s*\w*",
                r"^\s*(export\s+)?(abstract\s+)?class\s+\w+",
                r"^\s*(export\s+)?interface\s+\w+",
                r"^\s*(export\s+)?type\s+\w+\s*=",
                r"^\s*(export\s+)?enum\s+\w+",
                r"^\s*(export\s+)?const\s+\w+\s*=\s*(async\s+)?\([^)]*\)\s*=>",
            ],
        ),
        profile(
            &["go"],
            &[
                r"^func\s+(\(\s*\w+\s+\*?[\w.]+\s*\)\s+)?\w+",
                r"^type\s+\w+\s+(struct|interface)\b",
            ],
        ),
        profile(
            &["java"],
            &[
                r"^\s*(public|private|protected)?\s*(static\s+)?(final\s+)?(abstract\s+)?(class|interface|enum)\s+\w+",
                r"^\s*(public|private|protected)\s+(static\s+)?[\w<>\[\],\s]+\s+\w+\s*\(",
            ],
        ),
        profile(
            &["c", "h", "cc", "cpp", "hpp"],
            &[
                r"^[A-Za-z_][\w\s\*]*\s+\**\w+\s*\([^;]*$",
                r"^\s*(class|struct)\s+\w+",
                r"^\s*namespace\s+\w+",
            ],
        ),
        profile(
            &["rb"],
            &[r"^\s*def\s+\w", r"^\s*(class|module)\s+[A-Z]"],
        ),
    ]
}

fn registry() -> &'static [LanguageProfile] {
    static REGISTRY: OnceLock<Vec<LanguageProfile>> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

/// Boundary patterns for a file extension, or `None` when the language is
/// unrecognized.
pub fn boundary_patterns(extension: &str) -> Option<&'static [Regex]> {
    let ext = extension.to_ascii_lowercase();
    registry()
        .iter()
        .find(|p| p.extensions.contains(&ext.as_str()))
        .map(|p| p.boundaries.as_slice())
}
