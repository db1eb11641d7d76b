pub mod intent;
pub mod issues;
pub mod normalize;
pub mod reformulate;
pub mod statute;
pub mod tokens;

use regex::Regex;

/// Compiles a static pattern table. Patterns that fail to compile are skipped; the unit tests of
/// each table assert that nothing was dropped.
pub(crate) fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
	patterns.iter().filter_map(|pattern| Regex::new(pattern).ok()).collect()
}
