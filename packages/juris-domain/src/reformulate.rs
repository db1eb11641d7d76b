use crate::statute::{self, StatuteAlias};

const ABBREVIATIONS: &[(&str, &str)] = &[
	("s.", "section"),
	("ss.", "sections"),
	("sec.", "section"),
	("art.", "article"),
	("cl.", "clause"),
	("reg.", "regulation"),
	("regs", "regulations"),
	("govt", "government"),
	("dept", "department"),
	("co.", "company"),
];
const LEGAL_SYNONYMS: &[(&str, &str)] = &[
	("fired", "dismissed"),
	("sacked", "dismissed"),
	("let go", "retrenched"),
	("kicked out", "evicted"),
	("kick out", "evict"),
	("boss", "employer"),
	("wages", "remuneration"),
	("salary", "remuneration"),
	("rent money", "rental"),
	("landlord", "lessor"),
	("tenant", "lessee"),
	("sue", "institute proceedings against"),
	("break up", "divorce"),
	("jail", "imprisonment"),
	("prison", "imprisonment"),
	("cops", "police"),
];

/// Retrieval variants for a normalized query. The original always comes first; the rest are
/// abbreviation expansion, lay-to-legal synonyms, statute-name substitution and chapter
/// addition, deduplicated case-insensitively and capped at `max_variants`.
pub fn reformulate(query: &str, aliases: &[StatuteAlias], max_variants: usize) -> Vec<String> {
	let original = query.trim();
	let mut out = Vec::new();

	push_variant(&mut out, original.to_string());

	let lowered = original.to_lowercase();
	let expanded = replace_all(&lowered, ABBREVIATIONS);

	push_variant(&mut out, expanded.clone());
	push_variant(&mut out, replace_all(&expanded, LEGAL_SYNONYMS));

	if let Some(alias) = statute::resolve_alias(&expanded, aliases) {
		let title = alias.title.to_lowercase();
		let substituted = replace_words(&expanded, &alias.alias.to_lowercase(), &title);

		push_variant(&mut out, substituted.clone());

		if let Some(chapter) = alias.chapter.as_deref().map(str::to_lowercase) {
			let chapter = chapter.trim();
			let chapter = chapter.strip_prefix("chapter").map(str::trim).unwrap_or(chapter);

			if !chapter.is_empty() {
				push_variant(&mut out, format!("{substituted} chapter {chapter}"));
			}
		}
	}

	out.truncate(max_variants.max(1));

	out
}

fn push_variant(out: &mut Vec<String>, variant: String) {
	let variant = variant.split_whitespace().collect::<Vec<_>>().join(" ");

	if variant.is_empty() || out.iter().any(|existing| existing.eq_ignore_ascii_case(&variant)) {
		return;
	}

	out.push(variant);
}

fn replace_all(text: &str, table: &[(&str, &str)]) -> String {
	table.iter().fold(text.to_string(), |acc, (from, to)| replace_words(&acc, from, to))
}

fn replace_words(text: &str, from: &str, to: &str) -> String {
	if from.is_empty() || !text.contains(from) {
		return text.to_string();
	}

	let mut out = String::with_capacity(text.len());
	let mut cursor = 0;

	for (start, _) in text.match_indices(from) {
		if start < cursor {
			continue;
		}

		let end = start + from.len();
		let boundary_before =
			text[..start].chars().next_back().is_none_or(|ch| !ch.is_alphanumeric());
		let boundary_after = text[end..].chars().next().is_none_or(|ch| !ch.is_alphanumeric());
		// A trailing period in the pattern already marks the end of the abbreviation.
		let boundary_after = boundary_after || from.ends_with('.');

		if !(boundary_before && boundary_after) {
			continue;
		}

		out.push_str(&text[cursor..start]);
		out.push_str(to);

		if from.ends_with('.') && text[end..].chars().next().is_some_and(char::is_alphanumeric) {
			out.push(' ');
		}

		cursor = end;
	}

	out.push_str(&text[cursor..]);

	out
}
