use serde::{Deserialize, Serialize};

const ISSUE_VOCABULARY: &[(IssueKind, &[&str])] = &[
	(
		IssueKind::MissingCaseLaw,
		&["case law", "case-law", "precedent", "judgment", "judicial authority"],
	),
	(
		IssueKind::SourceHomogeneity,
		&[
			"homogen",
			"single source",
			"same source",
			"one source",
			"diversity",
			"diverse",
			"one type of source",
		],
	),
	(
		IssueKind::CitationGap,
		&["citation", "cite", "cited", "unsupported", "unattributed", "not grounded"],
	),
	(
		IssueKind::CoverageGap,
		&["insufficient", "missing", "incomplete", "coverage", "not covered", "lacks", "lacking"],
	),
	(
		IssueKind::Coherence,
		&["coheren", "contradict", "inconsisten", "unclear", "logical", "structure"],
	),
	(
		IssueKind::Relevance,
		&["relevan", "off-topic", "off topic", "does not answer", "doesn't answer"],
	),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
	CitationGap,
	CoverageGap,
	MissingCaseLaw,
	SourceHomogeneity,
	Coherence,
	Relevance,
	Other,
}
impl IssueKind {
	pub fn classify(issue: &str) -> Self {
		let lowered = issue.to_lowercase();

		ISSUE_VOCABULARY
			.iter()
			.find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
			.map(|(kind, _)| *kind)
			.unwrap_or(Self::Other)
	}

	/// Issues that more sources can fix, as opposed to rewriting the answer.
	pub fn is_source_insufficiency(self) -> bool {
		matches!(
			self,
			Self::CitationGap | Self::CoverageGap | Self::MissingCaseLaw | Self::SourceHomogeneity
		)
	}

	fn gap_hint(self, underrepresented: Option<&str>) -> Option<String> {
		match self {
			Self::CitationGap => Some("cite legal authorities".to_string()),
			Self::CoverageGap => Some("comprehensive coverage".to_string()),
			Self::MissingCaseLaw => Some("case law precedents".to_string()),
			Self::SourceHomogeneity => Some(match underrepresented {
				Some(kind) if !kind.trim().is_empty() => format!("{} sources", kind.trim()),
				_ => "alternative source types".to_string(),
			}),
			Self::Coherence | Self::Relevance | Self::Other => None,
		}
	}
}

pub fn has_source_insufficiency<S>(issues: &[S]) -> bool
where
	S: AsRef<str>,
{
	issues.iter().any(|issue| IssueKind::classify(issue.as_ref()).is_source_insufficiency())
}

/// Builds the follow-up retrieval query for a RETRIEVE_MORE pass. Each source-related issue kind
/// contributes one hint, in first-seen order.
pub fn build_gap_query<S>(original: &str, issues: &[S], underrepresented: Option<&str>) -> String
where
	S: AsRef<str>,
{
	let mut seen = Vec::new();
	let mut hints = Vec::new();

	for issue in issues {
		let kind = IssueKind::classify(issue.as_ref());

		if seen.contains(&kind) {
			continue;
		}

		seen.push(kind);

		if let Some(hint) = kind.gap_hint(underrepresented) {
			hints.push(hint);
		}
	}

	let original = original.trim();

	if hints.is_empty() {
		return original.to_string();
	}

	format!("{original} {}", hints.join(" "))
}
