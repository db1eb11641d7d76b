pub fn render_schema() -> String {
	expand_includes(include_str!("../../../sql/init.sql"))
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_statutes.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_statutes.sql")),
				"tables/002_statute_aliases.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_statute_aliases.sql")),
				"tables/003_documents.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_documents.sql")),
				"tables/004_document_chunks.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_document_chunks.sql")),
				"tables/005_answer_cache.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_answer_cache.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
