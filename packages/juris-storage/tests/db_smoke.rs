use time::{Duration, OffsetDateTime};

use juris_config::Postgres;
use juris_storage::{cache, db::Db, documents, statutes};
use juris_testkit::TestDatabase;

async fn seeded_db(dsn: &str) -> Db {
	let cfg = Postgres { dsn: dsn.to_string(), pool_max_conns: 2 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");
	juris_testkit::seed_legal_corpus(&db.pool).await.expect("Failed to seed corpus.");

	db
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set JURIS_PG_DSN to run."]
async fn aliases_include_statute_titles() {
	let Some(base_dsn) = juris_testkit::env_dsn() else {
		eprintln!("Skipping aliases_include_statute_titles; set JURIS_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = seeded_db(test_db.dsn()).await;
	let aliases = statutes::load_statute_aliases(&db.pool).await.expect("Failed to load aliases.");
	let labour = aliases.iter().find(|row| row.alias == "labour act").expect("Missing alias.");

	assert_eq!(labour.chapter.as_deref(), Some("5"));
	assert!(aliases.iter().any(|row| row.alias == "rent control act 13 of 1997"));

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to clean up test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set JURIS_PG_DSN to run."]
async fn section_lookup_includes_subsections() {
	let Some(base_dsn) = juris_testkit::env_dsn() else {
		eprintln!("Skipping section_lookup_includes_subsections; set JURIS_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = seeded_db(test_db.dsn()).await;
	let chunks = statutes::find_sections(&db.pool, "labour-act-2007", "12", 6)
		.await
		.expect("Failed to find sections.");
	let ids = chunks.iter().map(|chunk| chunk.chunk_id.as_str()).collect::<Vec<_>>();

	assert_eq!(ids, vec!["labour-act-2007:0", "labour-act-2007:1"]);

	let docs = documents::fetch_documents(
		&db.pool,
		&["labour-act-2007".to_string(), "missing".to_string()],
	)
	.await
	.expect("Failed to fetch documents.");

	assert_eq!(docs.len(), 1);
	assert_eq!(docs[0].source_kind, "statute");

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to clean up test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set JURIS_PG_DSN to run."]
async fn cache_entries_are_write_once_until_expiry() {
	let Some(base_dsn) = juris_testkit::env_dsn() else {
		eprintln!(
			"Skipping cache_entries_are_write_once_until_expiry; set JURIS_PG_DSN to run this test."
		);

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = seeded_db(test_db.dsn()).await;
	let now = OffsetDateTime::now_utc();
	let expires_at = now + Duration::hours(1);
	let first = serde_json::json!({ "answer": "first" });
	let second = serde_json::json!({ "answer": "second" });

	cache::store_cache_payload(&db.pool, "answer", "k", &first, now, expires_at, None)
		.await
		.expect("Failed to store payload.");
	cache::store_cache_payload(&db.pool, "answer", "k", &second, now, expires_at, None)
		.await
		.expect("Failed to store payload.");

	let hit = cache::fetch_cache_payload(&db.pool, "answer", "k", now)
		.await
		.expect("Failed to fetch payload.")
		.expect("Expected a cache hit.");

	assert_eq!(hit.value, first);

	let skipped =
		cache::store_cache_payload(&db.pool, "answer", "big", &first, now, expires_at, Some(4))
			.await
			.expect("Failed to store payload.");

	assert!(skipped.is_none());

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to clean up test database.");
}
