//! Integration tests for the Postgres backend.
//! Requires a Postgres instance with pgvector. Set DATABASE_TEST_URL or these tests are skipped.

use std::time::Duration;

use skytrend_common::{FilteredDocument, Operation, PostEvent, StreamFields};
use skytrend_store::{
    pg, BloomParams, DocumentStore, FieldUpdate, IndexSchema, PgDocumentStore, PgSketches,
    PgStreamLog, Sketches, StreamLog, TopKParams,
};
use sqlx::PgPool;
use uuid::Uuid;

/// Get a migrated test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    pg::connect(&url, 4).await.ok()
}

/// Tests share one database; unique names keep them apart.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn fields(uri: &str) -> StreamFields {
    let mut f = StreamFields::new();
    f.insert("uri".into(), uri.into());
    f
}

fn document(rkey: &str) -> FilteredDocument {
    let did = unique("did");
    FilteredDocument::from_event(PostEvent {
        uri: PostEvent::post_uri(&did, rkey),
        did,
        rkey: rkey.into(),
        text: "Parliament votes on the budget today".into(),
        time_us: 1_700_000_000_000_000,
        operation: Operation::Create,
        parent_uri: None,
        root_uri: None,
        langs: vec!["en".into()],
        created_at: Some("2025-01-01T00:00:00Z".into()),
    })
}

// =========================================================================
// Stream log
// =========================================================================

#[tokio::test]
async fn append_trims_exactly() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let log = PgStreamLog::new(pool);
    let stream = unique("raw");

    for i in 0..5 {
        log.append(&stream, &fields(&format!("u{i}")), 3).await.unwrap();
    }
    assert_eq!(log.len(&stream).await.unwrap(), 3);
}

#[tokio::test]
async fn group_delivery_ack_and_redelivery() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let log = PgStreamLog::new(pool);
    let stream = unique("raw");

    log.create_group(&stream, "filter-group").await.unwrap();
    log.create_group(&stream, "filter-group").await.unwrap();
    let a = log.append(&stream, &fields("a"), 100).await.unwrap();
    let b = log.append(&stream, &fields("b"), 100).await.unwrap();

    let first = log.read_group(&stream, "filter-group", "consumer-0", 1).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, a);

    let second = log.read_group(&stream, "filter-group", "consumer-1", 5).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, b);
    assert_eq!(log.pending_count(&stream, "filter-group").await.unwrap(), 2);

    let pending = log.read_pending(&stream, "filter-group", "consumer-0", 5).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].deliveries, 2);

    assert!(log.ack(&stream, "filter-group", a).await.unwrap());
    assert!(!log.ack(&stream, "filter-group", a).await.unwrap());

    let claimed = log
        .claim_idle(&stream, "filter-group", "consumer-0", Duration::ZERO, 5)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, b);
}

#[tokio::test]
async fn trim_keeps_the_newest_entries() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let log = PgStreamLog::new(pool);
    let stream = unique("raw");
    log.create_group(&stream, "filter-group").await.unwrap();

    for i in 0..6 {
        log.append(&stream, &fields(&format!("u{i}")), 4).await.unwrap();
    }
    assert_eq!(log.len(&stream).await.unwrap(), 4);

    let entries = log.read_group(&stream, "filter-group", "c", 10).await.unwrap();
    let uris: Vec<&str> = entries.iter().map(|e| e.fields["uri"].as_str()).collect();
    assert_eq!(uris, vec!["u2", "u3", "u4", "u5"]);
}

#[tokio::test]
async fn uncommitted_append_is_not_skipped_by_readers() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let log = PgStreamLog::new(pool.clone());
    let stream = unique("filtered");
    log.create_group(&stream, "embeddings-group").await.unwrap();

    // An append that has drawn its id but not committed yet.
    let mut slow = pool.begin().await.unwrap();
    sqlx::query(
        "INSERT INTO stream_lengths (stream, length) VALUES ($1, 1) \
         ON CONFLICT (stream) DO UPDATE SET length = stream_lengths.length + 1",
    )
    .bind(&stream)
    .execute(&mut *slow)
    .await
    .unwrap();
    let (slow_id,) = sqlx::query_as::<_, (i64,)>(
        "INSERT INTO stream_entries (stream, fields) VALUES ($1, '{\"uri\":\"slow\"}') RETURNING id",
    )
    .bind(&stream)
    .fetch_one(&mut *slow)
    .await
    .unwrap();

    let fast = tokio::spawn({
        let log = log.clone();
        let stream = stream.clone();
        async move { log.append(&stream, &fields("fast"), 100).await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!fast.is_finished(), "append must wait for the in-flight one");

    let early = log.read_group(&stream, "embeddings-group", "c", 10).await.unwrap();
    assert!(early.is_empty());

    slow.commit().await.unwrap();
    let fast_id = fast.await.unwrap();
    assert!(fast_id.0 > slow_id);

    let entries = log.read_group(&stream, "embeddings-group", "c", 10).await.unwrap();
    let ids: Vec<i64> = entries.iter().map(|e| e.id.0).collect();
    assert_eq!(ids, vec![slow_id, fast_id.0]);
    assert_eq!(log.len(&stream).await.unwrap(), 2);
}

#[tokio::test]
async fn read_without_group_fails() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let log = PgStreamLog::new(pool);
    assert!(log.read_group(&unique("raw"), "nope", "c", 1).await.is_err());
}

// =========================================================================
// Documents
// =========================================================================

#[tokio::test]
async fn document_lifecycle() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgDocumentStore::new(pool);
    store.register_schema(&IndexSchema::filtered_documents(384)).await.unwrap();
    assert!(store.register_schema(&IndexSchema::filtered_documents(16)).await.is_err());

    let doc = document("k1");
    store.upsert(&doc).await.unwrap();
    store.upsert(&doc).await.unwrap();

    let topic = unique("topic");
    assert!(store
        .update_field(&doc.id, FieldUpdate::Topics(vec![topic.clone()]))
        .await
        .unwrap());
    let mut embedding = vec![0.0f32; 384];
    embedding[0] = 1.0;
    assert!(store
        .update_field(&doc.id, FieldUpdate::TextEmbedding(embedding.clone()))
        .await
        .unwrap());

    let stored = store.get(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.id, stored.post.uri);
    assert_eq!(stored.topics, vec![topic.clone()]);
    assert_eq!(stored.post.created_at.as_deref(), Some("2025-01-01T00:00:00Z"));

    let hits = store.find_by_topic_intersection(&[topic]).await.unwrap();
    assert_eq!(hits.len(), 1);

    let near = store.vector_knn(&embedding, 1, Some(0.01)).await.unwrap();
    assert_eq!(near.len(), 1);
    assert!(near[0].1 < 0.01);
}

// =========================================================================
// Sketches
// =========================================================================

#[tokio::test]
async fn bloom_topk_cms_and_sets() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let sk = PgSketches::new(pool);

    let bf = unique("bf");
    sk.bloom_reserve(&bf, BloomParams::new(1000, 0.01)).await.unwrap();
    assert!(!sk.bloom_exists(&bf, "x").await.unwrap());
    assert!(sk.bloom_add(&bf, "x").await.unwrap());
    assert!(sk.bloom_exists(&bf, "x").await.unwrap());
    assert!(!sk.bloom_add(&bf, "x").await.unwrap());

    let tk = unique("topics-topk");
    sk.topk_reserve(&tk, TopKParams { k: 2, ..TopKParams::default() }).await.unwrap();
    sk.topk_incr_by(&tk, &[("a".into(), 3), ("b".into(), 1), ("c".into(), 2)])
        .await
        .unwrap();
    assert_eq!(
        sk.topk_list(&tk).await.unwrap(),
        vec![("a".to_string(), 3), ("c".to_string(), 2)]
    );

    let cms = unique("topics-cms");
    sk.cms_reserve(&cms, 3000, 10).await.unwrap();
    sk.cms_incr_by(&cms, &[("a".into(), 2)]).await.unwrap();
    sk.cms_incr_by(&cms, &[("a".into(), 1)]).await.unwrap();
    assert_eq!(sk.cms_query(&cms, "a").await.unwrap(), 3);
    assert_eq!(sk.cms_query(&cms, "zzz").await.unwrap(), 0);

    let set = unique("topics");
    sk.set_add(&set, &["b".into(), "a".into(), "a".into()]).await.unwrap();
    assert_eq!(sk.set_members(&set).await.unwrap(), vec!["a", "b"]);
}
