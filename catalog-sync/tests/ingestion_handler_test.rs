//! Message handling without a broker: each delivery is settled by the
//! disposition the handler returns.

mod common;

use std::sync::Arc;

use catalog_store::{CatalogStore, MemoryCatalogStore};
use catalog_sync::{
    Disposition, MessageHandler, ProviderError, RetryPolicy, RetryingEmbedder, UpsertEngine,
};
use common::ScriptedProvider;
use tokio::time::Instant;

const DIM: usize = 8;

struct Fixture {
    store: Arc<MemoryCatalogStore>,
    provider: Arc<ScriptedProvider>,
    handler: MessageHandler,
}

fn fixture(provider: ScriptedProvider) -> Fixture {
    let store = Arc::new(MemoryCatalogStore::new().unwrap());
    let provider = Arc::new(provider);
    let embedder = RetryingEmbedder::new(provider.clone(), RetryPolicy::default());
    let handler = MessageHandler::new(UpsertEngine::new(store.clone(), Arc::new(embedder)));
    Fixture {
        store,
        provider,
        handler,
    }
}

const GUITAR: &[u8] = r#"{
    "id": 42,
    "name": "Guitarra Telecaster",
    "description": "Corpo em freijó",
    "price": 3899.9,
    "quantityAvailableInStock": 5,
    "category": "Guitarras"
}"#.as_bytes();

#[tokio::test]
async fn test_created_event_is_acked_and_stored() {
    let f = fixture(ScriptedProvider::new(DIM));

    assert_eq!(f.handler.handle("product.created", GUITAR).await, Disposition::Ack);

    let record = f.store.get_by_product_id(42).await.unwrap().unwrap();
    assert_eq!(
        record.content,
        "Produto: Guitarra Telecaster. Categoria: Guitarras. Descrição: Corpo em freijó."
    );
    assert_eq!(record.metadata.stock, 5);
}

#[tokio::test]
async fn test_updated_event_replaces_existing_record() {
    let f = fixture(ScriptedProvider::new(DIM));
    f.handler.handle("product.created", GUITAR).await;
    let original = f.store.get_by_product_id(42).await.unwrap().unwrap();

    let update = br#"{"id": 42, "name": "Guitarra Telecaster", "price": 3500.0, "category": "Guitarras"}"#;
    assert_eq!(f.handler.handle("product.updated", update).await, Disposition::Ack);

    let updated = f.store.get_by_product_id(42).await.unwrap().unwrap();
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.metadata.price, 3500.0);
    assert_eq!(updated.metadata.stock, 0);
    assert_eq!(f.store.count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_malformed_bodies_are_dead_lettered() {
    let f = fixture(ScriptedProvider::new(DIM));

    for body in [
        &b"not json"[..],
        &b"[1, 2, 3]"[..],
        &b"\"product\""[..],
        &b"{\"id\": \"forty-two\", \"name\": \"X\"}"[..],
        &[0xff, 0xfe, 0x00][..],
    ] {
        assert_eq!(
            f.handler.handle("product.created", body).await,
            Disposition::DeadLetter
        );
    }
    assert_eq!(f.provider.calls(), 0);
    assert_eq!(f.store.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_incomplete_event_is_acked_without_record() {
    let f = fixture(ScriptedProvider::new(DIM));

    let no_name = br#"{"id": 9, "price": 10.0}"#;
    let blank_name = br#"{"id": 9, "name": "   "}"#;
    let no_id = br#"{"name": "Palheta"}"#;

    for body in [&no_name[..], &blank_name[..], &no_id[..]] {
        assert_eq!(f.handler.handle("product.created", body).await, Disposition::Ack);
    }
    assert_eq!(f.provider.calls(), 0);
    assert_eq!(f.store.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_routing_key_is_processed_as_update() {
    let f = fixture(ScriptedProvider::new(DIM));

    assert_eq!(f.handler.handle("product.restocked", GUITAR).await, Disposition::Ack);
    assert!(f.store.get_by_product_id(42).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover_within_budget() {
    let f = fixture(ScriptedProvider::new(DIM).failing_transiently(4));

    let start = Instant::now();
    assert_eq!(f.handler.handle("product.created", GUITAR).await, Disposition::Ack);

    assert_eq!(f.provider.calls(), 5);
    assert!(f.store.get_by_product_id(42).await.unwrap().is_some());
    // Four waits, each at least the 2s floor
    assert!(start.elapsed().as_secs() >= 8);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_dead_letter() {
    let f = fixture(ScriptedProvider::new(DIM).failing_transiently(5));

    assert_eq!(
        f.handler.handle("product.created", GUITAR).await,
        Disposition::DeadLetter
    );
    assert_eq!(f.provider.calls(), 5);
    assert!(f.store.get_by_product_id(42).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_is_not_retried() {
    let f = fixture(
        ScriptedProvider::new(DIM)
            .failing_with([ProviderError::Permanent("400 INVALID_ARGUMENT".to_string())]),
    );

    let start = Instant::now();
    assert_eq!(
        f.handler.handle("product.created", GUITAR).await,
        Disposition::DeadLetter
    );
    assert_eq!(f.provider.calls(), 1);
    assert_eq!(start.elapsed().as_secs(), 0);
}

#[tokio::test]
async fn test_redelivery_after_success_is_idempotent() {
    let f = fixture(ScriptedProvider::new(DIM));

    for _ in 0..3 {
        assert_eq!(f.handler.handle("product.created", GUITAR).await, Disposition::Ack);
    }
    assert_eq!(f.store.count(None).await.unwrap(), 1);
    assert_eq!(f.store.lexical().count(), 1);
}
