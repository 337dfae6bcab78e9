// Integration tests for the session store across storage backends
use actix_web::cookie::Cookie;
use actix_web::test::TestRequest;
use actix_web::HttpResponse;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use oidc_gateway::session::{
    CookieCodec, CookieCodecs, CookieError, SessionOptions, SessionStore, StoreError,
    ValueSerializer,
};
use oidc_gateway::storage::{Connection, FileConnection, MemoryConnection};
use oidc_gateway::testing::{is_removal, memory_store, store_with_connection};

const NAME: &str = "oidc-auth-session";

fn request_with(cookie: &Cookie<'static>) -> actix_web::HttpRequest {
    TestRequest::default().cookie(cookie.clone()).to_http_request()
}

fn store_with_keys(
    connection: Arc<dyn Connection>,
    keys: &[&[u8]],
    serializer: ValueSerializer,
) -> SessionStore {
    let codecs = keys.iter().map(|key| CookieCodec::new(key, None)).collect();
    SessionStore::new(
        connection,
        CookieCodecs::new(codecs).unwrap(),
        serializer,
        SessionOptions {
            max_age: 600,
            ..SessionOptions::default()
        },
    )
}

async fn assert_round_trip(store: &SessionStore) {
    let session = store.fresh(NAME);
    session.insert("user_name", "alice").unwrap();
    session
        .insert("user_groups", vec!["admins", "dev"])
        .unwrap();
    session.insert("id_token", "raw.id.token").unwrap();
    let cookie = store.save(&session).await.unwrap();

    let loaded = store.get(&request_with(&cookie), NAME).await.unwrap();
    assert!(!loaded.is_new());
    assert_eq!(loaded.id(), session.id());
    assert_eq!(loaded.values(), session.values());
}

#[actix_web::test]
async fn test_alice_scenario_memory_backend() {
    let store = memory_store(1000);
    let session = store.fresh(NAME);
    session.insert("user_name", "alice").unwrap();

    let cookie = store.save(&session).await.unwrap();
    let response = HttpResponse::Ok().cookie(cookie.clone()).finish();
    assert_eq!(response.cookies().count(), 1);
    assert_eq!(cookie.max_age(), Some(actix_web::cookie::time::Duration::seconds(1000)));
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.path(), Some("/"));

    let loaded = store.get(&request_with(&cookie), NAME).await.unwrap();
    assert_eq!(
        loaded.get::<String>("user_name").unwrap().as_deref(),
        Some("alice")
    );
    assert!(!loaded.is_new());
}

#[actix_web::test]
async fn test_round_trip_memory_backend() {
    assert_round_trip(&memory_store(600)).await;
}

#[actix_web::test]
async fn test_round_trip_file_backend() {
    let dir = tempdir().unwrap();
    let connection =
        FileConnection::open(&dir.path().join("sessions.redb"), "sessions", 600, Duration::ZERO)
            .unwrap();
    let store = store_with_connection(Arc::new(connection), 600);
    assert_round_trip(&store).await;
    store.close().await.unwrap();
}

#[actix_web::test]
async fn test_round_trip_json_serializer() {
    let store = store_with_keys(
        Arc::new(MemoryConnection::new()),
        &[b"json-hash-key"],
        ValueSerializer::Json,
    );
    assert_round_trip(&store).await;
}

#[actix_web::test]
async fn test_cookie_never_carries_values() {
    let store = memory_store(600);
    let session = store.fresh(NAME);
    session.insert("user_name", "alice").unwrap();
    let cookie = store.save(&session).await.unwrap();
    assert!(!cookie.value().contains("alice"));
}

#[actix_web::test]
async fn test_non_positive_max_age_deletes_record() {
    let connection = Arc::new(MemoryConnection::new());
    let store = store_with_connection(connection.clone(), 600);
    let session = store.fresh(NAME);
    session.insert("user_name", "alice").unwrap();
    let issued = store.save(&session).await.unwrap();
    assert_eq!(connection.len(), 1);

    session.set_max_age(-1);
    let removal = store.save(&session).await.unwrap();
    assert!(is_removal(&removal));
    assert!(connection.is_empty());

    // Deleting twice is harmless
    store.save(&session).await.unwrap();

    let reloaded = store.get(&request_with(&issued), NAME).await.unwrap();
    assert!(reloaded.is_new());
    assert!(reloaded.get::<String>("user_name").unwrap().is_none());
}

#[actix_web::test]
async fn test_expired_cookie_is_an_error_not_a_stale_session() {
    let store = memory_store(600);
    store.set_max_age(1);
    let session = store.fresh(NAME);
    session.insert("user_name", "alice").unwrap();
    let cookie = store.save(&session).await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let err = store.get(&request_with(&cookie), NAME).await.unwrap_err();
    assert!(err.is_client_error());
    assert!(matches!(
        err.error(),
        StoreError::Cookie(CookieError::Expired)
    ));
    let fresh = err.into_session();
    assert!(fresh.is_new());
    assert!(fresh.values().is_empty());
}

#[actix_web::test]
async fn test_rotated_keys_keep_old_cookies_valid() {
    let connection: Arc<dyn Connection> = Arc::new(MemoryConnection::new());
    let old_store = store_with_keys(Arc::clone(&connection), &[b"old-key"], ValueSerializer::Cbor);
    let session = old_store.fresh(NAME);
    session.insert("user_name", "alice").unwrap();
    let old_cookie = old_store.save(&session).await.unwrap();

    let rotated = store_with_keys(
        Arc::clone(&connection),
        &[b"new-key", b"old-key"],
        ValueSerializer::Cbor,
    );
    let loaded = rotated.get(&request_with(&old_cookie), NAME).await.unwrap();
    assert!(!loaded.is_new());

    // New cookies are signed with the newest key only
    let new_cookie = rotated.save(&loaded).await.unwrap();
    let new_only = store_with_keys(Arc::clone(&connection), &[b"new-key"], ValueSerializer::Cbor);
    assert!(new_only.get(&request_with(&new_cookie), NAME).await.is_ok());

    let err = new_only
        .get(&request_with(&old_cookie), NAME)
        .await
        .unwrap_err();
    assert!(matches!(
        err.error(),
        StoreError::Cookie(CookieError::InvalidSignature)
    ));
}

#[actix_web::test]
async fn test_file_backend_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.redb");

    let cookie = {
        let connection = FileConnection::open(&path, "sessions", 600, Duration::ZERO).unwrap();
        let store = store_with_connection(Arc::new(connection), 600);
        let session = store.fresh(NAME);
        session.insert("user_name", "alice").unwrap();
        let cookie = store.save(&session).await.unwrap();
        store.close().await.unwrap();
        cookie
    };

    let connection = FileConnection::open(&path, "sessions", 600, Duration::ZERO).unwrap();
    let store = store_with_connection(Arc::new(connection), 600);
    let loaded = store.get(&request_with(&cookie), NAME).await.unwrap();
    assert_eq!(
        loaded.get::<String>("user_name").unwrap().as_deref(),
        Some("alice")
    );
}

#[tokio::test]
async fn test_file_sweep_removes_record_and_index_entry() {
    let dir = tempdir().unwrap();
    let connection = FileConnection::open(
        &dir.path().join("sessions.redb"),
        "sessions",
        1,
        Duration::ZERO,
    )
    .unwrap();

    connection.save("stale", b"old", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    connection.save("live", b"new", 600).await.unwrap();
    assert_eq!(connection.table_sizes().await.unwrap(), (2, 2));

    let removed = connection.sweep_expired(1).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(connection.table_sizes().await.unwrap(), (1, 1));
    assert_eq!(connection.load("stale").await.unwrap(), None);
    assert!(connection.load("live").await.unwrap().is_some());
}

#[tokio::test]
async fn test_background_sweep_runs_until_close() {
    let dir = tempdir().unwrap();
    let connection = FileConnection::open(
        &dir.path().join("sessions.redb"),
        "sessions",
        1,
        Duration::from_millis(300),
    )
    .unwrap();

    connection.save("short-lived", b"data", 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(connection.table_sizes().await.unwrap(), (0, 0));

    connection.close().await.unwrap();
    assert!(connection.load("short-lived").await.is_err());
}
