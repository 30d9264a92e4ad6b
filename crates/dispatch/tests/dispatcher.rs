//! Request dispatcher integration tests: reads, side-effect requests,
//! pagination and push events.

use std::sync::Arc;
use std::time::Duration;

use courier_dispatch::testing::{ScriptedTransport, StaticEventChannel};
use courier_dispatch::{
    ClientBuilder, FnPager, MemoryStore, NetworkState, PageRequest, PushEvent, ReactiveStore,
    RequestError, TransportError,
};
use courier_interchange::{RequestType, Response, StoreData, StoreUpdate};
use serde_json::{json, Map, Value};

fn set(key: &str, value: Value) -> StoreUpdate {
    StoreUpdate::set(key, value).unwrap()
}

/// Report actions `{"reportActionID": .., "created": ..}`, newest first.
fn actions_page(resource_key: &str, is_initial_request: bool) -> PageRequest {
    PageRequest {
        resource_key: resource_key.to_string(),
        page_key: format!("{resource_key}_pages"),
        is_initial_request,
        pager: Arc::new(FnPager::new(
            |response| {
                response
                    .get("reportActions")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            },
            |mut items| {
                items.sort_by_key(|item| std::cmp::Reverse(item["created"].as_i64()));
                items
            },
            |item| {
                item.get("reportActionID")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            },
        )),
    }
}

fn page_response(actions: Value) -> Response {
    let mut response = Response::success();
    response.payload.insert("reportActions".to_string(), actions);
    response
}

#[tokio::test]
async fn read_waits_for_queued_writes() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_latency(Duration::from_millis(20));
    let client = ClientBuilder::new(transport.clone(), Arc::new(MemoryStore::new()))
        .start()
        .await
        .unwrap();

    client.api().write("A", Map::new(), StoreData::new()).unwrap();
    client.api().write("B", Map::new(), StoreData::new()).unwrap();
    let response = client
        .api()
        .read("OpenReport", Map::new(), StoreData::new())
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(transport.commands(), vec!["A", "B", "OpenReport"]);
    client.shutdown().await;
}

#[tokio::test]
async fn writes_carry_routing_parameters() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = ClientBuilder::new(transport.clone(), Arc::new(MemoryStore::new()))
        .event_channel(Arc::new(StaticEventChannel(Some("socket-7".to_string()))))
        .start()
        .await
        .unwrap();

    client.api().write("A", Map::new(), StoreData::new()).unwrap();
    client.queue().wait_for_idle().await;

    let data = &transport.sent()[0].1;
    assert_eq!(data["apiRequestType"], json!("write"));
    assert_eq!(data["pusherSocketID"], json!("socket-7"));
    assert_eq!(data["shouldRetry"], json!(true));
    assert_eq!(data["canCancel"], json!(true));
    client.shutdown().await;
}

#[tokio::test]
async fn side_effect_request_returns_response() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut reply = Response::success();
    reply.payload.insert("link".to_string(), json!("https://example.com/x"));
    transport.reply_to("GetLink", Ok(reply));
    let store = Arc::new(MemoryStore::new());
    let client = ClientBuilder::new(transport.clone(), store.clone())
        .start()
        .await
        .unwrap();

    let response = client
        .api()
        .make_request_with_side_effects(
            "GetLink",
            Map::new(),
            StoreData::new().finally(set("isLoading", json!(false))),
            RequestType::MakeRequestWithSideEffects,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.get("link"), Some(&json!("https://example.com/x")));
    assert_eq!(store.get("isLoading"), Some(json!(false)));
    assert_eq!(
        transport.sent()[0].1["apiRequestType"],
        json!("makeRequestWithSideEffects")
    );
    client.shutdown().await;
}

#[tokio::test]
async fn side_effect_request_typed_write_is_queued() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = ClientBuilder::new(transport.clone(), Arc::new(MemoryStore::new()))
        .start()
        .await
        .unwrap();

    let outcome = client
        .api()
        .make_request_with_side_effects("A", Map::new(), StoreData::new(), RequestType::Write)
        .await
        .unwrap();
    assert!(outcome.is_none());

    client.queue().wait_for_idle().await;
    assert_eq!(transport.sent()[0].1["apiRequestType"], json!("write"));
    client.shutdown().await;
}

#[tokio::test]
async fn one_shot_without_response_applies_failure_data() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.reply_to("OpenReport", Err(TransportError::Timeout));
    let store = Arc::new(MemoryStore::new());
    let client = ClientBuilder::new(transport.clone(), store.clone())
        .start()
        .await
        .unwrap();

    let outcome = client
        .api()
        .read(
            "OpenReport",
            Map::new(),
            StoreData::new()
                .optimistic(set("isLoading", json!(true)))
                .on_failure(set("isLoading", json!(false))),
        )
        .await;

    assert_eq!(outcome, Err(RequestError::Transport(TransportError::Timeout)));
    assert_eq!(store.get("isLoading"), Some(json!(false)));
    client.shutdown().await;
}

#[tokio::test]
async fn one_shot_while_offline_fails_fast() {
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(MemoryStore::new());
    let client = ClientBuilder::new(transport.clone(), store.clone())
        .network(Arc::new(NetworkState::new(false)))
        .start()
        .await
        .unwrap();

    let outcome = client
        .api()
        .read(
            "OpenReport",
            Map::new(),
            StoreData::new().finally(set("isLoading", json!(false))),
        )
        .await;

    assert_eq!(outcome, Err(RequestError::Offline));
    assert!(transport.sent().is_empty());
    assert_eq!(store.get("isLoading"), Some(json!(false)));
    client.shutdown().await;
}

#[tokio::test]
async fn malformed_input_is_rejected_synchronously() {
    let client = ClientBuilder::new(
        Arc::new(ScriptedTransport::new()),
        Arc::new(MemoryStore::new()),
    )
    .start()
    .await
    .unwrap();

    let ambiguous = StoreData::new()
        .on_success(set("a", json!(1)))
        .finally(set("a", json!(2)));
    assert!(client.api().write("A", Map::new(), ambiguous).is_err());
    assert!(client.api().write("", Map::new(), StoreData::new()).is_err());
    assert!(client.queue().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn paginate_merges_pages_idempotently() {
    let transport = Arc::new(ScriptedTransport::new());
    let first = json!([
        {"reportActionID": "3", "created": 3},
        {"reportActionID": "2", "created": 2}
    ]);
    let older = json!([
        {"reportActionID": "2", "created": 2},
        {"reportActionID": "1", "created": 1}
    ]);
    transport.reply_to("OpenReport", Ok(page_response(first)));
    transport.reply_to("GetOlderActions", Ok(page_response(older.clone())));
    transport.reply_to("GetOlderActions", Ok(page_response(older)));
    let store = Arc::new(MemoryStore::new());
    let client = ClientBuilder::new(transport.clone(), store.clone())
        .start()
        .await
        .unwrap();
    let api = client.api();

    api.paginate("OpenReport", Map::new(), actions_page("reportActions_1", true), StoreData::new())
        .await
        .unwrap();
    api.paginate("GetOlderActions", Map::new(), actions_page("reportActions_1", false), StoreData::new())
        .await
        .unwrap();
    let once = store.get("reportActions_1");
    api.paginate("GetOlderActions", Map::new(), actions_page("reportActions_1", false), StoreData::new())
        .await
        .unwrap();

    assert_eq!(store.get("reportActions_1"), once);
    assert_eq!(store.get("reportActions_1_pages"), Some(json!(["3", "2", "1"])));
    client.shutdown().await;
}

#[tokio::test]
async fn push_events_fill_update_gaps() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut missing = Response::success();
    missing.onyx_data = vec![set("report_1", json!({"total": 10}))];
    transport.reply_to("GetMissingOnyxMessages", Ok(missing));
    let store = Arc::new(MemoryStore::new());
    let client = ClientBuilder::new(transport.clone(), store.clone())
        .start()
        .await
        .unwrap();

    client
        .api()
        .receive_push_event(PushEvent {
            updates: vec![],
            previous_update_id: None,
            last_update_id: Some(5),
        })
        .await;
    client
        .api()
        .receive_push_event(PushEvent {
            updates: vec![StoreUpdate::merge("report_1", json!({"name": "Trip"})).unwrap()],
            previous_update_id: Some(7),
            last_update_id: Some(8),
        })
        .await;

    assert_eq!(transport.commands(), vec!["GetMissingOnyxMessages"]);
    assert_eq!(
        store.get("report_1"),
        Some(json!({"total": 10, "name": "Trip"}))
    );
    assert_eq!(store.get("lastUpdateIDAppliedToClient"), Some(json!(8)));

    // A replayed, older batch is ignored.
    client
        .api()
        .receive_push_event(PushEvent {
            updates: vec![set("report_1", json!(null))],
            previous_update_id: Some(6),
            last_update_id: Some(7),
        })
        .await;
    assert!(store.get("report_1").is_some());
    client.shutdown().await;
}
