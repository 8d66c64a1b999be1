//! End-to-end tests against live mock servers.
//!
//! # Design
//! Each test starts one or more mock servers on random ports, each on its own
//! thread and runtime, and talks to them over real HTTP through
//! `ReqwestTransport`. Server state is shared with the test so it can inject
//! faults and count the requests a host received.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mock_server::{Fault, MockState, API_KEY, APP_ID};
use serde_json::json;

use search_core::{
    ApiError, CancellationToken, ClientConfig, Execution, HostPool, HttpRequest, Query,
    ReqwestTransport, RequestExecutor, SearchClient,
};

fn start(state: MockState) -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with_state(listener, state).await
        })
        .unwrap();
    });
    addr
}

/// An address nothing listens on.
fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn config(hosts: &[SocketAddr]) -> ClientConfig {
    ClientConfig::new(APP_ID, API_KEY)
        .unwrap()
        .with_scheme("http")
        .with_timeout(Duration::from_secs(2))
        .with_hosts(hosts.iter().map(SocketAddr::to_string))
}

fn client(hosts: &[SocketAddr]) -> SearchClient {
    SearchClient::new(config(hosts)).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn object_lifecycle() {
    let addr = start(MockState::default());
    let client = client(&[addr]);
    let index = client.init_index("contacts");

    // Step 1: no indexes yet.
    let listed = client.list_indexes().await.unwrap();
    assert_eq!(listed["items"], json!([]));

    // Step 2: add with a generated ID and wait for the task.
    let added = index
        .add_object(json!({"name": "Ada", "city": "London"}))
        .await
        .unwrap();
    let generated = added["objectID"].as_str().unwrap().to_string();
    let task = index
        .wait_task(added["taskID"].as_u64().unwrap(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(task["status"], "published");

    // Step 3: save with explicit IDs, one needing encoding.
    index
        .save_object(json!({"objectID": "a/go/?à", "name": "Grace", "city": "New York"}))
        .await
        .unwrap();
    let fetched = index.get_object("a/go/?à", None).await.unwrap();
    assert_eq!(fetched["name"], "Grace");

    // Step 4: partial update keeps the other fields.
    index
        .partial_update_object(json!({"city": "Arlington"}), "a/go/?à")
        .await
        .unwrap();
    let fetched = index.get_object("a/go/?à", Some(&["city"])).await.unwrap();
    assert_eq!(fetched, json!({"objectID": "a/go/?à", "city": "Arlington"}));

    // Step 5: search.
    let result = index.search(&Query::with_text("london")).await.unwrap();
    assert_eq!(result["nbHits"], 1);
    assert_eq!(result["hits"][0]["objectID"], generated.as_str());

    let results = client
        .multiple_queries(&[
            ("contacts".to_string(), Query::with_text("grace")),
            ("nowhere".to_string(), Query::new()),
        ])
        .await
        .unwrap();
    assert_eq!(results["results"][0]["nbHits"], 1);
    assert_eq!(results["results"][1]["nbHits"], 0);

    // Step 6: settings.
    index.set_settings(json!({"hitsPerPage": 20})).await.unwrap();
    assert_eq!(index.get_settings().await.unwrap(), json!({"hitsPerPage": 20}));

    // Step 7: delete an object, then it is gone.
    index.delete_object(&generated).await.unwrap();
    let err = index.get_object(&generated, None).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.message(), Some("ObjectID does not exist"));

    // Step 8: move, then clear and delete.
    client.move_index("contacts", "people").await.unwrap();
    let listed = client.list_indexes().await.unwrap();
    assert_eq!(listed["items"], json!([{"name": "people", "entries": 1}]));
    let people = client.init_index("people");
    people.clear_index().await.unwrap();
    client.delete_index("people").await.unwrap();
    assert_eq!(client.list_indexes().await.unwrap()["items"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn user_keys_and_logs() {
    let addr = start(MockState::default());
    let client = client(&[addr]);

    let created = client.add_user_key(json!({"acl": ["search"]})).await.unwrap();
    let key = created["key"].as_str().unwrap().to_string();

    client
        .update_user_key(&key, json!({"acl": ["search", "browse"]}))
        .await
        .unwrap();
    let fetched = client.get_user_key(&key).await.unwrap();
    assert_eq!(fetched["acl"], json!(["search", "browse"]));
    assert_eq!(client.list_user_keys().await.unwrap()["keys"].as_array().unwrap().len(), 1);

    client.delete_user_key(&key).await.unwrap();
    assert_eq!(client.get_user_key(&key).await.unwrap_err().status(), Some(404));

    let logs = client.get_logs(0, 10, Some("error")).await.unwrap();
    assert_eq!(logs["logs"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn fails_over_past_dead_and_overloaded_hosts() {
    let overloaded = MockState::default();
    overloaded.set_fault(Fault::Status(503, "overloaded".into())).await;
    let healthy = MockState::default();
    let hosts = [dead_addr(), start(overloaded.clone()), start(healthy.clone())];

    let config = config(&hosts);
    let pool = HostPool::new(hosts.iter().map(SocketAddr::to_string).collect()).unwrap();
    let executor = RequestExecutor::new(Arc::new(ReqwestTransport::new().unwrap()));

    let execution = executor
        .execute(&config, &HttpRequest::get("1/indexes"), &pool, 0, &CancellationToken::new())
        .await;

    assert_eq!(execution, Execution::Succeeded(json!({"items": [], "nbPages": 1})));
    assert_eq!(overloaded.hits(), 1);
    assert_eq!(healthy.hits(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn all_hosts_overloaded_reports_last_error() {
    let first = MockState::default();
    first.set_fault(Fault::Status(502, "bad gateway".into())).await;
    let second = MockState::default();
    second.set_fault(Fault::Status(503, "overloaded".into())).await;
    let hosts = [start(first.clone()), start(second.clone())];

    let config = config(&hosts);
    let pool = HostPool::new(hosts.iter().map(SocketAddr::to_string).collect()).unwrap();
    let executor = RequestExecutor::new(Arc::new(ReqwestTransport::new().unwrap()));

    let execution = executor
        .execute(&config, &HttpRequest::get("1/indexes"), &pool, 0, &CancellationToken::new())
        .await;

    assert_eq!(
        execution,
        Execution::Failed(ApiError::HttpStatus {
            status: 503,
            message: Some("overloaded".into())
        })
    );
    assert_eq!(first.hits() + second.hits(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_api_key_is_not_retried() {
    let first = MockState::default();
    let second = MockState::default();
    let hosts = [start(first.clone()), start(second.clone())];

    let config = config(&hosts);
    let pool = HostPool::new(hosts.iter().map(SocketAddr::to_string).collect()).unwrap();
    let executor = RequestExecutor::new(Arc::new(ReqwestTransport::new().unwrap()));
    let request = HttpRequest::get("1/indexes").with_header("X-Algolia-API-Key", "wrong");

    let execution = executor
        .execute(&config, &request, &pool, 0, &CancellationToken::new())
        .await;

    let Execution::Failed(err) = execution else {
        panic!("expected failure, got {execution:?}");
    };
    assert_eq!(err.status(), Some(403));
    assert_eq!(err.message(), Some("Invalid Application-ID or API key"));
    assert_eq!(first.hits(), 1);
    assert_eq!(second.hits(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_host_times_out_and_next_host_answers() {
    let slow = MockState::default();
    slow.set_fault(Fault::Delay(Duration::from_secs(3))).await;
    let fast = MockState::default();
    let hosts = [start(slow.clone()), start(fast.clone())];

    let config = config(&hosts).with_timeout(Duration::from_millis(300));
    let pool = HostPool::new(hosts.iter().map(SocketAddr::to_string).collect()).unwrap();
    let executor = RequestExecutor::new(Arc::new(ReqwestTransport::new().unwrap()));

    let execution = executor
        .execute(&config, &HttpRequest::get("1/indexes"), &pool, 0, &CancellationToken::new())
        .await;

    assert!(matches!(execution, Execution::Succeeded(_)));
    assert_eq!(fast.hits(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_response_is_not_retried() {
    let broken = MockState::default();
    broken.set_fault(Fault::Malformed).await;
    let healthy = MockState::default();
    let hosts = [start(broken.clone()), start(healthy.clone())];

    let config = config(&hosts);
    let pool = HostPool::new(hosts.iter().map(SocketAddr::to_string).collect()).unwrap();
    let executor = RequestExecutor::new(Arc::new(ReqwestTransport::new().unwrap()));

    let execution = executor
        .execute(&config, &HttpRequest::get("1/indexes"), &pool, 0, &CancellationToken::new())
        .await;

    let Execution::Failed(err) = execution else {
        panic!("expected failure, got {execution:?}");
    };
    assert_eq!(err.status(), Some(600));
    assert_eq!(healthy.hits(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn replaced_write_host_is_skipped_on_failure() {
    let state = MockState::default();
    let addr = start(state.clone());
    let dead = dead_addr();
    let client = client(&[addr, dead]);

    // Pin the dead host to the front of the write pool.
    client.set_write_host(0, dead.to_string()).unwrap();
    client.set_write_host(1, addr.to_string()).unwrap();
    assert_eq!(client.write_hosts().hosts().to_vec(), vec![dead.to_string(), addr.to_string()]);

    let added = client
        .init_index("things")
        .add_object(json!({"kind": "widget"}))
        .await
        .unwrap();
    assert!(added["objectID"].is_string());
    assert_eq!(state.hits(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn updated_api_key_applies_to_later_calls() {
    let state = MockState::default();
    let addr = start(state.clone());
    let client = client(&[addr]);

    client.set_api_key("rotated").unwrap();
    let err = client.list_indexes().await.unwrap_err();
    assert_eq!(err.status(), Some(403));

    client.set_api_key(API_KEY).unwrap();
    client.list_indexes().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_delivers_to_callback() {
    let addr = start(MockState::default());
    let client = client(&[addr]);
    let (tx, rx) = tokio::sync::oneshot::channel();

    let handle = client.submit(
        client.build_list_indexes(),
        search_core::HostRole::Read,
        CancellationToken::new(),
        move |result| {
            let _ = tx.send(result);
        },
    );

    let result = rx.await.unwrap().unwrap();
    assert_eq!(result["items"], json!([]));
    handle.finished().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_closes_the_connection() {
    use tokio::io::AsyncReadExt;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let executor = Arc::new(RequestExecutor::new(Arc::new(ReqwestTransport::new().unwrap())));
    let delivered = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let flag = delivered.clone();
    let handle = executor.spawn(
        Arc::new(config(&[addr]).with_timeout(Duration::from_secs(10))),
        HttpRequest::get("1/indexes"),
        Arc::new(HostPool::new(vec![addr.to_string()]).unwrap()),
        0,
        CancellationToken::new(),
        move |_| flag.store(true, std::sync::atomic::Ordering::SeqCst),
    );

    // Accept and read the request head, then never answer.
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = [0u8; 4096];
    assert!(socket.read(&mut buf).await.unwrap() > 0);

    handle.cancel();
    handle.finished().await;

    // The client side must hang up well before the 10 s attempt timeout.
    let read = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(read.is_ok(), "connection still open after cancel");
    assert!(!delivered.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn objects_written_over_raw_http_are_visible() {
    let addr = start(MockState::default());
    let client = client(&[addr]);

    // Write with a bare ureq agent, independent of the client's transport.
    let status = tokio::task::spawn_blocking(move || {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        agent
            .put(&format!("http://{addr}/1/indexes/contacts/42"))
            .header("X-Algolia-Application-Id", APP_ID)
            .header("X-Algolia-API-Key", API_KEY)
            .content_type("application/json")
            .send(r#"{"name":"Linus"}"#.as_bytes())
            .unwrap()
            .status()
            .as_u16()
    })
    .await
    .unwrap();
    assert_eq!(status, 200);

    let fetched = client.init_index("contacts").get_object("42", None).await.unwrap();
    assert_eq!(fetched, json!({"objectID": "42", "name": "Linus"}));
}
