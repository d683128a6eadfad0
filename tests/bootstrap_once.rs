mod common;

use common::{MockBackend, fast_limits, identity, shared_hub};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bootstrap_runs_once() {
    let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(10)));
    let hub = shared_hub(&backend, fast_limits(3));
    let holder = hub.open(&identity("acct")).await;

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let hub = hub.clone();
        tasks.push(tokio::spawn(async move {
            let session = hub.open(&identity("acct")).await;
            let record = session.bootstrap().await;
            session.close().await;
            record.unwrap()
        }));
    }
    let mut records = Vec::new();
    for task in tasks {
        records.push(task.await.unwrap());
    }

    assert_eq!(backend.count("get_me"), 1);
    assert_eq!(backend.count("get_dialogs"), 1);
    for record in &records {
        assert!(Arc::ptr_eq(record, &records[0]));
        assert_eq!(record.me.id, 42);
        assert_eq!(record.chats.len(), 5);
    }
    holder.close().await;
}

#[tokio::test]
async fn test_bootstrap_runs_again_after_reconnect() {
    let backend = Arc::new(MockBackend::new());
    let hub = shared_hub(&backend, fast_limits(3));

    let session = hub.open(&identity("acct")).await;
    session.bootstrap().await.unwrap();
    session.bootstrap().await.unwrap();
    session.close().await;
    assert_eq!(backend.count("get_me"), 1);

    let session = hub.open(&identity("acct")).await;
    session.bootstrap().await.unwrap();
    session.close().await;
    assert_eq!(backend.count("get_me"), 2);
}

#[tokio::test]
async fn test_bootstrap_persists_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let factory_backend = backend.clone();
    let hub = autosign::session::SessionHub::new(
        Arc::new(move |_: &autosign::session::ConnectionIdentity| {
            factory_backend.clone() as Arc<dyn autosign::backend::Backend>
        }),
        fast_limits(3),
        autosign::session::BootstrapCoordinator::new(Some(dir.path().to_path_buf()), 2),
    );

    let id = identity("acct");
    let session = hub.open(&id).await;
    session.bootstrap().await.unwrap();
    session.close().await;

    let state = dir.path().join(id.state_key());
    let chats: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(state.join("latest_chats.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(chats.as_array().unwrap().len(), 2);
    assert!(state.join("me.json").is_file());
}
