//! Client poller tests against a live server on an ephemeral port.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use helpers::{create_test_pool, new_job, seed_tenant, test_state, InstantExecutor};
use medpipe::client::{PollerConfig, StatusPoller};
use medpipe::models::JobStatus;
use medpipe::{build_router, AppState};

async fn spawn_server(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn fast_poller(base_url: &str, user_id: Uuid) -> StatusPoller {
    StatusPoller::new(
        base_url,
        user_id,
        PollerConfig {
            interval_ms: 20,
            stop_on_terminal: true,
        },
    )
}

#[tokio::test]
async fn poller_stops_on_terminal_status() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let state = test_state(pool.clone(), Arc::new(InstantExecutor));
    let base_url = spawn_server(state.clone()).await;

    let job = medpipe::db::jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();
    state.spawn_sequencer(job.job_id).await;

    let poller = fast_poller(&base_url, tenant.user_id);
    let snapshot = tokio::time::timeout(
        Duration::from_secs(10),
        poller.poll_until_terminal(job.job_id, CancellationToken::new()),
    )
    .await
    .expect("poller should observe a terminal status")
    .unwrap()
    .expect("not cancelled");

    assert_eq!(snapshot.job.status, JobStatus::Completed);
    assert_eq!(snapshot.steps.len(), 8);
}

#[tokio::test]
async fn poller_survives_transient_failures() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let state = test_state(pool.clone(), Arc::new(InstantExecutor));

    // Reserve a port, then leave it closed while the poller starts so its
    // first fetches fail with a connection error
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let job = medpipe::db::jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    let poller = fast_poller(&format!("http://{}", addr), tenant.user_id);
    let job_id = job.job_id;
    let poll = tokio::spawn(async move {
        poller
            .poll_until_terminal(job_id, CancellationToken::new())
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Bring the server up on the reserved address and run the job
    let listener = TcpListener::bind(addr).await.unwrap();
    let router = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    state.spawn_sequencer(job.job_id).await;

    let snapshot = tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("poller should recover and observe completion")
        .unwrap()
        .unwrap()
        .expect("not cancelled");

    assert_eq!(snapshot.job.status, JobStatus::Completed);
}

#[tokio::test]
async fn poller_returns_none_on_cancellation() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let state = test_state(pool, Arc::new(InstantExecutor));
    let base_url = spawn_server(state).await;

    // No job at all; the poller would retry forever without the token
    let poller = fast_poller(&base_url, tenant.user_id);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        poller.poll_until_terminal(Uuid::new_v4(), cancel),
    )
    .await
    .expect("cancellation should end the poll loop")
    .unwrap();

    assert!(result.is_none());
}
