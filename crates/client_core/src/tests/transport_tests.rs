use super::*;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use shared::{domain::ItemId, error::ErrorCode};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone)]
struct MockState {
    submissions: Arc<Mutex<Vec<Vec<(String, String)>>>>,
    submit_reply: Arc<Mutex<(StatusCode, String)>>,
    poll_reply: Arc<Mutex<(StatusCode, String)>>,
}

impl MockState {
    fn new() -> Self {
        Self {
            submissions: Arc::new(Mutex::new(Vec::new())),
            submit_reply: Arc::new(Mutex::new((
                StatusCode::OK,
                r#"{"poll_url":"/reviews/batch/poll/1/"}"#.to_string(),
            ))),
            poll_reply: Arc::new(Mutex::new((
                StatusCode::OK,
                r#"{"progress":42.4,"done":false}"#.to_string(),
            ))),
        }
    }

    async fn reply_submit(&self, status: StatusCode, body: &str) {
        *self.submit_reply.lock().await = (status, body.to_string());
    }

    async fn reply_poll(&self, status: StatusCode, body: &str) {
        *self.poll_reply.lock().await = (status, body.to_string());
    }
}

async fn handle_submit(State(state): State<MockState>, body: String) -> Response {
    let pairs = url::form_urlencoded::parse(body.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    state.submissions.lock().await.push(pairs);
    let (status, body) = state.submit_reply.lock().await.clone();
    (status, body).into_response()
}

async fn handle_poll(State(state): State<MockState>) -> Response {
    let (status, body) = state.poll_reply.lock().await.clone();
    (status, body).into_response()
}

async fn handle_stalled_poll() -> Response {
    tokio::time::sleep(Duration::from_secs(10)).await;
    StatusCode::OK.into_response()
}

async fn spawn_batch_server() -> anyhow::Result<(String, MockState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = MockState::new();
    let app = Router::new()
        .route("/reviews/batch/", post(handle_submit))
        .route("/app/reviews/batch/", post(handle_submit))
        .route("/reviews/batch/poll/1/", get(handle_poll))
        .route("/reviews/batch/poll/stalled/", get(handle_stalled_poll))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn request() -> OperationRequest {
    OperationRequest::new([ItemId(5), ItemId(8)]).with_field("action", "close")
}

#[tokio::test]
async fn submit_posts_form_and_resolves_relative_poll_url() {
    let (server_url, state) = spawn_batch_server().await.expect("spawn server");
    let transport = HttpTransport::new(&server_url, "/reviews/batch/").expect("transport");

    let handle = transport.submit(&request()).await.expect("submit");
    assert_eq!(
        handle.as_str(),
        format!("{server_url}/reviews/batch/poll/1/")
    );

    let submissions = state.submissions.lock().await.clone();
    assert_eq!(
        submissions,
        vec![vec![
            ("review_ids".to_string(), "5".to_string()),
            ("review_ids".to_string(), "8".to_string()),
            ("action".to_string(), "close".to_string()),
        ]]
    );
}

#[tokio::test]
async fn relative_submit_path_keeps_server_path_prefix() {
    let (server_url, state) = spawn_batch_server().await.expect("spawn server");
    let transport =
        HttpTransport::new(&format!("{server_url}/app"), "reviews/batch/").expect("transport");
    assert_eq!(
        transport.submit_url().as_str(),
        format!("{server_url}/app/reviews/batch/")
    );

    transport.submit(&request()).await.expect("submit");
    assert_eq!(state.submissions.lock().await.len(), 1);
}

#[tokio::test]
async fn absolute_poll_url_is_used_verbatim() {
    let (server_url, state) = spawn_batch_server().await.expect("spawn server");
    state
        .reply_submit(
            StatusCode::OK,
            r#"{"poll_url":"https://jobs.example.com/poll/77/"}"#,
        )
        .await;
    let transport = HttpTransport::new(&server_url, "/reviews/batch/").expect("transport");

    let handle = transport.submit(&request()).await.expect("submit");
    assert_eq!(handle.as_str(), "https://jobs.example.com/poll/77/");
}

#[tokio::test]
async fn rejection_uses_api_error_message() {
    let (server_url, state) = spawn_batch_server().await.expect("spawn server");
    let body = serde_json::to_string(&shared::error::ApiError::new(
        ErrorCode::Forbidden,
        "not a leader of these reviews",
    ))
    .expect("encode");
    state.reply_submit(StatusCode::FORBIDDEN, &body).await;
    let transport = HttpTransport::new(&server_url, "/reviews/batch/").expect("transport");

    let err = transport.submit(&request()).await.expect_err("rejected");
    assert_eq!(
        err,
        SubmissionError::Rejected {
            status: 403,
            message: "not a leader of these reviews".to_string(),
        }
    );
}

#[tokio::test]
async fn rejection_falls_back_to_body_text_or_reason() {
    let (server_url, state) = spawn_batch_server().await.expect("spawn server");
    let transport = HttpTransport::new(&server_url, "/reviews/batch/").expect("transport");

    state
        .reply_submit(StatusCode::BAD_REQUEST, "  no review selected \n")
        .await;
    let err = transport.submit(&request()).await.expect_err("rejected");
    assert_eq!(
        err,
        SubmissionError::Rejected {
            status: 400,
            message: "no review selected".to_string(),
        }
    );

    state.reply_submit(StatusCode::BAD_GATEWAY, "").await;
    let err = transport.submit(&request()).await.expect_err("rejected");
    assert_eq!(
        err,
        SubmissionError::Rejected {
            status: 502,
            message: "Bad Gateway".to_string(),
        }
    );
}

#[tokio::test]
async fn malformed_submit_body_is_reported() {
    let (server_url, state) = spawn_batch_server().await.expect("spawn server");
    state.reply_submit(StatusCode::OK, r#"{"job":1}"#).await;
    let transport = HttpTransport::new(&server_url, "/reviews/batch/").expect("transport");

    let err = transport.submit(&request()).await.expect_err("malformed");
    assert!(
        matches!(err, SubmissionError::MalformedResponse(_)),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let transport =
        HttpTransport::new(&format!("http://{addr}"), "/reviews/batch/").expect("transport");
    let err = transport.submit(&request()).await.expect_err("unreachable");
    assert!(
        matches!(err, SubmissionError::Transport(_)),
        "unexpected error: {err:?}"
    );

    let err = transport
        .poll(&OperationHandle::new(format!("http://{addr}/poll/1/")))
        .await
        .expect_err("unreachable");
    assert!(matches!(err, PollError::Transport(_)), "unexpected error: {err:?}");
}

#[tokio::test]
async fn poll_decodes_progress_report() {
    let (server_url, _state) = spawn_batch_server().await.expect("spawn server");
    let transport = HttpTransport::new(&server_url, "/reviews/batch/").expect("transport");
    let handle = transport.submit(&request()).await.expect("submit");

    let report = transport.poll(&handle).await.expect("poll");
    assert_eq!(report, ProgressReport::new(42, false));
}

#[tokio::test]
async fn poll_failures_map_to_poll_errors() {
    let (server_url, state) = spawn_batch_server().await.expect("spawn server");
    let transport = HttpTransport::new(&server_url, "/reviews/batch/").expect("transport");
    let handle = transport.submit(&request()).await.expect("submit");

    state
        .reply_poll(StatusCode::INTERNAL_SERVER_ERROR, "task backend down")
        .await;
    let err = transport.poll(&handle).await.expect_err("status");
    assert_eq!(
        err,
        PollError::Status {
            status: 500,
            message: "task backend down".to_string(),
        }
    );

    state.reply_poll(StatusCode::OK, "not json").await;
    let err = transport.poll(&handle).await.expect_err("malformed");
    assert!(matches!(err, PollError::MalformedResponse(_)), "unexpected error: {err:?}");
}

#[tokio::test]
async fn unanswered_poll_request_times_out() {
    let (server_url, _state) = spawn_batch_server().await.expect("spawn server");
    let http = Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .expect("client");
    let transport =
        HttpTransport::with_client(http, &server_url, "/reviews/batch/").expect("transport");

    let handle = OperationHandle::new(format!("{server_url}/reviews/batch/poll/stalled/"));
    let err = tokio::time::timeout(Duration::from_secs(5), transport.poll(&handle))
        .await
        .expect("request timeout should fire first")
        .expect_err("stalled");
    assert!(matches!(err, PollError::Transport(_)), "unexpected error: {err:?}");
}

#[test]
fn rejects_server_url_without_http_scheme() {
    let err = HttpTransport::new("localhost:8000", "/reviews/batch/").expect_err("invalid");
    assert!(matches!(err, SubmissionError::InvalidUrl(_)), "unexpected error: {err:?}");
}

#[test]
fn long_error_bodies_are_truncated() {
    let body = "x".repeat(MAX_ERROR_BODY_CHARS * 3);
    let message = error_message(StatusCode::BAD_GATEWAY, &body);
    assert_eq!(message.len(), MAX_ERROR_BODY_CHARS);
}
