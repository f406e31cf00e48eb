use futures::StreamExt;
use httpmock::prelude::*;
use queuewire_client::transport::{MultipartFile, TransportRequest};
use queuewire_client::{ClientOptions, HttpTransport, Transport};
use queuewire_core::BlobHandle;
use serde_json::json;

fn transport() -> HttpTransport {
    HttpTransport::new(&ClientOptions::default()).unwrap()
}

#[tokio::test]
async fn test_json_post_round_trip() {
    let server = MockServer::start_async().await;
    let join = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/queue/join")
                .header("authorization", "Bearer hf_x")
                .json_body(json!({"fn_index": 0, "data": ["hi"]}));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"event_id": "e1"}));
        })
        .await;

    let request = TransportRequest::post_json(
        server.url("/queue/join"),
        json!({"fn_index": 0, "data": ["hi"]}),
    )
    .with_headers(&[("Authorization".to_string(), "Bearer hf_x".to_string())]);
    let response = transport().request(request).await.unwrap();

    join.assert_async().await;
    assert!(response.is_success());
    assert_eq!(response.body, json!({"event_id": "e1"}));
}

#[tokio::test]
async fn test_error_status_is_a_response_not_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/config");
            then.status(500).body("internal error");
        })
        .await;

    let response = transport()
        .request(TransportRequest::get(server.url("/config")))
        .await
        .unwrap();

    assert_eq!(response.status, 500);
    assert_eq!(response.body, json!("internal error"));
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_multipart_upload() {
    let server = MockServer::start_async().await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/upload")
                .body_contains("doc.txt")
                .body_contains("hello");
            then.status(200).json_body(json!(["/tmp/gradio/doc.txt"]));
        })
        .await;

    let handle = BlobHandle::new(b"hello".to_vec()).with_filename("doc.txt");
    let request = TransportRequest::post_multipart(
        server.url("/upload"),
        vec![MultipartFile::from_handle(&handle)],
    );
    let response = transport().request(request).await.unwrap();

    upload.assert_async().await;
    assert_eq!(response.body, json!(["/tmp/gradio/doc.txt"]));
}

#[tokio::test]
async fn test_event_stream_yields_frame_data() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/queue/data")
                .query_param("session_hash", "abc")
                .header("accept", "text/event-stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(
                    "data: {\"msg\": \"estimation\", \"event_id\": \"e1\"}\n\n\
                     data: {\"msg\": \"close_stream\"}\n\n",
                );
        })
        .await;

    let frames: Vec<String> = transport()
        .open_stream(&server.url("/queue/data?session_hash=abc"), &[])
        .await
        .unwrap()
        .map(|frame| frame.unwrap())
        .collect()
        .await;

    assert_eq!(
        frames,
        vec![
            r#"{"msg": "estimation", "event_id": "e1"}"#.to_string(),
            r#"{"msg": "close_stream"}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn test_event_stream_rejects_error_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/queue/data");
            then.status(404);
        })
        .await;

    let result = transport()
        .open_stream(&server.url("/queue/data?session_hash=abc"), &[])
        .await;

    assert!(result.is_err());
}
