use httpmock::prelude::*;
use queuewire_client::{Client, ClientError, ClientOptions, Payload};
use queuewire_core::BlobHandle;
use serde_json::json;

async fn app(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/config");
            then.status(200).json_body(json!({
                "protocol": "sse_v3",
                "dependencies": [
                    {"api_name": "caption", "types": {"generator": false}},
                    {"api_name": "render", "types": {"generator": false}}
                ]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/info");
            then.status(200).json_body(json!({
                "named_endpoints": {
                    "/caption": {
                        "parameters": [{"label": "Doc", "parameter_name": "doc", "component": "File"}],
                        "returns": [{"label": "Caption", "component": "Textbox"}]
                    },
                    "/render": {
                        "parameters": [],
                        "returns": [{"label": "Report", "component": "File"}]
                    }
                },
                "unnamed_endpoints": {}
            }));
        })
        .await;
}

#[tokio::test]
async fn test_failed_upload_never_creates_a_job() {
    let server = MockServer::start_async().await;
    app(&server).await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST).path("/upload");
            then.status(500).body("disk full");
        })
        .await;
    let join = server
        .mock_async(|when, then| {
            when.method(POST).path("/queue/join");
            then.status(200).json_body(json!({"event_id": "e1"}));
        })
        .await;
    let data = server
        .mock_async(|when, then| {
            when.method(GET).path("/queue/data");
            then.status(200).header("content-type", "text/event-stream").body("");
        })
        .await;

    let client = Client::connect(&server.base_url(), ClientOptions::default())
        .await
        .unwrap();
    let doc = BlobHandle::new(b"hello".to_vec()).with_filename("doc.txt");
    let err = client
        .submit("caption", vec![Payload::Blob(doc)])
        .await
        .err()
        .expect("submit should fail");

    assert!(matches!(err, ClientError::UploadFailed { ref reason } if reason.contains("500")));
    upload.assert_async().await;
    assert_eq!(join.hits_async().await, 0);
    assert_eq!(data.hits_async().await, 0);
}

#[tokio::test]
async fn test_predict_over_http_resolves_file_outputs() {
    let server = MockServer::start_async().await;
    app(&server).await;
    let join = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/queue/join")
                .json_body_partial(r#"{"fn_index": 1}"#);
            then.status(200).json_body(json!({"event_id": "r1"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/queue/data");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(
                    "data: {\"msg\": \"process_starts\", \"event_id\": \"r1\"}\n\n\
                     data: {\"msg\": \"process_completed\", \"event_id\": \"r1\", \"success\": true, \
                     \"output\": {\"data\": [{\"is_file\": true, \"name\": \"/tmp/out.pdf\"}]}}\n\n",
                );
        })
        .await;

    let client = Client::connect(&server.base_url(), ClientOptions::default())
        .await
        .unwrap();
    let output = client.predict("/render", Vec::<Payload>::new()).await.unwrap();

    join.assert_async().await;
    assert_eq!(
        output.to_json().unwrap(),
        json!([{"is_file": true, "name": "/tmp/out.pdf", "data": server.url("/file=/tmp/out.pdf")}])
    );
}
