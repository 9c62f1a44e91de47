// Integration tests for the resilient API invoker and outbound messaging.
//
// Tokens come from an in-process source so each test controls exactly which
// token the platform mock sees; the platform itself is a mockito server.

use async_trait::async_trait;
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wecom_gateway::client::{ApiClient, ApiRequest, RetryPolicy};
use wecom_gateway::config::CredentialScope;
use wecom_gateway::error::{GatewayError, TokenError};
use wecom_gateway::outbound::{Messenger, OutboundAdapter};
use wecom_gateway::token::{IssuedToken, TokenSource, TokenStore};

// ── Test fixtures ─────────────────────────────────────────────────────────────

/// Issues `token-1`, `token-2`, ... and counts fetches.
#[derive(Default)]
struct SequentialSource {
    issued: AtomicUsize,
}

#[async_trait]
impl TokenSource for SequentialSource {
    async fn issue(&self, _scope: &CredentialScope) -> Result<IssuedToken, TokenError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedToken {
            access_token: format!("token-{}", n),
            expires_in: Some(7200),
        })
    }
}

struct RejectingSource;

#[async_trait]
impl TokenSource for RejectingSource {
    async fn issue(&self, _scope: &CredentialScope) -> Result<IssuedToken, TokenError> {
        Err(TokenError::Rejected {
            code: 40001,
            message: "invalid credential".to_string(),
        })
    }
}

fn scope() -> CredentialScope {
    CredentialScope::new("ww-corp", "secret", 1000002)
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_base: Duration::from_millis(5),
    }
}

fn client_with(
    base_url: &str,
    source: Arc<dyn TokenSource>,
    max_retries: u32,
) -> Arc<ApiClient> {
    let tokens = Arc::new(TokenStore::new(source));
    Arc::new(ApiClient::new(
        reqwest::Client::new(),
        base_url,
        tokens,
        fast_policy(max_retries),
    ))
}

fn token_query(token: &str) -> Matcher {
    Matcher::UrlEncoded("access_token".into(), token.into())
}

// ── Invoker ───────────────────────────────────────────────────────────────────

/// An expired-token code invalidates the cache and the retry uses a new token.
#[tokio::test]
async fn test_session_expired_retries_with_fresh_token() {
    let mut server = Server::new_async().await;
    let stale = server
        .mock("POST", "/message/send")
        .match_query(token_query("token-1"))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":42001,"errmsg":"access_token expired"}"#)
        .expect(1)
        .create_async()
        .await;
    let fresh = server
        .mock("POST", "/message/send")
        .match_query(token_query("token-2"))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"errmsg":"ok","msgid":"msg-42"}"#)
        .expect(1)
        .create_async()
        .await;

    let source = Arc::new(SequentialSource::default());
    let client = client_with(&server.url(), source.clone(), 3);
    let messenger = Messenger::new(Arc::clone(&client), scope());

    let receipt = messenger.send_text("user:zhangsan", "hello").await.unwrap();
    assert_eq!(receipt.message_id, "msg-42");
    assert_eq!(receipt.chat_id, "zhangsan");

    // The rejected token was dropped once and replaced by exactly one refetch
    assert_eq!(source.issued.load(Ordering::SeqCst), 2);
    let cached = client.tokens().cached(&scope()).unwrap();
    assert_eq!(cached.token, "token-2");

    stale.assert_async().await;
    fresh.assert_async().await;
}

/// Expiry codes and transport failures draw from one budget.
#[tokio::test]
async fn test_session_expired_exhausts_budget() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/user/get")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":40014,"errmsg":"invalid access_token"}"#)
        .expect(2)
        .create_async()
        .await;

    let source = Arc::new(SequentialSource::default());
    let client = client_with(&server.url(), source.clone(), 2);
    let messenger = Messenger::new(Arc::clone(&client), scope());

    let err = messenger.get_user("zhangsan").await.unwrap_err();
    assert_eq!(err.api_code(), Some(40014));
    assert_eq!(source.issued.load(Ordering::SeqCst), 2);
    // Rejected on the last attempt too, so nothing stale stays cached
    assert!(client.tokens().cached(&scope()).is_none());
    mock.assert_async().await;
}

/// Any other business error is returned after a single attempt.
#[tokio::test]
async fn test_business_error_fails_fast() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/message/send")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":60020,"errmsg":"not allow to access from your ip"}"#)
        .expect(1)
        .create_async()
        .await;

    let source = Arc::new(SequentialSource::default());
    let messenger = Messenger::new(client_with(&server.url(), source.clone(), 3), scope());

    match messenger.send_text("zhangsan", "hi").await {
        Err(GatewayError::Api { code, message, .. }) => {
            assert_eq!(code, 60020);
            assert!(message.contains("not allow"));
        }
        other => panic!("expected API error, got {:?}", other),
    }
    assert_eq!(source.issued.load(Ordering::SeqCst), 1);
    mock.assert_async().await;
}

/// Non-2xx responses count as transport failures and are retried.
#[tokio::test]
async fn test_server_error_retried_then_transport_error() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/user/get")
        .match_query(Matcher::Any)
        .with_status(502)
        .expect(3)
        .create_async()
        .await;

    let client = client_with(&server.url(), Arc::new(SequentialSource::default()), 3);
    let err = client
        .invoke(&scope(), &ApiRequest::get("/user/get"))
        .await
        .unwrap_err();

    match err {
        GatewayError::Transport { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected transport error, got {:?}", other),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_host_reports_attempts() {
    let client = client_with("http://127.0.0.1:1", Arc::new(SequentialSource::default()), 2);
    let err = client
        .invoke(&scope(), &ApiRequest::get("/user/get"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Transport { attempts: 2, .. }));
}

/// A transient failure followed by success returns the success.
#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("GET", "/user/get")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let _ok = server
        .mock("GET", "/user/get")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"userid":"zhangsan","name":"Zhang San"}"#)
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    // First attempt hits the 503 mock, the retry reaches the 200 mock
    let user = messenger.get_user("zhangsan").await.unwrap();
    assert_eq!(user["name"], "Zhang San");
    failing.assert_async().await;
}

/// Token acquisition failures are not retried and nothing is sent.
#[tokio::test]
async fn test_token_error_fails_fast() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/message/send")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let messenger = Messenger::new(client_with(&server.url(), Arc::new(RejectingSource), 3), scope());
    let err = messenger.send_text("zhangsan", "hi").await.unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Token(TokenError::Rejected { code: 40001, .. })
    ));
    assert_eq!(err.api_code(), Some(40001));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_invalid_target_rejected_without_call() {
    let server = Server::new_async().await;
    let source = Arc::new(SequentialSource::default());
    let messenger = Messenger::new(client_with(&server.url(), source.clone(), 3), scope());

    let err = messenger.send_text("  ", "hi").await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidTarget(_)));
    assert_eq!(source.issued.load(Ordering::SeqCst), 0);
}

// ── Media ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_download_media_returns_bytes() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/media/get")
        .match_query(Matcher::AllOf(vec![
            token_query("token-1"),
            Matcher::UrlEncoded("media_id".into(), "MEDIA_1".into()),
        ]))
        .with_header("content-type", "image/png")
        .with_body(vec![0x89, b'P', b'N', b'G'])
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    let bytes = messenger.download_media("MEDIA_1").await.unwrap();
    assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_download_media_error_code() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/media/get")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":40007,"errmsg":"invalid media_id"}"#)
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    let err = messenger.download_media("nope").await.unwrap_err();
    assert_eq!(err.api_code(), Some(40007));
}

#[tokio::test]
async fn test_send_media_uploads_then_sends() {
    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/media/upload")
        .match_query(Matcher::UrlEncoded("type".into(), "image".into()))
        .match_body(Matcher::Regex(r#"name="media"; filename="chart.png""#.to_string()))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"type":"image","media_id":"MEDIA_9"}"#)
        .expect(1)
        .create_async()
        .await;
    let send = server
        .mock("POST", "/message/send")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "touser": "zhangsan",
            "agentid": 1000002,
            "msgtype": "image",
            "image": { "media_id": "MEDIA_9" }
        })))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"msgid":"msg-img"}"#)
        .expect(1)
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    let receipt = messenger
        .send_media("zhangsan", "chart.png", b"png-bytes".to_vec())
        .await
        .unwrap();

    assert_eq!(receipt.message_id, "msg-img");
    upload.assert_async().await;
    send.assert_async().await;
}

#[tokio::test]
async fn test_send_media_non_image_goes_as_file() {
    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/media/upload")
        .match_query(Matcher::UrlEncoded("type".into(), "file".into()))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"type":"file","media_id":"MEDIA_F"}"#)
        .expect(1)
        .create_async()
        .await;
    let send = server
        .mock("POST", "/message/send")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "msgtype": "file",
            "file": { "media_id": "MEDIA_F" }
        })))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"msgid":"msg-file"}"#)
        .expect(1)
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    let receipt = messenger
        .send_media("zhangsan", "clip.mp4", b"video-bytes".to_vec())
        .await
        .unwrap();

    assert_eq!(receipt.message_id, "msg-file");
    upload.assert_async().await;
    send.assert_async().await;
}

#[tokio::test]
async fn test_list_department_users_query() {
    let mut server = Server::new_async().await;
    let recursive = server
        .mock("GET", "/user/list")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("department_id".into(), "7".into()),
            Matcher::UrlEncoded("fetch_child".into(), "1".into()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"userlist":[{"userid":"zhangsan"},{"userid":"lisi"}]}"#)
        .expect(1)
        .create_async()
        .await;
    let direct = server
        .mock("GET", "/user/list")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("department_id".into(), "7".into()),
            Matcher::UrlEncoded("fetch_child".into(), "0".into()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"userlist":[{"userid":"zhangsan"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );

    let all = messenger.list_department_users(7, true).await.unwrap();
    assert_eq!(all["userlist"].as_array().unwrap().len(), 2);
    let top = messenger.list_department_users(7, false).await.unwrap();
    assert_eq!(top["userlist"].as_array().unwrap().len(), 1);

    recursive.assert_async().await;
    direct.assert_async().await;
}

// ── Local media ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_media_path_reads_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.png");
    std::fs::write(&path, b"local-png").unwrap();

    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/media/upload")
        .match_query(Matcher::UrlEncoded("type".into(), "image".into()))
        .match_body(Matcher::Regex(r#"filename="photo.png""#.to_string()))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"type":"image","media_id":"MEDIA_L"}"#)
        .expect(2)
        .create_async()
        .await;
    let send = server
        .mock("POST", "/message/send")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "msgtype": "image",
            "image": { "media_id": "MEDIA_L" }
        })))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"msgid":"msg-local"}"#)
        .expect(2)
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    let plain = path.to_str().unwrap().to_string();
    let receipt = messenger.send_media_path("zhangsan", &plain, None).await.unwrap();
    assert_eq!(receipt.message_id, "msg-local");

    let file_url = format!("file://{}", plain);
    messenger.send_media_path("zhangsan", &file_url, None).await.unwrap();

    upload.assert_async().await;
    send.assert_async().await;
}

#[tokio::test]
async fn test_send_media_path_missing_file() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone.pdf");

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    match messenger
        .send_media_path("zhangsan", missing.to_str().unwrap(), None)
        .await
    {
        Err(GatewayError::Media(message)) => assert!(message.contains("Local file not found")),
        other => panic!("expected media error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_adapter_sends_local_file_as_media() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"meeting notes").unwrap();

    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/media/upload")
        .match_query(Matcher::UrlEncoded("type".into(), "file".into()))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"type":"file","media_id":"MEDIA_N"}"#)
        .expect(1)
        .create_async()
        .await;
    let send = server
        .mock("POST", "/message/send")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "msgtype": "file",
            "file": { "media_id": "MEDIA_N" }
        })))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"msgid":"msg-notes"}"#)
        .expect(1)
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    let adapter = OutboundAdapter::new(Arc::new(messenger));

    let location = format!("file://{}", path.to_str().unwrap());
    let receipt = adapter
        .send_media("zhangsan", None, Some(&location))
        .await
        .unwrap();

    assert_eq!(receipt.message_id, "msg-notes");
    upload.assert_async().await;
    send.assert_async().await;
}

// ── Outbound adapter ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_adapter_falls_back_to_link_when_media_fetch_fails() {
    let mut server = Server::new_async().await;
    let media_url = format!("{}/files/report.pdf", server.url());

    let _missing = server
        .mock("GET", "/files/report.pdf")
        .with_status(404)
        .create_async()
        .await;
    let caption = server
        .mock("POST", "/message/send")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "msgtype": "text",
            "text": { "content": "quarterly report" }
        })))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"msgid":"msg-caption"}"#)
        .expect(1)
        .create_async()
        .await;
    let fallback = server
        .mock("POST", "/message/send")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "msgtype": "text",
            "text": { "content": format!("📎 {}", media_url) }
        })))
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"msgid":"msg-link"}"#)
        .expect(1)
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    let adapter = OutboundAdapter::new(Arc::new(messenger));

    let receipt = adapter
        .send_media("zhangsan", Some("quarterly report"), Some(&media_url))
        .await
        .unwrap();

    assert_eq!(receipt.message_id, "msg-link");
    caption.assert_async().await;
    fallback.assert_async().await;
}

#[tokio::test]
async fn test_adapter_chunks_long_text() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/message/send")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errcode":0,"msgid":"msg-chunk"}"#)
        .expect(2)
        .create_async()
        .await;

    let messenger = Messenger::new(
        client_with(&server.url(), Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    let adapter = OutboundAdapter::new(Arc::new(messenger));

    let text = "a".repeat(3000);
    adapter.send_text("zhangsan", &text).await.unwrap();
    mock.assert_async().await;
}

// ── Probe ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_probe_reports_token_failure() {
    let messenger = Messenger::new(
        client_with("http://127.0.0.1:1", Arc::new(RejectingSource), 3),
        scope(),
    );
    let probe = messenger.probe().await;

    assert!(!probe.ok);
    assert!(probe.error.unwrap().contains("invalid credential"));
    assert_eq!(probe.corp_id.as_deref(), Some("ww-corp"));
    assert_eq!(probe.agent_id.as_deref(), Some("1000002"));
}

#[tokio::test]
async fn test_probe_ok() {
    let messenger = Messenger::new(
        client_with("http://127.0.0.1:1", Arc::new(SequentialSource::default()), 3),
        scope(),
    );
    assert!(messenger.probe().await.ok);
}
