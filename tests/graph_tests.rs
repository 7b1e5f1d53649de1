//! Graph delivery against a local stand-in for the identity platform and Graph

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Form, Json, Router};
use graphrelay::{
    ClientCertificateCredential, DispatchError, GraphDispatcher, MailDispatcher, MessageBody,
    OutboundMessage, TokenCredential,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const BUNDLE: &[u8] = include_bytes!("fixtures/bundle.pem");
const PUBLIC_KEY: &[u8] = include_bytes!("fixtures/public.pem");
const THUMBPRINT: &str = "tleDSAtuAn0DLh3l2mAQgmvx7NY";

#[derive(Debug, Clone)]
struct SendMailCall {
    sender: String,
    authorization: Option<String>,
    body: Value,
}

#[derive(Default)]
struct Recorded {
    token_requests: Vec<HashMap<String, String>>,
    send_mail_calls: Vec<SendMailCall>,
}

#[derive(Clone)]
struct FakeGraph {
    recorded: Arc<Mutex<Recorded>>,
    token_status: StatusCode,
    send_mail_status: StatusCode,
}

async fn token(
    State(fake): State<FakeGraph>,
    Path(_tenant): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let mut recorded = fake.recorded.lock().unwrap();
    recorded.token_requests.push(form);

    if !fake.token_status.is_success() {
        return (
            fake.token_status,
            Json(json!({ "error": "invalid_client" })),
        );
    }

    let n = recorded.token_requests.len();
    (
        StatusCode::OK,
        Json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": format!("token-{n}"),
        })),
    )
}

async fn send_mail(
    State(fake): State<FakeGraph>,
    Path(sender): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    fake.recorded.lock().unwrap().send_mail_calls.push(SendMailCall {
        sender,
        authorization,
        body,
    });

    let body = if fake.send_mail_status.is_success() {
        String::new()
    } else {
        r#"{"error":{"code":"ErrorInvalidRecipients"}}"#.to_string()
    };
    (fake.send_mail_status, body)
}

struct Harness {
    base_url: String,
    recorded: Arc<Mutex<Recorded>>,
}

impl Harness {
    async fn start(token_status: StatusCode, send_mail_status: StatusCode) -> Self {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let fake = FakeGraph {
            recorded: recorded.clone(),
            token_status,
            send_mail_status,
        };

        let app = Router::new()
            .route("/:tenant/oauth2/v2.0/token", post(token))
            .route("/v1.0/users/:sender/sendMail", post(send_mail))
            .with_state(fake);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await });

        Self { base_url, recorded }
    }

    fn credential(&self) -> ClientCertificateCredential {
        ClientCertificateCredential::new("contoso-tenant", "client-id", BUNDLE, None)
            .unwrap()
            .with_authority(&self.base_url, "contoso-tenant")
    }

    fn dispatcher(&self) -> GraphDispatcher {
        GraphDispatcher::new("relay@contoso.com", Arc::new(self.credential()))
            .with_endpoint(format!("{}/v1.0", self.base_url))
    }

    fn token_requests(&self) -> Vec<HashMap<String, String>> {
        self.recorded.lock().unwrap().token_requests.clone()
    }

    fn send_mail_calls(&self) -> Vec<SendMailCall> {
        self.recorded.lock().unwrap().send_mail_calls.clone()
    }
}

fn sample_message() -> OutboundMessage {
    OutboundMessage::new(
        vec!["b@x.com".to_string(), "c@x.com".to_string()],
        "Hi",
        MessageBody::text("hello"),
    )
}

#[tokio::test]
async fn test_send_mail_request() {
    let harness = Harness::start(StatusCode::OK, StatusCode::ACCEPTED).await;
    let dispatcher = harness.dispatcher();

    dispatcher.dispatch(&sample_message()).await.unwrap();

    let calls = harness.send_mail_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].sender, "relay@contoso.com");
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer token-1"));
    assert_eq!(
        calls[0].body,
        json!({
            "message": {
                "subject": "Hi",
                "body": { "contentType": "Text", "content": "hello" },
                "toRecipients": [
                    { "emailAddress": { "address": "b@x.com" } },
                    { "emailAddress": { "address": "c@x.com" } }
                ]
            },
            "saveToSentItems": true
        })
    );
}

#[tokio::test]
async fn test_html_body_content_type() {
    let harness = Harness::start(StatusCode::OK, StatusCode::ACCEPTED).await;
    let message = OutboundMessage::new(
        vec!["b@x.com".to_string()],
        "Report",
        MessageBody::html("<p>rich</p>"),
    );

    harness.dispatcher().dispatch(&message).await.unwrap();

    let calls = harness.send_mail_calls();
    assert_eq!(calls[0].body["message"]["body"]["contentType"], "HTML");
}

#[tokio::test]
async fn test_token_is_cached() {
    let harness = Harness::start(StatusCode::OK, StatusCode::ACCEPTED).await;
    let dispatcher = harness.dispatcher();

    for _ in 0..3 {
        dispatcher.dispatch(&sample_message()).await.unwrap();
    }

    assert_eq!(harness.token_requests().len(), 1);
    let calls = harness.send_mail_calls();
    assert_eq!(calls.len(), 3);
    assert!(calls
        .iter()
        .all(|call| call.authorization.as_deref() == Some("Bearer token-1")));
}

#[tokio::test]
async fn test_token_request_carries_signed_assertion() {
    let harness = Harness::start(StatusCode::OK, StatusCode::ACCEPTED).await;
    let credential = harness.credential();

    let token = credential.access_token().await.unwrap();
    assert_eq!(token.expose_secret(), "token-1");

    let requests = harness.token_requests();
    let form = &requests[0];
    assert_eq!(form["client_id"], "client-id");
    assert_eq!(form["grant_type"], "client_credentials");
    assert_eq!(form["scope"], "https://graph.microsoft.com/.default");
    assert_eq!(
        form["client_assertion_type"],
        "urn:ietf:params:oauth:client-assertion-type:jwt-bearer"
    );

    let assertion = &form["client_assertion"];
    let header = jsonwebtoken::decode_header(assertion).unwrap();
    assert_eq!(header.alg, Algorithm::RS256);
    assert_eq!(header.x5t.as_deref(), Some(THUMBPRINT));

    let token_url = format!("{}/contoso-tenant/oauth2/v2.0/token", harness.base_url);
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[token_url.as_str()]);
    validation.set_issuer(&["client-id"]);

    let claims = jsonwebtoken::decode::<Value>(
        assertion,
        &DecodingKey::from_rsa_pem(PUBLIC_KEY).unwrap(),
        &validation,
    )
    .unwrap()
    .claims;
    assert_eq!(claims["sub"], "client-id");
    assert_eq!(
        claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
        600
    );
    assert!(claims["jti"].as_str().is_some_and(|jti| !jti.is_empty()));
}

#[tokio::test]
async fn test_unauthorized_is_authorization_error() {
    let harness = Harness::start(StatusCode::OK, StatusCode::UNAUTHORIZED).await;

    let result = harness.dispatcher().dispatch(&sample_message()).await;
    assert!(matches!(result, Err(DispatchError::Authorization(_))));
}

#[tokio::test]
async fn test_forbidden_is_authorization_error() {
    let harness = Harness::start(StatusCode::OK, StatusCode::FORBIDDEN).await;

    let result = harness.dispatcher().dispatch(&sample_message()).await;
    assert!(matches!(result, Err(DispatchError::Authorization(_))));
}

#[tokio::test]
async fn test_bad_request_is_rejected() {
    let harness = Harness::start(StatusCode::OK, StatusCode::BAD_REQUEST).await;

    let result = harness.dispatcher().dispatch(&sample_message()).await;
    match result {
        Err(DispatchError::Rejected { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("ErrorInvalidRecipients"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_token_failure_skips_send_mail() {
    let harness = Harness::start(StatusCode::BAD_REQUEST, StatusCode::ACCEPTED).await;

    let dispatcher = harness.dispatcher();

    let result = dispatcher.dispatch(&sample_message()).await;
    assert!(matches!(result, Err(DispatchError::Authorization(_))));
    assert!(harness.send_mail_calls().is_empty());

    // Failures are not cached
    let _ = dispatcher.dispatch(&sample_message()).await;
    assert_eq!(harness.token_requests().len(), 2);
}

#[tokio::test]
async fn test_unreachable_graph_is_transport_error() {
    let harness = Harness::start(StatusCode::OK, StatusCode::ACCEPTED).await;
    let dispatcher = GraphDispatcher::new("relay@contoso.com", Arc::new(harness.credential()))
        .with_endpoint("http://127.0.0.1:1/v1.0");

    let result = dispatcher.dispatch(&sample_message()).await;
    assert!(matches!(result, Err(DispatchError::Transport(_))));
}
