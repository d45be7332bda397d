//! End-to-end tests: the real server on an ephemeral port, a scripted model
//! behind it, and `reqwest` or `EnhanceClient` in front of it.

use std::sync::Arc;
use std::time::Duration;

use prompt_enhancer::api::{self, PresetList};
use prompt_enhancer::client::{ClientError, EnhanceClient};
use prompt_enhancer::middleware::{LoggerMiddleware, Pipeline};
use prompt_enhancer::model::ScriptedModel;
use prompt_enhancer::preset::PresetCatalog;
use prompt_enhancer::relay::{ErrorBody, Relay, UPSTREAM_FAILURE_MESSAGE};
use prompt_enhancer::security::CorsMiddleware;
use prompt_enhancer::session::{ENHANCE_FAILED_MESSAGE, Phase, PromptSession};
use prompt_enhancer::Server;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

const FRAME: Duration = Duration::from_millis(1);

struct Service {
    base_url: String,
    model: Arc<ScriptedModel>,
    shutdown: CancellationToken,
}

impl Service {
    async fn start(model: ScriptedModel) -> Self {
        Self::start_with(model, Duration::from_secs(30)).await
    }

    async fn start_with(model: ScriptedModel, idle_timeout: Duration) -> Self {
        let model = Arc::new(model);
        let catalog = Arc::new(PresetCatalog::builtin().unwrap());
        let relay = Relay::new(model.clone(), catalog).with_idle_timeout(idle_timeout);
        let pipeline = Pipeline::new(api::router(Arc::new(relay)))
            .layer(LoggerMiddleware)
            .layer(CorsMiddleware::new(["http://localhost:5173"]));

        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", server.local_addr());
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(pipeline, shutdown.clone()));

        Self {
            base_url,
            model,
            shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn client(&self) -> EnhanceClient {
        EnhanceClient::new(self.base_url.clone()).with_frame_interval(FRAME)
    }

    async fn post(&self, body: serde_json::Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url("/enhance"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn wait_for_released_streams(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.model.open_streams() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("upstream stream was not released");
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn session(text: &str) -> PromptSession {
    let mut session = PromptSession::new();
    session.set_text(text);
    session
}

#[tokio::test]
async fn streams_the_enhanced_prompt() {
    let service = Service::start(ScriptedModel::new(["A", " cat", " sitting."])).await;

    let response = service
        .post(json!({"text": "a cat", "presetSelection": "BasePrompt"}))
        .await;
    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/plain; charset=utf-8");
    assert_eq!(headers["transfer-encoding"], "chunked");
    assert_eq!(response.text().await.unwrap(), "A cat sitting.");

    let (instruction, prompt) = service.model.last_request().unwrap();
    let catalog = PresetCatalog::builtin().unwrap();
    assert_eq!(instruction, catalog.base_instruction());
    assert_eq!(prompt, "a cat");
}

#[tokio::test]
async fn client_shows_the_full_answer() {
    let service = Service::start(ScriptedModel::new(["A", " cat", " sitting."])).await;
    let client = service.client();
    let display = client.subscribe();
    let mut session = session("a cat");

    let full = client
        .enhance(&mut session, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(full, "A cat sitting.");
    assert_eq!(session.text(), "A cat sitting.");
    assert_eq!(session.phase(), Phase::Idle);
    assert_eq!(*display.borrow(), "A cat sitting.");

    assert!(session.undo());
    assert_eq!(session.text(), "a cat");
}

#[tokio::test]
async fn concatenation_preserves_order_and_multibyte_text() {
    let fragments = ["Ünï", "cödé ", "☕", " → ", "✓"];
    let service = Service::start(ScriptedModel::new(fragments)).await;
    let mut session = session("coffee");

    let full = service
        .client()
        .enhance(&mut session, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(full, fragments.concat());
}

#[tokio::test]
async fn blank_input_is_rejected_without_calling_the_model() {
    let service = Service::start(ScriptedModel::new(["unused"])).await;

    let response = service.post(json!({"text": "   "})).await;
    assert_eq!(response.status(), 400);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.error, "Invalid input");
    assert_eq!(service.model.calls(), 0);
}

#[tokio::test]
async fn malformed_body_is_invalid_input() {
    let service = Service::start(ScriptedModel::new(["unused"])).await;

    let response = reqwest::Client::new()
        .post(service.url("/enhance"))
        .header("Content-Type", "application/json")
        .body("{\"text\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(response.json::<ErrorBody>().await.unwrap().error, "Invalid input");
}

#[tokio::test]
async fn mid_stream_failure_truncates_the_body() {
    let service =
        Service::start(ScriptedModel::new(["Once upon"]).then_fail("connection reset")).await;

    let response = service.post(json!({"text": "a story"})).await;
    assert_eq!(response.status(), 200);
    assert!(response.text().await.is_err());
}

#[tokio::test]
async fn client_discards_partial_text_on_failure() {
    let service =
        Service::start(ScriptedModel::new(["Once upon"]).then_fail("connection reset")).await;
    let client = service.client();
    let display = client.subscribe();
    let mut session = session("a story");

    let err = client
        .enhance(&mut session, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Interrupted(_)), "{err:?}");
    assert_eq!(session.text(), ENHANCE_FAILED_MESSAGE);
    assert_eq!(session.phase(), Phase::Error);
    assert!(!display.borrow().contains("Once upon"));
}

#[tokio::test]
async fn failure_before_first_fragment_is_a_500() {
    let service = Service::start(ScriptedModel::default().failing_to_open("API key not valid")).await;

    let response = service.post(json!({"text": "a cat"})).await;
    assert_eq!(response.status(), 500);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.error, UPSTREAM_FAILURE_MESSAGE);

    let mut session = session("a cat");
    let err = service
        .client()
        .enhance(&mut session, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected { status: 500, .. }));
    assert_eq!(session.text(), ENHANCE_FAILED_MESSAGE);
}

#[tokio::test]
async fn unknown_preset_is_a_400() {
    let service = Service::start(ScriptedModel::new(["unused"])).await;

    let response = service
        .post(json!({"text": "a cat", "presetSelection": "Nope"}))
        .await;
    assert_eq!(response.status(), 400);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.error, "unknown preset `Nope`");
    assert_eq!(service.model.calls(), 0);
}

#[tokio::test]
async fn custom_instruction_reaches_the_model() {
    let service = Service::start(ScriptedModel::new(["ok"])).await;
    let mut session = session("a cat");
    session.select_preset("Custom");
    session.set_custom_instruction("Answer in French.");

    service
        .client()
        .enhance(&mut session, &CancellationToken::new())
        .await
        .unwrap();

    let (instruction, _) = service.model.last_request().unwrap();
    assert!(instruction.ends_with(" Answer in French."));
}

#[tokio::test]
async fn presets_endpoint_lists_selectable_names() {
    let service = Service::start(ScriptedModel::default()).await;

    let list: PresetList = service.client().presets().await.unwrap();
    assert!(list.presets.iter().any(|name| name == "Typography"));
    assert!(!list.presets.iter().any(|name| name == "BasePrompt"));
    assert_eq!(list.custom, "Custom");

    let mut sorted = list.presets.clone();
    sorted.sort();
    assert_eq!(list.presets, sorted);
}

#[tokio::test]
async fn stalled_model_hits_the_idle_timeout() {
    let model = ScriptedModel::new(["A"]).then_stall();
    let service = Service::start_with(model, Duration::from_millis(200)).await;

    let response = service.post(json!({"text": "a cat"})).await;
    assert_eq!(response.status(), 200);
    assert!(response.text().await.is_err());
    service.wait_for_released_streams().await;
}

#[tokio::test]
async fn dropped_response_releases_the_upstream_stream() {
    let service = Service::start(ScriptedModel::new(["A"]).then_stall()).await;

    let mut response = service.post(json!({"text": "a cat"})).await;
    assert_eq!(response.chunk().await.unwrap().as_deref(), Some(&b"A"[..]));
    assert_eq!(service.model.open_streams(), 1);

    drop(response);
    service.wait_for_released_streams().await;
}

#[tokio::test]
async fn hang_up_before_first_fragment_releases_the_upstream_stream() {
    let service = Service::start(ScriptedModel::default().then_stall()).await;

    let body = json!({"text": "a cat"}).to_string();
    let address = service.base_url.trim_start_matches("http://");
    let mut socket = TcpStream::connect(address).await.unwrap();
    let head = format!(
        "POST /enhance HTTP/1.1\r\nHost: {address}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    socket.write_all(head.as_bytes()).await.unwrap();
    socket.write_all(body.as_bytes()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while service.model.open_streams() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("upstream stream was never opened");

    drop(socket);
    service.wait_for_released_streams().await;
    assert_eq!(service.model.calls(), 1);
}

#[tokio::test]
async fn cancelled_enhancement_restores_the_prompt() {
    let service = Service::start(ScriptedModel::new(["A"]).then_stall()).await;
    let client = service.client();
    let mut display = client.subscribe();
    let mut session = session("a cat");
    let cancel = CancellationToken::new();

    let cancel_once_visible = async {
        while display.borrow_and_update().is_empty() {
            display.changed().await.unwrap();
        }
        cancel.cancel();
    };
    let (result, ()) = tokio::join!(client.enhance(&mut session, &cancel), cancel_once_visible);

    assert!(matches!(result, Err(ClientError::Aborted)));
    assert_eq!(session.text(), "a cat");
    assert_eq!(session.phase(), Phase::Idle);
    service.wait_for_released_streams().await;
}

#[tokio::test]
async fn cors_preflight_is_answered() {
    let service = Service::start(ScriptedModel::default()).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, service.url("/enhance"))
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:5173"
    );
}

#[tokio::test]
async fn unknown_path_is_a_404() {
    let service = Service::start(ScriptedModel::default()).await;

    let response = reqwest::get(service.url("/missing")).await.unwrap();
    assert_eq!(response.status(), 404);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.error, "Not found");
}
