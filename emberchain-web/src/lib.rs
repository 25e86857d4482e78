//! JSON endpoints and a single page front end over the emberchain pipelines.
//!
//! The server keeps no per-user state. Agent conversations travel with each request.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use emberchain::{
    ChainError, ChatAgent, ChatMessage, ChatModel,
    chain::{content_analysis, customer_service, validate_content, validate_question},
    rag::{RagQa, SourcePreview},
    report::{ContentStats, format_analysis_report, format_customer_reply, format_statistics},
    template::request,
};

pub mod config;

/// Shared handles for the handlers. Missing pieces answer with an error instead of failing startup.
#[derive(Clone, TypedBuilder)]
pub struct AppState {
    pub model: Arc<dyn ChatModel>,
    #[builder(default)]
    pub qa: Option<Arc<RagQa>>,
    #[builder(default)]
    pub agent: Option<Arc<dyn ChatAgent>>,
}

/// A [`ChainError`] on its way out as `{error}` JSON.
#[derive(Debug)]
pub struct ApiError(pub ChainError);

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ChainError::Parse(_) | ChainError::TemplateFieldMissing(_) | ChainError::Security(_) => {
                StatusCode::BAD_REQUEST
            }
            ChainError::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            ChainError::ModelUnavailable(_) | ChainError::ModelTimeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.0.display_marker();
        if status.is_server_error() {
            warn!("Request failed with {status}: {message}");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CustomerReply {
    pub branch: String,
    pub reply: String,
}

async fn customer_service_reply(
    State(state): State<AppState>,
    Json(body): Json<QuestionRequest>,
) -> ApiResult<CustomerReply> {
    let question = body.question.trim();
    validate_question(question)?;

    let (branch, reply) = customer_service()?
        .invoke(state.model.as_ref(), &request([("question", question)]))
        .await?;
    info!("Customer question answered on the {branch} branch");

    Ok(Json(CustomerReply {
        branch,
        reply: format_customer_reply(&reply, Local::now().naive_local()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeReply {
    pub report: String,
    pub failed: Vec<String>,
}

async fn analyze(State(state): State<AppState>, Json(body): Json<AnalyzeRequest>) -> ApiResult<AnalyzeReply> {
    validate_content(&body.content)?;

    let results = content_analysis()?
        .analyze(state.model.as_ref(), &request([("content", body.content.as_str())]))
        .await;

    let at = Local::now().naive_local();
    let report = format_analysis_report(&results, at)
        + &format_statistics(&ContentStats::of(&body.content), at);
    let failed = results
        .iter()
        .filter(|(_, r)| r.is_err())
        .map(|(k, _)| k.clone())
        .collect();

    Ok(Json(AnalyzeReply { report, failed }))
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    /// Restrict retrieval to one document
    #[serde(default)]
    pub source_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AskReply {
    pub answer: String,
    pub sources: Vec<SourcePreview>,
    pub strategy: String,
}

async fn ask(State(state): State<AppState>, Json(body): Json<AskRequest>) -> ApiResult<AskReply> {
    let qa = state
        .qa
        .as_ref()
        .ok_or_else(|| ChainError::ConfigurationMissing("vector index".into()))?;

    let answer = qa.ask(body.question.trim(), body.source_name.as_deref()).await?;

    Ok(Json(AskReply {
        answer: answer.text,
        sources: answer.sources,
        strategy: answer.strategy,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AgentRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentReply {
    pub reply: String,
    pub history: Vec<ChatMessage>,
}

async fn agent(State(state): State<AppState>, Json(body): Json<AgentRequest>) -> ApiResult<AgentReply> {
    let agent = state
        .agent
        .as_ref()
        .ok_or_else(|| ChainError::ConfigurationMissing("agent".into()))?;

    let mut history = body.history;
    let reply = agent.reply(body.message.trim(), &mut history).await?;

    Ok(Json(AgentReply { reply, history }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health))
        .route("/api/customer-service", post(customer_service_reply))
        .route("/api/analyze", post(analyze))
        .route("/api/ask", post(ask))
        .route("/api/agent", post(agent))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="zh-Hant">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Emberchain 示範</title>
    <style>
        * { box-sizing: border-box; }
        body { font-family: -apple-system, 'Noto Sans TC', sans-serif; margin: 0; background: #f5f5f7; color: #222; }
        header { background: #c2410c; color: #fff; padding: 1rem 2rem; }
        nav { display: flex; gap: 0.5rem; padding: 1rem 2rem 0; }
        nav button { border: none; background: #e5e5e5; padding: 0.5rem 1rem; border-radius: 8px 8px 0 0; cursor: pointer; }
        nav button.active { background: #fff; font-weight: bold; }
        section { display: none; background: #fff; margin: 0 2rem 2rem; padding: 1.5rem; border-radius: 0 8px 8px 8px; }
        section.active { display: block; }
        textarea, input { width: 100%; padding: 0.5rem; font-size: 1rem; margin-bottom: 0.5rem; }
        pre { white-space: pre-wrap; background: #fafafa; border: 1px solid #ddd; padding: 1rem; min-height: 4rem; }
        .msg-user { color: #1d4ed8; }
        .msg-assistant { color: #15803d; }
    </style>
</head>
<body>
    <header><h1>Emberchain 示範</h1></header>
    <nav>
        <button class="active" data-tab="service">客服</button>
        <button data-tab="analyze">內容分析</button>
        <button data-tab="ask">問答</button>
        <button data-tab="agent">智能助理</button>
    </nav>

    <section id="service" class="active">
        <input id="service-question" placeholder="請輸入您的問題，例如：我想退貨">
        <button onclick="serviceAsk()">送出</button>
        <pre id="service-output"></pre>
    </section>

    <section id="analyze">
        <textarea id="analyze-content" rows="6" placeholder="貼上要分析的內容（至少 10 個字）"></textarea>
        <button onclick="analyzeContent()">分析</button>
        <pre id="analyze-output"></pre>
    </section>

    <section id="ask">
        <input id="ask-question" placeholder="詢問文件內容">
        <input id="ask-source" placeholder="限定文件名稱（可留空）">
        <button onclick="askDocs()">查詢</button>
        <pre id="ask-output"></pre>
    </section>

    <section id="agent">
        <div id="agent-log"></div>
        <p id="agent-error"></p>
        <input id="agent-message" placeholder="例如：查詢訂單 ORD001">
        <button onclick="agentSend()">送出</button>
        <button onclick="agentClear()">清除對話</button>
    </section>

    <script>
        document.querySelectorAll('nav button').forEach(btn => btn.addEventListener('click', () => {
            document.querySelectorAll('nav button, section').forEach(el => el.classList.remove('active'));
            btn.classList.add('active');
            document.getElementById(btn.dataset.tab).classList.add('active');
        }));

        async function post(path, body) {
            const res = await fetch(path, {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify(body),
            });
            const data = await res.json();
            if (!res.ok) throw new Error(data.error || res.statusText);
            return data;
        }

        async function show(id, task) {
            const out = document.getElementById(id);
            out.textContent = '處理中...';
            try { out.textContent = await task(); } catch (e) { out.textContent = e.message; }
        }

        function serviceAsk() {
            show('service-output', async () => {
                const data = await post('/api/customer-service', { question: document.getElementById('service-question').value });
                return data.reply;
            });
        }

        function analyzeContent() {
            show('analyze-output', async () => {
                const data = await post('/api/analyze', { content: document.getElementById('analyze-content').value });
                return data.report;
            });
        }

        function askDocs() {
            show('ask-output', async () => {
                const source = document.getElementById('ask-source').value.trim();
                const data = await post('/api/ask', {
                    question: document.getElementById('ask-question').value,
                    source_name: source || null,
                });
                const sources = data.sources.map((s, i) => `${i + 1}. 【${s.name}】\n   ${s.preview}`).join('\n');
                return `${data.answer}\n\n📚 參考資料來源（${data.strategy}）\n${sources}`;
            });
        }

        let history = [];

        function renderHistory() {
            document.getElementById('agent-log').innerHTML = history
                .map(m => `<p class="msg-${m.role}"><b>${m.role === 'user' ? '您' : '助理'}：</b>${m.content.replace(/</g, '&lt;')}</p>`)
                .join('');
        }

        async function agentSend() {
            const input = document.getElementById('agent-message');
            const error = document.getElementById('agent-error');
            error.textContent = '處理中...';
            try {
                const data = await post('/api/agent', { message: input.value, history });
                history = data.history;
                input.value = '';
                error.textContent = '';
            } catch (e) {
                error.textContent = e.message;
            }
            renderHistory();
        }

        function agentClear() {
            history = [];
            document.getElementById('agent-error').textContent = '';
            renderHistory();
        }
    </script>
</body>
</html>
"#;
