use crate::analyzer;
use crate::config::Config;
use crate::inference::InferenceLane;
use crate::pipeline::coordinator;
use crate::pipeline::session::{SessionState, SessionSummary, SharedSession, TaskView};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Shared state behind the review API
///
/// The API is a thin client of the session aggregator: no pipeline
/// logic lives here.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<Mutex<HashMap<Uuid, SharedSession>>>,
    lane: InferenceLane,
    config: Arc<Config>,
}

/// Serve the review interface on the configured port
pub async fn serve(config: Arc<Config>, lane: InferenceLane, port: u16) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.server.workspace)?;
    let state = AppState {
        sessions: Arc::new(Mutex::new(HashMap::new())),
        lane,
        config,
    };

    let app = router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Review interface listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/files", post(submit_file).get(list_files))
        .route("/api/files/{id}/tasks", get(list_tasks))
        .route("/api/files/{id}/tasks/{task_id}/patch", get(get_patch))
        .route("/api/files/{id}/tasks/{task_id}/accept", post(accept_task))
        .route("/api/files/{id}/tasks/{task_id}/reject", post(reject_task))
        .with_state(state)
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError(StatusCode::NOT_FOUND, format!("{} not found", what))
}

#[derive(Deserialize)]
struct SubmitRequest {
    name: String,
    content: String,
}

async fn submit_file(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let file_name = std::path::Path::new(&request.name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ApiError(StatusCode::BAD_REQUEST, "invalid file name".into()))?;
    if !analyzer::is_supported_source(&file_name) {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "only .c/.cpp/.cc/.cxx/.h/.hpp files are supported".into(),
        ));
    }
    if request.content.trim().is_empty() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "the uploaded file appears to be empty".into(),
        ));
    }

    let mut session =
        SessionState::new(file_name.clone(), std::path::PathBuf::new(), request.content);
    let id = session.id;
    let dir = std::path::Path::new(&state.config.server.workspace).join(id.to_string());
    session.path = dir.join(&file_name);
    std::fs::create_dir_all(&dir)
        .and_then(|_| std::fs::write(&session.path, &session.source))
        .map_err(|e| {
            ApiError(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to store upload: {}", e),
            )
        })?;
    let shared = session.shared();

    state.sessions.lock().await.insert(id, shared.clone());
    info!("Accepted {} as session {}", file_name, id);

    // sessions are independent; only the inference lane is shared
    tokio::spawn(coordinator::run(
        shared,
        state.config.clone(),
        state.lane.clone(),
    ));

    Ok(Json(json!({ "id": id })))
}

async fn list_files(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let sessions = state.sessions.lock().await;
    let mut summaries = Vec::with_capacity(sessions.len());
    for session in sessions.values() {
        summaries.push(session.lock().await.summary());
    }
    summaries.sort_by_key(|s| s.created_at);
    Json(summaries)
}

async fn list_tasks(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TaskView>>, ApiError> {
    let session = lookup(&state, id).await?;
    let views = session.lock().await.task_views();
    Ok(Json(views))
}

async fn get_patch(
    State(state): State<AppState>,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<String, ApiError> {
    let session = lookup(&state, id).await?;
    let text = session.lock().await.patch_text(task_id);
    text.ok_or_else(|| not_found("patch"))
}

async fn accept_task(
    State(state): State<AppState>,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = lookup(&state, id).await?;
    let mut locked = session.lock().await;
    locked
        .apply(task_id)
        .map_err(|e| ApiError(StatusCode::CONFLICT, e.to_string()))?;
    Ok(Json(json!({ "status": "applied" })))
}

async fn reject_task(
    State(state): State<AppState>,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = lookup(&state, id).await?;
    let mut locked = session.lock().await;
    locked
        .reject(task_id)
        .map_err(|e| ApiError(StatusCode::CONFLICT, e.to_string()))?;
    Ok(Json(json!({ "status": "rejected" })))
}

async fn lookup(state: &AppState, id: Uuid) -> Result<SharedSession, ApiError> {
    state
        .sessions
        .lock()
        .await
        .get(&id)
        .cloned()
        .ok_or_else(|| not_found("session"))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Minimal review page: upload, task list, diff text. Everything it
/// shows comes from the JSON API above.
const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>misramend</title>
<style>
body { font-family: sans-serif; margin: 2rem; max-width: 60rem; }
textarea { width: 100%; height: 10rem; font-family: monospace; }
table { border-collapse: collapse; margin-top: 1rem; width: 100%; }
td, th { border: 1px solid #ccc; padding: 0.3rem 0.6rem; text-align: left; }
pre { background: #f4f4f4; padding: 0.8rem; overflow-x: auto; }
button { margin-right: 0.3rem; }
</style>
</head>
<body>
<h1>misramend</h1>
<p>Upload a C/C++ file; violations and proposed patches appear below.</p>
<input id="name" placeholder="file name, e.g. motor.c" value="upload.c">
<br><textarea id="content" placeholder="source code"></textarea>
<br><button onclick="submitFile()">Analyze</button>
<div id="sessions"></div>
<pre id="diff"></pre>
<script>
let current = null;
async function submitFile() {
  const body = JSON.stringify({
    name: document.getElementById('name').value,
    content: document.getElementById('content').value,
  });
  const res = await fetch('/api/files', {method: 'POST', headers: {'Content-Type': 'application/json'}, body});
  const data = await res.json();
  if (data.error) { alert(data.error); return; }
  current = data.id;
  poll();
}
async function poll() {
  if (!current) return;
  const sessions = await (await fetch('/api/files')).json();
  const session = sessions.find(s => s.id === current);
  const tasks = await (await fetch(`/api/files/${current}/tasks`)).json();
  const rows = tasks.map(t => `<tr>
    <td>${t.rule_id}</td><td>${t.line}</td><td>${t.status}</td>
    <td>${t.failure ?? ''}</td>
    <td>${t.has_patch ? `<button onclick="showDiff('${t.id}')">diff</button>` : ''}
        ${t.status === 'validated' ? `<button onclick="act('${t.id}','accept')">accept</button>
        <button onclick="act('${t.id}','reject')">reject</button>` : ''}</td>
  </tr>`).join('');
  const phase = session ? session.phase : 'unknown';
  const note = session && session.error ? `: ${session.error}`
    : (phase === 'ready' && tasks.length === 0 ? ': no MISRA violations found' : '');
  document.getElementById('sessions').innerHTML =
    `<p>Session ${phase}${note}</p>` +
    `<table><tr><th>rule</th><th>line</th><th>status</th><th>failure</th><th></th></tr>${rows}</table>`;
  const settled = ['ready','failed'].includes(phase) &&
    tasks.every(t => ['applied','rejected','failed','validated'].includes(t.status));
  if (!settled) setTimeout(poll, 1500);
}
async function showDiff(taskId) {
  const res = await fetch(`/api/files/${current}/tasks/${taskId}/patch`);
  document.getElementById('diff').textContent = await res.text();
}
async function act(taskId, action) {
  const res = await fetch(`/api/files/${current}/tasks/${taskId}/${action}`, {method: 'POST'});
  const data = await res.json();
  if (data.error) alert(data.error);
  poll();
}
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferenceConfig;
    use crate::inference::InferenceClient;

    fn state() -> AppState {
        AppState {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            lane: InferenceLane::new(InferenceClient::new(InferenceConfig::default())),
            config: Arc::new(Config::default()),
        }
    }

    #[tokio::test]
    async fn test_lookup_unknown_session() {
        let err = lookup(&state(), Uuid::new_v4()).await.err().unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_files_empty() {
        let Json(summaries) = list_files(State(state())).await;
        assert!(summaries.is_empty());
    }

    #[test]
    fn test_router_builds() {
        let _ = router(state());
    }
}
