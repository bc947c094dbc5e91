//! HTTP boundary for the task catalogue and the submission endpoint.
//!
//! | route | result |
//! |---|---|
//! | `GET /tasks` | every task, ordered by id |
//! | `GET /tasks/{id}` | the task, or `404` |
//! | `POST /tasks` | `201` with the created task, or `400` |
//! | `POST /tasks/{id}/submit` | `{"status":"ok","submissions_count":n}`, `404`, `409` or `500` |

use std::num::NonZeroU32;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header;
use axum::middleware;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use quota_limit::CounterStore;
use quota_limit::NewTask;
use quota_limit::Task;
use quota_limit::TaskId;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tower::ServiceExt;

use crate::enforcer::QuotaEnforcer;
use crate::enforcer::Submission;
use crate::error::QuotaError;
use crate::service::QuotaService;

#[derive(Debug, Default, Deserialize)]
struct CreateTask {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    max_submissions: Option<Value>,
}

/// Body of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub submissions_count: u32,
}

/// Builds the router around `enforcer`.
pub fn router<S>(enforcer: QuotaEnforcer<S>) -> Router
where
    S: CounterStore + ?Sized + 'static,
{
    Router::new()
        .route("/tasks", get(list_tasks::<S>).post(create_task::<S>))
        .route("/tasks/{id}", get(get_task::<S>))
        .route("/tasks/{id}/submit", post(submit::<S>))
        .with_state(QuotaService::new(enforcer))
        .layer(middleware::from_fn(allow_any_origin))
}

/// Permissive CORS: any origin, and preflights are answered directly.
async fn allow_any_origin(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,HEAD,PUT,PATCH,POST,DELETE"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
    response
}

async fn list_tasks<S>(
    State(service): State<QuotaService<S>>,
) -> Result<Json<Vec<Task>>, QuotaError>
where
    S: CounterStore + ?Sized + 'static,
{
    Ok(Json(service.enforcer().list_tasks().await?))
}

async fn get_task<S>(
    State(service): State<QuotaService<S>>,
    Path(raw_id): Path<String>,
) -> Result<Json<Task>, QuotaError>
where
    S: CounterStore + ?Sized + 'static,
{
    let task_id = parse_task_id(&raw_id)?;
    service
        .enforcer()
        .get_task(task_id)
        .await?
        .map(Json)
        .ok_or(QuotaError::NotFound { task_id })
}

async fn create_task<S>(
    State(service): State<QuotaService<S>>,
    Json(body): Json<CreateTask>,
) -> Result<(StatusCode, Json<Task>), QuotaError>
where
    S: CounterStore + ?Sized + 'static,
{
    let non_empty = |text: Option<String>| text.filter(|t| !t.trim().is_empty());
    let (Some(title), Some(description)) = (non_empty(body.title), non_empty(body.description))
    else {
        return Err(QuotaError::InvalidPayload);
    };

    let task = NewTask::new(
        title,
        description,
        quota_or_default(body.max_submissions.as_ref()),
    );
    let created = service.enforcer().create_task(task).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn submit<S>(
    State(service): State<QuotaService<S>>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<Json<SubmitResponse>, QuotaError>
where
    S: CounterStore + ?Sized + 'static,
{
    let task_id = parse_task_id(&raw_id)?;
    let submission = Submission::new(task_id, payload_from(&body));
    let outcome = service
        .oneshot(submission)
        .await
        .map_err(|err| match err.downcast::<QuotaError>() {
            Ok(err) => *err,
            Err(err) => QuotaError::StoreUnavailable(err.to_string()),
        })?;

    let submissions_count = outcome.into_result(task_id)?;
    Ok(Json(SubmitResponse {
        status: "ok",
        submissions_count,
    }))
}

/// An id that is not a number names no task.
fn parse_task_id(raw: &str) -> Result<TaskId, QuotaError> {
    raw.trim()
        .parse()
        .map_err(|_| QuotaError::NotFound { task_id: 0 })
}

/// Falls back to a quota of one for anything that is not a positive integer.
fn quota_or_default(value: Option<&Value>) -> NonZeroU32 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.and_then(NonZeroU32::new).unwrap_or(NonZeroU32::MIN)
}

/// Submission payloads are never rejected; non-JSON bodies travel as a string.
fn payload_from(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use quota_limit::SqliteCounterStore;
    use serde_json::json;

    fn app() -> Router {
        let store = Arc::new(SqliteCounterStore::open_in_memory().unwrap());
        router(QuotaEnforcer::new(store))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_three_concurrent_submissions_against_a_quota_of_two() {
        let app = app();

        let (status, task) = send(
            &app,
            "POST",
            "/tasks",
            Some(json!({ "title": "Test Task", "description": "Testing", "max_submissions": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = task["id"].as_i64().unwrap();
        assert_eq!(task["submissions_count"], 0);

        let payload = json!({ "name": "Alice", "email": "alice@example.com", "message": "hi" });
        let uri = format!("/tasks/{id}/submit");
        let results = futures::future::join_all(
            (0..3).map(|_| send(&app, "POST", &uri, Some(payload.clone()))),
        )
        .await;

        let mut counts: Vec<_> = results
            .iter()
            .filter(|(status, _)| *status == StatusCode::OK)
            .map(|(_, body)| {
                assert_eq!(body["status"], "ok");
                body["submissions_count"].as_u64().unwrap()
            })
            .collect();
        counts.sort_unstable();
        assert_eq!(counts, [1, 2]);

        let conflicts: Vec<_> = results
            .iter()
            .filter(|(status, _)| *status == StatusCode::CONFLICT)
            .collect();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].1["error"], "Max submissions reached");

        let (status, task) = send(&app, "GET", &format!("/tasks/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(task["submissions_count"], 2);
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let app = app();

        let (status, body) = send(&app, "GET", "/tasks/404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Task not found");

        let (status, body) = send(&app, "POST", "/tasks/404/submit", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Task not found");
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_404() {
        let app = app();

        let (status, body) = send(&app, "GET", "/tasks/abc", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Task not found");

        let (status, body) = send(&app, "POST", "/tasks/abc/submit", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Task not found");
    }

    #[tokio::test]
    async fn test_cross_origin_requests_are_allowed() {
        let app = app();

        let request = Request::builder()
            .method("GET")
            .uri("/tasks")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );

        let preflight = Request::builder()
            .method("OPTIONS")
            .uri("/tasks/1/submit")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(preflight).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn test_create_requires_title_and_description() {
        let app = app();

        let (status, body) = send(&app, "POST", "/tasks", Some(json!({ "title": "only" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid payload");

        let (_, tasks) = send(&app, "GET", "/tasks", None).await;
        assert_eq!(tasks, json!([]));
    }

    #[tokio::test]
    async fn test_bad_quota_falls_back_to_one() {
        let app = app();

        let (status, task) = send(
            &app,
            "POST",
            "/tasks",
            Some(json!({ "title": "t", "description": "d", "max_submissions": "lots" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task["max_submissions"], 1);

        let (_, listed) = send(&app, "GET", "/tasks", None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_accepts_any_body() {
        let app = app();
        let (_, task) = send(
            &app,
            "POST",
            "/tasks",
            Some(json!({ "title": "t", "description": "d", "max_submissions": 5 })),
        )
        .await;
        let uri = format!("/tasks/{}/submit", task["id"]);

        let (status, body) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["submissions_count"], 1);
    }

    #[test]
    fn payloads_are_kept_verbatim() {
        assert_eq!(payload_from(b""), json!({}));
        assert_eq!(payload_from(br#"{"a":1}"#), json!({ "a": 1 }));
        assert_eq!(payload_from(b"plain text"), json!("plain text"));
    }

    #[test]
    fn task_ids_must_be_numeric() {
        assert_eq!(parse_task_id("42"), Ok(42));
        assert_eq!(
            parse_task_id("abc"),
            Err(QuotaError::NotFound { task_id: 0 })
        );
    }

    #[test]
    fn quota_parsing() {
        assert_eq!(quota_or_default(Some(&json!(4))).get(), 4);
        assert_eq!(quota_or_default(Some(&json!("7"))).get(), 7);
        assert_eq!(quota_or_default(Some(&json!(0))).get(), 1);
        assert_eq!(quota_or_default(Some(&json!(-3))).get(), 1);
        assert_eq!(quota_or_default(None).get(), 1);
    }
}
