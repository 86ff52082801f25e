use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::{error, warn};

use super::auth::{self, Access, Caller};
use super::db::{BoardDb, DbHandle};
use super::models::{Column, MoveRequest, NewTask, Priority, Role, Task, TaskPatch};
use super::ws::{Notifier, WsMessage, broadcast_message};
use crate::errors::{BoardError, ErrorKind};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub notifier: Notifier,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub email: String,
}

#[derive(Deserialize)]
pub struct WorkspaceNameRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub email: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub role: Role,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub column: Option<Column>,
    pub assignee_id: Option<String>,
}

impl From<CreateTaskRequest> for NewTask {
    fn from(req: CreateTaskRequest) -> Self {
        NewTask {
            title: req.title,
            description: req.description,
            priority: req.priority.unwrap_or_default(),
            due_date: req.due_date,
            column: req.column.unwrap_or(Column::Todo),
            assignee_id: req.assignee_id,
        }
    }
}

/// Absent fields are left alone; an explicit `null` clears nullable fields.
#[derive(Deserialize, Default)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "present")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub assignee_id: Option<Option<String>>,
    pub comments_count: Option<i64>,
}

impl From<UpdateTaskRequest> for TaskPatch {
    fn from(req: UpdateTaskRequest) -> Self {
        TaskPatch {
            title: req.title,
            description: req.description,
            priority: req.priority,
            due_date: req.due_date,
            assignee_id: req.assignee_id,
            comments_count: req.comments_count,
        }
    }
}

/// Marks a field as present, keeping an explicit `null` as `Some(None)`.
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub source_column: Column,
    pub destination_column: Column,
    pub new_index: i64,
}

impl From<MoveTaskRequest> for MoveRequest {
    fn from(req: MoveTaskRequest) -> Self {
        MoveRequest {
            source_column: req.source_column,
            destination_column: req.destination_column,
            new_index: req.new_index,
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

/// Wire form of a [`BoardError`]: `{"error": {"kind": ..., "message": ...}}`.
pub struct ApiError(pub BoardError);

impl<E: Into<BoardError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl From<JsonRejection> for BoardError {
    fn from(rejection: JsonRejection) -> Self {
        BoardError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for BoardError {
    fn from(rejection: QueryRejection) -> Self {
        BoardError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for BoardError {
    fn from(rejection: PathRejection) -> Self {
        BoardError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match kind {
            ErrorKind::Internal => error!(error = ?self.0, "request failed"),
            ErrorKind::Transient => warn!(error = %self.0, "request failed transiently"),
            _ => {}
        }
        let body = serde_json::json!({
            "error": { "kind": kind, "message": self.0.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/users", post(create_user).get(find_user))
        .route("/api/users/{id}", get(get_user))
        .route("/api/workspaces", get(list_workspaces).post(create_workspace))
        .route(
            "/api/workspaces/{id}",
            get(get_workspace).patch(rename_workspace).delete(delete_workspace),
        )
        .route("/api/workspaces/{id}/members", post(add_member))
        .route("/api/workspaces/{id}/members/{user_id}", delete(remove_member))
        .route("/api/workspaces/{id}/board", get(get_board))
        .route("/api/workspaces/{id}/tasks", post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", patch(move_task))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_user(
    State(state): State<SharedState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let user = state
        .db
        .call(move |db| db.create_user(&req.name, &req.email))
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn find_user(
    State(state): State<SharedState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let email = query.email;
    let user = state
        .db
        .call(move |db| {
            db.find_user_by_email(&email)?
                .ok_or_else(|| BoardError::not_found("User", email))
        })
        .await?;
    Ok(Json(user))
}

async fn get_user(
    State(state): State<SharedState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let user = state
        .db
        .call(move |db| db.get_user(&id)?.ok_or_else(|| BoardError::not_found("User", id)))
        .await?;
    Ok(Json(user))
}

async fn list_workspaces(
    State(state): State<SharedState>,
    caller: Caller,
) -> ApiResult<impl IntoResponse> {
    let user_id = caller.id().to_string();
    let workspaces = state
        .db
        .call(move |db| db.list_workspaces_for(&user_id))
        .await?;
    Ok(Json(workspaces))
}

async fn create_workspace(
    State(state): State<SharedState>,
    caller: Caller,
    payload: Result<Json<WorkspaceNameRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let owner_id = caller.id().to_string();
    let workspace = state
        .db
        .call(move |db| db.create_workspace(&owner_id, &req.name))
        .await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

async fn get_workspace(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let user_id = caller.id().to_string();
    let workspace = state
        .db
        .call(move |db| auth::require_access(db, &id, &user_id, Access::Member))
        .await?;
    Ok(Json(workspace))
}

async fn rename_workspace(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<WorkspaceNameRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let Json(req) = payload?;
    let user_id = caller.id().to_string();
    let workspace = state
        .db
        .call(move |db| {
            auth::require_access(db, &id, &user_id, Access::Owner)?;
            db.rename_workspace(&id, &req.name)
        })
        .await?;
    broadcast_message(
        &state.notifier,
        Some(caller.id()),
        &WsMessage::WorkspaceUpdated { workspace: workspace.clone() },
    );
    Ok(Json(workspace))
}

async fn delete_workspace(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let user_id = caller.id().to_string();
    let workspace_id = id.clone();
    state
        .db
        .call(move |db| {
            auth::require_access(db, &id, &user_id, Access::Owner)?;
            db.delete_workspace(&id)
        })
        .await?;
    broadcast_message(
        &state.notifier,
        Some(caller.id()),
        &WsMessage::WorkspaceDeleted { workspace_id },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn add_member(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<AddMemberRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let Json(req) = payload?;
    let user_id = caller.id().to_string();
    let workspace = state
        .db
        .call(move |db| {
            auth::require_access(db, &id, &user_id, Access::Owner)?;
            let member_id = match (req.user_id, req.email) {
                (Some(member_id), _) => member_id,
                (None, Some(email)) => {
                    db.find_user_by_email(&email)?
                        .ok_or_else(|| BoardError::not_found("User", email))?
                        .id
                }
                (None, None) => {
                    return Err(BoardError::Validation(
                        "either email or user_id is required".into(),
                    ));
                }
            };
            db.add_member(&id, &member_id, req.role)
        })
        .await?;
    broadcast_message(
        &state.notifier,
        Some(caller.id()),
        &WsMessage::WorkspaceUpdated { workspace: workspace.clone() },
    );
    Ok(Json(workspace))
}

async fn remove_member(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path((id, member_id)) = path?;
    let user_id = caller.id().to_string();
    let workspace = state
        .db
        .call(move |db| {
            auth::require_access(db, &id, &user_id, Access::Owner)?;
            db.remove_member(&id, &member_id)
        })
        .await?;
    broadcast_message(
        &state.notifier,
        Some(caller.id()),
        &WsMessage::WorkspaceUpdated { workspace: workspace.clone() },
    );
    Ok(Json(workspace))
}

async fn get_board(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let user_id = caller.id().to_string();
    let board = state
        .db
        .call(move |db| {
            auth::require_access(db, &id, &user_id, Access::Member)?;
            db.get_board(&id)
        })
        .await?;
    Ok(Json(board))
}

async fn create_task(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(workspace_id) = path?;
    let Json(req) = payload?;
    let user_id = caller.id().to_string();
    let task = state
        .db
        .call(move |db| {
            auth::require_access(db, &workspace_id, &user_id, Access::Member)?;
            db.insert_task(&workspace_id, &user_id, NewTask::from(req))
        })
        .await?;
    broadcast_message(
        &state.notifier,
        Some(caller.id()),
        &WsMessage::TaskCreated { task: task.clone() },
    );
    Ok((StatusCode::CREATED, Json(task)))
}

/// Load a task and check the caller belongs to its workspace.
fn authorized_task(db: &BoardDb, task_id: &str, user_id: &str) -> Result<Task, BoardError> {
    let task = db
        .get_task(task_id)?
        .ok_or_else(|| BoardError::not_found("Task", task_id))?;
    auth::require_access(db, &task.workspace_id, user_id, Access::Member)?;
    Ok(task)
}

async fn get_task(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let user_id = caller.id().to_string();
    let task = state
        .db
        .call(move |db| authorized_task(db, &id, &user_id))
        .await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let Json(req) = payload?;
    let user_id = caller.id().to_string();
    let task = state
        .db
        .call(move |db| {
            authorized_task(db, &id, &user_id)?;
            db.update_task(&id, TaskPatch::from(req))
        })
        .await?;
    broadcast_message(
        &state.notifier,
        Some(caller.id()),
        &WsMessage::TaskUpdated { task: task.clone() },
    );
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let user_id = caller.id().to_string();
    let task = state
        .db
        .call(move |db| {
            authorized_task(db, &id, &user_id)?;
            db.delete_task(&id)
        })
        .await?;
    broadcast_message(
        &state.notifier,
        Some(caller.id()),
        &WsMessage::TaskDeleted {
            task_id: task.id,
            workspace_id: task.workspace_id,
            column: task.column,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn move_task(
    State(state): State<SharedState>,
    caller: Caller,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<MoveTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    let Json(req) = payload?;
    let user_id = caller.id().to_string();
    let moved = state
        .db
        .call(move |db| {
            authorized_task(db, &id, &user_id)?;
            db.move_task(&id, MoveRequest::from(req))
        })
        .await?;
    broadcast_message(
        &state.notifier,
        Some(caller.id()),
        &WsMessage::TaskMoved {
            task_id: moved.task.id.clone(),
            workspace_id: moved.task.workspace_id.clone(),
            source_column: moved.from_column,
            destination_column: moved.task.column,
            new_index: moved.task.order,
        },
    );
    Ok(Json(moved.task))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::ws::Notification;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let db = BoardDb::new_in_memory().unwrap();
        let (notifier, _) = broadcast::channel(64);
        Arc::new(AppState {
            db: DbHandle::new(db),
            notifier,
        })
    }

    fn test_app(state: &SharedState) -> Router {
        api_router().with_state(state.clone())
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(auth::USER_HEADER, user);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn register(app: &Router, name: &str) -> String {
        let (status, user) = send(
            app,
            "POST",
            "/api/users",
            None,
            Some(json!({"name": name, "email": format!("{}@example.com", name.to_lowercase())})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        user["id"].as_str().unwrap().to_string()
    }

    async fn workspace(app: &Router, owner: &str, name: &str) -> String {
        let (status, ws) = send(app, "POST", "/api/workspaces", Some(owner), Some(json!({"name": name}))).await;
        assert_eq!(status, StatusCode::CREATED);
        ws["id"].as_str().unwrap().to_string()
    }

    async fn task(app: &Router, user: &str, ws: &str, title: &str, column: &str) -> Value {
        let (status, task) = send(
            app,
            "POST",
            &format!("/api/workspaces/{ws}/tasks"),
            Some(user),
            Some(json!({"title": title, "column": column})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{task}");
        task
    }

    fn titles(board: &Value, column: usize) -> Vec<String> {
        board["columns"][column]["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap().to_string())
            .collect()
    }

    // 1. Health check
    #[tokio::test]
    async fn test_health_check() {
        let state = test_state();
        let app = test_app(&state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // 2. Identity is required
    #[tokio::test]
    async fn test_requests_without_identity_are_unauthorized() {
        let state = test_state();
        let app = test_app(&state);

        let (status, body) = send(&app, "GET", "/api/workspaces", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["kind"], "unauthorized");

        let (status, _) = send(&app, "GET", "/api/workspaces", Some("ghost"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // 3. Users
    #[tokio::test]
    async fn test_register_and_lookup_user() {
        let state = test_state();
        let app = test_app(&state);
        let id = register(&app, "Ada").await;

        let (status, user) = send(&app, "GET", &format!("/api/users/{id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["email"], "ada@example.com");

        let (status, user) = send(&app, "GET", "/api/users?email=ada@example.com", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["id"], id.as_str());

        let (status, body) = send(
            &app,
            "POST",
            "/api/users",
            None,
            Some(json!({"name": "Ada 2", "email": "ada@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["kind"], "conflict");
    }

    #[tokio::test]
    async fn test_bad_query_and_path_params_are_structured_errors() {
        let state = test_state();
        let app = test_app(&state);

        let (status, body) = send(&app, "GET", "/api/users", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation");
        assert!(body["error"]["message"].as_str().unwrap().contains("email"));

        let (status, body) = send(&app, "GET", "/api/users/%FF", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation");
    }

    // 4. Workspace lifecycle and membership
    #[tokio::test]
    async fn test_workspace_membership_flow() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let bob = register(&app, "Bob").await;
        let ws = workspace(&app, &ada, "Team").await;

        // Bob is not yet a member.
        let (status, _) = send(&app, "GET", &format!("/api/workspaces/{ws}"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/workspaces/{ws}/members"),
            Some(&ada),
            Some(json!({"email": "bob@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["members"].as_array().unwrap().len(), 2);
        assert_eq!(body["members"][1]["role"], "member");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/workspaces/{ws}/members"),
            Some(&ada),
            Some(json!({"user_id": bob})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Only the owner manages membership.
        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/workspaces/{ws}/members/{ada}"),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, list) = send(&app, "GET", "/api/workspaces", Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            "DELETE",
            &format!("/api/workspaces/{ws}/members/{bob}"),
            Some(&ada),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["members"].as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/workspaces/{ws}"),
            Some(&ada),
            Some(json!({"name": "Renamed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Renamed");
    }

    // 5. Board listing
    #[tokio::test]
    async fn test_get_board_empty() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let ws = workspace(&app, &ada, "Team").await;

        let (status, board) = send(&app, "GET", &format!("/api/workspaces/{ws}/board"), Some(&ada), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(board["workspace"]["name"], "Team");
        let columns = board["columns"].as_array().unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["todo", "inProgress", "blocked", "done"]);
        for col in columns {
            assert!(col["tasks"].as_array().unwrap().is_empty());
        }
    }

    // 6. Create task
    #[tokio::test]
    async fn test_create_task_defaults() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let ws = workspace(&app, &ada, "Team").await;

        let (status, created) = send(
            &app,
            "POST",
            &format!("/api/workspaces/{ws}/tasks"),
            Some(&ada),
            Some(json!({"title": "Fix login bug", "description": "Users cannot log in"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["title"], "Fix login bug");
        assert_eq!(created["column"], "todo");
        assert_eq!(created["priority"], "medium");
        assert_eq!(created["order"], 0);
        assert_eq!(created["workspace_id"], ws.as_str());
        assert_eq!(created["created_by"], ada.as_str());

        let second = task(&app, &ada, &ws, "Second", "todo").await;
        assert_eq!(second["order"], 1);
    }

    // 7. Validation
    #[tokio::test]
    async fn test_invalid_payloads_are_rejected() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let ws = workspace(&app, &ada, "Team").await;
        let uri = format!("/api/workspaces/{ws}/tasks");

        for body in [
            json!({"title": ""}),
            json!({"title": "x", "column": "backlog"}),
            json!({"title": "x", "priority": "urgent"}),
            json!({"description": "no title"}),
        ] {
            let (status, err) = send(&app, "POST", &uri, Some(&ada), Some(body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(err["error"]["kind"], "validation");
        }

        let (_, board) = send(&app, "GET", &format!("/api/workspaces/{ws}/board"), Some(&ada), None).await;
        assert!(titles(&board, 0).is_empty());
    }

    // 8. Update task
    #[tokio::test]
    async fn test_update_task() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let ws = workspace(&app, &ada, "Team").await;
        let created = task(&app, &ada, &ws, "Old title", "todo").await;
        let id = created["id"].as_str().unwrap();

        let (status, updated) = send(
            &app,
            "PATCH",
            &format!("/api/tasks/{id}"),
            Some(&ada),
            Some(json!({
                "title": "New title",
                "description": "New desc",
                "priority": "high",
                "due_date": "2030-01-01T00:00:00Z",
                "assignee_id": ada
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "New title");
        assert_eq!(updated["priority"], "high");
        assert_eq!(updated["assignee"]["name"], "Ada");
        assert!(updated["due_date"].as_str().unwrap().starts_with("2030-01-01"));

        let (status, cleared) = send(
            &app,
            "PATCH",
            &format!("/api/tasks/{id}"),
            Some(&ada),
            Some(json!({"assignee_id": null, "due_date": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(cleared["assignee"].is_null());
        assert!(cleared["due_date"].is_null());
        assert_eq!(cleared["description"], "New desc");
    }

    // 9. Move task across columns
    #[tokio::test]
    async fn test_move_task_across_columns() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let ws = workspace(&app, &ada, "Team").await;
        let t1 = task(&app, &ada, &ws, "T1", "todo").await;
        task(&app, &ada, &ws, "T2", "todo").await;
        task(&app, &ada, &ws, "T3", "todo").await;

        let id = t1["id"].as_str().unwrap();
        let (status, moved) = send(
            &app,
            "PATCH",
            &format!("/api/tasks/{id}/move"),
            Some(&ada),
            Some(json!({"source_column": "todo", "destination_column": "inProgress", "new_index": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["column"], "inProgress");
        assert_eq!(moved["order"], 0);

        let (_, board) = send(&app, "GET", &format!("/api/workspaces/{ws}/board"), Some(&ada), None).await;
        assert_eq!(titles(&board, 0), vec!["T2", "T3"]);
        assert_eq!(board["columns"][0]["tasks"][1]["order"], 1);
        assert_eq!(titles(&board, 1), vec!["T1"]);
    }

    // 10. Move errors
    #[tokio::test]
    async fn test_move_task_errors() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let ws = workspace(&app, &ada, "Team").await;
        let t = task(&app, &ada, &ws, "T", "todo").await;
        let uri = format!("/api/tasks/{}/move", t["id"].as_str().unwrap());

        let (status, _) = send(
            &app,
            "PATCH",
            &uri,
            Some(&ada),
            Some(json!({"source_column": "todo", "destination_column": "done", "new_index": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "PATCH",
            &uri,
            Some(&ada),
            Some(json!({"source_column": "todo", "destination_column": "done", "new_index": -1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation");

        let (status, _) = send(
            &app,
            "PATCH",
            &uri,
            Some(&ada),
            Some(json!({"source_column": "done", "destination_column": "todo", "new_index": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            "PATCH",
            "/api/tasks/missing/move",
            Some(&ada),
            Some(json!({"source_column": "todo", "destination_column": "done", "new_index": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // 11. Delete task
    #[tokio::test]
    async fn test_delete_task_closes_gap() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let ws = workspace(&app, &ada, "Team").await;
        task(&app, &ada, &ws, "T0", "done").await;
        let t1 = task(&app, &ada, &ws, "T1", "done").await;
        task(&app, &ada, &ws, "T2", "done").await;
        let id = t1["id"].as_str().unwrap();

        let (status, _) = send(&app, "DELETE", &format!("/api/tasks/{id}"), Some(&ada), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "GET", &format!("/api/tasks/{id}"), Some(&ada), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, board) = send(&app, "GET", &format!("/api/workspaces/{ws}/board"), Some(&ada), None).await;
        assert_eq!(titles(&board, 3), vec!["T0", "T2"]);
        assert_eq!(board["columns"][3]["tasks"][1]["order"], 1);
    }

    // 12. Tenant isolation
    #[tokio::test]
    async fn test_tasks_are_isolated_between_workspaces() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let eve = register(&app, "Eve").await;
        let ws_a = workspace(&app, &ada, "A").await;
        let ws_b = workspace(&app, &eve, "B").await;
        let secret = task(&app, &ada, &ws_a, "Secret", "todo").await;
        let id = secret["id"].as_str().unwrap();

        let (_, board) = send(&app, "GET", &format!("/api/workspaces/{ws_b}/board"), Some(&eve), None).await;
        assert!(titles(&board, 0).is_empty());

        for (method, uri, body) in [
            ("GET", format!("/api/tasks/{id}"), None),
            ("PATCH", format!("/api/tasks/{id}"), Some(json!({"title": "Mine"}))),
            ("DELETE", format!("/api/tasks/{id}"), None),
            ("GET", format!("/api/workspaces/{ws_a}/board"), None),
            ("POST", format!("/api/workspaces/{ws_a}/tasks"), Some(json!({"title": "Sneaky"}))),
        ] {
            let (status, _) = send(&app, method, &uri, Some(&eve), body).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
        }
    }

    // 13. Delete workspace cascades
    #[tokio::test]
    async fn test_delete_workspace_removes_tasks() {
        let state = test_state();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let ws = workspace(&app, &ada, "Team").await;
        let t = task(&app, &ada, &ws, "T", "todo").await;

        let (status, _) = send(&app, "DELETE", &format!("/api/workspaces/{ws}"), Some(&ada), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(
            &app,
            "GET",
            &format!("/api/tasks/{}", t["id"].as_str().unwrap()),
            Some(&ada),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // 14. Notifications
    #[tokio::test]
    async fn test_mutations_publish_notifications() {
        let state = test_state();
        let mut rx: broadcast::Receiver<Notification> = state.notifier.subscribe();
        let app = test_app(&state);
        let ada = register(&app, "Ada").await;
        let ws = workspace(&app, &ada, "Team").await;
        let t = task(&app, &ada, &ws, "T", "todo").await;
        let id = t["id"].as_str().unwrap();

        send(
            &app,
            "PATCH",
            &format!("/api/tasks/{id}/move"),
            Some(&ada),
            Some(json!({"source_column": "todo", "destination_column": "blocked", "new_index": 0})),
        )
        .await;
        send(&app, "DELETE", &format!("/api/tasks/{id}"), Some(&ada), None).await;

        let kinds: Vec<String> = (0..3)
            .map(|_| {
                let notification = rx.try_recv().unwrap();
                assert_eq!(notification.workspace_id, ws);
                assert_eq!(notification.origin.as_deref(), Some(ada.as_str()));
                let msg: Value = serde_json::from_str(&notification.payload).unwrap();
                msg["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["TaskCreated", "TaskMoved", "TaskDeleted"]);
    }

    #[test]
    fn test_update_request_distinguishes_null_from_absent() {
        let req: UpdateTaskRequest =
            serde_json::from_value(json!({"description": null, "title": "t"})).unwrap();
        assert_eq!(req.description, Some(None));
        assert!(req.due_date.is_none());
        assert!(req.assignee_id.is_none());
    }
}
