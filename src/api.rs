use axum::{
    extract::Path,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::Error, ports, session::SessionHandle, storage::Workspace, toolchain::Toolchain,
    websocket,
};

/// All routes below `/api`.
pub(crate) fn routes() -> Router {
    Router::new()
        .route("/serial/ws", get(websocket::ws_handler))
        .route("/serial/ports", get(serial_ports))
        .route("/serial/status", get(serial_status))
        .route("/serial/events", get(websocket::events_handler))
        .route("/ports", get(serial_ports))
        .route("/boards", get(boards))
        .route("/boards/available", get(boards))
        .route("/cores", get(cores))
        .route("/cores/search", get(search_cores))
        .route("/cores/install", post(install_core))
        .route("/cores/uninstall", post(uninstall_core))
        .route("/libraries", get(libraries))
        .route("/libraries/search", post(search_libraries))
        .route("/libraries/install", post(install_library))
        .route("/libraries/uninstall", post(uninstall_library))
        .route("/compile", post(compile))
        .route("/upload", post(upload))
        .route("/files", post(save_file))
        .route("/files/*path", get(read_file))
        .route("/workspace", get(workspace))
}

fn failure(e: Error) -> Json<Value> {
    let error = match e {
        Error::Toolchain(message) | Error::Storage(message) => message,
        other => other.to_string(),
    };

    Json(json!({ "success": false, "error": error }))
}

fn listing(result: Result<Value, Error>, key: &str) -> Json<Value> {
    match result {
        Ok(items) => Json(json!({ "success": true, key: items })),
        Err(e) => failure(e),
    }
}

fn ran(success: bool, message: String) -> Json<Value> {
    Json(json!({ "success": success, "message": message }))
}

async fn serial_ports() -> impl IntoResponse {
    match ports::available() {
        Ok(ports) => Json(json!({ "success": true, "ports": { "detected_ports": ports } })),
        Err(e) => failure(e),
    }
}

async fn serial_status(Extension(session): Extension<SessionHandle>) -> impl IntoResponse {
    Json(session.status().await)
}

async fn boards(Extension(toolchain): Extension<Toolchain>) -> impl IntoResponse {
    listing(
        toolchain
            .list(&["board", "listall", "--format", "json"], "boards")
            .await,
        "boards",
    )
}

async fn cores(Extension(toolchain): Extension<Toolchain>) -> impl IntoResponse {
    listing(
        toolchain
            .list(&["core", "list", "--format", "json"], "platforms")
            .await,
        "cores",
    )
}

async fn search_cores(Extension(toolchain): Extension<Toolchain>) -> impl IntoResponse {
    listing(
        toolchain
            .list(&["core", "search", "--format", "json"], "platforms")
            .await,
        "platforms",
    )
}

#[derive(Debug, Deserialize)]
struct CoreRequest {
    core_name: String,
}

async fn install_core(
    Extension(toolchain): Extension<Toolchain>,
    Json(request): Json<CoreRequest>,
) -> impl IntoResponse {
    let output = toolchain.run(&["core", "install", request.core_name.as_str()]).await;
    ran(output.success, output.message())
}

async fn uninstall_core(
    Extension(toolchain): Extension<Toolchain>,
    Json(request): Json<CoreRequest>,
) -> impl IntoResponse {
    let output = toolchain
        .run(&["core", "uninstall", request.core_name.as_str()])
        .await;
    ran(output.success, output.message())
}

async fn libraries(Extension(toolchain): Extension<Toolchain>) -> impl IntoResponse {
    listing(
        toolchain
            .list(&["lib", "list", "--format", "json"], "libraries")
            .await,
        "libraries",
    )
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct LibrarySearchRequest {
    query: String,
}

async fn search_libraries(
    Extension(toolchain): Extension<Toolchain>,
    Json(request): Json<LibrarySearchRequest>,
) -> impl IntoResponse {
    let mut args = vec!["lib", "search"];
    if !request.query.is_empty() {
        args.push(request.query.as_str());
    }
    args.extend(["--format", "json"]);

    listing(toolchain.list(args.as_slice(), "libraries").await, "libraries")
}

#[derive(Debug, Deserialize)]
struct LibraryRequest {
    library_name: String,
}

async fn install_library(
    Extension(toolchain): Extension<Toolchain>,
    Json(request): Json<LibraryRequest>,
) -> impl IntoResponse {
    let output = toolchain
        .run(&["lib", "install", request.library_name.as_str()])
        .await;
    ran(output.success, output.message())
}

async fn uninstall_library(
    Extension(toolchain): Extension<Toolchain>,
    Json(request): Json<LibraryRequest>,
) -> impl IntoResponse {
    let output = toolchain
        .run(&["lib", "uninstall", request.library_name.as_str()])
        .await;
    ran(output.success, output.message())
}

#[derive(Debug, Deserialize)]
struct CompileRequest {
    code: String,
    board: String,
}

async fn compile(
    Extension(toolchain): Extension<Toolchain>,
    Json(request): Json<CompileRequest>,
) -> impl IntoResponse {
    match toolchain.compile(&request.code, &request.board).await {
        Ok(output) => ran(output.success, output.message()),
        Err(e) => failure(e),
    }
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    code: String,
    board: String,
    port: String,
}

async fn upload(
    Extension(toolchain): Extension<Toolchain>,
    Json(request): Json<UploadRequest>,
) -> impl IntoResponse {
    match toolchain
        .upload(&request.code, &request.board, &request.port)
        .await
    {
        Ok(output) => ran(output.success, output.message()),
        Err(e) => failure(e),
    }
}

#[derive(Debug, Deserialize)]
struct FileContent {
    path: String,
    content: String,
}

async fn save_file(
    Extension(workspace): Extension<Workspace>,
    Json(file): Json<FileContent>,
) -> impl IntoResponse {
    match workspace.save(&file.path, &file.content).await {
        Ok(()) => ran(true, "File saved successfully".into()),
        Err(e) => failure(e),
    }
}

async fn read_file(
    Extension(workspace): Extension<Workspace>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    match workspace.read(path.trim_start_matches('/')).await {
        Ok(content) => Json(json!({ "success": true, "content": content })),
        Err(e) => failure(e),
    }
}

async fn workspace(Extension(workspace): Extension<Workspace>) -> impl IntoResponse {
    match workspace.list().await {
        Ok(entries) => Json(json!({ "success": true, "workspace": entries })),
        Err(e) => failure(e),
    }
}
