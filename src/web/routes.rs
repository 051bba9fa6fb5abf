use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;

use super::NDJSON;
use crate::context::AppContext;
use crate::core::{
    FlashFlags, FlashJob, JobSpec, ListDetail, ListJob, ProgramJob, SubmitError, TrackedJob,
};

/// Build the API router.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/servers", get(list_servers))
        .route("/jobs", get(list_jobs))
        .route("/program_fpga", post(program_fpga))
        .route("/program_flash", post(program_flash))
        .route("/list_targets", post(list_targets))
        .with_state(ctx)
}

#[derive(Serialize)]
struct ServerSummary {
    name: String,
    address: String,
}

async fn list_servers(State(ctx): State<AppContext>) -> Json<Vec<ServerSummary>> {
    let servers = ctx
        .config
        .servers
        .iter()
        .map(|s| ServerSummary {
            name: s.name.clone(),
            address: s.address.clone(),
        })
        .collect();
    Json(servers)
}

async fn list_jobs(State(ctx): State<AppContext>) -> Json<Vec<TrackedJob>> {
    Json(ctx.jobs.tracker().get_all().await)
}

#[derive(Deserialize)]
struct ProgramRequest {
    hw_server: String,
    bitstream: PathBuf,
    #[serde(default)]
    probes: Option<PathBuf>,
}

async fn program_fpga(State(ctx): State<AppContext>, Json(req): Json<ProgramRequest>) -> Response {
    let spec = JobSpec::Program(ProgramJob {
        targets: ctx.config.targets_for(&req.hw_server),
        server: req.hw_server,
        bitstream: req.bitstream,
        probes: req.probes,
    });
    submit(&ctx, spec).await
}

#[derive(Deserialize)]
struct FlashRequest {
    hw_server: String,
    image: PathBuf,
    #[serde(default)]
    blank_check: Option<bool>,
    #[serde(default)]
    erase: Option<bool>,
    #[serde(default)]
    cfg_program: Option<bool>,
    #[serde(default)]
    verify: Option<bool>,
}

async fn program_flash(State(ctx): State<AppContext>, Json(req): Json<FlashRequest>) -> Response {
    let defaults = FlashFlags::default();
    let flags = FlashFlags {
        blank_check: req.blank_check.unwrap_or(defaults.blank_check),
        erase: req.erase.unwrap_or(defaults.erase),
        cfg_program: req.cfg_program.unwrap_or(defaults.cfg_program),
        verify: req.verify.unwrap_or(defaults.verify),
    };

    let spec = JobSpec::Flash(FlashJob {
        targets: ctx.config.targets_for(&req.hw_server),
        server: req.hw_server,
        image: req.image,
        flags,
        memory_part: ctx.config.flash_memory_part.clone(),
    });
    submit(&ctx, spec).await
}

#[derive(Deserialize)]
struct ListRequest {
    hw_server: String,
    #[serde(default)]
    full: bool,
}

async fn list_targets(State(ctx): State<AppContext>, Json(req): Json<ListRequest>) -> Response {
    let spec = JobSpec::List(ListJob {
        expected: ctx.config.targets_for(&req.hw_server),
        server: req.hw_server,
        detail: if req.full {
            ListDetail::Full
        } else {
            ListDetail::Brief
        },
    });
    submit(&ctx, spec).await
}

/// Queue the job and stream its events as the response body.
async fn submit(ctx: &AppContext, spec: JobSpec) -> Response {
    match ctx.jobs.submit(spec).await {
        Ok(handle) => {
            tracing::debug!(job_id = %handle.id(), kind = %handle.kind(), "Streaming job events");
            let body = Body::from_stream(handle.into_ndjson());
            ([(header::CONTENT_TYPE, NDJSON)], body).into_response()
        }
        Err(e @ SubmitError::Invalid(_)) => error_response(StatusCode::BAD_REQUEST, e),
        Err(e @ SubmitError::ShuttingDown) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

fn error_response(status: StatusCode, error: SubmitError) -> Response {
    tracing::warn!(status = %status, error = %error, "Rejected job submission");
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, HwServer, ToolchainConfig};
    use crate::core::TargetRef;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn context(dir: &TempDir) -> AppContext {
        let settings = dir.path().join("settings64.sh");
        std::fs::write(&settings, "").unwrap();

        let toolchain = ToolchainConfig {
            settings,
            executable: "sh".to_string(),
            args: vec!["-c".to_string(), "echo 'INFO: ok'; echo '# hidden'".to_string()],
        };

        let mut config = AppConfig::default();
        config.shell = PathBuf::from("sh");
        config.script_dir = dir.path().join("tcl");
        config.log_dir = dir.path().join("logs");
        config.toolchains.program = toolchain.clone();
        config.toolchains.flash = toolchain.clone();
        config.toolchains.list = toolchain;
        config.servers = vec![HwServer {
            name: "Bench".into(),
            address: "lab-01:3121".into(),
            targets: vec![TargetRef::new("xilinx_tcf/Digilent/SN1", "xcvu9p")],
        }];

        AppContext::new(config).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Option<String>, String) {
        let response = app.oneshot(request).await.unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_servers_lists_address_book() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);

        let request = Request::builder().uri("/servers").body(Body::empty()).unwrap();
        let (status, _, body) = send(router(ctx.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        let servers: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(servers[0]["name"], "Bench");
        assert_eq!(servers[0]["address"], "lab-01:3121");

        ctx.jobs.shutdown().await;
    }

    #[tokio::test]
    async fn test_program_fpga_streams_ndjson_until_end() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);

        let request = post(
            "/program_fpga",
            json!({ "hw_server": "lab-01:3121", "bitstream": "/srv/top.bit" }),
        );
        let (status, content_type, body) = send(router(ctx.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(NDJSON));

        let lines: Vec<String> = body
            .lines()
            .map(|record| {
                let record: serde_json::Value = serde_json::from_str(record).unwrap();
                assert_eq!(record["type"], "log");
                record["line"].as_str().unwrap().to_string()
            })
            .collect();
        assert!(lines.contains(&"INFO: ok".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with('#')));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("===== FPGA Programming Finished =====")
        );

        ctx.jobs.shutdown().await;
    }

    #[tokio::test]
    async fn test_list_targets_ends_with_tree_record() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);

        let request = post("/list_targets", json!({ "hw_server": "lab-01:3121" }));
        let (status, _, body) = send(router(ctx.clone()), request).await;

        assert_eq!(status, StatusCode::OK);
        let last: serde_json::Value = serde_json::from_str(body.lines().last().unwrap()).unwrap();
        assert_eq!(last["type"], "tree");
        assert_eq!(last["tree"]["server"], "lab-01:3121");

        ctx.jobs.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_job_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);

        let request = post(
            "/program_flash",
            json!({ "hw_server": "lab-01:3121", "image": "/srv/[boot].mcs" }),
        );
        let (status, _, body) = send(router(ctx.clone()), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(error["error"].as_str().unwrap().contains("image"));

        ctx.jobs.shutdown().await;
    }

    #[tokio::test]
    async fn test_submission_after_shutdown_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        ctx.jobs.shutdown().await;

        let request = post("/list_targets", json!({ "hw_server": "lab-01:3121" }));
        let (status, _, _) = send(router(ctx), request).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
