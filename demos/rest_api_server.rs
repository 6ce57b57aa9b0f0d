//! REST API server example
//!
//! Runs lms-qa with the REST API enabled, against the LMS given by the
//! `LMS_QA_BASE_URL` and `LMS_QA_TOKEN` environment variables. A JSON config
//! file may be passed as the first argument instead.
//!
//! After starting, you can:
//! - List tasks via GET http://localhost:6790/api/v1/tasks
//! - Start a run via POST http://localhost:6790/api/v1/executions
//! - Stream progress via GET http://localhost:6790/api/v1/executions/{id}/events
//! - Read findings via GET http://localhost:6790/api/v1/executions/{id}/result

use lms_qa::api::start_api_server;
use lms_qa::{Config, ExecutionEngine};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lms_qa=info")),
        )
        .init();

    let mut config: Config = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    if let Ok(base_url) = std::env::var("LMS_QA_BASE_URL") {
        config.canvas.base_url = base_url;
    }
    if let Ok(token) = std::env::var("LMS_QA_TOKEN") {
        config.canvas.access_token = token;
    }

    let engine = ExecutionEngine::new(config.clone()).await?;
    let address = config.api.bind_address;

    println!("Starting lms-qa REST API server");
    println!("API Base: http://{address}/api/v1");
    println!();
    println!("Example commands:");
    println!("  # Preview a URL migration in course 1234");
    println!("  curl -X POST http://{address}/api/v1/executions \\");
    println!("    -H 'Content-Type: application/json' \\");
    println!(
        "    -d '{{\"task_name\": \"find_replace\", \"course_id\": \"1234\", \"mappings\": [{{\"find\": \"http://old.example.edu\", \"replace\": \"https://new.example.edu\"}}], \"options\": {{\"preview_mode\": true}}}}'"
    );
    println!();
    println!("  # Follow progress (Server-Sent Events)");
    println!("  curl -N http://{address}/api/v1/executions/<id>/events");

    let server = tokio::spawn(start_api_server(engine.clone(), Arc::new(config)));

    lms_qa::run_with_shutdown(engine).await?;
    server.abort();

    Ok(())
}
