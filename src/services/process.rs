// src/services/process.rs

//! Extractor that runs an isolated worker process per poll.
//!
//! The worker (typically a headless-browser script) receives one JSON request
//! as its last argument, base64 encoded behind an `--input-data` prefix, and
//! must print one JSON response:
//!
//! ```text
//! argv:   --input-data<base64 of {"url": "...", "selectorToGet": "...", "timeout": 60000}>
//! stdout: {"extractedData": [ {"token": "...", "size": "...", ...} ]}
//! stderr: {"error": "..."}            (with a non-zero exit code)
//! ```
//!
//! Workers get no stdin.
//!
//! The worker must only report an empty `extractedData` when the page showed
//! its empty-state marker.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::models::{ExtractorConfig, PositionRecord, Target};
use crate::services::Extractor;

/// Prefix of the argument carrying the encoded request.
const INPUT_FLAG: &str = "--input-data";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRequest<'a> {
    url: &'a str,
    selector_to_get: &'a str,
    timeout: u64,
}

impl WorkerRequest<'_> {
    /// `--input-data` followed by the base64 JSON encoding of the request.
    fn to_arg(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(format!("{}{}", INPUT_FLAG, STANDARD.encode(json)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerResponse {
    #[serde(default)]
    extracted_data: Option<Vec<PositionRecord>>,
    #[serde(default)]
    error: Option<String>,
}

/// Extractor spawning `command args...` for every fetch.
#[derive(Debug, Clone)]
pub struct ProcessExtractor {
    command: String,
    args: Vec<String>,
    row_selector: String,
}

impl ProcessExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        if config.process.command.trim().is_empty() {
            return Err(AppError::config("extractor.process.command is empty"));
        }
        Ok(Self {
            command: config.process.command.clone(),
            args: config.process.args.clone(),
            row_selector: config.selectors.row_selector.clone(),
        })
    }

    async fn run_worker(&self, target: &Target, timeout: Duration) -> Result<Vec<PositionRecord>> {
        let input = WorkerRequest {
            url: &target.url,
            selector_to_get: &self.row_selector,
            timeout: timeout.as_millis() as u64,
        }
        .to_arg()?;

        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::extraction(&target.url, format!("spawn {}: {}", self.command, e)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AppError::extraction(&target.url, e))?;

        parse_worker_output(
            &target.url,
            output.status.success(),
            &output.stdout,
            &output.stderr,
        )
    }
}

#[async_trait]
impl Extractor for ProcessExtractor {
    async fn fetch(&self, target: &Target, timeout: Duration) -> Result<Vec<PositionRecord>> {
        // Dropping the worker future kills the child.
        tokio::time::timeout(timeout, self.run_worker(target, timeout))
            .await
            .map_err(|_| AppError::ExtractionTimeout {
                target: target.url.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }
}

/// Last JSON line a worker printed on a stream.
fn last_response(stream: &[u8]) -> Option<WorkerResponse> {
    String::from_utf8_lossy(stream)
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

fn parse_worker_output(
    target: &str,
    success: bool,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<Vec<PositionRecord>> {
    if !success {
        let message = last_response(stderr)
            .and_then(|r| r.error)
            .or_else(|| last_response(stdout).and_then(|r| r.error))
            .unwrap_or_else(|| "worker exited with failure".to_string());
        return Err(AppError::extraction(target, message));
    }

    let response = last_response(stdout)
        .ok_or_else(|| AppError::extraction(target, "worker printed no JSON response"))?;

    match (response.extracted_data, response.error) {
        (_, Some(error)) => Err(AppError::extraction(target, error)),
        (Some(records), None) => {
            if let Some(index) = records.iter().position(|r| !r.is_well_formed()) {
                return Err(AppError::extraction(
                    target,
                    format!("row {} is malformed", index + 1),
                ));
            }
            Ok(records)
        }
        (None, None) => Err(AppError::extraction(target, "worker response has no data")),
    }
}
