use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use crate::dispatch::transport::{BackendRequest, BackendResponse, Method};
use crate::dispatch::{Job, JobResult, PollStatus};
use crate::error::{ImgenError, Stage};
use crate::request::RequestSpec;

const STATUS_CREATED: u16 = 201;
const STATUS_OK: u16 = 200;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;
const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// Builds requests against the job backend and classifies its responses.
/// Holds no connection state; see `Transport` for the wire.
#[derive(Debug, Clone)]
pub struct JobApi {
    base_url: String,
}

#[derive(Deserialize)]
struct ResultBody {
    seed: i64,
    base64: String,
}

impl JobApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /job/submit/{model}`
    pub fn submit_request(&self, spec: &RequestSpec) -> Result<BackendRequest, ImgenError> {
        let body =
            serde_json::to_value(spec.submit_payload()).map_err(|e| ImgenError::SubmissionFailed {
                message: format!("failed to encode payload: {e}"),
                status: None,
            })?;
        Ok(BackendRequest {
            method: Method::Post,
            url: format!("{}/job/submit/{}", self.base_url, spec.model()),
            body: Some(body),
        })
    }

    /// `GET /job/status/{model}/{jobId}`
    pub fn status_request(&self, job: &Job) -> BackendRequest {
        BackendRequest {
            method: Method::Get,
            url: format!("{}/job/status/{}/{}", self.base_url, job.model, job.id),
            body: None,
        }
    }

    /// `GET /job/result/{model}/{jobId}`
    pub fn result_request(&self, job: &Job) -> BackendRequest {
        BackendRequest {
            method: Method::Get,
            url: format!("{}/job/result/{}/{}", self.base_url, job.model, job.id),
            body: None,
        }
    }
}

/// Extract the job id from a submission response (raw body, status 201).
pub fn parse_submit_response(response: &BackendResponse) -> Result<String, ImgenError> {
    match response.status {
        STATUS_CREATED => {}
        STATUS_TOO_MANY_REQUESTS => {
            return Err(ImgenError::RateLimited {
                stage: Stage::Submit,
            });
        }
        STATUS_SERVICE_UNAVAILABLE => return Err(ImgenError::BackendSaturated),
        status => {
            return Err(ImgenError::SubmissionFailed {
                message: format!("unexpected HTTP {status}"),
                status: Some(status),
            });
        }
    }

    let id = response.text().trim().to_string();
    if !is_safe_job_id(&id) {
        return Err(ImgenError::SubmissionFailed {
            message: "backend returned an unusable job id".to_string(),
            status: Some(response.status),
        });
    }
    Ok(id)
}

/// Classify one status response.
pub fn parse_status_response(
    job_id: &str,
    response: &BackendResponse,
) -> Result<PollStatus, ImgenError> {
    match response.status {
        STATUS_OK => {}
        STATUS_TOO_MANY_REQUESTS => {
            return Err(ImgenError::RateLimited { stage: Stage::Poll });
        }
        status => {
            return Err(ImgenError::PollFailed {
                job_id: job_id.to_string(),
                message: format!("HTTP {status}"),
                status: Some(status),
            });
        }
    }

    let token = response.text().trim().to_string();
    Ok(match token.as_str() {
        "completed" => PollStatus::Completed,
        "failed" => PollStatus::Failed,
        _ => PollStatus::Pending(token),
    })
}

/// Decode a result response: `{"seed": <int>, "base64": "<image>"}`.
pub fn parse_result_response(
    job_id: &str,
    response: &BackendResponse,
) -> Result<JobResult, ImgenError> {
    let fetch_failed = |message: String| ImgenError::FetchFailed {
        job_id: job_id.to_string(),
        message,
    };

    match response.status {
        STATUS_OK => {}
        STATUS_TOO_MANY_REQUESTS => {
            return Err(ImgenError::RateLimited {
                stage: Stage::Fetch,
            });
        }
        status => return Err(fetch_failed(format!("HTTP {status}"))),
    }

    let body: ResultBody = serde_json::from_slice(&response.body)
        .map_err(|e| fetch_failed(format!("malformed result JSON: {e}")))?;
    let image = BASE64
        .decode(body.base64.trim())
        .map_err(|e| fetch_failed(format!("malformed base64 image: {e}")))?;
    if image.is_empty() {
        return Err(fetch_failed("empty image payload".to_string()));
    }

    Ok(JobResult {
        seed: body.seed,
        image,
    })
}

/// Job ids are spliced into URL paths, so anything that could change the
/// path shape is refused.
fn is_safe_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 256
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && id != "."
        && id != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Model;

    fn spec() -> RequestSpec {
        RequestSpec::parse("aom", "a lighthouse --seed 3").unwrap()
    }

    #[test]
    fn submit_request_targets_model_path() {
        let api = JobApi::new("https://backend.test/");
        let req = api.submit_request(&spec()).unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.url, "https://backend.test/job/submit/aom");
        let body = req.body.unwrap();
        assert_eq!(body["prompt"], "a lighthouse");
        assert_eq!(body["seed"], 3);
        assert_eq!(body["cfg_scale"], 10);
    }

    #[test]
    fn status_and_result_urls_include_job_id() {
        let api = JobApi::new("http://localhost:8080");
        let job = Job::new("j-1", Model::Nemu);
        assert_eq!(
            api.status_request(&job).url,
            "http://localhost:8080/job/status/nemu/j-1"
        );
        assert_eq!(
            api.result_request(&job).url,
            "http://localhost:8080/job/result/nemu/j-1"
        );
        assert!(api.status_request(&job).body.is_none());
    }

    #[test]
    fn submit_classification() {
        assert_eq!(
            parse_submit_response(&BackendResponse::new(201, " abc123\n")).unwrap(),
            "abc123"
        );
        assert!(matches!(
            parse_submit_response(&BackendResponse::new(429, "")),
            Err(ImgenError::RateLimited { stage: Stage::Submit })
        ));
        assert!(matches!(
            parse_submit_response(&BackendResponse::new(503, "")),
            Err(ImgenError::BackendSaturated)
        ));
        // 200 is not the contract's success code
        assert!(matches!(
            parse_submit_response(&BackendResponse::new(200, "abc")),
            Err(ImgenError::SubmissionFailed { status: Some(200), .. })
        ));
    }

    #[test]
    fn submit_rejects_path_breaking_job_ids() {
        for bad in ["", "../admin", "a/b", "a b", "..", "id?x=1"] {
            assert!(
                parse_submit_response(&BackendResponse::new(201, bad)).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn status_classification() {
        let ok = |body: &str| parse_status_response("j", &BackendResponse::new(200, body));
        assert_eq!(ok("completed").unwrap(), PollStatus::Completed);
        assert_eq!(ok("failed\n").unwrap(), PollStatus::Failed);
        assert_eq!(ok("queued").unwrap(), PollStatus::Pending("queued".to_string()));
        assert_eq!(ok("").unwrap(), PollStatus::Pending(String::new()));

        assert!(matches!(
            parse_status_response("j", &BackendResponse::new(429, "")),
            Err(ImgenError::RateLimited { stage: Stage::Poll })
        ));
        assert!(matches!(
            parse_status_response("j", &BackendResponse::new(404, "")),
            Err(ImgenError::PollFailed { status: Some(404), .. })
        ));
    }

    #[test]
    fn result_decodes_base64_and_seed() {
        let body = format!(r#"{{"seed": 99, "base64": "{}"}}"#, BASE64.encode(b"\x89PNGdata"));
        let result = parse_result_response("j", &BackendResponse::new(200, body)).unwrap();
        assert_eq!(result.seed, 99);
        assert_eq!(result.image, b"\x89PNGdata");
    }

    #[test]
    fn result_decode_failures_are_fetch_failed() {
        for body in [
            "not json",
            r#"{"seed": 1}"#,
            r#"{"seed": "x", "base64": "AAAA"}"#,
            r#"{"seed": 1, "base64": "!!!not-base64!!!"}"#,
            r#"{"seed": 1, "base64": ""}"#,
        ] {
            let err = parse_result_response("j", &BackendResponse::new(200, body)).unwrap_err();
            assert!(
                matches!(err, ImgenError::FetchFailed { .. }),
                "{body:?} should be FetchFailed, got {err:?}"
            );
        }
        assert!(matches!(
            parse_result_response("j", &BackendResponse::new(429, "")),
            Err(ImgenError::RateLimited { stage: Stage::Fetch })
        ));
        assert!(matches!(
            parse_result_response("j", &BackendResponse::new(500, "")),
            Err(ImgenError::FetchFailed { .. })
        ));
    }
}
