//! Route handlers.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::JobType;
use crate::ingest::{
    parse_meeting_title, parse_webhook_headers, title::guess_company_domain, verify_signature,
};

use super::{ApiError, AppState};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Bearer auth against the pipeline API key.
fn authenticate_pipeline(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let key = state
        .pipeline_api_key
        .as_deref()
        .ok_or_else(|| ApiError::Config("PIPELINE_API_KEY not configured".into()))?;

    let token = header(headers, "authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or_default();

    if token != key {
        return Err(ApiError::Unauthorized("Unauthorized".into()));
    }
    Ok(())
}

/// POST /webhooks/recorder — signed provider deliveries.
///
/// The body arrives as raw bytes and is verified before any parsing;
/// it is stored as JSON when parseable, else as raw text.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let webhook_headers = parse_webhook_headers(
        header(&headers, "webhook-id"),
        header(&headers, "webhook-timestamp"),
        header(&headers, "webhook-signature"),
    )
    .ok_or_else(|| ApiError::Unauthorized("Missing webhook headers".into()))?;

    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::Config("Webhook secret not configured".into()))?;

    if !verify_signature(secret, &webhook_headers, &body, Utc::now()) {
        return Err(ApiError::Unauthorized("Invalid signature".into()));
    }

    let raw_body: Value = serde_json::from_str(&body).unwrap_or(Value::String(body));
    let raw_headers = json!({
        "webhook-id": &webhook_headers.id,
        "webhook-timestamp": &webhook_headers.timestamp,
        "webhook-signature": &webhook_headers.signature,
    });

    let event = state
        .events
        .admit(&webhook_headers.id, true, &raw_headers, &raw_body)?;
    state.queue.enqueue(
        JobType::ProcessMeeting,
        &json!({"webhook_event_id": event.id}),
    )?;

    Ok(Json(json!({"ok": true, "event_id": event.id})))
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub recording_id: Option<u64>,
    pub callback_url: Option<String>,
}

/// POST /api/pipeline/process — fetch a meeting by recording id and
/// enqueue processing, with an optional completion callback.
pub async fn pipeline_process(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<Value>, ApiError> {
    authenticate_pipeline(&state, &headers)?;

    let recording_id = request
        .recording_id
        .ok_or_else(|| ApiError::BadRequest("Missing recording_id".into()))?;

    let recorder = state
        .recorder
        .as_ref()
        .ok_or_else(|| ApiError::Config("RECORDER_API_KEY not configured".into()))?;

    let meeting = recorder
        .find_by_recording_id(recording_id)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?
        .ok_or_else(|| {
            ApiError::NotFound("Meeting not found for the given recording_id".into())
        })?;

    let external_event_id = format!("pipeline_{recording_id}");
    let event = state.events.admit(
        &external_event_id,
        true,
        &json!({"source": "pipeline"}),
        &meeting,
    )?;

    let mut payload = json!({"webhook_event_id": event.id});
    if let Some(callback_url) = &request.callback_url {
        payload["callback_url"] = json!(callback_url);
    }
    state.queue.enqueue(JobType::ProcessMeeting, &payload)?;

    Ok(Json(json!({
        "ok": true,
        "event_id": event.id,
        "title": meeting.get("title").cloned().unwrap_or(Value::Null),
    })))
}

/// POST /api/pipeline/extract-info — pure title/roster probe, no
/// persistence.
pub async fn extract_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    authenticate_pipeline(&state, &headers)?;

    let title = body.get("title").and_then(|v| v.as_str()).unwrap_or("");
    let recording_id = body.get("recording_id").cloned();
    if title.is_empty() || recording_id.as_ref().map_or(true, |v| v.is_null()) {
        return Err(ApiError::BadRequest(
            "Payload must include title and recording_id".into(),
        ));
    }

    let company_name = parse_meeting_title(title, state.directory.company());
    let company_domain_guess = company_name.as_deref().map(guess_company_domain);

    let invitees: Vec<Value> = body
        .get("calendar_invitees")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut all_names: Vec<String> = invitees
        .iter()
        .filter_map(|inv| inv.get("name").and_then(|n| n.as_str()).map(String::from))
        .collect();
    if let Some(recorder_name) = body
        .pointer("/recorded_by/name")
        .and_then(|v| v.as_str())
    {
        if !all_names.iter().any(|n| n == recorder_name) {
            all_names.push(recorder_name.to_string());
        }
    }
    let ae_name = state
        .directory
        .find_team_member(all_names.iter().map(String::as_str));

    let participants: Vec<Value> = invitees
        .iter()
        .map(|inv| {
            json!({
                "name": inv.get("name").and_then(|v| v.as_str()).unwrap_or("Unknown"),
                "email": inv.get("email").cloned().unwrap_or(Value::Null),
                "is_external": inv.get("is_external").and_then(|v| v.as_bool()).unwrap_or(false),
            })
        })
        .collect();

    Ok(Json(json!({
        "company_name": company_name,
        "company_domain_guess": company_domain_guess,
        "ae_name": ae_name,
        "recording_id": recording_id,
        "meeting_title": title,
        "participants": participants,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub url: Option<String>,
}

/// POST /api/admin/import-meeting — manual import by meeting URL.
pub async fn import_meeting(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<Value>, ApiError> {
    let url = request
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing url".into()))?;

    let recorder = state
        .recorder
        .as_ref()
        .ok_or_else(|| ApiError::Config("RECORDER_API_KEY not configured".into()))?;

    let meeting = recorder
        .find_by_url(&url)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?
        .ok_or_else(|| {
            ApiError::NotFound(
                "Meeting not found in the recorder account. Check the link and try again.".into(),
            )
        })?;

    let recording_id = meeting
        .get("recording_id")
        .map(|v| v.to_string())
        .unwrap_or_default();
    let external_event_id = format!("manual_import_{recording_id}");

    let event = state.events.admit(
        &external_event_id,
        true,
        &json!({"source": "manual_import"}),
        &meeting,
    )?;
    state.queue.enqueue(
        JobType::ProcessMeeting,
        &json!({"webhook_event_id": event.id}),
    )?;

    Ok(Json(json!({
        "ok": true,
        "title": meeting.get("title").cloned().unwrap_or(Value::Null),
        "event_id": event.id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReprocessRequest {
    pub call_id: Option<Uuid>,
}

/// POST /api/admin/reprocess — enqueue a reprocess for a known call.
pub async fn reprocess(
    State(state): State<AppState>,
    Json(request): Json<ReprocessRequest>,
) -> Result<Json<Value>, ApiError> {
    let call_id = request
        .call_id
        .ok_or_else(|| ApiError::BadRequest("Missing call_id".into()))?;

    if !state.calls.call_exists(call_id)? {
        return Err(ApiError::NotFound("Call not found".into()));
    }

    let job = state
        .queue
        .enqueue(JobType::ReprocessCall, &json!({"call_id": call_id}))?;

    Ok(Json(json!({"ok": true, "job_id": job.id})))
}

#[derive(Debug, Default, Deserialize)]
pub struct GeoTriggerRequest {
    pub crm_pipeline_id: Option<String>,
    pub crm_stage_id: Option<String>,
    #[serde(default)]
    pub backfill: bool,
}

/// POST /api/geo/trigger — enqueue a phrase-extraction pass.
pub async fn geo_trigger(
    State(state): State<AppState>,
    body: Option<Json<GeoTriggerRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let pipeline_id = request
        .crm_pipeline_id
        .or_else(|| state.crm_pipeline_id.clone())
        .ok_or_else(|| {
            ApiError::BadRequest("Missing crm_pipeline_id / crm_stage_id (set in body or config)".into())
        })?;
    let stage_id = request
        .crm_stage_id
        .or_else(|| state.crm_stage_id.clone())
        .ok_or_else(|| {
            ApiError::BadRequest("Missing crm_pipeline_id / crm_stage_id (set in body or config)".into())
        })?;

    let job = state.queue.enqueue(
        JobType::ExtractPhrases,
        &json!({
            "crm_pipeline_id": pipeline_id,
            "crm_stage_id": stage_id,
            "backfill": request.backfill,
        }),
    )?;

    Ok(Json(json!({
        "ok": true,
        "job_id": job.id,
        "type": if request.backfill { "backfill" } else { "daily_extraction" },
    })))
}

/// POST /api/geo/weekly — enqueue the weekly aggregation.
pub async fn geo_weekly(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let job = state
        .queue
        .enqueue(JobType::RunWeeklyAnalysis, &json!({}))?;
    Ok(Json(json!({"ok": true, "job_id": job.id})))
}

/// GET /api/geo/runs — recent analysis runs.
pub async fn geo_runs(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let runs = state.analysis.list_runs(50)?;
    let rows: Vec<Value> = runs
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "type": r.run_type.as_str(),
                "status": r.status.as_str(),
                "started_at": r.started_at,
                "finished_at": r.finished_at,
                "calls_processed": r.calls_processed,
                "error": r.error,
            })
        })
        .collect();
    Ok(Json(json!({"runs": rows})))
}

#[derive(Debug, Deserialize)]
pub struct GeoResultsQuery {
    pub run_id: Option<Uuid>,
}

/// GET /api/geo/results?run_id= — phrase statistics for a run
/// (defaults to the latest succeeded weekly run).
pub async fn geo_results(
    State(state): State<AppState>,
    Query(query): Query<GeoResultsQuery>,
) -> Result<Json<Value>, ApiError> {
    let run_id = match query.run_id {
        Some(id) => id,
        None => state
            .analysis
            .latest_weekly_run(Uuid::nil())?
            .map(|r| r.id)
            .ok_or_else(|| ApiError::NotFound("No completed weekly analysis run".into()))?,
    };

    let stats = state.analysis.statistics_for_run(run_id)?;
    let rows: Vec<Value> = stats
        .iter()
        .map(|s| {
            json!({
                "phrase": s.phrase,
                "category": s.category.as_str(),
                "frequency": s.frequency,
                "call_count": s.call_count,
                "cumulative_frequency": s.cumulative_frequency,
                "cumulative_call_count": s.cumulative_call_count,
                "example_contexts": s.example_contexts,
                "first_seen_at": s.first_seen_at,
                "last_seen_at": s.last_seen_at,
            })
        })
        .collect();
    Ok(Json(json!({"run_id": run_id, "results": rows})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, WorkerSettings};
    use crate::domain::JobStatus;
    use crate::ingest::TeamDirectory;
    use crate::storage::Database;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn test_config(webhook_secret: Option<String>) -> Config {
        Config {
            db_path: std::path::PathBuf::from(":memory:"),
            bind_addr: "127.0.0.1:0".into(),
            webhook_secret,
            pipeline_api_key: Some("pipeline-key".into()),
            completion_api_key: None,
            recorder_api_key: None,
            crm_api_key: None,
            enrichment_api_key: None,
            completion_base_url: String::new(),
            completion_model: "gpt-4o".into(),
            recorder_base_url: String::new(),
            crm_base_url: String::new(),
            enrichment_base_url: String::new(),
            crm_pipeline_id: Some("pipe-1".into()),
            crm_stage_id: Some("stage-0".into()),
            team: TeamDirectory::new("Console", vec!["Dana Reyes".into()]),
            worker: WorkerSettings::default(),
            config_file: None,
        }
    }

    fn state(webhook_secret: Option<String>) -> AppState {
        AppState::new(Database::in_memory().unwrap(), &test_config(webhook_secret))
    }

    fn secret_and_signature(id: &str, ts: &str, body: &str) -> (String, String) {
        let key = b"shared webhook key";
        let secret = format!("whsec_{}", BASE64.encode(key));
        let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
        mac.update(format!("{id}.{ts}.{body}").as_bytes());
        let sig = BASE64.encode(mac.finalize().into_bytes());
        (secret, format!("v1,{sig}"))
    }

    fn signed_headers(id: &str, ts: &str, signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("webhook-id", id.parse().unwrap());
        headers.insert("webhook-timestamp", ts.parse().unwrap());
        headers.insert("webhook-signature", signature.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_webhook_accepts_signed_delivery_and_enqueues() {
        let body = r#"{"title": "Console/Acme", "recording_id": 9}"#;
        let ts = Utc::now().timestamp().to_string();
        let (secret, signature) = secret_and_signature("msg_1", &ts, body);

        let state = state(Some(secret));
        let response = webhook(
            State(state.clone()),
            signed_headers("msg_1", &ts, &signature),
            body.to_string(),
        )
        .await
        .unwrap();

        assert_eq!(response.0["ok"], json!(true));

        let job = state.queue.claim("test-worker").unwrap().unwrap();
        assert_eq!(job.job_type, JobType::ProcessMeeting);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_webhook_missing_headers_is_unauthorized() {
        let state = state(Some("whsec_AAAA".into()));
        let err = webhook(State(state), HeaderMap::new(), "{}".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_webhook_without_secret_is_config_error() {
        let ts = Utc::now().timestamp().to_string();
        let state = state(None);
        let err = webhook(
            State(state),
            signed_headers("msg_1", &ts, "v1,AAAA"),
            "{}".into(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[tokio::test]
    async fn test_webhook_bad_signature_is_unauthorized() {
        let ts = Utc::now().timestamp().to_string();
        let (secret, _) = secret_and_signature("msg_1", &ts, "body");
        let state = state(Some(secret));
        let err = webhook(
            State(state.clone()),
            signed_headers("msg_1", &ts, "v1,AAAA"),
            "body".into(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        // Nothing admitted, nothing enqueued
        assert!(state.queue.claim("w").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_webhook_duplicate_delivery_admits_once() {
        let body = r#"{"title": "Console/Acme", "recording_id": 9}"#;
        let ts = Utc::now().timestamp().to_string();
        let (secret, signature) = secret_and_signature("msg_dup", &ts, body);
        let state = state(Some(secret));

        let first = webhook(
            State(state.clone()),
            signed_headers("msg_dup", &ts, &signature),
            body.to_string(),
        )
        .await
        .unwrap();
        let second = webhook(
            State(state.clone()),
            signed_headers("msg_dup", &ts, &signature),
            body.to_string(),
        )
        .await
        .unwrap();

        // Same admitted event both times
        assert_eq!(first.0["event_id"], second.0["event_id"]);
    }

    #[tokio::test]
    async fn test_extract_info_requires_auth() {
        let state = state(None);
        let err = extract_info(
            State(state),
            HeaderMap::new(),
            Json(json!({"title": "Console/Acme", "recording_id": 1})),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_extract_info_parses_title_and_roster() {
        let state = state(None);
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer pipeline-key".parse().unwrap());

        let response = extract_info(
            State(state),
            headers,
            Json(json!({
                "title": "Console/Lattice (Legal)",
                "recording_id": 7,
                "calendar_invitees": [
                    {"name": "Dana Reyes", "email": "dana@console.example", "is_external": false},
                    {"name": "Priya Shah", "email": "priya@lattice.com", "is_external": true}
                ]
            })),
        )
        .await
        .unwrap();

        assert_eq!(response.0["company_name"], json!("Lattice"));
        assert_eq!(response.0["company_domain_guess"], json!("lattice.com"));
        assert_eq!(response.0["ae_name"], json!("Dana Reyes"));
    }

    #[tokio::test]
    async fn test_reprocess_unknown_call_is_404() {
        let state = state(None);
        let err = reprocess(
            State(state),
            Json(ReprocessRequest {
                call_id: Some(Uuid::new_v4()),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_geo_trigger_uses_config_defaults() {
        let state = state(None);
        let response = geo_trigger(State(state.clone()), None).await.unwrap();
        assert_eq!(response.0["type"], json!("daily_extraction"));

        let job = state.queue.claim("w").unwrap().unwrap();
        assert_eq!(job.job_type, JobType::ExtractPhrases);
        assert_eq!(job.payload["crm_pipeline_id"], json!("pipe-1"));
    }

    #[tokio::test]
    async fn test_geo_results_without_runs_is_404() {
        let state = state(None);
        let err = geo_results(State(state), Query(GeoResultsQuery { run_id: None }))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
