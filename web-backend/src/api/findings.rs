use actix_web::{web, HttpResponse, Responder};
use compliance_core::{AnalysisReport, FindingDraft, RiskLevel};
use serde::Deserialize;

use super::error_response;
use crate::state::AppState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct TrendsQuery {
    pub risk_level: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub assignee: Option<String>,
}

pub fn configure_findings_routes(cfg: &mut web::ServiceConfig) {
    cfg
        .route("", web::post().to(submit_finding))                    // POST /api/findings
        .route("", web::get().to(recent_findings))                    // GET /api/findings?limit=
        .route("/analysis", web::post().to(submit_analysis))          // POST /api/findings/analysis
        .route("/open", web::get().to(open_findings))
        .route("/stats", web::get().to(finding_stats))
        .route("/trends", web::get().to(finding_trends))
        .route("/resolve/{ticket_ref}", web::post().to(resolve_by_ticket))
        .route("/{id}", web::get().to(get_finding))
        .route("/{id}/assignee", web::put().to(assign_finding))
        .route("/{id}/resolve", web::post().to(resolve_by_id));
}

/// 单条发现入口（代码分析与截图分析共用）
pub async fn submit_finding(
    state: web::Data<AppState>,
    req: web::Json<FindingDraft>,
) -> impl Responder {
    match state.service.submit(req.into_inner()).await {
        Ok(submission) if submission.created => HttpResponse::Created().json(submission),
        Ok(submission) => HttpResponse::Ok().json(submission),
        Err(e) => error_response(&e),
    }
}

/// 批量提交一份分析报告
pub async fn submit_analysis(
    state: web::Data<AppState>,
    req: web::Json<AnalysisReport>,
) -> impl Responder {
    let report = req.into_inner();
    tracing::info!(
        "Received analysis report: {} issue(s), risk {}",
        report.issues.len(),
        report.risk_level
    );

    match state.service.submit_report(report).await {
        Ok(submissions) => {
            let actions: Vec<&str> = submissions
                .iter()
                .map(|s| s.outcome.action_result.as_str())
                .collect();
            HttpResponse::Ok().json(serde_json::json!({
                "ok": true,
                "action": if actions.is_empty() { "none".to_string() } else { actions.join(",") },
                "submissions": submissions,
            }))
        }
        Err(e) => error_response(&e),
    }
}

pub async fn recent_findings(
    state: web::Data<AppState>,
    query: web::Query<RecentQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match state.service.query_recent(limit).await {
        Ok(findings) => HttpResponse::Ok().json(findings),
        Err(e) => error_response(&e),
    }
}

pub async fn open_findings(state: web::Data<AppState>) -> impl Responder {
    match state.service.store().list_open().await {
        Ok(findings) => HttpResponse::Ok().json(findings),
        Err(e) => error_response(&e),
    }
}

pub async fn finding_stats(state: web::Data<AppState>) -> impl Responder {
    match state.service.store().stats().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => error_response(&e),
    }
}

pub async fn finding_trends(
    state: web::Data<AppState>,
    query: web::Query<TrendsQuery>,
) -> impl Responder {
    let risk = query.risk_level.as_deref().map(RiskLevel::parse);

    match state.service.store().trends(risk).await {
        Ok(points) => HttpResponse::Ok().json(points),
        Err(e) => error_response(&e),
    }
}

pub async fn get_finding(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    match state.service.store().get(path.into_inner()).await {
        Ok(finding) => HttpResponse::Ok().json(finding),
        Err(e) => error_response(&e),
    }
}

pub async fn assign_finding(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    req: web::Json<AssignRequest>,
) -> impl Responder {
    let id = path.into_inner();

    match state.service.store().assign(id, req.assignee.as_deref()).await {
        Ok(finding) => {
            tracing::info!("Finding #{} assigned to {:?}", id, finding.assignee);
            HttpResponse::Ok().json(finding)
        }
        Err(e) => error_response(&e),
    }
}

/// 外部工单关闭时回调
pub async fn resolve_by_ticket(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    match state.service.resolve(&path.into_inner()).await {
        Ok(finding) => HttpResponse::Ok().json(finding),
        Err(e) => error_response(&e),
    }
}

pub async fn resolve_by_id(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    match state.service.resolve_by_id(path.into_inner()).await {
        Ok(finding) => HttpResponse::Ok().json(finding),
        Err(e) => error_response(&e),
    }
}
