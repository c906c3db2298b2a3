use actix_web::{web, HttpResponse, Scope};
use compliance_core::error::CoreError;

pub mod findings;
pub mod policies;
pub mod queues;

pub fn create_api_router() -> Scope {
    web::scope("/api")
        .service(findings_routes())
        .service(queues_routes())
        .service(policies_routes())
}

fn findings_routes() -> Scope {
    web::scope("/findings")
        .configure(findings::configure_findings_routes)
}

fn queues_routes() -> Scope {
    web::scope("/queues")
        .configure(queues::configure_queues_routes)
}

fn policies_routes() -> Scope {
    web::scope("/policies")
        .configure(policies::configure_policies_routes)
}

/// 核心错误到 HTTP 响应：校验 400，未找到 404，其余 500
pub(crate) fn error_response(err: &CoreError) -> HttpResponse {
    match err {
        CoreError::Validation(msg) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": msg
        })),
        CoreError::NotFound(msg) => HttpResponse::NotFound().json(serde_json::json!({
            "error": msg
        })),
        other => {
            tracing::error!("Request failed: {}", other);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": other.to_string()
            }))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use compliance_core::channels::{CallLog, MockChat, MockCodeHost, MockTracker};
    use compliance_core::{Channels, ComplianceService, ControlEntry};
    use std::sync::Arc;

    use crate::state::AppState;

    pub struct TestState {
        pub _dir: tempfile::TempDir,
        pub state: AppState,
        pub log: CallLog,
    }

    /// 临时数据库 + 模拟通道 + 两条控制项
    pub async fn test_state() -> TestState {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("web.db").display());
        let pool = compliance_core::connect(&url).await.unwrap();

        let log = CallLog::new();
        let channels = Channels::none()
            .with_tickets(Arc::new(MockTracker::new(log.clone())))
            .with_code_host(Arc::new(MockCodeHost::new(log.clone())))
            .with_chat(Arc::new(MockChat::new(log.clone())));
        let service = ComplianceService::new(pool, channels);
        service
            .ledger()
            .load_catalog(&[
                ControlEntry::new("CC-1", "SOC2", "Logical access"),
                ControlEntry::new("CC-2", "SOC2", "Change management"),
            ])
            .await
            .unwrap();

        TestState {
            _dir: dir,
            state: AppState::from_service(service),
            log,
        }
    }
}
