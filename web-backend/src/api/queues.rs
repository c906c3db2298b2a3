use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use super::error_response;
use crate::state::AppState;

const DEFAULT_QUEUE_LIMIT: u32 = 5;
const MAX_QUEUE_LIMIT: u32 = 100;

#[derive(Deserialize)]
pub struct QueueQuery {
    pub limit: Option<u32>,
}

impl QueueQuery {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_QUEUE_LIMIT).clamp(1, MAX_QUEUE_LIMIT)
    }
}

pub fn configure_queues_routes(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/triage", web::get().to(triage_queue))
        .route("/assigned/{assignee}", web::get().to(assigned_queue));
}

/// 未分派的待处理发现，按风险从高到低
pub async fn triage_queue(
    state: web::Data<AppState>,
    query: web::Query<QueueQuery>,
) -> impl Responder {
    match state.service.store().triage_queue(query.limit()).await {
        Ok(findings) => HttpResponse::Ok().json(findings),
        Err(e) => error_response(&e),
    }
}

pub async fn assigned_queue(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<QueueQuery>,
) -> impl Responder {
    let assignee = path.into_inner();

    match state.service.store().assigned_queue(&assignee, query.limit()).await {
        Ok(findings) => HttpResponse::Ok().json(findings),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_api_router;
    use crate::api::testing::test_state;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn triage_orders_by_risk_and_drops_assigned() {
        let ctx = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ctx.state.clone()))
                .service(create_api_router()),
        )
        .await;

        for (summary, risk) in [("Missing MFA", "low"), ("SQL injection", "high"), ("Open bucket", "medium")] {
            let req = test::TestRequest::post()
                .uri("/api/findings")
                .set_json(json!({ "summary": summary, "risk_level": risk }))
                .to_request();
            let _: Value = test::call_and_read_body_json(&app, req).await;
        }

        let req = test::TestRequest::get().uri("/api/queues/triage").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let summaries: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["summary"].as_str().unwrap())
            .collect();
        assert_eq!(summaries, vec!["SQL injection", "Open bucket", "Missing MFA"]);

        let id = body[0]["id"].as_i64().unwrap();
        let req = test::TestRequest::put()
            .uri(&format!("/api/findings/{}/assignee", id))
            .set_json(json!({ "assignee": "alice" }))
            .to_request();
        let _: Value = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::get().uri("/api/queues/triage?limit=1").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["summary"], "Open bucket");

        let req = test::TestRequest::get().uri("/api/queues/assigned/alice").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["summary"], "SQL injection");

        let req = test::TestRequest::get().uri("/api/queues/assigned/bob").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert!(body.as_array().unwrap().is_empty());
    }
}
