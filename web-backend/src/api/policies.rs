use actix_web::{web, HttpResponse, Responder};

use super::error_response;
use crate::state::AppState;

pub fn configure_policies_routes(cfg: &mut web::ServiceConfig) {
    cfg
        .route("", web::get().to(list_policies))
        .route("/stats", web::get().to(policy_stats))
        .route("/{control_id}", web::get().to(get_policy));
}

pub async fn list_policies(state: web::Data<AppState>) -> impl Responder {
    match state.service.ledger().list().await {
        Ok(controls) => HttpResponse::Ok().json(controls),
        Err(e) => error_response(&e),
    }
}

/// 合规得分 = 通过数 / 总数
pub async fn policy_stats(state: web::Data<AppState>) -> impl Responder {
    match state.service.ledger().stats().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => error_response(&e),
    }
}

pub async fn get_policy(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match state.service.ledger().get(&path.into_inner()).await {
        Ok(control) => HttpResponse::Ok().json(control),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_api_router;
    use crate::api::testing::test_state;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn stats_follow_open_findings() {
        let ctx = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ctx.state.clone()))
                .service(create_api_router()),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/policies/stats").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["passing"], 2);
        assert_eq!(body["compliance_score"], 100.0);

        let req = test::TestRequest::post()
            .uri("/api/findings")
            .set_json(json!({
                "summary": "Unreviewed deploy",
                "risk_level": "medium",
                "control_id": "CC-2"
            }))
            .to_request();
        let _: Value = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::get().uri("/api/policies/stats").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["failing"], 1);
        assert_eq!(body["compliance_score"], 50.0);

        let req = test::TestRequest::get().uri("/api/policies").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["control_id"], "CC-1");
        assert_eq!(body[0]["status"], "passing");
        assert_eq!(body[1]["status"], "failing");
    }

    #[actix_web::test]
    async fn unknown_control_is_not_found() {
        let ctx = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ctx.state.clone()))
                .service(create_api_router()),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/policies/NOPE-9").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
