//! Application router configuration.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde_json::json;

use crate::{
    AppState,
    bank_link::{
        get_bank_links_endpoint, initiate_consent_endpoint, reconcile_link_endpoint,
        revoke_link_endpoint, start_fetch_endpoint,
    },
    category::{
        create_category_override_endpoint, delete_category_override_endpoint,
        get_category_overrides_endpoint, recategorize_endpoint,
    },
    endpoints,
    transaction::{get_transactions_endpoint, set_transaction_category_endpoint},
    webhook::webhook_endpoint,
};

/// Return a router with all the app's routes.
///
/// Requests are not authenticated here, the service is expected to sit behind the backend that
/// owns user sessions. The webhook route authenticates each event by its signature.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::AA_WEBHOOK, post(webhook_endpoint))
        .route(endpoints::CONSENTS, post(initiate_consent_endpoint))
        .route(endpoints::REVOKE_BANK_LINK, post(revoke_link_endpoint))
        .route(endpoints::RECONCILE_BANK_LINK, post(reconcile_link_endpoint))
        .route(endpoints::FETCH_BANK_LINK, post(start_fetch_endpoint))
        .route(endpoints::USER_BANK_LINKS, get(get_bank_links_endpoint))
        .route(endpoints::USER_TRANSACTIONS, get(get_transactions_endpoint))
        .route(
            endpoints::TRANSACTION_CATEGORY,
            put(set_transaction_category_endpoint),
        )
        .route(
            endpoints::CATEGORY_OVERRIDES,
            get(get_category_overrides_endpoint).post(create_category_override_endpoint),
        )
        .route(
            endpoints::CATEGORY_OVERRIDE,
            delete(delete_category_override_endpoint),
        )
        .route(endpoints::RECATEGORIZE, post(recategorize_endpoint))
        .fallback(get_404_not_found)
        .with_state(state)
}

async fn get_404_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "the requested resource could not be found" })),
    )
        .into_response()
}

#[cfg(test)]
mod routing_tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{Value, json, value::to_raw_value};

    use crate::{
        db::lock_connection,
        endpoints::{self, format_endpoint},
        fetch::spawn_fetch_worker,
        provider::RawTransaction,
        session::SessionStatus,
        test_utils::{TEST_WEBHOOK_SECRET, consent_request, raw_record, test_app_state},
        transaction::count_transactions,
        webhook::{WebhookEvent, sign_event},
    };

    use super::build_router;

    fn signed_event(
        event_type: &str,
        consent_id: &str,
        session_id: Option<&str>,
        status: &str,
    ) -> WebhookEvent {
        let mut event = WebhookEvent::new(
            event_type,
            consent_id,
            session_id,
            status,
            "2025-01-12T10:00:00Z",
            to_raw_value(&json!({ "source": "aggregator" })).unwrap(),
        );
        event.signature = sign_event(TEST_WEBHOOK_SECRET, &event).unwrap();
        event
    }

    fn records() -> Vec<RawTransaction> {
        vec![
            raw_record("T1", Some("2025-01-10T09:00:00Z"), "DEBIT", "120.00", "Starbucks"),
            raw_record("T2", None, "DEBIT", "45.00", "Uber"),
            raw_record("T3", Some("2025-01-11T18:30:00Z"), "CREDIT", "5000.00", "Salary"),
        ]
    }

    #[tokio::test]
    async fn unknown_route_is_json_not_found() {
        let (state, _mock, _receiver) = test_app_state();
        let server = TestServer::try_new(build_router(state)).expect("Could not create test server.");

        let response = server.get("/nowhere").await;

        response.assert_status_not_found();
        assert!(response.json::<Value>()["error"].is_string());
    }

    #[tokio::test]
    async fn consent_to_ingested_transactions() {
        let (state, mock, receiver) = test_app_state();
        let worker = spawn_fetch_worker(state.pipeline(), receiver);
        let server =
            TestServer::try_new(build_router(state.clone())).expect("Could not create test server.");

        // Consent initiated for the user, then activated by webhook.
        let response = server
            .post(endpoints::CONSENTS)
            .json(&consent_request(7))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body = response.json::<Value>();
        let link_id = body["bank_link"]["id"].as_i64().unwrap();
        let consent_id = body["consent"]["consent_id"].as_str().unwrap().to_owned();
        mock.set_consent_status(&consent_id, crate::bank_link::LinkStatus::Active);

        let response = server
            .post(endpoints::AA_WEBHOOK)
            .json(&signed_event("CONSENT_STATUS_UPDATE", &consent_id, None, "ACTIVE"))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "applied");

        let links = server
            .get(&format_endpoint(endpoints::USER_BANK_LINKS, 7))
            .await
            .json::<Value>();
        assert_eq!(links[0]["status"], "ACTIVE");

        // A fetch opens a session, the aggregator reports its data as ready.
        mock.script_records(&consent_id, records());
        let response = server
            .post(&format_endpoint(endpoints::FETCH_BANK_LINK, link_id))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        let session_id = response.json::<Value>()["aa_session_id"]
            .as_str()
            .unwrap()
            .to_owned();
        mock.set_session_status(&session_id, SessionStatus::Ready);

        let response = server
            .post(endpoints::AA_WEBHOOK)
            .json(&signed_event(
                "DATA_READY",
                &consent_id,
                Some(&session_id),
                "READY",
            ))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "queued");

        // The worker ingests in the background, the malformed record is skipped.
        let mut stored = 0;
        for _ in 0..100 {
            stored = {
                let connection = lock_connection(&state.db_connection).unwrap();
                count_transactions(&connection).unwrap()
            };
            if stored == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored, 2);

        let transactions = server
            .get(&format_endpoint(endpoints::USER_TRANSACTIONS, 7))
            .await
            .json::<Value>();
        assert_eq!(transactions.as_array().unwrap().len(), 2);

        // A forged event is rejected and changes nothing.
        let mut forged = signed_event("CONSENT_STATUS_UPDATE", &consent_id, None, "REVOKED");
        forged.signature = sign_event("not-the-secret", &forged).unwrap();
        server
            .post(endpoints::AA_WEBHOOK)
            .json(&forged)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        let links = server
            .get(&format_endpoint(endpoints::USER_BANK_LINKS, 7))
            .await
            .json::<Value>();
        assert_eq!(links[0]["status"], "ACTIVE");

        // Malformed input and unknown event types.
        server
            .post(endpoints::AA_WEBHOOK)
            .text("not json")
            .await
            .assert_status_bad_request();
        let response = server
            .post(endpoints::AA_WEBHOOK)
            .json(&signed_event("STATEMENT_GENERATED", &consent_id, None, "OK"))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "ignored");

        worker.abort();
    }

    #[tokio::test]
    async fn category_override_and_recategorize() {
        let (state, _mock, _receiver) = test_app_state();
        let server = TestServer::try_new(build_router(state)).expect("Could not create test server.");
        let categories = format_endpoint(endpoints::CATEGORY_OVERRIDES, 7);

        server
            .post(&categories)
            .json(&json!({ "matcher": "/^uber/", "category": "Transport" }))
            .await
            .assert_status(StatusCode::CREATED);
        server
            .post(&categories)
            .json(&json!({ "matcher": "/(/", "category": "Broken" }))
            .await
            .assert_status_bad_request();

        let overrides = server.get(&categories).await.json::<Value>();
        assert_eq!(overrides.as_array().unwrap().len(), 1);

        let response = server
            .post(&format_endpoint(endpoints::RECATEGORIZE, 7))
            .json(&json!({ "mode": "all" }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["transactions_processed"], 0);

        let override_id = overrides[0]["id"].as_i64().unwrap();
        server
            .delete(&format_endpoint(
                &format_endpoint(endpoints::CATEGORY_OVERRIDE, 7),
                override_id,
            ))
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }
}
