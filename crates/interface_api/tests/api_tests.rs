//! HTTP tests over the full router and an in-memory engine

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use core_kernel::ClientId;
use interface_api::{config::ApiConfig, create_router};
use test_utils::{utc, utc_at, NumberFixtures, RateCardFixtures, TestEngine};

const JANUARY_START: &str = "2024-01-01T00:00:00Z";
const JANUARY_END: &str = "2024-02-01T00:00:00Z";

fn server(t: &TestEngine) -> TestServer {
    TestServer::new(create_router(t.engine.clone(), ApiConfig::default())).unwrap()
}

fn client_body(code: &str, credit_limit: &str) -> Value {
    json!({
        "code": code,
        "name": format!("{code} Telecom"),
        "billingAnchor": "2023-12-01",
        "paymentTermsDays": 14,
        "taxRatePercent": "8",
        "creditLimit": credit_limit,
        "rateCard": serde_json::to_value(RateCardFixtures::flat()).unwrap(),
    })
}

async fn onboard(server: &TestServer, code: &str, credit_limit: &str) -> String {
    let response = server.post("/clients").json(&client_body(code, credit_limit)).await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["id"].as_str().unwrap().to_string()
}

async fn provision(server: &TestServer, client_id: &str, number: &str) -> Value {
    let response = server
        .post("/phone-numbers/provision")
        .json(&json!({"clientId": client_id, "phoneNumber": number}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

fn call(number: &str, at: &str, external_id: Option<&str>) -> Value {
    json!({
        "phoneNumber": number,
        "usageType": "outbound_call",
        "fromNumber": number,
        "toNumber": NumberFixtures::CALLEE,
        "durationSecs": 60,
        "timestamp": at,
        "externalId": external_id,
    })
}

/// One 60-second call per event, spread over January
async fn record_january_calls(server: &TestServer, count: u32) {
    for i in 0..count {
        let at = utc_at(2024, 1, 1 + i % 28, i % 24, i % 60);
        server
            .post("/usage/records")
            .json(&call(NumberFixtures::LOCAL_SF, &at.to_rfc3339(), None))
            .await
            .assert_status(StatusCode::CREATED);
    }
}

async fn generate_january(server: &TestServer, client_id: &str) -> axum_test::TestResponse {
    server
        .post("/billing/invoices/generate")
        .json(&json!({
            "clientId": client_id,
            "billingPeriodStart": JANUARY_START,
            "billingPeriodEnd": JANUARY_END,
        }))
        .await
}

async fn balance(server: &TestServer, client_id: &str) -> String {
    let client: Value = server.get(&format!("/clients/{client_id}")).await.json();
    client["currentBalance"].as_str().unwrap().to_string()
}

/// Onboards ACME on December, provisions a local number and records a
/// hundred January calls with the clock at February 1st
async fn january_with_usage(t: &TestEngine) -> (TestServer, String) {
    let server = server(t);
    let client_id = onboard(&server, "ACME", "500").await;
    provision(&server, &client_id, NumberFixtures::LOCAL_SF).await;
    t.set_now(utc(2024, 2, 1));
    record_january_calls(&server, 100).await;
    (server, client_id)
}

// ============================================================================
// Clients
// ============================================================================

mod client_tests {
    use super::*;

    #[tokio::test]
    async fn test_onboarding_starts_at_zero_balance() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);

        let response = server.post("/clients").json(&client_body("ACME", "500")).await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["code"], "ACME");
        assert_eq!(body["currency"], "USD");
        assert_eq!(body["currentBalance"], "0.00");
        assert_eq!(body["creditLimit"], "500.00");
        assert_eq!(body["taxRatePercent"], "8");
        assert_eq!(body["status"], "active");
    }

    #[tokio::test]
    async fn test_duplicate_code_is_a_conflict() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        onboard(&server, "ACME", "500").await;

        let response = server.post("/clients").json(&client_body("ACME", "500")).await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["error"], "conflict");
    }

    #[tokio::test]
    async fn test_invalid_body_is_unprocessable() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);

        let response = server.post("/clients").json(&client_body("A", "500")).await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"], "validation_error");
        assert!(body["message"].as_str().unwrap().contains("code"));
    }

    #[tokio::test]
    async fn test_unknown_status_is_unprocessable() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "ACME", "500").await;

        server
            .post(&format!("/clients/{client_id}/status"))
            .json(&json!({"status": "closed"}))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_bad_request() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);

        let response = server
            .post("/clients")
            .bytes("{\"code\": ".into())
            .content_type("application/json")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_unknown_client_is_not_found() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);

        let response = server.get(&format!("/clients/{}", ClientId::new())).await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["error"], "not_found");
    }

    #[tokio::test]
    async fn test_suspending_a_client_is_visible() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "ACME", "500").await;

        let response = server
            .post(&format!("/clients/{client_id}/status"))
            .json(&json!({"status": "suspended"}))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "suspended");
    }
}

// ============================================================================
// Phone Numbers
// ============================================================================

mod phone_number_tests {
    use super::*;

    #[tokio::test]
    async fn test_provisioning_charges_the_first_period() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "ACME", "500").await;

        let body = provision(&server, &client_id, NumberFixtures::LOCAL_SF).await;
        assert_eq!(body["phoneNumber"]["number"], NumberFixtures::LOCAL_SF);
        assert_eq!(body["phoneNumber"]["status"], "active");
        assert_eq!(body["invoice"]["invoiceNumber"], "ACME-000001");
        assert_eq!(body["invoice"]["totalAmount"], "5.40");
        assert_eq!(balance(&server, &client_id).await, "5.40");
    }

    #[tokio::test]
    async fn test_assigned_number_cannot_be_provisioned_again() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "ACME", "500").await;
        provision(&server, &client_id, NumberFixtures::LOCAL_SF).await;

        let response = server
            .post("/phone-numbers/provision")
            .json(&json!({"clientId": client_id, "phoneNumber": NumberFixtures::LOCAL_SF}))
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_provisioning_over_the_credit_limit_is_refused() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "TINY", "1").await;

        let response = server
            .post("/phone-numbers/provision")
            .json(&json!({"clientId": client_id, "phoneNumber": NumberFixtures::LOCAL_SF}))
            .await;
        response.assert_status(StatusCode::PAYMENT_REQUIRED);
        assert_eq!(response.json::<Value>()["error"], "credit_limit_exceeded");
        assert_eq!(balance(&server, &client_id).await, "0.00");

        let numbers: Value = server
            .get("/phone-numbers")
            .add_query_param("clientId", &client_id)
            .await
            .json();
        assert!(numbers.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provisioned_number_leaves_the_search() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "ACME", "500").await;

        let listed = |body: &Value| {
            body.as_array()
                .unwrap()
                .iter()
                .any(|n| n["number"] == NumberFixtures::LOCAL_SF)
        };
        let before: Value = server
            .get("/phone-numbers/available")
            .add_query_param("areaCode", "415")
            .await
            .json();
        assert!(listed(&before));

        provision(&server, &client_id, NumberFixtures::LOCAL_SF).await;
        let after: Value = server
            .get("/phone-numbers/available")
            .add_query_param("areaCode", "415")
            .await
            .json();
        assert!(!listed(&after));
    }

    #[tokio::test]
    async fn test_short_area_code_is_unprocessable() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);

        server
            .get("/phone-numbers/available")
            .add_query_param("areaCode", "41")
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "ACME", "500").await;
        let body = provision(&server, &client_id, NumberFixtures::LOCAL_SF).await;
        let id = body["phoneNumber"]["id"].as_str().unwrap();

        let suspended: Value = server.post(&format!("/phone-numbers/{id}/suspend")).await.json();
        assert_eq!(suspended["status"], "suspended");
        let resumed: Value = server.post(&format!("/phone-numbers/{id}/resume")).await.json();
        assert_eq!(resumed["status"], "active");
    }
}

// ============================================================================
// Usage
// ============================================================================

mod usage_tests {
    use super::*;

    #[tokio::test]
    async fn test_redelivered_event_answers_ok() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "ACME", "500").await;
        provision(&server, &client_id, NumberFixtures::LOCAL_SF).await;
        t.set_now(utc(2024, 1, 20));

        let event = call(NumberFixtures::LOCAL_SF, "2024-01-10T09:30:00Z", Some("cdr-1"));
        let first = server.post("/usage/records").json(&event).await;
        first.assert_status(StatusCode::CREATED);
        let first: Value = first.json();
        assert_eq!(first["duplicate"], false);

        let again = server.post("/usage/records").json(&event).await;
        again.assert_status_ok();
        let again: Value = again.json();
        assert_eq!(again["duplicate"], true);
        assert_eq!(again["record"]["id"], first["record"]["id"]);
    }

    #[tokio::test]
    async fn test_unprovisioned_number_is_a_conflict() {
        let t = TestEngine::start(utc(2024, 1, 20));
        let server = server(&t);

        server
            .post("/usage/records")
            .json(&call(NumberFixtures::LOCAL_NY, "2024-01-10T09:30:00Z", None))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_pages_walk_the_period_with_a_cursor() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;

        let mut sizes = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut request = server
                .get(&format!("/usage/records/{client_id}"))
                .add_query_param("startDate", JANUARY_START)
                .add_query_param("endDate", JANUARY_END)
                .add_query_param("limit", 40);
            if let Some(cursor) = &after {
                request = request.add_query_param("after", cursor);
            }
            let page: Value = request.await.json();
            sizes.push(page["records"].as_array().unwrap().len());
            match page["next"].as_str() {
                Some(next) => after = Some(next.to_string()),
                None => break,
            }
        }
        assert_eq!(sizes, vec![40, 40, 20]);
    }

    #[tokio::test]
    async fn test_garbage_cursor_is_unprocessable() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "ACME", "500").await;

        server
            .get(&format!("/usage/records/{client_id}"))
            .add_query_param("startDate", JANUARY_START)
            .add_query_param("endDate", JANUARY_END)
            .add_query_param("after", "not-a-cursor")
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_stats_count_the_period() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;

        let response = server
            .get(&format!("/usage/stats/{client_id}"))
            .add_query_param("startDate", JANUARY_START)
            .add_query_param("endDate", JANUARY_END)
            .await;
        response.assert_status_ok();
        let stats: Value = response.json();
        assert_eq!(stats["recordCount"], 100);
        assert!(stats["byType"]["outbound_call"].is_object());
    }

    #[tokio::test]
    async fn test_inverted_range_is_unprocessable() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let server = server(&t);
        let client_id = onboard(&server, "ACME", "500").await;

        server
            .get(&format!("/usage/stats/{client_id}"))
            .add_query_param("startDate", JANUARY_END)
            .add_query_param("endDate", JANUARY_START)
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }
}

// ============================================================================
// Invoices and Payments
// ============================================================================

mod billing_tests {
    use super::*;

    #[tokio::test]
    async fn test_january_invoice_totals() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;

        let response = generate_january(&server, &client_id).await;
        response.assert_status(StatusCode::CREATED);
        let invoice: Value = response.json();
        assert_eq!(invoice["invoiceNumber"], "ACME-000002");
        assert_eq!(invoice["subtotal"], "7.00");
        assert_eq!(invoice["taxAmount"], "0.56");
        assert_eq!(invoice["totalAmount"], "7.56");
        assert_eq!(invoice["amountDue"], "7.56");
        assert_eq!(invoice["dueDate"], "2024-02-15");
        assert_eq!(invoice["status"], "pending");
        assert_eq!(invoice["usageSummary"]["recordCount"], 100);
        assert_eq!(balance(&server, &client_id).await, "12.96");
    }

    #[tokio::test]
    async fn test_generating_again_returns_the_existing_invoice() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;

        let first = generate_january(&server, &client_id).await;
        first.assert_status(StatusCode::CREATED);
        let second = generate_january(&server, &client_id).await;
        second.assert_status_ok();

        assert_eq!(first.json::<Value>()["id"], second.json::<Value>()["id"]);
        assert_eq!(balance(&server, &client_id).await, "12.96");
    }

    #[tokio::test]
    async fn test_usage_after_the_close_is_refused() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;
        generate_january(&server, &client_id).await;

        let response = server
            .post("/usage/records")
            .json(&call(NumberFixtures::LOCAL_SF, "2024-01-31T23:59:00Z", None))
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_invoice_listing_filters_by_client() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;
        generate_january(&server, &client_id).await;

        let page: Value = server
            .get("/billing/invoices")
            .add_query_param("clientId", &client_id)
            .await
            .json();
        assert_eq!(page["total"], 2);
        assert_eq!(page["limit"], 50);
        assert_eq!(page["invoices"].as_array().unwrap().len(), 2);

        server
            .get("/billing/invoices")
            .add_query_param("limit", 500)
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_status_filter_follows_the_due_date() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;
        generate_january(&server, &client_id).await;
        t.set_now(utc(2024, 2, 16));

        let overdue: Value = server
            .get("/billing/invoices")
            .add_query_param("clientId", &client_id)
            .add_query_param("status", "overdue")
            .await
            .json();
        assert_eq!(overdue["total"], 2);
        let numbers: Vec<&str> = overdue["invoices"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["invoiceNumber"].as_str().unwrap())
            .collect();
        assert_eq!(numbers, ["ACME-000002", "ACME-000001"]);

        let pending: Value = server
            .get("/billing/invoices")
            .add_query_param("clientId", &client_id)
            .add_query_param("status", "pending")
            .await
            .json();
        assert_eq!(pending["total"], 0);
        assert!(pending["invoices"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payment_settles_the_oldest_invoice_first() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;
        generate_january(&server, &client_id).await;

        let response = server
            .post("/billing/payments")
            .json(&json!({
                "clientId": client_id,
                "amount": "5.40",
                "method": "bank_transfer",
                "referenceNumber": "wire-001",
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let settlement: Value = response.json();

        let allocations = settlement["payment"]["allocations"].as_array().unwrap();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0]["invoiceNumber"], "ACME-000001");
        assert_eq!(allocations[0]["amount"], "5.40");
        assert_eq!(settlement["payment"]["unappliedAmount"], "0.00");
        assert_eq!(settlement["invoices"][0]["status"], "paid");
        assert_eq!(balance(&server, &client_id).await, "7.56");

        let payments: Value = server
            .get("/billing/payments")
            .add_query_param("clientId", &client_id)
            .await
            .json();
        assert_eq!(payments.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refund_reopens_the_invoice() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;
        generate_january(&server, &client_id).await;

        let settlement: Value = server
            .post("/billing/payments")
            .json(&json!({"clientId": client_id, "amount": "5.40", "method": "card"}))
            .await
            .json();
        let payment_id = settlement["payment"]["id"].as_str().unwrap();

        let response = server
            .post(&format!("/billing/payments/{payment_id}/refund"))
            .json(&json!({}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let refund: Value = response.json();
        assert_eq!(refund["payment"]["refundOf"], payment_id);
        assert_eq!(refund["invoices"][0]["status"], "pending");
        assert_eq!(balance(&server, &client_id).await, "12.96");

        let reconciliation: Value = server
            .get(&format!("/clients/{client_id}/reconcile"))
            .await
            .json();
        assert_eq!(reconciliation["consistent"], true);
        assert_eq!(reconciliation["derivedBalance"], "12.96");
    }

    #[tokio::test]
    async fn test_cancelled_invoice_leaves_the_balance() {
        let t = TestEngine::start(utc(2023, 12, 1));
        let (server, client_id) = january_with_usage(&t).await;
        let invoice: Value = generate_january(&server, &client_id).await.json();
        let id = invoice["id"].as_str().unwrap();

        let response = server.post(&format!("/billing/invoices/{id}/cancel")).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "cancelled");
        assert_eq!(balance(&server, &client_id).await, "5.40");
    }
}

// ============================================================================
// Health and Middleware
// ============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness_and_readiness() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let server = server(&t);

        let live: Value = server.get("/health").await.json();
        assert_eq!(live["status"], "healthy");

        let response = server.get("/health/ready").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "ready");
    }

    #[tokio::test]
    async fn test_every_response_carries_a_request_id() {
        let t = TestEngine::start(utc(2024, 1, 1));
        let server = server(&t);

        let generated = server.get("/health").await.header("x-request-id");
        assert!(!generated.is_empty());

        let supplied = server
            .get("/health")
            .add_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("req-123"),
            )
            .await
            .header("x-request-id");
        assert_eq!(supplied, "req-123");
    }
}
