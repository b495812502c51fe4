//! Integration tests for the checkout-to-order reconciliation flow:
//! idempotent webhook handling, exactly-once materialization, delivery-fee
//! separation, and the ledger/order divergence contract.

mod common;

use axum::http::{Method, StatusCode};
use common::{
    checkout_request, completed_event, dec_field, expired_event, read_json, signed_headers,
    TestApp,
};
use rust_decimal_macros::dec;
use storefront_api::processor::{SessionDetails, SessionLineItemDetails};
use storefront_api::services::reconciliation::ReconciliationOutcome;

#[tokio::test]
async fn end_to_end_checkout_to_order() {
    let app = TestApp::new().await;

    // Checkout created: pending ledger row + hosted session URL
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(checkout_request()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();
    assert!(body["data"]["url"]
        .as_str()
        .unwrap()
        .contains(&session_id));

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/session/{}", session_id),
            None,
        )
        .await;
    let body = read_json(response).await;
    assert_eq!(body["data"]["payment_status"], "pending");
    assert_eq!(body["data"]["order_created"], false);
    // Two products plus the home-delivery fee
    assert_eq!(dec_field(&body["data"]["pricing"]["subtotal"]), dec!(44.48));
    assert_eq!(dec_field(&body["data"]["pricing"]["delivery_fee"]), dec!(5));
    assert_eq!(dec_field(&body["data"]["pricing"]["total"]), dec!(49.48));

    // Completed event arrives
    app.processor.mark_session_paid(&session_id, "pi_100");
    let response = app
        .deliver_webhook(&completed_event(&session_id, "pi_100", 4948))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = read_json(response).await;
    assert_eq!(ack["received"], true);

    // Ledger reflects success and the materialized order
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/payments/session/{}", session_id),
            None,
        )
        .await;
    let body = read_json(response).await;
    assert_eq!(body["data"]["payment_status"], "succeeded");
    assert_eq!(body["data"]["order_created"], true);
    assert_eq!(dec_field(&body["data"]["amount_received"]), dec!(49.48));
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    // Order snapshot: fee folded into pricing, products intact
    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let order = &body["data"];
    assert_eq!(order["session_id"], session_id.as_str());
    assert_eq!(order["order_status"], "confirmed");
    assert_eq!(order["payment_status"], "paid");
    assert_eq!(order["products"].as_array().unwrap().len(), 2);
    assert_eq!(dec_field(&order["products"][0]["price"]), dec!(19.99));
    assert_eq!(dec_field(&order["pricing"]["delivery_fee"]), dec!(5));
    assert_eq!(dec_field(&order["pricing"]["subtotal"]), dec!(44.48));
    assert_eq!(dec_field(&order["pricing"]["total"]), dec!(49.48));
    assert_eq!(order["status_history"][0]["status"], "confirmed");
    assert_eq!(order["status_history"][0]["actor"], "system");

    // Customer confirmation + admin alert, exactly once
    assert_eq!(app.notifier.status_email_count(), 1);
    assert_eq!(app.notifier.admin_alert_count(), 1);
    assert_eq!(
        app.notifier.status_emails.lock().unwrap()[0],
        (session_id.clone(), 23)
    );
}

#[tokio::test]
async fn redelivered_completed_event_is_idempotent() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(checkout_request()),
        )
        .await;
    let body = read_json(response).await;
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();

    app.processor.mark_session_paid(&session_id, "pi_200");
    let event = completed_event(&session_id, "pi_200", 4948);

    let first = app.deliver_webhook(&event).await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = app.deliver_webhook(&event).await;
    assert_eq!(second.status(), StatusCode::OK);

    // Exactly one order
    let response = app.request(Method::GET, "/api/v1/orders", None).await;
    let body = read_json(response).await;
    assert_eq!(body["data"]["total"], 1);

    // And exactly one round of notifications
    assert_eq!(app.notifier.status_email_count(), 1);
    assert_eq!(app.notifier.admin_alert_count(), 1);

    // Ledger unchanged by the redelivery
    let attempt = app
        .state
        .services
        .ledger
        .find_by_session(&session_id)
        .await
        .unwrap()
        .unwrap();
    assert!(attempt.order_created);
}

#[tokio::test]
async fn concurrent_completed_deliveries_produce_one_order() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(checkout_request()),
        )
        .await;
    let body = read_json(response).await;
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();

    app.processor.mark_session_paid(&session_id, "pi_300");
    let event = completed_event(&session_id, "pi_300", 4948);
    let payload = serde_json::to_vec(&event).unwrap();
    let headers = signed_headers(&payload);

    let recon = app.state.services.reconciliation.clone();
    let (a, b) = tokio::join!(
        recon.process_event(&payload, &headers),
        recon.process_event(&payload, &headers),
    );
    a.unwrap();
    b.unwrap();

    let response = app.request(Method::GET, "/api/v1/orders", None).await;
    let body = read_json(response).await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn invalid_signature_is_rejected_without_mutation() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(checkout_request()),
        )
        .await;
    let body = read_json(response).await;
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();

    let event = completed_event(&session_id, "pi_400", 4948);
    let response = app
        .request_with_bad_signature(&event)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let attempt = app
        .state
        .services
        .ledger
        .find_by_session(&session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        attempt.payment_status,
        storefront_api::entities::payment_attempt::PaymentStatus::Pending
    );
    assert!(!attempt.order_created);
}

#[tokio::test]
async fn unrecognized_event_is_acknowledged() {
    let app = TestApp::new().await;

    let event = serde_json::json!({
        "id": "evt_misc",
        "type": "charge.dispute.created",
        "data": { "object": { "id": "dp_1" } }
    });
    let response = app.deliver_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = read_json(response).await;
    assert_eq!(ack["received"], true);
}

#[tokio::test]
async fn expired_session_records_failure_reason() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(checkout_request()),
        )
        .await;
    let body = read_json(response).await;
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();

    let response = app.deliver_webhook(&expired_event(&session_id)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let attempt = app
        .state
        .services
        .ledger
        .find_by_session(&session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        attempt.payment_status,
        storefront_api::entities::payment_attempt::PaymentStatus::Failed
    );
    assert_eq!(attempt.failure_reason.as_deref(), Some("Session expired"));
    assert_eq!(attempt.processor_status.as_deref(), Some("expired"));
}

#[tokio::test]
async fn expired_event_for_untracked_session_is_benign() {
    let app = TestApp::new().await;

    let response = app.deliver_webhook(&expired_event("cs_never_seen")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = read_json(response).await;
    assert_eq!(ack["received"], true);
}

#[tokio::test]
async fn materializer_failure_leaves_inspectable_divergence() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(checkout_request()),
        )
        .await;
    let body = read_json(response).await;
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();

    // Corrupt the session's address metadata so materialization fails
    let mut session = app.processor.session(&session_id).unwrap();
    session.payment_status = "paid".to_string();
    session.payment_intent_id = Some("pi_500".to_string());
    session
        .metadata
        .insert("delivery_address".to_string(), "{not json".to_string());
    app.processor.register_session(session);

    let event = completed_event(&session_id, "pi_500", 4948);
    let payload = serde_json::to_vec(&event).unwrap();
    let outcome = app
        .state
        .services
        .reconciliation
        .process_event(&payload, &signed_headers(&payload))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ReconciliationOutcome::RequiresManualReview { .. }
    ));

    // Payment truth is preserved; the missing order is visible for manual
    // reconciliation.
    let attempt = app
        .state
        .services
        .ledger
        .find_by_session(&session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        attempt.payment_status,
        storefront_api::entities::payment_attempt::PaymentStatus::Succeeded
    );
    assert!(!attempt.order_created);

    let response = app.request(Method::GET, "/api/v1/orders", None).await;
    let body = read_json(response).await;
    assert_eq!(body["data"]["total"], 0);

    assert_eq!(app.notifier.status_email_count(), 0);
}

#[tokio::test]
async fn unretrievable_session_is_flagged_for_manual_review() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(checkout_request()),
        )
        .await;
    let body = read_json(response).await;
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();

    app.processor.forget_session(&session_id);

    let event = completed_event(&session_id, "pi_600", 4948);
    let payload = serde_json::to_vec(&event).unwrap();
    let outcome = app
        .state
        .services
        .reconciliation
        .process_event(&payload, &signed_headers(&payload))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ReconciliationOutcome::RequiresManualReview { .. }
    ));

    let attempt = app
        .state
        .services
        .ledger
        .find_by_session(&session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        attempt.payment_status,
        storefront_api::entities::payment_attempt::PaymentStatus::Succeeded
    );
    assert!(!attempt.order_created);
}

#[tokio::test]
async fn completed_event_for_untracked_session_still_materializes() {
    let app = TestApp::new().await;

    // A session the ledger never saw, but whose metadata is complete
    let session = SessionDetails {
        id: "cs_foreign_1".to_string(),
        payment_status: "paid".to_string(),
        payment_intent_id: Some("pi_700".to_string()),
        amount_total_minor: 2499,
        currency: "eur".to_string(),
        customer_email: Some("lee@example.com".to_string()),
        metadata: [
            ("customer_name".to_string(), "Lee Chen".to_string()),
            (
                "delivery_address".to_string(),
                r#"{"line1":"2 avenue Foch","city":"Lyon","postal_code":"69006","country":"FR"}"#
                    .to_string(),
            ),
            ("delivery_method".to_string(), "point_relais".to_string()),
        ]
        .into_iter()
        .collect(),
        line_items: vec![SessionLineItemDetails {
            name: "Oat drink".to_string(),
            unit_amount_minor: 2499,
            quantity: 1,
            amount_total_minor: 2499,
            image: None,
        }],
    };
    app.processor.register_session(session);

    let response = app
        .deliver_webhook(&completed_event("cs_foreign_1", "pi_700", 2499))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app
        .state
        .services
        .orders
        .find_by_session("cs_foreign_1")
        .await
        .unwrap()
        .expect("order should exist");
    assert_eq!(order.total, dec!(24.99));
    assert_eq!(order.delivery_fee, dec!(0));
}

#[tokio::test]
async fn intent_failure_stamps_reason_from_processor() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/sessions",
            Some(checkout_request()),
        )
        .await;
    let body = read_json(response).await;
    let session_id = body["data"]["session_id"].as_str().unwrap().to_string();

    // Stamp the intent while the attempt is still in flight
    app.state
        .services
        .ledger
        .update_status(
            &session_id,
            storefront_api::entities::payment_attempt::PaymentStatus::Processing,
            storefront_api::services::ledger::StatusUpdate {
                payment_intent_id: Some("pi_800".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let event = serde_json::json!({
        "id": "evt_fail",
        "type": "payment_intent.payment_failed",
        "data": {
            "object": {
                "id": "pi_800",
                "status": "requires_payment_method",
                "last_payment_error": { "message": "Your card was declined." }
            }
        }
    });
    let response = app.deliver_webhook(&event).await;
    assert_eq!(response.status(), StatusCode::OK);

    let attempt = app
        .state
        .services
        .ledger
        .find_by_session(&session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        attempt.failure_reason.as_deref(),
        Some("Your card was declined.")
    );
}
