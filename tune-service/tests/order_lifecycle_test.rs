mod common;

use common::{TestApp, TEST_ADMIN_SECRET};
use tune_service::models::TuneOrder;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const CLI_DUMP: &str = "set p_roll = 40\nset i_roll = 80\nset d_roll = 30";
const CLI_COMMANDS: &str = "set p_roll = 45\nset i_roll = 80\nset new_param = 1\nsave";

async fn trigger_process(app: &TestApp, order_number: &str, force: bool) -> reqwest::Response {
    app.client
        .post(format!("{}/orders/{}/process", app.address, order_number))
        .header("X-Admin-Secret", TEST_ADMIN_SECRET)
        .json(&serde_json::json!({ "force": force }))
        .send()
        .await
        .expect("Failed to execute process trigger")
}

#[tokio::test]
async fn checkout_without_promo_waits_in_pending() {
    let app = TestApp::spawn().await;

    let body = app.checkout(None, None, 201).await;
    assert_eq!(body["status"], "pending");
    let checkout_ref = body["checkout"]["checkout_ref"]
        .as_str()
        .expect("No checkout reference in response");
    assert!(checkout_ref.starts_with("chk_"));
    assert_eq!(body["checkout"]["amount_minor"], 1999);
    assert_eq!(body["checkout"]["currency"], "EUR");

    let order_number = body["order_number"].as_str().expect("No order number");
    assert!(order_number.starts_with("TUNE-"));

    let order: serde_json::Value = app
        .get_order(order_number)
        .await
        .json()
        .await
        .expect("Order response was not JSON");
    assert_eq!(order["status"], "pending");
    assert!(order["paid_at"].is_null());

    app.cleanup().await;
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app.get_order("TUNE-20260101-XXXXXX").await;
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.expect("Body was not JSON");
    assert_eq!(body["code"], "order_not_found");

    app.cleanup().await;
}

#[tokio::test]
async fn payment_webhook_drives_order_to_completion() {
    let app = TestApp::spawn().await;
    app.stub_decoder(120.0, 2000.0, 1).await;
    app.stub_analysis(CLI_COMMANDS).await;

    let body = app.checkout(None, Some(CLI_DUMP), 201).await;
    let order_number = body["order_number"].as_str().expect("No order number").to_string();
    let checkout_ref = body["checkout"]["checkout_ref"]
        .as_str()
        .expect("No checkout reference")
        .to_string();

    let response = app.send_payment_webhook(&checkout_ref).await;
    assert_eq!(response.status().as_u16(), 200);

    let order = app.wait_for_status(&order_number, &["completed", "failed"]).await;
    assert_eq!(order["status"], "completed");
    assert!(order["paid_at"].is_string());
    assert!(order["completed_at"].is_string());
    assert_eq!(order["analysis_result"]["pid"]["roll"]["p"], 45.0);
    assert_eq!(order["cli_commands"], CLI_COMMANDS);

    // The facade computes the config diff from the stored dump and commands.
    let diff = &order["config_diff"];
    let entries = diff["entries"].as_array().expect("No diff entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["key"], "new_param");
    assert_eq!(entries[0]["status"], "added");
    assert_eq!(entries[0]["after"], "1");
    assert_eq!(entries[1]["key"], "p_roll");
    assert_eq!(entries[1]["status"], "changed");
    assert_eq!(entries[1]["before"], "40");
    assert_eq!(entries[1]["after"], "45");
    assert_eq!(diff["summary"]["changed"], 1);
    assert_eq!(diff["summary"]["added"], 1);
    assert_eq!(diff["summary"]["unchanged"], 1);

    app.cleanup().await;
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let app = TestApp::spawn().await;

    let body = serde_json::json!({
        "event": "payment.captured",
        "checkout_ref": "chk_whatever"
    })
    .to_string();

    let response = app
        .client
        .post(format!("{}/webhooks/payment", app.address))
        .header("X-Payment-Signature", "deadbeef")
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .expect("Failed to deliver webhook");

    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = response.json().await.expect("Body was not JSON");
    assert_eq!(body["code"], "invalid_signature");

    app.cleanup().await;
}

#[tokio::test]
async fn webhook_replay_processes_only_once() {
    let app = TestApp::spawn().await;
    app.stub_decoder(120.0, 2000.0, 1).await;

    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(TestApp::analysis_body(CLI_COMMANDS)),
        )
        .expect(1)
        .mount(&app.analysis)
        .await;

    let body = app.checkout(None, None, 201).await;
    let order_number = body["order_number"].as_str().expect("No order number").to_string();
    let checkout_ref = body["checkout"]["checkout_ref"]
        .as_str()
        .expect("No checkout reference")
        .to_string();

    assert_eq!(app.send_payment_webhook(&checkout_ref).await.status().as_u16(), 200);
    app.wait_for_status(&order_number, &["completed"]).await;

    // A replayed delivery is acknowledged but must not re-run anything.
    assert_eq!(app.send_payment_webhook(&checkout_ref).await.status().as_u16(), 200);
    tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;

    let order: serde_json::Value = app
        .get_order(&order_number)
        .await
        .json()
        .await
        .expect("Order response was not JSON");
    assert_eq!(order["status"], "completed");

    // Dropping the mock server verifies the expect(1) on the analysis stub.
    app.cleanup().await;
}

#[tokio::test]
async fn unknown_checkout_ref_is_acknowledged() {
    let app = TestApp::spawn().await;

    let response = app.send_payment_webhook("chk_never_issued").await;
    assert_eq!(response.status().as_u16(), 200);

    app.cleanup().await;
}

#[tokio::test]
async fn analysis_failure_marks_order_failed() {
    let app = TestApp::spawn().await;
    app.stub_decoder(120.0, 2000.0, 1).await;

    // First analysis call fails; a later (forced) run succeeds.
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
        .up_to_n_times(1)
        .mount(&app.analysis)
        .await;
    app.stub_analysis(CLI_COMMANDS).await;

    let body = app.checkout(None, None, 201).await;
    let order_number = body["order_number"].as_str().expect("No order number").to_string();
    let checkout_ref = body["checkout"]["checkout_ref"]
        .as_str()
        .expect("No checkout reference")
        .to_string();
    app.send_payment_webhook(&checkout_ref).await;

    let order = app.wait_for_status(&order_number, &["completed", "failed"]).await;
    assert_eq!(order["status"], "failed");
    let error = order["error_message"].as_str().expect("No error message");
    assert!(error.starts_with("analysis_failed"), "got: {}", error);
    assert!(order.get("config_diff").is_none());

    // A failed order does not silently re-run without force.
    let response = trigger_process(&app, &order_number, false).await;
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.expect("Body was not JSON");
    assert_eq!(body["code"], "order_already_failed");

    // Forced, it resets and completes against the healthy stub.
    let response = trigger_process(&app, &order_number, true).await;
    assert_eq!(response.status().as_u16(), 200);
    let outcome: serde_json::Value = response.json().await.expect("Body was not JSON");
    assert_eq!(outcome["outcome"], "completed");

    let order = app.wait_for_status(&order_number, &["completed"]).await;
    assert!(order["error_message"].is_null());
    assert!(order["analysis_result"].is_object());

    app.cleanup().await;
}

#[tokio::test]
async fn completed_order_is_a_noop_without_force() {
    let app = TestApp::spawn().await;
    app.stub_decoder(120.0, 2000.0, 1).await;
    app.stub_analysis(CLI_COMMANDS).await;

    let body = app.checkout(None, None, 201).await;
    let order_number = body["order_number"].as_str().expect("No order number").to_string();
    let checkout_ref = body["checkout"]["checkout_ref"]
        .as_str()
        .expect("No checkout reference")
        .to_string();
    app.send_payment_webhook(&checkout_ref).await;
    app.wait_for_status(&order_number, &["completed"]).await;

    let response = trigger_process(&app, &order_number, false).await;
    assert_eq!(response.status().as_u16(), 200);
    let outcome: serde_json::Value = response.json().await.expect("Body was not JSON");
    assert_eq!(outcome["outcome"], "already_completed");

    app.cleanup().await;
}

#[tokio::test]
async fn pending_order_cannot_be_processed() {
    let app = TestApp::spawn().await;

    let body = app.checkout(None, None, 201).await;
    let order_number = body["order_number"].as_str().expect("No order number");

    let response = trigger_process(&app, order_number, false).await;
    assert_eq!(response.status().as_u16(), 409);
    let body: serde_json::Value = response.json().await.expect("Body was not JSON");
    assert_eq!(body["code"], "order_not_paid");

    app.cleanup().await;
}

#[tokio::test]
async fn process_trigger_requires_admin_secret() {
    let app = TestApp::spawn().await;

    let body = app.checkout(None, None, 201).await;
    let order_number = body["order_number"].as_str().expect("No order number");

    let response = app
        .client
        .post(format!("{}/orders/{}/process", app.address, order_number))
        .json(&serde_json::json!({ "force": true }))
        .send()
        .await
        .expect("Failed to execute process trigger");
    assert_eq!(response.status().as_u16(), 401);

    app.cleanup().await;
}

#[tokio::test]
async fn concurrent_triggers_yield_a_single_run() {
    let app = TestApp::spawn().await;

    // Slow decoder keeps the first run inside `processing` long enough for
    // the second trigger to observe the claim.
    Mock::given(method("POST"))
        .and(path("/decode"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_millis(400))
                .set_body_json(serde_json::json!({
                    "meta": {
                        "duration_s": 120.0,
                        "sample_rate_hz": 2000.0,
                        "segments_found": 1,
                        "logs_found": 1,
                        "firmware": "4.5.1",
                        "board": "TESTF7"
                    },
                    "config": {},
                    "features": {}
                })),
        )
        .mount(&app.decoder)
        .await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(TestApp::analysis_body(CLI_COMMANDS)),
        )
        .expect(1)
        .mount(&app.analysis)
        .await;

    let body = app.checkout(None, None, 201).await;
    let order_number = body["order_number"].as_str().expect("No order number").to_string();

    // Pay directly so no background trigger races the two manual ones.
    let order = app
        .state
        .repository
        .find_order_by_number(&order_number)
        .await
        .expect("Failed to read order")
        .expect("Order vanished");
    assert!(app
        .state
        .repository
        .mark_paid(order.id)
        .await
        .expect("Failed to mark paid"));

    let (first, second) = tokio::join!(
        trigger_process(&app, &order_number, false),
        trigger_process(&app, &order_number, false),
    );
    let first: serde_json::Value = first.json().await.expect("Body was not JSON");
    let second: serde_json::Value = second.json().await.expect("Body was not JSON");

    let outcomes = [
        first["outcome"].as_str().unwrap_or_default(),
        second["outcome"].as_str().unwrap_or_default(),
    ];
    assert!(outcomes.contains(&"completed"), "outcomes: {:?}", outcomes);
    assert!(
        outcomes.contains(&"already_processing"),
        "outcomes: {:?}",
        outcomes
    );

    let order = app.wait_for_status(&order_number, &["completed"]).await;
    assert_eq!(order["status"], "completed");

    app.cleanup().await;
}

#[tokio::test]
async fn promo_checkout_skips_payment_entirely() {
    let app = TestApp::spawn().await;
    app.stub_decoder(120.0, 2000.0, 1).await;
    app.stub_analysis(CLI_COMMANDS).await;

    assert_eq!(
        app.create_promo(Some("FREERIDE"), "single", None).await.status().as_u16(),
        201
    );

    let body = app.checkout(Some("FREERIDE"), Some(CLI_DUMP), 201).await;
    assert_eq!(body["status"], "paid");
    assert!(body.get("checkout").is_none(), "no payment session for promo orders");
    let order_number = body["order_number"].as_str().expect("No order number").to_string();

    let order = app.wait_for_status(&order_number, &["completed", "failed"]).await;
    assert_eq!(order["status"], "completed");
    assert_eq!(order["promo_code"], "FREERIDE");

    let promo = app
        .state
        .repository
        .find_code("FREERIDE")
        .await
        .expect("Failed to read code")
        .expect("Code vanished");
    assert_eq!(promo.used_count, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn exhausted_promo_rejects_checkout() {
    let app = TestApp::spawn().await;
    app.stub_decoder(120.0, 2000.0, 1).await;
    app.stub_analysis(CLI_COMMANDS).await;

    assert_eq!(
        app.create_promo(Some("ONCE"), "single", None).await.status().as_u16(),
        201
    );
    app.checkout(Some("ONCE"), None, 201).await;

    let body = app.checkout(Some("ONCE"), None, 409).await;
    assert_eq!(body["code"], "promo_exhausted");

    // The rejection leaves nothing behind: only the first checkout's order
    // exists and the usage counter is untouched.
    let order_count = app
        .state
        .db
        .collection::<TuneOrder>("orders")
        .count_documents(None, None)
        .await
        .expect("Failed to count orders");
    assert_eq!(order_count, 1);
    let promo = app
        .state
        .repository
        .find_code("ONCE")
        .await
        .expect("Failed to read code")
        .expect("Code vanished");
    assert_eq!(promo.used_count, 1);

    app.cleanup().await;
}

#[tokio::test]
async fn delivery_failure_fails_order_but_keeps_analysis() {
    // SMTP enabled against a port nothing listens on, so the send after the
    // completed write fails.
    let app = TestApp::spawn_with(|config| {
        config.smtp.enabled = true;
        config.smtp.host = "127.0.0.1".to_string();
        config.smtp.port = 9;
    })
    .await;
    app.stub_decoder(120.0, 2000.0, 1).await;
    app.stub_analysis(CLI_COMMANDS).await;

    let body = app.checkout(None, None, 201).await;
    let order_number = body["order_number"].as_str().expect("No order number").to_string();
    let checkout_ref = body["checkout"]["checkout_ref"]
        .as_str()
        .expect("No checkout reference")
        .to_string();
    app.send_payment_webhook(&checkout_ref).await;

    // Poll for `failed` only: the order passes through `completed` for a
    // moment before the delivery failure flips it.
    let order = app.wait_for_status(&order_number, &["failed"]).await;
    let error = order["error_message"].as_str().expect("No error message");
    assert!(error.starts_with("delivery_failed"), "got: {}", error);
    // The analysis survives the flip so a forced re-delivery has something
    // to work from.
    assert!(order["analysis_result"].is_object());
    assert!(order["completed_at"].is_string());

    app.cleanup().await;
}

#[tokio::test]
async fn forced_reprocess_replaces_previous_outputs() {
    let app = TestApp::spawn().await;
    app.stub_decoder(120.0, 2000.0, 1).await;

    // First run produces one set of commands, the forced re-run another.
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(TestApp::analysis_body("set p_roll = 42\nsave")),
        )
        .up_to_n_times(1)
        .mount(&app.analysis)
        .await;
    app.stub_analysis(CLI_COMMANDS).await;

    let body = app.checkout(None, Some(CLI_DUMP), 201).await;
    let order_number = body["order_number"].as_str().expect("No order number").to_string();
    let checkout_ref = body["checkout"]["checkout_ref"]
        .as_str()
        .expect("No checkout reference")
        .to_string();
    app.send_payment_webhook(&checkout_ref).await;

    let order = app.wait_for_status(&order_number, &["completed"]).await;
    assert_eq!(order["cli_commands"], "set p_roll = 42\nsave");

    let response = trigger_process(&app, &order_number, true).await;
    assert_eq!(response.status().as_u16(), 200);
    let outcome: serde_json::Value = response.json().await.expect("Body was not JSON");
    assert_eq!(outcome["outcome"], "completed");

    let order = app.wait_for_status(&order_number, &["completed"]).await;
    assert_eq!(order["cli_commands"], CLI_COMMANDS);
    assert_eq!(order["config_diff"]["summary"]["added"], 1);

    app.cleanup().await;
}
