mod common;

use common::{dec, Harness, POLYGON_DESTINATION};
use escrow_settlement::{create_app, AppState};
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

const ADMIN_TOKEN: &str = "admin-secret";

async fn spawn_app(h: &Harness) -> String {
    let app = create_app(AppState {
        engine: h.engine.clone(),
        admin_token: Some(ADMIN_TOKEN.to_string()),
    });

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let actual_addr = server.local_addr();

    tokio::spawn(async move {
        server.await.unwrap();
    });

    format!("http://{}", actual_addr)
}

#[tokio::test]
async fn test_health_reports_networks() {
    let h = Harness::new();
    let base_url = spawn_app(&h).await;

    let res = reqwest::get(format!("{}/health", base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["networks"], json!(["tron", "polygon"]));
}

#[tokio::test]
async fn test_missing_caller_is_unauthorized() {
    let h = Harness::new();
    let base_url = spawn_app(&h).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/balance", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/balance", base_url))
        .header("X-User-Id", "not-a-uuid")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_charge_lifecycle_over_http() {
    let h = Harness::new();
    let user = h.funded_user("10").await;
    let base_url = spawn_app(&h).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/charges", base_url))
        .header("X-User-Id", user.to_string())
        .json(&json!({ "amount": "25.00", "network": "tron" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let quote: Value = res.json().await.unwrap();
    assert_eq!(quote["network"], "tron");
    assert!(quote["deposit_address"].as_str().unwrap().starts_with('T'));
    let id = quote["transaction_id"].as_str().unwrap().to_string();

    let res = client
        .get(format!("{}/charges/{}", base_url, id))
        .header("X-User-Id", user.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let tx: Value = res.json().await.unwrap();
    assert_eq!(tx["status"], "pending");
    assert_eq!(tx["type"], "charge");

    let res = client
        .get(format!("{}/charges/{}", base_url, id))
        .header("X-User-Id", Uuid::new_v4().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(format!("{}/charges/{}/cancel", base_url, id))
        .header("X-User-Id", user.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let tx: Value = res.json().await.unwrap();
    assert_eq!(tx["status"], "cancelled");

    let res = client
        .post(format!("{}/charges/{}/cancel", base_url, id))
        .header("X-User-Id", user.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_fields_are_rejected() {
    let h = Harness::new();
    let user = h.funded_user("10").await;
    let base_url = spawn_app(&h).await;

    let res = reqwest::Client::new()
        .post(format!("{}/charges", base_url))
        .header("X-User-Id", user.to_string())
        .json(&json!({ "amount": "25.00", "network": "tron", "fee": "0" }))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_client_error());
    assert_eq!(h.balance(user).await, dec("10"));
}

#[tokio::test]
async fn test_withdrawal_maps_errors_to_statuses() {
    let h = Harness::new();
    let user = h.funded_user("30").await;
    let base_url = spawn_app(&h).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/withdrawals", base_url))
        .header("X-User-Id", user.to_string())
        .json(&json!({
            "amount": "40.00",
            "destination_address": POLYGON_DESTINATION,
            "network": "polygon"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);

    let res = client
        .post(format!("{}/withdrawals", base_url))
        .header("X-User-Id", user.to_string())
        .json(&json!({
            "amount": "5.00",
            "destination_address": POLYGON_DESTINATION,
            "network": "polygon"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/withdrawals", base_url))
        .header("X-User-Id", user.to_string())
        .json(&json!({
            "amount": "20.00",
            "destination_address": POLYGON_DESTINATION,
            "network": "polygon"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let tx: Value = res.json().await.unwrap();
    let id = tx["id"].as_str().unwrap().to_string();

    let res = client
        .get(format!("{}/balance", base_url))
        .header("X-User-Id", user.to_string())
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["user_id"], user.to_string());
    assert_eq!(h.balance(user).await, dec("10"));

    // Admin routes need the token.
    let res = client
        .post(format!("{}/admin/withdrawals/{}/process", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(format!("{}/admin/withdrawals/{}/process", base_url, id))
        .header("X-Admin-Token", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(h.polygon.transfers().is_empty());

    let res = client
        .post(format!("{}/admin/withdrawals/{}/process", base_url, id))
        .header("X-Admin-Token", ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let tx: Value = res.json().await.unwrap();
    assert_eq!(tx["status"], "success");
    assert_eq!(h.polygon.transfers().len(), 1);
}

#[tokio::test]
async fn test_transactions_are_paginated() {
    let h = Harness::new();
    let user = h.funded_user("10").await;
    let base_url = spawn_app(&h).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        h.engine
            .initiate_charge(user, dec("5"), escrow_settlement::domain::Network::Polygon)
            .await
            .unwrap();
    }

    let res = client
        .get(format!("{}/transactions?page=1&limit=2", base_url))
        .header("X-User-Id", user.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page: Vec<Value> = res.json().await.unwrap();
    assert_eq!(page.len(), 2);

    let res = client
        .get(format!("{}/transactions?page=2&limit=2", base_url))
        .header("X-User-Id", user.to_string())
        .send()
        .await
        .unwrap();
    let page: Vec<Value> = res.json().await.unwrap();
    assert_eq!(page.len(), 1);
}
