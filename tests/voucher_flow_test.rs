//! HTTP tests for voucher validation and the per-user availability listing.

mod common;

use axum::http::{Method, StatusCode};
use common::{decimal_field, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

use orderflow_api::entities::voucher::DiscountType;

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn validate_quotes_percentage_discount_with_cap() {
    let app = TestApp::new().await;
    app.seed_voucher(
        "SAVE10",
        DiscountType::Percentage,
        dec!(10),
        dec!(200000),
        Some(dec!(30000)),
        Some(100),
        2,
    )
    .await;

    // 10% of 500_000 would be 50_000; the cap brings it down to 30_000.
    let response = app
        .request(
            Method::POST,
            "/api/v1/vouchers/validate/SAVE10",
            Some(json!({"user_id": 7, "order_amount": 500000})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["voucher"]["code"], json!("SAVE10"));
    assert_eq!(decimal_field(&body["data"]["discount_amount"]), dec!(30000));

    // Codes are stored uppercase; a lowercase lookup still matches.
    let lowercase = app
        .request(
            Method::POST,
            "/api/v1/vouchers/validate/save10",
            Some(json!({"user_id": 7, "order_amount": 500000})),
        )
        .await;
    assert_eq!(lowercase.status(), StatusCode::OK);
    let lowercase = response_json(lowercase).await;
    assert_eq!(lowercase["data"]["voucher"]["code"], json!("SAVE10"));

    // Below the minimum order amount the ladder rejects it.
    let rejected = app
        .request(
            Method::POST,
            "/api/v1/vouchers/validate/SAVE10",
            Some(json!({"user_id": 7, "order_amount": 100000})),
        )
        .await;
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let rejected = response_json(rejected).await;
    assert_eq!(rejected["error"], json!("VOUCHER_MIN_AMOUNT_NOT_MET"));
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn validate_unknown_code_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/vouchers/validate/NOSUCH",
            Some(json!({"user_id": 7, "order_amount": 100000})),
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["error"], json!("VOUCHER_NOT_FOUND"));
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn free_shipping_discount_matches_the_fee() {
    let app = TestApp::new().await;
    app.seed_voucher(
        "FREESHIP",
        DiscountType::FreeShipping,
        dec!(0),
        dec!(0),
        None,
        None,
        1,
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/vouchers/validate/FREESHIP",
            Some(json!({"user_id": 7, "order_amount": 80000, "shipping_fee": 25000})),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(decimal_field(&body["data"]["discount_amount"]), dec!(25000));
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn consumed_voucher_reports_exhausted_to_everyone() {
    let app = TestApp::new().await;
    let variant = app.seed_variant(1, dec!(100000), 10).await;
    app.seed_voucher(
        "SINGLE",
        DiscountType::FixedAmount,
        dec!(10000),
        dec!(0),
        None,
        Some(1),
        5,
    )
    .await;

    // User 1 consumes the only use.
    let created = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "user_id": 1,
                "items": [{"variant_id": variant.id, "quantity": 1}],
                "voucher_code": "SINGLE",
                "shipping_address": "12 Ly Thuong Kiet, Hanoi"
            })),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);

    // User 2 now sees it exhausted.
    let response = app
        .request(
            Method::POST,
            "/api/v1/vouchers/validate/SINGLE",
            Some(json!({"user_id": 2, "order_amount": 100000})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["error"], json!("VOUCHER_EXHAUSTED"));

    // And the availability listing says so instead of failing.
    let listing = app
        .request(Method::GET, "/api/v1/vouchers/available?user_id=2", None)
        .await;
    assert_eq!(listing.status(), StatusCode::OK);
    let listing = response_json(listing).await;
    let entries = listing["data"].as_array().expect("availability entries");
    let single = entries
        .iter()
        .find(|entry| entry["voucher"]["code"] == json!("SINGLE"))
        .expect("consumed voucher still listed");
    assert_eq!(single["can_use"], json!(false));
    assert!(single["reason"].as_str().is_some());
}

#[tokio::test]
#[ignore = "requires SQLite integration environment"]
async fn available_listing_annotates_usability_per_amount() {
    let app = TestApp::new().await;
    app.seed_voucher(
        "EASY",
        DiscountType::FixedAmount,
        dec!(5000),
        dec!(0),
        None,
        None,
        1,
    )
    .await;
    app.seed_voucher(
        "BIGMIN",
        DiscountType::Percentage,
        dec!(15),
        dec!(1000000),
        None,
        None,
        1,
    )
    .await;

    // With a concrete amount the minimum is enforced and previews are quoted.
    let listing = app
        .request(
            Method::GET,
            "/api/v1/vouchers/available?user_id=5&order_amount=100000",
            None,
        )
        .await;
    assert_eq!(listing.status(), StatusCode::OK);
    let listing = response_json(listing).await;
    let entries = listing["data"].as_array().expect("availability entries");
    assert_eq!(entries.len(), 2);

    let easy = entries
        .iter()
        .find(|entry| entry["voucher"]["code"] == json!("EASY"))
        .expect("easy voucher listed");
    assert_eq!(easy["can_use"], json!(true));
    assert_eq!(decimal_field(&easy["discount_preview"]), dec!(5000));

    let bigmin = entries
        .iter()
        .find(|entry| entry["voucher"]["code"] == json!("BIGMIN"))
        .expect("high-minimum voucher listed");
    assert_eq!(bigmin["can_use"], json!(false));
    assert!(bigmin["reason"].as_str().is_some());
    assert!(bigmin.get("discount_preview").is_none());

    // Without an amount the minimum rung is skipped and nothing is quoted.
    let listing = app
        .request(Method::GET, "/api/v1/vouchers/available?user_id=5", None)
        .await;
    let listing = response_json(listing).await;
    let entries = listing["data"].as_array().expect("availability entries");
    let bigmin = entries
        .iter()
        .find(|entry| entry["voucher"]["code"] == json!("BIGMIN"))
        .expect("high-minimum voucher listed");
    assert_eq!(bigmin["can_use"], json!(true));
    assert!(bigmin.get("discount_preview").is_none());
}
