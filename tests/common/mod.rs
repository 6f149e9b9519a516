// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    routing::get,
    Router,
};
use chrono::{Days, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

use orderflow_api::{
    config::AppConfig,
    db,
    entities::{product_variant, promotion, promotion_product, voucher},
    events::{self, EventSender},
    handlers::AppServices,
    AppState,
};

/// Helper harness for spinning up an application state backed by a
/// file-based SQLite database in a temporary directory.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for test database");
        let db_path = db_dir.path().join("orderflow_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1",
            0,
            "test",
        );
        cfg.db_max_connections = 5;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db_arc.clone(), Arc::new(event_sender), &cfg);

        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
        };

        let router = Router::new()
            .route("/health", get(orderflow_api::health_check))
            .nest("/api/v1", orderflow_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Send a JSON request against the router and return the raw response.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Insert a product variant with the given price and starting stock.
    pub async fn seed_variant(
        &self,
        product_id: i32,
        price: Decimal,
        stock: i32,
    ) -> product_variant::Model {
        let now = Utc::now();
        product_variant::ActiveModel {
            product_id: Set(product_id),
            size_id: Set(1),
            color_id: Set(1),
            price: Set(price),
            stock_quantity: Set(stock),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product variant for tests")
    }

    /// Insert an inactive variant. Orders over it must be rejected.
    pub async fn seed_inactive_variant(
        &self,
        product_id: i32,
        price: Decimal,
        stock: i32,
    ) -> product_variant::Model {
        let now = Utc::now();
        product_variant::ActiveModel {
            product_id: Set(product_id),
            size_id: Set(1),
            color_id: Set(1),
            price: Set(price),
            stock_quantity: Set(stock),
            is_active: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed inactive product variant for tests")
    }

    /// Insert a currently-running percent promotion covering `product_id`.
    pub async fn seed_promotion(&self, product_id: i32, discount_percent: i32) -> promotion::Model {
        let today = Utc::now().date_naive();
        let promo = promotion::ActiveModel {
            name: Set(format!("{}% off product {}", discount_percent, product_id)),
            discount_percent: Set(discount_percent),
            start_date: Set(today.checked_sub_days(Days::new(1)).expect("valid date")),
            end_date: Set(today.checked_add_days(Days::new(7)).expect("valid date")),
            active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed promotion for tests");

        promotion_product::ActiveModel {
            promotion_id: Set(promo.id),
            product_id: Set(product_id),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed promotion-product link for tests");

        promo
    }

    /// Insert an active voucher valid today.
    #[allow(clippy::too_many_arguments)]
    pub async fn seed_voucher(
        &self,
        code: &str,
        discount_type: voucher::DiscountType,
        discount_value: Decimal,
        min_order_amount: Decimal,
        max_discount_amount: Option<Decimal>,
        usage_limit: Option<i32>,
        user_limit: i32,
    ) -> voucher::Model {
        let today = Utc::now().date_naive();
        let now = Utc::now();
        voucher::ActiveModel {
            code: Set(code.to_string()),
            discount_type: Set(discount_type),
            discount_value: Set(discount_value),
            min_order_amount: Set(min_order_amount),
            max_discount_amount: Set(max_discount_amount),
            usage_limit: Set(usage_limit),
            used_count: Set(0),
            user_limit: Set(user_limit),
            start_date: Set(today.checked_sub_days(Days::new(1)).expect("valid date")),
            end_date: Set(today.checked_add_days(Days::new(7)).expect("valid date")),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed voucher for tests")
    }

    /// Reload a variant row to observe committed stock.
    pub async fn variant_stock(&self, variant_id: i32) -> i32 {
        use sea_orm::EntityTrait;

        product_variant::Entity::find_by_id(variant_id)
            .one(self.state.db.as_ref())
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock_quantity
    }
}

/// Decode a JSON response body into a `serde_json::Value`.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Read a decimal field regardless of whether it was serialized as a JSON
/// string or a bare number.
pub fn decimal_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string field"),
        Value::Number(n) => n.to_string().parse().expect("decimal number field"),
        other => panic!("expected a decimal field, got {:?}", other),
    }
}
