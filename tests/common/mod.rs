use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use pawmart_api::{
    config::AppConfig,
    db,
    entities::payment::PaymentReferenceType,
    events::{self, EventSender},
    handlers::AppServices,
    notifications::LogEmailSink,
    otp::{MemoryOtpStore, OtpKey, OtpStore},
    services::{
        carts::AddToCartInput, customers::RegisterCustomerInput, products::CreateProductInput,
    },
    AppState,
};

/// A caller identity as the edge gateway would forward it.
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub role: &'static str,
}

impl TestUser {
    pub fn customer() -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            email: format!("customer-{}@example.com", id.simple()),
            role: "customer",
        }
    }

    #[allow(dead_code)]
    pub fn provider() -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            email: format!("provider-{}@example.com", id.simple()),
            role: "provider",
        }
    }

    #[allow(dead_code)]
    pub fn admin() -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            email: format!("admin-{}@example.com", id.simple()),
            role: "admin",
        }
    }
}

/// Helper harness for spinning up an application backed by a throwaway
/// SQLite database and the in-memory OTP store.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub otp_store: Arc<MemoryOtpStore>,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for test database");
        let db_path = db_dir.path().join("pawmart_test.db");

        let mut cfg = AppConfig::new(format!("sqlite://{}?mode=rwc", db_path.display()));
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let otp_store = Arc::new(MemoryOtpStore::new());
        let cfg = Arc::new(cfg);
        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            otp_store.clone(),
            Arc::new(LogEmailSink),
            cfg.clone(),
        );

        let state = Arc::new(AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            redis: None,
        });

        let router = Router::new()
            .nest("/api/v1", pawmart_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            otp_store,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Send a request against the router, optionally with gateway identity headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user: Option<&TestUser>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(user) = user {
            builder = builder
                .header("x-user-id", user.id.to_string())
                .header("x-user-email", user.email.as_str())
                .header("x-user-role", user.role);
        }

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

    /// Convenience helper for requests carrying a specific identity.
    pub async fn request_as(
        &self,
        user: &TestUser,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(user)).await
    }

    pub async fn seed_product(&self, code: &str, price: Decimal, available: i32) {
        self.state
            .services
            .products
            .create(CreateProductInput {
                code: code.to_string(),
                name: format!("Test Product {}", code),
                description: None,
                price,
                available,
                image_url: None,
            })
            .await
            .expect("seed product for tests");
    }

    pub async fn register_customer(&self, user: &TestUser) {
        self.state
            .services
            .customers
            .register(
                user.id,
                RegisterCustomerInput {
                    email: user.email.clone(),
                    name: Some("Test Customer".to_string()),
                },
            )
            .await
            .expect("register customer for tests");
    }

    #[allow(dead_code)]
    pub async fn grant_points(&self, user: &TestUser, points: i32) {
        let credited = self
            .state
            .services
            .loyalty
            .credit(&user.email, points)
            .await
            .expect("credit loyalty points for tests");
        assert!(credited, "customer must be registered before granting points");
    }

    pub async fn add_to_cart(&self, user: &TestUser, product_code: &str, quantity: i32) {
        self.state
            .services
            .carts
            .add_item(
                user.id,
                AddToCartInput {
                    product_code: product_code.to_string(),
                    quantity,
                },
            )
            .await
            .expect("add item to cart for tests");
    }

    /// Read the code the OTP service stored for a resource.
    #[allow(dead_code)]
    pub async fn stored_otp_code(
        &self,
        resource_type: PaymentReferenceType,
        resource_id: Uuid,
    ) -> String {
        self.otp_store
            .get(&OtpKey::new(resource_type, resource_id))
            .await
            .expect("otp store read")
            .expect("a verification code should have been issued")
            .code
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
