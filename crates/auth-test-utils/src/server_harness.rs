//! Test server harness for E2E testing.
//!
//! Provides `TestAuthServer` for spawning real auth service instances in
//! tests, wired to the test database and an optional IdP client.

use auth_service::auth::idp_client::IdpClient;
use auth_service::auth::pipeline::{AuthPipeline, PipelineDeps};
use auth_service::config::Config;
use auth_service::repositories::api_tokens::PgApiTokenStore;
use auth_service::repositories::introspection_cache::PgIntrospectionCache;
use auth_service::routes::{self, AppState};
use auth_service::services::user_profiles::UserProfileService;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::PgPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the auth service in E2E tests.
///
/// The default configuration runs in the `test` environment (development
/// tokens enabled) with no IdP.
pub struct TestAuthServer {
    addr: SocketAddr,
    pool: PgPool,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestAuthServer {
    /// Spawn a server with the default test configuration.
    pub async fn spawn(pool: PgPool) -> Result<Self, anyhow::Error> {
        Self::spawn_with(pool, &[], None).await
    }

    /// Spawn a server with extra environment variables and an optional IdP
    /// client. `vars` override the defaults.
    pub async fn spawn_with(
        pool: PgPool,
        vars: &[(&str, &str)],
        idp: Option<Arc<dyn IdpClient>>,
    ) -> Result<Self, anyhow::Error> {
        let mut env = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://test/test".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("APP_ENV".to_string(), "test".to_string()),
        ]);
        for (k, v) in vars {
            env.insert((*k).to_string(), (*v).to_string());
        }

        let config = Config::from_vars(&env)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let pipeline = Arc::new(AuthPipeline::from_config(
            &config,
            PipelineDeps {
                api_tokens: Arc::new(PgApiTokenStore::new(pool.clone())),
                cache: Arc::new(PgIntrospectionCache::new(pool.clone())),
                idp,
                profiles: Arc::new(UserProfileService::new(pool.clone())),
            },
        ));

        let state = Arc::new(AppState {
            pool: pool.clone(),
            config: config.clone(),
            pipeline,
        });

        // A local recorder handle; the global recorder is never installed in tests.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            pool,
            config,
            _handle: handle,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for TestAuthServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
