//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own catalog and user database
//! on a random port. Dropping the server shuts it down and removes the
//! temporary databases.

use super::fixtures::{create_test_catalog, create_test_db_with_users};
use mixtape_server::catalog_store::{CatalogStore, SqliteCatalogStore};
use mixtape_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use mixtape_server::user::{SqliteUserStore, UserStore};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    // Private fields - keep resources alive until drop
    _temp_catalog_dir: TempDir,
    _temp_db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port.
    ///
    /// # Panics
    ///
    /// Panics if database creation, port binding or server startup fails.
    pub async fn spawn() -> Self {
        let (temp_catalog_dir, catalog_db_path) =
            create_test_catalog().expect("Failed to create test catalog");

        let catalog_store: Arc<dyn CatalogStore> = Arc::new(
            SqliteCatalogStore::new(&catalog_db_path).expect("Failed to open catalog store"),
        );

        let (temp_db_dir, user_db_path) = create_test_db_with_users(catalog_store.clone())
            .expect("Failed to create test user database");

        let user_store: Arc<dyn UserStore> =
            Arc::new(SqliteUserStore::new(&user_db_path).expect("Failed to open user store"));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to read local address")
            .port();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            frontend_dir_path: None,
        };
        let app = make_app(config, catalog_store, user_store).expect("Failed to build app");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Test server crashed");
        });

        TestServer {
            base_url: format!("http://127.0.0.1:{}", port),
            port,
            _temp_catalog_dir: temp_catalog_dir,
            _temp_db_dir: temp_db_dir,
            _shutdown_tx: Some(shutdown_tx),
        }
    }
}
