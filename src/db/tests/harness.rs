//! Test databases for catalog repository tests
//!
//! - SQLite: in-memory databases with the real migrations
//! - PostgreSQL: one shared testcontainers instance, one schema per test

#[cfg(feature = "database-sqlite")]
use sqlx::SqlitePool;

/// Create an in-memory SQLite pool for testing.
///
/// A single connection keeps every query on the same in-memory database.
#[cfg(feature = "database-sqlite")]
pub async fn create_sqlite_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

/// Run SQLite migrations on the pool
///
/// Uses the actual migration files to ensure tests match production schema
#[cfg(feature = "database-sqlite")]
pub async fn run_sqlite_migrations(pool: &SqlitePool) {
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(pool)
        .await
        .expect("Failed to run SQLite migrations");
}

/// PostgreSQL test harness using testcontainers
#[cfg(all(test, feature = "database-postgres"))]
pub mod postgres {
    use std::sync::OnceLock;

    use sqlx::PgPool;
    use testcontainers_modules::{
        postgres::Postgres,
        testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner},
    };
    use tokio::sync::OnceCell;

    /// Shared container state - initialized once per test run
    struct SharedContainer {
        #[allow(dead_code)] // Test infrastructure: keeps container alive
        container: ContainerAsync<Postgres>,
        connection_string: String,
    }

    /// Global shared container - lazily initialized on first use
    static SHARED_CONTAINER: OnceLock<OnceCell<SharedContainer>> = OnceLock::new();

    /// Get or initialize the shared PostgreSQL container
    async fn get_shared_container() -> &'static SharedContainer {
        let cell = SHARED_CONTAINER.get_or_init(OnceCell::new);
        cell.get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("18-alpine")
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            SharedContainer {
                container,
                connection_string,
            }
        })
        .await
    }

    /// Create a pool whose `search_path` is a fresh schema.
    ///
    /// Catalog tables and views are created unqualified, so every test gets
    /// its own set of views and versioned tables.
    pub async fn create_isolated_postgres_pool() -> PgPool {
        let shared = get_shared_container().await;

        let admin_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&shared.connection_string)
            .await
            .expect("Failed to connect to PostgreSQL");

        let schema_name = format!("test_{}", uuid::Uuid::new_v4().simple());

        sqlx::query(&format!("CREATE SCHEMA \"{}\"", schema_name))
            .execute(&admin_pool)
            .await
            .expect("Failed to create test schema");

        let isolated_url = format!(
            "{}?options=-c search_path={}",
            shared.connection_string, schema_name
        );

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&isolated_url)
            .await
            .expect("Failed to connect to isolated schema")
    }

    /// Run PostgreSQL migrations on the pool
    pub async fn run_postgres_migrations(pool: &PgPool) {
        sqlx::migrate!("./migrations_sqlx/postgres")
            .run(pool)
            .await
            .expect("Failed to run PostgreSQL migrations");
    }
}

/// A migrated in-memory SQLite database wrapped in a [`DbPool`](crate::db::DbPool).
#[cfg(feature = "database-sqlite")]
pub async fn create_sqlite_db() -> crate::db::DbPool {
    let pool = create_sqlite_pool().await;
    run_sqlite_migrations(&pool).await;
    crate::db::DbPool::from_sqlite(pool)
}

/// Build, fill and publish a catalog table in one go.
pub async fn publish(
    store: &dyn crate::db::CatalogStore,
    kind: crate::models::CatalogKind,
    rows: &[crate::models::CatalogRow],
) -> crate::db::VersionedTableName {
    let table = crate::db::VersionedTableName::generate(kind);
    store.create_table(&table).await.expect("create table");
    store.insert_rows(&table, rows).await.expect("insert rows");
    store
        .swap_view(&table, rows.len() as i64, 0)
        .await
        .expect("swap view");
    table
}
