use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{
            BindValue, CATALOG_COLUMNS, CatalogFilter, CatalogRepo, CatalogStore, ColumnTypes,
            VersionedTableName, create_index_sql, create_table_sql,
        },
    },
    models::{CatalogKind, CatalogRow, CatalogVersion},
};

const SQLITE_TYPES: ColumnTypes = ColumnTypes {
    integer: "INTEGER",
    real: "REAL",
    boolean: "INTEGER",
    boolean_false: "0",
};

/// Each row binds 18 parameters; stay well below SQLite's variable limit.
const MAX_ROWS_PER_STATEMENT: usize = 500;

fn row_to_catalog_row(row: &sqlx::sqlite::SqliteRow) -> CatalogRow {
    CatalogRow {
        id: row.get("id"),
        family: row.get("family"),
        region: row.get("region"),
        engine: row.get("engine"),
        instance_type: row.get("instance_type"),
        architecture: row.get("architecture"),
        burstable: row.get("burstable"),
        vcpu: row.get("vcpu"),
        memory_gib: row.get("memory_gib"),
        network_mbps: row.get("network_mbps"),
        min_size_gib: row.get("min_size_gib"),
        max_size_gib: row.get("max_size_gib"),
        max_iops: row.get("max_iops"),
        max_throughput_mbps: row.get("max_throughput_mbps"),
        charge_type: row.get("charge_type"),
        unit_price: row.get("unit_price"),
        tier: row.get("tier"),
        tier_upper_bound: row.get("tier_upper_bound"),
    }
}

pub struct SqliteCatalogRepo {
    pool: SqlitePool,
}

impl SqliteCatalogRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepo for SqliteCatalogRepo {
    async fn find_rows(
        &self,
        kind: CatalogKind,
        filter: &CatalogFilter,
    ) -> DbResult<Vec<CatalogRow>> {
        let clause = filter.render(|_| "?".to_string())?;
        let query = format!(
            "SELECT {CATALOG_COLUMNS} FROM {} {} ORDER BY id",
            kind.view_name(),
            clause.sql
        );

        let mut query_builder = sqlx::query(&query);
        for bind in clause.binds {
            query_builder = match bind {
                BindValue::Text(v) => query_builder.bind(v),
                BindValue::Number(v) => query_builder.bind(v),
                BindValue::Bool(v) => query_builder.bind(v),
            };
        }

        let rows = query_builder.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_catalog_row).collect())
    }

    async fn count(&self, kind: CatalogKind) -> DbResult<i64> {
        let query = format!("SELECT COUNT(*) AS count FROM {}", kind.view_name());
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(row.get("count"))
    }
}

pub struct SqliteCatalogStore {
    pool: SqlitePool,
}

impl SqliteCatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> DbResult<CatalogVersion> {
    let kind: String = row.get("kind");
    let kind = CatalogKind::parse(&kind)
        .ok_or_else(|| DbError::Internal(format!("Unknown catalog kind in database: {kind}")))?;
    Ok(CatalogVersion {
        kind,
        table_name: row.get("table_name"),
        refreshed_at: row.get::<DateTime<Utc>, _>("refreshed_at"),
        row_count: row.get("row_count"),
        skipped_rows: row.get("skipped_rows"),
    })
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn current_version(&self, kind: CatalogKind) -> DbResult<Option<CatalogVersion>> {
        let row = sqlx::query(
            r#"
            SELECT kind, table_name, refreshed_at, row_count, skipped_rows
            FROM catalog_versions
            WHERE kind = ?
            "#,
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_version).transpose()
    }

    async fn create_table(&self, table: &VersionedTableName) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&create_table_sql(table, &SQLITE_TYPES))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&create_index_sql(table))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_rows(&self, table: &VersionedTableName, rows: &[CatalogRow]) -> DbResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!(r#"INSERT INTO "{table}" ({CATALOG_COLUMNS}) "#));
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.id)
                    .push_bind(&row.family)
                    .push_bind(&row.region)
                    .push_bind(&row.engine)
                    .push_bind(&row.instance_type)
                    .push_bind(&row.architecture)
                    .push_bind(row.burstable)
                    .push_bind(row.vcpu)
                    .push_bind(row.memory_gib)
                    .push_bind(row.network_mbps)
                    .push_bind(row.min_size_gib)
                    .push_bind(row.max_size_gib)
                    .push_bind(row.max_iops)
                    .push_bind(row.max_throughput_mbps)
                    .push_bind(&row.charge_type)
                    .push_bind(row.unit_price)
                    .push_bind(row.tier)
                    .push_bind(row.tier_upper_bound);
            });
            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn swap_view(
        &self,
        table: &VersionedTableName,
        row_count: i64,
        skipped_rows: i64,
    ) -> DbResult<CatalogVersion> {
        let kind = table.kind();
        let view = kind.view_name();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP VIEW IF EXISTS {view}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(r#"CREATE VIEW {view} AS SELECT * FROM "{table}""#))
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO catalog_versions (kind, table_name, refreshed_at, row_count, skipped_rows)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (kind) DO UPDATE SET
                table_name = excluded.table_name,
                refreshed_at = excluded.refreshed_at,
                row_count = excluded.row_count,
                skipped_rows = excluded.skipped_rows
            "#,
        )
        .bind(kind.as_str())
        .bind(table.as_str())
        .bind(now)
        .bind(row_count)
        .bind(skipped_rows)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(CatalogVersion {
            kind,
            table_name: table.as_str().to_string(),
            refreshed_at: now,
            row_count,
            skipped_rows,
        })
    }

    async fn list_versioned_tables(
        &self,
        kind: CatalogKind,
    ) -> DbResult<Vec<VersionedTableName>> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let prefix = kind.table_prefix();
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .filter(|name| name.starts_with(&prefix))
            .filter_map(|name| VersionedTableName::parse(kind, &name).ok())
            .collect())
    }

    async fn drop_table(&self, table: &VersionedTableName) -> DbResult<()> {
        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{table}""#))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
