//! Shared tests for CatalogRepo and CatalogStore implementations

use super::harness::publish;
use crate::{
    db::repos::{CatalogFilter, CatalogRepo, CatalogStore, VersionedTableName},
    models::{CatalogColumn, CatalogKind, CatalogRow, ColumnValue, Family, ResourceSpec},
    preferences::{Comparator, Constraint},
};

// ============================================================================
// Test Input Helpers
// ============================================================================

fn instance_row(id: i64, instance_type: &str, vcpu: f64, price: f64) -> CatalogRow {
    CatalogRow {
        id,
        family: "instance".to_string(),
        region: "us-east-1".to_string(),
        instance_type: Some(instance_type.to_string()),
        architecture: Some("x86_64".to_string()),
        burstable: instance_type.starts_with('t'),
        vcpu,
        memory_gib: vcpu * 4.0,
        network_mbps: 10_000.0,
        charge_type: "per_hour".to_string(),
        unit_price: price,
        ..Default::default()
    }
}

fn instance_rows() -> Vec<CatalogRow> {
    vec![
        instance_row(1, "m5.large", 2.0, 0.096),
        instance_row(2, "m5.xlarge", 4.0, 0.192),
        instance_row(3, "t3.large", 2.0, 0.0832),
        CatalogRow {
            region: "eu-west-1".to_string(),
            ..instance_row(4, "m5.large", 2.0, 0.107)
        },
    ]
}

fn volume_rows(start_id: i64, count: usize) -> Vec<CatalogRow> {
    (0..count)
        .map(|i| CatalogRow {
            id: start_id + i as i64,
            family: "gp3".to_string(),
            region: format!("region-{i}"),
            max_size_gib: 16384.0,
            max_iops: 16000.0,
            max_throughput_mbps: 1000.0,
            charge_type: "per_gb_month".to_string(),
            unit_price: 0.08,
            ..Default::default()
        })
        .collect()
}

fn region_filter(region: &str) -> CatalogFilter {
    CatalogFilter {
        region: region.to_string(),
        ..Default::default()
    }
}

// ============================================================================
// Shared Tests
// ============================================================================

pub async fn test_initial_catalog_is_empty(store: &dyn CatalogStore, repo: &dyn CatalogRepo) {
    for kind in CatalogKind::ALL {
        assert_eq!(repo.count(kind).await.unwrap(), 0);
        assert!(store.current_version(kind).await.unwrap().is_none());
    }
}

pub async fn test_publish_makes_rows_visible(store: &dyn CatalogStore, repo: &dyn CatalogRepo) {
    let table = publish(store, CatalogKind::Instances, &instance_rows()).await;

    assert_eq!(repo.count(CatalogKind::Instances).await.unwrap(), 4);
    assert_eq!(repo.count(CatalogKind::Volumes).await.unwrap(), 0);

    let version = store
        .current_version(CatalogKind::Instances)
        .await
        .unwrap()
        .expect("version recorded");
    assert_eq!(version.table_name, table.as_str());
    assert_eq!(version.row_count, 4);
}

pub async fn test_rows_round_trip_through_view(store: &dyn CatalogStore, repo: &dyn CatalogRepo) {
    let mut row = instance_row(7, "r6g.large", 2.0, 0.1008);
    row.architecture = Some("arm64".to_string());
    row.tier = Some(2);
    row.tier_upper_bound = Some(64_000.0);
    publish(store, CatalogKind::Instances, std::slice::from_ref(&row)).await;

    let rows = repo
        .find_rows(CatalogKind::Instances, &region_filter("us-east-1"))
        .await
        .unwrap();
    assert_eq!(rows, vec![row]);
}

pub async fn test_find_rows_filters_by_region_and_orders_by_id(
    store: &dyn CatalogStore,
    repo: &dyn CatalogRepo,
) {
    let mut rows = instance_rows();
    rows.reverse();
    publish(store, CatalogKind::Instances, &rows).await;

    let found = repo
        .find_rows(CatalogKind::Instances, &region_filter("us-east-1"))
        .await
        .unwrap();
    let ids: Vec<i64> = found.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

pub async fn test_find_rows_applies_constraints(store: &dyn CatalogStore, repo: &dyn CatalogRepo) {
    publish(store, CatalogKind::Instances, &instance_rows()).await;

    let filter = CatalogFilter {
        region: "us-east-1".to_string(),
        families: vec![Family::Instance],
        constraints: vec![
            Constraint::at_least(CatalogColumn::Vcpu, 1.2),
            Constraint::new(
                CatalogColumn::Burstable,
                Comparator::Eq,
                ColumnValue::Bool(false),
            ),
            Constraint::new(
                CatalogColumn::InstanceType,
                Comparator::Like,
                ColumnValue::Text("m5.%".to_string()),
            ),
        ],
    };
    let found = repo.find_rows(CatalogKind::Instances, &filter).await.unwrap();
    let types: Vec<_> = found.iter().filter_map(|r| r.instance_type.clone()).collect();
    assert_eq!(types, vec!["m5.large", "m5.xlarge"]);

    let big = CatalogFilter {
        constraints: vec![Constraint::at_least(CatalogColumn::Vcpu, 3.0)],
        ..region_filter("us-east-1")
    };
    let found = repo.find_rows(CatalogKind::Instances, &big).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, 2);
}

pub async fn test_find_rows_family_in_list(store: &dyn CatalogStore, repo: &dyn CatalogRepo) {
    let mut rows = volume_rows(1, 1);
    rows.push(CatalogRow {
        id: 2,
        family: "io2".to_string(),
        ..rows[0].clone()
    });
    rows.push(CatalogRow {
        id: 3,
        family: "st1".to_string(),
        ..rows[0].clone()
    });
    publish(store, CatalogKind::Volumes, &rows).await;

    let filter = CatalogFilter {
        constraints: vec![Constraint::new(
            CatalogColumn::Family,
            Comparator::In,
            ColumnValue::TextSet(vec!["gp3".to_string(), "st1".to_string()]),
        )],
        ..region_filter("region-0")
    };
    let found = repo.find_rows(CatalogKind::Volumes, &filter).await.unwrap();
    let ids: Vec<i64> = found.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 3]);
}

pub async fn test_find_current(store: &dyn CatalogStore, repo: &dyn CatalogRepo) {
    publish(store, CatalogKind::Instances, &instance_rows()).await;

    let current = ResourceSpec::new(CatalogKind::Instances, Family::Instance)
        .with_instance_type("m5.xlarge");
    let entry = repo
        .find_current("us-east-1", &current)
        .await
        .unwrap()
        .expect("current entry");
    assert_eq!(entry.id, 2);
    assert_eq!(entry.vcpu, 4.0);

    let missing = ResourceSpec::new(CatalogKind::Instances, Family::Instance)
        .with_instance_type("x9.huge");
    assert!(repo.find_current("us-east-1", &missing).await.unwrap().is_none());
}

pub async fn test_unpublished_table_is_invisible(store: &dyn CatalogStore, repo: &dyn CatalogRepo) {
    publish(store, CatalogKind::Volumes, &volume_rows(1, 3)).await;

    let next = VersionedTableName::generate(CatalogKind::Volumes);
    store.create_table(&next).await.unwrap();
    store.insert_rows(&next, &volume_rows(100, 5)).await.unwrap();

    assert_eq!(repo.count(CatalogKind::Volumes).await.unwrap(), 3);
}

/// A reader sampling the view between every step of a refresh sees either
/// the old row set or the new one, never anything in between.
pub async fn test_swap_is_atomic_for_readers(store: &dyn CatalogStore, repo: &dyn CatalogRepo) {
    publish(store, CatalogKind::Volumes, &volume_rows(1, 3)).await;

    let next = VersionedTableName::generate(CatalogKind::Volumes);
    let new_rows = volume_rows(100, 7);
    let mut observed = vec![repo.count(CatalogKind::Volumes).await.unwrap()];

    store.create_table(&next).await.unwrap();
    observed.push(repo.count(CatalogKind::Volumes).await.unwrap());
    for chunk in new_rows.chunks(2) {
        store.insert_rows(&next, chunk).await.unwrap();
        observed.push(repo.count(CatalogKind::Volumes).await.unwrap());
    }
    store.swap_view(&next, 7, 0).await.unwrap();
    observed.push(repo.count(CatalogKind::Volumes).await.unwrap());

    assert!(observed.iter().all(|c| *c == 3 || *c == 7), "{observed:?}");
    assert_eq!(observed.first(), Some(&3));
    assert_eq!(observed.last(), Some(&7));
}

pub async fn test_list_and_drop_versioned_tables(
    store: &dyn CatalogStore,
    repo: &dyn CatalogRepo,
) {
    let first = publish(store, CatalogKind::Volumes, &volume_rows(1, 2)).await;
    let second = publish(store, CatalogKind::Volumes, &volume_rows(10, 4)).await;
    publish(store, CatalogKind::Instances, &instance_rows()).await;

    let tables = store
        .list_versioned_tables(CatalogKind::Volumes)
        .await
        .unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(names.len(), 3, "{names:?}");
    assert!(names.contains(&"volume_catalog_v_initial"));
    assert!(names.contains(&first.as_str()));
    assert!(names.contains(&second.as_str()));

    store.drop_table(&first).await.unwrap();
    let initial = VersionedTableName::parse(CatalogKind::Volumes, "volume_catalog_v_initial").unwrap();
    store.drop_table(&initial).await.unwrap();

    let remaining = store
        .list_versioned_tables(CatalogKind::Volumes)
        .await
        .unwrap();
    assert_eq!(remaining, vec![second]);
    assert_eq!(repo.count(CatalogKind::Volumes).await.unwrap(), 4);
    assert_eq!(repo.count(CatalogKind::Instances).await.unwrap(), 4);
}

pub async fn test_insert_large_batch(store: &dyn CatalogStore, repo: &dyn CatalogRepo) {
    let rows = volume_rows(1, 1234);
    let table = VersionedTableName::generate(CatalogKind::Volumes);
    store.create_table(&table).await.unwrap();
    assert_eq!(store.insert_rows(&table, &rows).await.unwrap(), 1234);
    store.swap_view(&table, 1234, 0).await.unwrap();
    assert_eq!(repo.count(CatalogKind::Volumes).await.unwrap(), 1234);
}

// ============================================================================
// SQLite Tests
// ============================================================================

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use crate::db::tests::harness::create_sqlite_db;

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let db = create_sqlite_db().await;
                super::$name(db.catalog_store().as_ref(), db.catalog().as_ref()).await;
            }
        };
    }

    sqlite_test!(test_initial_catalog_is_empty);
    sqlite_test!(test_publish_makes_rows_visible);
    sqlite_test!(test_rows_round_trip_through_view);
    sqlite_test!(test_find_rows_filters_by_region_and_orders_by_id);
    sqlite_test!(test_find_rows_applies_constraints);
    sqlite_test!(test_find_rows_family_in_list);
    sqlite_test!(test_find_current);
    sqlite_test!(test_unpublished_table_is_invisible);
    sqlite_test!(test_swap_is_atomic_for_readers);
    sqlite_test!(test_list_and_drop_versioned_tables);
    sqlite_test!(test_insert_large_batch);
}

// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================

#[cfg(all(test, feature = "database-postgres"))]
mod postgres_tests {
    use crate::db::{
        DbPool,
        tests::harness::postgres::{create_isolated_postgres_pool, run_postgres_migrations},
    };

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let pool = create_isolated_postgres_pool().await;
                run_postgres_migrations(&pool).await;
                let db = DbPool::from_postgres(pool, None);
                super::$name(db.catalog_store().as_ref(), db.catalog().as_ref()).await;
            }
        };
    }

    postgres_test!(test_initial_catalog_is_empty);
    postgres_test!(test_publish_makes_rows_visible);
    postgres_test!(test_rows_round_trip_through_view);
    postgres_test!(test_find_rows_filters_by_region_and_orders_by_id);
    postgres_test!(test_find_rows_applies_constraints);
    postgres_test!(test_find_rows_family_in_list);
    postgres_test!(test_find_current);
    postgres_test!(test_unpublished_table_is_invisible);
    postgres_test!(test_swap_is_atomic_for_readers);
    postgres_test!(test_list_and_drop_versioned_tables);
    postgres_test!(test_insert_large_batch);
}
