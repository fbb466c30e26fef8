use crate::database::QueryError;
use crate::database::models::{Location, LocationGroup};
use chrono::{DateTime, Utc};
use sqlx::{Executor, QueryBuilder, Sqlite};

const LOCATION_COLUMNS: &str = "id, external_id, parent_external_id, location_group_id, name, auto_fetch, last_checked_out_at";

/// Conjunctive filter over locations. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LocationFilter {
    pub id: Option<i64>,
    pub external_id: Option<String>,
    pub location_group_id: Option<i64>,
    pub auto_fetch: Option<bool>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocationGroupFilter {
    pub id: Option<i64>,
    pub name: Option<String>,
}

pub async fn list_locations<'e, E>(
    executor: E,
    filter: &LocationFilter,
) -> Result<Vec<Location>, QueryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {LOCATION_COLUMNS} FROM locations WHERE 1 = 1"
    ));

    if let Some(id) = filter.id {
        builder.push(" AND id = ").push_bind(id);
    }
    if let Some(external_id) = &filter.external_id {
        builder
            .push(" AND external_id = ")
            .push_bind(external_id.clone());
    }
    if let Some(group_id) = filter.location_group_id {
        builder.push(" AND location_group_id = ").push_bind(group_id);
    }
    if let Some(auto_fetch) = filter.auto_fetch {
        builder.push(" AND auto_fetch = ").push_bind(auto_fetch);
    }
    if let Some(name) = &filter.name {
        builder.push(" AND name = ").push_bind(name.clone());
    }
    builder.push(" ORDER BY id");

    builder
        .build_query_as::<Location>()
        .fetch_all(executor)
        .await
        .map_err(QueryError::from)
}

/// Inserts a location, or renames the existing row with the same `external_id`.
/// Returns the stored row, so a repeated call yields the id of the first insert.
pub async fn create_location<'e, E>(executor: E, location: Location) -> Result<Location, QueryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Location>(&format!(
        r"
        INSERT INTO locations (
            external_id,
            parent_external_id,
            location_group_id,
            name,
            auto_fetch,
            last_checked_out_at
        )
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (external_id) DO UPDATE
        SET name = excluded.name
        RETURNING {LOCATION_COLUMNS}
        "
    ))
    .bind(location.external_id)
    .bind(location.parent_external_id)
    .bind(location.location_group_id)
    .bind(location.name)
    .bind(location.auto_fetch)
    .bind(location.last_checked_out_at)
    .fetch_one(executor)
    .await
    .map_err(QueryError::from)
}

/// Overwrites the mutable fields of the location with `location.id`. The watermark is
/// only written when set, and never moves backwards.
pub async fn update_location<'e, E>(executor: E, location: &Location) -> Result<(), QueryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r"
        UPDATE locations
        SET external_id = ?1,
            parent_external_id = ?2,
            location_group_id = ?3,
            name = ?4,
            auto_fetch = ?5,
            last_checked_out_at = CASE
                WHEN ?6 IS NULL THEN last_checked_out_at
                WHEN last_checked_out_at IS NULL OR last_checked_out_at < ?6 THEN ?6
                ELSE last_checked_out_at
            END
        WHERE id = ?7
        ",
    )
    .bind(&location.external_id)
    .bind(&location.parent_external_id)
    .bind(location.location_group_id)
    .bind(&location.name)
    .bind(location.auto_fetch)
    .bind(location.last_checked_out_at)
    .bind(location.id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(QueryError::NotFound {
            entity: "location",
            id: location.id,
        });
    }
    Ok(())
}

/// Moves only the watermark of location `id` forward to `at`; every other column is
/// left as currently stored. An older `at` is a no-op.
pub async fn advance_watermark<'e, E>(
    executor: E,
    id: i64,
    at: DateTime<Utc>,
) -> Result<(), QueryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r"
        UPDATE locations
        SET last_checked_out_at = CASE
                WHEN last_checked_out_at IS NULL OR last_checked_out_at < ?1 THEN ?1
                ELSE last_checked_out_at
            END
        WHERE id = ?2
        ",
    )
    .bind(at)
    .bind(id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(QueryError::NotFound {
            entity: "location",
            id,
        });
    }
    Ok(())
}

pub async fn list_location_groups<'e, E>(
    executor: E,
    filter: &LocationGroupFilter,
) -> Result<Vec<LocationGroup>, QueryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT id, name FROM location_groups WHERE 1 = 1");

    if let Some(id) = filter.id {
        builder.push(" AND id = ").push_bind(id);
    }
    if let Some(name) = &filter.name {
        builder.push(" AND name = ").push_bind(name.clone());
    }
    builder.push(" ORDER BY id");

    builder
        .build_query_as::<LocationGroup>()
        .fetch_all(executor)
        .await
        .map_err(QueryError::from)
}

/// Upserts a group by name and returns the stored row.
pub async fn create_location_group<'e, E>(
    executor: E,
    group: LocationGroup,
) -> Result<LocationGroup, QueryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, LocationGroup>(
        r"
        INSERT INTO location_groups (name)
        VALUES (?)
        ON CONFLICT (name) DO UPDATE
        SET name = excluded.name
        RETURNING id, name
        ",
    )
    .bind(group.name)
    .fetch_one(executor)
    .await
    .map_err(QueryError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialize_memory_db;
    use chrono::{TimeZone, Utc};

    fn location(external_id: &str, name: &str) -> Location {
        Location {
            external_id: external_id.to_string(),
            name: name.to_string(),
            ..Location::default()
        }
    }

    #[tokio::test]
    async fn location_created_successfully() {
        let pool = initialize_memory_db().await.unwrap();

        let actual = create_location(&pool, location("pcloc_1234", "Cool location"))
            .await
            .unwrap();
        assert_ne!(actual.id, 0);
        assert_eq!(actual.external_id, "pcloc_1234");
        assert_eq!(actual.name, "Cool location");

        let filter = LocationFilter {
            external_id: Some("pcloc_1234".to_string()),
            ..LocationFilter::default()
        };
        let locations = list_locations(&pool, &filter).await.unwrap();
        assert_eq!(locations, vec![actual]);
    }

    #[tokio::test]
    async fn duplicate_location_updates_name_and_keeps_id() {
        let pool = initialize_memory_db().await.unwrap();

        let first = create_location(&pool, location("pcloc_1235", "another location"))
            .await
            .unwrap();
        let second = create_location(&pool, location("pcloc_1235", "new location name"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id, "duplicate location should not be created");
        assert_eq!(second.name, "new location name");

        let locations = list_locations(&pool, &LocationFilter::default()).await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].name, "new location name");
    }

    #[tokio::test]
    async fn filters_are_conjunctive() {
        let pool = initialize_memory_db().await.unwrap();
        let group = create_location_group(
            &pool,
            LocationGroup {
                name: "Nursery".to_string(),
                ..LocationGroup::default()
            },
        )
        .await
        .unwrap();

        for (external_id, name, auto_fetch, group_id) in [
            ("1", "Babies", true, Some(group.id)),
            ("2", "Crawlers", false, Some(group.id)),
            ("3", "Babies", true, None),
        ] {
            create_location(
                &pool,
                Location {
                    auto_fetch,
                    location_group_id: group_id,
                    ..location(external_id, name)
                },
            )
            .await
            .unwrap();
        }

        let all = list_locations(&pool, &LocationFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let auto = LocationFilter {
            auto_fetch: Some(true),
            ..LocationFilter::default()
        };
        assert_eq!(list_locations(&pool, &auto).await.unwrap().len(), 2);

        let auto_in_group = LocationFilter {
            auto_fetch: Some(true),
            location_group_id: Some(group.id),
            ..LocationFilter::default()
        };
        let found = list_locations(&pool, &auto_in_group).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].external_id, "1");

        let by_name_not_auto = LocationFilter {
            name: Some("Babies".to_string()),
            auto_fetch: Some(false),
            ..LocationFilter::default()
        };
        assert!(list_locations(&pool, &by_name_not_auto).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_of_missing_location_is_not_found() {
        let pool = initialize_memory_db().await.unwrap();

        let err = update_location(
            &pool,
            &Location {
                id: 42,
                ..location("pcloc_missing", "ghost")
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            QueryError::NotFound {
                entity: "location",
                id: 42
            }
        ));
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() {
        let pool = initialize_memory_db().await.unwrap();
        let mut stored = create_location(&pool, location("pcloc_1", "Room")).await.unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 5, 11, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2025, 1, 5, 9, 30, 0).unwrap();

        stored.last_checked_out_at = Some(later);
        update_location(&pool, &stored).await.unwrap();

        stored.last_checked_out_at = Some(earlier);
        stored.auto_fetch = true;
        update_location(&pool, &stored).await.unwrap();

        stored.last_checked_out_at = None;
        update_location(&pool, &stored).await.unwrap();

        let filter = LocationFilter {
            id: Some(stored.id),
            ..LocationFilter::default()
        };
        let reloaded = list_locations(&pool, &filter).await.unwrap().remove(0);
        assert_eq!(reloaded.last_checked_out_at, Some(later));
        assert!(reloaded.auto_fetch);
    }

    #[tokio::test]
    async fn advancing_watermark_keeps_other_columns() {
        let pool = initialize_memory_db().await.unwrap();
        let stale = create_location(
            &pool,
            Location {
                auto_fetch: true,
                ..location("pcloc_1", "Original")
            },
        )
        .await
        .unwrap();

        // someone else renames the room and stops fetching it
        update_location(
            &pool,
            &Location {
                name: "Renamed".to_string(),
                auto_fetch: false,
                ..stale.clone()
            },
        )
        .await
        .unwrap();

        let later = Utc.with_ymd_and_hms(2025, 1, 5, 11, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2025, 1, 5, 9, 30, 0).unwrap();
        advance_watermark(&pool, stale.id, later).await.unwrap();
        advance_watermark(&pool, stale.id, earlier).await.unwrap();

        let filter = LocationFilter {
            id: Some(stale.id),
            ..LocationFilter::default()
        };
        let reloaded = list_locations(&pool, &filter).await.unwrap().remove(0);
        assert_eq!(reloaded.name, "Renamed");
        assert!(!reloaded.auto_fetch);
        assert_eq!(reloaded.last_checked_out_at, Some(later));

        let err = advance_watermark(&pool, 9_999, later).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::NotFound {
                entity: "location",
                id: 9_999
            }
        ));
    }

    #[tokio::test]
    async fn location_groups_upsert_by_name() {
        let pool = initialize_memory_db().await.unwrap();
        let group = |name: &str| LocationGroup {
            name: name.to_string(),
            ..LocationGroup::default()
        };

        let first = create_location_group(&pool, group("Elementary")).await.unwrap();
        let again = create_location_group(&pool, group("Elementary")).await.unwrap();
        create_location_group(&pool, group("Preschool")).await.unwrap();
        assert_eq!(first, again);

        let all = list_location_groups(&pool, &LocationGroupFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let filter = LocationGroupFilter {
            name: Some("Preschool".to_string()),
            ..LocationGroupFilter::default()
        };
        let found = list_location_groups(&pool, &filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Preschool");
    }
}
