use crate::database::QueryError;
use crate::database::models::Checkin;
use chrono::{DateTime, Utc};
use sqlx::{Executor, QueryBuilder, Sqlite};

/// Conjunctive filter over check-ins. Location and group predicates join the owning
/// tables only when they are set.
#[derive(Debug, Clone, Default)]
pub struct CheckinFilter {
    pub id: Option<i64>,
    pub external_id: Option<String>,
    pub location_id: Option<i64>,
    pub location_name: Option<String>,
    pub location_group_id: Option<i64>,
    pub location_group_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub checked_out_before: Option<DateTime<Utc>>,
    pub checked_out_after: Option<DateTime<Utc>>,
    /// `Some(true)` keeps only checked out children, `Some(false)` only those still present.
    pub checked_out: Option<bool>,
    pub limit: Option<i64>,
}

pub async fn list_checkins<'e, E>(
    executor: E,
    filter: &CheckinFilter,
) -> Result<Vec<Checkin>, QueryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut builder = QueryBuilder::<Sqlite>::new(
        r"
        SELECT
            checkins.id,
            checkins.external_id,
            checkins.location_id,
            checkins.first_name,
            checkins.last_name,
            checkins.security_code,
            checkins.checked_out_at
        FROM checkins
        ",
    );

    let join_groups = filter.location_group_name.is_some();
    let join_locations =
        join_groups || filter.location_name.is_some() || filter.location_group_id.is_some();
    if join_locations {
        builder.push(" JOIN locations ON locations.id = checkins.location_id");
    }
    if join_groups {
        builder.push(" JOIN location_groups ON location_groups.id = locations.location_group_id");
    }

    builder.push(" WHERE 1 = 1");

    if let Some(id) = filter.id {
        builder.push(" AND checkins.id = ").push_bind(id);
    }
    if let Some(external_id) = &filter.external_id {
        builder
            .push(" AND checkins.external_id = ")
            .push_bind(external_id.clone());
    }
    if let Some(location_id) = filter.location_id {
        builder
            .push(" AND checkins.location_id = ")
            .push_bind(location_id);
    }
    if let Some(location_name) = &filter.location_name {
        builder
            .push(" AND locations.name = ")
            .push_bind(location_name.clone());
    }
    if let Some(group_id) = filter.location_group_id {
        builder
            .push(" AND locations.location_group_id = ")
            .push_bind(group_id);
    }
    if let Some(group_name) = &filter.location_group_name {
        builder
            .push(" AND location_groups.name = ")
            .push_bind(group_name.clone());
    }
    if let Some(first_name) = &filter.first_name {
        builder
            .push(" AND checkins.first_name = ")
            .push_bind(first_name.clone());
    }
    if let Some(last_name) = &filter.last_name {
        builder
            .push(" AND checkins.last_name = ")
            .push_bind(last_name.clone());
    }
    if let Some(before) = filter.checked_out_before {
        builder
            .push(" AND checkins.checked_out_at < ")
            .push_bind(before);
    }
    if let Some(after) = filter.checked_out_after {
        builder
            .push(" AND checkins.checked_out_at > ")
            .push_bind(after);
    }
    match filter.checked_out {
        Some(true) => {
            builder.push(" AND checkins.checked_out_at IS NOT NULL");
        }
        Some(false) => {
            builder.push(" AND checkins.checked_out_at IS NULL");
        }
        None => {}
    }

    builder.push(" ORDER BY checkins.id");
    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ").push_bind(limit);
    }

    builder
        .build_query_as::<Checkin>()
        .fetch_all(executor)
        .await
        .map_err(QueryError::from)
}

/// Upserts a check-in by `external_id`. On conflict only `checked_out_at` changes; the
/// names and security code first recorded for the event are kept.
pub async fn create_checkin<'e, E>(executor: E, checkin: Checkin) -> Result<Checkin, QueryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Checkin>(
        r"
        INSERT INTO checkins (
            external_id,
            location_id,
            first_name,
            last_name,
            security_code,
            checked_out_at
        )
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (external_id) DO UPDATE
        SET checked_out_at = excluded.checked_out_at
        RETURNING id, external_id, location_id, first_name, last_name, security_code, checked_out_at
        ",
    )
    .bind(checkin.external_id)
    .bind(checkin.location_id)
    .bind(checkin.first_name)
    .bind(checkin.last_name)
    .bind(checkin.security_code)
    .bind(checkin.checked_out_at)
    .fetch_one(executor)
    .await
    .map_err(QueryError::from)
}
