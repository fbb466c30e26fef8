use chrono::{DateTime, Utc};

#[derive(Debug, sqlx::FromRow, Clone, Default, PartialEq, Eq)]
pub struct LocationGroup {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, sqlx::FromRow, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub id: i64,
    pub external_id: String,
    pub parent_external_id: Option<String>,
    pub location_group_id: Option<i64>,
    pub name: String,
    pub auto_fetch: bool,
    /// Latest checkout already ingested for this location. `None` until the first sync
    /// that sees a checkout.
    pub last_checked_out_at: Option<DateTime<Utc>>,
}

/// A child's check-in at a location. `checked_out_at` stays `None` while the child is
/// still in the room.
#[derive(Debug, sqlx::FromRow, Clone, Default, PartialEq, Eq)]
pub struct Checkin {
    pub id: i64,
    pub external_id: String,
    pub location_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub security_code: String,
    pub checked_out_at: Option<DateTime<Utc>>,
}

impl Checkin {
    pub const fn is_checked_out(&self) -> bool {
        self.checked_out_at.is_some()
    }
}
