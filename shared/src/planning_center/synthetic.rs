use crate::planning_center::{
    Checkout, SourceClient, SourceError, SourceLocation, order_hierarchy, validate_fetch_bounds,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const FIRST_NAMES: &[&str] = &[
    "Steve", "John", "Jane", "Matthew", "Robert", "Joseph", "David", "Richard", "Thomas",
    "Charles", "William", "Emma", "Alice", "Oliver", "Isabella", "Sophia", "Elizabeth", "Mia",
    "Amelia", "Lucas", "Henry", "Grace", "Noah", "Ava",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Wilson", "Anderson", "Taylor", "Moore", "Jackson",
    "Martin", "Lee", "Thompson", "White", "Harris", "Clark", "Lewis",
];

const CHILD_ROOMS: &[&str] = &["Nursery", "Toddlers", "Preschool", "Elementary"];

/// Deterministic stand-in for the Check-Ins API used in demo and test mode.
///
/// Each location keeps a roster of children currently in the room. A fetch either
/// checks in one or two new children (no checkout time) or checks out up to half of the
/// roster at the current time. The same seed always produces the same sequence of
/// names, ids and security codes.
#[derive(Debug)]
pub struct SyntheticSource {
    state: Mutex<SyntheticState>,
}

#[derive(Debug)]
struct SyntheticState {
    rng: StdRng,
    present: HashMap<String, Vec<Checkout>>,
}

impl SyntheticSource {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(SyntheticState {
                rng: StdRng::seed_from_u64(seed),
                present: HashMap::new(),
            }),
        }
    }

    /// Number of children currently checked in at `location_id`.
    pub fn present_count(&self, location_id: &str) -> usize {
        self.state
            .lock()
            .present
            .get(location_id)
            .map_or(0, Vec::len)
    }

    /// Puts children already stored as present back into the roster, so a restarted
    /// demo keeps checking out children admitted by an earlier run.
    pub fn restore_present(&self, location_id: &str, children: impl IntoIterator<Item = Checkout>) {
        let mut state = self.state.lock();
        let roster = state.present.entry(location_id.to_string()).or_default();
        for child in children {
            if !roster.iter().any(|present| present.id == child.id) {
                roster.push(Checkout {
                    checked_out_at: None,
                    ..child
                });
            }
        }
    }

    fn next_events(&self, location_id: &str, now: DateTime<Utc>, limit: usize) -> Vec<Checkout> {
        let cap = if limit == 0 { usize::MAX } else { limit };
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let roster = state.present.entry(location_id.to_string()).or_default();

        if !roster.is_empty() && state.rng.random_bool(0.5) {
            roster.sort_by(|a, b| a.security_code.cmp(&b.security_code));
            let count = (roster.len() / 2).clamp(1, cap);
            return roster
                .drain(..count)
                .map(|mut child| {
                    child.checked_out_at = Some(now);
                    child
                })
                .collect();
        }

        let arrivals = state.rng.random_range(1..=2).min(cap);
        let children: Vec<Checkout> = (0..arrivals)
            .map(|_| new_child(&mut state.rng))
            .collect();
        roster.extend(children.iter().cloned());
        children
    }
}

fn new_child(rng: &mut StdRng) -> Checkout {
    let id = Uuid::from_u128(rng.random());
    let security_code = id.simple().to_string()[..4].to_uppercase();
    Checkout {
        id: format!("pcloc_{id}"),
        first_name: FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())].to_string(),
        last_name: LAST_NAMES[rng.random_range(0..LAST_NAMES.len())].to_string(),
        security_code,
        checked_out_at: None,
    }
}

impl SourceClient for SyntheticSource {
    async fn fetch_checkouts(
        &self,
        location_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Checkout>, SourceError> {
        validate_fetch_bounds(since, limit)?;
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let mut events = self.next_events(location_id, Utc::now(), limit);
        if let Some(since) = since {
            events.retain(|event| event.checked_out_at.is_none_or(|at| at >= since));
        }
        Ok(events)
    }

    async fn fetch_location_hierarchy(
        &self,
        location_id: &str,
        include_descendants: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceLocation>, SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let root = SourceLocation {
            id: location_id.to_string(),
            parent_id: None,
            name: "Kids Ministry".to_string(),
        };
        if !include_descendants {
            return Ok(vec![root]);
        }

        let rooms = CHILD_ROOMS
            .iter()
            .enumerate()
            .map(|(i, name)| SourceLocation {
                id: format!("{location_id}-{}", i + 1),
                parent_id: Some(location_id.to_string()),
                name: (*name).to_string(),
            });
        Ok(order_hierarchy(std::iter::once(root).chain(rooms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(source: &SyntheticSource, location_id: &str, calls: usize) -> Vec<Checkout> {
        let cancel = CancellationToken::new();
        let mut all = Vec::new();
        for _ in 0..calls {
            all.extend(
                source
                    .fetch_checkouts(location_id, None, 10, &cancel)
                    .await
                    .unwrap(),
            );
        }
        all
    }

    #[tokio::test]
    async fn same_seed_produces_same_children() {
        let a = drain(&SyntheticSource::new(7), "loc", 5).await;
        let b = drain(&SyntheticSource::new(7), "loc", 5).await;

        let strip = |events: Vec<Checkout>| {
            events
                .into_iter()
                .map(|e| (e.id, e.first_name, e.last_name, e.security_code, e.checked_out_at.is_some()))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(a), strip(b));
    }

    #[tokio::test]
    async fn checkouts_only_release_children_that_were_checked_in() {
        let source = SyntheticSource::new(42);
        let events = drain(&source, "loc", 40).await;

        let mut checked_in = std::collections::HashSet::new();
        let mut checked_out = 0;
        for event in &events {
            if event.checked_out_at.is_some() {
                assert!(checked_in.contains(&event.id), "checked out a stranger");
                checked_out += 1;
            } else {
                assert!(checked_in.insert(event.id.clone()), "duplicate check-in id");
                assert_eq!(event.security_code.len(), 4);
            }
        }
        assert!(checked_out > 0);
        assert_eq!(source.present_count("loc"), checked_in.len() - checked_out);
    }

    #[tokio::test]
    async fn restored_children_are_checked_out_later() {
        let source = SyntheticSource::new(9);
        let earlier_run = Checkout {
            id: "pcloc_restored".to_string(),
            first_name: "Ava".to_string(),
            last_name: "Lee".to_string(),
            security_code: "0000".to_string(),
            checked_out_at: None,
        };
        source.restore_present("loc", [earlier_run.clone(), earlier_run]);
        assert_eq!(source.present_count("loc"), 1);

        let events = drain(&source, "loc", 20).await;
        assert!(
            events
                .iter()
                .any(|e| e.id == "pcloc_restored" && e.checked_out_at.is_some())
        );
    }

    #[tokio::test]
    async fn rejects_unbounded_requests() {
        let source = SyntheticSource::new(1);
        let result = source
            .fetch_checkouts("loc", None, 0, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(SourceError::Validation(_))));
        assert_eq!(source.present_count("loc"), 0);
    }

    #[tokio::test]
    async fn hierarchy_lists_root_then_rooms() {
        let source = SyntheticSource::new(1);
        let cancel = CancellationToken::new();

        let only_root = source
            .fetch_location_hierarchy("100", false, &cancel)
            .await
            .unwrap();
        assert_eq!(only_root.len(), 1);

        let tree = source
            .fetch_location_hierarchy("100", true, &cancel)
            .await
            .unwrap();
        let names: Vec<&str> = tree.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Kids Ministry", "Elementary", "Nursery", "Preschool", "Toddlers"]
        );
        assert!(tree[1..].iter().all(|l| l.parent_id.as_deref() == Some("100")));
    }
}
