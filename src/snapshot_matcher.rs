use crate::config::SnapshotConfig;
use crate::error::IngestError;
use crate::schema::{Snapshot, SnapshotMatchResult, SnapshotMatchType, SuggestedAction};
use crate::utils::{days_between, month_label, parse_flexible_date, short_month_name};
use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Files whose statement dates fall within one window, staged as one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityGroup<T> {
    pub items: Vec<T>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// The latest date in the group; used for matching and as the snapshot date.
    pub representative_date: NaiveDate,
    pub name: String,
}

pub struct SnapshotMatcher {
    config: SnapshotConfig,
}

impl SnapshotMatcher {
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    /// Nearest dated snapshot decides the proposal. Equal distances prefer
    /// the later statement date, then the lower id.
    pub fn match_date(&self, existing: &[Snapshot], candidate: NaiveDate) -> SnapshotMatchResult {
        let nearest = existing
            .iter()
            .filter_map(|s| s.statement_date.map(|d| (s, d, days_between(d, candidate))))
            .min_by(|(a, a_date, a_days), (b, b_date, b_days)| {
                a_days
                    .cmp(b_days)
                    .then_with(|| b_date.cmp(a_date))
                    .then_with(|| a.id.cmp(&b.id))
            });

        let Some((snapshot, _, days)) = nearest else {
            debug!("No dated snapshots to match {} against", candidate);
            return SnapshotMatchResult::none();
        };

        let (match_type, suggested_action) = if days == 0 {
            (SnapshotMatchType::Exact, SuggestedAction::Merge)
        } else if days <= self.config.close_tolerance_days {
            (SnapshotMatchType::Close, SuggestedAction::Prompt)
        } else {
            (SnapshotMatchType::None, SuggestedAction::CreateNew)
        };

        info!(
            "Statement date {} is {} days from snapshot {}: {:?}",
            candidate, days, snapshot.id, match_type
        );

        match match_type {
            SnapshotMatchType::None => SnapshotMatchResult {
                days_difference: Some(days),
                ..SnapshotMatchResult::none()
            },
            _ => SnapshotMatchResult {
                match_type,
                matched_snapshot_id: Some(snapshot.id.clone()),
                days_difference: Some(days),
                suggested_action,
            },
        }
    }

    /// Free-form date input; anything unparsable is treated as no match.
    pub fn match_date_str(&self, existing: &[Snapshot], candidate: &str) -> SnapshotMatchResult {
        match parse_flexible_date(candidate) {
            Some(date) => self.match_date(existing, date),
            None => {
                let err = IngestError::SnapshotMatchError(format!("invalid statement date '{}'", candidate));
                warn!("{}; proposing a new snapshot", err);
                SnapshotMatchResult::none()
            }
        }
    }

    /// Sorts by date and cuts a new group whenever a date falls more than
    /// `grouping_tolerance_days` after the current group's first date.
    pub fn group_by_proximity<T>(&self, dated: Vec<(T, NaiveDate)>) -> Vec<ProximityGroup<T>> {
        let mut dated = dated;
        dated.sort_by_key(|(_, date)| *date);

        let mut groups: Vec<ProximityGroup<T>> = Vec::new();
        for (item, date) in dated {
            match groups.last_mut() {
                Some(group) if days_between(date, group.start) <= self.config.grouping_tolerance_days => {
                    group.items.push(item);
                    group.end = date;
                    group.representative_date = date;
                }
                _ => groups.push(ProximityGroup {
                    items: vec![item],
                    start: date,
                    end: date,
                    representative_date: date,
                    name: String::new(),
                }),
            }
        }

        for group in &mut groups {
            group.name = group_name(group.start, group.end);
        }
        if groups.len() > 1 {
            info!("Split batch into {} statement-date groups", groups.len());
        }
        groups
    }
}

impl Default for SnapshotMatcher {
    fn default() -> Self {
        Self::new(SnapshotConfig::default())
    }
}

/// "November 2024", "Nov 20-27, 2024", "Nov 28 - Dec 3, 2024" or
/// "Dec 28, 2024 - Jan 3, 2025".
pub fn group_name(start: NaiveDate, end: NaiveDate) -> String {
    if start == end {
        return month_label(start);
    }
    if start.year() != end.year() {
        return format!(
            "{} {}, {} - {} {}, {}",
            short_month_name(start.month()),
            start.day(),
            start.year(),
            short_month_name(end.month()),
            end.day(),
            end.year()
        );
    }
    if start.month() == end.month() {
        format!(
            "{} {}-{}, {}",
            short_month_name(start.month()),
            start.day(),
            end.day(),
            start.year()
        )
    } else {
        format!(
            "{} {} - {} {}, {}",
            short_month_name(start.month()),
            start.day(),
            short_month_name(end.month()),
            end.day(),
            end.year()
        )
    }
}
