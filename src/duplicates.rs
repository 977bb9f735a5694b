//! Duplicate detection across a staged batch and the user's existing holdings.
//!
//! Name-matched pairs are joined with a disjoint-set forest, so grouping is
//! transitive. Existing holdings never pair with each other; a group is only
//! reported when it has at least two members and one of them is staged.

use crate::config::DuplicateConfig;
use crate::error::{IngestError, Result};
use crate::schema::{
    ClassifiedAsset, DuplicateMatch, MatchType, PersistedAsset, RawAsset, StagedAsset,
};
use crate::utils::normalize_name;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use strsim::jaro_winkler;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Merge,
    KeepBoth,
    AskUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberOrigin {
    Staged,
    Existing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: String,
    pub origin: MemberOrigin,
    pub name: String,
    pub value: f64,
    pub source_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub members: Vec<GroupMember>,
    pub value_spread_pct: f64,
    pub recommendation: Recommendation,
}

impl DuplicateGroup {
    pub fn staged_ids(&self) -> Vec<Uuid> {
        self.members
            .iter()
            .filter(|m| m.origin == MemberOrigin::Staged)
            .filter_map(|m| Uuid::parse_str(&m.id).ok())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m.id == id)
    }
}

/// How the user settles a duplicate group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Resolution {
    KeepBoth,
    Merge,
    DeleteOne { ids: Vec<Uuid> },
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    /// Staged records whose content changed.
    pub affected: Vec<Uuid>,
    pub merged: Option<StagedAsset>,
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

struct Node<'a> {
    id: String,
    origin: MemberOrigin,
    asset: &'a RawAsset,
    normalized: String,
    ignored: &'a [String],
}

impl Node<'_> {
    fn member(&self) -> GroupMember {
        GroupMember {
            id: self.id.clone(),
            origin: self.origin,
            name: self.asset.name.clone(),
            value: self.asset.current_value,
            source_file: self.asset.source_file.clone(),
        }
    }

    fn ignores(&self, other: &Node<'_>) -> bool {
        self.ignored.iter().any(|id| *id == other.id)
    }
}

pub struct DuplicateDetector {
    config: DuplicateConfig,
}

impl DuplicateDetector {
    pub fn new(config: DuplicateConfig) -> Self {
        Self { config }
    }

    pub fn name_similarity(&self, a: &str, b: &str) -> f64 {
        let (a, b) = (normalize_name(a), normalize_name(b));
        if a == b {
            1.0
        } else {
            jaro_winkler(&a, &b)
        }
    }

    pub fn value_tolerance(&self, a: f64, b: f64) -> f64 {
        self.config
            .value_tolerance
            .max(self.config.value_tolerance_pct / 100.0 * a.max(b))
    }

    fn values_match(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.value_tolerance(a, b)
    }

    pub fn match_type(&self, a: &RawAsset, b: &RawAsset) -> MatchType {
        let same_identifier = same_code(&a.isin, &b.isin) || same_code(&a.ticker_symbol, &b.ticker_symbol);
        let values_match = self.values_match(a.current_value, b.current_value);
        let same_quantity = match (a.quantity, b.quantity) {
            (Some(x), Some(y)) => (x - y).abs() < 1e-9,
            (None, None) => true,
            _ => false,
        };

        if same_identifier || (normalize_name(&a.name) == normalize_name(&b.name) && values_match && same_quantity) {
            MatchType::Exact
        } else if values_match {
            MatchType::NameAndValue
        } else {
            MatchType::Name
        }
    }

    /// Spread of the group's values as a percentage of their mean.
    pub fn recommend(&self, values: &[f64]) -> (f64, Recommendation) {
        if values.is_empty() {
            return (0.0, Recommendation::AskUser);
        }
        let max = values.iter().cloned().fold(f64::MIN, f64::max);
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        let pct = if avg > 0.0 { 100.0 * (max - min) / avg } else { 0.0 };

        let recommendation = if pct <= self.config.merge_spread_pct {
            Recommendation::Merge
        } else if pct > self.config.keep_both_spread_pct {
            Recommendation::KeepBoth
        } else {
            Recommendation::AskUser
        };
        (pct, recommendation)
    }

    fn nodes<'a>(&self, staged: &'a [StagedAsset], existing: &'a [PersistedAsset]) -> Result<Vec<Node<'a>>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut nodes = Vec::new();

        for asset in staged.iter().filter(|s| s.is_active() && s.is_selected) {
            nodes.push(Node {
                id: asset.id.to_string(),
                origin: MemberOrigin::Staged,
                asset: &asset.classified.asset,
                normalized: normalize_name(asset.name()),
                ignored: &asset.ignored_duplicates,
            });
        }
        for asset in existing {
            nodes.push(Node {
                id: asset.id.clone(),
                origin: MemberOrigin::Existing,
                asset: &asset.asset.asset,
                normalized: normalize_name(&asset.asset.asset.name),
                ignored: &[],
            });
        }

        for node in &nodes {
            if !seen.insert(node.id.clone()) {
                return Err(IngestError::DuplicateDetectionError(format!(
                    "record id {} appears more than once",
                    node.id
                )));
            }
            if !node.asset.current_value.is_finite() || node.asset.current_value < 0.0 {
                return Err(IngestError::DuplicateDetectionError(format!(
                    "record {} has invalid value {}",
                    node.id, node.asset.current_value
                )));
            }
        }
        Ok(nodes)
    }

    fn is_pair(&self, a: &Node<'_>, b: &Node<'_>) -> bool {
        if a.origin == MemberOrigin::Existing && b.origin == MemberOrigin::Existing {
            return false;
        }
        if a.ignores(b) || b.ignores(a) {
            return false;
        }
        if same_code(&a.asset.isin, &b.asset.isin) {
            return true;
        }
        let similarity = if a.normalized == b.normalized {
            1.0
        } else {
            jaro_winkler(&a.normalized, &b.normalized)
        };
        !a.normalized.is_empty() && similarity >= self.config.name_similarity_threshold
    }

    fn components(&self, nodes: &[Node<'_>]) -> Vec<Vec<usize>> {
        let mut sets = DisjointSet::new(nodes.len());
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                if self.is_pair(&nodes[i], &nodes[j]) {
                    sets.union(i, j);
                }
            }
        }

        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..nodes.len() {
            let root = sets.find(i);
            by_root.entry(root).or_default().push(i);
        }

        let mut groups: Vec<Vec<usize>> = by_root
            .into_values()
            .filter(|members| {
                members.len() >= 2 && members.iter().any(|&i| nodes[i].origin == MemberOrigin::Staged)
            })
            .collect();
        groups.sort_by_key(|members| members[0]);
        groups
    }

    /// Groups active, selected staged records with each other and with existing holdings.
    pub fn detect(&self, staged: &[StagedAsset], existing: &[PersistedAsset]) -> Result<Vec<DuplicateGroup>> {
        let nodes = self.nodes(staged, existing)?;
        let components = self.components(&nodes);
        let groups = self.groups_from(&nodes, components);

        if !groups.is_empty() {
            info!("Found {} duplicate groups", groups.len());
        }
        Ok(groups)
    }

    /// Recomputes `is_duplicate` and `duplicate_matches` on every staged record.
    pub fn annotate(&self, staged: &mut [StagedAsset], existing: &[PersistedAsset]) -> Result<Vec<DuplicateGroup>> {
        let mut matches: HashMap<String, Vec<DuplicateMatch>> = HashMap::new();
        let groups = {
            let nodes = self.nodes(staged, existing)?;
            let components = self.components(&nodes);

            for members in &components {
                for &i in members {
                    if nodes[i].origin != MemberOrigin::Staged {
                        continue;
                    }
                    let found: Vec<DuplicateMatch> = members
                        .iter()
                        .filter(|&&j| j != i && !nodes[i].ignores(&nodes[j]) && !nodes[j].ignores(&nodes[i]))
                        .map(|&j| DuplicateMatch {
                            candidate_id: nodes[j].id.clone(),
                            candidate_name: nodes[j].asset.name.clone(),
                            candidate_value: nodes[j].asset.current_value,
                            candidate_source: nodes[j].asset.source_file.clone(),
                            similarity_score: self.name_similarity(&nodes[i].asset.name, &nodes[j].asset.name),
                            match_type: self.match_type(nodes[i].asset, nodes[j].asset),
                        })
                        .collect();
                    matches.insert(nodes[i].id.clone(), found);
                }
            }
            self.groups_from(&nodes, components)
        };

        for asset in staged.iter_mut() {
            let found = matches.remove(&asset.id.to_string()).unwrap_or_default();
            asset.is_duplicate = !found.is_empty();
            asset.duplicate_matches = found;
        }
        debug!("Annotated {} staged assets", staged.len());
        Ok(groups)
    }

    fn groups_from(&self, nodes: &[Node<'_>], components: Vec<Vec<usize>>) -> Vec<DuplicateGroup> {
        components
            .into_iter()
            .map(|members| {
                let values: Vec<f64> = members.iter().map(|&i| nodes[i].asset.current_value).collect();
                let (value_spread_pct, recommendation) = self.recommend(&values);
                DuplicateGroup {
                    members: members.iter().map(|&i| nodes[i].member()).collect(),
                    value_spread_pct,
                    recommendation,
                }
            })
            .collect()
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DuplicateConfig::default())
    }
}

fn same_code(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => !a.trim().is_empty() && a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

/// Applies a resolution to the staged members of `group`.
pub fn apply_resolution(
    staged: &mut Vec<StagedAsset>,
    group: &DuplicateGroup,
    resolution: &Resolution,
) -> Result<ResolutionOutcome> {
    let ids = group.staged_ids();
    if ids.is_empty() {
        return Err(IngestError::InvalidResolution("group has no staged members".to_string()));
    }
    for id in &ids {
        if !staged.iter().any(|s| s.id == *id && s.is_active()) {
            return Err(IngestError::InvalidResolution(format!(
                "staged asset {} is no longer part of this session",
                id
            )));
        }
    }

    let clear = |asset: &mut StagedAsset| {
        asset.is_duplicate = false;
        asset.duplicate_matches.clear();
    };

    match resolution {
        Resolution::KeepBoth => {
            for asset in staged.iter_mut().filter(|s| ids.contains(&s.id)) {
                clear(asset);
            }
            Ok(ResolutionOutcome { affected: ids, merged: None })
        }
        Resolution::Ignore => {
            for asset in staged.iter_mut().filter(|s| ids.contains(&s.id)) {
                let own = asset.id.to_string();
                for member in group.members.iter().filter(|m| m.id != own) {
                    if !asset.ignored_duplicates.contains(&member.id) {
                        asset.ignored_duplicates.push(member.id.clone());
                    }
                }
                clear(asset);
            }
            Ok(ResolutionOutcome { affected: ids, merged: None })
        }
        Resolution::DeleteOne { ids: to_delete } => {
            if to_delete.is_empty() {
                return Err(IngestError::InvalidResolution("delete_one needs at least one id".to_string()));
            }
            if let Some(outsider) = to_delete.iter().find(|id| !ids.contains(id)) {
                return Err(IngestError::InvalidResolution(format!(
                    "{} is not a staged member of this group",
                    outsider
                )));
            }
            for asset in staged.iter_mut().filter(|s| ids.contains(&s.id)) {
                if to_delete.contains(&asset.id) {
                    asset.is_selected = false;
                }
                clear(asset);
            }
            Ok(ResolutionOutcome { affected: ids, merged: None })
        }
        Resolution::Merge => {
            if ids.len() < 2 {
                return Err(IngestError::InvalidResolution(
                    "merge needs at least two staged members".to_string(),
                ));
            }
            let members: Vec<&StagedAsset> = ids
                .iter()
                .filter_map(|id| staged.iter().find(|s| s.id == *id))
                .collect();
            let merged = smart_merge(&members)?;

            for asset in staged.iter_mut().filter(|s| ids.contains(&s.id)) {
                asset.merged_into = Some(merged.id);
                asset.is_selected = false;
                clear(asset);
            }
            let mut affected = ids;
            affected.push(merged.id);
            info!("Merged {} staged assets into {}", affected.len() - 1, merged.id);
            staged.push(merged.clone());
            Ok(ResolutionOutcome {
                affected,
                merged: Some(merged),
            })
        }
    }
}

/// Deterministic field-by-field merge of duplicate records.
pub fn smart_merge(members: &[&StagedAsset]) -> Result<StagedAsset> {
    let first = members
        .first()
        .ok_or_else(|| IngestError::InvalidResolution("nothing to merge".to_string()))?;

    let assets: Vec<&RawAsset> = members.iter().map(|m| &m.classified.asset).collect();

    let current_value: f64 = assets.iter().map(|a| a.current_value).sum();
    let quantities: Vec<f64> = assets.iter().filter_map(|a| a.quantity).collect();
    let quantity = if quantities.is_empty() {
        None
    } else {
        Some(quantities.iter().sum())
    };

    let mut name = &first.classified.asset.name;
    for asset in &assets {
        if asset.name.chars().count() > name.chars().count() {
            name = &asset.name;
        }
    }

    let mut strongest: &StagedAsset = first;
    for &member in members {
        if member.confidence() > strongest.confidence() {
            strongest = member;
        }
    }

    let earliest = assets
        .iter()
        .filter(|a| a.purchase_date.is_some())
        .min_by_key(|a| a.purchase_date);
    let (purchase_price, purchase_date) = match earliest {
        Some(a) => (a.purchase_price, a.purchase_date),
        None => (assets.iter().find_map(|a| a.purchase_price), None),
    };

    let raw = RawAsset {
        name: name.clone(),
        current_value,
        quantity,
        purchase_price,
        purchase_date,
        source_file: join_unique(assets.iter().map(|a| a.source_file.as_str()), ", "),
        isin: assets.iter().find_map(|a| non_blank(&a.isin)),
        ticker_symbol: assets.iter().find_map(|a| non_blank(&a.ticker_symbol)),
        exchange: assets.iter().find_map(|a| non_blank(&a.exchange)),
        notes: Some(join_unique(assets.iter().filter_map(|a| a.notes.as_deref()), " | "))
            .filter(|n| !n.is_empty()),
    };

    let mut classification = strongest.classified.classification.clone();
    classification.confidence_score = members
        .iter()
        .map(|m| m.confidence())
        .fold(classification.confidence_score, f64::max);

    let mut merged = StagedAsset::new(ClassifiedAsset {
        asset: raw,
        classification,
    });
    merged.is_duplicate = false;
    merged.is_edited = true;
    Ok(merged)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

fn join_unique<'a>(parts: impl Iterator<Item = &'a str>, separator: &str) -> String {
    let mut seen = Vec::new();
    for part in parts.flat_map(|p| p.split(separator)) {
        let part = part.trim();
        if !part.is_empty() && !seen.contains(&part) {
            seen.push(part);
        }
    }
    seen.join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AssetClass, Classification, RiskLevel, VerifiedVia};
    use chrono::NaiveDate;

    fn classified(name: &str, value: f64, source: &str, confidence: f64) -> ClassifiedAsset {
        ClassifiedAsset {
            asset: RawAsset::new(name, value, source),
            classification: Classification {
                asset_class: AssetClass::Equity,
                asset_subclass: "direct_equity".to_string(),
                risk_level: RiskLevel::High,
                expected_return_pct: 12.0,
                confidence_score: confidence,
                verified_via: VerifiedVia::Rule,
            },
        }
    }

    fn staged(name: &str, value: f64) -> StagedAsset {
        StagedAsset::new(classified(name, value, "a.csv", 0.8))
    }

    fn existing(id: &str, name: &str, value: f64) -> PersistedAsset {
        PersistedAsset {
            id: id.to_string(),
            snapshot_id: "snap-1".to_string(),
            asset: classified(name, value, "old.csv", 0.9),
        }
    }

    #[test]
    fn test_reliance_pair_recommends_merge_and_merges_value() {
        let detector = DuplicateDetector::default();
        let mut batch = vec![
            staged("Reliance Industries Ltd", 500000.0),
            staged("Reliance Industries Ltd", 510000.0),
        ];
        let groups = detector.detect(&batch, &[]).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].recommendation, Recommendation::Merge);
        assert!((groups[0].value_spread_pct - 1.98).abs() < 0.01);

        let outcome = apply_resolution(&mut batch, &groups[0], &Resolution::Merge).unwrap();
        let merged = outcome.merged.unwrap();
        assert_eq!(merged.value(), 1010000.0);
        assert!(!merged.is_duplicate);

        let live: Vec<&StagedAsset> = batch.iter().filter(|s| s.is_active() && s.is_selected).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, merged.id);
        assert!(batch[..2].iter().all(|s| s.merged_into == Some(merged.id)));
    }

    #[test]
    fn test_grouping_is_transitive() {
        let detector = DuplicateDetector::default();
        // a~b share an ISIN, b~c share a name, a and c share nothing
        let mut a = staged("RIL", 100.0);
        a.classified.asset.isin = Some("INE002A01018".to_string());
        let mut b = staged("Reliance Industries Ltd", 100.0);
        b.classified.asset.isin = Some("INE002A01018".to_string());
        let c = staged("Reliance Industries Ltd.", 100.0);
        assert!(detector.name_similarity(a.name(), c.name()) < 0.92);

        let groups = detector.detect(&[a, b, c], &[]).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 3);
    }

    #[test]
    fn test_union_find_joins_chains() {
        let mut sets = DisjointSet::new(4);
        sets.union(0, 1);
        sets.union(2, 1);
        assert_eq!(sets.find(0), sets.find(2));
        assert_ne!(sets.find(0), sets.find(3));
    }

    #[test]
    fn test_existing_holdings_only_pair_with_staged() {
        let detector = DuplicateDetector::default();
        let held = vec![
            existing("p1", "Gold ETF", 1000.0),
            existing("p2", "Gold ETF", 1000.0),
        ];
        assert!(detector.detect(&[], &held).unwrap().is_empty());

        let batch = vec![staged("Gold ETF", 3000.0)];
        let groups = detector.detect(&batch, &held).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 3);
        assert_eq!(groups[0].recommendation, Recommendation::KeepBoth);
    }

    #[test]
    fn test_recommendation_bands() {
        let detector = DuplicateDetector::default();
        assert_eq!(detector.recommend(&[100.0, 105.0]).1, Recommendation::Merge);
        assert_eq!(detector.recommend(&[100.0, 130.0]).1, Recommendation::AskUser);
        assert_eq!(detector.recommend(&[100.0, 200.0]).1, Recommendation::KeepBoth);
    }

    #[test]
    fn test_match_types() {
        let detector = DuplicateDetector::default();
        let a = RawAsset::new("Infosys Ltd", 1000.0, "a.csv").with_quantity(10.0);
        let b = RawAsset::new("Infosys Ltd", 1000.5, "b.csv").with_quantity(10.0);
        assert_eq!(detector.match_type(&a, &b), MatchType::Exact);

        let c = RawAsset::new("Infosys Limited", 1000.0, "b.csv");
        assert_eq!(detector.match_type(&a, &c), MatchType::NameAndValue);

        let d = RawAsset::new("Infosys Ltd", 2000.0, "b.csv");
        assert_eq!(detector.match_type(&a, &d), MatchType::Name);

        let e = RawAsset::new("INFY", 5.0, "c.csv").with_isin("INE009A01021");
        let f = RawAsset::new("Infosys", 9.0, "d.csv").with_isin("ine009a01021");
        assert_eq!(detector.match_type(&e, &f), MatchType::Exact);
    }

    #[test]
    fn test_relative_tolerance_scales_with_value() {
        let detector = DuplicateDetector::new(DuplicateConfig {
            value_tolerance_pct: 0.5,
            ..Default::default()
        });
        assert!(detector.values_match(1_000_000.0, 1_004_000.0));
        assert!(!detector.values_match(100.0, 102.0));
    }

    #[test]
    fn test_annotate_flags_and_ignore_suppresses() {
        let detector = DuplicateDetector::default();
        let mut batch = vec![staged("Axis Bluechip Fund", 100.0), staged("Axis Bluechip Fund", 300.0)];

        let groups = detector.annotate(&mut batch, &[]).unwrap();
        assert!(batch.iter().all(|s| s.is_duplicate));
        assert_eq!(batch[0].duplicate_matches[0].candidate_id, batch[1].id.to_string());
        assert_eq!(groups[0].recommendation, Recommendation::KeepBoth);

        apply_resolution(&mut batch, &groups[0], &Resolution::Ignore).unwrap();
        assert!(batch.iter().all(|s| !s.is_duplicate));

        let groups = detector.annotate(&mut batch, &[]).unwrap();
        assert!(groups.is_empty());
        assert!(batch.iter().all(|s| !s.is_duplicate));
    }

    #[test]
    fn test_delete_one_deselects_named_member() {
        let detector = DuplicateDetector::default();
        let mut batch = vec![staged("PPF Account", 100.0), staged("PPF Account", 100.0)];
        let groups = detector.annotate(&mut batch, &[]).unwrap();
        let victim = batch[1].id;

        apply_resolution(&mut batch, &groups[0], &Resolution::DeleteOne { ids: vec![victim] }).unwrap();
        assert!(batch[0].is_selected);
        assert!(!batch[1].is_selected);
        assert!(!batch[0].is_duplicate);

        let outsider = Uuid::new_v4();
        let err = apply_resolution(&mut batch, &groups[0], &Resolution::DeleteOne { ids: vec![outsider] });
        assert!(matches!(err, Err(IngestError::InvalidResolution(_))));
    }

    #[test]
    fn test_merge_needs_two_staged_members() {
        let detector = DuplicateDetector::default();
        let mut batch = vec![staged("Gold ETF", 1000.0)];
        let held = vec![existing("p1", "Gold ETF", 1000.0)];
        let groups = detector.detect(&batch, &held).unwrap();
        assert!(matches!(
            apply_resolution(&mut batch, &groups[0], &Resolution::Merge),
            Err(IngestError::InvalidResolution(_))
        ));
    }

    #[test]
    fn test_smart_merge_field_rules() {
        let mut a = staged("Reliance", 500.0);
        a.classified.asset.quantity = Some(2.0);
        a.classified.asset.purchase_price = Some(200.0);
        a.classified.asset.purchase_date = NaiveDate::from_ymd_opt(2021, 6, 1);
        a.classified.asset.notes = Some("broker A".to_string());

        let mut b = StagedAsset::new(classified("Reliance Industries Ltd", 510.0, "b.csv", 0.95));
        b.classified.asset.quantity = Some(3.0);
        b.classified.asset.purchase_price = Some(150.0);
        b.classified.asset.purchase_date = NaiveDate::from_ymd_opt(2020, 1, 15);
        b.classified.asset.isin = Some("INE002A01018".to_string());
        b.classified.classification.asset_subclass = "large_cap_equity".to_string();
        b.classified.asset.notes = Some("broker A".to_string());

        let merged = smart_merge(&[&a, &b]).unwrap();
        let asset = &merged.classified.asset;
        assert_eq!(asset.current_value, 1010.0);
        assert_eq!(asset.quantity, Some(5.0));
        assert_eq!(asset.name, "Reliance Industries Ltd");
        assert_eq!(asset.purchase_price, Some(150.0));
        assert_eq!(asset.purchase_date, NaiveDate::from_ymd_opt(2020, 1, 15));
        assert_eq!(asset.isin.as_deref(), Some("INE002A01018"));
        assert_eq!(asset.source_file, "a.csv, b.csv");
        assert_eq!(asset.notes.as_deref(), Some("broker A"));
        assert_eq!(merged.classified.classification.asset_subclass, "large_cap_equity");
        assert_eq!(merged.confidence(), 0.95);
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let detector = DuplicateDetector::default();
        let a = staged("X", 1.0);
        let twin = a.clone();
        assert!(matches!(
            detector.detect(&[a, twin], &[]),
            Err(IngestError::DuplicateDetectionError(_))
        ));

        let bad = staged("Y", f64::NAN);
        assert!(matches!(
            detector.detect(&[bad], &[]),
            Err(IngestError::DuplicateDetectionError(_))
        ));
    }
}
