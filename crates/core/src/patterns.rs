//! Case-pattern detection over keyword co-occurrence.
//!
//! Keywords sharing segments are linked when their pair count reaches
//! `min_co_occurrence`; connected components of that graph become
//! candidate patterns. Surviving components are deduplicated by a
//! signature over their sorted keyword ids.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use storage::models::{
    CasePattern, ExtractedKeyword, KeywordId, KeywordOccurrence, PatternId, PatternKeyword,
    PatternVersion, SegmentKind, SegmentRef,
};
use storage::{Repository, StorageError};
use tracing::{debug, info};

use crate::config::ClusteringConfig;

/// Order-independent identity of a keyword set.
pub fn pattern_signature(keyword_ids: &[KeywordId]) -> String {
    let mut ids = keyword_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    blake3::hash(joined.as_bytes()).to_hex().to_string()
}

pub fn confidence_score(
    keywords: usize,
    segments: usize,
    cross_type: bool,
    avg_relevance: f64,
) -> f64 {
    let score = (keywords as f64 / 10.0).min(1.0) * 0.3
        + (segments as f64 / 20.0).min(1.0) * 0.2
        + if cross_type { 0.3 } else { 0.0 }
        + (avg_relevance / 100.0).clamp(0.0, 1.0) * 0.2;
    score.min(1.0)
}

pub fn jaccard(a: &BTreeSet<KeywordId>, b: &BTreeSet<KeywordId>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Keyword graph with dense node indices.
#[derive(Debug, Default)]
pub struct CoOccurrenceGraph {
    ids: Vec<KeywordId>,
    index: HashMap<KeywordId, usize>,
    pair_counts: HashMap<(usize, usize), u32>,
}

impl CoOccurrenceGraph {
    fn node(&mut self, id: KeywordId) -> usize {
        if let Some(&node) = self.index.get(&id) {
            return node;
        }
        let node = self.ids.len();
        self.ids.push(id);
        self.index.insert(id, node);
        node
    }

    /// Count every unordered pair of distinct keywords in each segment.
    pub fn from_segments<'a, I>(segments: I) -> Self
    where
        I: IntoIterator<Item = &'a BTreeSet<KeywordId>>,
    {
        let mut graph = Self::default();
        for keywords in segments {
            let nodes: Vec<usize> = keywords.iter().map(|id| graph.node(*id)).collect();
            for (i, a) in nodes.iter().enumerate() {
                for b in &nodes[i + 1..] {
                    let pair = if a < b { (*a, *b) } else { (*b, *a) };
                    *graph.pair_counts.entry(pair).or_insert(0) += 1;
                }
            }
        }
        graph
    }

    pub fn pair_count(&self, a: KeywordId, b: KeywordId) -> u32 {
        match (self.index.get(&a), self.index.get(&b)) {
            (Some(&x), Some(&y)) => {
                let pair = if x < y { (x, y) } else { (y, x) };
                self.pair_counts.get(&pair).copied().unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Connected components over edges with `count >= min_co_occurrence`,
    /// each sorted by keyword id, keeping those of at least `min_size`.
    /// A keyword without qualifying edges is a component of one.
    pub fn components(&self, min_co_occurrence: u32, min_size: usize) -> Vec<Vec<KeywordId>> {
        let mut adjacency = vec![Vec::new(); self.ids.len()];
        for (&(a, b), &count) in &self.pair_counts {
            if count >= min_co_occurrence {
                adjacency[a].push(b);
                adjacency[b].push(a);
            }
        }

        let mut visited = vec![false; self.ids.len()];
        let mut components = Vec::new();
        for start in 0..self.ids.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut queue = VecDeque::from([start]);
            let mut members = Vec::new();
            while let Some(node) = queue.pop_front() {
                members.push(self.ids[node]);
                for &next in &adjacency[node] {
                    if !visited[next] {
                        visited[next] = true;
                        queue.push_back(next);
                    }
                }
            }
            if members.len() >= min_size.max(1) {
                members.sort_unstable();
                components.push(members);
            }
        }
        components.sort();
        components
    }
}

/// Read-side filter for [`CasePatternDetector::list_patterns`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PatternFilter {
    pub min_confidence: Option<f64>,
    pub cross_type_validated: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    pub components: usize,
    pub rejected: usize,
    pub patterns: Vec<CasePattern>,
}

#[derive(Debug, Clone, Default)]
pub struct CasePatternDetector {
    config: ClusteringConfig,
}

impl CasePatternDetector {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Corpus-wide detection pass. Qualifying clusters are upserted by
    /// signature; a repeat detection appends a version.
    pub async fn detect(&self, repo: &dyn Repository) -> Result<DetectionReport, StorageError> {
        let occurrences = repo.all_occurrences().await?;
        let keywords: HashMap<KeywordId, ExtractedKeyword> = repo
            .list_keywords()
            .await?
            .into_iter()
            .map(|k| (k.id, k))
            .collect();

        let by_segment = self.segment_keywords(&occurrences, &keywords);
        let graph = CoOccurrenceGraph::from_segments(by_segment.values());
        let components =
            graph.components(self.config.min_co_occurrence, self.config.min_keyword_count);
        debug!(
            segments = by_segment.len(),
            components = components.len(),
            "co-occurrence graph built"
        );

        let mut report = DetectionReport {
            components: components.len(),
            ..Default::default()
        };
        for members in components {
            let candidate = build_pattern(&members, &occurrences, &keywords);
            if candidate.confidence_score < self.config.min_confidence_score
                || (self.config.require_cross_type_validation && !candidate.cross_type_validated)
            {
                report.rejected += 1;
                continue;
            }
            report.patterns.push(upsert(repo, candidate).await?);
        }
        info!(
            components = report.components,
            surfaced = report.patterns.len(),
            rejected = report.rejected,
            "case pattern detection finished"
        );
        Ok(report)
    }

    /// Distinct keywords per segment, optionally trimmed to the most
    /// relevant `max_keywords_per_segment`.
    fn segment_keywords(
        &self,
        occurrences: &[KeywordOccurrence],
        keywords: &HashMap<KeywordId, ExtractedKeyword>,
    ) -> BTreeMap<SegmentRef, BTreeSet<KeywordId>> {
        let mut by_segment: BTreeMap<SegmentRef, BTreeSet<KeywordId>> = BTreeMap::new();
        for occ in occurrences {
            by_segment.entry(occ.segment).or_default().insert(occ.keyword_id);
        }
        if let Some(cap) = self.config.max_keywords_per_segment {
            let relevance = |id: &KeywordId| keywords.get(id).map_or(0.0, |k| k.relevance_score);
            for set in by_segment.values_mut() {
                if set.len() > cap {
                    let mut ranked: Vec<KeywordId> = set.iter().copied().collect();
                    ranked.sort_by(|a, b| relevance(b).total_cmp(&relevance(a)).then(a.cmp(b)));
                    *set = ranked.into_iter().take(cap).collect();
                }
            }
        }
        by_segment
    }

    pub async fn list_patterns(
        &self,
        repo: &dyn Repository,
        filter: PatternFilter,
    ) -> Result<Vec<CasePattern>, StorageError> {
        let mut patterns: Vec<CasePattern> = repo
            .list_case_patterns()
            .await?
            .into_iter()
            .filter(|p| filter.min_confidence.map_or(true, |min| p.confidence_score >= min))
            .filter(|p| filter.cross_type_validated.map_or(true, |v| p.cross_type_validated == v))
            .collect();
        patterns.sort_by(|a, b| b.confidence_score.total_cmp(&a.confidence_score));
        Ok(patterns)
    }

    /// Other patterns whose keyword sets overlap the given one with a
    /// Jaccard ratio of at least `min_ratio`, most similar first.
    pub async fn find_similar(
        &self,
        repo: &dyn Repository,
        id: PatternId,
        min_ratio: f64,
    ) -> Result<Vec<(CasePattern, f64)>, StorageError> {
        let target = repo
            .get_case_pattern(id)
            .await?
            .ok_or(StorageError::NotFound {
                entity: "case pattern",
                id,
            })?;
        let target_ids: BTreeSet<KeywordId> = target.keyword_ids().collect();

        let mut similar: Vec<(CasePattern, f64)> = repo
            .list_case_patterns()
            .await?
            .into_iter()
            .filter(|p| p.id != id)
            .map(|p| {
                let ids: BTreeSet<KeywordId> = p.keyword_ids().collect();
                let ratio = jaccard(&target_ids, &ids);
                (p, ratio)
            })
            .filter(|(_, ratio)| *ratio >= min_ratio)
            .collect();
        similar.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(similar)
    }
}

/// Pattern for one component, gathering every segment that holds any
/// member keyword.
fn build_pattern(
    members: &[KeywordId],
    occurrences: &[KeywordOccurrence],
    keywords: &HashMap<KeywordId, ExtractedKeyword>,
) -> CasePattern {
    let member_set: HashSet<KeywordId> = members.iter().copied().collect();
    let mut segments = BTreeSet::new();
    let mut files = HashSet::new();
    let mut frequency: HashMap<KeywordId, i64> = HashMap::new();
    for occ in occurrences.iter().filter(|o| member_set.contains(&o.keyword_id)) {
        segments.insert(occ.segment);
        files.insert(occ.file_id);
        *frequency.entry(occ.keyword_id).or_insert(0) += 1;
    }

    let kinds: HashSet<SegmentKind> = segments.iter().map(|s| s.kind).collect();
    let cross_type_validated =
        kinds.contains(&SegmentKind::Quantitative) && kinds.contains(&SegmentKind::Qualitative);
    let avg_relevance = members
        .iter()
        .map(|id| keywords.get(id).map_or(0.0, |k| k.relevance_score))
        .sum::<f64>()
        / members.len().max(1) as f64;

    let now = Utc::now();
    let confidence_score = confidence_score(
        members.len(),
        segments.len(),
        cross_type_validated,
        avg_relevance,
    );
    CasePattern {
        id: 0,
        signature: pattern_signature(members),
        keywords: members
            .iter()
            .map(|id| PatternKeyword {
                keyword_id: *id,
                term: keywords.get(id).map(|k| k.term.clone()).unwrap_or_default(),
                frequency: frequency.get(id).copied().unwrap_or(0),
            })
            .collect(),
        keyword_count: members.len(),
        segment_count: segments.len(),
        file_count: files.len(),
        segments: segments.into_iter().collect(),
        confidence_score,
        cross_type_validated,
        versions: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

async fn upsert(
    repo: &dyn Repository,
    mut pattern: CasePattern,
) -> Result<CasePattern, StorageError> {
    let previous = repo.find_case_pattern_by_signature(&pattern.signature).await?;
    if let Some(existing) = &previous {
        pattern.id = existing.id;
        pattern.created_at = existing.created_at;
        pattern.versions = existing.versions.clone();
    }
    pattern.versions.push(PatternVersion {
        version: pattern.versions.len() as u32 + 1,
        detected_at: pattern.updated_at,
        confidence_score: pattern.confidence_score,
        keyword_count: pattern.keyword_count,
        segment_count: pattern.segment_count,
    });
    let saved = repo.save_case_pattern(&pattern).await?;
    debug!(
        pattern_id = saved.id,
        version = saved.versions.len(),
        merged = previous.is_some(),
        "case pattern saved"
    );
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sets(groups: &[&[KeywordId]]) -> Vec<BTreeSet<KeywordId>> {
        groups.iter().map(|g| g.iter().copied().collect()).collect()
    }

    #[test]
    fn signature_ignores_order() {
        assert_eq!(pattern_signature(&[3, 1, 2]), pattern_signature(&[1, 2, 3]));
        assert_eq!(pattern_signature(&[2, 3, 1, 3]), pattern_signature(&[1, 2, 3]));
        assert_ne!(pattern_signature(&[1, 2, 3]), pattern_signature(&[1, 2, 4]));
        assert_eq!(pattern_signature(&[1]).len(), 64);
    }

    #[test]
    fn pair_counts_are_symmetric() {
        let segs = sets(&[&[1, 2, 3], &[2, 1], &[3]]);
        let graph = CoOccurrenceGraph::from_segments(&segs);
        assert_eq!(graph.pair_count(1, 2), 2);
        assert_eq!(graph.pair_count(2, 1), 2);
        assert_eq!(graph.pair_count(1, 3), 1);
        assert_eq!(graph.pair_count(1, 99), 0);
    }

    #[test]
    fn components_recover_synthetic_clusters() {
        let segs = sets(&[
            &[1, 2, 3],
            &[1, 2, 3],
            &[10, 11],
            &[10, 11],
            &[11, 12],
            &[11, 12],
            &[20, 21],
            &[5, 1],
        ]);
        let graph = CoOccurrenceGraph::from_segments(&segs);
        let components = graph.components(2, 2);
        assert_eq!(components, vec![vec![1, 2, 3], vec![10, 11, 12]]);
        assert_eq!(graph.components(2, 3).len(), 2);
        // keywords without a qualifying edge stand alone
        assert_eq!(
            graph.components(2, 1),
            vec![vec![1, 2, 3], vec![5], vec![10, 11, 12], vec![20], vec![21]]
        );
        assert_eq!(graph.components(1, 2).len(), 3);
    }

    #[test]
    fn pairs_never_form_a_pattern_with_min_size_three() {
        let segs = sets(&[&[1, 2], &[1, 2]]);
        let graph = CoOccurrenceGraph::from_segments(&segs);
        assert!(graph.components(2, 3).is_empty());
    }

    #[test]
    fn confidence_formula() {
        assert_eq!(confidence_score(10, 20, true, 100.0), 1.0);
        assert!((confidence_score(3, 4, false, 0.0) - (0.09 + 0.04)).abs() < 1e-12);
        assert!((confidence_score(5, 10, true, 50.0) - (0.15 + 0.1 + 0.3 + 0.1)).abs() < 1e-12);
        assert!(confidence_score(1000, 1000, true, 1e9) <= 1.0);
    }

    #[test]
    fn jaccard_overlap() {
        let a: BTreeSet<_> = [1, 2, 3].into_iter().collect();
        let b: BTreeSet<_> = [2, 3, 4].into_iter().collect();
        assert_eq!(jaccard(&a, &b), 0.5);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }
}
