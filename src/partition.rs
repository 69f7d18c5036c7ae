//! Splits the asset × event × realization space into weighted shards.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{Result, RiskError};
use crate::events::EventIndex;
use crate::exposure::AssetCollection;
use crate::hazard::{GroundMotion, HazardSource};
use crate::types::{AssetId, RlzId, ShardId, SiteId};

/// One unit of parallel work.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskInput {
    pub id: ShardId,
    /// Realizations sharing `hazard`.
    pub rlzs: Vec<RlzId>,
    /// Sorted.
    pub aids: Vec<AssetId>,
    pub sites: Vec<SiteId>,
    /// Nonzero ground motions of `sites` under `rlzs`.
    pub hazard: Vec<GroundMotion>,
    /// Sorted global event positions with nonzero intensity somewhere in the shard.
    pub event_indices: Vec<usize>,
    pub weight: f64,
}

impl RiskInput {
    pub fn num_events(&self) -> usize {
        self.event_indices.len()
    }

    /// Local position of a global event position.
    pub fn local_event(&self, event_idx: usize) -> Option<usize> {
        self.event_indices.binary_search(&event_idx).ok()
    }
}

/// Assets of one site (or a chunk of them) with that site's ground motions.
struct Block {
    rlzs: Vec<RlzId>,
    site: SiteId,
    aids: Vec<AssetId>,
    hazard: Vec<GroundMotion>,
    event_indices: BTreeSet<usize>,
}

impl Block {
    fn weight(&self) -> f64 {
        (self.aids.len() * self.event_indices.len()) as f64
    }
}

pub struct Partitioner {
    max_weight: Option<f64>,
    concurrent_tasks: usize,
}

impl Partitioner {
    pub fn new(max_weight: Option<f64>, concurrent_tasks: usize) -> Self {
        Partitioner { max_weight, concurrent_tasks: concurrent_tasks.max(1) }
    }

    pub fn build_risk_inputs(
        &self,
        exposure: &AssetCollection,
        hazard: &dyn HazardSource,
        index: &EventIndex,
        num_rlzs: usize,
    ) -> Result<Vec<RiskInput>> {
        let groups = hazard.rlz_groups();
        check_rlz_groups(&groups, num_rlzs)?;
        let by_site = exposure.assets_by_site();
        let mut blocks = Vec::new();
        for group in groups {
            for (&site, aids) in &by_site {
                let mut gms = Vec::new();
                let mut event_indices = BTreeSet::new();
                for gm in hazard.ground_motions(site) {
                    if !group.contains(&gm.rlz) {
                        continue;
                    }
                    if !gm.gmv.is_finite() || gm.gmv < 0.0 {
                        return Err(RiskError::Data(format!(
                            "invalid ground motion {} at site {} for event {}",
                            gm.gmv, site.0, gm.eid.0
                        )));
                    }
                    if gm.gmv == 0.0 {
                        continue;
                    }
                    event_indices.insert(index.index_of(gm.eid)?);
                    gms.push(gm);
                }
                if gms.is_empty() {
                    continue;
                }
                blocks.push(Block {
                    rlzs: group.clone(),
                    site,
                    aids: aids.clone(),
                    hazard: gms,
                    event_indices,
                });
            }
        }

        let total: f64 = blocks.iter().map(Block::weight).sum();
        let max_weight = self
            .max_weight
            .unwrap_or_else(|| (total / self.concurrent_tasks as f64).ceil().max(1.0));
        debug!(blocks = blocks.len(), total_weight = total, max_weight, "partitioning");

        let blocks: Vec<Block> = blocks.into_iter().flat_map(|b| split_block(b, max_weight)).collect();
        Ok(pack(blocks, max_weight))
    }
}

/// Realization groups must partition `0..num_rlzs`: every ordinal in range
/// and in exactly one group.
fn check_rlz_groups(groups: &[Vec<RlzId>], num_rlzs: usize) -> Result<()> {
    let mut owner = vec![false; num_rlzs];
    for r in groups.iter().flatten() {
        let seen = owner.get_mut(r.index()).ok_or(RiskError::IndexOutOfRange {
            kind: "realization",
            index: r.index(),
            len: num_rlzs,
        })?;
        if *seen {
            return Err(RiskError::Data(format!("realization {} appears in more than one group", r.index())));
        }
        *seen = true;
    }
    if let Some(r) = owner.iter().position(|&seen| !seen) {
        return Err(RiskError::Data(format!("realization {r} is in no realization group")));
    }
    Ok(())
}

/// Split a block heavier than `max_weight` into asset chunks.
fn split_block(block: Block, max_weight: f64) -> Vec<Block> {
    if block.weight() <= max_weight || block.aids.len() < 2 {
        return vec![block];
    }
    let per_chunk = ((max_weight / block.event_indices.len() as f64).floor() as usize).max(1);
    block
        .aids
        .chunks(per_chunk)
        .map(|chunk| Block {
            rlzs: block.rlzs.clone(),
            site: block.site,
            aids: chunk.to_vec(),
            hazard: block.hazard.clone(),
            event_indices: block.event_indices.clone(),
        })
        .collect()
}

/// Greedy packing in block order; a shard never mixes realization groups.
fn pack(blocks: Vec<Block>, max_weight: f64) -> Vec<RiskInput> {
    let mut shards: Vec<RiskInput> = Vec::new();
    let mut current: Vec<Block> = Vec::new();
    let mut weight = 0.0;
    for block in blocks {
        let w = block.weight();
        let other_group = current.first().is_some_and(|b| b.rlzs != block.rlzs);
        if !current.is_empty() && (weight + w > max_weight || other_group) {
            shards.push(merge(ShardId(shards.len() as u32), std::mem::take(&mut current)));
            weight = 0.0;
        }
        weight += w;
        current.push(block);
    }
    if !current.is_empty() {
        shards.push(merge(ShardId(shards.len() as u32), current));
    }
    shards
}

fn merge(id: ShardId, blocks: Vec<Block>) -> RiskInput {
    let rlzs = blocks[0].rlzs.clone();
    let weight = blocks.iter().map(Block::weight).sum();
    let mut aids = Vec::new();
    let mut sites = Vec::new();
    let mut hazard = Vec::new();
    let mut event_indices = BTreeSet::new();
    for block in blocks {
        aids.extend(block.aids);
        if sites.last() != Some(&block.site) {
            sites.push(block.site);
            hazard.extend(block.hazard);
        }
        event_indices.extend(block.event_indices);
    }
    aids.sort_unstable();
    RiskInput { id, rlzs, aids, sites, hazard, event_indices: event_indices.into_iter().collect(), weight }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::events::{Event, Realization};
    use crate::exposure::Asset;
    use crate::hazard::StaticHazard;
    use crate::types::{EventId, RuptureId};

    fn exposure(sites: &[u32]) -> AssetCollection {
        let assets = sites
            .iter()
            .enumerate()
            .map(|(i, &s)| Asset::new(AssetId(i as u32), SiteId(s), vec![100.0]))
            .collect();
        AssetCollection::new(assets, 1, vec!["EUR".to_string()]).unwrap()
    }

    fn hazard(num_sites: u32, num_events: u64, num_rlzs: u16) -> StaticHazard {
        let events = (0..num_events).map(|e| Event { eid: EventId(e * 3), rup_id: RuptureId(e) }).collect();
        let mut gmfs = Vec::new();
        for site in 0..num_sites {
            for rlz in 0..num_rlzs {
                for e in 0..num_events {
                    // every third (site, event) pair has no shaking
                    let gmv = if (site as u64 + e) % 3 == 0 { 0.0 } else { 0.1 * (e + 1) as f64 };
                    gmfs.push(GroundMotion { site: SiteId(site), rlz: RlzId(rlz), eid: EventId(e * 3), gmv });
                }
            }
        }
        let rlzs = (0..num_rlzs).map(|r| Realization { ordinal: RlzId(r), weight: 1.0 }).collect();
        StaticHazard::new(events, gmfs, rlzs)
    }

    #[test]
    fn every_nonzero_triple_covered_exactly_once() {
        let exposure = exposure(&[0, 0, 1, 2, 2, 2, 3, 1, 0]);
        let hazard = hazard(4, 12, 2);
        let index = EventIndex::new(&hazard.events()).unwrap();
        let shards = Partitioner::new(Some(20.0), 1)
            .build_risk_inputs(&exposure, &hazard, &index, 2)
            .unwrap();
        assert!(shards.len() > 1, "expected the space to be split");

        let mut seen: HashMap<(AssetId, usize, RlzId), usize> = HashMap::new();
        for shard in &shards {
            for gm in &shard.hazard {
                let e = index.index_of(gm.eid).unwrap();
                for asset in exposure.iter().filter(|a| a.site == gm.site) {
                    if shard.aids.contains(&asset.aid) {
                        *seen.entry((asset.aid, e, gm.rlz)).or_default() += 1;
                    }
                }
            }
        }
        let mut expected = 0;
        for asset in exposure.iter() {
            for gm in hazard.ground_motions(asset.site).iter().filter(|g| g.gmv > 0.0) {
                let e = index.index_of(gm.eid).unwrap();
                expected += 1;
                assert_eq!(seen.get(&(asset.aid, e, gm.rlz)), Some(&1), "triple not covered once");
            }
        }
        assert_eq!(seen.len(), expected);
    }

    #[test]
    fn shard_weight_stays_below_target() {
        let exposure = exposure(&[0, 1, 2, 3, 0, 1, 2, 3]);
        let hazard = hazard(4, 10, 1);
        let index = EventIndex::new(&hazard.events()).unwrap();
        let shards = Partitioner::new(Some(15.0), 1)
            .build_risk_inputs(&exposure, &hazard, &index, 1)
            .unwrap();
        for shard in &shards {
            assert!(shard.weight <= 15.0, "shard {:?} weight {}", shard.id, shard.weight);
        }
        let ids: Vec<u32> = shards.iter().map(|s| s.id.0).collect();
        assert_eq!(ids, (0..shards.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn heavy_site_split_by_assets() {
        let exposure = exposure(&[0; 10]);
        let hazard = hazard(1, 6, 1);
        let index = EventIndex::new(&hazard.events()).unwrap();
        // site 0 shakes in 4 of 6 events: block weight 40
        let shards = Partitioner::new(Some(8.0), 1)
            .build_risk_inputs(&exposure, &hazard, &index, 1)
            .unwrap();
        assert_eq!(shards.len(), 5);
        assert!(shards.iter().all(|s| s.aids.len() == 2 && s.weight == 8.0));
    }

    #[test]
    fn weight_target_derived_from_concurrent_tasks() {
        let exposure = exposure(&[0, 1, 2, 3]);
        let hazard = hazard(4, 9, 1);
        let index = EventIndex::new(&hazard.events()).unwrap();
        let shards = Partitioner::new(None, 4).build_risk_inputs(&exposure, &hazard, &index, 1).unwrap();
        assert_eq!(shards.len(), 4);
    }

    #[test]
    fn unknown_event_in_hazard_is_a_data_error() {
        let exposure = exposure(&[0]);
        let events = vec![Event { eid: EventId(1), rup_id: RuptureId(1) }];
        let gmfs = vec![GroundMotion { site: SiteId(0), rlz: RlzId(0), eid: EventId(2), gmv: 0.3 }];
        let hazard = StaticHazard::new(events, gmfs, vec![Realization { ordinal: RlzId(0), weight: 1.0 }]);
        let index = EventIndex::new(&hazard.events()).unwrap();
        let err = Partitioner::new(None, 1).build_risk_inputs(&exposure, &hazard, &index, 1);
        assert!(matches!(err, Err(RiskError::Data(_))));
    }

    #[test]
    fn sites_without_shaking_produce_no_shards() {
        let exposure = exposure(&[5]);
        let hazard = hazard(2, 4, 1);
        let index = EventIndex::new(&hazard.events()).unwrap();
        let shards = Partitioner::new(None, 2).build_risk_inputs(&exposure, &hazard, &index, 1).unwrap();
        assert!(shards.is_empty());
    }

    /// Static hazard with explicit realization groups.
    struct Grouped(StaticHazard, Vec<Vec<RlzId>>);

    impl HazardSource for Grouped {
        fn events(&self) -> Vec<Event> {
            self.0.events()
        }

        fn ground_motions(&self, site: SiteId) -> Vec<GroundMotion> {
            self.0.ground_motions(site)
        }

        fn realizations(&self) -> Vec<Realization> {
            self.0.realizations()
        }

        fn rlz_groups(&self) -> Vec<Vec<RlzId>> {
            self.1.clone()
        }
    }

    #[test]
    fn overlapping_rlz_groups_rejected() {
        let exposure = exposure(&[0]);
        let hazard = Grouped(hazard(1, 3, 2), vec![vec![RlzId(0), RlzId(1)], vec![RlzId(1)]]);
        let index = EventIndex::new(&hazard.events()).unwrap();
        let err = Partitioner::new(None, 1).build_risk_inputs(&exposure, &hazard, &index, 2);
        assert!(matches!(err, Err(RiskError::Data(msg)) if msg.contains("more than one group")));
    }

    #[test]
    fn rlz_groups_must_cover_every_realization() {
        let exposure = exposure(&[0]);
        let hazard = Grouped(hazard(1, 3, 2), vec![vec![RlzId(0)]]);
        let index = EventIndex::new(&hazard.events()).unwrap();
        let err = Partitioner::new(None, 1).build_risk_inputs(&exposure, &hazard, &index, 2);
        assert!(matches!(err, Err(RiskError::Data(msg)) if msg.contains("no realization group")));

        let out_of_range = Grouped(hazard.0.clone(), vec![vec![RlzId(0), RlzId(1), RlzId(2)]]);
        let err = Partitioner::new(None, 1).build_risk_inputs(&exposure, &out_of_range, &index, 2);
        assert!(matches!(err, Err(RiskError::IndexOutOfRange { index: 2, .. })));
    }

    #[test]
    fn disjoint_rlz_groups_never_share_a_shard() {
        let exposure = exposure(&[0, 1]);
        let hazard = Grouped(hazard(2, 4, 2), vec![vec![RlzId(1)], vec![RlzId(0)]]);
        let index = EventIndex::new(&hazard.events()).unwrap();
        let shards = Partitioner::new(None, 1).build_risk_inputs(&exposure, &hazard, &index, 2).unwrap();
        assert!(shards.iter().all(|s| s.rlzs.len() == 1));
        assert!(shards.iter().all(|s| s.hazard.iter().all(|gm| s.rlzs.contains(&gm.rlz))));
    }
}
