use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};
use crate::types::{AssetId, SiteId};

/// An exposed asset. `values`, `deductibles` and `insured_limits` are
/// indexed by loss type; deductibles and limits are fractions of value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub aid: AssetId,
    pub site: SiteId,
    pub values: Vec<f64>,
    pub deductibles: Vec<f64>,
    pub insured_limits: Vec<f64>,
}

impl Asset {
    /// Fully uninsured-style asset: no deductible, limit equal to value.
    pub fn new(aid: AssetId, site: SiteId, values: Vec<f64>) -> Self {
        let n = values.len();
        Asset { aid, site, values, deductibles: vec![0.0; n], insured_limits: vec![1.0; n] }
    }
}

#[derive(Debug, Clone)]
pub struct AssetCollection {
    assets: Vec<Asset>,
    units: Vec<String>,
}

impl AssetCollection {
    /// Asset ordinals must be exactly `0..A`; every asset needs one finite,
    /// non-negative value per loss type.
    pub fn new(mut assets: Vec<Asset>, num_loss_types: usize, units: Vec<String>) -> Result<Self> {
        assets.sort_by_key(|a| a.aid);
        for (i, asset) in assets.iter().enumerate() {
            if asset.aid.index() != i {
                return Err(RiskError::Data(format!(
                    "asset ordinals must be 0..{}, found {}",
                    assets.len(),
                    asset.aid.0
                )));
            }
            if asset.values.len() != num_loss_types
                || asset.deductibles.len() != num_loss_types
                || asset.insured_limits.len() != num_loss_types
            {
                return Err(RiskError::Data(format!(
                    "asset {} needs {num_loss_types} values, deductibles and limits",
                    asset.aid.0
                )));
            }
            if asset.values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(RiskError::Data(format!("asset {} has an invalid value", asset.aid.0)));
            }
        }
        if units.len() != num_loss_types {
            return Err(RiskError::Data(format!(
                "expected {num_loss_types} units, got {}",
                units.len()
            )));
        }
        Ok(AssetCollection { assets, units })
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, aid: AssetId) -> Result<&Asset> {
        self.assets.get(aid.index()).ok_or(RiskError::IndexOutOfRange {
            kind: "asset",
            index: aid.index(),
            len: self.assets.len(),
        })
    }

    pub fn value(&self, aid: AssetId, loss_type: usize) -> Result<f64> {
        let asset = self.get(aid)?;
        asset.values.get(loss_type).copied().ok_or(RiskError::IndexOutOfRange {
            kind: "loss type",
            index: loss_type,
            len: asset.values.len(),
        })
    }

    pub fn num_loss_types(&self) -> usize {
        self.units.len()
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }

    /// Asset ids grouped by site, both in ascending order.
    pub fn assets_by_site(&self) -> BTreeMap<SiteId, Vec<AssetId>> {
        let mut by_site: BTreeMap<SiteId, Vec<AssetId>> = BTreeMap::new();
        for asset in &self.assets {
            by_site.entry(asset.site).or_default().push(asset.aid);
        }
        by_site
    }
}

/// Insured share of a ground-up loss ratio: the part above the deductible,
/// capped at the insured limit.
pub fn insured_loss_ratio(ratio: f64, deductible: f64, limit: f64) -> f64 {
    (ratio.min(limit) - deductible).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(aid: u32, site: u32) -> Asset {
        Asset::new(AssetId(aid), SiteId(site), vec![1000.0])
    }

    #[test]
    fn assets_grouped_by_site() {
        let assets = AssetCollection::new(
            vec![asset(2, 1), asset(0, 1), asset(1, 0)],
            1,
            vec!["EUR".to_string()],
        )
        .unwrap();
        let by_site = assets.assets_by_site();
        assert_eq!(by_site[&SiteId(0)], vec![AssetId(1)]);
        assert_eq!(by_site[&SiteId(1)], vec![AssetId(0), AssetId(2)]);
    }

    #[test]
    fn sparse_ordinals_rejected() {
        let err = AssetCollection::new(vec![asset(0, 0), asset(3, 0)], 1, vec!["EUR".to_string()]);
        assert!(matches!(err, Err(RiskError::Data(_))));
    }

    #[test]
    fn value_lookup_is_bounds_checked() {
        let assets = AssetCollection::new(vec![asset(0, 0)], 1, vec!["EUR".to_string()]).unwrap();
        assert_eq!(assets.value(AssetId(0), 0).unwrap(), 1000.0);
        assert!(assets.value(AssetId(1), 0).is_err());
        assert!(assets.value(AssetId(0), 1).is_err());
    }

    #[test]
    fn insured_ratio_applies_deductible_and_limit() {
        assert_eq!(insured_loss_ratio(0.05, 0.1, 0.8), 0.0);
        assert!((insured_loss_ratio(0.5, 0.1, 0.8) - 0.4).abs() < 1e-12);
        assert!((insured_loss_ratio(0.95, 0.1, 0.8) - 0.7).abs() < 1e-12);
    }
}
