//! Event-based risk calculation: prepare, execute, post-process.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::array::DenseArray;
use crate::builder::{
    build_agg_curves, build_avg_losses, build_event_loss_table, build_loss_tables, build_maps, rlz_stats,
};
use crate::combine::Totals;
use crate::config::{Dims, MIN_EFF_TIME, RiskConfig};
use crate::curves::LossCurveBuilder;
use crate::engine::{self, ShardContext};
use crate::epsilon::{EpsilonMatrix, EpsilonSampler};
use crate::error::{Diagnostic, Result, RiskError};
use crate::events::{EventIndex, Realizations};
use crate::exposure::AssetCollection;
use crate::hazard::HazardSource;
use crate::partition::{Partitioner, RiskInput};
use crate::producer::LossRatioProducer;
use crate::stats::Statistic;
use crate::store::{self, ArrayStore, DType};

/// Event loss records appended per call.
const ELT_CHUNK: usize = 10_000;

/// What a finished calculation produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationReport {
    pub num_events: usize,
    pub num_shards: usize,
    pub elt_records: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// Names of the persisted datasets.
    pub outputs: Vec<String>,
}

/// Everything fixed before the shards run.
struct Prepared {
    index: EventIndex,
    realizations: Realizations,
    dims: Dims,
    epsilons: Option<EpsilonMatrix>,
    shards: Vec<RiskInput>,
}

pub struct EbrCalculator<'a, H, P> {
    config: RiskConfig,
    exposure: &'a AssetCollection,
    hazard: &'a H,
    producer: &'a P,
}

impl<'a, H, P> EbrCalculator<'a, H, P>
where
    H: HazardSource,
    P: LossRatioProducer,
{
    pub fn new(config: RiskConfig, exposure: &'a AssetCollection, hazard: &'a H, producer: &'a P) -> Self {
        EbrCalculator { config, exposure, hazard, producer }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Nothing reaches `store` unless every shard succeeded.
    pub fn run(&self, store: &mut dyn ArrayStore) -> Result<CalculationReport> {
        let prepared = self.pre_execute()?;
        let totals = self.execute(&prepared)?;
        self.post_execute(&prepared, totals, store)
    }

    fn pre_execute(&self) -> Result<Prepared> {
        let config = &self.config;
        config.validate()?;
        if let Some(parent) = self.hazard.parent_params() {
            config.check_parent(&parent)?;
        }
        if self.exposure.units().len() != config.loss_types.len() {
            return Err(RiskError::Configuration(format!(
                "{} loss types configured but the exposure has {}",
                config.loss_types.len(),
                self.exposure.units().len()
            )));
        }

        if let Some(n) = self.producer.num_loss_types()
            && n != config.loss_types.len()
        {
            return Err(RiskError::Configuration(format!(
                "{} loss types configured but the loss model covers {n}",
                config.loss_types.len()
            )));
        }

        let realizations = Realizations::new(self.hazard.realizations())?;
        let index = EventIndex::new(&self.hazard.events())?;
        let dims = config.resolve(self.exposure.len(), index.len(), realizations.len());
        info!(
            assets = dims.assets,
            events = dims.events,
            rlzs = dims.rlzs,
            columns = dims.columns(),
            "preparing calculation"
        );

        let epsilons = if config.ignore_covs || !self.producer.has_uncertainty() {
            None
        } else {
            let mut sampler = EpsilonSampler::new(dims.assets, dims.events, config.master_seed)
                .with_sample_cap(config.epsilon_sampling);
            if config.correlated_epsilons {
                sampler = sampler.correlated(config.asset_correlation)?;
            }
            let matrix = sampler.sample();
            info!(assets = dims.assets, samples = matrix.num_samples(), "generated epsilons");
            Some(matrix)
        };

        let shards = Partitioner::new(config.max_weight, config.concurrent_tasks).build_risk_inputs(
            self.exposure,
            self.hazard,
            &index,
            dims.rlzs,
        )?;
        info!(shards = shards.len(), "built risk inputs");

        Ok(Prepared { index, realizations, dims, epsilons, shards })
    }

    fn curves_possible(&self) -> bool {
        self.config.curves_enabled() && self.config.eff_time() >= MIN_EFF_TIME
    }

    fn execute(&self, prepared: &Prepared) -> Result<Totals> {
        let builder = LossCurveBuilder::from_config(&self.config, prepared.dims.events);
        let ctx = ShardContext {
            dims: prepared.dims,
            index: &prepared.index,
            exposure: self.exposure,
            epsilons: prepared.epsilons.as_ref(),
            ses_ratio: self.config.ses_ratio(),
            avg_losses: self.config.avg_losses,
            curves: self.curves_possible().then_some(&builder),
        };
        engine::run(&prepared.shards, self.producer, &ctx)
    }

    fn post_execute(&self, prepared: &Prepared, totals: Totals, store: &mut dyn ArrayStore) -> Result<CalculationReport> {
        let config = &self.config;
        let dims = &prepared.dims;
        let weights = prepared.realizations.weights();
        let stats = if dims.rlzs > 1 { config.risk_stats() } else { Vec::new() };
        let loss_names = json!(dims.column_names(&config.loss_types));
        let units = json!(self.exposure.units());
        let mut outputs = Vec::new();
        let mut diagnostics = Vec::new();

        // event loss table
        let elt = build_event_loss_table(&totals.agg, &prepared.index)?;
        store.create("losses_by_event", DType::Record, &[0])?;
        for chunk in elt.chunks(ELT_CHUNK) {
            store::append_records(store, "losses_by_event", chunk)?;
        }
        store.set_attr("losses_by_event", "loss_names", loss_names.clone())?;
        store.set_attr("losses_by_event", "units", units.clone())?;
        outputs.push("losses_by_event".to_string());
        info!(rows = elt.len(), "saved event loss table");

        if config.avg_losses {
            let avg = build_avg_losses(&totals.avg, self.exposure, dims)?;
            let attrs = [("loss_names", loss_names.clone()), ("units", units.clone())];
            save(store, &mut outputs, "avg_losses-rlzs", &avg, &attrs)?;
            if !stats.is_empty() {
                let avg_stats = rlz_stats(&avg, 1, weights, &stats);
                save(store, &mut outputs, "avg_losses-stats", &avg_stats, &with_stats(&attrs, &stats))?;
            }
        }

        let tables = build_loss_tables(&totals.agg, &prepared.index, dims)?;
        save(
            store,
            &mut outputs,
            "rup_loss_table",
            &tables.rup_loss_table,
            &[("ridx", json!(tables.ridx)), ("loss_names", json!(config.loss_types))],
        )?;
        save(
            store,
            &mut outputs,
            "losses_by_rlzi",
            &tables.losses_by_rlzi,
            &[("loss_names", loss_names.clone()), ("units", units.clone())],
        )?;

        if config.curves_enabled() && !self.curves_possible() {
            let diagnostic = Diagnostic::InsufficientData {
                eff_time: config.eff_time(),
                minimum: MIN_EFF_TIME,
                skipped: vec!["curves".to_string(), "loss_maps".to_string(), "agg_curves".to_string()],
            };
            warn!(%diagnostic, "not building loss curves");
            diagnostics.push(diagnostic);
        } else if self.curves_possible() {
            let builder = LossCurveBuilder::from_config(config, dims.events);
            let rps = json!(builder.return_periods());
            let attrs = [("return_periods", rps), ("loss_names", loss_names.clone()), ("units", units)];

            let curves = &totals.curves;
            save(store, &mut outputs, "curves-rlzs", curves, &attrs)?;
            let curve_stats = (!stats.is_empty()).then(|| rlz_stats(curves, 1, weights, &stats));
            if let Some(curve_stats) = &curve_stats {
                save(store, &mut outputs, "curves-stats", curve_stats, &with_stats(&attrs, &stats))?;
            }

            if !builder.poes().is_empty() {
                let map_attrs = [("poes", json!(builder.poes())), ("loss_names", loss_names)];
                save(store, &mut outputs, "loss_maps-rlzs", &build_maps(curves, &builder), &map_attrs)?;
                if let Some(curve_stats) = &curve_stats {
                    let maps = build_maps(curve_stats, &builder);
                    save(store, &mut outputs, "loss_maps-stats", &maps, &with_stats(&map_attrs, &stats))?;
                }
            }

            let agg_curves = build_agg_curves(&totals.agg, dims, &builder);
            save(store, &mut outputs, "agg_curves-rlzs", &agg_curves, &attrs)?;
            if !stats.is_empty() {
                let agg_stats = rlz_stats(&agg_curves, 0, weights, &stats);
                save(store, &mut outputs, "agg_curves-stats", &agg_stats, &with_stats(&attrs, &stats))?;
            }
        }

        store.flush()?;
        info!(outputs = outputs.len(), "calculation complete");
        Ok(CalculationReport {
            num_events: dims.events,
            num_shards: prepared.shards.len(),
            elt_records: elt.len(),
            diagnostics,
            outputs,
        })
    }
}

fn with_stats(attrs: &[(&'static str, Value)], stats: &[Statistic]) -> Vec<(&'static str, Value)> {
    let names: Vec<String> = stats.iter().map(Statistic::name).collect();
    let mut out = attrs.to_vec();
    out.push(("stats", json!(names)));
    out
}

fn save(
    store: &mut dyn ArrayStore,
    outputs: &mut Vec<String>,
    name: &str,
    array: &DenseArray,
    attrs: &[(&'static str, Value)],
) -> Result<()> {
    store::save_array(store, name, array)?;
    for (key, value) in attrs {
        store.set_attr(name, key, value.clone())?;
    }
    outputs.push(name.to_string());
    Ok(())
}
