use std::fs::File;
use std::io::BufReader;

use ebrisk::calculator::{CalculationReport, EbrCalculator};
use ebrisk::catalog::{CatalogConfig, generate_catalog, generate_exposure};
use ebrisk::config::RiskConfig;
use ebrisk::store::NdjsonStore;
use ebrisk::vulnerability::{VulnerabilityFunction, VulnerabilityModel};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut seed_override: Option<u64> = None;
    let mut num_assets: u32 = 200;
    let mut num_sites: Option<u32> = None;
    let mut config_path: Option<String> = None;
    let mut output_dir = "ebrisk-output".to_string();
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                i += 1;
                seed_override = Some(args[i].parse().expect("--seed requires a u64"));
            }
            "--assets" => {
                i += 1;
                num_assets = args[i].parse().expect("--assets requires a u32");
            }
            "--sites" => {
                i += 1;
                num_sites = Some(args[i].parse().expect("--sites requires a u32"));
            }
            "--config" => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            "--output-dir" => {
                i += 1;
                output_dir = args[i].clone();
            }
            "--quiet" => quiet = true,
            _ => {}
        }
        i += 1;
    }

    init_tracing(if quiet { "warn" } else { "info" });

    let mut config = match &config_path {
        Some(path) => {
            let file = File::open(path).unwrap_or_else(|e| panic!("failed to open {path}: {e}"));
            serde_json::from_reader(BufReader::new(file)).unwrap_or_else(|e| panic!("invalid config {path}: {e}"))
        }
        None => RiskConfig::canonical(),
    };
    if let Some(seed) = seed_override {
        config.master_seed = seed;
    }

    let mut catalog_config = CatalogConfig {
        seed: config.master_seed,
        investigation_time: config.investigation_time,
        ses_per_logic_tree_path: config.ses_per_logic_tree_path,
        minimum_intensity: config.minimum_intensity,
        ..CatalogConfig::canonical()
    };
    if let Some(n) = num_sites {
        catalog_config.num_sites = n;
    }
    let catalog = generate_catalog(&catalog_config).expect("failed to generate catalog");
    let hazard = catalog.into_hazard();
    let exposure = generate_exposure(
        num_assets,
        catalog_config.num_sites,
        config.loss_types.len(),
        config.master_seed.wrapping_add(1),
    )
    .expect("failed to generate exposure");

    // One curve per loss type, slightly stronger for each subsequent type.
    let functions = (0..config.loss_types.len())
        .map(|l| {
            let scale = 1.0 + 0.1 * l as f64;
            VulnerabilityFunction::new(
                vec![0.05, 0.2, 0.5, 1.0, 2.0],
                vec![0.0, 0.05 * scale, 0.2 * scale, 0.5 * scale, 0.8],
                vec![0.3, 0.3, 0.25, 0.2, 0.1],
            )
        })
        .collect::<Result<Vec<_>, _>>()
        .expect("invalid vulnerability function");
    let model = VulnerabilityModel::new(functions, &exposure, config.minimum_intensity, config.insured_losses)
        .unwrap_or_else(|e| panic!("invalid vulnerability model: {e}"));

    let mut store = NdjsonStore::new(&output_dir).expect("failed to create output directory");
    let report = EbrCalculator::new(config, &exposure, &hazard, &model)
        .run(&mut store)
        .unwrap_or_else(|e| panic!("calculation failed: {e}"));

    if !quiet {
        print_report(&report, &output_dir);
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_report(report: &CalculationReport, output_dir: &str) {
    println!("Events:      {}", report.num_events);
    println!("Shards:      {}", report.num_shards);
    println!("ELT records: {}", report.elt_records);
    for diagnostic in &report.diagnostics {
        println!("Warning:     {diagnostic}");
    }
    println!("Datasets written to {output_dir}/:");
    for name in &report.outputs {
        println!("  {name}.ndjson, {name}.meta.json");
    }
}
