use std::collections::BTreeMap;
use std::env;

use ebrisk::catalog::{CatalogConfig, generate_catalog};

fn main() {
    let mut config = CatalogConfig::canonical();

    if let Some(ses) = env::args().nth(1).and_then(|s| s.parse().ok()) {
        config.ses_per_logic_tree_path = ses;
    }
    if let Some(seed) = env::args().nth(2).and_then(|s| s.parse().ok()) {
        config.seed = seed;
    }

    let catalog = generate_catalog(&config).expect("failed to generate catalog");

    // Write NDJSON to stdout.
    for rupture in &catalog.ruptures {
        println!("{}", serde_json::to_string(rupture).expect("serialisation failed"));
    }

    // Per-event-set summary to stderr.
    let mut per_ses: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for rupture in &catalog.ruptures {
        let entry = per_ses.entry(rupture.ses).or_default();
        entry.0 += 1;
        entry.1 += rupture.eids.len();
    }
    let expected = config.annual_rupture_rate * config.investigation_time;
    eprintln!(
        "event_catalog: {} event sets, {} ruptures, {} events, {} ground motions (expected ~{:.1} ruptures per set)",
        config.ses_per_logic_tree_path,
        catalog.ruptures.len(),
        catalog.events.len(),
        catalog.gmfs.len(),
        expected
    );
    for (ses, (ruptures, events)) in per_ses {
        eprintln!("  ses={ses:<4}  ruptures={ruptures:>4}  events={events:>4}");
    }
}
