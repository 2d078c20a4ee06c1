use anyhow::{bail, Result};
use cedula_lookup::{
    config::Config,
    dataset::{Dataset, Value},
    lookup::IndexedDataset,
    LoadOutcome,
};
use std::{collections::HashSet, env, path::PathBuf, process::exit, sync::Arc};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();
    dotenv::dotenv().ok();

    // Optional single CLI argument: path to a config file.
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        eprintln!("Usage: {} [CONFIG_FILE]", args[0]);
        exit(1);
    }
    let config_path = args.get(1).map(PathBuf::from);
    if let Err(e) = inspect(config_path).await {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}

/// Load the configured source once and print a summary of what came back.
async fn inspect(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    let loader = config.build_loader()?;
    let outcome = loader.load().await;

    let dataset = match &outcome {
        LoadOutcome::Loaded { dataset, loaded_at } => {
            println!("=== Dataset (loaded {}) ===", loaded_at.to_rfc3339());
            Arc::clone(dataset)
        }
        LoadOutcome::Failed { diagnostic, .. } => bail!("load failed: {}", diagnostic),
        LoadOutcome::NotConfigured { .. } => bail!("no source configured"),
    };

    if let Some(source) = loader.source() {
        println!("Source:       {:?}", source.kind());
    }
    println!("Total rows:   {}", dataset.num_rows());
    println!("Columns:      {}", dataset.columns().len());
    println!();

    println!("=== Columns ===");
    for (idx, col) in dataset.columns().iter().enumerate() {
        let (nulls, distinct) = column_stats(&dataset, idx);
        println!(
            "- {:<30} | {:<7} | nulls: {:<8} | distinct: {}",
            col.name,
            col.kind.as_str(),
            nulls,
            distinct
        );
    }
    println!();

    println!("=== Key column \"{}\" ===", config.key_column);
    match IndexedDataset::prepare(dataset, &config.key_column) {
        Ok(indexed) => {
            let stats = indexed.stats();
            println!("  Indexed keys: {}", stats.keys);
            println!("  Duplicates:   {}", stats.duplicates);
            println!("  Skipped:      {}", stats.skipped);
        }
        Err(e) => println!("  {}", e),
    }

    Ok(())
}

/// Null count and distinct non-null count for one column.
fn column_stats(dataset: &Dataset, idx: usize) -> (usize, usize) {
    let mut nulls = 0;
    let mut seen: HashSet<String> = HashSet::new();
    for row in dataset.rows() {
        match &row[idx] {
            Value::Null => nulls += 1,
            // floats compare by bit pattern so NaN and -0.0 stay distinct
            Value::Float(f) => {
                seen.insert(format!("f:{}", f.to_bits()));
            }
            other => {
                seen.insert(format!("{:?}", other));
            }
        }
    }
    (nulls, seen.len())
}
