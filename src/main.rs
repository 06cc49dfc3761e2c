use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use logomatch::config::Config;
use logomatch::engine::bucket::CandidateStrategy;
use logomatch::engine::pipeline::{
    benchmark, BatchItem, BatchOutcome, ClusterEngine, DuplicateGroup, SkipKind, SkippedAsset,
};
use logomatch::services::digest::{DigestSession, JsonDigestStore};
use logomatch::services::manifest::Manifest;
use logomatch::services::report::{self, GroupDistribution};
use logomatch::services::storage::AssetStore;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "logomatch", version, about = "Group company logos by visual identity")]
struct Cli {
    /// Config file (default: the user config dir, if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store the logos listed in a manifest, skipping byte-identical copies
    Ingest {
        /// `domain,path` lines
        #[arg(short, long, value_name = "FILE")]
        manifest: PathBuf,
        /// Logo store directory
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
        /// Persisted digest index
        #[arg(long, value_name = "FILE")]
        digests: Option<PathBuf>,
        /// Skipped entry report
        #[arg(long, value_name = "FILE", default_value = "ingest_errors.csv")]
        errors: PathBuf,
    },

    /// Cluster logos into groups of the same visual identity
    Cluster {
        /// Cluster every file in this store (default: the configured store)
        #[arg(long, value_name = "DIR", conflicts_with = "manifest")]
        store: Option<PathBuf>,
        /// Cluster the files listed in a `domain,path` manifest instead
        #[arg(short, long, value_name = "FILE")]
        manifest: Option<PathBuf>,
        /// Persisted digest index
        #[arg(long, value_name = "FILE")]
        digests: Option<PathBuf>,
        /// Cluster table output
        #[arg(short, long, value_name = "FILE", default_value = "groups.csv")]
        out: PathBuf,
        /// Skipped asset report
        #[arg(long, value_name = "FILE", default_value = "errors.csv")]
        errors: PathBuf,
        /// Write the full outcome as JSON instead of a cluster table
        #[arg(long)]
        json: bool,
        #[arg(long, value_enum)]
        strategy: Option<CandidateStrategy>,
        /// Maximum fingerprint Hamming distance
        #[arg(long, value_name = "BITS")]
        hamming: Option<u32>,
        /// Minimum structural similarity
        #[arg(long, value_name = "SCORE")]
        ssim: Option<f64>,
    },

    /// Write the domain -> logo filename table for a store
    Map {
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE", default_value = "mapping.csv")]
        out: PathBuf,
    },

    /// Summarize the cluster sizes in a group table
    Distribution {
        #[arg(short, long, value_name = "FILE")]
        groups: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = Config::load_or_default(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Ingest {
            manifest,
            store,
            digests,
            errors,
        } => {
            if let Some(store) = store {
                config.store_dir = store;
            }
            if let Some(digests) = digests {
                config.digest_file = digests;
            }
            ingest(&config, &manifest, &errors)
        }

        Commands::Cluster {
            store,
            manifest,
            digests,
            out,
            errors,
            json,
            strategy,
            hamming,
            ssim,
        } => {
            if let Some(store) = store {
                config.store_dir = store;
            }
            if let Some(digests) = digests {
                config.digest_file = digests;
            }
            if let Some(strategy) = strategy {
                config.matching.strategy = strategy;
            }
            if let Some(hamming) = hamming {
                config.matching.hamming_threshold = hamming;
            }
            if let Some(ssim) = ssim {
                config.matching.ssim_threshold = ssim;
            }
            config.validate().context("Invalid matching options")?;
            cluster(&config, manifest.as_deref(), &out, &errors, json)
        }

        Commands::Map { store, out } => {
            if let Some(store) = store {
                config.store_dir = store;
            }
            map(&config, &out)
        }

        Commands::Distribution { groups } => distribution(&groups),
    }
}

fn ingest(config: &Config, manifest_path: &Path, errors: &Path) -> Result<()> {
    println!("▶ Ingesting logos from: {}", manifest_path.display());
    let manifest = Manifest::read(manifest_path)?;

    let store = AssetStore::open(&config.store_dir)
        .with_context(|| format!("Failed to open store {}", config.store_dir.display()))?;
    let digest_store = JsonDigestStore::new(&config.digest_file);
    let mut session = DigestSession::open(&digest_store);

    let progress = ProgressBar::new(manifest.entries.len() as u64);
    progress.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:30}] {pos}/{len} {msg}",
    )?);

    let report = benchmark("ingesting", || {
        store.ingest_manifest(manifest_path, &manifest, session.index_mut(), &progress)
    });
    progress.finish_and_clear();

    session
        .finish()
        .with_context(|| format!("Failed to save digests to {}", config.digest_file.display()))?;

    let file = File::create(errors).with_context(|| format!("Failed to create {:?}", errors))?;
    report::write_skipped(BufWriter::new(file), &report.skipped)?;

    println!(
        "✅ Stored {} new logo(s) in {}",
        report.stored(),
        config.store_dir.display()
    );
    print_duplicates(&report.duplicates);
    if !report.skipped.is_empty() {
        println!(
            "⚠️  {} entry(ies) skipped, see {}",
            report.skipped.len(),
            errors.display()
        );
    }
    Ok(())
}

fn cluster(
    config: &Config,
    manifest_path: Option<&Path>,
    out: &Path,
    errors: &Path,
    json: bool,
) -> Result<()> {
    let mut skipped = Vec::new();
    let items = match manifest_path {
        Some(path) => {
            println!("▶ Clustering logos listed in: {}", path.display());
            let manifest = Manifest::read(path)?;
            skipped.extend(manifest.rejected.into_iter().map(|rejected| SkippedAsset {
                filename: format!("{}:{}", path.display(), rejected.line),
                kind: SkipKind::MalformedEntry,
                reason: rejected.reason,
            }));
            manifest
                .entries
                .into_iter()
                .map(|entry| BatchItem::from_path(entry.path).with_domain(entry.domain))
                .collect::<Vec<_>>()
        }
        None => {
            println!("▶ Clustering logos in: {}", config.store_dir.display());
            list_store(&config.store_dir)?
                .into_iter()
                .map(|path| BatchItem::from_path(path).in_store())
                .collect()
        }
    };

    let progress = ProgressBar::new(0);
    progress.set_style(ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:30}] {pos}/{len}",
    )?);
    progress.enable_steady_tick(Duration::from_millis(100));

    let mut engine = ClusterEngine::new(config.matching.clone())?.with_progress(progress);
    if let Some(workers) = config.workers {
        engine = engine.with_workers(workers)?;
    }

    let digest_store = JsonDigestStore::new(&config.digest_file);
    let mut session = DigestSession::open(&digest_store);
    let mut outcome: BatchOutcome = engine.run(items, session.index_mut());
    session
        .finish()
        .with_context(|| format!("Failed to save digests to {}", config.digest_file.display()))?;

    skipped.append(&mut outcome.skipped);
    outcome.skipped = skipped;
    outcome.stats.skipped = outcome.skipped.len();

    benchmark("writing reports", || -> Result<()> {
        let file = File::create(out).with_context(|| format!("Failed to create {:?}", out))?;
        if json {
            report::write_json(BufWriter::new(file), &outcome)?;
        } else {
            report::write_clusters(BufWriter::new(file), &outcome.clusters)?;
        }
        let file = File::create(errors).with_context(|| format!("Failed to create {:?}", errors))?;
        report::write_skipped(BufWriter::new(file), &outcome.skipped)?;
        Ok(())
    })?;

    let dist = GroupDistribution::from_clusters(&outcome.clusters);
    println!(
        "\n✨ {} group(s) from {} input(s): {} grouped domain(s), {} singleton(s)",
        dist.groups,
        outcome.stats.inputs,
        dist.grouped_domains(),
        dist.singletons
    );
    println!(
        "   {} exact duplicate(s), {} candidate pair(s), {} confirmed match(es)",
        outcome.stats.exact_duplicates, outcome.stats.candidate_pairs, outcome.stats.confirmed_matches
    );
    print_duplicates(&outcome.duplicates);
    if !outcome.skipped.is_empty() {
        println!(
            "⚠️  {} asset(s) skipped, see {}",
            outcome.skipped.len(),
            errors.display()
        );
    }
    println!("✅ Wrote groups to {}", out.display());
    Ok(())
}

fn map(config: &Config, out: &Path) -> Result<()> {
    let store = AssetStore::open(&config.store_dir)
        .with_context(|| format!("Failed to open store {}", config.store_dir.display()))?;
    let (mapping, malformed) = store.domain_mapping()?;
    for (name, e) in &malformed {
        eprintln!("⚠️  Skipping {}: {}", name, e);
    }

    let file = File::create(out).with_context(|| format!("Failed to create {:?}", out))?;
    report::write_mapping(BufWriter::new(file), &mapping)?;
    println!("✅ Mapped {} logo(s) to {}", mapping.len(), out.display());
    Ok(())
}

fn distribution(groups: &Path) -> Result<()> {
    let file = File::open(groups).with_context(|| format!("Could not open {:?}", groups))?;
    let rows = report::read_groups(BufReader::new(file))?;
    let dist = GroupDistribution::from_rows(&rows);

    println!("🗂️  Group sizes in {}:", groups.display());
    for (size, count) in &dist.sizes {
        println!("   {:>4} domain(s): {} group(s)", size, count);
    }
    println!(
        "\n   {} group(s), {} domain(s), {} singleton(s), largest group {}",
        dist.groups, dist.total_domains, dist.singletons, dist.largest
    );
    Ok(())
}

/// Listing the store is the batch's input list, so failing here is fatal.
fn list_store(dir: &Path) -> Result<Vec<PathBuf>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Listing logos…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    if !dir.is_dir() {
        spinner.finish_and_clear();
        anyhow::bail!("Logo store {} does not exist", dir.display());
    }
    let store = AssetStore::open(dir)?;
    let files = store
        .list()
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    spinner.finish_with_message(format!("Found {} logo(s)", files.len()));
    Ok(files)
}

fn print_duplicates(duplicates: &[DuplicateGroup]) {
    if duplicates.is_empty() {
        return;
    }
    println!("\n📦 {} set(s) of byte-identical logos:", duplicates.len());
    for group in duplicates {
        let domains: Vec<&str> = group.domains.iter().map(|d| d.as_str()).collect();
        println!("   {} ← {}", group.filename, domains.join(", "));
    }
}
