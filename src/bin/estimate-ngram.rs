//! Estimates an n-gram language model from text or counts, optionally
//! tuning the smoothing parameters on a development corpus.

use anyhow::Context;
use clap::Parser;

use ngram_lm::binio::{self, FileHeader};
use ngram_lm::optimize::Technique;
use ngram_lm::perplexity::PerplexityOptimizer;
use ngram_lm::smooth::Smoothing;
use ngram_lm::{zio, NgramLm};

#[derive(Parser, Debug)]
#[command(
    about = "Estimate a back-off n-gram language model",
    long_about = "Estimates an n-gram language model from a corpus or a counts file, \
applying ML, KN, KNd, ModKN, FixKN, FixKNd or FixModKN smoothing to distribute \
probability mass from observed n-grams to unseen ones."
)]
struct Args {
    /// Model order.
    #[clap(long, short, default_value = "3")]
    order: usize,
    /// Fix the vocabulary to the words in this file.
    #[clap(long)]
    read_vocab: Option<String>,
    /// Corpus files, one sentence per line.
    #[clap(long)]
    read_text: Vec<String>,
    /// Counts files, `ngram<TAB>count` per line or binary.
    #[clap(long)]
    read_count: Vec<String>,
    /// Smoothing applied to every order.
    #[clap(long, short, default_value = "ModKN")]
    smoothing: String,
    /// Per-order smoothing override, e.g. `1=KN`.
    #[clap(long)]
    smoothing_order: Vec<String>,
    /// N-gram weighting feature specifications, `;`-separated.
    #[clap(long)]
    weight_features: Option<String>,
    /// Read initial parameters from a file.
    #[clap(long)]
    read_params: Option<String>,
    /// Write final parameters to a file.
    #[clap(long)]
    write_params: Option<String>,
    /// Tune parameters to minimize perplexity on this corpus.
    #[clap(long)]
    optimize_perplexity: Option<String>,
    /// Optimization technique: Powell, LBFGS or LBFGSB.
    #[clap(long, default_value = "Powell")]
    optimization: String,
    /// Report perplexity on these corpora.
    #[clap(long)]
    evaluate_perplexity: Vec<String>,
    /// Write the model in ARPA format.
    #[clap(long)]
    write_lm: Option<String>,
    /// Write the model in the binary format.
    #[clap(long)]
    write_binary_lm: Option<String>,
    /// Write the raw counts.
    #[clap(long)]
    write_counts: Option<String>,
    /// Write the smoothed (adjusted) counts.
    #[clap(long)]
    write_eff_counts: Option<String>,
    /// Write the vocabulary.
    #[clap(long)]
    write_vocab: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            err.print()?;
            std::process::exit(1);
        }
    };

    let mut lm = NgramLm::new(args.order);
    if let Some(path) = &args.read_vocab {
        lm.load_vocab(zio::open_reader(path)?)
            .with_context(|| format!("failed to load vocabulary {path}"))?;
    }
    for path in &args.read_text {
        lm.load_corpus(zio::open_reader(path)?, false)
            .with_context(|| format!("failed to load corpus {path}"))?;
    }
    for path in &args.read_count {
        lm.load_counts(zio::open_reader(path)?, false)
            .with_context(|| format!("failed to load counts {path}"))?;
    }

    if let Some(specs) = &args.weight_features {
        let mut bundles = Vec::new();
        for spec in specs.split(';').filter(|s| !s.is_empty()) {
            let mut features = Vec::new();
            lm.model()
                .load_computed_features(&mut features, spec, 0)
                .with_context(|| format!("failed to load features {spec}"))?;
            bundles.push(features);
        }
        lm.set_weighting(bundles);
    }

    let mut smoothings = Vec::with_capacity(args.order);
    for order in 1..=args.order {
        let spec = args
            .smoothing_order
            .iter()
            .find_map(|entry| {
                entry
                    .split_once('=')
                    .filter(|(o, _)| o.parse() == Ok(order))
                    .map(|(_, name)| name)
            })
            .unwrap_or(args.smoothing.as_str());
        smoothings.push(Smoothing::parse(spec)?);
    }
    lm.set_smoothings(smoothings);

    let mut params = lm.default_params().to_vec();
    if let Some(path) = &args.read_params {
        params = read_params(path)?;
    }

    let technique: Technique = args.optimization.parse()?;
    if let Some(path) = &args.optimize_perplexity {
        let mut optimizer = PerplexityOptimizer::new(&mut lm);
        optimizer.load_corpus(zio::open_reader(path)?)?;
        let entropy = optimizer.optimize(&mut params, technique);
        eprintln!("dev perplexity: {:.4}", entropy.exp());
    }

    if !lm.estimate(&params, None) {
        anyhow::bail!("smoothing parameters are out of bounds");
    }

    for path in &args.evaluate_perplexity {
        let mut optimizer = PerplexityOptimizer::new(&mut lm);
        optimizer.load_corpus(zio::open_reader(path)?)?;
        let perplexity = optimizer.compute_perplexity(&params);
        println!("{path}\t{perplexity:.4}");
    }

    if let Some(path) = &args.write_params {
        write_params(path, &params)?;
    }
    if let Some(path) = &args.write_vocab {
        lm.save_vocab(&mut zio::open_writer(path)?, false)?;
    }
    if let Some(path) = &args.write_counts {
        lm.save_counts(&mut zio::open_writer(path)?, false)?;
    }
    if let Some(path) = &args.write_eff_counts {
        lm.save_effective_counts(&mut zio::open_writer(path)?)?;
    }
    if let Some(path) = &args.write_lm {
        lm.save_lm(&mut zio::open_writer(path)?, false)?;
    }
    if let Some(path) = &args.write_binary_lm {
        lm.save_lm(&mut zio::open_writer(path)?, true)?;
    }
    Ok(())
}

fn read_params(path: &str) -> anyhow::Result<Vec<f64>> {
    let mut reader = zio::open_reader(path)?;
    FileHeader::verify(&mut reader)?;
    binio::verify_tag(&mut reader, "Param")?;
    Ok(binio::read_f64_vec(&mut reader)?)
}

fn write_params(path: &str, params: &[f64]) -> anyhow::Result<()> {
    let mut writer = zio::open_writer(path)?;
    FileHeader::CURRENT.write_to(&mut writer)?;
    binio::write_tag(&mut writer, "Param")?;
    binio::write_f64_vec(&mut writer, params)?;
    Ok(())
}
