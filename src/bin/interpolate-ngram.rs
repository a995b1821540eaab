//! Statically interpolates several component language models, estimating
//! per-history mixture weights from optional features.

use anyhow::Context;
use clap::Parser;

use ngram_lm::features::FeatureVectors;
use ngram_lm::lm::{Interpolation, LanguageModel};
use ngram_lm::optimize::Technique;
use ngram_lm::perplexity::PerplexityOptimizer;
use ngram_lm::smooth::Smoothing;
use ngram_lm::{zio, InterpolatedNgramLm, NgramLm};

#[derive(Parser, Debug)]
#[command(
    about = "Interpolate component n-gram language models",
    long_about = "Merges several component models over a shared index space and \
interpolates them with linear (LI), count-merging (CM) or generalized linear (GLI) \
weights. CM defaults to the log history count feature computed from component counts; \
GLI takes arbitrary feature files."
)]
struct Args {
    /// Model order.
    #[clap(long, short, default_value = "3")]
    order: usize,
    /// Component language models (ARPA or binary).
    #[clap(long)]
    lm: Vec<String>,
    /// Train a component from this corpus instead (ModKN smoothing).
    #[clap(long)]
    read_text: Vec<String>,
    /// Interpolation mode: LI, CM or GLI.
    #[clap(long, short, default_value = "LI")]
    interpolation: String,
    /// Per-component feature specifications, `;`-separated; within a
    /// component, `,`-separated.
    #[clap(long)]
    read_features: Option<String>,
    /// Share interpolation parameters across orders.
    #[clap(long)]
    tie_param_order: bool,
    /// Share feature parameters across components.
    #[clap(long)]
    tie_param_lm: bool,
    /// Tune parameters to minimize perplexity on this corpus.
    #[clap(long)]
    optimize_perplexity: Option<String>,
    /// Optimization technique: Powell, LBFGS or LBFGSB.
    #[clap(long, default_value = "Powell")]
    optimization: String,
    /// Report perplexity on these corpora.
    #[clap(long)]
    evaluate_perplexity: Vec<String>,
    /// Write the interpolated model in ARPA format.
    #[clap(long)]
    write_lm: Option<String>,
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

    let mut components = Vec::new();
    for path in &args.lm {
        let mut lm = NgramLm::new(args.order);
        lm.load_lm(zio::open_reader(path)?)
            .with_context(|| format!("failed to load component {path}"))?;
        components.push(lm);
    }
    for path in &args.read_text {
        let mut lm = NgramLm::new(args.order);
        lm.load_corpus(zio::open_reader(path)?, true)
            .with_context(|| format!("failed to load corpus {path}"))?;
        lm.set_smoothings((0..args.order).map(|_| Smoothing::parse("ModKN")).collect::<Result<_, _>>()?);
        components.push(lm);
    }
    if components.len() < 2 {
        anyhow::bail!("interpolation needs at least two component models");
    }

    let interpolation: Interpolation = args.interpolation.parse()?;
    let mut interp =
        InterpolatedNgramLm::new(args.order, args.tie_param_order, args.tie_param_lm);
    interp.load_lms(components)?;

    let features = component_features(&args, interpolation, &interp)?;
    interp.set_interpolation(interpolation, features)?;

    let mut params = LanguageModel::default_params(&interp).to_vec();
    let technique: Technique = args.optimization.parse()?;
    if let Some(path) = &args.optimize_perplexity {
        let mut optimizer = PerplexityOptimizer::new(&mut interp);
        optimizer.load_corpus(zio::open_reader(path)?)?;
        let entropy = optimizer.optimize(&mut params, technique);
        eprintln!("dev perplexity: {:.4}", entropy.exp());
    }

    if !interp.estimate(&params, None) {
        anyhow::bail!("interpolation parameters are out of bounds");
    }

    for path in &args.evaluate_perplexity {
        let mut optimizer = PerplexityOptimizer::new(&mut interp);
        optimizer.load_corpus(zio::open_reader(path)?)?;
        let perplexity = optimizer.compute_perplexity(&params);
        println!("{path}\t{perplexity:.4}");
    }

    if let Some(path) = &args.write_lm {
        let mut writer = zio::open_writer(path)?;
        interp
            .model()
            .save_arpa(&probs_of(&interp), &bows_of(&interp), &mut writer)?;
    }
    Ok(())
}

/// Resolves the per-component feature bundles for the selected mode.
fn component_features(
    args: &Args,
    interpolation: Interpolation,
    interp: &InterpolatedNgramLm,
) -> anyhow::Result<Vec<Vec<FeatureVectors>>> {
    let num = interp.components().len();
    let mut features: Vec<Vec<FeatureVectors>> = vec![Vec::new(); num];

    if let Some(specs) = &args.read_features {
        let per_component: Vec<&str> = specs.split(';').collect();
        if per_component.len() != num {
            anyhow::bail!(
                "--read-features lists {} components, model has {num}",
                per_component.len()
            );
        }
        for (l, spec_list) in per_component.iter().enumerate() {
            for spec in spec_list.split(',').filter(|s| !s.is_empty()) {
                let mut bundle = Vec::new();
                interp
                    .model()
                    .load_computed_features(&mut bundle, spec, 0)
                    .with_context(|| format!("failed to load features {spec}"))?;
                features[l].push(bundle);
            }
        }
    } else if interpolation == Interpolation::CountMerging {
        // Default count-merging feature: log history counts.
        for (l, component) in interp.components().iter().enumerate() {
            features[l].push(InterpolatedNgramLm::count_merging_feature(component));
        }
    }
    Ok(features)
}

fn probs_of(interp: &InterpolatedNgramLm) -> Vec<Vec<f64>> {
    (0..=LanguageModel::order(interp))
        .map(|o| LanguageModel::probs(interp, o).to_vec())
        .collect()
}

fn bows_of(interp: &InterpolatedNgramLm) -> Vec<Vec<f64>> {
    (0..LanguageModel::order(interp))
        .map(|o| LanguageModel::bows(interp, o).to_vec())
        .collect()
}
