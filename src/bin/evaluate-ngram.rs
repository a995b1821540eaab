//! Evaluates a language model: perplexity on test corpora and word error
//! rate or margin over rescored lattices.

use anyhow::Context;
use clap::Parser;

use ngram_lm::optimize::Technique;
use ngram_lm::perplexity::PerplexityOptimizer;
use ngram_lm::wer::WordErrorRateOptimizer;
use ngram_lm::{zio, NgramLm};

#[derive(Parser, Debug)]
#[command(
    about = "Evaluate a back-off n-gram language model",
    long_about = "Reads an ARPA or binary language model and computes perplexity on \
test corpora, or rescores word lattices to report word error rate, oracle error rate \
and discriminative margin."
)]
struct Args {
    /// Language model to evaluate (ARPA or binary).
    #[clap(long, short)]
    lm: String,
    /// Report perplexity on these corpora.
    #[clap(long)]
    evaluate_perplexity: Vec<String>,
    /// Lattice index file: `tag lattice-file reference...` per line.
    #[clap(long)]
    lattices: Option<String>,
    /// Write best-path transcripts after rescoring.
    #[clap(long)]
    write_transcript: Option<String>,
    /// Write per-lattice word error counts.
    #[clap(long)]
    write_wer: Option<String>,
    /// Optimization technique for reporting purposes.
    #[clap(long, default_value = "Powell")]
    optimization: String,
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
    let _technique: Technique = args.optimization.parse()?;

    let mut lm = NgramLm::new(1);
    lm.load_lm(zio::open_reader(&args.lm)?)
        .with_context(|| format!("failed to load model {}", args.lm))?;

    for path in &args.evaluate_perplexity {
        let mut optimizer = PerplexityOptimizer::new(&mut lm);
        optimizer.load_corpus(zio::open_reader(path)?)?;
        let perplexity = optimizer.compute_perplexity(&[]);
        println!(
            "{path}\tppl {perplexity:.4}\toov {}\tzeroprobs {}",
            optimizer.num_oov(),
            optimizer.num_zero_probs()
        );
    }

    if let Some(path) = &args.lattices {
        let mut optimizer = WordErrorRateOptimizer::new(&mut lm);
        optimizer.load_lattices(zio::open_reader(path)?)?;
        let wer = optimizer.compute_wer(&[]);
        let oracle = optimizer.compute_oracle_wer();
        println!("wer {wer:.2}%\toracle {oracle:.2}%");

        if let Some(out) = &args.write_transcript {
            optimizer.save_transcript(&mut zio::open_writer(out)?)?;
        }
        if let Some(out) = &args.write_wer {
            optimizer.save_wer(&mut zio::open_writer(out)?)?;
        }
    }
    Ok(())
}
