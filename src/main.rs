//! `gradgraph` command line: builds a small demo model, runs a backward pass
//! and reports the gradient recorded for every parameter.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use gradgraph::autodiff::backward_with_options;
use gradgraph::config::GradConfig;
use gradgraph::graph::factory::{
    create_add, create_matmul, create_multiply, create_parameter, create_reduce_mean_all,
    create_relu, create_sigmoid, create_square, create_subtract, create_variable,
};
use gradgraph::graph::{Expr, Tensor};
use gradgraph::visit::collect_parameters;

#[derive(Parser, Debug)]
#[command(name = "gradgraph")]
#[command(about = "Reverse-mode differentiation of symbolic tensor graphs", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML file with gradient options
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Differentiate z = (x * y) + x
    Linear {
        #[arg(long, default_value = "2")]
        rows: usize,
        #[arg(long, default_value = "3")]
        cols: usize,
    },
    /// Differentiate the squared-error loss of a two-layer perceptron
    Mlp {
        #[arg(long, default_value = "8")]
        batch: usize,
        #[arg(long, default_value = "4")]
        input: usize,
        #[arg(long, default_value = "16")]
        hidden: usize,
        #[arg(long, default_value = "2")]
        output: usize,
    },
}

fn linear_model(rows: usize, cols: usize) -> Result<Expr> {
    let x = create_parameter("x", Tensor::filled(vec![rows, cols], 1.0));
    let y = create_parameter("y", Tensor::filled(vec![rows, cols], 2.0));
    let xy = create_multiply("xy", &x, &y)?;
    Ok(create_add("z", &xy, &x)?)
}

fn mlp_model(batch: usize, input: usize, hidden: usize, output: usize) -> Result<Expr> {
    let features = create_variable("features", vec![batch, input]);
    let target = create_variable("target", vec![batch, output]);
    let w1 = create_parameter("w1", Tensor::filled(vec![input, hidden], 0.1));
    let b1 = create_parameter("b1", Tensor::filled(vec![hidden], 0.0));
    let w2 = create_parameter("w2", Tensor::filled(vec![hidden, output], 0.1));
    let b2 = create_parameter("b2", Tensor::filled(vec![output], 0.0));

    let h = create_matmul("layer1/matmul", &features, &w1, false, false)?;
    let h = create_add("layer1/bias", &h, &b1)?;
    let h = create_sigmoid("layer1/sigmoid", &h);
    let o = create_matmul("layer2/matmul", &h, &w2, false, false)?;
    let o = create_add("layer2/bias", &o, &b2)?;
    let o = create_relu("layer2/relu", &o);
    let err = create_subtract("loss/error", &o, &target)?;
    let sq = create_square("loss/square", &err);
    Ok(create_reduce_mean_all("loss", &sq))
}

fn report(output: &Expr, config: &GradConfig) -> Result<()> {
    let table = backward_with_options(output, &config.options())
        .with_context(|| format!("backward pass from '{}' failed", output.name()))?;
    info!("{} nodes received gradients", table.len());

    println!("gradients of {} {:?}", output.name(), output.shape());
    for param in collect_parameters(output)? {
        let total = table
            .total_gradient(&param)
            .with_context(|| format!("no gradient for parameter '{}'", param.name()))?;
        println!(
            "  {:<6} shape={:?} contributions={} total={} shape={:?}",
            param.name(),
            param.shape(),
            table.contributions(&param).len(),
            total.name(),
            total.shape()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let config = match &cli.config {
        Some(path) => GradConfig::from_path(path)?,
        None => GradConfig::default(),
    };

    let output = match cli.command {
        Commands::Linear { rows, cols } => linear_model(rows, cols)?,
        Commands::Mlp {
            batch,
            input,
            hidden,
            output,
        } => mlp_model(batch, input, hidden, output)?,
    };
    report(&output, &config)
}
