#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;

use sparsegwas::config::AnalysisConfig;
use sparsegwas::data::{
    GenotypeData, load_feature_graph, load_gene_map, load_genotype_matrix, load_genotypes,
    load_phenotypes, load_sample_ids, load_snp_names,
};
use sparsegwas::dataset::AlignedDataset;
use sparsegwas::incidence::{DegreeConvention, IncidenceMatrix};
use sparsegwas::model::TrainedModel;
use sparsegwas::output::{
    write_association, write_coefficients, write_incidence, write_predictions, write_scatter,
};
use sparsegwas::pipeline::{GwasPipeline, ModelReport};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Clone, Copy, ValueEnum)]
pub enum ModelKind {
    Ols,
    Lasso,
    ElasticNet,
    NetworkLasso,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DegreeConventionCli {
    IncidentEdges,
    DoubledRowCount,
}

impl From<DegreeConventionCli> for DegreeConvention {
    fn from(value: DegreeConventionCli) -> Self {
        match value {
            DegreeConventionCli::IncidentEdges => Self::IncidentEdges,
            DegreeConventionCli::DoubledRowCount => Self::DoubledRowCount,
        }
    }
}

#[derive(Args)]
pub struct GenotypeArgs {
    /// SNP names, whitespace separated
    #[arg(long, value_name = "PATH")]
    pub snps: PathBuf,

    /// Sample IDs, one integer per genotype row
    #[arg(long, value_name = "PATH")]
    pub samples: PathBuf,

    /// Whitespace-delimited integer genotype matrix (samples x SNPs)
    #[arg(long, value_name = "PATH")]
    pub genotypes: PathBuf,
}

#[derive(Args)]
pub struct PhenotypeArgs {
    #[command(flatten)]
    pub genotype: GenotypeArgs,

    /// Phenotype table with FID, IID and one column per trait
    #[arg(long, value_name = "PATH")]
    pub phenotypes: PathBuf,

    /// Name of the trait column to analyse
    #[arg(long = "trait", value_name = "NAME")]
    pub trait_name: String,

    /// Optional analysis configuration (.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Prefix for all output files
    #[arg(long, default_value = "sparsegwas")]
    pub out_prefix: String,
}

#[derive(Args)]
pub struct FitArgs {
    #[command(flatten)]
    pub inputs: PhenotypeArgs,

    #[arg(long, value_enum)]
    pub model: ModelKind,

    /// Feature graph as `row column weight` lines (required for network-lasso)
    #[arg(long, value_name = "PATH")]
    pub graph: Option<PathBuf>,

    /// SNP-to-gene map used to annotate selected SNPs
    #[arg(long, value_name = "PATH")]
    pub genes: Option<PathBuf>,

    /// Fraction of samples held out for evaluation (overrides the config file)
    #[arg(long)]
    pub test_fraction: Option<f64>,

    /// Seed of the train/test shuffle (overrides the config file)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of cross-validation folds (overrides the config file)
    #[arg(long)]
    pub folds: Option<usize>,

    /// Degree convention of the incidence matrix (overrides the config file)
    #[arg(long, value_enum)]
    pub degree_convention: Option<DegreeConventionCli>,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Sample IDs, one integer per genotype row
    #[arg(long, value_name = "PATH")]
    pub samples: PathBuf,

    /// Genotype matrix with the model's SNP columns
    #[arg(long, value_name = "PATH")]
    pub genotypes: PathBuf,

    /// SNP names of the genotype columns; checked against the model when given
    #[arg(long, value_name = "PATH")]
    pub snps: Option<PathBuf>,

    /// Path to trained model file (.toml)
    #[arg(long)]
    pub model: PathBuf,

    #[arg(long, default_value = "predictions.tsv")]
    pub out: PathBuf,
}

#[derive(Args)]
pub struct IncidenceArgs {
    /// Feature graph as `row column weight` lines
    #[arg(long, value_name = "PATH")]
    pub graph: PathBuf,

    /// Number of features (graph nodes)
    #[arg(long)]
    pub n_features: usize,

    #[arg(long, value_enum, default_value_t = DegreeConventionCli::IncidentEdges)]
    pub degree_convention: DegreeConventionCli,

    #[arg(long, default_value = "incidence.tsv")]
    pub out: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "sparsegwas",
    about = "Univariate tests and sparse regression for genome-wide association data",
    long_about = "Aligns genotypes with a phenotype, runs per-SNP association tests, and fits \
                 OLS, Lasso, Elastic Net and network-constrained Lasso models with \
                 cross-validated hyperparameters."
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Per-SNP association tests (outputs: .assoc.tsv, .scatter.tsv)")]
    Associate(PhenotypeArgs),

    #[command(about = "Fit and evaluate a whole-genome model (outputs: .model.toml, .coefficients.tsv)")]
    Fit(FitArgs),

    #[command(about = "Apply a trained model to new genotypes (outputs: predictions.tsv)")]
    Predict(PredictArgs),

    #[command(about = "Build the incidence matrix of a feature graph (outputs: incidence.tsv)")]
    Incidence(IncidenceArgs),
}

fn output_path(prefix: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}.{suffix}"))
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            println!("Loading analysis configuration from: {}", path.display());
            Ok(AnalysisConfig::load(path)?)
        }
        None => Ok(AnalysisConfig::default()),
    }
}

fn load_aligned(
    args: &PhenotypeArgs,
    config: &AnalysisConfig,
) -> Result<AlignedDataset, Box<dyn std::error::Error>> {
    let genotypes: GenotypeData = load_genotypes(
        &args.genotype.snps,
        &args.genotype.samples,
        &args.genotype.genotypes,
    )?;
    let phenotypes = load_phenotypes(&args.phenotypes, config.separator_byte())?;
    let dataset = AlignedDataset::align(&genotypes, &phenotypes, &args.trait_name)?;
    println!(
        "Aligned {} samples x {} SNPs for trait '{}'.",
        dataset.n_samples(),
        dataset.n_snps(),
        dataset.trait_name
    );
    Ok(dataset)
}

fn run_associate(args: PhenotypeArgs) -> CliResult {
    let config = load_config(args.config.as_deref())?;
    let dataset = load_aligned(&args, &config)?;
    let pipeline = GwasPipeline::new(dataset, config);
    let scan = pipeline.associate()?;
    let snp_names = &pipeline.dataset().snp_names;

    let results_path = output_path(&args.out_prefix, "assoc.tsv");
    let scatter_path = output_path(&args.out_prefix, "scatter.tsv");
    write_association(&results_path, &scan, snp_names)?;
    write_scatter(&scatter_path, &scan, snp_names)?;

    println!("Bonferroni threshold: {:.3e}", scan.threshold);
    for hit in scan.significant() {
        println!(
            "  {}\tbeta={:.4}\tp={:.3e}",
            snp_names[hit.snp_index], hit.beta, hit.p_value
        );
    }
    println!(
        "{} significant SNPs. Results written to {} and {}",
        scan.significant().count(),
        results_path.display(),
        scatter_path.display()
    );
    Ok(())
}

fn print_report(report: &ModelReport) {
    let evaluation = &report.evaluation;
    println!("Model: {}", report.model.spec);
    if let Some(score) = report.model.cv_score {
        println!(
            "Mean cross-validated explained variance: {score:.4} ({} candidates)",
            report.n_candidates
        );
    }
    println!(
        "Test explained variance: {:.4}, R^2: {:.4}",
        evaluation.explained_variance, evaluation.r2
    );
    println!(
        "Nonzero coefficients: {} of {}",
        evaluation.n_nonzero,
        report.model.coefficients.len()
    );
    for snp in evaluation.selected.iter().take(20) {
        let genes = if snp.genes.is_empty() {
            String::new()
        } else {
            format!("\t[{}]", snp.genes.join(", "))
        };
        println!("  {}\t{:+.5}{}", snp.name, snp.coefficient, genes);
    }
    if evaluation.selected.len() > 20 {
        println!("  ... and {} more", evaluation.selected.len() - 20);
    }
}

fn run_fit(args: FitArgs) -> CliResult {
    let mut config = load_config(args.inputs.config.as_deref())?;
    if let Some(test_fraction) = args.test_fraction {
        config.split.test_fraction = test_fraction;
    }
    if let Some(seed) = args.seed {
        config.split.seed = seed;
    }
    if let Some(folds) = args.folds {
        config.search.folds = folds;
    }
    if let Some(convention) = args.degree_convention {
        config.graph.degree_convention = convention.into();
    }
    config.validate()?;

    let dataset = load_aligned(&args.inputs, &config)?;
    let mut pipeline = GwasPipeline::new(dataset, config);
    if let Some(genes_path) = &args.genes {
        let genes = load_gene_map(genes_path)?;
        println!("Loaded gene annotations for {} SNPs.", genes.len());
        pipeline = pipeline.with_genes(genes);
    }
    let split = pipeline.split()?;

    let report = match args.model {
        ModelKind::Ols => pipeline.fit_ols(&split)?,
        ModelKind::Lasso => pipeline.fit_lasso(&split)?,
        ModelKind::ElasticNet => pipeline.fit_elastic_net(&split)?,
        ModelKind::NetworkLasso => {
            let graph_path = args
                .graph
                .as_ref()
                .ok_or("--graph is required for the network-lasso model")?;
            let graph = load_feature_graph(graph_path, pipeline.dataset().n_snps())?;
            let incidence =
                IncidenceMatrix::from_graph(&graph, pipeline.config().graph.degree_convention)?;
            pipeline.fit_network_lasso(&split, &incidence)?
        }
    };
    print_report(&report);

    let prefix = &args.inputs.out_prefix;
    let model_path = output_path(prefix, "model.toml");
    let coefficients_path = output_path(prefix, "coefficients.tsv");
    let predictions_path = output_path(prefix, "test_predictions.tsv");
    report.model.save(&model_path)?;
    write_coefficients(&coefficients_path, &report.model, pipeline.genes())?;
    let test_predictions = report.model.predict(split.x_test.view())?;
    write_predictions(&predictions_path, &split.test_ids, test_predictions.view())?;
    println!(
        "Model saved to {}; coefficients written to {}; test predictions written to {}",
        model_path.display(),
        coefficients_path.display(),
        predictions_path.display()
    );
    Ok(())
}

fn run_predict(args: PredictArgs) -> CliResult {
    println!("Loading model from: {}", args.model.display());
    let model = TrainedModel::load(&args.model)?;
    let sample_ids = load_sample_ids(&args.samples)?;
    let genotypes = load_genotype_matrix(&args.genotypes)?;
    if genotypes.nrows() != sample_ids.len() {
        return Err(format!(
            "{} sample IDs for {} genotype rows",
            sample_ids.len(),
            genotypes.nrows()
        )
        .into());
    }
    if let Some(snps_path) = &args.snps {
        let snp_names = load_snp_names(snps_path)?;
        if snp_names != model.snp_names {
            return Err("the genotype SNP names do not match the model's SNPs".into());
        }
    }

    let predictions = model.predict(genotypes.view())?;
    write_predictions(&args.out, &sample_ids, predictions.view())?;
    println!(
        "Predicted '{}' for {} samples with {}. Output written to {}",
        model.trait_name,
        sample_ids.len(),
        model.spec,
        args.out.display()
    );
    Ok(())
}

fn run_incidence(args: IncidenceArgs) -> CliResult {
    let graph = load_feature_graph(&args.graph, args.n_features)?;
    let incidence = IncidenceMatrix::from_graph(&graph, args.degree_convention.into())?;
    write_incidence(&args.out, &incidence)?;
    println!(
        "Incidence matrix: {} edges x {} features, {} nonzeros. Written to {}",
        incidence.n_edges(),
        incidence.n_features(),
        incidence.nnz(),
        args.out.display()
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let Cli { verbose, command } = cli;

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match command {
        Some(Commands::Associate(args)) => run_associate(args),
        Some(Commands::Fit(args)) => run_fit(args),
        Some(Commands::Predict(args)) => run_predict(args),
        Some(Commands::Incidence(args)) => run_incidence(args),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
