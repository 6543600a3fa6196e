//! crimepanel CLI

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use cp_core::FrameTransform;
use cp_inference::{CoefficientTest, Divisor, RegressionSpec, WelchConfig};
use cp_prep::{GenerateStep, Normalizer, RenameMap, ReshapeConfig, Substitution};
use cp_report::{ModelArtifact, TableOptions, TestArtifact, TestOutcome};
use cp_translate::FrameFormat;
use std::path::{Path, PathBuf};

mod run;
mod study;

#[derive(Parser)]
#[command(name = "crimepanel")]
#[command(about = "crimepanel - difference-in-differences on block-level crime panels")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum MapArg {
    Block,
    Monthly,
    Weekly,
}

impl From<MapArg> for RenameMap {
    fn from(m: MapArg) -> Self {
        match m {
            MapArg::Block => RenameMap::Block,
            MapArg::Monthly => RenameMap::Monthly,
            MapArg::Weekly => RenameMap::Weekly,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize column names and run generation steps on a raw file
    Clean {
        /// Input frame (.dta, .csv, .parquet)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format; inferred from the extension when omitted
        #[arg(long)]
        format: Option<String>,

        /// Built-in rename map
        #[arg(long, value_enum)]
        map: Option<MapArg>,

        /// Extra substitution rules (YAML/JSON list of {pattern, replacement})
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Generation steps (YAML/JSON list)
        #[arg(long)]
        steps: Option<PathBuf>,

        /// Output frame (.csv or .parquet)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Reshape wide theft slots into a block × period panel
    Reshape {
        /// Cleaned block-level frame
        #[arg(short, long)]
        input: PathBuf,

        /// Reshape config (YAML/JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output panel (.csv or .parquet)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Fit a regression spec
    Fit {
        /// Input frame
        #[arg(short, long)]
        input: PathBuf,

        /// Regression spec (YAML/JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Output model artifact (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Welch two-sample t-test
    Welch {
        /// Input frame
        #[arg(short, long)]
        input: PathBuf,

        /// Welch config (YAML/JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Test one coefficient of a fitted model against a target value
    CoefTest {
        /// Model artifact
        #[arg(short, long)]
        model: PathBuf,

        /// Coefficient name
        #[arg(long)]
        coefficient: String,

        /// Hypothesized value
        #[arg(long, allow_hyphen_values = true)]
        target: f64,

        /// Divide estimate and SE by a number or by another coefficient's estimate
        #[arg(long, allow_hyphen_values = true)]
        divisor: Option<String>,

        /// Significance level
        #[arg(long, default_value = "0.05")]
        alpha: f64,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// LaTeX table of one model, or a comparison of several
    Table {
        /// Model artifacts (repeatable)
        #[arg(short, long = "model", required = true)]
        models: Vec<PathBuf>,

        /// Column titles, in model order
        #[arg(long = "title")]
        titles: Vec<String>,

        /// Table options (YAML/JSON)
        #[arg(long)]
        options: Option<PathBuf>,

        /// Report incidence-rate ratios for Poisson models
        #[arg(long)]
        irr: bool,

        /// Output .tex file. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize a frame: rows, columns, types, missing counts
    Inspect {
        /// Input frame
        #[arg(short, long)]
        input: PathBuf,

        /// Input format; inferred from the extension when omitted
        #[arg(long)]
        format: Option<String>,
    },

    /// Run a study file (task graph with on-disk caching)
    Run {
        /// Study file (YAML/JSON, schema_version crimepanel_study_v0)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory (artifacts/ and stamps/ are created inside)
        #[arg(long)]
        out_dir: PathBuf,

        /// Re-run every task even if its stamp is current
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Clean { input, format, map, rules, steps, output } => {
            cmd_clean(&input, format.as_deref(), map, rules.as_ref(), steps.as_ref(), &output)
        }
        Commands::Reshape { input, config, output } => cmd_reshape(&input, &config, &output),
        Commands::Fit { input, spec, output } => cmd_fit(&input, &spec, output.as_ref()),
        Commands::Welch { input, config, output } => cmd_welch(&input, &config, output.as_ref()),
        Commands::CoefTest { model, coefficient, target, divisor, alpha, output } => {
            cmd_coef_test(&model, coefficient, target, divisor.as_deref(), alpha, output.as_ref())
        }
        Commands::Table { models, titles, options, irr, output } => {
            cmd_table(&models, &titles, options.as_ref(), irr, output.as_ref())
        }
        Commands::Inspect { input, format } => cmd_inspect(&input, format.as_deref()),
        Commands::Run { config, out_dir, force } => cmd_run(&config, &out_dir, force),
        Commands::Version => {
            println!("crimepanel {}", cp_core::VERSION);
            Ok(())
        }
    }
}

fn read_input(path: &Path, format: Option<&str>) -> Result<cp_core::Frame> {
    let format = format.map(FrameFormat::from_name).transpose()?;
    tracing::info!(path = %path.display(), "reading frame");
    let frame = cp_translate::read_frame(path, format)?;
    tracing::info!(rows = frame.n_rows(), cols = frame.n_cols(), "frame loaded");
    Ok(frame)
}

fn write_json<T: serde::Serialize>(output: Option<&PathBuf>, value: &T) -> Result<()> {
    if let Some(path) = output {
        cp_report::write_json(path, value)?;
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

fn write_text(output: Option<&PathBuf>, text: &str) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, text)?;
    } else {
        print!("{}", text);
    }
    Ok(())
}

fn cmd_clean(
    input: &Path,
    format: Option<&str>,
    map: Option<MapArg>,
    rules: Option<&PathBuf>,
    steps: Option<&PathBuf>,
    output: &Path,
) -> Result<()> {
    let mut frame = read_input(input, format)?;
    let mut substitutions: Vec<Substitution> = map.map(|m| RenameMap::from(m).rules()).unwrap_or_default();
    if let Some(path) = rules {
        let extra: Vec<Substitution> = study::read_config(path)?;
        substitutions.extend(extra);
    }
    if !substitutions.is_empty() {
        frame = Normalizer::new(substitutions)?.apply(&frame)?;
    }
    if let Some(path) = steps {
        let steps: Vec<GenerateStep> = study::read_config(path)?;
        frame = cp_prep::apply_steps(&frame, &steps)?;
    }
    cp_translate::write_frame(output, &frame, None)?;
    tracing::info!(path = %output.display(), "cleaned frame written");
    Ok(())
}

fn cmd_reshape(input: &Path, config: &Path, output: &Path) -> Result<()> {
    let cfg: ReshapeConfig = study::read_config(config)?;
    let panel = cp_prep::reshape_panel(&read_input(input, None)?, &cfg)?;
    cp_translate::write_frame(output, &panel, None)?;
    tracing::info!(rows = panel.n_rows(), path = %output.display(), "panel written");
    Ok(())
}

fn cmd_fit(input: &Path, spec: &Path, output: Option<&PathBuf>) -> Result<()> {
    let spec: RegressionSpec = study::read_config(spec)?;
    let model = cp_inference::fit(&read_input(input, None)?, &spec)?;
    tracing::info!(estimator = %model.estimator, n_obs = model.n_obs, "fit complete");
    let artifact = ModelArtifact::new(model).with_meta("input", input.display().to_string());
    write_json(output, &artifact)
}

fn cmd_welch(input: &Path, config: &Path, output: Option<&PathBuf>) -> Result<()> {
    let cfg: WelchConfig = study::read_config(config)?;
    let result = cp_inference::welch_test(&read_input(input, None)?, &cfg)?;
    tracing::info!(t = result.t, p = result.p_value, "welch test complete");
    write_json(output, &TestArtifact::new(vec![TestOutcome::Welch { config: cfg, result }]))
}

fn parse_divisor(s: &str) -> Divisor {
    match s.parse::<f64>() {
        Ok(v) => Divisor::Constant(v),
        Err(_) => Divisor::Coefficient(s.to_string()),
    }
}

fn cmd_coef_test(
    model: &Path,
    coefficient: String,
    target: f64,
    divisor: Option<&str>,
    alpha: f64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let artifact = cp_report::read_model(model)?;
    let test = CoefficientTest { coefficient, target, divisor: divisor.map(parse_divisor), alpha };
    let result = cp_inference::coefficient_test(&artifact.model, &test)?;
    tracing::info!(t = result.t, p = result.p_value, significant = result.significant, "coefficient test complete");
    let outcome = TestOutcome::Coefficient { model: model.display().to_string(), test, result };
    write_json(output, &TestArtifact::new(vec![outcome]))
}

fn cmd_table(
    models: &[PathBuf],
    titles: &[String],
    options: Option<&PathBuf>,
    irr: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let mut opts: TableOptions = match options {
        Some(p) => study::read_config(p)?,
        None => TableOptions::default(),
    };
    opts.irr |= irr;
    let fitted = models
        .iter()
        .map(|p| cp_report::read_model(p).map(|a| a.model))
        .collect::<cp_core::Result<Vec<_>>>()?;
    let tex = if fitted.len() == 1 {
        cp_report::coefficient_table(&fitted[0], &opts)?
    } else {
        let names: Vec<String> = (0..fitted.len())
            .map(|i| {
                titles.get(i).cloned().unwrap_or_else(|| {
                    models[i].file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
                })
            })
            .collect();
        let columns: Vec<(&str, &_)> = names.iter().map(String::as_str).zip(fitted.iter()).collect();
        cp_report::comparison_table(&columns, &opts)?
    };
    write_text(output, &tex)
}

fn cmd_inspect(input: &Path, format: Option<&str>) -> Result<()> {
    let frame = read_input(input, format)?;
    let columns: Vec<serde_json::Value> = frame
        .iter()
        .map(|(name, col)| {
            serde_json::json!({
                "name": name,
                "dtype": col.dtype(),
                "missing": col.missing_count(),
            })
        })
        .collect();
    let summary = serde_json::json!({
        "path": input.display().to_string(),
        "sha256": run::sha256_file(input)?,
        "n_rows": frame.n_rows(),
        "n_cols": frame.n_cols(),
        "columns": columns,
    });
    write_json(None, &summary)
}

fn cmd_run(config: &Path, out_dir: &Path, force: bool) -> Result<()> {
    let study = study::read_study(config)?;
    tracing::info!(tasks = study.tasks.len(), name = ?study.name, "study loaded");
    let study_dir = config.parent().map(Path::to_path_buf).unwrap_or_default();
    let summary = run::run_study(&study, &study_dir, out_dir, force)?;
    tracing::info!(executed = summary.executed.len(), skipped = summary.skipped.len(), "run complete");
    write_json(None, &summary)
}
