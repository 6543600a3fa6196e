//! `crimepanel run`: execute a study's task graph with on-disk caching.
//!
//! Every task writes one artifact under `<out_dir>/artifacts` and a stamp
//! under `<out_dir>/stamps`. The stamp is the SHA-256 of the task's
//! serialized config and the bytes of everything it reads; a task whose
//! artifact exists and whose stamp is unchanged is skipped.

use anyhow::{Context, Result};
use cp_core::{Frame, FrameTransform};
use cp_prep::{Normalizer, apply_steps, reshape_panel};
use cp_report::{ModelArtifact, TestArtifact, TestOutcome};
use cp_translate::{FrameFormat, read_frame, write_frame};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::study::{ArtifactKind, Rename, Study, Task, TaskAction, plan};

const STAMP_DOMAIN: &[u8] = b"crimepanel-stamp-v0\0";

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub artifacts_dir: PathBuf,
    pub stamps_dir: PathBuf,
}

pub fn derive_paths(out_dir: &Path) -> RunPaths {
    RunPaths {
        artifacts_dir: out_dir.join("artifacts"),
        stamps_dir: out_dir.join("stamps"),
    }
}

impl RunPaths {
    pub fn artifact(&self, name: &str, kind: ArtifactKind) -> PathBuf {
        self.artifacts_dir.join(format!("{}.{}", name, kind.extension()))
    }

    fn stamp(&self, task_id: &str) -> PathBuf {
        self.stamps_dir.join(format!("{}.sha256", task_id))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    /// Artifact name → path.
    pub artifacts: BTreeMap<String, PathBuf>,
}

fn hex(digest: &[u8]) -> String {
    let mut s = String::with_capacity(2 * digest.len());
    for b in digest {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
}

/// Files a task reads, in a fixed order.
fn task_reads(task: &Task, inputs: &[PathBuf], study_dir: &Path) -> Vec<PathBuf> {
    let mut reads = inputs.to_vec();
    if let TaskAction::Load { path, .. } = &task.action {
        reads.push(resolve(study_dir, path));
    }
    reads
}

fn compute_stamp(task: &Task, reads: &[PathBuf]) -> Result<String> {
    let mut h = Sha256::new();
    h.update(STAMP_DOMAIN);
    h.update(cp_core::VERSION.as_bytes());
    h.update(serde_json::to_vec(task)?);
    for p in reads {
        let bytes = std::fs::read(p).with_context(|| format!("reading {}", p.display()))?;
        h.update((bytes.len() as u64).to_le_bytes());
        h.update(&bytes);
    }
    Ok(hex(&h.finalize()))
}

fn read_parquet(path: &Path) -> Result<Frame> {
    Ok(read_frame(path, Some(FrameFormat::Parquet))?)
}

fn write_parquet(path: &Path, frame: &Frame) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(write_frame(path, frame, Some(FrameFormat::Parquet))?)
}

fn execute(task: &Task, inputs: &[PathBuf], output: &Path, study_dir: &Path) -> Result<()> {
    match &task.action {
        TaskAction::Load { path, format, rename, steps } => {
            let source = resolve(study_dir, path);
            let format = format.as_deref().map(FrameFormat::from_name).transpose()?;
            let mut frame = read_frame(&source, format).with_context(|| format!("loading {}", source.display()))?;
            if let Some(rename) = rename {
                let normalizer = match rename {
                    Rename::Builtin(map) => map.normalizer()?,
                    Rename::Rules(rules) => Normalizer::new(rules.clone())?,
                };
                frame = normalizer.apply(&frame)?;
            }
            frame = apply_steps(&frame, steps)?;
            tracing::info!(rows = frame.n_rows(), cols = frame.n_cols(), "loaded {}", source.display());
            write_parquet(output, &frame)
        }
        TaskAction::Generate { steps } => {
            let frame = apply_steps(&read_parquet(&inputs[0])?, steps)?;
            write_parquet(output, &frame)
        }
        TaskAction::Reshape { config } => {
            let panel = reshape_panel(&read_parquet(&inputs[0])?, config)?;
            tracing::info!(rows = panel.n_rows(), "reshaped panel");
            write_parquet(output, &panel)
        }
        TaskAction::Fit { spec } => {
            let model = cp_inference::fit(&read_parquet(&inputs[0])?, spec)?;
            tracing::info!(estimator = %model.estimator, n_obs = model.n_obs, "fit complete");
            let artifact = ModelArtifact::new(model).with_meta("task", task.id.as_str()).with_meta(
                "input",
                task.inputs.first().map(String::as_str).unwrap_or_default(),
            );
            Ok(cp_report::write_model(output, &artifact)?)
        }
        TaskAction::Welch { config } => {
            let result = cp_inference::welch_test(&read_parquet(&inputs[0])?, config)?;
            let outcome = TestOutcome::Welch { config: config.clone(), result };
            Ok(cp_report::write_tests(output, &TestArtifact::new(vec![outcome]))?)
        }
        TaskAction::CoefTest { tests } => {
            let model = cp_report::read_model(&inputs[0])?.model;
            let mut outcomes = Vec::with_capacity(tests.len());
            for test in tests {
                let result = cp_inference::coefficient_test(&model, test)?;
                outcomes.push(TestOutcome::Coefficient {
                    model: task.inputs[0].clone(),
                    test: test.clone(),
                    result,
                });
            }
            Ok(cp_report::write_tests(output, &TestArtifact::new(outcomes))?)
        }
        TaskAction::Table { titles, options } => {
            let models = inputs
                .iter()
                .map(|p| cp_report::read_model(p).map(|a| a.model))
                .collect::<cp_core::Result<Vec<_>>>()?;
            let tex = if models.len() == 1 {
                cp_report::coefficient_table(&models[0], options)?
            } else {
                let names: Vec<&str> = (0..models.len())
                    .map(|i| titles.get(i).unwrap_or(&task.inputs[i]).as_str())
                    .collect();
                let columns: Vec<(&str, &_)> = names.into_iter().zip(models.iter()).collect();
                cp_report::comparison_table(&columns, options)?
            };
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(output, tex)?;
            Ok(())
        }
    }
}

pub fn run_study(study: &Study, study_dir: &Path, out_dir: &Path, force: bool) -> Result<RunSummary> {
    let order = plan(study)?;
    let paths = derive_paths(out_dir);
    std::fs::create_dir_all(&paths.artifacts_dir)?;
    std::fs::create_dir_all(&paths.stamps_dir)?;

    let kinds: BTreeMap<&str, ArtifactKind> =
        study.tasks.iter().map(|t| (t.output.as_str(), t.action.output_kind())).collect();
    let mut summary = RunSummary::default();

    for i in order {
        let task = &study.tasks[i];
        let inputs: Vec<PathBuf> = task.inputs.iter().map(|name| paths.artifact(name, kinds[name.as_str()])).collect();
        let output = paths.artifact(&task.output, task.action.output_kind());
        let stamp_path = paths.stamp(&task.id);
        let stamp = compute_stamp(task, &task_reads(task, &inputs, study_dir))?;

        let cached = !force
            && output.is_file()
            && std::fs::read_to_string(&stamp_path).map(|s| s.trim() == stamp).unwrap_or(false);
        if cached {
            tracing::info!(task = %task.id, "up to date, skipping");
            summary.skipped.push(task.id.clone());
        } else {
            tracing::info!(task = %task.id, kind = task.action.kind_name(), "running");
            execute(task, &inputs, &output, study_dir).with_context(|| format!("task '{}' failed", task.id))?;
            std::fs::write(&stamp_path, format!("{}\n", stamp))?;
            summary.executed.push(task.id.clone());
        }
        summary.artifacts.insert(task.output.clone(), output);
    }
    Ok(summary)
}

/// SHA-256 of a file, as shown by `crimepanel inspect`.
pub fn sha256_file(path: &Path) -> Result<String> {
    Ok(sha256_hex(&std::fs::read(path)?))
}
