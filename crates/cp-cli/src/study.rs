//! Study file v0 (YAML or JSON) parsing and task-graph planning.
//!
//! A study lists tasks; each task consumes named artifacts and produces one.
//! Loading a study reads the study file and nothing else.

use anyhow::Result;
use cp_inference::{CoefficientTest, RegressionSpec, WelchConfig};
use cp_prep::{GenerateStep, RenameMap, ReshapeConfig, Substitution};
use cp_report::TableOptions;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

pub const STUDY_V0: &str = "crimepanel_study_v0";

/// Read a config record, JSON when the extension is `.json`, YAML otherwise.
pub fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let value = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    Ok(value)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub schema_version: String,
    #[serde(default)]
    pub name: Option<String>,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub output: String,
    #[serde(flatten)]
    pub action: TaskAction,
}

/// Column renaming applied by a `load` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rename {
    Builtin(RenameMap),
    Rules(Vec<Substitution>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskAction {
    Load {
        /// Relative paths resolve against the study file's directory.
        path: PathBuf,
        #[serde(default)]
        format: Option<String>,
        #[serde(default)]
        rename: Option<Rename>,
        #[serde(default)]
        steps: Vec<GenerateStep>,
    },
    Generate {
        steps: Vec<GenerateStep>,
    },
    Reshape {
        config: ReshapeConfig,
    },
    Fit {
        spec: RegressionSpec,
    },
    Welch {
        config: WelchConfig,
    },
    CoefTest {
        tests: Vec<CoefficientTest>,
    },
    Table {
        #[serde(default)]
        titles: Vec<String>,
        #[serde(default)]
        options: TableOptions,
    },
}

/// What an artifact holds, which fixes its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Frame,
    Model,
    Tests,
    Table,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Frame => "parquet",
            ArtifactKind::Model | ArtifactKind::Tests => "json",
            ArtifactKind::Table => "tex",
        }
    }
}

impl TaskAction {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TaskAction::Load { .. } => "load",
            TaskAction::Generate { .. } => "generate",
            TaskAction::Reshape { .. } => "reshape",
            TaskAction::Fit { .. } => "fit",
            TaskAction::Welch { .. } => "welch",
            TaskAction::CoefTest { .. } => "coef_test",
            TaskAction::Table { .. } => "table",
        }
    }

    pub fn output_kind(&self) -> ArtifactKind {
        match self {
            TaskAction::Load { .. } | TaskAction::Generate { .. } | TaskAction::Reshape { .. } => {
                ArtifactKind::Frame
            }
            TaskAction::Fit { .. } => ArtifactKind::Model,
            TaskAction::Welch { .. } | TaskAction::CoefTest { .. } => ArtifactKind::Tests,
            TaskAction::Table { .. } => ArtifactKind::Table,
        }
    }

    /// Expected input kind and the allowed `(min, max)` input count.
    fn input_contract(&self) -> (ArtifactKind, usize, usize) {
        match self {
            TaskAction::Load { .. } => (ArtifactKind::Frame, 0, 0),
            TaskAction::Generate { .. }
            | TaskAction::Reshape { .. }
            | TaskAction::Fit { .. }
            | TaskAction::Welch { .. } => (ArtifactKind::Frame, 1, 1),
            TaskAction::CoefTest { .. } => (ArtifactKind::Model, 1, 1),
            TaskAction::Table { .. } => (ArtifactKind::Model, 1, usize::MAX),
        }
    }
}

pub fn read_study(path: &Path) -> Result<Study> {
    let bytes = std::fs::read(path)?;
    // YAML is a superset of JSON, so one parse covers both.
    let header: serde_yaml_ng::Value = serde_yaml_ng::from_slice(&bytes)?;
    let schema_version = header.get("schema_version").and_then(|v| v.as_str()).map(|s| s.to_string());
    if schema_version.as_deref() != Some(STUDY_V0) {
        anyhow::bail!(
            "{}: unsupported schema_version {:?} (expected '{}')",
            path.display(),
            schema_version,
            STUDY_V0
        );
    }
    read_config(path)
}

/// Validate the graph and return task indices in execution order.
///
/// Kahn's algorithm; ready tasks run in declaration order.
pub fn plan(study: &Study) -> Result<Vec<usize>> {
    let mut producer: HashMap<&str, usize> = HashMap::new();
    let mut ids: HashMap<&str, usize> = HashMap::new();
    for (i, t) in study.tasks.iter().enumerate() {
        if ids.insert(t.id.as_str(), i).is_some() {
            anyhow::bail!("duplicate task id '{}'", t.id);
        }
        if let Some(j) = producer.insert(t.output.as_str(), i) {
            anyhow::bail!(
                "artifact '{}' is produced by both '{}' and '{}'",
                t.output,
                study.tasks[j].id,
                t.id
            );
        }
    }

    let n = study.tasks.len();
    let mut indegree = vec![0usize; n];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, t) in study.tasks.iter().enumerate() {
        let (want, min, max) = t.action.input_contract();
        if t.inputs.len() < min || t.inputs.len() > max {
            anyhow::bail!(
                "task '{}' ({}) takes {} input(s), got {}",
                t.id,
                t.action.kind_name(),
                if min == max { min.to_string() } else { format!("at least {}", min) },
                t.inputs.len()
            );
        }
        for input in &t.inputs {
            let Some(&p) = producer.get(input.as_str()) else {
                anyhow::bail!("task '{}' reads unknown artifact '{}'", t.id, input);
            };
            let got = study.tasks[p].action.output_kind();
            if got != want {
                anyhow::bail!(
                    "task '{}' expects a {:?} input but '{}' is a {:?}",
                    t.id,
                    want,
                    input,
                    got
                );
            }
            indegree[i] += 1;
            consumers[p].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_front() {
        order.push(i);
        let mut next = Vec::new();
        for &c in &consumers[i] {
            indegree[c] -= 1;
            if indegree[c] == 0 {
                next.push(c);
            }
        }
        next.sort_unstable();
        ready.extend(next);
    }
    if order.len() != n {
        let stuck: Vec<&str> =
            (0..n).filter(|i| !order.contains(i)).map(|i| study.tasks[i].id.as_str()).collect();
        anyhow::bail!("task graph has a cycle through {:?}", stuck);
    }
    Ok(order)
}
