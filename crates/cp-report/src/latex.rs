//! LaTeX `tabular` rendering of fitted models.

use cp_core::{Error, Result};
use cp_inference::{CovarianceKind, FittedModel, Inference};
use serde::{Deserialize, Serialize};

/// Rendering options shared by both table kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    /// Wrap the tabular in a `table` float with this caption.
    pub caption: Option<String>,
    /// `\label{}` of the float.
    pub label: Option<String>,
    /// Confidence intervals are `1 - alpha`.
    pub alpha: f64,
    /// Digits after the decimal point.
    pub decimals: usize,
    /// Report incidence-rate ratios for log-link models.
    pub irr: bool,
    /// p-value thresholds for one, two, three stars.
    pub star_levels: Vec<f64>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            caption: None,
            label: None,
            alpha: 0.05,
            decimals: 3,
            irr: false,
            star_levels: vec![0.1, 0.05, 0.01],
        }
    }
}

/// Escape TeX special characters.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str(r"\textbackslash{}"),
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Significance stars: one per threshold that `p` falls below.
pub fn stars(p: f64, levels: &[f64]) -> String {
    "*".repeat(levels.iter().filter(|&&l| p < l).count())
}

fn num(v: f64, decimals: usize) -> String {
    if v.is_finite() { format!("{:.*}", decimals, v) } else { "--".to_string() }
}

fn wrap(tabular: String, opts: &TableOptions) -> String {
    if opts.caption.is_none() && opts.label.is_none() {
        return tabular;
    }
    let mut out = String::from("\\begin{table}[htbp]\n\\centering\n");
    if let Some(c) = &opts.caption {
        out.push_str(&format!("\\caption{{{}}}\n", escape(c)));
    }
    if let Some(l) = &opts.label {
        out.push_str(&format!("\\label{{{}}}\n", l));
    }
    out.push_str(&tabular);
    out.push_str("\\end{table}\n");
    out
}

fn covariance_note(model: &FittedModel) -> String {
    match &model.covariance_kind {
        CovarianceKind::Unadjusted => "Conventional standard errors".to_string(),
        CovarianceKind::Robust => "Heteroskedasticity-robust (HC1) standard errors".to_string(),
        CovarianceKind::Clustered { column, n_clusters } => {
            format!("Standard errors clustered by {} ({} clusters)", escape(column), n_clusters)
        }
        CovarianceKind::HuberH1 => "Huber H1 standard errors".to_string(),
        CovarianceKind::ModelBased => "Model-based standard errors".to_string(),
    }
}

fn check_alpha(alpha: f64) -> Result<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(Error::Validation(format!("alpha must be in (0, 1), got {}", alpha)));
    }
    Ok(())
}

/// Coefficient / std. error / t / p / interval table of one model.
pub fn coefficient_table(model: &FittedModel, opts: &TableOptions) -> Result<String> {
    check_alpha(opts.alpha)?;
    let d = opts.decimals;
    let p = model.p_values()?;
    let t = model.t_values();
    let ci = model.conf_int(opts.alpha)?;
    let irr = opts.irr && model.estimator == "fe_poisson";
    let (coefs, ci) = if irr {
        let c = model.incidence_rate_ratios()?;
        let bounds = ci.iter().map(|(lo, hi)| (lo.exp(), hi.exp())).collect::<Vec<_>>();
        (c, bounds)
    } else {
        (model.coefficient_list(), ci)
    };
    let stat = match model.inference {
        Inference::StudentT => "t",
        Inference::Normal => "z",
    };
    let level = (1e6 * 100.0 * (1.0 - opts.alpha)).round() / 1e6;

    let mut s = String::from("\\begin{tabular}{lrrrrrr}\n\\hline\n");
    s.push_str(&format!(
        " & {} & Std. Err. & ${}$ & $P>|{}|$ & \\multicolumn{{2}}{{c}}{{[{}\\% Conf. Interval]}} \\\\\n\\hline\n",
        if irr { "IRR" } else { "Coef." },
        stat,
        stat,
        level
    ));
    for (i, c) in coefs.iter().enumerate() {
        s.push_str(&format!(
            "{} & {} & {} & {} & {} & {} & {} \\\\\n",
            escape(&c.name),
            num(c.estimate, d),
            num(c.std_error, d),
            num(t[i], d),
            num(p[i], d),
            num(ci[i].0, d),
            num(ci[i].1, d)
        ));
    }
    s.push_str("\\hline\n");
    let mut footer = format!("Observations: {}; df resid: {}", model.n_obs, model.df_resid);
    if let Some(r2) = model.r_squared {
        footer.push_str(&format!("; $R^2$: {}", num(r2, d)));
    }
    s.push_str(&format!("\\multicolumn{{7}}{{l}}{{{}}} \\\\\n", footer));
    s.push_str(&format!("\\multicolumn{{7}}{{l}}{{{}}} \\\\\n", covariance_note(model)));
    if !model.dropped.is_empty() {
        let names: Vec<String> = model.dropped.iter().map(|n| escape(n)).collect();
        s.push_str(&format!("\\multicolumn{{7}}{{l}}{{Dropped: {}}} \\\\\n", names.join(", ")));
    }
    s.push_str("\\hline\n\\end{tabular}\n");
    Ok(wrap(s, opts))
}

/// Side-by-side table of several models: estimates with stars, standard
/// errors in parentheses underneath.
pub fn comparison_table(models: &[(&str, &FittedModel)], opts: &TableOptions) -> Result<String> {
    if models.is_empty() {
        return Err(Error::Validation("comparison table needs at least one model".into()));
    }
    let d = opts.decimals;
    let m = models.len();

    let mut rows: Vec<&str> = Vec::new();
    for (_, model) in models {
        for n in &model.names {
            if !rows.contains(&n.as_str()) {
                rows.push(n.as_str());
            }
        }
    }
    let p_values = models.iter().map(|(_, model)| model.p_values()).collect::<Result<Vec<_>>>()?;

    let mut s = format!("\\begin{{tabular}}{{l{}}}\n\\hline\n", "c".repeat(m));
    let heads: Vec<String> = models.iter().enumerate().map(|(i, (title, _))| format!("({}) {}", i + 1, escape(title))).collect();
    s.push_str(&format!(" & {} \\\\\n\\hline\n", heads.join(" & ")));
    for name in rows {
        let mut est = vec![escape(name)];
        let mut se = vec![String::new()];
        for (j, (_, model)) in models.iter().enumerate() {
            match model.names.iter().position(|n| n == name) {
                Some(i) => {
                    est.push(format!("{}{}", num(model.coefficients[i], d), stars(p_values[j][i], &opts.star_levels)));
                    se.push(format!("({})", num(model.std_errors[i], d)));
                }
                None => {
                    est.push(String::new());
                    se.push(String::new());
                }
            }
        }
        s.push_str(&format!("{} \\\\\n{} \\\\\n", est.join(" & "), se.join(" & ")));
    }
    s.push_str("\\hline\n");
    let obs: Vec<String> = models.iter().map(|(_, model)| model.n_obs.to_string()).collect();
    s.push_str(&format!("Observations & {} \\\\\n", obs.join(" & ")));
    let r2: Vec<String> = models.iter().map(|(_, model)| model.r_squared.map(|v| num(v, d)).unwrap_or_default()).collect();
    s.push_str(&format!("$R^2$ & {} \\\\\n", r2.join(" & ")));
    let est: Vec<String> = models.iter().map(|(_, model)| escape(&model.estimator)).collect();
    s.push_str(&format!("Estimator & {} \\\\\n\\hline\n", est.join(" & ")));

    let mut levels = opts.star_levels.clone();
    levels.sort_by(|a, b| b.total_cmp(a));
    let legend: Vec<String> = levels.iter().enumerate().map(|(i, l)| format!("{} $p<{}$", "*".repeat(i + 1), l)).collect();
    if !legend.is_empty() {
        s.push_str(&format!("\\multicolumn{{{}}}{{l}}{{\\footnotesize {}}} \\\\\n", m + 1, legend.join(", ")));
    }
    s.push_str("\\end{tabular}\n");
    Ok(wrap(s, opts))
}
