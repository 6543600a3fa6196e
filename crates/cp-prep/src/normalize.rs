//! Raw column code → semantic name normalization.
//!
//! The raw files use short Spanish abbreviations (`observ`, `institu1`,
//! `rmes12`, `totrob`, ...). A [`Normalizer`] applies an ordered list of
//! substring substitutions to every column name. Order matters: a later
//! rule may match text produced by an earlier one (`totrob` → `total_rob`
//! → `total_thefts`). Names no rule matches pass through unchanged.

use cp_core::{Error, Frame, FrameTransform, Result};
use serde::{Deserialize, Serialize};

/// One `pattern → replacement` substring rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    /// Substring to look for.
    pub pattern: String,
    /// Text that replaces every occurrence.
    pub replacement: String,
}

impl Substitution {
    /// Convenience constructor.
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), replacement: replacement.into() }
    }
}

/// Built-in rename maps, one per raw dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameMap {
    /// Block-level crime records with numbered theft slots.
    Block,
    /// Authors' block × month panel.
    Monthly,
    /// Authors' block × week panel.
    Weekly,
}

const STATIC_RULES: [(&str, &str); 10] = [
    ("observ", "block"),
    ("barrio", "neighborhood"),
    ("calle", "street"),
    ("altura", "street_number"),
    ("institu1", "jewish_inst"),
    ("institu3", "jewish_inst_1_block"),
    ("distanci", "distance"),
    ("edpub", "public_building"),
    ("estserv", "gas_station"),
    ("banco", "bank"),
];

const SLOT_RULES: [(&str, &str); 6] = [
    ("rmes", "theft_month_"),
    ("rsem", "theft_week_"),
    ("rhora", "theft_hour_"),
    ("rdia", "theft_weekday_"),
    ("rval", "theft_value_"),
    ("resq", "theft_corner_"),
];

const PANEL_RULES: [(&str, &str); 2] = [("totrob", "total_rob"), ("rob", "thefts")];

impl RenameMap {
    /// Ordered substitution rules of this map.
    pub fn rules(self) -> Vec<Substitution> {
        let mut rules: Vec<Substitution> =
            STATIC_RULES.iter().map(|(p, r)| Substitution::new(*p, *r)).collect();
        match self {
            RenameMap::Block => {
                rules.extend(SLOT_RULES.iter().map(|(p, r)| Substitution::new(*p, *r)));
            }
            RenameMap::Monthly => {
                rules.extend(PANEL_RULES.iter().map(|(p, r)| Substitution::new(*p, *r)));
                rules.push(Substitution::new("mes", "month"));
            }
            RenameMap::Weekly => {
                rules.extend(PANEL_RULES.iter().map(|(p, r)| Substitution::new(*p, *r)));
                rules.push(Substitution::new("semana", "week"));
                rules.push(Substitution::new("mes", "month"));
            }
        }
        rules
    }

    /// Validated normalizer for this map.
    pub fn normalizer(self) -> Result<Normalizer> {
        Normalizer::new(self.rules())
    }
}

/// Ordered substring substitution over column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalizer {
    rules: Vec<Substitution>,
}

impl Normalizer {
    /// Build a normalizer.
    ///
    /// Rejects empty patterns, and rule sets that are not idempotent on
    /// their own output: normalizing the chained result of any rule's
    /// pattern a second time must leave it unchanged.
    pub fn new(rules: Vec<Substitution>) -> Result<Self> {
        if let Some(r) = rules.iter().find(|r| r.pattern.is_empty()) {
            return Err(Error::Validation(format!(
                "empty substitution pattern (replacement '{}')",
                r.replacement
            )));
        }
        let n = Self { rules };
        for rule in &n.rules {
            let once = n.normalize(&rule.pattern);
            let twice = n.normalize(&once);
            if once != twice {
                return Err(Error::Validation(format!(
                    "rename rules are not idempotent: '{}' -> '{}' -> '{}'",
                    rule.pattern, once, twice
                )));
            }
        }
        Ok(n)
    }

    /// The rules, in application order.
    pub fn rules(&self) -> &[Substitution] {
        &self.rules
    }

    /// Normalize one column name.
    pub fn normalize(&self, name: &str) -> String {
        self.rules.iter().fold(name.to_string(), |acc, rule| {
            if acc.contains(&rule.pattern) { acc.replace(&rule.pattern, &rule.replacement) } else { acc }
        })
    }

    /// Rename every column of a frame. Rows are untouched.
    pub fn normalize_frame(&self, frame: &Frame) -> Result<Frame> {
        let out = frame.rename_with(|name| self.normalize(name))?;
        let renamed = frame.names().iter().zip(out.names()).filter(|(a, b)| a != b).count();
        log::debug!("normalized {} of {} column names", renamed, frame.n_cols());
        Ok(out)
    }
}

impl FrameTransform for Normalizer {
    fn apply(&self, frame: &Frame) -> Result<Frame> {
        self.normalize_frame(frame)
    }

    fn name(&self) -> &str {
        "normalize"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_core::Column;
    use proptest::prelude::*;

    #[test]
    fn block_codes() {
        let n = RenameMap::Block.normalizer().unwrap();
        assert_eq!(n.normalize("observ"), "block");
        assert_eq!(n.normalize("institu3"), "jewish_inst_1_block");
        assert_eq!(n.normalize("rmes12"), "theft_month_12");
        assert_eq!(n.normalize("rval3"), "theft_value_3");
        assert_eq!(n.normalize("resq23"), "theft_corner_23");
        assert_eq!(n.normalize("unknown_col"), "unknown_col");
    }

    #[test]
    fn chained_rules_apply_in_order() {
        let n = RenameMap::Monthly.normalizer().unwrap();
        assert_eq!(n.normalize("totrob"), "total_thefts");
        assert_eq!(n.normalize("mes"), "month");
        let w = RenameMap::Weekly.normalizer().unwrap();
        assert_eq!(w.normalize("semana"), "week");
        assert_eq!(w.normalize("totrob"), "total_thefts");
    }

    #[test]
    fn rejects_non_idempotent_and_empty_rules() {
        // "tot" reappears inside "total"
        let bad = vec![Substitution::new("tot", "total")];
        assert!(Normalizer::new(bad).is_err());
        assert!(Normalizer::new(vec![Substitution::new("", "x")]).is_err());
    }

    #[test]
    fn frame_rows_untouched() {
        let f = Frame::from_columns(vec![
            ("observ", Column::Float(vec![1.0, 2.0])),
            ("totrob", Column::Float(vec![0.0, 3.0])),
        ])
        .unwrap();
        let n = RenameMap::Monthly.normalizer().unwrap();
        let g = n.apply(&f).unwrap();
        assert_eq!(g.names(), &["block".to_string(), "total_thefts".to_string()]);
        assert_eq!(g.floats("total_thefts").unwrap(), &[0.0, 3.0]);
    }

    #[test]
    fn collision_after_rename_is_error() {
        let f = Frame::from_columns(vec![
            ("observ", Column::Float(vec![1.0])),
            ("block", Column::Float(vec![1.0])),
        ])
        .unwrap();
        assert!(RenameMap::Block.normalizer().unwrap().normalize_frame(&f).is_err());
    }

    const VOCAB: [&str; 21] = [
        "observ", "barrio", "calle", "altura", "institu1", "institu3", "distanci", "edpub",
        "estserv", "banco", "rmes", "rsem", "rhora", "rdia", "rval", "resq", "totrob", "mes",
        "semana", "block", "total_thefts",
    ];

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn prop_normalization_is_idempotent(
            token in prop::sample::select(VOCAB.to_vec()),
            slot in prop::option::of(1u32..=23),
            map in prop::sample::select(vec![RenameMap::Block, RenameMap::Monthly, RenameMap::Weekly]),
        ) {
            let n = map.normalizer().unwrap();
            let name = match slot {
                Some(k) => format!("{}{}", token, k),
                None => token.to_string(),
            };
            let once = n.normalize(&name);
            prop_assert_eq!(n.normalize(&once), once);
        }
    }
}
