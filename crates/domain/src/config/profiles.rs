use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::CellCoord;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tutor configuration profiles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TutorArchitecture {
    #[default]
    Single,
    EgoSuperego,
}

impl TutorArchitecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::EgoSuperego => "ego_superego",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LearnerArchitecture {
    #[default]
    Unified,
    PsychoSplit,
}

impl LearnerArchitecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unified => "unified",
            Self::PsychoSplit => "psycho_split",
        }
    }
}

/// One tutor configuration — a point in the design space a trial runs at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorProfile {
    pub name: String,
    #[serde(default)]
    pub tutor_architecture: TutorArchitecture,
    #[serde(default)]
    pub learner_architecture: LearnerArchitecture,
    /// Whether the tutor system prompt carries recognition instructions.
    #[serde(default)]
    pub recognition: bool,
    /// K: superego review rounds before emission is forced. Zero forces the
    /// single-draft path regardless of architecture.
    #[serde(default = "d_revision_rounds")]
    pub max_revision_rounds: u32,
    /// Per-profile overrides; `None` falls back to the role config.
    #[serde(default)]
    pub ego_model: Option<String>,
    #[serde(default)]
    pub superego_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl TutorProfile {
    /// The factorial cell this profile occupies.
    pub fn cell(&self) -> CellCoord {
        CellCoord {
            recognition: self.recognition,
            tutor_multi: self.tutor_architecture == TutorArchitecture::EgoSuperego,
            learner_psycho: self.learner_architecture == LearnerArchitecture::PsychoSplit,
        }
    }

    /// Build the canonical profile for a factorial cell.
    pub fn for_cell(cell: CellCoord) -> Self {
        Self {
            name: cell.label(),
            tutor_architecture: if cell.tutor_multi {
                TutorArchitecture::EgoSuperego
            } else {
                TutorArchitecture::Single
            },
            learner_architecture: if cell.learner_psycho {
                LearnerArchitecture::PsychoSplit
            } else {
                LearnerArchitecture::Unified
            },
            recognition: cell.recognition,
            max_revision_rounds: d_revision_rounds(),
            ego_model: None,
            superego_model: None,
            temperature: None,
        }
    }
}

fn d_revision_rounds() -> u32 {
    2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Profile catalogue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCatalogue {
    pub profiles: Vec<TutorProfile>,
}

impl ProfileCatalogue {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let catalogue: Self = serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("profile catalogue: {e}")))?;
        let mut seen = std::collections::HashSet::new();
        for p in &catalogue.profiles {
            if !seen.insert(p.name.clone()) {
                return Err(Error::Config(format!("duplicate profile '{}'", p.name)));
            }
        }
        Ok(catalogue)
    }

    pub fn get(&self, name: &str) -> Option<&TutorProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Resolve named profiles, in catalogue discovery order.
    pub fn select(&self, names: &[String]) -> Result<Vec<TutorProfile>> {
        for name in names {
            if self.get(name).is_none() {
                return Err(Error::Config(format!("unknown profile '{name}'")));
            }
        }
        Ok(self
            .profiles
            .iter()
            .filter(|p| names.is_empty() || names.contains(&p.name))
            .cloned()
            .collect())
    }

    /// The eight canonical factorial profiles, `cell_1` through `cell_8`.
    ///
    /// Catalogue entries whose name matches a cell label override the
    /// generated defaults (so K or models can be tuned per cell).
    pub fn factorial(&self) -> Vec<TutorProfile> {
        CellCoord::all()
            .map(|cell| {
                self.get(&cell.label())
                    .cloned()
                    .unwrap_or_else(|| TutorProfile::for_cell(cell))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factorial_produces_eight_cells_in_order() {
        let catalogue = ProfileCatalogue { profiles: vec![] };
        let cells = catalogue.factorial();
        assert_eq!(cells.len(), 8);
        assert_eq!(cells[0].name, "cell_1_base_single_unified");
        assert_eq!(cells[7].name, "cell_8_recog_multi_psych");
        for (i, p) in cells.iter().enumerate() {
            assert_eq!(p.cell().index() as usize, i + 1);
        }
    }

    #[test]
    fn factorial_respects_catalogue_overrides() {
        let mut profile = TutorProfile::for_cell(CellCoord::from_index(3).unwrap());
        profile.max_revision_rounds = 5;
        let catalogue = ProfileCatalogue {
            profiles: vec![profile],
        };
        let cells = catalogue.factorial();
        assert_eq!(cells[2].max_revision_rounds, 5);
        assert_eq!(cells[0].max_revision_rounds, 2);
    }

    #[test]
    fn profile_cell_round_trips_through_architecture() {
        for cell in CellCoord::all() {
            assert_eq!(TutorProfile::for_cell(cell).cell(), cell);
        }
    }

    #[test]
    fn yaml_catalogue_parses() {
        let raw = r#"
profiles:
  - name: strict_reviewer
    tutor_architecture: ego_superego
    learner_architecture: unified
    max_revision_rounds: 3
    superego_model: claude-opus-4-20250514
"#;
        let cat = ProfileCatalogue::from_yaml(raw).unwrap();
        let p = cat.get("strict_reviewer").unwrap();
        assert_eq!(p.tutor_architecture, TutorArchitecture::EgoSuperego);
        assert_eq!(p.max_revision_rounds, 3);
        assert!(!p.recognition);
    }

    #[test]
    fn duplicate_profile_names_rejected() {
        let raw = r#"
profiles:
  - { name: a }
  - { name: a }
"#;
        assert!(ProfileCatalogue::from_yaml(raw).is_err());
    }

    #[test]
    fn select_unknown_profile_is_config_error() {
        let cat = ProfileCatalogue { profiles: vec![] };
        assert!(cat.select(&["ghost".into()]).is_err());
    }
}
