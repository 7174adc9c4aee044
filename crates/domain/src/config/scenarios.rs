use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario catalogue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tutoring scenario: the situation, the scripted learner, the rubric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub description: String,
    /// The learner's opening message — the dialogue's initial context input.
    pub context: String,
    /// Persona instructions for the simulated learner.
    #[serde(default)]
    pub learner_persona: String,
    /// Scripted follow-up directives, one per external turn after the first.
    /// Empty means the dialogue is a single exchange.
    #[serde(default)]
    pub learner_turns: Vec<String>,
    pub rubric: Rubric,
}

impl Scenario {
    /// External turns this scenario produces: the opening plus one per
    /// scripted follow-up.
    pub fn scripted_turns(&self) -> u32 {
        1 + self.learner_turns.len() as u32
    }
}

/// Per-scenario scoring specification. Dimension weights are data: the
/// engine applies them, it never hard-codes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub dimensions: Vec<RubricDimension>,
    #[serde(default)]
    pub required_elements: Vec<String>,
    #[serde(default)]
    pub forbidden_elements: Vec<String>,
    #[serde(default)]
    pub expected_behaviour: String,
    /// Upper bound of the per-dimension integer scale.
    #[serde(default = "d_max_score")]
    pub max_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricDimension {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "d_weight")]
    pub weight: f64,
    /// Recognition dimensions feed `recognition_score`; the rest feed
    /// `base_score`.
    #[serde(default)]
    pub recognition: bool,
}

fn d_max_score() -> f64 {
    10.0
}
fn d_weight() -> f64 {
    1.0
}

/// The deserialized scenario catalogue file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioCatalogue {
    pub scenarios: Vec<Scenario>,
}

impl ScenarioCatalogue {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let catalogue: Self = serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("scenario catalogue: {e}")))?;
        let mut seen = std::collections::HashSet::new();
        for s in &catalogue.scenarios {
            if !seen.insert(s.id.clone()) {
                return Err(Error::Config(format!("duplicate scenario id '{}'", s.id)));
            }
        }
        Ok(catalogue)
    }

    pub fn get(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    /// Resolve a scenario selection in catalogue order.
    ///
    /// Empty `ids` + no cluster means "all".
    pub fn select(&self, ids: &[String], cluster: Option<&str>) -> Result<Vec<Scenario>> {
        for id in ids {
            if self.get(id).is_none() {
                return Err(Error::Config(format!("unknown scenario '{id}'")));
            }
        }
        let selected: Vec<Scenario> = self
            .scenarios
            .iter()
            .filter(|s| ids.is_empty() || ids.contains(&s.id))
            .filter(|s| cluster.map_or(true, |c| s.cluster.as_deref() == Some(c)))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(Error::Config("scenario selection matched nothing".into()));
        }
        Ok(selected)
    }
}
