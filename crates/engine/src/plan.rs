//! Run specification and deterministic plan expansion.
//!
//! Expansion order is documented and stable: scenarios outer, configurations
//! inner, replications innermost. Resume relies on this order never
//! changing for a given specification.

use serde::{Deserialize, Serialize};

use tb_domain::config::{ProfileCatalogue, Scenario, ScenarioCatalogue, TutorProfile};
use tb_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Specification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How configurations are selected for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "names")]
pub enum ProfileSelection {
    /// Explicitly named profiles from the catalogue.
    Named(Vec<String>),
    /// The eight factorial cells.
    #[default]
    Factorial,
    /// Every profile in the catalogue, in discovery order.
    AllProfiles,
}

/// A run specification. Serialised into run metadata verbatim so resume and
/// rejudge can re-expand the identical plan later.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSpec {
    /// Scenario ids; empty means "all" (subject to `cluster`).
    #[serde(default)]
    pub scenario_ids: Vec<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub profiles: ProfileSelection,
    #[serde(default = "d_1")]
    pub replications: u32,
    #[serde(default)]
    pub skip_rubric: bool,
    #[serde(default)]
    pub description: String,
    /// Model overrides, applied to every profile in the run.
    #[serde(default)]
    pub ego_model: Option<String>,
    #[serde(default)]
    pub superego_model: Option<String>,
    #[serde(default)]
    pub judge_model: Option<String>,
}

fn d_1() -> u32 {
    1
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One unit of work: a (scenario, configuration, replication) triple.
#[derive(Debug, Clone)]
pub struct Trial {
    pub scenario: Scenario,
    pub profile: TutorProfile,
    /// Replication ordinal, 1-based.
    pub attempt: u32,
}

impl Trial {
    pub fn natural_key(&self) -> (String, String, u32) {
        (self.scenario.id.clone(), self.profile.name.clone(), self.attempt)
    }
}

/// A fully expanded plan.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub scenarios: Vec<Scenario>,
    pub profiles: Vec<TutorProfile>,
    pub trials: Vec<Trial>,
}

impl RunPlan {
    pub fn scenario_ids(&self) -> Vec<String> {
        self.scenarios.iter().map(|s| s.id.clone()).collect()
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.name.clone()).collect()
    }
}

/// Expand a specification against the catalogues.
///
/// Model overrides are baked into the expanded profiles here, so one code
/// path serves fresh runs and resumes alike.
pub fn expand_plan(
    spec: &RunSpec,
    scenarios: &ScenarioCatalogue,
    profiles: &ProfileCatalogue,
) -> Result<RunPlan> {
    let selected_scenarios = scenarios.select(&spec.scenario_ids, spec.cluster.as_deref())?;
    let mut selected_profiles = match &spec.profiles {
        ProfileSelection::Named(names) => profiles.select(names)?,
        ProfileSelection::Factorial => profiles.factorial(),
        ProfileSelection::AllProfiles => profiles.select(&[])?,
    };

    for profile in &mut selected_profiles {
        if let Some(model) = &spec.ego_model {
            profile.ego_model = Some(model.clone());
        }
        if let Some(model) = &spec.superego_model {
            profile.superego_model = Some(model.clone());
        }
    }

    let mut trials =
        Vec::with_capacity(selected_scenarios.len() * selected_profiles.len() * spec.replications as usize);
    for scenario in &selected_scenarios {
        for profile in &selected_profiles {
            for attempt in 1..=spec.replications {
                trials.push(Trial {
                    scenario: scenario.clone(),
                    profile: profile.clone(),
                    attempt,
                });
            }
        }
    }

    Ok(RunPlan {
        scenarios: selected_scenarios,
        profiles: selected_profiles,
        trials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_catalogue() -> ScenarioCatalogue {
        ScenarioCatalogue::from_yaml(
            r#"
scenarios:
  - { id: s1, name: One, context: c1, rubric: { dimensions: [{ name: d }] } }
  - { id: s2, name: Two, context: c2, rubric: { dimensions: [{ name: d }] } }
"#,
        )
        .unwrap()
    }

    fn profile_catalogue() -> ProfileCatalogue {
        ProfileCatalogue::from_yaml(
            r#"
profiles:
  - { name: alpha }
  - { name: beta, tutor_architecture: ego_superego }
"#,
        )
        .unwrap()
    }

    #[test]
    fn expansion_order_is_scenarios_profiles_replications() {
        let spec = RunSpec {
            profiles: ProfileSelection::AllProfiles,
            replications: 2,
            ..Default::default()
        };
        let plan = expand_plan(&spec, &scenario_catalogue(), &profile_catalogue()).unwrap();
        assert_eq!(plan.trials.len(), 8);
        let keys: Vec<(String, String, u32)> =
            plan.trials.iter().map(Trial::natural_key).collect();
        assert_eq!(keys[0], ("s1".into(), "alpha".into(), 1));
        assert_eq!(keys[1], ("s1".into(), "alpha".into(), 2));
        assert_eq!(keys[2], ("s1".into(), "beta".into(), 1));
        assert_eq!(keys[4], ("s2".into(), "alpha".into(), 1));
    }

    #[test]
    fn expansion_is_deterministic() {
        let spec = RunSpec {
            profiles: ProfileSelection::Factorial,
            replications: 3,
            ..Default::default()
        };
        let a = expand_plan(&spec, &scenario_catalogue(), &profile_catalogue()).unwrap();
        let b = expand_plan(&spec, &scenario_catalogue(), &profile_catalogue()).unwrap();
        let keys = |p: &RunPlan| p.trials.iter().map(Trial::natural_key).collect::<Vec<_>>();
        assert_eq!(keys(&a), keys(&b));
    }

    #[test]
    fn factorial_selection_yields_eight_cells() {
        let spec = RunSpec {
            scenario_ids: vec!["s1".into()],
            profiles: ProfileSelection::Factorial,
            replications: 2,
            ..Default::default()
        };
        let plan = expand_plan(&spec, &scenario_catalogue(), &profile_catalogue()).unwrap();
        assert_eq!(plan.profiles.len(), 8);
        assert_eq!(plan.trials.len(), 16);
    }

    #[test]
    fn overrides_are_baked_into_profiles() {
        let spec = RunSpec {
            profiles: ProfileSelection::AllProfiles,
            replications: 1,
            ego_model: Some("override-model".into()),
            ..Default::default()
        };
        let plan = expand_plan(&spec, &scenario_catalogue(), &profile_catalogue()).unwrap();
        assert!(plan
            .profiles
            .iter()
            .all(|p| p.ego_model.as_deref() == Some("override-model")));
    }

    #[test]
    fn unknown_scenario_fails_expansion() {
        let spec = RunSpec {
            scenario_ids: vec!["ghost".into()],
            ..Default::default()
        };
        assert!(expand_plan(&spec, &scenario_catalogue(), &profile_catalogue()).is_err());
    }

    #[test]
    fn spec_round_trips_through_metadata_json() {
        let spec = RunSpec {
            scenario_ids: vec!["s1".into()],
            cluster: None,
            profiles: ProfileSelection::Named(vec!["alpha".into()]),
            replications: 4,
            skip_rubric: true,
            description: "demo".into(),
            ego_model: Some("m1".into()),
            superego_model: None,
            judge_model: Some("j1".into()),
        };
        let json = serde_json::to_value(&spec).unwrap();
        let back: RunSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.replications, 4);
        assert_eq!(back.profiles, ProfileSelection::Named(vec!["alpha".into()]));
        assert!(back.skip_rubric);
    }
}
