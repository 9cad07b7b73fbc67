//! FSA documents and their compiled form.
//!
//! A document looks like
//!
//! ```json
//! {
//!   "states": {
//!     "start": {"transitions": [{"condition": "#otA", "target": "s1"}]},
//!     "s1": {"max_noise": 1, "transitions": [{"condition": "#otB", "target": "#otX"}]},
//!     "#otX": {"terminal": true}
//!   },
//!   "allow_overlap": false
//! }
//! ```
//!
//! Conditions and terminal names are obsel type references resolved against
//! the model. A target naming no state but an obsel type stands for an
//! implicit terminal state emitting that type.

use crate::error::ConfigurationError;
use crate::types::{ObselType, TraceModel};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Name of the state every match attempt starts from.
pub const START: &str = "start";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FsaDocument {
    states: BTreeMap<String, StateDocument>,
    #[serde(default)]
    allow_overlap: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StateDocument {
    #[serde(default)]
    transitions: Vec<TransitionDocument>,
    #[serde(default)]
    max_noise: u32,
    #[serde(default)]
    terminal: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransitionDocument {
    condition: String,
    target: String,
}

/// Index of a state in its [`Automaton`].
pub type StateId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    Ordinary,
    /// Completes a match and emits an obsel of this type.
    Terminal(ObselType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub condition: ObselType,
    pub target: StateId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub name: String,
    pub kind: StateKind,
    pub max_noise: u32,
    pub transitions: Vec<Transition>,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, StateKind::Terminal(_))
    }

    /// Transitions whose condition is `obsel_type`, in configuration order.
    pub fn matching<'a>(&'a self, obsel_type: &'a ObselType) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions
            .iter()
            .filter(move |transition| &transition.condition == obsel_type)
    }
}

/// A validated FSA with every reference resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Automaton {
    states: Vec<State>,
    index: FxHashMap<String, StateId>,
    start: StateId,
    allow_overlap: bool,
}

impl Automaton {
    /// Parse and compile a JSON document against `model`.
    pub fn from_json(json: &str, model: &TraceModel) -> Result<Self, ConfigurationError> {
        let document: FsaDocument = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::MalformedDocument(e.to_string()))?;
        Self::compile(document, model)
    }

    fn compile(document: FsaDocument, model: &TraceModel) -> Result<Self, ConfigurationError> {
        let start_doc = document
            .states
            .get(START)
            .ok_or(ConfigurationError::MissingStartState)?;
        if start_doc.terminal {
            return Err(ConfigurationError::InvalidState {
                state: START.to_string(),
                reason: "the start state cannot be terminal".to_string(),
            });
        }

        let mut states = Vec::with_capacity(document.states.len());
        let mut index = FxHashMap::default();
        // terminal type -> terminal state, explicit or implicit
        let mut terminals: FxHashMap<ObselType, StateId> = FxHashMap::default();

        for (name, doc) in &document.states {
            let kind = if doc.terminal {
                if !doc.transitions.is_empty() {
                    return Err(ConfigurationError::InvalidState {
                        state: name.clone(),
                        reason: "a terminal state cannot have transitions".to_string(),
                    });
                }
                let obsel_type = model
                    .resolve(name)
                    .ok_or_else(|| ConfigurationError::UnresolvableType(name.clone()))?;
                terminals.insert(obsel_type.clone(), states.len());
                StateKind::Terminal(obsel_type)
            } else {
                StateKind::Ordinary
            };

            index.insert(name.clone(), states.len());
            states.push(State {
                name: name.clone(),
                kind,
                max_noise: doc.max_noise,
                transitions: Vec::new(),
            });
        }

        for (name, doc) in &document.states {
            let mut transitions = Vec::with_capacity(doc.transitions.len());
            for transition in &doc.transitions {
                let condition = model
                    .resolve(&transition.condition)
                    .ok_or_else(|| ConfigurationError::UnresolvableType(transition.condition.clone()))?;
                let target = Self::resolve_target(
                    name,
                    &transition.target,
                    model,
                    &mut states,
                    &mut index,
                    &mut terminals,
                )?;
                transitions.push(Transition { condition, target });
            }
            states[index[name.as_str()]].transitions = transitions;
        }

        Ok(Self {
            start: index[START],
            states,
            index,
            allow_overlap: document.allow_overlap,
        })
    }

    fn resolve_target(
        state: &str,
        target: &str,
        model: &TraceModel,
        states: &mut Vec<State>,
        index: &mut FxHashMap<String, StateId>,
        terminals: &mut FxHashMap<ObselType, StateId>,
    ) -> Result<StateId, ConfigurationError> {
        if target == START {
            return Err(ConfigurationError::InvalidState {
                state: state.to_string(),
                reason: "the start state cannot be a transition target".to_string(),
            });
        }
        if let Some(&id) = index.get(target) {
            return Ok(id);
        }

        let obsel_type = model
            .resolve(target)
            .ok_or_else(|| ConfigurationError::DanglingTarget {
                state: state.to_string(),
                target: target.to_string(),
            })?;
        if let Some(&id) = terminals.get(&obsel_type) {
            return Ok(id);
        }

        let id = states.len();
        let name = obsel_type.as_str().to_string();
        states.push(State {
            name: name.clone(),
            kind: StateKind::Terminal(obsel_type.clone()),
            max_noise: 0,
            transitions: Vec::new(),
        });
        index.insert(name, id);
        terminals.insert(obsel_type, id);
        Ok(id)
    }

    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn allow_overlap(&self) -> bool {
        self.allow_overlap
    }

    /// State `id`, if it belongs to this automaton.
    pub fn get(&self, id: StateId) -> Option<&State> {
        self.states.get(id)
    }

    /// Ids come from this automaton's own transitions and lookups.
    pub(crate) fn state(&self, id: StateId) -> &State {
        &self.states[id]
    }

    pub fn lookup(&self, name: &str) -> Option<StateId> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Type emitted when a process reaches `id`, if `id` is terminal.
    pub(crate) fn terminal_type(&self, id: StateId) -> Option<&ObselType> {
        match &self.states[id].kind {
            StateKind::Terminal(obsel_type) => Some(obsel_type),
            StateKind::Ordinary => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model() -> TraceModel {
        let mut model = TraceModel::new("http://localhost/b/m");
        for ot in ["#otA", "#otB", "#otC", "#otX", "#otY"] {
            model.add_obsel_type(ot);
        }
        model
    }

    fn compile(doc: serde_json::Value) -> Result<Automaton, ConfigurationError> {
        Automaton::from_json(&doc.to_string(), &model())
    }

    #[test]
    fn test_terminal_aliases_share_one_state() {
        let automaton = compile(json!({
            "states": {
                "start": {"transitions": [
                    {"condition": "#otA", "target": "#otX"},
                    {"condition": "#otB", "target": "http://localhost/b/m#otX"},
                    {"condition": "#otC", "target": "#otY"},
                ]},
                "#otX": {"terminal": true},
            }
        }))
        .unwrap();

        let start = automaton.state(automaton.start());
        assert_eq!(start.transitions[0].target, start.transitions[1].target);
        assert_ne!(start.transitions[0].target, start.transitions[2].target);
        assert_eq!(
            automaton.terminal_type(start.transitions[2].target).map(ObselType::as_str),
            Some("http://localhost/b/m#otY")
        );
        assert!(!automaton.allow_overlap());
    }

    #[test]
    fn test_get_out_of_range_state() {
        let automaton = compile(json!({"states": {
            "start": {"transitions": [{"condition": "#otA", "target": "#otX"}]},
        }}))
        .unwrap();
        assert_eq!(automaton.get(automaton.start()).map(|s| s.name.as_str()), Some("start"));
        assert!(automaton.get(automaton.len()).is_none());
        assert!(automaton.get(usize::MAX).is_none());
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            compile(json!({"states": {"s1": {}}})).unwrap_err(),
            ConfigurationError::MissingStartState
        );
        assert!(matches!(
            compile(json!({"states": {"start": {}}, "overlap": true})),
            Err(ConfigurationError::MalformedDocument(_))
        ));
        assert_eq!(
            compile(json!({"states": {"start": {"transitions": [
                {"condition": "#otA", "target": "nowhere"}
            ]}}}))
            .unwrap_err(),
            ConfigurationError::DanglingTarget {
                state: "start".to_string(),
                target: "nowhere".to_string()
            }
        );
        assert_eq!(
            compile(json!({"states": {"start": {"transitions": [
                {"condition": "#otQ", "target": "#otX"}
            ]}}}))
            .unwrap_err(),
            ConfigurationError::UnresolvableType("#otQ".to_string())
        );
        assert!(matches!(
            compile(json!({"states": {"start": {"transitions": [
                {"condition": "#otA", "target": "start"}
            ]}}})),
            Err(ConfigurationError::InvalidState { .. })
        ));
        assert!(matches!(
            compile(json!({"states": {"start": {"terminal": true}}})),
            Err(ConfigurationError::InvalidState { .. })
        ));
        assert!(matches!(
            compile(json!({"states": {"start": {}, "#nope": {"terminal": true}}})),
            Err(ConfigurationError::UnresolvableType(_))
        ));
    }
}
