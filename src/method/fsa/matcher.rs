//! Concurrent match processes.
//!
//! Every active partial match is a [`Process`] record keyed by a small integer
//! id. [`Matcher::step`] advances all of them by one source obsel in a single
//! pass; nothing here runs concurrently.

use super::config::{Automaton, StateId};
use crate::types::{Obsel, ObselId, ObselType, Timestamp};
use rustc_hash::{FxHashSet, FxHasher};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

pub type ProcessId = u64;

/// Source obsels consumed by a process.
pub type Provenance = SmallVec<[ObselId; 4]>;

/// One partial match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub state: StateId,
    /// Remaining noise budget in the current state
    pub noise: u32,
    pub provenance: Provenance,
    pub begin: Timestamp,
    pub end: Timestamp,
    /// Subject of the first consumed obsel
    pub subject: Option<String>,
    /// Hash of the state names visited since `start`
    pub lineage: u64,
}

fn extend_lineage(lineage: u64, state: &str) -> u64 {
    let mut hasher = FxHasher::default();
    lineage.hash(&mut hasher);
    state.hash(&mut hasher);
    hasher.finish()
}

impl Process {
    fn spawn(automaton: &Automaton, state: StateId, obsel: &Obsel) -> Self {
        Self {
            state,
            noise: automaton.state(state).max_noise,
            provenance: smallvec![obsel.id().clone()],
            begin: obsel.begin(),
            end: obsel.end(),
            subject: obsel.subject().map(str::to_string),
            lineage: extend_lineage(0, &automaton.state(state).name),
        }
    }

    /// Copy of this process moved to `state` after consuming `obsel`.
    fn advance(&self, automaton: &Automaton, state: StateId, obsel: &Obsel) -> Self {
        let mut next = self.clone();
        next.state = state;
        next.noise = automaton.state(state).max_noise;
        next.provenance.push(obsel.id().clone());
        next.end = obsel.end();
        next.lineage = extend_lineage(self.lineage, &automaton.state(state).name);
        next
    }

    fn overlaps(&self, claimed: &FxHashSet<ObselId>) -> bool {
        self.provenance.iter().any(|id| claimed.contains(id))
    }
}

/// A process that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub obsel_type: ObselType,
    pub provenance: Provenance,
    pub begin: Timestamp,
    pub end: Timestamp,
    pub subject: Option<String>,
    /// Tells apart matches reaching the same type over the same obsels
    /// along different paths
    pub lineage: u64,
}

impl Completion {
    fn new(obsel_type: ObselType, process: Process) -> Self {
        Self {
            obsel_type,
            provenance: process.provenance,
            begin: process.begin,
            end: process.end,
            subject: process.subject,
            lineage: process.lineage,
        }
    }
}

/// Persisted form of a process. States are referred to by name so that the
/// record stays meaningful across recompilations of the same document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub state: String,
    pub noise: u32,
    pub provenance: Provenance,
    pub begin: Timestamp,
    pub end: Timestamp,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub lineage: u64,
}

/// Persisted form of a [`Matcher`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherRecord {
    pub next_process: ProcessId,
    pub processes: Vec<ProcessRecord>,
    /// Source obsels already used by emitted matches, sorted
    pub claimed: Vec<ObselId>,
}

/// Unknown state name found while restoring a matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

/// The set of active processes plus the overlap bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matcher {
    next_process: ProcessId,
    processes: BTreeMap<ProcessId, Process>,
    claimed: FxHashSet<ObselId>,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.processes.len()
    }

    pub fn processes(&self) -> impl Iterator<Item = (ProcessId, &Process)> {
        self.processes.iter().map(|(id, process)| (*id, process))
    }

    pub fn is_claimed(&self, id: &ObselId) -> bool {
        self.claimed.contains(id)
    }

    fn allocate(&mut self) -> ProcessId {
        let id = self.next_process;
        self.next_process += 1;
        id
    }

    /// Feed one source obsel. Returns the matches to emit, in order.
    ///
    /// Existing processes are evaluated in id order, then `start` forks new
    /// ones in configuration order. A process with several matching
    /// transitions follows all of them: the first keeps its id, the others
    /// get fresh ids. Without overlap the first completion claiming an
    /// obsel wins and later overlapping ones are dropped.
    pub fn step(&mut self, automaton: &Automaton, obsel: &Obsel, eager_pruning: bool) -> Vec<Completion> {
        let obsel_type = obsel.obsel_type();
        let mut completions = Vec::new();
        let mut survivors = BTreeMap::new();

        for (id, process) in std::mem::take(&mut self.processes) {
            let state = automaton.state(process.state);
            let targets: SmallVec<[StateId; 2]> =
                state.matching(obsel_type).map(|t| t.target).collect();

            if targets.is_empty() {
                if process.noise > 0 {
                    let mut process = process;
                    process.noise -= 1;
                    survivors.insert(id, process);
                }
                continue;
            }

            for (i, target) in targets.into_iter().enumerate() {
                let advanced = process.advance(automaton, target, obsel);
                match automaton.terminal_type(target) {
                    Some(emitted) => completions.push(Completion::new(emitted.clone(), advanced)),
                    None => {
                        let pid = if i == 0 { id } else { self.allocate() };
                        survivors.insert(pid, advanced);
                    }
                }
            }
        }

        let start = automaton.state(automaton.start());
        for transition in start.matching(obsel_type) {
            let process = Process::spawn(automaton, transition.target, obsel);
            match automaton.terminal_type(transition.target) {
                Some(emitted) => completions.push(Completion::new(emitted.clone(), process)),
                None => {
                    let pid = self.allocate();
                    survivors.insert(pid, process);
                }
            }
        }

        self.processes = survivors;

        if automaton.allow_overlap() {
            return completions;
        }

        let mut emitted = Vec::with_capacity(completions.len());
        for completion in completions {
            if completion.provenance.iter().any(|id| self.claimed.contains(id)) {
                log::debug!(
                    "suppressed overlapping {} match on {}",
                    completion.obsel_type,
                    obsel.id()
                );
                continue;
            }
            self.claimed.extend(completion.provenance.iter().cloned());
            emitted.push(completion);
        }

        if eager_pruning && !emitted.is_empty() {
            let claimed = &self.claimed;
            self.processes.retain(|_, process| !process.overlaps(claimed));
        }

        emitted
    }

    pub fn to_record(&self, automaton: &Automaton) -> MatcherRecord {
        let mut claimed: Vec<ObselId> = self.claimed.iter().cloned().collect();
        claimed.sort_unstable();
        MatcherRecord {
            next_process: self.next_process,
            processes: self
                .processes
                .iter()
                .map(|(id, process)| ProcessRecord {
                    id: *id,
                    state: automaton.state(process.state).name.clone(),
                    noise: process.noise,
                    provenance: process.provenance.clone(),
                    begin: process.begin,
                    end: process.end,
                    subject: process.subject.clone(),
                    lineage: process.lineage,
                })
                .collect(),
            claimed,
        }
    }

    pub fn from_record(record: MatcherRecord, automaton: &Automaton) -> Result<Self, UnknownState> {
        let mut processes = BTreeMap::new();
        for process in record.processes {
            let state = automaton
                .lookup(&process.state)
                .ok_or_else(|| UnknownState(process.state.clone()))?;
            processes.insert(
                process.id,
                Process {
                    state,
                    noise: process.noise,
                    provenance: process.provenance,
                    begin: process.begin,
                    end: process.end,
                    subject: process.subject,
                    lineage: process.lineage,
                },
            );
        }
        Ok(Self {
            next_process: record.next_process,
            processes,
            claimed: record.claimed.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TraceModel;
    use serde_json::json;

    struct Fixture {
        model: TraceModel,
        automaton: Automaton,
    }

    impl Fixture {
        fn new(doc: serde_json::Value) -> Self {
            let mut model = TraceModel::new("http://localhost/b/m");
            for ot in ["#otA", "#otB", "#otC", "#otX"] {
                model.add_obsel_type(ot);
            }
            let automaton = Automaton::from_json(&doc.to_string(), &model).unwrap();
            Self { model, automaton }
        }

        fn obsel(&self, id: &str, otype: &str, begin: Timestamp) -> Obsel {
            Obsel::builder(id, self.model.resolve(otype).unwrap(), begin)
                .build()
                .unwrap()
        }
    }

    fn noisy() -> Fixture {
        Fixture::new(json!({"states": {
            "start": {"transitions": [{"condition": "#otA", "target": "s1"}]},
            "s1": {"max_noise": 1, "transitions": [{"condition": "#otB", "target": "#otX"}]},
        }}))
    }

    #[test]
    fn test_one_noise_obsel_is_tolerated() {
        let f = noisy();
        let mut matcher = Matcher::new();
        assert!(matcher.step(&f.automaton, &f.obsel("a", "#otA", 0), true).is_empty());
        assert!(matcher.step(&f.automaton, &f.obsel("c", "#otC", 1), true).is_empty());
        let done = matcher.step(&f.automaton, &f.obsel("b", "#otB", 2), true);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].provenance.as_slice(), &[ObselId::from("a"), ObselId::from("b")]);
        assert_eq!((done[0].begin, done[0].end), (0, 2));
    }

    #[test]
    fn test_two_noise_obsels_kill_the_process() {
        let f = noisy();
        let mut matcher = Matcher::new();
        matcher.step(&f.automaton, &f.obsel("a", "#otA", 0), true);
        matcher.step(&f.automaton, &f.obsel("c1", "#otC", 1), true);
        assert_eq!(matcher.active(), 1);
        matcher.step(&f.automaton, &f.obsel("c2", "#otC", 2), true);
        assert_eq!(matcher.active(), 0);
        assert!(matcher.step(&f.automaton, &f.obsel("b", "#otB", 3), true).is_empty());
    }

    #[test]
    fn test_ambiguous_transitions_fork_in_configuration_order() {
        let f = Fixture::new(json!({"states": {
            "start": {"transitions": [{"condition": "#otA", "target": "s1"}]},
            "s1": {"transitions": [
                {"condition": "#otB", "target": "s2"},
                {"condition": "#otB", "target": "s3"},
            ]},
            "s2": {"transitions": [{"condition": "#otC", "target": "#otX"}]},
            "s3": {},
        }}));
        let mut matcher = Matcher::new();
        matcher.step(&f.automaton, &f.obsel("a", "#otA", 0), true);
        matcher.step(&f.automaton, &f.obsel("b", "#otB", 1), true);

        let states: Vec<(ProcessId, &str)> = matcher
            .processes()
            .map(|(id, p)| (id, f.automaton.state(p.state).name.as_str()))
            .collect();
        assert_eq!(states, vec![(0, "s2"), (1, "s3")]);
    }

    #[test]
    fn test_record_roundtrip_and_unknown_state() {
        let f = noisy();
        let mut matcher = Matcher::new();
        matcher.step(&f.automaton, &f.obsel("a", "#otA", 0), true);
        let record = matcher.to_record(&f.automaton);
        assert_eq!(record.processes[0].state, "s1");

        let restored = Matcher::from_record(record.clone(), &f.automaton).unwrap();
        assert_eq!(restored, matcher);

        let mut broken = record;
        broken.processes[0].state = "s9".to_string();
        assert_eq!(
            Matcher::from_record(broken, &f.automaton).unwrap_err(),
            UnknownState("s9".to_string())
        );
    }
}
