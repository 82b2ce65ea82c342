//! Flow graph: conditional transitions between steps keyed by exit code.

use std::collections::HashMap;
use std::fmt;

use crate::execution::ExitStatus;

/// How a flow ends when a transition leaves the graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndStatus {
    Completed,
    Failed,
    Stopped,
}

/// Where a transition leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowTarget {
    Step(String),
    End(EndStatus),
}

/// Exit code pattern. `*` matches any run of characters, `?` exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExitPattern(String);

impl ExitPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_exact(&self) -> bool {
        !self.0.contains(['*', '?'])
    }

    pub fn matches(&self, code: &str) -> bool {
        glob_match(self.0.as_bytes(), code.as_bytes())
    }

    /// Ordering key: exact patterns first, then globs with more literal
    /// characters, then globs with fewer `*`.
    fn specificity(&self) -> (bool, usize, std::cmp::Reverse<usize>) {
        let stars = self.0.matches('*').count();
        let literals = self.0.chars().filter(|c| *c != '*' && *c != '?').count();
        (self.is_exact(), literals, std::cmp::Reverse(stars))
    }
}

impl fmt::Display for ExitPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == b'*')
}

/// One outgoing edge of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub pattern: ExitPattern,
    pub target: FlowTarget,
}

/// Outcome of looking up the next move after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Follow this transition.
    Next(&'a FlowTarget),
    /// The step has no outgoing transitions: the flow ends COMPLETED.
    Finished,
    /// The step failed and no exact `FAILED` transition handles it.
    StepFailed,
    /// Transitions exist but none matches the exit code.
    Unmatched,
}

/// Directed graph of step names with pattern-keyed transitions.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    start: String,
    transitions: HashMap<String, Vec<Transition>>,
}

impl FlowGraph {
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            transitions: HashMap::new(),
        }
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    /// Add an edge. Edges from one step are kept most specific first; equally
    /// specific edges keep insertion order.
    pub fn add_transition(
        &mut self,
        from: impl Into<String>,
        pattern: ExitPattern,
        target: FlowTarget,
    ) {
        let edges = self.transitions.entry(from.into()).or_default();
        let at = edges
            .iter()
            .position(|e| e.pattern.specificity() < pattern.specificity())
            .unwrap_or(edges.len());
        edges.insert(at, Transition { pattern, target });
    }

    pub fn transitions_from(&self, step: &str) -> &[Transition] {
        self.transitions.get(step).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every (source, transition) pair.
    pub fn transitions(&self) -> impl Iterator<Item = (&str, &Transition)> {
        self.transitions
            .iter()
            .flat_map(|(from, edges)| edges.iter().map(move |t| (from.as_str(), t)))
    }

    /// Pick the transition to follow after `step` ended with `exit_status`.
    ///
    /// A failed step only follows a literal `FAILED` edge; wildcards never
    /// swallow a failure.
    pub fn resolve(
        &self,
        step: &str,
        exit_status: &ExitStatus,
        step_failed: bool,
    ) -> Resolution<'_> {
        let edges = self.transitions_from(step);

        if step_failed {
            return edges
                .iter()
                .find(|e| e.pattern.as_str() == ExitStatus::FAILED)
                .map_or(Resolution::StepFailed, |e| Resolution::Next(&e.target));
        }

        if edges.is_empty() {
            return Resolution::Finished;
        }

        edges
            .iter()
            .find(|e| e.pattern.matches(exit_status.code()))
            .map_or(Resolution::Unmatched, |e| Resolution::Next(&e.target))
    }
}
