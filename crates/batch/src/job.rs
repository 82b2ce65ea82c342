//! Job definitions and the fluent flow builder.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chunkflow_core::DomainResult;

use crate::error::BatchError;
use crate::flow::{EndStatus, ExitPattern, FlowGraph, FlowTarget};
use crate::listener::JobListener;
use crate::parameters::{JobParameters, JobParametersValidator};
use crate::step::Step;

/// A named flow of steps.
pub struct Job {
    name: String,
    steps: HashMap<String, Step>,
    flow: FlowGraph,
    validator: Option<Box<dyn JobParametersValidator>>,
    restartable: bool,
    listeners: Vec<Arc<dyn JobListener>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("start", &self.flow.start())
            .field("steps", &self.steps.len())
            .field("restartable", &self.restartable)
            .finish()
    }
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn flow(&self) -> &FlowGraph {
        &self.flow
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    pub fn listeners(&self) -> &[Arc<dyn JobListener>] {
        &self.listeners
    }

    pub fn validate_parameters(&self, parameters: &JobParameters) -> DomainResult<()> {
        match &self.validator {
            Some(validator) => validator.validate(parameters),
            None => Ok(()),
        }
    }
}

/// Fluent builder for a [`Job`].
///
/// Transitions attach to the "current" step: the last step added with
/// [`start`](Self::start), [`next`](Self::next) or
/// [`TransitionBuilder::to`], or the one selected with [`from`](Self::from).
/// Definition errors are collected and reported by [`build`](Self::build).
pub struct JobBuilder {
    name: String,
    steps: HashMap<String, Step>,
    flow: Option<FlowGraph>,
    current: Option<String>,
    edges: HashSet<(String, String)>,
    validator: Option<Box<dyn JobParametersValidator>>,
    restartable: bool,
    listeners: Vec<Arc<dyn JobListener>>,
    errors: Vec<String>,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: HashMap::new(),
            flow: None,
            current: None,
            edges: HashSet::new(),
            validator: None,
            restartable: true,
            listeners: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn validator(mut self, validator: impl JobParametersValidator + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Refuse to launch an instance that already has executions.
    pub fn prevent_restart(mut self) -> Self {
        self.restartable = false;
        self
    }

    pub fn listener(mut self, listener: impl JobListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// The first step of the flow.
    pub fn start(mut self, step: Step) -> Self {
        if self.flow.is_some() {
            self.errors.push(format!("job '{}' has more than one start step", self.name));
            return self;
        }
        let name = self.register(step);
        self.flow = Some(FlowGraph::new(name.clone()));
        self.current = Some(name);
        self
    }

    /// Continue from the current step to `step` whatever its exit code.
    pub fn next(self, step: Step) -> Self {
        self.on("*").to(step)
    }

    /// Define a transition from the current step for exit codes matching
    /// `pattern`.
    pub fn on(self, pattern: impl Into<String>) -> TransitionBuilder {
        TransitionBuilder {
            builder: self,
            pattern: ExitPattern::new(pattern),
        }
    }

    /// Make an already registered step the current one.
    pub fn from(mut self, step_name: &str) -> Self {
        if !self.steps.contains_key(step_name) {
            self.errors.push(format!("from('{step_name}'): no such step"));
        }
        self.current = Some(step_name.to_string());
        self
    }

    pub fn build(self) -> Result<Job, BatchError> {
        let mut errors = self.errors;
        let flow = match self.flow {
            Some(flow) => flow,
            None => {
                errors.push(format!("job '{}' has no start step", self.name));
                FlowGraph::default()
            }
        };

        for (from, transition) in flow.transitions() {
            if let FlowTarget::Step(to) = &transition.target {
                if !self.steps.contains_key(to) {
                    errors.push(format!(
                        "transition '{from}' -[{}]-> '{to}': no such step",
                        transition.pattern
                    ));
                }
            }
        }

        if !errors.is_empty() {
            errors.sort();
            return Err(BatchError::InvalidFlow(errors.join("; ")));
        }

        Ok(Job {
            name: self.name,
            steps: self.steps,
            flow,
            validator: self.validator,
            restartable: self.restartable,
            listeners: self.listeners,
        })
    }

    fn register(&mut self, step: Step) -> String {
        let name = step.name().to_string();
        if self.steps.insert(name.clone(), step).is_some() {
            self.errors.push(format!("step '{name}' is defined twice"));
        }
        name
    }

    fn add_transition(&mut self, pattern: ExitPattern, target: FlowTarget) {
        let Some(from) = self.current.clone() else {
            self.errors.push(format!("transition '{pattern}' has no source step"));
            return;
        };
        let Some(flow) = self.flow.as_mut() else {
            self.errors.push(format!("transition '{pattern}' defined before start"));
            return;
        };
        if !self.edges.insert((from.clone(), pattern.as_str().to_string())) {
            self.errors.push(format!("step '{from}' has two transitions for '{pattern}'"));
            return;
        }
        flow.add_transition(from, pattern, target);
    }
}

/// Completes a transition started with [`JobBuilder::on`].
pub struct TransitionBuilder {
    builder: JobBuilder,
    pattern: ExitPattern,
}

impl TransitionBuilder {
    /// Go to a new step, which becomes the current step.
    pub fn to(mut self, step: Step) -> JobBuilder {
        let name = self.builder.register(step);
        self.builder
            .add_transition(self.pattern, FlowTarget::Step(name.clone()));
        self.builder.current = Some(name);
        self.builder
    }

    /// Go to a step registered elsewhere in the flow.
    pub fn to_step(mut self, step_name: &str) -> JobBuilder {
        self.builder
            .add_transition(self.pattern, FlowTarget::Step(step_name.to_string()));
        self.builder
    }

    /// End the job COMPLETED.
    pub fn end(self) -> JobBuilder {
        self.finish(EndStatus::Completed)
    }

    /// End the job STOPPED; a later launch resumes from the stopping step.
    pub fn stop(self) -> JobBuilder {
        self.finish(EndStatus::Stopped)
    }

    /// End the job FAILED.
    pub fn fail(self) -> JobBuilder {
        self.finish(EndStatus::Failed)
    }

    fn finish(mut self, status: EndStatus) -> JobBuilder {
        self.builder.add_transition(self.pattern, FlowTarget::End(status));
        self.builder
    }
}
