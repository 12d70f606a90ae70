//! Conversation graph: named stages and the transitions between them.
//!
//! Transitions are data (a list of [`StageTransition`]), so the loop from
//! `finalize_response` back to `await_user_message` is an edge like any
//! other. The builder rejects graphs where that edge is missing or where any
//! non-terminal stage has no way out.

mod stage;
pub mod stages;

pub use stage::{EventEmitter, StageContext, StageHandler, StageName, StageOutcome};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub const AWAIT_USER_MESSAGE: StageName = StageName::from_static("await_user_message");
pub const GENERATE_RESPONSE: StageName = StageName::from_static("generate_response");
pub const INVOKE_TOOLS: StageName = StageName::from_static("invoke_tools");
pub const FINALIZE_RESPONSE: StageName = StageName::from_static("finalize_response");
/// Terminal stage. A thread that reaches it accepts no further input.
pub const END: StageName = StageName::from_static("__end__");

pub const ROUTE_TOOLS: &str = "tools";
pub const ROUTE_RESPOND: &str = "respond";

/// When an edge is taken.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    Always,
    Route(String),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("always"),
            Self::Route(label) => write!(f, "route '{label}'"),
        }
    }
}

/// A directed edge `from --condition--> to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTransition {
    pub from: StageName,
    pub condition: Condition,
    pub to: StageName,
}

/// Graph construction and routing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph has no 'await_user_message' stage")]
    MissingEntry,

    #[error("edge refers to unregistered stage '{0}'")]
    MissingStage(StageName),

    #[error("stage '{0}' has no outgoing edge")]
    DeadEnd(StageName),

    #[error("stage '{0}' is not reachable from 'await_user_message'")]
    Unreachable(StageName),

    #[error("stage '{0}' mixes an unconditional edge with other edges")]
    MixedEdges(StageName),

    #[error("stage '{stage}' has more than one edge for {condition}")]
    DuplicateEdge { stage: StageName, condition: String },

    #[error("'finalize_response' must transition only to 'await_user_message', found edge to '{0}'")]
    FinalizeMustLoopBack(StageName),

    #[error("'{0}' is reserved for the terminal stage")]
    ReservedStage(StageName),

    #[error("stage '{stage}' has no edge for {outcome}")]
    UnknownRoute { stage: StageName, outcome: String },
}

/// A validated set of stages and transitions.
#[derive(Clone)]
pub struct ConversationGraph {
    stages: HashMap<StageName, Arc<dyn StageHandler>>,
    edges: Vec<StageTransition>,
}

impl ConversationGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// await → generate → (tools → invoke → generate)* → finalize → await.
    pub fn standard() -> Self {
        let builder = GraphBuilder::standard();
        Self {
            stages: builder.stages,
            edges: builder.edges,
        }
    }

    /// Stage every fresh thread starts at.
    pub fn entry(&self) -> StageName {
        AWAIT_USER_MESSAGE
    }

    pub fn is_terminal(stage: &StageName) -> bool {
        *stage == END
    }

    pub fn handler(&self, stage: &StageName) -> Option<&Arc<dyn StageHandler>> {
        self.stages.get(stage)
    }

    pub fn edges(&self) -> &[StageTransition] {
        &self.edges
    }

    pub fn stage_names(&self) -> Vec<&StageName> {
        let mut names: Vec<&StageName> = self.stages.keys().collect();
        names.sort();
        names
    }

    fn outgoing<'a>(&'a self, stage: &'a StageName) -> impl Iterator<Item = &'a StageTransition> {
        self.edges.iter().filter(move |e| e.from == *stage)
    }

    /// Where `outcome` at `from` leads. `Suspend` stays put.
    pub fn next_stage(&self, from: &StageName, outcome: &StageOutcome) -> Result<StageName, GraphError> {
        let wanted = match outcome {
            StageOutcome::Suspend => return Ok(from.clone()),
            StageOutcome::Continue => Condition::Always,
            StageOutcome::Route(label) => Condition::Route(label.clone()),
        };
        self.outgoing(from)
            .find(|e| e.condition == wanted)
            .map(|e| e.to.clone())
            .ok_or_else(|| GraphError::UnknownRoute {
                stage: from.clone(),
                outcome: wanted.to_string(),
            })
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.stages.contains_key(&END) {
            return Err(GraphError::ReservedStage(END));
        }
        if !self.stages.contains_key(&AWAIT_USER_MESSAGE) {
            return Err(GraphError::MissingEntry);
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !self.stages.contains_key(endpoint) && *endpoint != END {
                    return Err(GraphError::MissingStage(endpoint.clone()));
                }
            }
            if edge.from == END {
                return Err(GraphError::ReservedStage(END));
            }
        }

        for stage in self.stage_names() {
            let mut seen = HashSet::new();
            let mut has_always = false;
            let mut count = 0usize;
            for edge in self.outgoing(stage) {
                count += 1;
                has_always |= edge.condition == Condition::Always;
                if !seen.insert(&edge.condition) {
                    return Err(GraphError::DuplicateEdge {
                        stage: stage.clone(),
                        condition: edge.condition.to_string(),
                    });
                }
            }
            if count == 0 {
                return Err(GraphError::DeadEnd(stage.clone()));
            }
            if has_always && count > 1 {
                return Err(GraphError::MixedEdges(stage.clone()));
            }
        }

        let finalize = FINALIZE_RESPONSE;
        if let Some(edge) = self
            .outgoing(&finalize)
            .find(|e| e.to != AWAIT_USER_MESSAGE || e.condition != Condition::Always)
        {
            return Err(GraphError::FinalizeMustLoopBack(edge.to.clone()));
        }

        let entry = AWAIT_USER_MESSAGE;
        let reachable = self.reachable_from(&entry);
        if let Some(stage) = self.stage_names().into_iter().find(|s| !reachable.contains(*s)) {
            return Err(GraphError::Unreachable(stage.clone()));
        }

        Ok(())
    }

    fn reachable_from<'a>(&'a self, start: &'a StageName) -> HashSet<&'a StageName> {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(stage) = queue.pop_front() {
            for edge in self.outgoing(stage) {
                if seen.insert(&edge.to) {
                    queue.push_back(&edge.to);
                }
            }
        }
        seen
    }
}

impl fmt::Debug for ConversationGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationGraph")
            .field("stages", &self.stage_names())
            .field("edges", &self.edges)
            .finish()
    }
}

impl Default for ConversationGraph {
    fn default() -> Self {
        Self::standard()
    }
}

/// Incremental graph construction; `build` validates.
#[derive(Default)]
pub struct GraphBuilder {
    stages: HashMap<StageName, Arc<dyn StageHandler>>,
    edges: Vec<StageTransition>,
}

impl GraphBuilder {
    /// Builder preloaded with the standard stages and edges.
    pub fn standard() -> Self {
        Self::default()
            .add_stage(AWAIT_USER_MESSAGE, stages::AwaitUserMessage)
            .add_stage(GENERATE_RESPONSE, stages::GenerateResponse)
            .add_stage(INVOKE_TOOLS, stages::InvokeTools)
            .add_stage(FINALIZE_RESPONSE, stages::FinalizeResponse)
            .add_edge(AWAIT_USER_MESSAGE, GENERATE_RESPONSE)
            .add_route(GENERATE_RESPONSE, ROUTE_TOOLS, INVOKE_TOOLS)
            .add_route(GENERATE_RESPONSE, ROUTE_RESPOND, FINALIZE_RESPONSE)
            .add_edge(INVOKE_TOOLS, GENERATE_RESPONSE)
            .add_edge(FINALIZE_RESPONSE, AWAIT_USER_MESSAGE)
    }

    /// Register (or replace) a stage handler.
    pub fn add_stage(mut self, name: impl Into<StageName>, handler: impl StageHandler + 'static) -> Self {
        self.stages.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn add_edge(mut self, from: impl Into<StageName>, to: impl Into<StageName>) -> Self {
        self.edges.push(StageTransition {
            from: from.into(),
            condition: Condition::Always,
            to: to.into(),
        });
        self
    }

    pub fn add_route(
        mut self,
        from: impl Into<StageName>,
        label: impl Into<String>,
        to: impl Into<StageName>,
    ) -> Self {
        self.edges.push(StageTransition {
            from: from.into(),
            condition: Condition::Route(label.into()),
            to: to.into(),
        });
        self
    }

    /// Drop every edge leaving `from`.
    pub fn clear_edges(mut self, from: impl Into<StageName>) -> Self {
        let from = from.into();
        self.edges.retain(|e| e.from != from);
        self
    }

    pub fn build(self) -> Result<ConversationGraph, GraphError> {
        let graph = ConversationGraph {
            stages: self.stages,
            edges: self.edges,
        };
        graph.validate()?;
        Ok(graph)
    }
}
