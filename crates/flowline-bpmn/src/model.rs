// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process graph domain model.
//!
//! Every element keeps the id assigned by the source document; the graph
//! never invents identifiers. Sub-processes nest recursively through
//! [`SubGraph`], and each kind enumeration carries an explicit sentinel for
//! elements the extractor does not recognize so vendor extensions degrade
//! gracefully instead of failing extraction.

use serde::{Deserialize, Serialize};

// ============================================================================
// Kind enumerations
// ============================================================================

/// Specialization of a task node.
///
/// `None` is a plain `<task>` with no specialization; it is the promotion
/// target for deploy-time configuration (see [`crate::transform`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    /// Plain unspecialized task.
    None,
    /// Human work item.
    User,
    /// Automated service invocation.
    Service,
    /// Inline script execution.
    Script,
    /// Business rule / decision evaluation.
    BusinessRule,
    /// Message send.
    Send,
    /// Message receive.
    Receive,
    /// Manual work performed outside the engine.
    Manual,
}

/// Position of an event in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Process or sub-process entry point.
    Start,
    /// Process or sub-process termination.
    End,
    /// Mid-flow event the process waits on.
    IntermediateCatch,
    /// Mid-flow event the process emits.
    IntermediateThrow,
    /// Event attached to an activity boundary.
    Boundary,
    /// Unrecognized event element.
    Unknown,
}

/// Trigger of an event, derived from its `*EventDefinition` child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    /// No event definition child (a "none" event).
    None,
    /// `messageEventDefinition`
    Message,
    /// `signalEventDefinition`
    Signal,
    /// `timerEventDefinition`
    Timer,
    /// `conditionalEventDefinition`
    Conditional,
    /// `errorEventDefinition`
    Error,
    /// `escalationEventDefinition`
    Escalation,
    /// `compensateEventDefinition`
    Compensation,
    /// `linkEventDefinition`
    Link,
    /// `terminateEventDefinition`
    Terminate,
}

/// Branching semantics of a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GatewayKind {
    /// Data-based exclusive (XOR) gateway.
    Exclusive,
    /// Parallel (AND) gateway.
    Parallel,
    /// Inclusive (OR) gateway.
    Inclusive,
    /// Complex gateway.
    Complex,
    /// Event-based gateway.
    EventBased,
    /// Unrecognized gateway element.
    Unknown,
}

// ============================================================================
// Flow nodes
// ============================================================================

/// A task activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
    /// Task specialization.
    pub kind: TaskKind,
    /// Ids of incoming sequence flows, in document order.
    pub incoming: Vec<String>,
    /// Ids of outgoing sequence flows, in document order.
    pub outgoing: Vec<String>,
    /// Id of the lane this task belongs to, if laid out in one.
    pub lane_id: Option<String>,
    /// Text of the first `documentation` child, if present.
    pub documentation: Option<String>,
}

/// An event node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNode {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
    /// Position of the event in the flow.
    pub kind: EventKind,
    /// Trigger derived from the event definition child.
    pub trigger: TriggerKind,
    /// For boundary events, the id of the activity they attach to.
    pub attached_to: Option<String>,
    /// Summary of the event definition child: its tag plus the referenced
    /// message/signal name, timer expression or error code when present.
    pub definition: Option<String>,
    /// Ids of incoming sequence flows, in document order.
    pub incoming: Vec<String>,
    /// Ids of outgoing sequence flows, in document order.
    pub outgoing: Vec<String>,
}

/// A gateway node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayNode {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
    /// Branching semantics.
    pub kind: GatewayKind,
    /// Id of the default outgoing flow, if declared.
    pub default_flow: Option<String>,
    /// Text of the first `documentation` child, if present.
    pub documentation: Option<String>,
    /// Ids of incoming sequence flows, in document order.
    pub incoming: Vec<String>,
    /// Ids of outgoing sequence flows, in document order.
    pub outgoing: Vec<String>,
}

/// A directed sequence flow between two flow nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceFlow {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
    /// Id of the source flow node.
    pub source: String,
    /// Id of the target flow node.
    pub target: String,
    /// Text of the `conditionExpression` child, if present.
    pub condition: Option<String>,
}

// ============================================================================
// Artifacts, data, layout
// ============================================================================

/// A data object reference within a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
}

/// A data store reference within a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStore {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
}

/// A free-text annotation artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnnotation {
    /// Document-assigned element id.
    pub id: String,
    /// Annotation body text.
    pub text: Option<String>,
}

/// A lane within a lane set. Lanes carry the ids of the flow nodes they
/// reference; membership is also denormalized onto [`TaskNode::lane_id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
    /// Ids of the flow nodes assigned to this lane, in document order.
    pub flow_node_refs: Vec<String>,
}

/// A set of lanes partitioning a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSet {
    /// Document-assigned element id.
    pub id: String,
    /// Lanes in document order.
    pub lanes: Vec<Lane>,
}

/// A collaboration participant (pool).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
    /// Id of the process this participant executes, if any.
    pub process_ref: Option<String>,
}

/// A message flow between participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFlow {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
    /// Id of the source element.
    pub source: String,
    /// Id of the target element.
    pub target: String,
}

// ============================================================================
// Graph aggregates
// ============================================================================

/// The flow content shared by a process and an embedded sub-process.
///
/// Child element vectors preserve document order, which downstream repair
/// logic depends on when picking deterministic entry points.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubGraph {
    /// Document-assigned element id.
    pub id: String,
    /// Human-readable label, if present.
    pub name: Option<String>,
    /// Text of the first `documentation` child, if present.
    pub documentation: Option<String>,
    /// Task activities, in document order.
    pub tasks: Vec<TaskNode>,
    /// Events, in document order.
    pub events: Vec<EventNode>,
    /// Gateways, in document order.
    pub gateways: Vec<GatewayNode>,
    /// Sequence flows, in document order.
    pub flows: Vec<SequenceFlow>,
    /// Embedded sub-processes, recursively extracted.
    pub sub_graphs: Vec<SubGraph>,
    /// Data object references.
    pub data_objects: Vec<DataObject>,
    /// Data store references.
    pub data_stores: Vec<DataStore>,
    /// Text annotations.
    pub annotations: Vec<TextAnnotation>,
}

impl SubGraph {
    /// Start events directly contained in this sub-graph.
    pub fn start_events(&self) -> impl Iterator<Item = &EventNode> {
        self.events.iter().filter(|e| e.kind == EventKind::Start)
    }

    /// All tasks in this sub-graph and its descendants, depth-first in
    /// document order.
    pub fn all_tasks(&self) -> Vec<&TaskNode> {
        let mut out: Vec<&TaskNode> = self.tasks.iter().collect();
        for sub in &self.sub_graphs {
            out.extend(sub.all_tasks());
        }
        out
    }
}

/// A top-level process: a [`SubGraph`] plus process-scoped concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Flow content of the process.
    pub graph: SubGraph,
    /// Value of the `isExecutable` attribute, if declared.
    pub is_executable: Option<bool>,
    /// Lane sets partitioning this process.
    pub lane_sets: Vec<LaneSet>,
}

/// The extracted content of one BPMN document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessGraph {
    /// Top-level processes, in document order.
    pub processes: Vec<Process>,
    /// Collaboration participants (pools).
    pub pools: Vec<Pool>,
    /// Message flows between participants.
    pub message_flows: Vec<MessageFlow>,
    /// Name of the collaboration element, if present.
    pub collaboration_name: Option<String>,
}

impl ProcessGraph {
    /// The first top-level process, which carries the deployable key.
    pub fn primary(&self) -> Option<&Process> {
        self.processes.first()
    }

    /// All tasks across every process, depth-first in document order.
    pub fn all_tasks(&self) -> Vec<&TaskNode> {
        self.processes
            .iter()
            .flat_map(|p| p.graph.all_tasks())
            .collect()
    }
}
