// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! BPMN 2.0 XML to process graph extraction.
//!
//! The extractor reads namespaced documents by local element name, so files
//! produced with any prefix convention (`bpmn:`, `bpmn2:`, default
//! namespace) extract identically. Unrecognized event and gateway elements
//! become explicit `Unknown` nodes rather than failing the document.
//!
//! Node incoming/outgoing flow lists are derived from the sequence flows of
//! the enclosing scope rather than from `<incoming>`/`<outgoing>` children,
//! which authoring tools frequently omit or leave stale.

use std::collections::HashMap;

use roxmltree::{Document, Node};
use thiserror::Error;

use crate::model::{
    DataObject, DataStore, EventKind, EventNode, GatewayKind, GatewayNode, Lane, LaneSet,
    MessageFlow, Pool, Process, ProcessGraph, SequenceFlow, SubGraph, TaskKind, TaskNode,
    TextAnnotation, TriggerKind,
};

/// Extraction failure.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The document is not well-formed XML.
    #[error("malformed BPMN document: {0}")]
    Parse(#[from] roxmltree::Error),
    /// The document contains no identifiable process element.
    #[error("document contains no process element with an id")]
    NoProcess,
}

impl ExtractError {
    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            ExtractError::Parse(_) => "MALFORMED_DOCUMENT",
            ExtractError::NoProcess => "MALFORMED_DOCUMENT",
        }
    }
}

/// Extract the full process graph from a BPMN document.
pub fn extract(xml: &str) -> Result<ProcessGraph, ExtractError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();

    let refs = DefinitionRefs::collect(root);
    let mut graph = ProcessGraph::default();
    for child in root.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "process" => graph.processes.push(extract_process(child, &refs)),
            "collaboration" => {
                graph.collaboration_name = attr_owned(child, "name");
                for elem in child.children().filter(Node::is_element) {
                    match elem.tag_name().name() {
                        "participant" => graph.pools.push(Pool {
                            id: id_of(elem),
                            name: attr_owned(elem, "name"),
                            process_ref: attr_owned(elem, "processRef"),
                        }),
                        "messageFlow" => graph.message_flows.push(MessageFlow {
                            id: id_of(elem),
                            name: attr_owned(elem, "name"),
                            source: attr_owned(elem, "sourceRef").unwrap_or_default(),
                            target: attr_owned(elem, "targetRef").unwrap_or_default(),
                        }),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if graph.processes.is_empty() {
        return Err(ExtractError::NoProcess);
    }

    tracing::debug!(
        processes = graph.processes.len(),
        pools = graph.pools.len(),
        "extracted process graph"
    );
    Ok(graph)
}

/// Deployment key of the document: the id of its first process.
pub fn process_key(xml: &str) -> Result<String, ExtractError> {
    let doc = Document::parse(xml)?;
    first_process(&doc)
        .and_then(|p| attr_owned(p, "id"))
        .ok_or(ExtractError::NoProcess)
}

/// Display name of the document: the first process name, falling back to the
/// collaboration name, falling back to the process key.
pub fn process_name(xml: &str) -> Result<String, ExtractError> {
    let doc = Document::parse(xml)?;
    let process = first_process(&doc).ok_or(ExtractError::NoProcess)?;
    if let Some(name) = attr_owned(process, "name") {
        return Ok(name);
    }
    let collaboration_name = doc
        .root_element()
        .children()
        .filter(Node::is_element)
        .find(|n| n.tag_name().name() == "collaboration")
        .and_then(|c| attr_owned(c, "name"));
    if let Some(name) = collaboration_name {
        return Ok(name);
    }
    attr_owned(process, "id").ok_or(ExtractError::NoProcess)
}

fn first_process<'a, 'input>(doc: &'a Document<'input>) -> Option<Node<'a, 'input>> {
    doc.root_element()
        .children()
        .filter(Node::is_element)
        .find(|n| n.tag_name().name() == "process")
}

// ============================================================================
// Process and sub-graph extraction
// ============================================================================

/// Document-level definition elements that event definitions reference by id.
#[derive(Default)]
struct DefinitionRefs {
    messages: HashMap<String, String>,
    signals: HashMap<String, String>,
    errors: HashMap<String, String>,
}

impl DefinitionRefs {
    fn collect(root: Node) -> Self {
        let mut refs = Self::default();
        for child in root.children().filter(Node::is_element) {
            let Some(id) = attr_owned(child, "id") else {
                continue;
            };
            match child.tag_name().name() {
                "message" => {
                    if let Some(name) = attr_owned(child, "name") {
                        refs.messages.insert(id, name);
                    }
                }
                "signal" => {
                    if let Some(name) = attr_owned(child, "name") {
                        refs.signals.insert(id, name);
                    }
                }
                "error" => {
                    if let Some(code) = attr_owned(child, "errorCode") {
                        refs.errors.insert(id, code);
                    }
                }
                _ => {}
            }
        }
        refs
    }
}

fn extract_process(node: Node, refs: &DefinitionRefs) -> Process {
    let mut lane_sets = Vec::new();
    for child in node.children().filter(Node::is_element) {
        if child.tag_name().name() == "laneSet" {
            lane_sets.push(extract_lane_set(child));
        }
    }

    // Denormalized lane membership for every flow node in the process.
    let mut lane_of: HashMap<String, String> = HashMap::new();
    for set in &lane_sets {
        for lane in &set.lanes {
            for node_ref in &lane.flow_node_refs {
                lane_of.insert(node_ref.clone(), lane.id.clone());
            }
        }
    }

    let graph = extract_sub_graph(node, &lane_of, refs);

    Process {
        graph,
        is_executable: node.attribute("isExecutable").map(|v| v == "true"),
        lane_sets,
    }
}

fn extract_lane_set(node: Node) -> LaneSet {
    let mut lanes = Vec::new();
    for lane in node
        .children()
        .filter(Node::is_element)
        .filter(|n| n.tag_name().name() == "lane")
    {
        let flow_node_refs = lane
            .children()
            .filter(Node::is_element)
            .filter(|n| n.tag_name().name() == "flowNodeRef")
            .filter_map(|n| n.text().map(|t| t.trim().to_string()))
            .filter(|t| !t.is_empty())
            .collect();
        lanes.push(Lane {
            id: id_of(lane),
            name: attr_owned(lane, "name"),
            flow_node_refs,
        });
    }
    LaneSet {
        id: id_of(node),
        lanes,
    }
}

fn extract_sub_graph(node: Node, lane_of: &HashMap<String, String>, refs: &DefinitionRefs) -> SubGraph {
    let mut graph = SubGraph {
        id: id_of(node),
        name: attr_owned(node, "name"),
        documentation: documentation(node),
        ..SubGraph::default()
    };

    for child in node.children().filter(Node::is_element) {
        let tag = child.tag_name().name();
        if let Some(kind) = task_kind(tag) {
            graph.tasks.push(TaskNode {
                id: id_of(child),
                name: attr_owned(child, "name"),
                kind,
                incoming: Vec::new(),
                outgoing: Vec::new(),
                lane_id: child.attribute("id").and_then(|id| lane_of.get(id).cloned()),
                documentation: documentation(child),
            });
        } else if let Some(kind) = event_kind(tag) {
            graph.events.push(EventNode {
                id: id_of(child),
                name: attr_owned(child, "name"),
                kind,
                trigger: trigger_kind(child),
                attached_to: attr_owned(child, "attachedToRef"),
                definition: event_definition(child, refs),
                incoming: Vec::new(),
                outgoing: Vec::new(),
            });
        } else if let Some(kind) = gateway_kind(tag) {
            graph.gateways.push(GatewayNode {
                id: id_of(child),
                name: attr_owned(child, "name"),
                kind,
                default_flow: attr_owned(child, "default"),
                documentation: documentation(child),
                incoming: Vec::new(),
                outgoing: Vec::new(),
            });
        } else {
            match tag {
                "sequenceFlow" => graph.flows.push(SequenceFlow {
                    id: id_of(child),
                    name: attr_owned(child, "name"),
                    source: attr_owned(child, "sourceRef").unwrap_or_default(),
                    target: attr_owned(child, "targetRef").unwrap_or_default(),
                    condition: condition_text(child),
                }),
                "subProcess" => graph.sub_graphs.push(extract_sub_graph(child, lane_of, refs)),
                "dataObjectReference" | "dataObject" => graph.data_objects.push(DataObject {
                    id: id_of(child),
                    name: attr_owned(child, "name"),
                }),
                "dataStoreReference" => graph.data_stores.push(DataStore {
                    id: id_of(child),
                    name: attr_owned(child, "name"),
                }),
                "textAnnotation" => graph.annotations.push(TextAnnotation {
                    id: id_of(child),
                    text: child
                        .children()
                        .filter(Node::is_element)
                        .find(|n| n.tag_name().name() == "text")
                        .and_then(|n| n.text())
                        .map(|t| t.trim().to_string()),
                }),
                _ => {}
            }
        }
    }

    link_flows(&mut graph);
    graph
}

/// Fill node incoming/outgoing lists from this scope's sequence flows.
fn link_flows(graph: &mut SubGraph) {
    for i in 0..graph.flows.len() {
        let (id, source, target) = {
            let f = &graph.flows[i];
            (f.id.clone(), f.source.clone(), f.target.clone())
        };
        for task in &mut graph.tasks {
            if task.id == source {
                task.outgoing.push(id.clone());
            }
            if task.id == target {
                task.incoming.push(id.clone());
            }
        }
        for event in &mut graph.events {
            if event.id == source {
                event.outgoing.push(id.clone());
            }
            if event.id == target {
                event.incoming.push(id.clone());
            }
        }
        for gateway in &mut graph.gateways {
            if gateway.id == source {
                gateway.outgoing.push(id.clone());
            }
            if gateway.id == target {
                gateway.incoming.push(id.clone());
            }
        }
    }
}

// ============================================================================
// Element classification
// ============================================================================

fn task_kind(tag: &str) -> Option<TaskKind> {
    match tag {
        "task" => Some(TaskKind::None),
        "userTask" => Some(TaskKind::User),
        "serviceTask" => Some(TaskKind::Service),
        "scriptTask" => Some(TaskKind::Script),
        "businessRuleTask" => Some(TaskKind::BusinessRule),
        "sendTask" => Some(TaskKind::Send),
        "receiveTask" => Some(TaskKind::Receive),
        "manualTask" => Some(TaskKind::Manual),
        _ => None,
    }
}

fn event_kind(tag: &str) -> Option<EventKind> {
    match tag {
        "startEvent" => Some(EventKind::Start),
        "endEvent" => Some(EventKind::End),
        "intermediateCatchEvent" => Some(EventKind::IntermediateCatch),
        "intermediateThrowEvent" => Some(EventKind::IntermediateThrow),
        "boundaryEvent" => Some(EventKind::Boundary),
        _ if tag.ends_with("Event") => Some(EventKind::Unknown),
        _ => None,
    }
}

fn gateway_kind(tag: &str) -> Option<GatewayKind> {
    match tag {
        "exclusiveGateway" => Some(GatewayKind::Exclusive),
        "parallelGateway" => Some(GatewayKind::Parallel),
        "inclusiveGateway" => Some(GatewayKind::Inclusive),
        "complexGateway" => Some(GatewayKind::Complex),
        "eventBasedGateway" => Some(GatewayKind::EventBased),
        _ if tag.ends_with("Gateway") => Some(GatewayKind::Unknown),
        _ => None,
    }
}

/// Trigger kind from the event's `*EventDefinition` child element.
fn trigger_kind(event: Node) -> TriggerKind {
    for child in event.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "messageEventDefinition" => return TriggerKind::Message,
            "signalEventDefinition" => return TriggerKind::Signal,
            "timerEventDefinition" => return TriggerKind::Timer,
            "conditionalEventDefinition" => return TriggerKind::Conditional,
            "errorEventDefinition" => return TriggerKind::Error,
            "escalationEventDefinition" => return TriggerKind::Escalation,
            "compensateEventDefinition" => return TriggerKind::Compensation,
            "linkEventDefinition" => return TriggerKind::Link,
            "terminateEventDefinition" => return TriggerKind::Terminate,
            _ => {}
        }
    }
    TriggerKind::None
}

/// Summary of an event's `*EventDefinition` child: the definition tag plus
/// the referenced message/signal name, timer expression or error code.
fn event_definition(event: Node, refs: &DefinitionRefs) -> Option<String> {
    let def = event
        .children()
        .filter(Node::is_element)
        .find(|n| n.tag_name().name().ends_with("EventDefinition"))?;
    let tag = def.tag_name().name();
    let detail = match tag {
        "messageEventDefinition" => def
            .attribute("messageRef")
            .and_then(|id| refs.messages.get(id))
            .cloned(),
        "signalEventDefinition" => def
            .attribute("signalRef")
            .and_then(|id| refs.signals.get(id))
            .cloned(),
        "errorEventDefinition" => def
            .attribute("errorRef")
            .and_then(|id| refs.errors.get(id))
            .cloned(),
        "timerEventDefinition" => timer_detail(def),
        _ => None,
    };
    Some(match detail {
        Some(detail) => format!("{tag}: {detail}"),
        None => tag.to_string(),
    })
}

fn timer_detail(def: Node) -> Option<String> {
    let expr = |name: &str| {
        def.children()
            .filter(Node::is_element)
            .find(|n| n.tag_name().name() == name)
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    };
    expr("timeDuration")
        .map(|v| format!("Duration={v}"))
        .or_else(|| expr("timeDate").map(|v| format!("Date={v}")))
        .or_else(|| expr("timeCycle").map(|v| format!("Cycle={v}")))
}

fn documentation(node: Node) -> Option<String> {
    node.children()
        .filter(Node::is_element)
        .find(|n| n.tag_name().name() == "documentation")
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn condition_text(flow: Node) -> Option<String> {
    flow.children()
        .filter(Node::is_element)
        .find(|n| n.tag_name().name() == "conditionExpression")
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn id_of(node: Node) -> String {
    node.attribute("id").unwrap_or_default().to_string()
}

fn attr_owned(node: Node, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}
