// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pre-deployment document transformation.
//!
//! The transformer repairs and annotates a BPMN document in two phases. The
//! first phase reads the document into a DOM and computes a [`Plan`]: which
//! tasks to promote and annotate, which sub-processes need a synthesized
//! start event, and which gateway branches need a default marker or an
//! always-true condition. The second phase streams the original document
//! through an event rewriter and applies the plan, so everything the plan
//! does not touch is carried through unchanged, including vendor extension
//! elements the extractor does not model.
//!
//! Transformation is idempotent: running it over its own output produces the
//! same document again.

use std::collections::{HashMap, HashSet};

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use roxmltree::{Document, Node};
use thiserror::Error;
use tracing::{debug, warn};

use crate::task_config::{AssigneeType, TaskConfiguration, duration_to_days};

const CAMUNDA_NS: &str = "http://camunda.org/schema/1.0/bpmn";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Maps externally-supplied principal and group ids to engine-compliant ids.
///
/// Resolution is a pure lookup: every id referenced by the configuration
/// list must be registered before transformation starts, so an unresolved
/// reference here is a hard failure rather than a provisioning trigger.
pub trait IdentityResolver {
    /// Engine id for a principal, if one is registered.
    fn resolve_principal(&self, original: &str) -> Option<String>;
    /// Engine id for a group or organizational entity, if one is registered.
    fn resolve_group(&self, original: &str) -> Option<String>;
}

impl IdentityResolver for HashMap<String, String> {
    fn resolve_principal(&self, original: &str) -> Option<String> {
        self.get(original).cloned()
    }
    fn resolve_group(&self, original: &str) -> Option<String> {
        self.get(original).cloned()
    }
}

/// Transformation failure.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The document is not well-formed XML.
    #[error("malformed BPMN document: {0}")]
    Parse(#[from] roxmltree::Error),
    /// A configured assignment target has no registered identity mapping.
    #[error("task '{task_id}' references unregistered {channel} '{reference}'")]
    UnresolvedAssignee {
        /// Id of the task whose configuration failed to resolve.
        task_id: String,
        /// Assignment channel that failed (user, group or entity).
        channel: &'static str,
        /// The unresolvable original id.
        reference: String,
    },
    /// The streaming rewrite failed.
    #[error("failed to rewrite document: {0}")]
    Rewrite(#[from] quick_xml::Error),
    /// The rewritten document is not valid UTF-8.
    #[error("rewritten document is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl TransformError {
    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            TransformError::Parse(_) => "MALFORMED_DOCUMENT",
            TransformError::UnresolvedAssignee { .. }
            | TransformError::Rewrite(_)
            | TransformError::Utf8(_) => "TRANSFORMATION_FAILED",
        }
    }
}

/// Repairs and annotates BPMN documents for engine deployment.
pub struct Transformer<'a, R: IdentityResolver> {
    resolver: &'a R,
    history_ttl_days: u32,
}

impl<'a, R: IdentityResolver> Transformer<'a, R> {
    /// Create a transformer resolving assignments through `resolver` and
    /// stamping `history_ttl_days` as the definition's history retention.
    pub fn new(resolver: &'a R, history_ttl_days: u32) -> Self {
        Self {
            resolver,
            history_ttl_days,
        }
    }

    /// Transform a document: force executability, promote and annotate
    /// configured tasks, repair sub-process entry points and exclusive
    /// gateway defaults.
    pub fn transform(
        &self,
        xml: &str,
        configs: &[TaskConfiguration],
    ) -> Result<String, TransformError> {
        let doc = Document::parse(xml)?;
        let plan = self.plan(&doc, configs)?;
        debug!(
            promotions = plan.task_patches.len(),
            start_injections = plan.start_injections.len(),
            gateway_defaults = plan.gateway_defaults.len(),
            true_conditions = plan.true_conditions.len(),
            "applying transformation plan"
        );
        apply(xml, &plan, self.history_ttl_days)
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    fn plan(&self, doc: &Document, configs: &[TaskConfiguration]) -> Result<Plan, TransformError> {
        let mut plan = Plan::default();

        let root = doc.root_element();
        plan.camunda_prefix = declared_prefix(root, CAMUNDA_NS);
        plan.xsi_prefix = declared_prefix(root, XSI_NS);

        for process in root
            .children()
            .filter(Node::is_element)
            .filter(|n| n.tag_name().name() == "process")
        {
            self.plan_promotions(process, configs, &mut plan)?;
            plan_scope(process, false, &mut plan);
        }
        Ok(plan)
    }

    /// Match plain and user tasks (at any depth) against the configuration
    /// list and compute the attribute patch for each. First matching
    /// configuration wins when the caller supplies duplicates.
    fn plan_promotions(
        &self,
        process: Node,
        configs: &[TaskConfiguration],
        plan: &mut Plan,
    ) -> Result<(), TransformError> {
        for task in process
            .descendants()
            .filter(Node::is_element)
            .filter(|n| matches!(n.tag_name().name(), "task" | "userTask"))
        {
            let Some(task_id) = task.attribute("id") else {
                continue;
            };
            let Some(config) = configs.iter().find(|c| c.task_id == task_id) else {
                continue;
            };

            let (assignee, candidate_groups) = self.plan_assignment(task_id, config)?;
            let due_date = match (config.duration_value, config.duration_unit.as_deref()) {
                (Some(value), Some(unit)) => {
                    let days = duration_to_days(value, unit);
                    Some(format!("${{now().plusDays({days})}}"))
                }
                _ => None,
            };
            let form_key = config
                .add_form_resource
                .then(|| format!("embedded:app:forms/{task_id}.html"));

            plan.task_patches.insert(
                task_id.to_string(),
                TaskPatch {
                    name: config.task_name.clone(),
                    assignee,
                    candidate_groups,
                    priority: config.priority.clone(),
                    due_date,
                    form_key,
                },
            );
        }
        Ok(())
    }

    /// Resolve a configuration's assignment to engine ids.
    ///
    /// An explicit `assigneeType` with a non-null target is authoritative;
    /// otherwise the channels fall back in user, group, entity order. A
    /// configured target that cannot be resolved is fatal. A configuration
    /// naming no target at all leaves the task unassigned.
    fn plan_assignment(
        &self,
        task_id: &str,
        config: &TaskConfiguration,
    ) -> Result<(Option<String>, Option<String>), TransformError> {
        let explicit = match config.assignee_type {
            Some(AssigneeType::User) => config.assignee_user.as_deref().map(|t| ("user", t)),
            Some(AssigneeType::Group) => config.assignee_group.as_deref().map(|t| ("group", t)),
            Some(AssigneeType::Entity) => config.assignee_entity.as_deref().map(|t| ("entity", t)),
            None => None,
        };
        let (channel, target) = match explicit {
            Some(pair) => pair,
            None => {
                if let Some(user) = config.assignee_user.as_deref() {
                    ("user", user)
                } else if let Some(group) = config.assignee_group.as_deref() {
                    ("group", group)
                } else if let Some(entity) = config.assignee_entity.as_deref() {
                    ("entity", entity)
                } else {
                    warn!(task_id, "task configuration has no assignment target, leaving unassigned");
                    return Ok((None, None));
                }
            }
        };

        match channel {
            "user" => {
                let engine_id = self.resolver.resolve_principal(target).ok_or_else(|| {
                    TransformError::UnresolvedAssignee {
                        task_id: task_id.to_string(),
                        channel,
                        reference: target.to_string(),
                    }
                })?;
                Ok((Some(engine_id), None))
            }
            // Groups and organizational entities both route through
            // candidate groups.
            _ => {
                let engine_id = self.resolver.resolve_group(target).ok_or_else(|| {
                    TransformError::UnresolvedAssignee {
                        task_id: task_id.to_string(),
                        channel,
                        reference: target.to_string(),
                    }
                })?;
                Ok((None, Some(engine_id)))
            }
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Default)]
struct Plan {
    /// Plain tasks to promote to user tasks, keyed by task id.
    task_patches: HashMap<String, TaskPatch>,
    /// Sub-processes needing a synthesized start event, keyed by their id.
    start_injections: HashMap<String, StartInjection>,
    /// Exclusive gateways to receive a `default` attribute, keyed by id.
    gateway_defaults: HashMap<String, String>,
    /// Sequence flows to receive a synthesized always-true condition.
    true_conditions: HashSet<String>,
    /// Prefix the document already binds to the vendor namespace.
    camunda_prefix: Option<String>,
    /// Prefix the document already binds to the XML Schema instance namespace.
    xsi_prefix: Option<String>,
}

#[derive(Debug)]
struct TaskPatch {
    name: Option<String>,
    assignee: Option<String>,
    candidate_groups: Option<String>,
    priority: Option<String>,
    due_date: Option<String>,
    form_key: Option<String>,
}

#[derive(Debug)]
struct StartInjection {
    start_id: String,
    flow_id: String,
    entry_id: String,
}

/// Structural repair over one flow scope (a process or sub-process),
/// recursing into nested sub-processes depth-first.
fn plan_scope(scope: Node, is_sub_process: bool, plan: &mut Plan) {
    let children: Vec<Node> = scope.children().filter(Node::is_element).collect();

    let flows: Vec<Node> = children
        .iter()
        .copied()
        .filter(|n| n.tag_name().name() == "sequenceFlow")
        .collect();

    if is_sub_process {
        plan_start_injection(scope, &children, &flows, plan);
    }

    for gateway in children
        .iter()
        .filter(|n| n.tag_name().name() == "exclusiveGateway")
    {
        plan_gateway_repair(gateway, &flows, plan);
    }

    for child in children
        .iter()
        .filter(|n| n.tag_name().name() == "subProcess")
    {
        plan_scope(*child, true, plan);
    }
}

/// A sub-process with no start event gets one synthesized, wired to a single
/// deterministic entry node: the first task lacking an incoming flow, else
/// the first task, else the first flow node of any kind.
fn plan_start_injection(scope: Node, children: &[Node], flows: &[Node], plan: &mut Plan) {
    let has_start = children.iter().any(|n| n.tag_name().name() == "startEvent");
    if has_start {
        return;
    }
    let Some(scope_id) = scope.attribute("id") else {
        return;
    };

    let has_incoming = |id: &str| {
        flows
            .iter()
            .any(|f| f.attribute("targetRef") == Some(id))
    };

    let tasks: Vec<&Node> = children
        .iter()
        .filter(|n| is_task_tag(n.tag_name().name()))
        .collect();
    let entry = tasks
        .iter()
        .find(|t| t.attribute("id").is_some_and(|id| !has_incoming(id)))
        .or_else(|| tasks.first())
        .copied()
        .or_else(|| {
            children
                .iter()
                .find(|n| is_flow_node_tag(n.tag_name().name()))
        });
    let Some(entry_id) = entry.and_then(|n| n.attribute("id")) else {
        // Nothing to connect to; leave the sub-process untouched.
        return;
    };

    let start_id = format!("StartEvent_{scope_id}");
    let flow_id = format!("Flow_{start_id}_to_{entry_id}");
    debug!(sub_process = scope_id, entry = entry_id, "synthesizing start event");
    plan.start_injections.insert(
        scope_id.to_string(),
        StartInjection {
            start_id,
            flow_id,
            entry_id: entry_id.to_string(),
        },
    );
}

/// An exclusive gateway with several outgoing flows may leave at most one of
/// them unconditioned: the first unconditioned non-default flow becomes the
/// declared default, later ones get an always-true condition.
fn plan_gateway_repair(gateway: &Node, flows: &[Node], plan: &mut Plan) {
    let Some(gateway_id) = gateway.attribute("id") else {
        return;
    };
    let outgoing: Vec<&Node> = flows
        .iter()
        .filter(|f| f.attribute("sourceRef") == Some(gateway_id))
        .collect();
    if outgoing.len() <= 1 {
        return;
    }

    let mut default_flow = gateway.attribute("default").map(str::to_string);
    for flow in outgoing {
        let Some(flow_id) = flow.attribute("id") else {
            continue;
        };
        let has_condition = flow
            .children()
            .filter(Node::is_element)
            .any(|n| n.tag_name().name() == "conditionExpression");
        if has_condition || default_flow.as_deref() == Some(flow_id) {
            continue;
        }
        match default_flow {
            None => {
                plan.gateway_defaults
                    .insert(gateway_id.to_string(), flow_id.to_string());
                default_flow = Some(flow_id.to_string());
            }
            Some(_) => {
                plan.true_conditions.insert(flow_id.to_string());
            }
        }
    }
}

fn is_task_tag(tag: &str) -> bool {
    matches!(
        tag,
        "task"
            | "userTask"
            | "serviceTask"
            | "scriptTask"
            | "businessRuleTask"
            | "sendTask"
            | "receiveTask"
            | "manualTask"
    )
}

fn is_flow_node_tag(tag: &str) -> bool {
    is_task_tag(tag)
        || tag.ends_with("Event")
        || tag.ends_with("Gateway")
        || tag == "subProcess"
        || tag == "callActivity"
}

fn declared_prefix(root: Node, uri: &str) -> Option<String> {
    root.namespaces()
        .find(|ns| ns.uri() == uri)
        .and_then(|ns| ns.name().map(str::to_string))
}

// ============================================================================
// Application
// ============================================================================

/// Stream the original document through an event rewriter, applying the plan
/// and copying everything else through verbatim.
fn apply(xml: &str, plan: &Plan, history_ttl_days: u32) -> Result<String, TransformError> {
    let camunda = plan.camunda_prefix.as_deref().unwrap_or("camunda");
    let xsi = plan.xsi_prefix.as_deref().unwrap_or("xsi");

    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    // For each open element, the renamed end tag to emit (if any).
    let mut end_renames: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) => {
                let (prefix, local) = split_qname(e.name().as_ref());
                let rewritten = rewrite_start(&e, prefix.as_deref(), &local, plan, history_ttl_days, camunda);
                match rewritten {
                    Rewritten::Renamed(elem, end_name) => {
                        writer.write_event(Event::Start(elem))?;
                        end_renames.push(Some(end_name));
                    }
                    Rewritten::Replaced(elem) => {
                        writer.write_event(Event::Start(elem))?;
                        end_renames.push(None);
                    }
                    Rewritten::Verbatim => {
                        writer.write_event(Event::Start(e.borrow()))?;
                        end_renames.push(None);
                    }
                }
                // Injected children go right after the start tag.
                if local == "subProcess"
                    && let Some(id) = raw_attr(&e, "id")
                    && let Some(inj) = plan.start_injections.get(&id)
                {
                    write_start_injection(&mut writer, prefix.as_deref(), inj)?;
                }
                if local == "sequenceFlow"
                    && let Some(id) = raw_attr(&e, "id")
                    && plan.true_conditions.contains(&id)
                {
                    write_true_condition(&mut writer, prefix.as_deref(), xsi)?;
                }
            }
            Event::Empty(e) => {
                let (prefix, local) = split_qname(e.name().as_ref());
                // An empty flow needing a condition child must become a
                // start/end pair.
                if local == "sequenceFlow"
                    && let Some(id) = raw_attr(&e, "id")
                    && plan.true_conditions.contains(&id)
                {
                    let name = qname_string(prefix.as_deref(), &local);
                    let mut elem = BytesStart::new(name.clone());
                    for attr in e.attributes().flatten() {
                        elem.push_attribute(attr);
                    }
                    writer.write_event(Event::Start(elem))?;
                    write_true_condition(&mut writer, prefix.as_deref(), xsi)?;
                    writer.write_event(Event::End(BytesEnd::new(name)))?;
                    continue;
                }
                let rewritten = rewrite_start(&e, prefix.as_deref(), &local, plan, history_ttl_days, camunda);
                match rewritten {
                    Rewritten::Renamed(elem, _) | Rewritten::Replaced(elem) => {
                        writer.write_event(Event::Empty(elem))?;
                    }
                    Rewritten::Verbatim => writer.write_event(Event::Empty(e.borrow()))?,
                }
            }
            Event::End(e) => match end_renames.pop().flatten() {
                Some(name) => writer.write_event(Event::End(BytesEnd::new(name)))?,
                None => writer.write_event(Event::End(e.borrow()))?,
            },
            ev => writer.write_event(ev)?,
        }
    }

    Ok(String::from_utf8(writer.into_inner())?)
}

enum Rewritten {
    /// Element renamed; the end tag must be renamed to the carried name.
    Renamed(BytesStart<'static>, String),
    /// Same name, rebuilt attributes.
    Replaced(BytesStart<'static>),
    /// Pass the original event through.
    Verbatim,
}

fn rewrite_start(
    e: &BytesStart,
    prefix: Option<&str>,
    local: &str,
    plan: &Plan,
    history_ttl_days: u32,
    camunda: &str,
) -> Rewritten {
    match local {
        "definitions" => {
            let mut elem = rebuild(e, prefix, local, &[]);
            if plan.camunda_prefix.is_none() {
                elem.push_attribute(("xmlns:camunda", CAMUNDA_NS));
            }
            if plan.xsi_prefix.is_none() && !plan.true_conditions.is_empty() {
                elem.push_attribute(("xmlns:xsi", XSI_NS));
            }
            Rewritten::Replaced(elem)
        }
        "process" => {
            let mut elem = rebuild(e, prefix, local, &["isExecutable", "historyTimeToLive"]);
            elem.push_attribute(("isExecutable", "true"));
            elem.push_attribute((
                format!("{camunda}:historyTimeToLive").as_str(),
                history_ttl_days.to_string().as_str(),
            ));
            Rewritten::Replaced(elem)
        }
        // A configured plain task is promoted to a user task; a configured
        // user task keeps its tag and gets the same attribute patch.
        "task" | "userTask" => {
            let Some(id) = raw_attr(e, "id") else {
                return Rewritten::Verbatim;
            };
            let Some(patch) = plan.task_patches.get(&id) else {
                return Rewritten::Verbatim;
            };
            let mut skip: Vec<&str> = vec![
                "assignee",
                "candidateGroups",
                "priority",
                "dueDate",
                "formKey",
            ];
            if patch.name.is_some() {
                skip.push("name");
            }
            let name = qname_string(prefix, "userTask");
            let mut elem = rebuild_named(e, &name, &skip);
            push_patch_attrs(&mut elem, patch, camunda);
            if local == "task" {
                Rewritten::Renamed(elem, name)
            } else {
                Rewritten::Replaced(elem)
            }
        }
        "exclusiveGateway" => {
            let Some(id) = raw_attr(e, "id") else {
                return Rewritten::Verbatim;
            };
            let Some(default_flow) = plan.gateway_defaults.get(&id) else {
                return Rewritten::Verbatim;
            };
            let mut elem = rebuild(e, prefix, local, &["default"]);
            elem.push_attribute(("default", default_flow.as_str()));
            Rewritten::Replaced(elem)
        }
        _ => Rewritten::Verbatim,
    }
}

fn push_patch_attrs(elem: &mut BytesStart, patch: &TaskPatch, camunda: &str) {
    if let Some(display_name) = &patch.name {
        elem.push_attribute(("name", display_name.as_str()));
    }
    if let Some(assignee) = &patch.assignee {
        elem.push_attribute((format!("{camunda}:assignee").as_str(), assignee.as_str()));
    }
    if let Some(groups) = &patch.candidate_groups {
        elem.push_attribute((
            format!("{camunda}:candidateGroups").as_str(),
            groups.as_str(),
        ));
    }
    if let Some(priority) = &patch.priority {
        elem.push_attribute((format!("{camunda}:priority").as_str(), priority.as_str()));
    }
    if let Some(due) = &patch.due_date {
        elem.push_attribute((format!("{camunda}:dueDate").as_str(), due.as_str()));
    }
    if let Some(form_key) = &patch.form_key {
        elem.push_attribute((format!("{camunda}:formKey").as_str(), form_key.as_str()));
    }
}

/// Rebuild an element under the same name, dropping attributes whose local
/// name is listed in `skip`.
fn rebuild(
    e: &BytesStart,
    prefix: Option<&str>,
    local: &str,
    skip: &[&str],
) -> BytesStart<'static> {
    rebuild_named(e, &qname_string(prefix, local), skip)
}

fn rebuild_named(e: &BytesStart, name: &str, skip: &[&str]) -> BytesStart<'static> {
    let mut elem = BytesStart::new(name.to_string());
    for attr in e.attributes().flatten() {
        let attr_local = attr.key.local_name();
        let keep = !skip
            .iter()
            .any(|s| s.as_bytes() == attr_local.as_ref());
        if keep {
            elem.push_attribute(attr);
        }
    }
    elem
}

fn write_start_injection(
    writer: &mut Writer<Vec<u8>>,
    prefix: Option<&str>,
    inj: &StartInjection,
) -> Result<(), quick_xml::Error> {
    let mut start = BytesStart::new(qname_string(prefix, "startEvent"));
    start.push_attribute(("id", inj.start_id.as_str()));
    writer.write_event(Event::Empty(start))?;

    let mut flow = BytesStart::new(qname_string(prefix, "sequenceFlow"));
    flow.push_attribute(("id", inj.flow_id.as_str()));
    flow.push_attribute(("sourceRef", inj.start_id.as_str()));
    flow.push_attribute(("targetRef", inj.entry_id.as_str()));
    writer.write_event(Event::Empty(flow))
}

fn write_true_condition(
    writer: &mut Writer<Vec<u8>>,
    prefix: Option<&str>,
    xsi: &str,
) -> Result<(), quick_xml::Error> {
    let name = qname_string(prefix, "conditionExpression");
    let type_value = qname_string(prefix, "tFormalExpression");
    let mut elem = BytesStart::new(name.clone());
    elem.push_attribute((format!("{xsi}:type").as_str(), type_value.as_str()));
    writer.write_event(Event::Start(elem))?;
    writer.write_event(Event::Text(BytesText::new("${true}")))?;
    writer.write_event(Event::End(BytesEnd::new(name)))
}

fn split_qname(qname: &[u8]) -> (Option<String>, String) {
    match qname.iter().position(|&b| b == b':') {
        Some(pos) => (
            Some(String::from_utf8_lossy(&qname[..pos]).into_owned()),
            String::from_utf8_lossy(&qname[pos + 1..]).into_owned(),
        ),
        None => (None, String::from_utf8_lossy(qname).into_owned()),
    }
}

fn qname_string(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(p) => format!("{p}:{local}"),
        None => local.to_string(),
    }
}

/// Attribute value from a raw event, matched by local name.
fn raw_attr(e: &BytesStart, local: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
