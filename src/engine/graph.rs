//! Workflow graph
//!
//! Recordable ports form a directed graph: an edge `a -> b` exists when `a`
//! produces the event `b` consumes. The graph answers where a workflow
//! starts, what runs next and whether a port flow is complete.

use crate::domain::spec::PortConfig;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;

/// One recordable port in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNode {
    pub port: String,
    pub consumes: String,
    pub produces: Option<String>,
    pub successors: Vec<String>,
}

/// Produces/consumes wiring of a model's ports
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    steps: IndexMap<String, StepNode>,
}

impl WorkflowGraph {
    /// Build the graph from port declarations; `enabled` decides which
    /// ports are bound
    pub fn from_ports<'a, I, F>(ports: I, enabled: F) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a PortConfig)>,
        F: Fn(&str, &PortConfig) -> bool,
    {
        let mut steps: IndexMap<String, StepNode> = IndexMap::new();
        for (name, config) in ports {
            if !enabled(name.as_str(), config) {
                continue;
            }
            if let Some(consumes) = &config.consumes_event {
                steps.insert(
                    name.clone(),
                    StepNode {
                        port: name.clone(),
                        consumes: consumes.clone(),
                        produces: config.produces_event.clone(),
                        successors: Vec::new(),
                    },
                );
            }
        }

        let wiring: Vec<(String, Vec<String>)> = steps
            .values()
            .map(|step| {
                let successors = match &step.produces {
                    Some(event) => steps
                        .values()
                        .filter(|next| &next.consumes == event)
                        .map(|next| next.port.clone())
                        .collect(),
                    None => Vec::new(),
                };
                (step.port.clone(), successors)
            })
            .collect();
        for (port, successors) in wiring {
            if let Some(step) = steps.get_mut(&port) {
                step.successors = successors;
            }
        }

        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, port: &str) -> Option<&StepNode> {
        self.steps.get(port)
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepNode> {
        self.steps.values()
    }

    pub fn successors(&self, port: &str) -> &[String] {
        self.steps
            .get(port)
            .map(|step| step.successors.as_slice())
            .unwrap_or(&[])
    }

    /// Ports whose trigger is not produced inside the graph
    pub fn entry_ports(&self) -> Vec<&str> {
        let produced: HashSet<&str> = self
            .steps
            .values()
            .filter_map(|step| step.produces.as_deref())
            .collect();
        self.steps
            .values()
            .filter(|step| !produced.contains(step.consumes.as_str()))
            .map(|step| step.port.as_str())
            .collect()
    }

    /// Ports with no successor
    pub fn terminal_ports(&self) -> Vec<&str> {
        self.steps
            .values()
            .filter(|step| step.successors.is_empty())
            .map(|step| step.port.as_str())
            .collect()
    }

    /// Ports due to run after the last completed port of `port_flow`
    pub fn pending_after(&self, port_flow: &[String]) -> &[String] {
        match port_flow.last() {
            Some(last) => self.successors(last),
            None => &[],
        }
    }

    /// A flow is complete once its last port has no successor
    pub fn is_complete(&self, port_flow: &[String]) -> bool {
        !port_flow.is_empty() && self.pending_after(port_flow).is_empty()
    }

    pub fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }

        fn visit(graph: &WorkflowGraph, port: &str, marks: &mut IndexMap<String, Mark>) -> bool {
            match marks.get(port).copied().unwrap_or(Mark::Unvisited) {
                Mark::Visiting => return true,
                Mark::Done => return false,
                Mark::Unvisited => {}
            }
            marks.insert(port.to_string(), Mark::Visiting);
            for next in graph.successors(port) {
                if visit(graph, next, marks) {
                    return true;
                }
            }
            marks.insert(port.to_string(), Mark::Done);
            false
        }

        let mut marks = IndexMap::new();
        self.steps
            .keys()
            .any(|port| visit(self, port, &mut marks))
    }
}

impl fmt::Display for WorkflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in self.steps.values() {
            write!(f, "[{}] {}", step.consumes, step.port)?;
            match &step.produces {
                Some(event) if step.successors.is_empty() => write!(f, " --({})--> end", event)?,
                Some(event) => write!(f, " --({})--> {}", event, step.successors.join(", "))?,
                None => write!(f, " --> end")?,
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(ports: &[(&str, PortConfig)]) -> WorkflowGraph {
        let ports: IndexMap<String, PortConfig> = ports
            .iter()
            .map(|(name, config)| (name.to_string(), config.clone()))
            .collect();
        WorkflowGraph::from_ports(ports.iter(), |_, config| !config.disabled)
    }

    fn flow(ports: &[&str]) -> Vec<String> {
        ports.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_chain() {
        let g = graph(&[
            ("reserve", PortConfig::new().consumes("CREATEORDER").produces("reserved")),
            ("charge", PortConfig::new().consumes("reserved").produces("charged")),
            ("ship", PortConfig::new().consumes("charged")),
            ("audit", PortConfig::new()),
        ]);

        assert_eq!(g.len(), 3);
        assert_eq!(g.entry_ports(), vec!["reserve"]);
        assert_eq!(g.terminal_ports(), vec!["ship"]);
        assert_eq!(g.successors("reserve"), ["charge".to_string()]);
        assert!(!g.is_complete(&flow(&[])));
        assert!(!g.is_complete(&flow(&["reserve"])));
        assert!(g.is_complete(&flow(&["reserve", "charge", "ship"])));
        assert!(!g.has_cycle());
        assert!(g.to_string().contains("[reserved] charge --(charged)--> ship"));
    }

    #[test]
    fn test_disabled_port_breaks_chain() {
        let g = graph(&[
            ("reserve", PortConfig::new().consumes("start").produces("reserved")),
            ("charge", PortConfig::new().consumes("reserved").disable()),
        ]);
        assert!(g.step("charge").is_none());
        assert!(g.is_complete(&flow(&["reserve"])));
    }

    #[test]
    fn test_cycle_detected() {
        let g = graph(&[
            ("a", PortConfig::new().consumes("x").produces("y")),
            ("b", PortConfig::new().consumes("y").produces("x")),
        ]);
        assert!(g.has_cycle());
        assert!(g.entry_ports().is_empty());
    }
}
