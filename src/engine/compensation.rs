//! Compensation
//!
//! Undoes completed ports in reverse port-flow order. Ports with a
//! compensator run it; ports without one are unwound from the flow only.
//! While compensating, completed ports do not publish their produced events.

use crate::bus::Signal;
use crate::domain::model::{Model, WorkflowState};
use crate::domain::ports::PortRequest;
use crate::error::{Error, Result};
use tracing::{debug, error, info};

/// Compensator failure that stopped a compensation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationFailure {
    pub port_name: String,
    pub error: String,
}

/// Outcome of a compensation run
#[derive(Debug, Clone)]
pub struct CompensationReport {
    /// Model after compensation; still compensating when a step failed
    pub model: Model,
    /// Ports undone by their compensator, most recent first
    pub compensated: Vec<String>,
    /// Ports removed from the flow without a compensator
    pub unwound: Vec<String>,
    pub failed: Option<CompensationFailure>,
}

impl CompensationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }
}

pub async fn compensate(model: &Model) -> Result<CompensationReport> {
    let spec = model.spec().cloned().ok_or_else(|| Error::UnboundModel {
        id: model.id().to_string(),
    })?;

    info!(model = %model.name(), id = %model.id(), steps = model.port_flow().len(), "starting compensation");
    let mut current = model.with_state(WorkflowState::Compensating);
    let mut compensated = Vec::new();
    let mut unwound = Vec::new();

    while let Some(port_name) = current.port_flow().last().cloned() {
        let mut remaining = current.port_flow().to_vec();
        remaining.pop();

        let compensator = spec.port(&port_name).and_then(|c| c.compensator.clone());
        let Some(compensator) = compensator else {
            debug!(port = %port_name, "no compensator, unwinding");
            current = current.with_flow(remaining);
            unwound.push(port_name);
            continue;
        };

        match compensator.invoke(PortRequest::new(current.clone())).await {
            Ok(undone) => {
                debug!(port = %port_name, "port compensated");
                current = undone
                    .rebind_from(&current)
                    .with_state(WorkflowState::Compensating)
                    .with_flow(remaining);
                compensated.push(port_name);
            }
            Err(e) => {
                error!(model = %current.name(), id = %current.id(), port = %port_name, error = %e, "compensation failed");
                current.emit(Signal::CompensationFailed {
                    model_name: current.name().to_string(),
                    model_id: current.id().to_string(),
                    port_name: port_name.clone(),
                    error: e.to_string(),
                });
                return Ok(CompensationReport {
                    model: current,
                    compensated,
                    unwound,
                    failed: Some(CompensationFailure {
                        port_name,
                        error: e.to_string(),
                    }),
                });
            }
        }
    }

    let current = current.with_state(WorkflowState::Normal);
    let mut undone = compensated.clone();
    undone.extend(unwound.iter().cloned());
    current.emit(Signal::CompensationCompleted {
        model_name: current.name().to_string(),
        model_id: current.id().to_string(),
        ports: undone,
    });
    info!(model = %current.name(), id = %current.id(), compensated = compensated.len(), unwound = unwound.len(), "compensation completed");

    Ok(CompensationReport {
        model: current,
        compensated,
        unwound,
        failed: None,
    })
}
