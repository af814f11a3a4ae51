//! Execute-Command use-case
//!
//! Runs an ACL-checked command of the model's specification. Missing or
//! unauthorized commands are signalled and leave the model unchanged;
//! failures of an authorized command propagate.

use crate::access::check_acl;
use crate::bus::Signal;
use crate::domain::model::Model;
use crate::domain::spec::Command;
use crate::engine::PortOutcome;
use crate::error::{Error, Result};
use tracing::{info, warn};

pub async fn execute_command(model: &Model, command: &str, permission: &str) -> Result<Model> {
    let spec = model.binding()?.spec.clone();

    let Some(command_spec) = spec
        .command(command)
        .filter(|c| check_acl(&c.acl, permission))
    else {
        warn!(model = %model.name(), id = %model.id(), command, permission, "command not authorized");
        model.emit(Signal::unauthorized_command(model, command));
        return Ok(model.clone());
    };

    info!(model = %model.name(), id = %model.id(), command, "executing command");
    match &command_spec.command {
        Command::Handler(handler) => {
            let changes = handler
                .execute(model)
                .await
                .map_err(|e| Error::CommandFailed {
                    command: command.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(match changes {
                Some(changes) => model.update(changes),
                None => model.clone(),
            })
        }
        Command::Port(port_name) => {
            let args = spec
                .port(port_name)
                .and_then(|p| p.callback.clone())
                .into_iter()
                .collect();
            match model.invoke(port_name, args).await? {
                PortOutcome::Completed(updated) => Ok(updated),
                PortOutcome::Exhausted { error } => Err(Error::CommandFailed {
                    command: command.to_string(),
                    reason: error,
                }),
                PortOutcome::Skipped | PortOutcome::Retrying { .. } => Ok(model.clone()),
            }
        }
    }
}
