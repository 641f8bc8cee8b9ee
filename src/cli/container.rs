use super::context::{ControlPlane, Outcome};
use crate::api::{
    ContainerInput, ContainerRecord, ListResponse, container_uri, parse_application_ref,
    parse_container_ref,
};
use crate::domain::PortMapping;
use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::warn;

#[derive(Args, Debug)]
pub struct ContainerCommand {
    #[command(subcommand)]
    pub action: ContainerAction,
}

#[derive(Subcommand, Debug)]
pub enum ContainerAction {
    /// List every tracked container
    List,
    /// Show one container
    Show { container: String },
    /// Create one container on each given host
    Create {
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "")]
        command: String,
        #[arg(long, default_value = "")]
        description: String,
        /// HOST:CONTAINER port mapping, repeatable
        #[arg(long = "port")]
        ports: Vec<PortMapping>,
        /// Host id or reference, repeatable
        #[arg(long = "host", required = true)]
        hosts: Vec<String>,
        /// Attach the new containers to this application
        #[arg(long)]
        app: Option<String>,
    },
    /// Destroy a container on its host
    Destroy { container: String },
}

#[derive(Serialize)]
struct CreateOutput {
    objects: Vec<ContainerRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attach_errors: Vec<String>,
}

pub fn run(cmd: ContainerCommand, plane: &ControlPlane) -> Result<()> {
    plane.conclude(execute(cmd.action, plane))
}

pub fn execute(action: ContainerAction, plane: &ControlPlane) -> Result<Outcome> {
    let orchestrator = plane.orchestrator();

    match action {
        ContainerAction::List => {
            let records: Vec<ContainerRecord> = orchestrator
                .list_containers()
                .iter()
                .map(ContainerRecord::from)
                .collect();
            Outcome::read(ListResponse::new(records))
        }
        ContainerAction::Show { container } => {
            let id = parse_container_ref(&container)?;
            Outcome::read(ContainerRecord::from(&orchestrator.get_container(id)?))
        }
        ContainerAction::Create {
            image,
            command,
            description,
            ports,
            hosts,
            app,
        } => {
            let input = ContainerInput {
                image,
                command,
                description,
                ports,
                hosts,
            };
            let spec = input.to_spec();
            let host_ids = input.host_ids()?;

            let Some(app) = app else {
                let created = orchestrator.create_containers(&spec, &host_ids)?;
                return Outcome::changed(CreateOutput {
                    objects: created.iter().map(ContainerRecord::from).collect(),
                    attach_errors: Vec::new(),
                });
            };

            let app = parse_application_ref(&app)?;
            let mut output = CreateOutput {
                objects: Vec::with_capacity(host_ids.len()),
                attach_errors: Vec::new(),
            };

            for host in &host_ids {
                let placement = orchestrator.create_and_attach(host, &spec, app)?;
                if let Some(e) = placement.attach_error {
                    warn!("Container {} left unattached: {}", placement.container.id, e);
                    output.attach_errors.push(e.to_string());
                }
                output.objects.push(ContainerRecord::from(&placement.container));
            }

            Outcome::changed(output)
        }
        ContainerAction::Destroy { container } => {
            let id = parse_container_ref(&container)?;
            orchestrator.destroy_container(id)?;
            Outcome::changed(serde_json::json!({ "destroyed": container_uri(id) }))
        }
    }
}
