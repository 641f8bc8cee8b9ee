use super::context::{ControlPlane, Outcome};
use crate::api::{
    ApplicationInput, ApplicationRecord, ContainerRecord, ListResponse, application_uri,
    parse_application_ref,
};
use crate::domain::Protocol;
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Args, Debug)]
pub struct AppCommand {
    #[command(subcommand)]
    pub action: AppAction,
}

#[derive(Subcommand, Debug)]
pub enum AppAction {
    /// List applications in id order
    List,
    /// Show one application
    Show { app: String },
    /// List an application's containers in attachment order
    Containers { app: String },
    /// Create an application
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        domain: String,
        /// Port the backends listen on
        #[arg(long)]
        port: u32,
        #[arg(long, default_value_t = Protocol::Http)]
        protocol: Protocol,
        #[arg(long, default_value = "")]
        description: String,
        /// Container to attach, repeatable
        #[arg(long = "container")]
        containers: Vec<String>,
    },
    /// Replace an application's fields; omitted flags keep their value
    Update {
        app: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        port: Option<u32>,
        #[arg(long)]
        protocol: Option<Protocol>,
        #[arg(long)]
        description: Option<String>,
        /// Desired attachments in order, repeatable; replaces the current list
        #[arg(long = "container", conflicts_with = "clear_containers")]
        containers: Vec<String>,
        /// Detach every container
        #[arg(long)]
        clear_containers: bool,
    },
    /// Delete an application, leaving its containers running
    Delete { app: String },
}

pub fn run(cmd: AppCommand, plane: &ControlPlane) -> Result<()> {
    plane.conclude(execute(cmd.action, plane))
}

pub fn execute(action: AppAction, plane: &ControlPlane) -> Result<Outcome> {
    let orchestrator = plane.orchestrator();

    match action {
        AppAction::List => {
            let records: Vec<ApplicationRecord> = orchestrator
                .list_applications()
                .iter()
                .map(ApplicationRecord::from)
                .collect();
            Outcome::read(ListResponse::new(records))
        }
        AppAction::Show { app } => {
            let id = parse_application_ref(&app)?;
            Outcome::read(ApplicationRecord::from(&orchestrator.get_application(id)?))
        }
        AppAction::Containers { app } => {
            let id = parse_application_ref(&app)?;
            let records: Vec<ContainerRecord> = orchestrator
                .application_containers(id)?
                .iter()
                .map(ContainerRecord::from)
                .collect();
            Outcome::read(ListResponse::new(records))
        }
        AppAction::Create {
            name,
            domain,
            port,
            protocol,
            description,
            containers,
        } => {
            let input = ApplicationInput {
                name,
                description,
                domain_name: domain,
                backend_port: port,
                protocol,
                containers: (!containers.is_empty()).then_some(containers),
            };
            let created = orchestrator.create_application(&input.to_draft()?)?;
            Outcome::changed(ApplicationRecord::from(&created))
        }
        AppAction::Update {
            app,
            name,
            domain,
            port,
            protocol,
            description,
            containers,
            clear_containers,
        } => {
            let id = parse_application_ref(&app)?;
            let current = orchestrator.get_application(id)?;

            let containers = if clear_containers {
                Some(Vec::new())
            } else {
                (!containers.is_empty()).then_some(containers)
            };

            let input = ApplicationInput {
                name: name.unwrap_or(current.name),
                description: description.unwrap_or(current.description),
                domain_name: domain.unwrap_or(current.domain_name),
                backend_port: port.unwrap_or(current.backend_port),
                protocol: protocol.unwrap_or(current.protocol),
                containers,
            };
            let updated = orchestrator.update_application(id, &input.to_draft()?)?;
            Outcome::changed(ApplicationRecord::from(&updated))
        }
        AppAction::Delete { app } => {
            let id = parse_application_ref(&app)?;
            let deleted = orchestrator.delete_application(id)?;
            Outcome::changed(serde_json::json!({ "deleted": application_uri(deleted.id) }))
        }
    }
}
