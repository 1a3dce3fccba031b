//! Admin commands for managing monitored and notification groups.
//!
//! Commands arrive as chat messages starting with the configured prefix. Every
//! command except `help` is gated by an [`AdminCheck`].

use crate::core::{id_from_value, AdminCheck, InboundEvent, MetadataProvider};
use crate::formatting::group_label;
use crate::registry::{
    AddDestinationOutcome, DestinationListing, MonitorListing, Registry, RegistryError,
    RemoveDestinationOutcome, RemoveMonitorOutcome,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub const MENU: &str = "[Group Departure Monitor]\n\
1. list-destinations\n\
2. add-destination <group id>\n\
3. remove-destination <group id>\n\
4. list-monitors\n\
5. add-monitor <monitored group id> <notification group id>\n\
6. remove-monitor <monitored group id>\n\
------------------\n\
When someone leaves a monitored group, the mapped notification group is told.";

const PERMISSION_DENIED: &str = "Permission denied. Ask an administrator to add your user id to the admin list.";
const SAVE_FAILED: &str = "Failed to save the configuration; nothing was changed.";

/// A parsed admin command. Arguments are `None` when they were not given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Help,
    ListDestinations,
    AddDestination(Option<String>),
    RemoveDestination(Option<String>),
    ListMonitors,
    AddMonitor {
        source: Option<String>,
        destination: Option<String>,
    },
    RemoveMonitor(Option<String>),
}

impl AdminCommand {
    /// Parses `text` as a command. Returns `None` for anything that is not one
    /// of ours.
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix(prefix)?;
        let mut words = rest.split_whitespace();
        let name = words.next()?.to_ascii_lowercase();
        let mut arg = || words.next().map(str::to_string);

        let command = match name.as_str() {
            "help" | "menu" => Self::Help,
            "list-destinations" => Self::ListDestinations,
            "add-destination" => Self::AddDestination(arg()),
            "remove-destination" => Self::RemoveDestination(arg()),
            "list-monitors" => Self::ListMonitors,
            "add-monitor" => {
                let source = arg();
                let destination = arg();
                Self::AddMonitor {
                    source,
                    destination,
                }
            }
            "remove-monitor" => Self::RemoveMonitor(arg()),
            _ => return None,
        };
        Some(command)
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, Self::Help)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::ListDestinations => "list-destinations",
            Self::AddDestination(_) => "add-destination",
            Self::RemoveDestination(_) => "remove-destination",
            Self::ListMonitors => "list-monitors",
            Self::AddMonitor { .. } => "add-monitor",
            Self::RemoveMonitor(_) => "remove-monitor",
        }
    }
}

/// Where a command reply goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    Group(String),
    Private(String),
}

/// A command extracted from an inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub caller_id: String,
    pub reply_to: ReplyTarget,
    pub command: AdminCommand,
}

impl CommandRequest {
    /// Extracts a command from a OneBot `message` event, if it carries one.
    pub fn from_event(event: &InboundEvent, platform: &str, prefix: &str) -> Option<Self> {
        if event.platform != platform {
            return None;
        }
        let record = event.payload.as_object()?;
        if record.get("post_type").and_then(Value::as_str) != Some("message") {
            return None;
        }

        let text = record
            .get("raw_message")
            .and_then(Value::as_str)
            .or_else(|| record.get("message").and_then(Value::as_str))?;
        let command = AdminCommand::parse(text, prefix)?;
        let caller_id = id_from_value(record.get("user_id"))?;

        let reply_to = match record.get("message_type").and_then(Value::as_str) {
            Some("group") => ReplyTarget::Group(id_from_value(record.get("group_id"))?),
            _ => ReplyTarget::Private(caller_id.clone()),
        };

        Some(Self {
            caller_id,
            reply_to,
            command,
        })
    }
}

/// Executes admin commands against the registry and renders the replies.
#[derive(Clone)]
pub struct CommandHandler {
    registry: Arc<Registry>,
    auth: Arc<dyn AdminCheck>,
    metadata: Arc<dyn MetadataProvider>,
}

impl CommandHandler {
    pub fn new(
        registry: Arc<Registry>,
        auth: Arc<dyn AdminCheck>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Self {
        Self {
            registry,
            auth,
            metadata,
        }
    }

    /// Runs `command` on behalf of `caller_id` and returns the reply text.
    #[instrument(skip(self, command), fields(command = command.name()))]
    pub async fn handle(&self, caller_id: &str, command: AdminCommand) -> String {
        metrics::counter!("admin_commands_total").increment(1);
        if command.requires_auth() && !self.auth.is_authorized(caller_id) {
            metrics::counter!("admin_commands_denied_total").increment(1);
            warn!(caller_id, "Rejected admin command from unauthorized caller");
            return PERMISSION_DENIED.to_string();
        }

        let reply = match command {
            AdminCommand::Help => Ok(MENU.to_string()),
            AdminCommand::ListDestinations => Ok(self.list_destinations().await),
            AdminCommand::AddDestination(id) => self.add_destination(id).await,
            AdminCommand::RemoveDestination(id) => self.remove_destination(id).await,
            AdminCommand::ListMonitors => Ok(self.list_monitors().await),
            AdminCommand::AddMonitor {
                source,
                destination,
            } => self.add_monitor(source, destination).await,
            AdminCommand::RemoveMonitor(id) => self.remove_monitor(id).await,
        };

        reply.unwrap_or_else(|e| match e {
            RegistryError::Persist(_) => {
                error!(error = %e, "Admin command could not be persisted");
                SAVE_FAILED.to_string()
            }
            RegistryError::MissingSource => {
                "Please specify the group to monitor.".to_string()
            }
            RegistryError::MissingDestination => {
                "Please provide a group id, e.g. /add-destination 123456789".to_string()
            }
            RegistryError::InvalidId(id) => {
                format!("Invalid group id {}: ids must not contain ':'.", id)
            }
        })
    }

    async fn label(&self, group_id: &str) -> String {
        group_label(self.metadata.as_ref(), group_id).await
    }

    async fn list_destinations(&self) -> String {
        let DestinationListing::Destinations(ids) = self.registry.list_destinations() else {
            return "No notification groups are configured.".to_string();
        };

        let mut lines = vec!["[Notification Groups]".to_string()];
        for id in ids {
            lines.push(format!("- {}", self.label(&id).await));
        }
        lines.join("\n")
    }

    async fn add_destination(&self, id: Option<String>) -> Result<String, RegistryError> {
        let id = id.unwrap_or_default();
        match self.registry.add_destination(&id).await? {
            AddDestinationOutcome::AlreadyPresent => {
                Ok(format!("Group {} is already a notification group.", id.trim()))
            }
            AddDestinationOutcome::Added => Ok(format!(
                "Added group {} to the notification groups.",
                self.label(id.trim()).await
            )),
        }
    }

    async fn remove_destination(&self, id: Option<String>) -> Result<String, RegistryError> {
        let id = id.unwrap_or_default();
        let id = id.trim();
        if id.is_empty() {
            return Ok("Please provide a group id, e.g. /remove-destination 123456789".to_string());
        }
        let reply = match self.registry.remove_destination(id).await? {
            RemoveDestinationOutcome::NotPresent => {
                format!("Group {} is not a notification group.", id)
            }
            RemoveDestinationOutcome::Removed {
                still_referenced_by,
            } if still_referenced_by.is_empty() => {
                format!("Removed group {} from the notification groups.", id)
            }
            RemoveDestinationOutcome::Removed {
                still_referenced_by,
            } => format!(
                "Removed group {} from the notification groups.\n\
                 (Still the notification group for: {})",
                id,
                still_referenced_by.join(", ")
            ),
        };
        Ok(reply)
    }

    async fn list_monitors(&self) -> String {
        let MonitorListing::Monitors { groups, sources } = self.registry.list_monitors() else {
            return "No monitored groups are configured.".to_string();
        };

        let mut lines = vec!["[Monitored Groups]".to_string()];
        for (destination, monitored) in groups {
            lines.push(format!("\nNotification group: {}", self.label(&destination).await));
            for source in monitored {
                lines.push(format!("  └─ Monitoring: {}", self.label(&source).await));
            }
        }
        lines.push("\n[Summary]".to_string());
        lines.push(format!("All monitored groups: {}", sources.join(", ")));
        lines.join("\n")
    }

    async fn add_monitor(
        &self,
        source: Option<String>,
        destination: Option<String>,
    ) -> Result<String, RegistryError> {
        let source = source.unwrap_or_default();
        let Some(destination) = destination.filter(|d| !d.trim().is_empty()) else {
            if source.trim().is_empty() {
                return Err(RegistryError::MissingSource);
            }
            return Ok("No notification group given. Usage: /add-monitor <monitored group id> <notification group id>".to_string());
        };

        let outcome = self.registry.add_monitor(&source, &destination).await?;
        let (source, destination) = (source.trim(), destination.trim());
        info!(source, destination, "Monitor added via admin command");

        let mut reply = format!(
            "Now monitoring group {}; notifications go to {}.",
            self.label(source).await,
            self.label(destination).await
        );
        if let Some(previous) = outcome.previous_destination.filter(|p| p != destination) {
            reply.push_str(&format!("\n(Previously notified {}.)", previous));
        }
        if outcome.destination_auto_registered {
            reply.push_str("\n(The notification group was not in the list and has been added automatically.)");
        }
        Ok(reply)
    }

    async fn remove_monitor(&self, source: Option<String>) -> Result<String, RegistryError> {
        let source = source.unwrap_or_default();
        let source = source.trim();
        if source.is_empty() {
            return Ok("Please specify the group to stop monitoring, e.g. /remove-monitor 123456789".to_string());
        }
        match self.registry.remove_monitor(source).await? {
            RemoveMonitorOutcome::Removed { .. } => {
                Ok(format!("Stopped monitoring group {}.", source))
            }
            RemoveMonitorOutcome::NotPresent => {
                Ok(format!("Group {} is not currently monitored.", source))
            }
        }
    }
}
