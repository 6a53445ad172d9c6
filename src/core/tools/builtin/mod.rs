mod campaign;
mod webhook;

pub use campaign::{CAMPAIGN_TOOL, CreateCampaign, campaign_descriptor, normalize_campaign};
pub use webhook::{WebhookTool, webhook_descriptor};

use serde_json::json;

use super::{ParamSpec, ToolDescriptor};
use crate::core::agent::SLEEP_DIRECTIVE;

/// Descriptor for the reserved sleep directive. It has no handler: the
/// execution loop applies it directly.
pub fn sleep_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        SLEEP_DIRECTIVE,
        "Pause yourself and skip upcoming wake-ups until the given time has passed",
    )
    .param(ParamSpec::required(
        "milliseconds",
        "How long to sleep, as a positive integer number of milliseconds",
    ))
    .example(json!({ "milliseconds": 3_600_000 }))
}
