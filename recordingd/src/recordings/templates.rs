use shared::protocol::ALL_EVENTS_TEMPLATE;
use shared::types::TemplateType;
use crate::error::ApiError;
use crate::session::{EventEnableMap, TargetSession};

fn unknown_template(name: &str) -> ApiError {
    ApiError::bad_input(format!("Invalid/unknown event template {}", name))
}

/// Decide which template type a recording should use.
///
/// An explicit type wins. `ALL` is expressed with the target's own event
/// catalogue. Otherwise a custom template shadows a built-in one of the same name.
pub async fn resolve_type(
    session: &dyn TargetSession,
    name: &str,
    requested: Option<TemplateType>,
) -> Result<TemplateType, ApiError> {
    if let Some(template_type) = requested {
        return Ok(template_type);
    }
    if name == ALL_EVENTS_TEMPLATE {
        return Ok(TemplateType::Target);
    }

    let templates = session.template_service().templates().await?;
    let types: Vec<TemplateType> = templates
        .iter()
        .filter(|t| t.name == name)
        .map(|t| t.template_type)
        .collect();

    if types.contains(&TemplateType::Custom) {
        Ok(TemplateType::Custom)
    } else if types.contains(&TemplateType::Target) {
        Ok(TemplateType::Target)
    } else {
        Err(unknown_template(name))
    }
}

/// Build the event settings for a template, expanding `ALL` into every
/// event type the target advertises.
pub async fn enable_events(
    session: &dyn TargetSession,
    name: &str,
    requested: Option<TemplateType>,
) -> Result<EventEnableMap, ApiError> {
    if name == ALL_EVENTS_TEMPLATE {
        return enable_all_events(session).await;
    }

    let template_type = resolve_type(session, name, requested).await?;
    session
        .template_service()
        .events(name, template_type)
        .await?
        .ok_or_else(|| unknown_template(name))
}

async fn enable_all_events(session: &dyn TargetSession) -> Result<EventEnableMap, ApiError> {
    let mut events = EventEnableMap::default();
    for event_type in session.available_event_types().await? {
        events.set(event_type.full_key(), "enabled", "true");
    }
    Ok(events)
}
