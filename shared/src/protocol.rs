/// Bus topic that carries recording lifecycle notifications
pub const MESSAGING_TOPIC: &str = "MessagingServer";

/// API path prefixes
pub const API_V1_PREFIX: &str = "/api/v1";
pub const API_V3_PREFIX: &str = "/api/v3";

/// Metadata label keys written on every recording created by the daemon
pub const LABEL_TEMPLATE_NAME: &str = "template.name";
pub const LABEL_TEMPLATE_TYPE: &str = "template.type";

/// Pseudo-template that enables every event type a target advertises
pub const ALL_EVENTS_TEMPLATE: &str = "ALL";
