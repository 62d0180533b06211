//! Node annotation keys used as the shared coordination surface

/// Current position in the maintenance pipeline
pub const MAINTENANCE_STATE: &str = "drainsafe.azure.com/maintenancestate";

/// Disruption type of the platform event that opened the cycle
pub const MAINTENANCE_TYPE: &str = "drainsafe.azure.com/maintenancetype";

/// Controller instance that cordoned the node
pub const MAINTENANCE_OWNER: &str = "drainsafe.azure.com/maintenanceowner";

/// Platform event id that opened the cycle
pub const MAINTENANCE_EVENT: &str = "drainsafe.azure.com/maintenanceevent";

