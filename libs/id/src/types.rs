//! Typed ID definitions.

use crate::define_id;

// =============================================================================
// Instances
// =============================================================================

define_id!(InstanceId, "instance");
define_id!(TemplateId, "template");
