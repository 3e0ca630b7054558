//! Label keys carried by managed resources and the children created for them.
//!
//! Identifier and slug are labels rather than spec fields, so they can change
//! outside the control plane and must be re-checked on every reconcile.

pub const IDENTIFIER: &str = "keel.dev/uuid";
pub const SLUG: &str = "keel.dev/slug";

pub const PROJECT: &str = "keel.dev/project-uuid";
pub const ENVIRONMENT: &str = "keel.dev/environment-uuid";
pub const APPLICATION: &str = "keel.dev/application-uuid";
pub const DEPLOYMENT: &str = "keel.dev/deployment-uuid";
pub const DOMAIN: &str = "keel.dev/domain-uuid";

/// Owner generation an external child was rendered for.
pub const OWNER_GENERATION: &str = "keel.dev/owner-generation";

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "keel";

/// Ancestry labels in hierarchy order; a child inherits every one its parent carries.
pub const ANCESTRY: [&str; 5] = [PROJECT, ENVIRONMENT, APPLICATION, DEPLOYMENT, DOMAIN];
