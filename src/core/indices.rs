use hashbrown::HashMap;

use crate::types::RegistrationId;

/// Normalized email to registration id; emails are unique.
pub type EmailIndex = HashMap<String, RegistrationId>;
