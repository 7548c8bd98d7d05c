use std::fmt;

use time::OffsetDateTime;

use crate::policy::RotationPolicy;

/// Inputs to the scheduler's single consumer loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A whole-minute clock tick; time policies due at this instant roll.
    Clock(OffsetDateTime),
    /// Evaluate every size policy now.
    SizeCheck,
    /// Re-fetch the policy set.
    Reload,
    /// Bootstrap a policy whose write alias does not exist yet.
    Init(RotationPolicy),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Clock(instant) => write!(f, "clock tick at {instant}"),
            Event::SizeCheck => write!(f, "size check"),
            Event::Reload => write!(f, "policy reload"),
            Event::Init(policy) => write!(f, "initialization of {}", policy.id),
        }
    }
}
