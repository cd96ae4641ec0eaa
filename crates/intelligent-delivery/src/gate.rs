//! Delivery gate: consent and quiet-hours policy applied before dispatch.

use crate::quiet_hours::is_quiet_hours;
use campaign_core::types::{ConsentState, Decision, QuietHoursWindow, User};
use chrono::NaiveTime;
use tracing::debug;

pub const REASON_OPTED_OUT: &str = "opted out";
pub const REASON_QUIET_HOURS: &str = "quiet hours";

/// Outcome of gating one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Skip(&'static str),
    Delay(&'static str),
}

impl GateDecision {
    /// Receipt decision and reason for a gated outcome; `None` for `Proceed`.
    pub fn receipt(&self) -> Option<(Decision, &'static str)> {
        match self {
            GateDecision::Proceed => None,
            GateDecision::Skip(reason) => Some((Decision::Skipped, reason)),
            GateDecision::Delay(reason) => Some((Decision::Delayed, reason)),
        }
    }
}

/// Applies consent first, then the quiet-hours window. Campaigns without a
/// window of their own use `default_window`.
#[derive(Debug, Clone)]
pub struct DeliveryGate {
    default_window: QuietHoursWindow,
}

impl DeliveryGate {
    pub fn new(default_window: QuietHoursWindow) -> Self {
        Self { default_window }
    }

    pub fn default_window(&self) -> &QuietHoursWindow {
        &self.default_window
    }

    pub fn evaluate(
        &self,
        user: &User,
        campaign_window: Option<&QuietHoursWindow>,
        now: NaiveTime,
    ) -> GateDecision {
        if user.consent_state == ConsentState::Stopped {
            debug!(user_id = %user.id, "Recipient opted out");
            return GateDecision::Skip(REASON_OPTED_OUT);
        }

        let window = campaign_window.unwrap_or(&self.default_window);
        if is_quiet_hours(window, now) {
            debug!(user_id = %user.id, now = %now, "Recipient inside quiet hours");
            return GateDecision::Delay(REASON_QUIET_HOURS);
        }

        GateDecision::Proceed
    }
}
