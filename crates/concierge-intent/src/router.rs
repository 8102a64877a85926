//! Keyword-based intent routing.
//!
//! Rules are checked top to bottom and the first match wins. Keyword sets
//! overlap ("location" shows up in directions questions too), so the most
//! specific intents come first.

use serde::{Deserialize, Serialize};

use crate::directive::{MediaHint, PresentationDirective};

/// Conversational intent recognised in an outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Booking,
    Directions,
    Location,
    Hours,
    Parking,
    Services,
    Insurance,
}

impl Intent {
    pub fn directive(&self) -> PresentationDirective {
        match self {
            Intent::Booking => PresentationDirective::BookingGuide,
            Intent::Directions => PresentationDirective::Directions,
            Intent::Location => PresentationDirective::LocationGuide,
            Intent::Hours => PresentationDirective::HoursGuide,
            Intent::Parking => PresentationDirective::ParkingGuide,
            Intent::Services => PresentationDirective::ServicesGuide,
            Intent::Insurance => PresentationDirective::InsuranceGuide,
        }
    }
}

/// One row of the routing table. Keywords are lowercase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntentRule {
    pub keywords: &'static [&'static str],
    pub intent: Intent,
}

impl IntentRule {
    /// `lowered` must already be lowercase.
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|keyword| lowered.contains(*keyword))
    }
}

/// Default routing table, most specific first.
pub const DEFAULT_RULES: &[IntentRule] = &[
    IntentRule {
        keywords: &["appointment", "book"],
        intent: Intent::Booking,
    },
    IntentRule {
        keywords: &["directions", "how to get", "cómo llegar"],
        intent: Intent::Directions,
    },
    IntentRule {
        keywords: &["dentist room", "situated", "location"],
        intent: Intent::Location,
    },
    IntentRule {
        keywords: &["office hours", "contact"],
        intent: Intent::Hours,
    },
    IntentRule {
        keywords: &["park"],
        intent: Intent::Parking,
    },
    IntentRule {
        keywords: &["services", "costs"],
        intent: Intent::Services,
    },
    IntentRule {
        keywords: &["insurance"],
        intent: Intent::Insurance,
    },
];

/// Maps free text to a [`PresentationDirective`]. Pure and total.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    rules: Vec<IntentRule>,
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentRouter {
    /// Router over [`DEFAULT_RULES`].
    pub fn new() -> Self {
        Self::with_rules(DEFAULT_RULES.to_vec())
    }

    pub fn with_rules(rules: Vec<IntentRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[IntentRule] {
        &self.rules
    }

    /// First intent whose keywords occur in `message`, ignoring case.
    pub fn classify(&self, message: &str) -> Option<Intent> {
        let lowered = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.intent)
    }

    /// Directive for `message`. Unmatched text falls back to `hint` as a
    /// `Media` directive, or `None` without a usable hint.
    pub fn route(&self, message: &str, hint: Option<&MediaHint>) -> PresentationDirective {
        match self.classify(message) {
            Some(intent) => intent.directive(),
            None => hint
                .and_then(MediaHint::to_directive)
                .unwrap_or_default(),
        }
    }
}

/// Route with the default table.
pub fn route(message: &str, hint: Option<&MediaHint>) -> PresentationDirective {
    IntentRouter::new().route(message, hint)
}

// =============================================================================
// Tests
// =============================================================================
