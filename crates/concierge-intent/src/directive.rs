//! Presentation directives and the panel that displays them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::router::IntentRouter;

/// Kind of media shown when no guide matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
    Map,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
            MediaKind::Map => "map",
        }
    }

    /// Parse a media kind name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "video" => Some(MediaKind::Video),
            "image" => Some(MediaKind::Image),
            "map" => Some(MediaKind::Map),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fallback media supplied by the caller alongside a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaHint {
    pub kind: Option<MediaKind>,
    pub url: Option<String>,
}

impl MediaHint {
    pub fn new(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            url: Some(url.into()),
        }
    }

    /// The `Media` directive for this hint, if both kind and URL are present.
    pub fn to_directive(&self) -> Option<PresentationDirective> {
        match (self.kind, self.url.as_deref().map(str::trim)) {
            (Some(kind), Some(url)) if !url.is_empty() => Some(PresentationDirective::Media {
                kind,
                url: url.to_string(),
            }),
            _ => None,
        }
    }
}

/// Which contextual panel to show for the latest outbound message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresentationDirective {
    #[default]
    None,
    BookingGuide,
    LocationGuide,
    HoursGuide,
    ParkingGuide,
    ServicesGuide,
    InsuranceGuide,
    Directions,
    Media {
        kind: MediaKind,
        url: String,
    },
}

impl PresentationDirective {
    pub fn is_none(&self) -> bool {
        matches!(self, PresentationDirective::None)
    }
}

impl fmt::Display for PresentationDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresentationDirective::None => f.write_str("none"),
            PresentationDirective::BookingGuide => f.write_str("booking guide"),
            PresentationDirective::LocationGuide => f.write_str("location guide"),
            PresentationDirective::HoursGuide => f.write_str("office hours guide"),
            PresentationDirective::ParkingGuide => f.write_str("parking guide"),
            PresentationDirective::ServicesGuide => f.write_str("services guide"),
            PresentationDirective::InsuranceGuide => f.write_str("insurance guide"),
            PresentationDirective::Directions => f.write_str("directions"),
            PresentationDirective::Media { kind, url } => write!(f, "{kind} ({url})"),
        }
    }
}

/// Holds the single directive on screen.
///
/// Every [`DirectivePanel::show`] replaces the previous directive wholesale.
#[derive(Debug, Default)]
pub struct DirectivePanel {
    router: IntentRouter,
    current: PresentationDirective,
}

impl DirectivePanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_router(router: IntentRouter) -> Self {
        Self {
            router,
            current: PresentationDirective::None,
        }
    }

    /// Route `message` and display the result in place of whatever was shown.
    pub fn show(&mut self, message: &str, hint: Option<&MediaHint>) -> &PresentationDirective {
        let next = self.router.route(message, hint);
        if next != self.current {
            debug!(from = %self.current, to = %next, "Directive changed");
        }
        self.current = next;
        &self.current
    }

    /// Close the panel.
    pub fn dismiss(&mut self) {
        if !self.current.is_none() {
            debug!(directive = %self.current, "Directive dismissed");
        }
        self.current = PresentationDirective::None;
    }

    pub fn current(&self) -> &PresentationDirective {
        &self.current
    }

    pub fn is_visible(&self) -> bool {
        !self.current.is_none()
    }
}

// =============================================================================
// Tests
// =============================================================================
