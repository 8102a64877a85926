//! Concierge Intent crate - maps outbound messages to presentation directives.
//!
//! Routing is a pure keyword lookup over an ordered rule table. The
//! [`DirectivePanel`] holds the one directive currently on screen, and
//! [`presets`] lists the canned questions offered as quick actions.

pub mod directive;
pub mod presets;
pub mod router;

pub use directive::{DirectivePanel, MediaHint, MediaKind, PresentationDirective};
pub use presets::{preset, presets, PresetQuestion};
pub use router::{route, Intent, IntentRouter, IntentRule};
