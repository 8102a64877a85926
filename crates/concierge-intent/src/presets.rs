//! Canned questions offered as quick actions.

use concierge_core::types::Language;

use crate::directive::{MediaHint, MediaKind};

const CLINIC_MAP_URL: &str = "https://www.google.com/maps/embed?pb=!1m18!1m12!1m3!1d3024.4555!2d-74.0059413!3d40.7127837!2m3!1f0!2f0!3f0!3m2!1i1024!2i768!4f13.1!3m3!1m2!1s0x89c25a316e7fcc1f%3A0x4b3ba7f23b567d2c!2sNew%20York%2C%20NY%2C%20USA!5e0!3m2!1sen!2sus!4v1234567890";

/// A preset question with bilingual button labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetQuestion {
    pub id: &'static str,
    pub label_en: &'static str,
    pub label_es: &'static str,
    /// Text sent to the avatar.
    pub message: &'static str,
    pub media_kind: Option<MediaKind>,
    pub media_url: Option<&'static str>,
}

impl PresetQuestion {
    pub fn label(&self, language: Language) -> &'static str {
        match language {
            Language::English => self.label_en,
            Language::Spanish => self.label_es,
        }
    }

    /// Fallback media for the router, when the preset carries any.
    pub fn media_hint(&self) -> Option<MediaHint> {
        if self.media_kind.is_none() && self.media_url.is_none() {
            return None;
        }
        Some(MediaHint {
            kind: self.media_kind,
            url: self.media_url.map(str::to_string),
        })
    }
}

static PRESETS: [PresetQuestion; 7] = [
    PresetQuestion {
        id: "appointment",
        label_en: "Book Appointment",
        label_es: "Reservar Cita",
        message: "How can I book an appointment?",
        media_kind: None,
        media_url: None,
    },
    PresetQuestion {
        id: "dentist-location",
        label_en: "Office Location",
        label_es: "Ubicación del Consultorio",
        message: "Where is the dentist room situated in the building?",
        media_kind: Some(MediaKind::Map),
        media_url: Some(CLINIC_MAP_URL),
    },
    PresetQuestion {
        id: "directions",
        label_en: "How to Get There",
        label_es: "Cómo Llegar",
        message: "How do I get to the dental clinic? Can you show me directions?",
        media_kind: None,
        media_url: None,
    },
    PresetQuestion {
        id: "office-hours",
        label_en: "Office Hours",
        label_es: "Horarios",
        message: "What are your office hours and how can I contact you?",
        media_kind: Some(MediaKind::Image),
        media_url: Some(
            "https://images.unsplash.com/photo-1551434678-e076c223a692?w=800&h=600&fit=crop&auto=format",
        ),
    },
    PresetQuestion {
        id: "parking",
        label_en: "Parking Info",
        label_es: "Estacionamiento",
        message: "Where can I park and what are the parking fees?",
        media_kind: Some(MediaKind::Map),
        media_url: Some(CLINIC_MAP_URL),
    },
    PresetQuestion {
        id: "services",
        label_en: "Our Services",
        label_es: "Nuestros Servicios",
        message: "What services do you offer and what are the costs?",
        media_kind: Some(MediaKind::Image),
        media_url: Some(
            "https://images.unsplash.com/photo-1559757148-5c350d0d3c56?w=800&h=600&fit=crop&auto=format",
        ),
    },
    PresetQuestion {
        id: "insurance",
        label_en: "Insurance",
        label_es: "Seguro",
        message: "Do you accept my insurance plan and what does it cover?",
        media_kind: Some(MediaKind::Image),
        media_url: Some(
            "https://images.unsplash.com/photo-1454165804606-c3d57bc86b40?w=800&h=600&fit=crop&auto=format",
        ),
    },
];

/// Every preset, in display order.
pub fn presets() -> &'static [PresetQuestion] {
    &PRESETS
}

/// Look up a preset by id.
pub fn preset(id: &str) -> Option<&'static PresetQuestion> {
    PRESETS.iter().find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::PresentationDirective;
    use crate::router::route;

    #[test]
    fn test_preset_ids_unique() {
        let mut ids: Vec<&str> = presets().iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), presets().len());
    }

    #[test]
    fn test_labels_by_language() {
        let appointment = preset("appointment").unwrap();
        assert_eq!(appointment.label(Language::English), "Book Appointment");
        assert_eq!(appointment.label(Language::Spanish), "Reservar Cita");
    }

    #[test]
    fn test_each_preset_routes_to_its_guide() {
        let expected = [
            ("appointment", PresentationDirective::BookingGuide),
            ("dentist-location", PresentationDirective::LocationGuide),
            ("directions", PresentationDirective::Directions),
            ("office-hours", PresentationDirective::HoursGuide),
            ("parking", PresentationDirective::ParkingGuide),
            ("services", PresentationDirective::ServicesGuide),
            ("insurance", PresentationDirective::InsuranceGuide),
        ];
        for (id, directive) in expected {
            let question = preset(id).unwrap();
            let hint = question.media_hint();
            assert_eq!(route(question.message, hint.as_ref()), directive, "{id}");
        }
    }

    #[test]
    fn test_media_hint() {
        assert!(preset("appointment").unwrap().media_hint().is_none());
        let hint = preset("parking").unwrap().media_hint().unwrap();
        assert_eq!(hint.kind, Some(MediaKind::Map));
        assert!(hint.url.unwrap().starts_with("https://www.google.com/maps"));
    }

    #[test]
    fn test_unknown_preset() {
        assert!(preset("billing").is_none());
    }
}
