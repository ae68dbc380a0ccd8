//! Centralized Gemini model definitions

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "gemini-2.0-flash")
    pub id: &'static str,
    /// API name used in the request path
    pub api_name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
}

/// Get all available model definitions. The first entry is the fallback default.
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gemini-2.0-flash",
            api_name: "gemini-2.0-flash",
            description: "Gemini 2.0 Flash (fast, tool use)",
            context_window: 1_048_576,
        },
        ModelDef {
            id: "gemini-2.0-flash-lite",
            api_name: "gemini-2.0-flash-lite",
            description: "Gemini 2.0 Flash-Lite (cheapest)",
            context_window: 1_048_576,
        },
        ModelDef {
            id: "gemini-2.0-flash-exp",
            api_name: "gemini-2.0-flash-exp",
            description: "Gemini 2.0 Flash experimental",
            context_window: 1_048_576,
        },
        ModelDef {
            id: "gemini-1.5-pro",
            api_name: "gemini-1.5-pro",
            description: "Gemini 1.5 Pro (most capable, slower)",
            context_window: 2_097_152,
        },
        ModelDef {
            id: "gemini-1.5-flash",
            api_name: "gemini-1.5-flash",
            description: "Gemini 1.5 Flash (legacy)",
            context_window: 1_048_576,
        },
    ]
}

/// Look up a model definition by its user-facing id
pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    all_models().iter().find(|m| m.id == id)
}
