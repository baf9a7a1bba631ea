use serde::{Deserialize, Serialize};
use serde_json::Value;

const UNNAMED_PERSONA: &str = "Unnamed Persona";
const UNKNOWN_ROLE: &str = "Unknown Role";

/// A reviewer viewpoint. Read-only for the duration of a job; the full `profile`
/// document is embedded verbatim in every evaluation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaProfile {
    pub id: String,
    pub name: String,
    pub role: String,
    pub profile: Value,
}

impl PersonaProfile {
    /// Builds a profile from a raw persona document, taking `name`/`role` from it.
    /// Returns `None` when the document has no string `id`.
    pub fn from_document(profile: Value) -> Option<Self> {
        let id = profile.get("id")?.as_str()?.to_string();
        let field = |key: &str| {
            profile
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown")
                .to_string()
        };
        Some(Self {
            name: field("name"),
            role: field("role"),
            id,
            profile,
        })
    }
}

impl PersonaProfile {
    /// Validates a persona document sent by a client. The document must be a
    /// JSON object with a non-empty string `id`; `name`/`role` default when absent.
    pub fn custom_from_document(profile: Value) -> Result<Self, String> {
        if !profile.is_object() {
            return Err("persona must be a JSON object".to_string());
        }
        let id = match profile.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => return Err("persona must have a string 'id' field".to_string()),
        };
        Ok(Self {
            name: string_field(&profile, "name").unwrap_or_else(|| UNNAMED_PERSONA.to_string()),
            role: string_field(&profile, "role").unwrap_or_else(|| UNKNOWN_ROLE.to_string()),
            id,
            profile,
        })
    }
}

/// A full replacement of a persona's document. `name`/`role` are `None` when the
/// new document leaves them out, in which case the stored values are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaChanges {
    pub name: Option<String>,
    pub role: Option<String>,
    pub profile: Value,
}

impl PersonaChanges {
    /// The persona id comes from the path. A document naming a different id is
    /// rejected; a document without one gets the path id filled in.
    pub fn from_document(persona_id: &str, mut profile: Value) -> Result<Self, String> {
        let Some(object) = profile.as_object_mut() else {
            return Err("persona must be a JSON object".to_string());
        };
        match object.get("id") {
            None => {
                object.insert("id".to_string(), Value::String(persona_id.to_string()));
            }
            Some(Value::String(id)) if id == persona_id => {}
            Some(_) => return Err(format!("persona id cannot be changed from '{persona_id}'")),
        }
        Ok(Self {
            name: string_field(&profile, "name"),
            role: string_field(&profile, "role"),
            profile,
        })
    }
}

fn string_field(profile: &Value, key: &str) -> Option<String> {
    profile.get(key).and_then(Value::as_str).map(str::to_string)
}
