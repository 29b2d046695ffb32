//! System instruction for the tour-guide persona.

use std::fmt::Write as _;
use std::sync::Arc;

/// Geographic bounds of the loaded map, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

/// Current flight position; altitude in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub altitude: f64,
}

/// Queried once per session start; `None` when the host has no position yet.
pub type PositionProvider = Arc<dyn Fn() -> Option<Position> + Send + Sync>;

const ROLE_GUIDELINES: &str = "Your role:
- Share interesting facts about the terrain, geography, history, and landmarks visible in this area
- Keep responses brief and conversational (1-2 sentences typically)
- Respond naturally to questions about what the user can see
- Be enthusiastic but not over the top
- If you don't know specific details about an area, share general geographic or geological facts that would apply";

pub fn build_system_instruction(
    session_name: &str,
    bounds: Option<&GeoBounds>,
    position: Option<Position>,
) -> String {
    let name = if session_name.trim().is_empty() {
        "terrain"
    } else {
        session_name
    };
    let coord = |value: Option<f64>| match value {
        Some(v) if v.is_finite() => format!("{v:.4}"),
        _ => "unknown".to_string(),
    };

    let mut prompt = format!(
        "You are a friendly and knowledgeable tour guide flying over {name}.\n\n\
         Geographic bounds of this map:\n\
         - North: {}°\n\
         - South: {}°\n\
         - East: {}°\n\
         - West: {}°",
        coord(bounds.map(|b| b.north)),
        coord(bounds.map(|b| b.south)),
        coord(bounds.map(|b| b.east)),
        coord(bounds.map(|b| b.west)),
    );

    if let Some(pos) = position {
        let _ = write!(
            prompt,
            "\n\nCurrent flight position: {:.4}° latitude, {:.4}° longitude, at approximately {} meters altitude.",
            pos.lat,
            pos.lon,
            pos.altitude.round() as i64
        );
    }

    prompt.push_str("\n\n");
    prompt.push_str(ROLE_GUIDELINES);
    prompt
}
