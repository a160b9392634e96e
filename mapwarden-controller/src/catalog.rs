/// Map layer resolution: layer id strings to structured map layers
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Placeholder recorded when the live map cannot be determined.
pub const UNKNOWN_MAP_NAME: &str = "unknown";

/// Base maps every server build ships with: (base id, display name).
const BUILTIN_MAPS: &[(&str, &str)] = &[
    ("stmereeglise", "St. Mere Eglise"),
    ("stmariedumont", "St. Marie Du Mont"),
    ("utahbeach", "Utah Beach"),
    ("omahabeach", "Omaha Beach"),
    ("purpleheartlane", "Purple Heart Lane"),
    ("carentan", "Carentan"),
    ("hurtgenforest", "Hurtgen Forest"),
    ("hill400", "Hill 400"),
    ("foy", "Foy"),
    ("kursk", "Kursk"),
    ("stalingrad", "Stalingrad"),
    ("remagen", "Remagen"),
    ("kharkov", "Kharkov"),
    ("driel", "Driel"),
    ("elalamein", "El Alamein"),
    ("mortain", "Mortain"),
    ("elsenbornridge", "Elsenborn Ridge"),
    ("tobruk", "Tobruk"),
    ("smolensk", "Smolensk"),
];

/// Tags used by the game's own layer ids, e.g. `PHL_L_1944_Warfare`.
const LAYER_TAGS: &[(&str, &str)] = &[
    ("sme", "stmereeglise"),
    ("smdm", "stmariedumont"),
    ("uta", "utahbeach"),
    ("oma", "omahabeach"),
    ("phl", "purpleheartlane"),
    ("car", "carentan"),
    ("hur", "hurtgenforest"),
    ("hil", "hill400"),
    ("foy", "foy"),
    ("kur", "kursk"),
    ("sta", "stalingrad"),
    ("rem", "remagen"),
    ("kha", "kharkov"),
    ("drl", "driel"),
    ("ela", "elalamein"),
    ("mor", "mortain"),
    ("elr", "elsenbornridge"),
    ("tbk", "tobruk"),
    ("smo", "smolensk"),
];

const MODES: &[(&str, &str)] = &[
    ("warfare", "Warfare"),
    ("offensive", "Offensive"),
    ("skirmish", "Skirmish"),
    ("control", "Control"),
];

const ENVIRONMENTS: &[(&str, &str)] = &[
    ("day", "Day"),
    ("night", "Night"),
    ("dusk", "Dusk"),
    ("dawn", "Dawn"),
    ("morning", "Morning"),
    ("overcast", "Overcast"),
    ("rain", "Rain"),
    ("snow", "Snow"),
];

const FACTIONS: &[&str] = &["us", "ger", "rus", "gb", "cw"];

#[derive(Debug, Error, PartialEq)]
pub enum MapParseError {
    #[error("Map id cannot be empty")]
    Empty,

    #[error("Map id '{0}' has invalid format (expected '<map>_<mode>[_<suffix>]')")]
    InvalidFormat(String),

    #[error("Unknown base map '{0}'")]
    UnknownMap(String),

    #[error("Unknown game mode '{0}'")]
    UnknownMode(String),
}

/// A playable map configuration.
///
/// Two layers with the same `base_id` are the same map for repetition
/// purposes, whatever their variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MapLayer {
    /// Layer id as the server knows it
    pub id: String,
    /// Geography-level id shared by all variants
    pub base_id: String,
    /// Game-mode variant, e.g. "warfare" or "offensive_ger"
    pub variant_id: String,
    pub pretty_name: String,
}

impl MapLayer {
    pub fn unknown() -> Self {
        Self {
            id: UNKNOWN_MAP_NAME.to_string(),
            base_id: UNKNOWN_MAP_NAME.to_string(),
            variant_id: String::new(),
            pretty_name: "Unknown".to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.base_id == UNKNOWN_MAP_NAME
    }

    /// Whether both layers are played on the same geography.
    pub fn same_map(&self, other: &MapLayer) -> bool {
        self.base_id == other.base_id
    }
}

impl fmt::Display for MapLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty_name)
    }
}

/// Lookup table of base maps the server can run.
#[derive(Debug, Clone)]
pub struct MapCatalog {
    maps: HashMap<String, String>,
}

impl MapCatalog {
    /// Catalog with the built-in base maps only.
    pub fn new() -> Self {
        Self::with_maps(std::iter::empty::<(String, String)>())
    }

    /// Built-in base maps plus extra `(base_id, display name)` pairs.
    pub fn with_maps<I, K, V>(extra: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut maps: HashMap<String, String> = BUILTIN_MAPS
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect();
        maps.extend(extra.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self { maps }
    }

    pub fn is_known(&self, base_id: &str) -> bool {
        self.maps.contains_key(base_id)
    }

    /// Resolves a layer id into a [`MapLayer`]
    ///
    /// Rules:
    /// - Cannot be empty
    /// - Only ASCII alphanumerics and underscores, matched case-insensitively
    /// - Short form is `<map>_<mode>` followed by optional environment or attacking faction tokens
    /// - Tagged form is `<TAG>_<S|L>_<year>` followed by the mode, an optional
    ///   environment and an optional `P` marker, in any order (`SMDM_S_1944_Day_P_Skirmish`)
    /// - Offensive modes may carry the faction fused on (`offensiveUS`)
    /// - The base map must be in the catalog, the mode must be a known game mode
    /// - "unknown" resolves to the placeholder layer
    pub fn parse(&self, layer_id: &str) -> Result<MapLayer, MapParseError> {
        let id = layer_id.trim();
        if id.is_empty() {
            return Err(MapParseError::Empty);
        }

        let lowered = id.to_ascii_lowercase();
        if lowered == UNKNOWN_MAP_NAME {
            return Ok(MapLayer::unknown());
        }

        if !lowered.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(MapParseError::InvalidFormat(id.to_string()));
        }

        let invalid = || MapParseError::InvalidFormat(id.to_string());
        let tokens: Vec<&str> = lowered.split('_').collect();

        let (base, modifiers, tagged) = match tokens.as_slice() {
            [tag, size, year, rest @ ..] if is_layer_size(size) && is_layer_year(year) => {
                let base = lookup(LAYER_TAGS, tag)
                    .ok_or_else(|| MapParseError::UnknownMap(tag.to_string()))?;
                (base, rest, true)
            }
            [base, rest @ ..] => (*base, rest, false),
            [] => return Err(invalid()),
        };

        let map_name = self
            .maps
            .get(base)
            .ok_or_else(|| MapParseError::UnknownMap(base.to_string()))?;

        // The short form always names the mode right after the map
        if !tagged {
            let first = modifiers
                .first()
                .filter(|m| !m.is_empty())
                .ok_or_else(invalid)?;
            if split_mode(first).is_none() {
                return Err(MapParseError::UnknownMode(first.to_string()));
            }
        }

        let mut mode = None;
        let mut environment = None;
        let mut faction = None;
        for token in modifiers.iter().copied() {
            if let Some((key, fused_faction)) = split_mode(token) {
                if mode.replace(key).is_some() {
                    return Err(invalid());
                }
                if fused_faction.is_some() {
                    faction = fused_faction;
                }
            } else if let Some(env) = ENVIRONMENTS.iter().find(|(k, _)| *k == token) {
                environment = Some(*env);
            } else if let Some(f) = FACTIONS.iter().find(|f| **f == token) {
                faction = Some(*f);
            } else if tagged && token == "p" {
                continue;
            } else {
                return Err(invalid());
            }
        }
        let (mode_key, mode_name) = mode.ok_or_else(invalid)?;

        let mut variant_id = mode_key.to_string();
        let mut pretty_name = format!("{map_name} {mode_name}");
        if let Some(faction) = faction {
            variant_id.push('_');
            variant_id.push_str(faction);
            pretty_name.push_str(&format!(" ({})", faction.to_ascii_uppercase()));
        }
        if let Some((env_key, env_name)) = environment {
            variant_id.push('_');
            variant_id.push_str(env_key);
            if env_name != "Day" {
                pretty_name.push_str(&format!(" ({env_name})"));
            }
        }

        Ok(MapLayer {
            id: id.to_string(),
            base_id: base.to_string(),
            variant_id,
            pretty_name,
        })
    }

    /// Resolves every id, skipping and logging the ones that don't parse.
    pub fn resolve_all<S: AsRef<str>>(&self, layer_ids: &[S]) -> Vec<MapLayer> {
        layer_ids
            .iter()
            .filter_map(|raw| match self.parse(raw.as_ref()) {
                Ok(layer) => Some(layer),
                Err(err) => {
                    warn!(map = raw.as_ref(), error = %err, "skipping unresolvable map");
                    None
                }
            })
            .collect()
    }

    /// Display name of a base map, if the catalog knows it.
    pub fn map_name(&self, base_id: &str) -> Option<&str> {
        self.maps.get(base_id).map(String::as_str)
    }
}

impl Default for MapCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup(table: &[(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// A mode token, possibly with the attacking faction fused on ("offensiveus").
fn split_mode(token: &str) -> Option<((&'static str, &'static str), Option<&'static str>)> {
    if let Some(mode) = MODES.iter().find(|(k, _)| *k == token) {
        return Some((*mode, None));
    }
    let faction = token.strip_prefix("offensive")?;
    let faction = FACTIONS.iter().find(|f| **f == faction)?;
    let mode = MODES.iter().find(|(k, _)| *k == "offensive")?;
    Some((*mode, Some(*faction)))
}

fn is_layer_size(token: &str) -> bool {
    token == "s" || token == "l"
}

fn is_layer_year(token: &str) -> bool {
    token.len() == 4 && token.chars().all(|c| c.is_ascii_digit())
}
