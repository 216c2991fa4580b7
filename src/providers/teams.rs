//! Team and player name normalization shared by every provider.
//!
//! Upstreams disagree on naming ("LA Rams", "Los Angeles Rams", "L.A. Rams").
//! Everything crossing a provider boundary is folded into one canonical,
//! lowercase form so schedule and odds feeds can be joined on names.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{AppError, Result};
use crate::types::Sport;

/// Abbreviations expanded when they appear as whole words.
const PREFIX_EXPANSIONS: [(&str, &str); 5] = [
    (" st ", " saint "),
    (" ny ", " new york "),
    (" la ", " los angeles "),
    (" sf ", " san francisco "),
    (" sd ", " san diego "),
];

const DEFAULT_ALIASES: [(Sport, &str, &str); 22] = [
    (Sport::Nfl, "la rams", "los angeles rams"),
    (Sport::Nfl, "la chargers", "los angeles chargers"),
    (Sport::Nfl, "washington football team", "washington commanders"),
    (Sport::Nfl, "ari cardinals", "arizona cardinals"),
    (Sport::Nfl, "sf 49ers", "san francisco 49ers"),
    (Sport::Nfl, "ny giants", "new york giants"),
    (Sport::Nfl, "ny jets", "new york jets"),
    (Sport::Nba, "la lakers", "los angeles lakers"),
    (Sport::Nba, "la clippers", "los angeles clippers"),
    (Sport::Nba, "gs warriors", "golden state warriors"),
    (Sport::Nba, "ny knicks", "new york knicks"),
    (Sport::Nba, "bk nets", "brooklyn nets"),
    (Sport::Mlb, "la dodgers", "los angeles dodgers"),
    (Sport::Mlb, "la angels", "los angeles angels"),
    (Sport::Mlb, "sd padres", "san diego padres"),
    (Sport::Mlb, "sf giants", "san francisco giants"),
    (Sport::Mlb, "ny yankees", "new york yankees"),
    (Sport::Mlb, "ny mets", "new york mets"),
    (Sport::Nhl, "la kings", "los angeles kings"),
    (Sport::Nhl, "ny rangers", "new york rangers"),
    (Sport::Nhl, "ny islanders", "new york islanders"),
    (Sport::Nhl, "nj devils", "new jersey devils"),
];

/// Strength assumed for a team missing from the table.
pub const DEFAULT_STRENGTH: f64 = 0.5;

/// Built-in strengths in [0, 1], keyed by canonical name. A file loaded with
/// [`TeamDirectory::load`] overrides individual entries.
const NFL_STRENGTH: &[(&str, f64)] = &[
    ("kansas city chiefs", 0.8),
    ("buffalo bills", 0.7),
    ("san francisco 49ers", 0.7),
    ("dallas cowboys", 0.6),
    ("philadelphia eagles", 0.6),
    ("green bay packers", 0.6),
    ("baltimore ravens", 0.6),
    ("miami dolphins", 0.5),
    ("tampa bay buccaneers", 0.5),
    ("cincinnati bengals", 0.5),
    ("los angeles rams", 0.5),
    ("pittsburgh steelers", 0.5),
    ("denver broncos", 0.4),
    ("detroit lions", 0.4),
    ("minnesota vikings", 0.4),
    ("new orleans saints", 0.4),
    ("indianapolis colts", 0.4),
    ("tennessee titans", 0.4),
    ("seattle seahawks", 0.4),
    ("los angeles chargers", 0.4),
    ("las vegas raiders", 0.3),
    ("chicago bears", 0.3),
    ("atlanta falcons", 0.3),
    ("houston texans", 0.3),
    ("jacksonville jaguars", 0.3),
    ("cleveland browns", 0.3),
    ("new england patriots", 0.3),
    ("new york jets", 0.2),
    ("new york giants", 0.2),
    ("carolina panthers", 0.2),
    ("arizona cardinals", 0.2),
    ("washington commanders", 0.2),
];

const NBA_STRENGTH: &[(&str, f64)] = &[
    ("boston celtics", 0.8),
    ("los angeles lakers", 0.7),
    ("denver nuggets", 0.7),
    ("golden state warriors", 0.6),
    ("milwaukee bucks", 0.6),
    ("phoenix suns", 0.5),
    ("miami heat", 0.5),
    ("philadelphia 76ers", 0.5),
    ("dallas mavericks", 0.5),
    ("los angeles clippers", 0.5),
    ("brooklyn nets", 0.4),
    ("new york knicks", 0.4),
    ("cleveland cavaliers", 0.4),
    ("memphis grizzlies", 0.4),
    ("chicago bulls", 0.3),
    ("indiana pacers", 0.3),
    ("atlanta hawks", 0.3),
    ("orlando magic", 0.3),
    ("new orleans pelicans", 0.3),
    ("oklahoma city thunder", 0.3),
    ("portland trail blazers", 0.3),
    ("utah jazz", 0.3),
    ("minnesota timberwolves", 0.3),
    ("sacramento kings", 0.3),
    ("detroit pistons", 0.2),
    ("charlotte hornets", 0.2),
    ("washington wizards", 0.2),
    ("houston rockets", 0.2),
    ("san antonio spurs", 0.2),
];

#[derive(Debug, Default, Deserialize)]
struct SportFile {
    #[serde(default)]
    aliases: HashMap<String, String>,
    #[serde(default)]
    teams: Vec<String>,
    #[serde(default)]
    strength: HashMap<String, f64>,
}

#[derive(Debug, Default, Clone)]
struct SportTable {
    aliases: HashMap<String, String>,
    /// When non-empty, names outside the roster are unresolvable.
    roster: HashSet<String>,
    strength: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct TeamDirectory {
    tables: HashMap<Sport, SportTable>,
}

impl TeamDirectory {
    /// Built-in aliases and NFL/NBA strengths, no rosters. Teams outside the
    /// strength table sit at [`DEFAULT_STRENGTH`].
    pub fn with_defaults() -> Self {
        let mut tables: HashMap<Sport, SportTable> = HashMap::new();
        for (sport, from, to) in DEFAULT_ALIASES {
            tables.entry(sport).or_default().aliases.insert(from.to_string(), to.to_string());
        }
        for (sport, table) in [(Sport::Nfl, NFL_STRENGTH), (Sport::Nba, NBA_STRENGTH)] {
            let strength = &mut tables.entry(sport).or_default().strength;
            strength.extend(table.iter().map(|&(team, s)| (team.to_string(), s)));
        }
        Self { tables }
    }

    /// Defaults merged with a JSON file of the shape
    /// `{"nfl": {"aliases": {..}, "teams": [..], "strength": {..}}, ..}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let parsed: HashMap<String, SportFile> = serde_json::from_str(&raw)?;
        let mut dir = Self::with_defaults();

        for (key, file) in parsed {
            let sport: Sport = key.parse().map_err(AppError::Config)?;
            let table = dir.tables.entry(sport).or_default();
            for (from, to) in file.aliases {
                table.aliases.insert(normalize(&from), normalize(&to));
            }
            for team in file.teams {
                table.roster.insert(expand(&normalize(&team)));
            }
            for (team, s) in file.strength {
                table.strength.insert(expand(&normalize(&team)), s.clamp(0.0, 1.0));
            }
        }

        info!(
            path = %path.as_ref().display(),
            sports = dir.tables.len(),
            "Loaded team directory"
        );
        Ok(dir)
    }

    /// Canonical team name, or None when the raw name cannot be resolved.
    pub fn canonicalize(&self, sport: Sport, raw: &str) -> Option<String> {
        let base = normalize(raw);
        if base.is_empty() {
            return None;
        }
        let table = self.tables.get(&sport);
        let lookup = |s: &str| table.and_then(|t| t.aliases.get(s)).cloned();

        let name = lookup(&base).unwrap_or_else(|| {
            let expanded = expand(&base);
            lookup(&expanded).unwrap_or(expanded)
        });

        match table {
            Some(t) if !t.roster.is_empty() && !t.roster.contains(&name) => None,
            _ => Some(name),
        }
    }

    pub fn strength(&self, sport: Sport, team: &str) -> f64 {
        self.tables
            .get(&sport)
            .and_then(|t| t.strength.get(team))
            .copied()
            .unwrap_or(DEFAULT_STRENGTH)
    }
}

impl Default for TeamDirectory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize(raw: &str) -> String {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn expand(name: &str) -> String {
    let mut padded = format!(" {name} ");
    for (from, to) in PREFIX_EXPANSIONS {
        // Repeat so adjacent abbreviations sharing a space both expand.
        while padded.contains(from) {
            padded = padded.replace(from, to);
        }
    }
    padded.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_punctuation_and_case() {
        let dir = TeamDirectory::with_defaults();
        assert_eq!(dir.canonicalize(Sport::Nfl, "  Kansas City   Chiefs "), Some("kansas city chiefs".into()));
        assert_eq!(dir.canonicalize(Sport::Mlb, "St. Louis Cardinals"), Some("saint louis cardinals".into()));
    }

    #[test]
    fn abbreviations_and_aliases_converge() {
        let dir = TeamDirectory::with_defaults();
        let full = dir.canonicalize(Sport::Nfl, "Los Angeles Rams");
        assert_eq!(dir.canonicalize(Sport::Nfl, "LA Rams"), full);
        assert_eq!(dir.canonicalize(Sport::Nfl, "L.A. Rams"), full);
        assert_eq!(
            dir.canonicalize(Sport::Nfl, "Washington Football Team"),
            Some("washington commanders".into())
        );
        assert_eq!(dir.canonicalize(Sport::Nhl, "NJ Devils"), Some("new jersey devils".into()));
    }

    #[test]
    fn empty_name_is_unresolvable() {
        let dir = TeamDirectory::with_defaults();
        assert_eq!(dir.canonicalize(Sport::Nba, " .. "), None);
    }

    #[test]
    fn roster_rejects_unknown_teams() {
        let path = std::env::temp_dir().join(format!("sharpline-teams-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"nba": {"teams": ["Boston Celtics", "LA Lakers"], "strength": {"Boston Celtics": 0.8}}}"#,
        )
        .unwrap();
        let dir = TeamDirectory::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(dir.canonicalize(Sport::Nba, "Boston Celtics"), Some("boston celtics".into()));
        assert_eq!(dir.canonicalize(Sport::Nba, "LA Lakers"), Some("los angeles lakers".into()));
        assert_eq!(dir.canonicalize(Sport::Nba, "Harlem Globetrotters"), None);
        // No roster for nfl: anything non-empty resolves.
        assert!(dir.canonicalize(Sport::Nfl, "Harlem Globetrotters").is_some());

        assert_eq!(dir.strength(Sport::Nba, "boston celtics"), 0.8);
        assert_eq!(dir.strength(Sport::Nba, "toronto raptors"), DEFAULT_STRENGTH);
    }

    #[test]
    fn built_in_strengths_resolve_through_aliases() {
        let dir = TeamDirectory::with_defaults();
        let rams = dir.canonicalize(Sport::Nfl, "LA Rams").unwrap();
        assert_eq!(dir.strength(Sport::Nfl, &rams), 0.5);
        assert_eq!(dir.strength(Sport::Nfl, "kansas city chiefs"), 0.8);
        assert_eq!(dir.strength(Sport::Nba, "houston rockets"), 0.2);
        // Same name, other sport: no bleed-through.
        assert_eq!(dir.strength(Sport::Mlb, "houston rockets"), DEFAULT_STRENGTH);
        assert_eq!(dir.strength(Sport::Nhl, "boston bruins"), DEFAULT_STRENGTH);
    }
}
