use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RosterError, RosterResult};

pub const CONFIG_FILE_NAME: &str = "roster-delta.toml";
pub const MAX_DATE_OFFSET_HOURS: i64 = 48;
pub const DEFAULT_SOURCE_URL: &str = "https://api.dmg-inc.com/reports/download/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RosterConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub divisions: DivisionConfig,
    #[serde(default)]
    pub houses: HouseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SOURCE_URL.to_owned(),
            user_agent: concat!("roster-delta/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_dir: PathBuf,
    pub report_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("csv"),
            report_dir: PathBuf::from("reports"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Column names of the canonical roster schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub id: String,
    pub name: String,
    pub rank: String,
    /// Older reports carried the rank under this name instead.
    pub legacy_rank: String,
    pub division: String,
    pub position: String,
    pub sponsor: String,
    pub primary_counter: String,
    pub excluded_ranks: Vec<String>,
    pub date_offset_hours: i64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            id: "id".to_owned(),
            name: "name".to_owned(),
            rank: "rank".to_owned(),
            legacy_rank: "member_rank".to_owned(),
            division: "division".to_owned(),
            position: "position".to_owned(),
            sponsor: "vanguard".to_owned(),
            primary_counter: "reputation".to_owned(),
            excluded_ranks: vec!["Inactive".to_owned(), "Applicant".to_owned()],
            date_offset_hours: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub member_ranks: Vec<String>,
    pub officer_ranks: Vec<String>,
    pub outlier_threshold_base: f64,
    pub sponsor_multiplier: f64,
    pub rounding_precision: u32,
    pub default_span_days: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            member_ranks: ["Member", "Captain", "Specialist", "Elite"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            officer_ranks: ["L4", "L5", "L6", "L7", "L8", "Leader"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            outlier_threshold_base: 500.0,
            sponsor_multiplier: 5.0,
            rounding_precision: 3,
            default_span_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivisionConfig {
    pub leader_position: String,
    pub eligibility_headcount: usize,
    pub eligible_file: String,
}

impl Default for DivisionConfig {
    fn default() -> Self {
        Self {
            leader_position: "DC".to_owned(),
            eligibility_headcount: 60,
            eligible_file: "eligible.txt".to_owned(),
        }
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Houses group divisions. Counter names are last-month columns of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HouseConfig {
    pub column: String,
    pub names: Vec<String>,
    /// Positions that do not count as hosting; an empty position never does.
    pub non_host_positions: Vec<String>,
    /// House or division values that mean "not placed anywhere".
    pub unassigned: Vec<String>,
    /// Fallback for reports that predate the house column.
    pub division_houses: BTreeMap<String, String>,
    pub reputation: String,
    pub recruits: String,
    pub events_attended: String,
    pub events_hosted: String,
    pub discord_hours: String,
    pub precision: u32,
}

impl Default for HouseConfig {
    fn default() -> Self {
        Self {
            column: "house".to_owned(),
            names: owned(&["Trident", "Sabre", "Longbow", "Dagger", "Javelin"]),
            non_host_positions: owned(&["TM"]),
            unassigned: owned(&["", "0", "Unassigned", "Leadership", "DI-Community"]),
            division_houses: BTreeMap::new(),
            reputation: "rep_lm".to_owned(),
            recruits: "recruits_lm".to_owned(),
            events_attended: "events_lm".to_owned(),
            events_hosted: "events_hosted_lm".to_owned(),
            discord_hours: "discord_hours_lm".to_owned(),
            precision: 2,
        }
    }
}

impl RosterConfig {
    /// Loads the configuration from `explicit` if given, otherwise from
    /// `roster-delta.toml` in the working directory, falling back to defaults.
    pub fn load(explicit: Option<&Path>) -> RosterResult<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(RosterError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => {
                let path = PathBuf::from(CONFIG_FILE_NAME);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let raw = fs::read_to_string(&path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> RosterResult<Self> {
        let parsed: RosterConfig = toml::from_str(raw)?;
        let config = normalize_config(parsed);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RosterResult<()> {
        let schema = &self.schema;
        for (key, value) in [
            ("schema.id", &schema.id),
            ("schema.name", &schema.name),
            ("schema.rank", &schema.rank),
            ("schema.legacy_rank", &schema.legacy_rank),
            ("schema.sponsor", &schema.sponsor),
            ("schema.primary_counter", &schema.primary_counter),
        ] {
            if value.is_empty() {
                return Err(RosterError::Config(format!("{key} must not be empty")));
            }
        }

        let offsets = -MAX_DATE_OFFSET_HOURS..=MAX_DATE_OFFSET_HOURS;
        if !offsets.contains(&schema.date_offset_hours) {
            return Err(RosterError::Config(format!(
                "schema.date_offset_hours must be within {offsets:?}"
            )));
        }

        let analysis = &self.analysis;
        if !analysis.outlier_threshold_base.is_finite() {
            return Err(RosterError::Config(
                "analysis.outlier_threshold_base must be finite".to_owned(),
            ));
        }
        if !(analysis.sponsor_multiplier.is_finite() && analysis.sponsor_multiplier > 0.0) {
            return Err(RosterError::Config(
                "analysis.sponsor_multiplier must be a positive number".to_owned(),
            ));
        }
        if analysis.rounding_precision > 12 {
            return Err(RosterError::Config(
                "analysis.rounding_precision must be at most 12".to_owned(),
            ));
        }
        if self.houses.column.is_empty() {
            return Err(RosterError::Config("houses.column must not be empty".to_owned()));
        }
        if self.houses.precision > 12 {
            return Err(RosterError::Config(
                "houses.precision must be at most 12".to_owned(),
            ));
        }
        if self.source.base_url.is_empty() {
            return Err(RosterError::Config("source.base_url must not be empty".to_owned()));
        }
        Ok(())
    }

    pub fn ensure_dirs(&self) -> RosterResult<()> {
        for dir in [
            &self.paths.cache_dir,
            &self.paths.report_dir,
            &self.paths.log_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn eligible_path(&self) -> PathBuf {
        self.paths.report_dir.join(&self.divisions.eligible_file)
    }
}

fn normalize_config(mut config: RosterConfig) -> RosterConfig {
    let schema = &mut config.schema;
    for value in [
        &mut schema.id,
        &mut schema.name,
        &mut schema.rank,
        &mut schema.legacy_rank,
        &mut schema.division,
        &mut schema.position,
        &mut schema.sponsor,
        &mut schema.primary_counter,
    ] {
        *value = value.trim().to_owned();
    }
    config.houses.column = config.houses.column.trim().to_owned();
    config.source.base_url = config.source.base_url.trim().to_owned();
    config
}
