use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

pub const CFG_SCALE_MIN: i64 = 0;
pub const CFG_SCALE_MAX: i64 = 20;
pub const DEFAULT_CFG_SCALE: u8 = 10;
pub const DEFAULT_DENOISE_STRENGTH: f64 = 0.5;
/// Seed sentinel meaning "let the backend pick".
pub const UNSPECIFIED_SEED: i64 = -1;

/// Literal delimiter that introduces a flag.
const FLAG_PREFIX: &str = "--";

/// Dash characters some clients substitute for a typed `--` (smart punctuation).
const SMART_DASHES: [char; 2] = ['\u{2014}', '\u{2013}'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid model: {0}.")]
    UnknownModel(String),

    #[error("You need to provide a prompt.")]
    EmptyPrompt,

    #[error("Unknown flag: --{0}.")]
    UnknownFlag(String),

    #[error("Flag --{0} needs a value.")]
    MissingValue(&'static str),

    #[error("Flag --{0} was given more than once.")]
    DuplicateFlag(&'static str),

    #[error("{field} must be a number, got {value:?}.")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{field} must be between {min} and {max}, got {value}.")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            Self::UnknownModel(_) => "model",
            Self::EmptyPrompt => "prompt",
            Self::UnknownFlag(name) => name.as_str(),
            Self::MissingValue(field)
            | Self::DuplicateFlag(field)
            | Self::InvalidNumber { field, .. }
            | Self::OutOfRange { field, .. } => *field,
        }
    }
}

/// Generation models served by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Anything,
    Aom,
    Nemu,
}

impl Model {
    pub const ALL: [Model; 3] = [Model::Anything, Model::Aom, Model::Nemu];

    /// Identifier used in backend paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anything => "anything",
            Self::Aom => "aom",
            Self::Nemu => "nemu",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Anything => "Anything V4.5",
            Self::Aom => "AOM3",
            Self::Nemu => "Nemu (WIP)",
        }
    }

    /// Autocomplete: every model for an empty query, otherwise those whose
    /// display name contains the query (case-insensitive).
    pub fn choices(query: &str) -> Vec<Model> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Self::ALL.to_vec();
        }
        Self::ALL
            .into_iter()
            .filter(|m| m.display_name().to_lowercase().contains(&q))
            .collect()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == lower)
            .ok_or_else(|| ValidationError::UnknownModel(s.trim().to_string()))
    }
}

/// Optional knobs; anything left at its default is sent as the default.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub negative: String,
    pub cfg_scale: i64,
    pub denoise_strength: f64,
    pub seed: i64,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            negative: String::new(),
            cfg_scale: DEFAULT_CFG_SCALE as i64,
            denoise_strength: DEFAULT_DENOISE_STRENGTH,
            seed: UNSPECIFIED_SEED,
        }
    }
}

/// Validated generation parameters. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    model: Model,
    prompt: String,
    negative: String,
    cfg_scale: u8,
    denoise_strength: f64,
    seed: i64,
}

/// JSON body of a submission.
#[derive(Debug, Serialize, PartialEq)]
pub struct SubmitPayload<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub cfg_scale: u8,
    pub denoising_strength: f64,
    pub seed: i64,
}

impl RequestSpec {
    pub fn new(
        model: Model,
        prompt: impl Into<String>,
        options: RequestOptions,
    ) -> Result<Self, ValidationError> {
        let prompt = prompt.into().trim().to_string();
        if prompt.is_empty() || normalize_dashes(&prompt).starts_with(FLAG_PREFIX) {
            return Err(ValidationError::EmptyPrompt);
        }
        let cfg_scale = check_cfg_scale(options.cfg_scale)?;
        let denoise_strength = check_denoise_strength(options.denoise_strength)?;

        Ok(Self {
            model,
            prompt,
            negative: options.negative.trim().to_string(),
            cfg_scale,
            denoise_strength,
            seed: options.seed,
        })
    }

    /// Build from a model name and the raw text typed after it
    /// (`<prompt words> [--flag value...]`).
    pub fn parse(model: &str, raw: &str) -> Result<Self, ValidationError> {
        let model = model.parse::<Model>()?;
        let normalized = normalize_dashes(raw);
        let (prompt, flags) = split_prompt(&normalized);
        if prompt.is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        let options = parse_flags(flags)?;
        Self::new(model, prompt, options)
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn negative(&self) -> &str {
        &self.negative
    }

    pub fn cfg_scale(&self) -> u8 {
        self.cfg_scale
    }

    pub fn denoise_strength(&self) -> f64 {
        self.denoise_strength
    }

    /// Raw seed, `-1` when unspecified.
    pub fn seed(&self) -> i64 {
        self.seed
    }

    pub fn explicit_seed(&self) -> Option<i64> {
        (self.seed != UNSPECIFIED_SEED).then_some(self.seed)
    }

    pub fn submit_payload(&self) -> SubmitPayload<'_> {
        SubmitPayload {
            prompt: &self.prompt,
            negative_prompt: &self.negative,
            cfg_scale: self.cfg_scale,
            denoising_strength: self.denoise_strength,
            seed: self.seed,
        }
    }
}

/// Replace smart-punctuation dashes with the literal flag delimiter.
pub fn normalize_dashes(raw: &str) -> String {
    raw.replace(SMART_DASHES, FLAG_PREFIX)
}

/// Split at the first whitespace-separated token that starts a flag.
fn split_prompt(input: &str) -> (String, Vec<&str>) {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let first_flag = tokens
        .iter()
        .position(|t| t.starts_with(FLAG_PREFIX))
        .unwrap_or(tokens.len());
    let prompt = tokens[..first_flag].join(" ");
    (prompt, tokens[first_flag..].to_vec())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flag {
    Negative,
    CfgScale,
    DenoiseStrength,
    Seed,
}

impl Flag {
    fn lookup(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "negative" | "n" => Some(Self::Negative),
            "cfgscale" | "cfgs" | "cs" => Some(Self::CfgScale),
            "denoisestrength" | "denoisingstrength" | "ds" => Some(Self::DenoiseStrength),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Negative => "negative",
            Self::CfgScale => "cfgscale",
            Self::DenoiseStrength => "denoisestrength",
            Self::Seed => "seed",
        }
    }
}

fn parse_flags(tokens: Vec<&str>) -> Result<RequestOptions, ValidationError> {
    let mut groups: Vec<(Flag, Vec<&str>)> = Vec::new();
    for token in tokens {
        if let Some(name) = token.strip_prefix(FLAG_PREFIX) {
            let flag =
                Flag::lookup(name).ok_or_else(|| ValidationError::UnknownFlag(name.to_string()))?;
            if groups.iter().any(|(f, _)| *f == flag) {
                return Err(ValidationError::DuplicateFlag(flag.name()));
            }
            groups.push((flag, Vec::new()));
        } else if let Some((_, words)) = groups.last_mut() {
            words.push(token);
        }
    }

    let mut options = RequestOptions::default();
    for (flag, words) in groups {
        if words.is_empty() {
            return Err(ValidationError::MissingValue(flag.name()));
        }
        let value = words.join(" ");
        match flag {
            Flag::Negative => options.negative = value,
            Flag::CfgScale => options.cfg_scale = parse_number(flag, &value)?,
            Flag::DenoiseStrength => options.denoise_strength = parse_number(flag, &value)?,
            Flag::Seed => options.seed = parse_number(flag, &value)?,
        }
    }
    Ok(options)
}

fn parse_number<T: FromStr>(flag: Flag, value: &str) -> Result<T, ValidationError> {
    value.parse().map_err(|_| ValidationError::InvalidNumber {
        field: flag.name(),
        value: value.to_string(),
    })
}

fn check_cfg_scale(value: i64) -> Result<u8, ValidationError> {
    if !(CFG_SCALE_MIN..=CFG_SCALE_MAX).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field: "cfgscale",
            value: value.to_string(),
            min: CFG_SCALE_MIN.to_string(),
            max: CFG_SCALE_MAX.to_string(),
        });
    }
    Ok(value as u8)
}

fn check_denoise_strength(value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field: "denoisestrength",
            value: value.to_string(),
            min: "0.0".to_string(),
            max: "1.0".to_string(),
        });
    }
    Ok(value)
}
