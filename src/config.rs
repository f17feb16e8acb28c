//! Compilation options and their environment overrides.
//!
//! | variable           | format                                   |
//! |--------------------|------------------------------------------|
//! | `INFERMIR_PLACES`  | `target/precision/layout,...` best first |
//! | `INFERMIR_PICK`    | subset of `target,precision,layout`      |
//! | `INFERMIR_PASSES`  | pass names replacing the default list    |
//!
//! Unset or blank variables leave the corresponding option untouched.

use crate::core::{CompileError, CompileResult, DataLayoutType, Place, PrecisionType, TargetType};
use crate::kernel::KernelPickFactor;
use std::env;

pub const PLACES_ENV: &str = "INFERMIR_PLACES";
pub const PICK_ENV: &str = "INFERMIR_PICK";
pub const PASSES_ENV: &str = "INFERMIR_PASSES";

/// Places every predictor can fall back to.
pub const HOST_FALLBACK_PLACES: [Place; 2] = [
    Place::host_any(),
    Place::new(TargetType::Host, PrecisionType::Float, DataLayoutType::Nchw),
];

/// What to compile for and how.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileOptions {
    /// Ranked placements, best first.
    pub valid_places: Vec<Place>,
    pub pick_factor: KernelPickFactor,
    /// Pass names to run; empty selects the default pipeline.
    pub passes: Vec<String>,
}

impl CompileOptions {
    pub fn new(valid_places: Vec<Place>) -> Self {
        Self {
            valid_places,
            ..Self::default()
        }
    }

    pub fn with_pick_factor(mut self, pick_factor: KernelPickFactor) -> Self {
        self.pick_factor = pick_factor;
        self
    }

    pub fn with_passes<I, S>(mut self, passes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passes = passes.into_iter().map(Into::into).collect();
        self
    }

    /// Append the host places missing from the list, keeping the caller's order first.
    pub fn with_host_fallbacks(mut self) -> Self {
        for place in HOST_FALLBACK_PLACES {
            if !self.valid_places.contains(&place) {
                self.valid_places.push(place);
            }
        }
        self
    }

    /// Options taken from the environment alone.
    pub fn from_env() -> CompileResult<Self> {
        Self::default().overlay_env()
    }

    /// Replace every option whose environment variable is set.
    pub fn overlay_env(mut self) -> CompileResult<Self> {
        if let Some(places) = env_value(PLACES_ENV) {
            self.valid_places = parse_places(&places)?;
        }
        if let Some(pick) = env_value(PICK_ENV) {
            self.pick_factor = parse_pick_factor(&pick)?;
        }
        if let Some(passes) = env_value(PASSES_ENV) {
            self.passes = parse_pass_list(&passes);
        }
        log::debug!(
            "Compile options: {} places, {} passes",
            self.valid_places.len(),
            self.passes.len()
        );
        Ok(self)
    }
}

fn env_value(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// Parse `cuda/float/NCHW, host/any/any`.
pub fn parse_places(text: &str) -> CompileResult<Vec<Place>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<Place>)
        .collect()
}

/// Parse `target,precision` and friends.
pub fn parse_pick_factor(text: &str) -> CompileResult<KernelPickFactor> {
    let mut factor = KernelPickFactor::none();
    for item in text.split(',').map(|s| s.trim().to_ascii_lowercase()) {
        factor = match item.as_str() {
            "" => factor,
            "target" => factor.consider_target(),
            "precision" => factor.consider_precision(),
            "layout" | "data_layout" => factor.consider_data_layout(),
            "all" => KernelPickFactor::all(),
            other => {
                return Err(CompileError::InvalidPlace {
                    text: other.to_string(),
                    reason: "unknown kernel pick factor".into(),
                })
            }
        };
    }
    Ok(factor)
}

pub fn parse_pass_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
