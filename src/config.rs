// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Runtime configuration.

A [Config] is usually built with [Config::from_env], which starts from the defaults and then
applies these environment variables:

| Variable | Effect |
|---|---|
| `RENDERER_FORCE_SOFTWARE` | select the software (WARP) adapter |
| `RENDERER_DEBUG` | enable the backend debug layer |
| `RENDERER_FEATURE_LEVEL` | pin the feature level, `11_0` through `12_2` |

A flag variable is considered set when it is non-empty and not `0`.
*/

use crate::error::Error;
use crate::graphics::{MAX_VERTEX_FLOAT_COUNT, VERTEX_FLOAT_COUNT};
use std::fmt::Display;
use std::str::FromStr;

pub const ENV_FORCE_SOFTWARE: &str = "RENDERER_FORCE_SOFTWARE";
pub const ENV_DEBUG: &str = "RENDERER_DEBUG";
pub const ENV_FEATURE_LEVEL: &str = "RENDERER_FEATURE_LEVEL";

/// Minimum hardware capability requested from the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FeatureLevel {
    #[default]
    L11_0,
    L11_1,
    L12_0,
    L12_1,
    L12_2,
}

impl FromStr for FeatureLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "11_0" => Ok(FeatureLevel::L11_0),
            "11_1" => Ok(FeatureLevel::L11_1),
            "12_0" => Ok(FeatureLevel::L12_0),
            "12_1" => Ok(FeatureLevel::L12_1),
            "12_2" => Ok(FeatureLevel::L12_2),
            other => Err(Error::InvalidArgument(format!(
                "unknown feature level {other:?}"
            ))),
        }
    }
}

impl Display for FeatureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FeatureLevel::L11_0 => "11_0",
            FeatureLevel::L11_1 => "11_1",
            FeatureLevel::L12_0 => "12_0",
            FeatureLevel::L12_1 => "12_1",
            FeatureLevel::L12_2 => "12_2",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Select the software adapter instead of hardware.
    pub use_warp: bool,
    /// Enable backend validation.
    pub use_debug_layer: bool,
    /// Throttle presents to the display refresh.  Also makes end-of-frame flushes synchronous.
    pub vsync: bool,
    /// Compose the screen with per-pixel alpha.
    pub transparent: bool,
    pub feature_level: FeatureLevel,
    /// Floats per vertex: position, texcoord, color, then any custom float-4 slots.
    pub vertex_float_count: usize,
    /// Capacity of one vertex upload chunk, in floats.
    pub max_vertex_float_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            use_warp: false,
            use_debug_layer: false,
            vsync: true,
            transparent: false,
            feature_level: FeatureLevel::default(),
            vertex_float_count: VERTEX_FLOAT_COUNT,
            max_vertex_float_count: MAX_VERTEX_FLOAT_COUNT,
        }
    }
}

fn flag_set(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && v != "0"
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::default().with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup; [Config::from_env] uses the process environment.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_FORCE_SOFTWARE) {
            self.use_warp = flag_set(&v);
        }
        if let Some(v) = lookup(ENV_DEBUG) {
            self.use_debug_layer = flag_set(&v);
        }
        if let Some(v) = lookup(ENV_FEATURE_LEVEL) {
            self.feature_level = v.parse()?;
        }
        logwise::info_sync!(
            "config: warp={warp} debug={debug} feature_level={level}",
            warp = logwise::privacy::LogIt(&self.use_warp),
            debug = logwise::privacy::LogIt(&self.use_debug_layer),
            level = self.feature_level.to_string()
        );
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.vertex_float_count < 8 || self.vertex_float_count % 4 != 0 {
            return Err(Error::InvalidArgument(format!(
                "vertex_float_count must be a multiple of 4 and at least 8, was {}",
                self.vertex_float_count
            )));
        }
        if self.max_vertex_float_count == 0
            || self.max_vertex_float_count % self.vertex_float_count != 0
        {
            return Err(Error::InvalidArgument(format!(
                "max_vertex_float_count {} is not a positive multiple of {}",
                self.max_vertex_float_count, self.vertex_float_count
            )));
        }
        let platform_limit = crate::graphics::max_vertex_count(self.vertex_float_count)
            .saturating_mul(self.vertex_float_count);
        if self.max_vertex_float_count > platform_limit {
            return Err(Error::InvalidArgument(format!(
                "max_vertex_float_count {} exceeds the platform limit {}",
                self.max_vertex_float_count, platform_limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let c = Config::default();
        assert!(c.vsync);
        assert!(!c.use_warp);
        assert_eq!(c.feature_level, FeatureLevel::L11_0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let c = Config::default()
            .with_env_lookup(lookup(&[
                (ENV_FORCE_SOFTWARE, "1"),
                (ENV_DEBUG, "0"),
                (ENV_FEATURE_LEVEL, "12_1"),
            ]))
            .unwrap();
        assert!(c.use_warp);
        assert!(!c.use_debug_layer);
        assert_eq!(c.feature_level, FeatureLevel::L12_1);
    }

    #[test]
    fn bad_feature_level() {
        let r = Config::default().with_env_lookup(lookup(&[(ENV_FEATURE_LEVEL, "13_0")]));
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn vertex_layout_validation() {
        let mut c = Config::default();
        c.vertex_float_count = 10;
        assert!(c.validate().is_err());
        c.vertex_float_count = 12;
        c.max_vertex_float_count = 36;
        assert!(c.validate().is_ok());
        c.max_vertex_float_count = 32;
        assert!(c.validate().is_err());
    }
}
