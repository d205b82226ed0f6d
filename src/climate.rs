//! Thermostat entity: temperatures, HVAC mode and presets mapped onto
//! configured datapoints.

use crate::entity::{Dispatch, DpView, EntityAdapter, EntityHooks};
use crate::types::{DpValue, EntityKey};
use crate::{ConnectionManager, Result};

pub const TARGET_TEMPERATURE_DP: &str = "target_temperature_dp";
pub const CURRENT_TEMPERATURE_DP: &str = "current_temperature_dp";
pub const HVAC_MODE_DP: &str = "hvac_mode_dp";
pub const PRESET_MODE_DP: &str = "preset_mode_dp";
pub const MIN_TEMP_DP: &str = "min_temp_dp";
pub const MAX_TEMP_DP: &str = "max_temp_dp";
pub const PRECISION: &str = "precision";
pub const TEMPERATURE_STEP: &str = "temperature_step";
pub const TEMPERATURE_UNIT: &str = "temperature_unit";

/// Option keys holding datapoint indices, for
/// [`ConnectionManager::register_platform`].
pub const DP_OPTIONS: &[&str] = &[
    TARGET_TEMPERATURE_DP,
    CURRENT_TEMPERATURE_DP,
    HVAC_MODE_DP,
    PRESET_MODE_DP,
    MIN_TEMP_DP,
    MAX_TEMP_DP,
];

pub const PLATFORM: &str = "climate";

const DEFAULT_PRECISION: f64 = 0.1;
const DEFAULT_TEMPERATURE_STEP: f64 = 0.5;
const DEFAULT_MIN_TEMP: f64 = 7.0;
const DEFAULT_MAX_TEMP: f64 = 35.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacMode {
    Auto,
    Heat,
    Off,
}

impl HvacMode {
    pub fn as_dp_str(&self) -> &'static str {
        match self {
            HvacMode::Auto => "auto",
            HvacMode::Heat => "heat",
            HvacMode::Off => "off",
        }
    }

    pub fn from_dp_str(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(HvacMode::Auto),
            "heat" => Some(HvacMode::Heat),
            "off" => Some(HvacMode::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacAction {
    Heating,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Comfort,
    Eco,
    Away,
    Boost,
    Home,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Comfort,
        Preset::Eco,
        Preset::Away,
        Preset::Boost,
        Preset::Home,
    ];

    /// Value the device uses for this preset.
    pub fn as_dp_str(&self) -> &'static str {
        match self {
            Preset::Comfort => "comfort",
            Preset::Eco => "eco",
            Preset::Away => "holiday",
            Preset::Boost => "BOOST",
            Preset::Home => "manual",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Comfort => "comfort",
            Preset::Eco => "eco",
            Preset::Away => "away",
            Preset::Boost => "boost",
            Preset::Home => "home",
        }
    }

    /// Accepts the device value or the preset name.
    pub fn from_dp_str(s: &str) -> Option<Self> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_dp_str() == s)
            .or_else(|| Preset::ALL.into_iter().find(|p| p.name() == s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

/// Climate state as last reported. Temperatures are already scaled by the
/// configured precision; min/max are raw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Climate {
    pub state: Option<DpValue>,
    pub target_temperature: Option<f64>,
    pub current_temperature: Option<f64>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub hvac_mode: Option<String>,
    pub hvac_action: Option<HvacAction>,
    pub preset_mode: Option<String>,
}

fn precision_of(view: &DpView<'_>) -> f64 {
    view.config()
        .f64_option(PRECISION)
        .unwrap_or(DEFAULT_PRECISION)
}

impl EntityHooks for Climate {
    fn status_updated(&mut self, view: &DpView<'_>) {
        let precision = precision_of(view);
        let scaled = |key| view.dp_by_config(key).and_then(DpValue::as_f64);

        self.state = view.dp(view.key().dp).cloned();
        self.hvac_action = Some(match &self.state {
            Some(state) if state.is_truthy() => HvacAction::Heating,
            _ => HvacAction::Idle,
        });

        if view.has_config(TARGET_TEMPERATURE_DP) {
            self.target_temperature = scaled(TARGET_TEMPERATURE_DP).map(|t| t * precision);
        }
        if view.has_config(CURRENT_TEMPERATURE_DP) {
            self.current_temperature = scaled(CURRENT_TEMPERATURE_DP).map(|t| t * precision);
        }
        if view.has_config(MIN_TEMP_DP) {
            self.min_temp = scaled(MIN_TEMP_DP);
        }
        if view.has_config(MAX_TEMP_DP) {
            self.max_temp = scaled(MAX_TEMP_DP);
        }

        self.hvac_mode = if view.has_config(HVAC_MODE_DP) {
            view.dp_by_config(HVAC_MODE_DP)
                .and_then(DpValue::as_str)
                .map(str::to_string)
        } else {
            Some(HvacMode::Heat.as_dp_str().to_string())
        };

        if view.has_config(PRESET_MODE_DP) {
            self.preset_mode = view
                .dp_by_config(PRESET_MODE_DP)
                .and_then(DpValue::as_str)
                .map(str::to_string);
        }
    }
}

impl EntityAdapter<Climate> {
    pub fn climate(device: &ConnectionManager, key: EntityKey) -> Result<Self> {
        Self::new(device, key, Climate::default())
    }

    pub fn precision(&self) -> f64 {
        self.config()
            .f64_option(PRECISION)
            .unwrap_or(DEFAULT_PRECISION)
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        match self.config().str_option(TEMPERATURE_UNIT) {
            Some("fahrenheit") => TemperatureUnit::Fahrenheit,
            _ => TemperatureUnit::Celsius,
        }
    }

    pub fn target_temperature_step(&self) -> f64 {
        self.config()
            .f64_option(TEMPERATURE_STEP)
            .unwrap_or(DEFAULT_TEMPERATURE_STEP)
    }

    pub fn supports_target_temperature(&self) -> bool {
        self.has_config(TARGET_TEMPERATURE_DP)
    }

    pub fn supports_preset_mode(&self) -> bool {
        self.has_config(PRESET_MODE_DP)
    }

    pub fn supports_hvac_mode(&self) -> bool {
        self.has_config(HVAC_MODE_DP)
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.with_hooks(|c| c.target_temperature)
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.with_hooks(|c| c.current_temperature)
    }

    /// Reported minimum, or the default when unset or zero.
    pub fn min_temp(&self) -> f64 {
        self.with_hooks(|c| c.min_temp)
            .filter(|t| *t != 0.0)
            .unwrap_or(DEFAULT_MIN_TEMP)
    }

    pub fn max_temp(&self) -> f64 {
        self.with_hooks(|c| c.max_temp)
            .filter(|t| *t != 0.0)
            .unwrap_or(DEFAULT_MAX_TEMP)
    }

    pub fn hvac_action(&self) -> Option<HvacAction> {
        self.with_hooks(|c| c.hvac_action)
    }

    /// Sub-device thermostats cannot be switched off.
    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        if !self.supports_hvac_mode() {
            return Vec::new();
        }
        let mut modes = vec![HvacMode::Auto, HvacMode::Heat];
        if self.key().cid.is_none() {
            modes.push(HvacMode::Off);
        }
        modes
    }

    /// The `manual` preset reads as heat; otherwise the reported mode if it is
    /// one this entity offers, else heat.
    pub fn hvac_mode(&self) -> HvacMode {
        let (mode, preset) = self.with_hooks(|c| (c.hvac_mode.clone(), c.preset_mode.clone()));
        if preset.as_deref() == Some(Preset::Home.as_dp_str()) {
            return HvacMode::Heat;
        }
        mode.as_deref()
            .and_then(HvacMode::from_dp_str)
            .filter(|m| self.hvac_modes().contains(m))
            .unwrap_or(HvacMode::Heat)
    }

    pub fn preset_modes(&self) -> Option<Vec<Preset>> {
        self.supports_preset_mode().then(|| Preset::ALL.to_vec())
    }

    /// `None` when presets are not configured; unknown device values read as
    /// [`Preset::Home`].
    pub fn preset_mode(&self) -> Option<Preset> {
        if !self.supports_preset_mode() {
            return None;
        }
        let raw = self.with_hooks(|c| c.preset_mode.clone());
        Some(
            raw.as_deref()
                .and_then(Preset::from_dp_str)
                .unwrap_or(Preset::Home),
        )
    }

    pub async fn set_temperature(&self, temperature: f64) -> Dispatch {
        let Some(dp) = self.config().dp_option(TARGET_TEMPERATURE_DP) else {
            return Dispatch::Unsupported;
        };
        let raw = (temperature / self.precision()).round() as i64;
        self.set_dp(raw, dp).await;
        Dispatch::Sent
    }

    /// Heat is sent as the `manual` preset.
    pub async fn set_hvac_mode(&self, mode: HvacMode) -> Dispatch {
        if mode == HvacMode::Heat {
            return self.set_preset_mode(Preset::Home).await;
        }
        let Some(dp) = self.config().dp_option(HVAC_MODE_DP) else {
            return Dispatch::Unsupported;
        };
        self.set_dp(mode.as_dp_str(), dp).await;
        Dispatch::Sent
    }

    pub async fn set_preset_mode(&self, preset: Preset) -> Dispatch {
        let Some(dp) = self.config().dp_option(PRESET_MODE_DP) else {
            return Dispatch::Unsupported;
        };
        self.set_dp(preset.as_dp_str(), dp).await;
        Dispatch::Sent
    }
}
