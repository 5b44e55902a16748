//! Provisioning parameters - raw caller input and its validated form.
//!
//! `RawParameters` is what the configuration layer hands us (strings, because
//! env files and process variables are strings). `validate()` turns it into an
//! immutable `Parameters` or fails with a `ValidationError` naming the field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

pub const BASE_NAME_MIN: usize = 3;
pub const BASE_NAME_MAX: usize = 22;
pub const MAX_INSTANCES_MIN: u32 = 40;
pub const MAX_INSTANCES_MAX: u32 = 1000;

// ---------------------------------------------------------------------------
// ComputeTier
// ---------------------------------------------------------------------------

/// Compute tier for the service plan. Each variant carries its own naming and
/// SKU policy (see `derive` and `graph::builder`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputeTier {
    #[serde(rename = "FC1")]
    FlexConsumption,
}

impl ComputeTier {
    pub const ALLOWED: &'static [&'static str] = &["FC1"];

    pub fn sku_name(&self) -> &'static str {
        match self {
            ComputeTier::FlexConsumption => "FC1",
        }
    }

    pub fn sku_tier(&self) -> &'static str {
        match self {
            ComputeTier::FlexConsumption => "FlexConsumption",
        }
    }

    /// Name of the service plan for a given base name.
    pub fn plan_name(&self, base_name: &str) -> String {
        match self {
            ComputeTier::FlexConsumption => format!("{}-plan", base_name),
        }
    }
}

impl FromStr for ComputeTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "FC1" => Ok(ComputeTier::FlexConsumption),
            other => Err(format!(
                "unsupported tier '{}' (allowed: {})",
                other,
                Self::ALLOWED.join(", ")
            )),
        }
    }
}

impl fmt::Display for ComputeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sku_name())
    }
}

// ---------------------------------------------------------------------------
// InstanceMemory
// ---------------------------------------------------------------------------

/// Per-instance memory size. Only the sizes the consumption plan offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum InstanceMemory {
    Mb512,
    Mb2048,
    Mb4096,
}

impl InstanceMemory {
    pub const ALLOWED: &'static [u32] = &[512, 2048, 4096];

    pub fn megabytes(&self) -> u32 {
        match self {
            InstanceMemory::Mb512 => 512,
            InstanceMemory::Mb2048 => 2048,
            InstanceMemory::Mb4096 => 4096,
        }
    }
}

impl TryFrom<u32> for InstanceMemory {
    type Error = String;

    fn try_from(mb: u32) -> Result<Self, Self::Error> {
        match mb {
            512 => Ok(InstanceMemory::Mb512),
            2048 => Ok(InstanceMemory::Mb2048),
            4096 => Ok(InstanceMemory::Mb4096),
            other => Err(format!(
                "unsupported memory size {} MB (allowed: 512, 2048, 4096)",
                other
            )),
        }
    }
}

impl From<InstanceMemory> for u32 {
    fn from(m: InstanceMemory) -> u32 {
        m.megabytes()
    }
}

// ---------------------------------------------------------------------------
// RawParameters / Parameters
// ---------------------------------------------------------------------------

/// Unvalidated parameters as supplied by the configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawParameters {
    #[serde(default)]
    pub base_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tier: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub instance_memory_mb: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub max_instance_count: String,
}

/// YAML writes `2048` as a number; keep it as the string the validator expects.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
    }
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(s) => s,
        Scalar::Int(n) => n.to_string(),
    })
}

/// Validated, immutable parameters for one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameters {
    pub base_name: String,
    pub location: String,
    pub tier: ComputeTier,
    pub instance_memory: InstanceMemory,
    pub max_instance_count: u32,
}

impl RawParameters {
    pub fn new(
        base_name: &str,
        location: &str,
        tier: &str,
        instance_memory_mb: &str,
        max_instance_count: &str,
    ) -> Self {
        RawParameters {
            base_name: base_name.to_string(),
            location: location.to_string(),
            tier: tier.to_string(),
            instance_memory_mb: instance_memory_mb.to_string(),
            max_instance_count: max_instance_count.to_string(),
        }
    }

    /// Check every field and produce the typed `Parameters`.
    pub fn validate(&self) -> Result<Parameters, ValidationError> {
        let base_name = self.base_name.trim();
        validate_base_name(base_name)?;

        let location = self.location.trim();
        if location.is_empty() {
            return Err(ValidationError::new("location", location, "must not be empty"));
        }
        if !location.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return Err(ValidationError::new(
                "location",
                location,
                "must contain only lowercase letters and digits",
            ));
        }

        let tier = self
            .tier
            .parse::<ComputeTier>()
            .map_err(|reason| ValidationError::new("tier", &self.tier, &reason))?;

        let memory_mb: u32 = self.instance_memory_mb.trim().parse().map_err(|_| {
            ValidationError::new("instance_memory_mb", &self.instance_memory_mb, "not a number")
        })?;
        let instance_memory = InstanceMemory::try_from(memory_mb).map_err(|reason| {
            ValidationError::new("instance_memory_mb", &self.instance_memory_mb, &reason)
        })?;

        let max_instance_count: u32 = self.max_instance_count.trim().parse().map_err(|_| {
            ValidationError::new("max_instance_count", &self.max_instance_count, "not a number")
        })?;
        if !(MAX_INSTANCES_MIN..=MAX_INSTANCES_MAX).contains(&max_instance_count) {
            return Err(ValidationError::new(
                "max_instance_count",
                &self.max_instance_count,
                &format!("must be between {} and {}", MAX_INSTANCES_MIN, MAX_INSTANCES_MAX),
            ));
        }

        Ok(Parameters {
            base_name: base_name.to_string(),
            location: location.to_string(),
            tier,
            instance_memory,
            max_instance_count,
        })
    }
}

/// The base name seeds globally-unique names, including the storage account
/// (`{base}sa`, lowercase alphanumeric, at most 24 characters).
pub fn validate_base_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if !(BASE_NAME_MIN..=BASE_NAME_MAX).contains(&len) {
        return Err(ValidationError::new(
            "base_name",
            name,
            &format!("length must be between {} and {}", BASE_NAME_MIN, BASE_NAME_MAX),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        return Err(ValidationError::new(
            "base_name",
            name,
            "must contain only lowercase letters and digits",
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(ValidationError::new("base_name", name, "must start with a letter"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Where resources land: subscription and resource group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub resource_group: String,
}

impl Target {
    pub fn new(subscription_id: &str, resource_group: &str) -> Self {
        Target {
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.subscription_id.trim().is_empty() {
            return Err(ValidationError::new("subscription_id", "", "must not be empty"));
        }
        if self.resource_group.trim().is_empty() {
            return Err(ValidationError::new("resource_group", "", "must not be empty"));
        }
        Ok(())
    }

    pub fn resource_group_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(base: &str) -> RawParameters {
        RawParameters::new(base, "eastus", "FC1", "2048", "40")
    }

    #[test]
    fn numeric_yaml_fields_accepted() {
        let yaml = "base_name: hragent01\nlocation: eastus\ntier: FC1\ninstance_memory_mb: 2048\nmax_instance_count: \"40\"\n";
        let r: RawParameters = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(r.instance_memory_mb, "2048");
        assert_eq!(r.max_instance_count, "40");
        assert!(r.validate().is_ok());
    }

    #[test]
    fn valid_parameters_parse() {
        let p = raw("hragent01").validate().unwrap();
        assert_eq!(p.base_name, "hragent01");
        assert_eq!(p.tier, ComputeTier::FlexConsumption);
        assert_eq!(p.instance_memory, InstanceMemory::Mb2048);
        assert_eq!(p.max_instance_count, 40);
    }

    #[test]
    fn base_name_too_short() {
        let err = raw("ab").validate().unwrap_err();
        assert_eq!(err.field, "base_name");
    }

    #[test]
    fn base_name_too_long() {
        let err = raw(&"a".repeat(23)).validate().unwrap_err();
        assert_eq!(err.field, "base_name");
    }

    #[test]
    fn base_name_boundaries_accepted() {
        assert!(raw("abc").validate().is_ok());
        assert!(raw(&"a".repeat(22)).validate().is_ok());
    }

    #[test]
    fn base_name_rejects_uppercase_and_symbols() {
        for bad in ["HRagent", "hr-agent", "hr_agent", "hr agent", "1hragent"] {
            let err = raw(bad).validate().unwrap_err();
            assert_eq!(err.field, "base_name", "expected rejection of {:?}", bad);
        }
    }

    #[test]
    fn unknown_tier_rejected() {
        let r = RawParameters::new("hragent01", "eastus", "Y1", "2048", "40");
        let err = r.validate().unwrap_err();
        assert_eq!(err.field, "tier");
        assert!(err.reason.contains("FC1"));
    }

    #[test]
    fn memory_outside_enumeration_rejected() {
        let r = RawParameters::new("hragent01", "eastus", "FC1", "1024", "40");
        assert_eq!(r.validate().unwrap_err().field, "instance_memory_mb");
        let r = RawParameters::new("hragent01", "eastus", "FC1", "lots", "40");
        assert_eq!(r.validate().unwrap_err().field, "instance_memory_mb");
    }

    #[test]
    fn instance_count_bounds() {
        let r = RawParameters::new("hragent01", "eastus", "FC1", "512", "39");
        assert_eq!(r.validate().unwrap_err().field, "max_instance_count");
        let r = RawParameters::new("hragent01", "eastus", "FC1", "512", "1001");
        assert_eq!(r.validate().unwrap_err().field, "max_instance_count");
        let r = RawParameters::new("hragent01", "eastus", "FC1", "512", "1000");
        assert!(r.validate().is_ok());
    }

    #[test]
    fn empty_location_rejected() {
        let r = RawParameters::new("hragent01", "", "FC1", "512", "40");
        assert_eq!(r.validate().unwrap_err().field, "location");
    }

    #[test]
    fn tier_serde_uses_sku_name() {
        let json = serde_json::to_string(&ComputeTier::FlexConsumption).unwrap();
        assert_eq!(json, "\"FC1\"");
    }

    #[test]
    fn target_requires_both_fields() {
        assert!(Target::new("sub", "rg").validate().is_ok());
        assert_eq!(Target::new("", "rg").validate().unwrap_err().field, "subscription_id");
        assert_eq!(Target::new("sub", " ").validate().unwrap_err().field, "resource_group");
    }
}
