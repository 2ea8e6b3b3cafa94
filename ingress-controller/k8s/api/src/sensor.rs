use std::{fmt, str::FromStr};

/// The subset of the argoproj.io Sensor spec this controller reads.
#[derive(
    Clone, Debug, Default, kube::CustomResource, serde::Deserialize, serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(group = "argoproj.io", version = "v1alpha1", kind = "Sensor", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct SensorSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<Trigger>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TriggerTemplate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Present when the trigger creates Kubernetes resources. The body is
    /// opaque to this controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s: Option<serde_json::Value>,
}

/// A request quota over a fixed unit of time.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    #[serde(default)]
    pub unit: RateLimitUnit,

    #[serde(default)]
    pub requests_per_unit: i32,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize,
    schemars::JsonSchema,
)]
pub enum RateLimitUnit {
    #[default]
    Second,
    Minute,
    Hour,
}

impl RateLimitUnit {
    /// The unit's length in seconds.
    pub fn seconds(&self) -> f64 {
        match self {
            Self::Second => 1.0,
            Self::Minute => 60.0,
            Self::Hour => 3600.0,
        }
    }
}

impl fmt::Display for RateLimitUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Second => "Second".fmt(f),
            Self::Minute => "Minute".fmt(f),
            Self::Hour => "Hour".fmt(f),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InvalidRateLimitUnit(String);

impl fmt::Display for InvalidRateLimitUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid rate limit unit: {}", self.0)
    }
}

impl std::error::Error for InvalidRateLimitUnit {}

impl FromStr for RateLimitUnit {
    type Err = InvalidRateLimitUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Second" => Ok(Self::Second),
            "Minute" => Ok(Self::Minute),
            "Hour" => Ok(Self::Hour),
            other => Err(InvalidRateLimitUnit(other.to_string())),
        }
    }
}
