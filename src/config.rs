use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "INOVATECD_LOG";
pub const WORKSPACE_ENV: &str = "INOVATECD_WORKSPACE";
pub const GRADING_SETTINGS_KEY: &str = "settings.grading";

/// Log filter: `INOVATECD_LOG`, then `RUST_LOG`, then info for this crate.
pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("inovatecd=info"))
}

/// Workspace opened at startup, if any.
pub fn startup_workspace() -> Option<PathBuf> {
    std::env::var_os(WORKSPACE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// What happens when a student submits an activity they already submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResubmissionPolicy {
    /// Keep every submission.
    Allow,
    /// Refuse the new one.
    Reject,
    /// Delete the earlier ones, keep the new one.
    Replace,
}

impl ResubmissionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "reject" => Some(Self::Reject),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Reject => "reject",
            Self::Replace => "replace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradingSettings {
    pub resubmission_policy: ResubmissionPolicy,
    pub xp_per_level: u32,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            resubmission_policy: ResubmissionPolicy::Allow,
            xp_per_level: 100,
        }
    }
}

impl GradingSettings {
    pub fn to_json(self) -> Value {
        json!({
            "resubmissionPolicy": self.resubmission_policy.as_str(),
            "xpPerLevel": self.xp_per_level,
        })
    }

    /// Applies a camelCase patch. Unknown keys and bad values are errors and
    /// leave `self` unchanged.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = *self;
        for (k, v) in patch {
            match k.as_str() {
                "resubmissionPolicy" => {
                    let s = v
                        .as_str()
                        .ok_or_else(|| format!("{} must be string", k))?;
                    next.resubmission_policy = ResubmissionPolicy::parse(s).ok_or_else(|| {
                        "resubmissionPolicy must be one of: allow, reject, replace".to_string()
                    })?;
                }
                "xpPerLevel" => {
                    let n = v
                        .as_i64()
                        .ok_or_else(|| format!("{} must be integer", k))?;
                    if !(1..=100_000).contains(&n) {
                        return Err(format!("{} must be in 1..=100000", k));
                    }
                    next.xp_per_level = n as u32;
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            }
        }
        *self = next;
        Ok(())
    }

    /// Reads a stored section over the defaults. Bad historical values are
    /// logged and skipped rather than blocking the workspace.
    pub fn from_stored(saved: Option<&Value>) -> Self {
        let (out, rejected) = Self::overlay_stored(saved);
        for (key, error) in rejected {
            tracing::warn!(key = %key, error = %error, "ignoring stored grading setting");
        }
        out
    }

    /// Applies stored fields one at a time; returns the keys that did not apply.
    fn overlay_stored(saved: Option<&Value>) -> (Self, Vec<(String, String)>) {
        let mut out = Self::default();
        let mut rejected = Vec::new();
        if let Some(obj) = saved.and_then(|v| v.as_object()) {
            for (k, v) in obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(e) = out.merge_patch(&single) {
                    rejected.push((k.clone(), e));
                }
            }
        }
        (out, rejected)
    }
}
