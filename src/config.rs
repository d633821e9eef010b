//! 配置
//!
//! 全部参数集中在一个 TOML 文件里，缺省字段取默认值

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ai::context::PatientContext;
use crate::ai::types::LiveConfig;
use crate::core::pipeline::AnalysisConfig;
use crate::core::session::SessionConfig;
use crate::core::tracker::TrackerConfig;
use crate::core::uplink::UplinkConfig;
use crate::error::{CoachError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub analysis: AnalysisConfig,
    pub tracker: TrackerConfig,
    pub uplink: UplinkConfig,
    pub live: LiveConfig,
    pub session: SessionConfig,
    /// 只读的患者数据
    pub patient: PatientContext,
}

impl CoachConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| CoachError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| CoachError::Config(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| CoachError::Config(e.to_string()))?;
        fs::write(path.as_ref(), content).map_err(|e| CoachError::Config(e.to_string()))
    }
}
