use lcmswarp::AlignmentOptions;
use serde::{
    Deserialize,
    Serialize,
};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    pub input: Option<InputConfig>,
    #[serde(default)]
    pub alignment: AlignmentOptions,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InputConfig {
    pub baseline: PathBuf,
    pub alignee: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "input": {"baseline": "a.csv", "alignee": "b.csv"},
                "alignment": {"num_sections": 40, "calibration_type": "mz"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.alignment.num_sections, 40);
        assert_eq!(config.alignment.contraction_factor, 3);
        assert!(config.output.is_none());
    }
}
