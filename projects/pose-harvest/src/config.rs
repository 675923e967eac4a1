// Pose parameters: confidence levels and overlap thresholds
//
// Stored as `Key<TAB>Value` lines. Loaded once at startup and shared
// read-only between every device pipeline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Joint groups that carry their own confidence level.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointGroup {
    Nose,
    Head,
    Eye,
    Ear,
    Shoulder,
    Elbow,
    Wrist,
    Hip,
    Knee,
    Ankle,
}

impl JointGroup {
    pub const ALL: [JointGroup; 10] = [
        JointGroup::Nose,
        JointGroup::Head,
        JointGroup::Eye,
        JointGroup::Ear,
        JointGroup::Shoulder,
        JointGroup::Elbow,
        JointGroup::Wrist,
        JointGroup::Hip,
        JointGroup::Knee,
        JointGroup::Ankle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            JointGroup::Nose => "Nose",
            JointGroup::Head => "Head",
            JointGroup::Eye => "Eye",
            JointGroup::Ear => "Ear",
            JointGroup::Shoulder => "Shoulder",
            JointGroup::Elbow => "Elbow",
            JointGroup::Wrist => "Wrist",
            JointGroup::Hip => "Hip",
            JointGroup::Knee => "Knee",
            JointGroup::Ankle => "Ankle",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfidenceLevels {
    /// Minimum box confidence for a decoded candidate to be kept.
    pub bbox: f32,
    pub nose: f32,
    pub head: f32,
    pub eye: f32,
    pub ear: f32,
    pub shoulder: f32,
    pub elbow: f32,
    pub wrist: f32,
    pub hip: f32,
    pub knee: f32,
    pub ankle: f32,
}

impl Default for ConfidenceLevels {
    fn default() -> Self {
        Self {
            bbox: 0.16,
            nose: 0.6,
            head: 0.6,
            eye: 0.6,
            ear: 0.6,
            shoulder: 0.6,
            elbow: 0.6,
            wrist: 0.6,
            hip: 0.6,
            knee: 0.6,
            ankle: 0.6,
        }
    }
}

impl ConfidenceLevels {
    pub fn get(&self, group: JointGroup) -> f32 {
        match group {
            JointGroup::Nose => self.nose,
            JointGroup::Head => self.head,
            JointGroup::Eye => self.eye,
            JointGroup::Ear => self.ear,
            JointGroup::Shoulder => self.shoulder,
            JointGroup::Elbow => self.elbow,
            JointGroup::Wrist => self.wrist,
            JointGroup::Hip => self.hip,
            JointGroup::Knee => self.knee,
            JointGroup::Ankle => self.ankle,
        }
    }

    pub fn set(&mut self, group: JointGroup, level: f32) {
        let slot = match group {
            JointGroup::Nose => &mut self.nose,
            JointGroup::Head => &mut self.head,
            JointGroup::Eye => &mut self.eye,
            JointGroup::Ear => &mut self.ear,
            JointGroup::Shoulder => &mut self.shoulder,
            JointGroup::Elbow => &mut self.elbow,
            JointGroup::Wrist => &mut self.wrist,
            JointGroup::Hip => &mut self.hip,
            JointGroup::Knee => &mut self.knee,
            JointGroup::Ankle => &mut self.ankle,
        };
        *slot = level;
    }

    /// Sets every joint group to the same level. The box level is untouched.
    pub fn set_all_joints(&mut self, level: f32) {
        for group in JointGroup::ALL {
            self.set(group, level);
        }
    }
}

/// Overlap thresholds used by deduplication. A negative value disables that check.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OverlapThresholds {
    pub bbox: f32,
    pub torso: f32,
    pub upper_body: f32,
}

impl Default for OverlapThresholds {
    fn default() -> Self {
        Self {
            bbox: 0.8,
            torso: 0.8,
            upper_body: 0.8,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PoseParams {
    pub levels: ConfidenceLevels,
    pub overlaps: OverlapThresholds,
}

impl PoseParams {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file {:?}", path))?;
        Ok(Self::parse(&text))
    }

    /// Parses parameter text on top of the defaults.
    pub fn parse(text: &str) -> Self {
        let mut params = Self::default();
        for line in text.lines() {
            params.apply_line(line);
        }
        params
    }

    /// Applies one `Key<TAB>Value` line. Returns false when the line was ignored.
    pub fn apply_line(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches('\r');
        let mut parts = line.split('\t');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return false;
        };
        let Ok(value) = value.trim().parse::<f32>() else {
            return false;
        };

        let key = key.trim().to_ascii_lowercase();
        match key.as_str() {
            "confidencethreshold" => self.levels.bbox = value,
            "overlapbboxthreshold" => self.overlaps.bbox = value,
            "overlaptorsothreshold" | "overlaptolsothreshold" => self.overlaps.torso = value,
            "overlapupperbodythreshold" | "overlapshoulderthreshold" => {
                self.overlaps.upper_body = value
            }
            "confidencelevel" => self.levels.set_all_joints(value),
            other => {
                let group = other.strip_prefix("confidencelevel_").and_then(|name| {
                    JointGroup::ALL
                        .into_iter()
                        .find(|g| g.name().eq_ignore_ascii_case(name))
                });
                match group {
                    Some(group) => self.levels.set(group, value),
                    None => return false,
                }
            }
        }
        true
    }

    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("ConfidenceThreshold\t{}", self.levels.bbox),
            format!("OverlapBBoxThreshold\t{}", self.overlaps.bbox),
            format!("OverlapTorsoThreshold\t{}", self.overlaps.torso),
            format!("OverlapUpperBodyThreshold\t{}", self.overlaps.upper_body),
        ];
        for group in JointGroup::ALL {
            lines.push(format!(
                "ConfidenceLevel_{}\t{}",
                group.name(),
                self.levels.get(group)
            ));
        }
        lines
    }

    pub fn to_text(&self) -> String {
        self.to_lines().join("\r\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = PoseParams::default();
        assert_eq!(params.levels.bbox, 0.16);
        assert_eq!(params.overlaps.torso, 0.8);
        for group in JointGroup::ALL {
            assert_eq!(params.levels.get(group), 0.6);
        }
    }

    #[test]
    fn test_parse_known_keys_case_insensitive() {
        let text = "confidencethreshold\t0.3\r\nOverlapBBoxThreshold\t-1\nOVERLAPTOLSOTHRESHOLD\t0.5\nOverlapShoulderThreshold\t0.7\nConfidenceLevel_wrist\t0.25\n";
        let params = PoseParams::parse(text);
        assert_eq!(params.levels.bbox, 0.3);
        assert_eq!(params.overlaps.bbox, -1.0);
        assert_eq!(params.overlaps.torso, 0.5);
        assert_eq!(params.overlaps.upper_body, 0.7);
        assert_eq!(params.levels.wrist, 0.25);
        assert_eq!(params.levels.elbow, 0.6);
    }

    #[test]
    fn test_parse_ignores_unknown_and_malformed_lines() {
        let text = "Bogus\t1.0\nConfidenceThreshold 0.9\nConfidenceThreshold\tabc\nConfidenceLevel_Tail\t0.1\nOverlapBBoxThreshold\t0.1\textra\n\n";
        assert_eq!(PoseParams::parse(text), PoseParams::default());
    }

    #[test]
    fn test_confidence_level_sets_all_joint_groups() {
        let params = PoseParams::parse("ConfidenceLevel\t0.4\nConfidenceLevel_Knee\t0.9");
        assert_eq!(params.levels.nose, 0.4);
        assert_eq!(params.levels.ankle, 0.4);
        assert_eq!(params.levels.knee, 0.9);
        assert_eq!(params.levels.bbox, 0.16);
    }

    #[test]
    fn test_canonical_text_parses_back() {
        let mut params = PoseParams::default();
        params.levels.hip = 0.45;
        params.overlaps.upper_body = -1.0;
        let text = params.to_text();
        assert!(text.starts_with("ConfidenceThreshold\t0.16\r\n"));
        assert_eq!(PoseParams::parse(&text), params);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.txt");
        std::fs::write(&path, "OverlapTorsoThreshold\t0.65\n").unwrap();
        let params = PoseParams::load(&path).unwrap();
        assert_eq!(params.overlaps.torso, 0.65);
        assert!(PoseParams::load(&dir.path().join("missing.txt")).is_err());
    }
}
