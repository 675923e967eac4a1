// Run artifact definitions
//
// `Pose.csv` holds one row per detected person per frame. Values are rounded
// to integers; missing features keep their sentinel.

use crate::config::ConfidenceLevels;
use crate::pipeline::pose::{Joint, PoseCandidate};
use serde::{Deserialize, Serialize};

/// Column order of `Pose.csv`.
pub const REPORT_HEADER: [&str; 37] = [
    "filename",
    "frame",
    "Bbox.X",
    "Bbox.Y",
    "Bbox.W",
    "Bbox.H",
    "Head.X",
    "Head.Y",
    "WristLeft.X",
    "WristLeft.Y",
    "WristRight.X",
    "WristRight.Y",
    "ElbowLeftAngle",
    "ElbowLeftLength",
    "WristLeftLength",
    "ElbowRightAngle",
    "ElbowRightLength",
    "WristRightLength",
    "KneeLeftAngle",
    "KneeLeftLength",
    "AnkleLeftLength",
    "KneeRightAngle",
    "KneeRightLength",
    "AnkleRightLength",
    "EyeWidth",
    "EarWidth",
    "ShoulderWidth",
    "HipWidth",
    "TorsoLength",
    "HeadYawAngle",
    "TorsoSlope",
    "ShoulderSlope",
    "ThighLeftTorsoAngle",
    "ThighRightTorsoAngle",
    "ArmLeftTorsoAngle",
    "ArmRightTorsoAngle",
    "Label",
];

/// Label written for every row; labelling happens downstream.
pub const UNLABELLED: i32 = -1;

/// One `Pose.csv` row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PoseRecord {
    pub filename: String,
    pub frame: usize,
    #[serde(rename = "Bbox.X")]
    pub bbox_x: i64,
    #[serde(rename = "Bbox.Y")]
    pub bbox_y: i64,
    #[serde(rename = "Bbox.W")]
    pub bbox_w: i64,
    #[serde(rename = "Bbox.H")]
    pub bbox_h: i64,
    #[serde(rename = "Head.X")]
    pub head_x: i64,
    #[serde(rename = "Head.Y")]
    pub head_y: i64,
    #[serde(rename = "WristLeft.X")]
    pub wrist_left_x: i64,
    #[serde(rename = "WristLeft.Y")]
    pub wrist_left_y: i64,
    #[serde(rename = "WristRight.X")]
    pub wrist_right_x: i64,
    #[serde(rename = "WristRight.Y")]
    pub wrist_right_y: i64,
    #[serde(rename = "ElbowLeftAngle")]
    pub elbow_left_angle: i64,
    #[serde(rename = "ElbowLeftLength")]
    pub elbow_left_length: i64,
    #[serde(rename = "WristLeftLength")]
    pub wrist_left_length: i64,
    #[serde(rename = "ElbowRightAngle")]
    pub elbow_right_angle: i64,
    #[serde(rename = "ElbowRightLength")]
    pub elbow_right_length: i64,
    #[serde(rename = "WristRightLength")]
    pub wrist_right_length: i64,
    #[serde(rename = "KneeLeftAngle")]
    pub knee_left_angle: i64,
    #[serde(rename = "KneeLeftLength")]
    pub knee_left_length: i64,
    #[serde(rename = "AnkleLeftLength")]
    pub ankle_left_length: i64,
    #[serde(rename = "KneeRightAngle")]
    pub knee_right_angle: i64,
    #[serde(rename = "KneeRightLength")]
    pub knee_right_length: i64,
    #[serde(rename = "AnkleRightLength")]
    pub ankle_right_length: i64,
    #[serde(rename = "EyeWidth")]
    pub eye_width: i64,
    #[serde(rename = "EarWidth")]
    pub ear_width: i64,
    #[serde(rename = "ShoulderWidth")]
    pub shoulder_width: i64,
    #[serde(rename = "HipWidth")]
    pub hip_width: i64,
    #[serde(rename = "TorsoLength")]
    pub torso_length: i64,
    #[serde(rename = "HeadYawAngle")]
    pub head_yaw_angle: i64,
    #[serde(rename = "TorsoSlope")]
    pub torso_slope: i64,
    #[serde(rename = "ShoulderSlope")]
    pub shoulder_slope: i64,
    #[serde(rename = "ThighLeftTorsoAngle")]
    pub thigh_left_torso_angle: i64,
    #[serde(rename = "ThighRightTorsoAngle")]
    pub thigh_right_torso_angle: i64,
    #[serde(rename = "ArmLeftTorsoAngle")]
    pub arm_left_torso_angle: i64,
    #[serde(rename = "ArmRightTorsoAngle")]
    pub arm_right_torso_angle: i64,
    #[serde(rename = "Label")]
    pub label: i32,
}

/// Rounds half away from zero.
fn round(value: f32) -> i64 {
    value.round() as i64
}

impl PoseRecord {
    pub fn new(
        filename: &str,
        frame: usize,
        pose: &PoseCandidate,
        levels: &ConfidenceLevels,
    ) -> Self {
        let head = pose.skeleton.head(levels);
        let wrist_left = pose.skeleton.get(Joint::LeftWrist);
        let wrist_right = pose.skeleton.get(Joint::RightWrist);
        let f = pose.features(levels);

        Self {
            filename: filename.to_string(),
            frame,
            bbox_x: round(pose.bbox.center_x),
            bbox_y: round(pose.bbox.center_y),
            bbox_w: round(pose.bbox.width),
            bbox_h: round(pose.bbox.height),
            head_x: round(head.x),
            head_y: round(head.y),
            wrist_left_x: round(wrist_left.x),
            wrist_left_y: round(wrist_left.y),
            wrist_right_x: round(wrist_right.x),
            wrist_right_y: round(wrist_right.y),
            elbow_left_angle: round(f.elbow_left_angle),
            elbow_left_length: round(f.elbow_left_length),
            wrist_left_length: round(f.wrist_left_length),
            elbow_right_angle: round(f.elbow_right_angle),
            elbow_right_length: round(f.elbow_right_length),
            wrist_right_length: round(f.wrist_right_length),
            knee_left_angle: round(f.knee_left_angle),
            knee_left_length: round(f.knee_left_length),
            ankle_left_length: round(f.ankle_left_length),
            knee_right_angle: round(f.knee_right_angle),
            knee_right_length: round(f.knee_right_length),
            ankle_right_length: round(f.ankle_right_length),
            eye_width: round(f.eye_width),
            ear_width: round(f.ear_width),
            shoulder_width: round(f.shoulder_width),
            hip_width: round(f.hip_width),
            torso_length: round(f.torso_length),
            head_yaw_angle: round(f.head_yaw_angle),
            torso_slope: round(f.torso_slope),
            shoulder_slope: round(f.shoulder_slope),
            thigh_left_torso_angle: round(f.thigh_left_torso_angle),
            thigh_right_torso_angle: round(f.thigh_right_torso_angle),
            arm_left_torso_angle: round(f.arm_left_torso_angle),
            arm_right_torso_angle: round(f.arm_right_torso_angle),
            label: UNLABELLED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::geometry::KeyPoint;
    use crate::pipeline::pose::{BoundingBox, Skeleton};

    fn sample_pose() -> PoseCandidate {
        let mut skeleton = Skeleton::default();
        skeleton.points[Joint::Nose as usize] = KeyPoint::new(20.5, 10.4, 0.9);
        skeleton.points[Joint::LeftWrist as usize] = KeyPoint::new(-2.5, 7.49, 0.3);
        PoseCandidate {
            bbox: BoundingBox {
                center_x: 100.5,
                center_y: 49.5,
                width: 30.2,
                height: 60.7,
                confidence: 0.8,
            },
            skeleton,
        }
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(round(2.5), 3);
        assert_eq!(round(-2.5), -3);
        assert_eq!(round(2.49), 2);
        assert_eq!(round(-1.0), -1);
    }

    #[test]
    fn test_record_values() {
        let record = PoseRecord::new("clip", 12, &sample_pose(), &ConfidenceLevels::default());
        assert_eq!(record.bbox_x, 101);
        assert_eq!(record.bbox_y, 50);
        assert_eq!(record.bbox_w, 30);
        assert_eq!(record.bbox_h, 61);
        assert_eq!((record.head_x, record.head_y), (21, 10));
        assert_eq!((record.wrist_left_x, record.wrist_left_y), (-3, 7));
        assert_eq!(record.elbow_left_angle, -1);
        assert_eq!(record.shoulder_width, 0);
        assert_eq!(record.label, -1);
    }

    #[test]
    fn test_serialized_header_matches_column_order() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .serialize(PoseRecord::new("clip", 0, &sample_pose(), &ConfidenceLevels::default()))
            .unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next().unwrap(), REPORT_HEADER.join(","));
        let row = lines.next().unwrap();
        assert!(row.starts_with("clip,0,101,50,30,61,21,10,-3,7,0,0,-1,"));
        assert!(row.ends_with(",-1"));
        assert_eq!(row.split(',').count(), REPORT_HEADER.len());
    }

    #[test]
    fn test_round_trip_through_csv_reader() {
        let record = PoseRecord::new("clip", 4, &sample_pose(), &ConfidenceLevels::default());
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(&record).unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let parsed: Vec<PoseRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed, vec![record]);
    }
}
