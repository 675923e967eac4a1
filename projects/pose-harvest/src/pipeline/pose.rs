// Pose candidates decoded from raw model output, plus the features derived from them.

use crate::config::{ConfidenceLevels, JointGroup};
use crate::pipeline::geometry::{
    angle, bone_angle, centroid, intersection_over_union, length, midpoint,
    signed_length, Gated, KeyPoint, MISSING,
};
use anyhow::{bail, Result};
use serde::Serialize;

/// Output channels per anchor: box (4), confidence (1), 17 keypoints (3 each).
pub const CHANNELS: usize = 5 + 3 * Joint::COUNT;

/// Skeleton joints in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Joint {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl Joint {
    pub const COUNT: usize = 17;

    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Nose,
        Joint::LeftEye,
        Joint::RightEye,
        Joint::LeftEar,
        Joint::RightEar,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftWrist,
        Joint::RightWrist,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
    ];

    pub fn group(self) -> JointGroup {
        match self {
            Joint::Nose => JointGroup::Nose,
            Joint::LeftEye | Joint::RightEye => JointGroup::Eye,
            Joint::LeftEar | Joint::RightEar => JointGroup::Ear,
            Joint::LeftShoulder | Joint::RightShoulder => JointGroup::Shoulder,
            Joint::LeftElbow | Joint::RightElbow => JointGroup::Elbow,
            Joint::LeftWrist | Joint::RightWrist => JointGroup::Wrist,
            Joint::LeftHip | Joint::RightHip => JointGroup::Hip,
            Joint::LeftKnee | Joint::RightKnee => JointGroup::Knee,
            Joint::LeftAnkle | Joint::RightAnkle => JointGroup::Ankle,
        }
    }

    pub fn is_left(self) -> bool {
        matches!(
            self,
            Joint::LeftEye
                | Joint::LeftEar
                | Joint::LeftShoulder
                | Joint::LeftElbow
                | Joint::LeftWrist
                | Joint::LeftHip
                | Joint::LeftKnee
                | Joint::LeftAnkle
        )
    }
}

/// Bones drawn by the overlay, as joint pairs.
pub const BONES: [(Joint, Joint); 14] = [
    (Joint::Nose, Joint::LeftEye),
    (Joint::LeftEye, Joint::LeftEar),
    (Joint::Nose, Joint::RightEye),
    (Joint::RightEye, Joint::RightEar),
    (Joint::LeftShoulder, Joint::RightShoulder),
    (Joint::LeftShoulder, Joint::LeftElbow),
    (Joint::LeftElbow, Joint::LeftWrist),
    (Joint::RightShoulder, Joint::RightElbow),
    (Joint::RightElbow, Joint::RightWrist),
    (Joint::LeftHip, Joint::RightHip),
    (Joint::LeftHip, Joint::LeftKnee),
    (Joint::LeftKnee, Joint::LeftAnkle),
    (Joint::RightHip, Joint::RightKnee),
    (Joint::RightKnee, Joint::RightAnkle),
];

/// Axis-aligned box in model-input pixels, stored by center.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BoundingBox {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn left(&self) -> f32 {
        self.center_x - self.width / 2.0
    }

    pub fn right(&self) -> f32 {
        self.center_x + self.width / 2.0
    }

    pub fn top(&self) -> f32 {
        self.center_y - self.height / 2.0
    }

    pub fn bottom(&self) -> f32 {
        self.center_y + self.height / 2.0
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Returns (left, top, width, height, union area) of the intersection with `other`.
    fn intersection(&self, other: &BoundingBox) -> (f32, f32, f32, f32, f32) {
        let left = self.left().max(other.left());
        let top = self.top().max(other.top());
        let width = (self.right().min(other.right()) - left).max(0.0);
        let height = (self.bottom().min(other.bottom()) - top).max(0.0);
        let union = self.area() + other.area() - width * height;
        (left, top, width, height, union)
    }

    pub fn overlap(&self, other: &BoundingBox) -> f32 {
        let (_, _, width, height, union) = self.intersection(other);
        if union > 0.0 {
            width * height / union
        } else {
            0.0
        }
    }

    /// Shrinks this box to its intersection with `other`. Confidence is kept.
    pub fn merge(&mut self, other: &BoundingBox) {
        let (left, top, width, height, union) = self.intersection(other);
        if union > 0.0 {
            self.center_x = left + width * 0.5;
            self.center_y = top + height * 0.5;
            self.width = width;
            self.height = height;
        }
    }
}

/// The 17 keypoints of one detected person.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Skeleton {
    pub points: [KeyPoint; Joint::COUNT],
}

impl Skeleton {
    pub fn get(&self, joint: Joint) -> KeyPoint {
        self.points[joint as usize]
    }

    fn gated(&self, joint: Joint, levels: &ConfidenceLevels) -> Gated {
        self.get(joint).gated(levels.get(joint.group()))
    }

    /// Average of the confident nose/eye/ear points.
    pub fn head(&self, levels: &ConfidenceLevels) -> KeyPoint {
        centroid(
            levels.head,
            &[
                self.get(Joint::Nose),
                self.get(Joint::LeftEye),
                self.get(Joint::RightEye),
                self.get(Joint::LeftEar),
                self.get(Joint::RightEar),
            ],
        )
    }

    fn pair_mid(&self, left: Joint, right: Joint, level: f32) -> KeyPoint {
        midpoint(self.get(left), self.get(right), level)
    }

    pub fn eye_mid(&self, levels: &ConfidenceLevels) -> KeyPoint {
        self.pair_mid(Joint::LeftEye, Joint::RightEye, levels.eye)
    }

    pub fn ear_mid(&self, levels: &ConfidenceLevels) -> KeyPoint {
        self.pair_mid(Joint::LeftEar, Joint::RightEar, levels.ear)
    }

    pub fn shoulder_mid(&self, levels: &ConfidenceLevels) -> KeyPoint {
        self.pair_mid(Joint::LeftShoulder, Joint::RightShoulder, levels.shoulder)
    }

    pub fn elbow_mid(&self, levels: &ConfidenceLevels) -> KeyPoint {
        self.pair_mid(Joint::LeftElbow, Joint::RightElbow, levels.elbow)
    }

    pub fn wrist_mid(&self, levels: &ConfidenceLevels) -> KeyPoint {
        self.pair_mid(Joint::LeftWrist, Joint::RightWrist, levels.wrist)
    }

    pub fn hip_mid(&self, levels: &ConfidenceLevels) -> KeyPoint {
        self.pair_mid(Joint::LeftHip, Joint::RightHip, levels.hip)
    }

    pub fn knee_mid(&self, levels: &ConfidenceLevels) -> KeyPoint {
        self.pair_mid(Joint::LeftKnee, Joint::RightKnee, levels.knee)
    }

    pub fn ankle_mid(&self, levels: &ConfidenceLevels) -> KeyPoint {
        self.pair_mid(Joint::LeftAnkle, Joint::RightAnkle, levels.ankle)
    }

    /// Torso quadrilateral: left shoulder, right shoulder, right hip, left hip.
    pub fn torso_polygon(&self) -> [KeyPoint; 4] {
        [
            self.get(Joint::LeftShoulder),
            self.get(Joint::RightShoulder),
            self.get(Joint::RightHip),
            self.get(Joint::LeftHip),
        ]
    }

    /// Upper-body triangle: left shoulder, right shoulder, head.
    pub fn upper_body_polygon(&self, levels: &ConfidenceLevels) -> [KeyPoint; 3] {
        [
            self.get(Joint::LeftShoulder),
            self.get(Joint::RightShoulder),
            self.head(levels),
        ]
    }

    pub fn merge(&mut self, other: &Skeleton) {
        for (mine, theirs) in self.points.iter_mut().zip(other.points.iter()) {
            *mine = mine.merge(*theirs);
        }
    }

    fn head_yaw(&self, levels: &ConfidenceLevels) -> f32 {
        let nose = self.gated(Joint::Nose, levels);
        let d_left = length(nose, self.gated(Joint::LeftEar, levels));
        let d_right = length(nose, self.gated(Joint::RightEar, levels));
        if d_left == MISSING || d_right == MISSING {
            return MISSING;
        }
        let sum = (d_left + d_right) as f64;
        if sum <= 0.0 {
            return MISSING;
        }
        let ratio = ((d_right - d_left) as f64 / sum).clamp(-1.0, 1.0);
        ratio.asin().to_degrees() as f32
    }

    fn torso_slope(&self, levels: &ConfidenceLevels) -> f32 {
        let shoulder = self.shoulder_mid(levels);
        let hip = self.hip_mid(levels);
        if !shoulder.passes(levels.shoulder) || !hip.passes(levels.hip) {
            return MISSING;
        }
        ((shoulder.x - hip.x) as f64)
            .atan2((shoulder.y - hip.y) as f64)
            .to_degrees() as f32
    }

    fn shoulder_slope(&self, levels: &ConfidenceLevels) -> f32 {
        let left = self.gated(Joint::LeftShoulder, levels);
        let right = self.gated(Joint::RightShoulder, levels);
        if !left.passes() || !right.passes() {
            return MISSING;
        }
        ((right.point.y - left.point.y) as f64)
            .atan2((right.point.x - left.point.x) as f64)
            .to_degrees() as f32
    }

    pub fn features(&self, levels: &ConfidenceLevels) -> PoseFeatures {
        let g = |joint: Joint| self.gated(joint, levels);
        let shoulder_mid = self.shoulder_mid(levels).gated(levels.shoulder);
        let hip_mid = self.hip_mid(levels).gated(levels.hip);
        let head = self.head(levels).gated(levels.head);

        use Joint::*;
        PoseFeatures {
            elbow_left_angle: angle(g(LeftElbow), g(LeftShoulder), g(LeftWrist)),
            elbow_right_angle: angle(g(RightElbow), g(RightShoulder), g(RightWrist)),
            knee_left_angle: angle(g(LeftKnee), g(LeftHip), g(LeftAnkle)),
            knee_right_angle: angle(g(RightKnee), g(RightHip), g(RightAnkle)),

            thigh_left_torso_angle: bone_angle(g(LeftHip), g(LeftKnee), hip_mid, shoulder_mid),
            thigh_right_torso_angle: bone_angle(g(RightHip), g(RightKnee), hip_mid, shoulder_mid),
            arm_left_torso_angle: bone_angle(
                g(LeftShoulder),
                g(LeftElbow),
                shoulder_mid,
                hip_mid,
            ),
            arm_right_torso_angle: bone_angle(
                g(RightShoulder),
                g(RightElbow),
                shoulder_mid,
                hip_mid,
            ),

            wrist_left_length: length(g(LeftElbow), g(LeftWrist)),
            wrist_right_length: length(g(RightElbow), g(RightWrist)),
            elbow_left_length: length(g(LeftShoulder), g(LeftElbow)),
            elbow_right_length: length(g(RightShoulder), g(RightElbow)),
            knee_left_length: length(g(LeftHip), g(LeftKnee)),
            knee_right_length: length(g(RightHip), g(RightKnee)),
            ankle_left_length: length(g(LeftKnee), g(LeftAnkle)),
            ankle_right_length: length(g(RightKnee), g(RightAnkle)),
            torso_length: length(shoulder_mid, hip_mid),

            shoulder_width: signed_length(head, g(LeftShoulder), g(RightShoulder)),
            hip_width: signed_length(shoulder_mid, g(LeftHip), g(RightHip)),
            eye_width: signed_length(shoulder_mid, g(RightEye), g(LeftEye)),
            ear_width: signed_length(shoulder_mid, g(RightEar), g(LeftEar)),

            head_yaw_angle: self.head_yaw(levels),
            torso_slope: self.torso_slope(levels),
            shoulder_slope: self.shoulder_slope(levels),
        }
    }
}

/// Geometric features of one pose. Missing values hold the geometry sentinels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseFeatures {
    pub elbow_left_angle: f32,
    pub elbow_right_angle: f32,
    pub knee_left_angle: f32,
    pub knee_right_angle: f32,
    pub thigh_left_torso_angle: f32,
    pub thigh_right_torso_angle: f32,
    pub arm_left_torso_angle: f32,
    pub arm_right_torso_angle: f32,
    pub wrist_left_length: f32,
    pub wrist_right_length: f32,
    pub elbow_left_length: f32,
    pub elbow_right_length: f32,
    pub knee_left_length: f32,
    pub knee_right_length: f32,
    pub ankle_left_length: f32,
    pub ankle_right_length: f32,
    pub torso_length: f32,
    pub shoulder_width: f32,
    pub hip_width: f32,
    pub eye_width: f32,
    pub ear_width: f32,
    pub head_yaw_angle: f32,
    pub torso_slope: f32,
    pub shoulder_slope: f32,
}

/// One detected person: box plus skeleton.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseCandidate {
    pub bbox: BoundingBox,
    pub skeleton: Skeleton,
}

impl PoseCandidate {
    /// Decodes anchor `index` from channel-major output (`output[index + anchors * channel]`).
    pub fn decode(output: &[f32], anchors: usize, index: usize) -> Result<Self> {
        if index >= anchors {
            bail!("Anchor index {} out of range (anchors = {})", index, anchors);
        }
        if output.len() < anchors * CHANNELS {
            bail!(
                "Model output too short: {} values, expected at least {}",
                output.len(),
                anchors * CHANNELS
            );
        }

        let at = |channel: usize| output[index + anchors * channel];
        let bbox = BoundingBox {
            center_x: at(0),
            center_y: at(1),
            width: at(2),
            height: at(3),
            confidence: at(4),
        };

        let mut skeleton = Skeleton::default();
        for (k, point) in skeleton.points.iter_mut().enumerate() {
            *point = KeyPoint::new(at(5 + 3 * k), at(6 + 3 * k), at(7 + 3 * k));
        }

        Ok(Self { bbox, skeleton })
    }

    pub fn overlap_bbox(&self, other: &PoseCandidate) -> f32 {
        self.bbox.overlap(&other.bbox)
    }

    pub fn overlap_torso(&self, other: &PoseCandidate) -> f32 {
        intersection_over_union(
            &self.skeleton.torso_polygon(),
            &other.skeleton.torso_polygon(),
        )
    }

    pub fn overlap_upper_body(&self, other: &PoseCandidate, levels: &ConfidenceLevels) -> f32 {
        intersection_over_union(
            &self.skeleton.upper_body_polygon(levels),
            &other.skeleton.upper_body_polygon(levels),
        )
    }

    pub fn merge(&mut self, other: &PoseCandidate) {
        self.skeleton.merge(&other.skeleton);
        self.bbox.merge(&other.bbox);
    }

    pub fn features(&self, levels: &ConfidenceLevels) -> PoseFeatures {
        self.skeleton.features(levels)
    }
}
