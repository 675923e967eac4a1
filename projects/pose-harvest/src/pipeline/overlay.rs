// Pose overlay drawing for the annotated output video

use crate::config::{ConfidenceLevels, JointGroup};
use crate::pipeline::geometry::KeyPoint;
use crate::pipeline::pose::{Joint, PoseCandidate, BONES};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const BONE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const LEFT_COLOR: Rgb<u8> = Rgb([173, 216, 230]);
const RIGHT_COLOR: Rgb<u8> = Rgb([255, 182, 193]);
const NOSE_COLOR: Rgb<u8> = Rgb([173, 255, 47]);
const MIDPOINT_COLOR: Rgb<u8> = Rgb([238, 130, 238]);

const JOINT_RADIUS: i32 = 4;
const MIDPOINT_RADIUS: i32 = 3;

/// Draws every pose onto `image` in model-input coordinates.
pub fn draw_poses(image: &mut RgbImage, poses: &[PoseCandidate], levels: &ConfidenceLevels) {
    for pose in poses {
        draw_pose(image, pose, levels);
    }
}

fn draw_pose(image: &mut RgbImage, pose: &PoseCandidate, levels: &ConfidenceLevels) {
    let bbox = &pose.bbox;
    let width = bbox.width.round() as u32;
    let height = bbox.height.round() as u32;
    if width > 0 && height > 0 {
        let rect = Rect::at(bbox.left().round() as i32, bbox.top().round() as i32)
            .of_size(width, height);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }

    let skeleton = &pose.skeleton;
    let passes = |joint: Joint| skeleton.get(joint).passes(levels.get(joint.group()));

    for (a, b) in BONES {
        if passes(a) && passes(b) {
            let p0 = skeleton.get(a);
            let p1 = skeleton.get(b);
            draw_line_segment_mut(image, (p0.x, p0.y), (p1.x, p1.y), BONE_COLOR);
        }
    }

    for joint in Joint::ALL {
        if !passes(joint) {
            continue;
        }
        let color = if joint == Joint::Nose {
            NOSE_COLOR
        } else if joint.is_left() {
            LEFT_COLOR
        } else {
            RIGHT_COLOR
        };
        dot(image, skeleton.get(joint), JOINT_RADIUS, color);
    }

    let midpoints = [
        (skeleton.hip_mid(levels), JointGroup::Hip),
        (skeleton.shoulder_mid(levels), JointGroup::Shoulder),
        (skeleton.ear_mid(levels), JointGroup::Ear),
        (skeleton.eye_mid(levels), JointGroup::Eye),
        (skeleton.head(levels), JointGroup::Head),
    ];
    for (point, group) in midpoints {
        if point.passes(levels.get(group)) {
            dot(image, point, MIDPOINT_RADIUS, MIDPOINT_COLOR);
        }
    }
}

fn dot(image: &mut RgbImage, point: KeyPoint, radius: i32, color: Rgb<u8>) {
    let center = (point.x.round() as i32, point.y.round() as i32);
    draw_filled_circle_mut(image, center, radius, color);
}
