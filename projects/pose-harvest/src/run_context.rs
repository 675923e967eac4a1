// Run context: where videos come from and where their artifacts go
//
// Every video `<dir>/<stem>.<ext>` writes into `<dir>/<stem>/`. A video whose
// report already exists there is considered processed.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const REPORT_FILE: &str = "Pose.csv";

pub fn has_extension(path: &Path, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.');
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

/// True for `<dir>/<stem>/<stem>_pose.<ext>`, a video this tool wrote.
pub fn is_overlay_output(path: &Path) -> bool {
    let stem = path.file_stem().and_then(|s| s.to_str());
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str());
    match (stem, parent) {
        (Some(stem), Some(parent)) => stem.strip_suffix("_pose") == Some(parent),
        _ => false,
    }
}

/// Lists videos with `extension` under `video_root`, top level only unless `recursive`.
/// Overlay videos written by earlier runs are left out.
pub fn list_videos(video_root: &Path, extension: &str, recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(video_root).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_extension(e.path(), extension))
        .filter(|e| !is_overlay_output(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Lists videos from every root, keeping the first video per output directory.
pub fn collect_videos(video_roots: &[PathBuf], extension: &str, recursive: bool) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut videos = Vec::new();
    for root in video_roots {
        if !root.is_dir() {
            tracing::warn!("Video directory {:?} does not exist, skipping", root);
            continue;
        }
        for video in list_videos(root, extension, recursive) {
            match output_dir_for(&video) {
                Ok(dir) if seen.insert(dir.clone()) => videos.push(video),
                Ok(dir) => tracing::warn!(
                    "Skipping {:?}: output directory {:?} already claimed",
                    video,
                    dir
                ),
                Err(e) => tracing::warn!("Skipping {:?}: {}", video, e),
            }
        }
    }
    videos
}

pub fn video_stem(video: &Path) -> Result<String> {
    video
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid video name: {:?}", video))
}

pub fn output_dir_for(video: &Path) -> Result<PathBuf> {
    let stem = video_stem(video)?;
    let parent = video.parent().unwrap_or_else(|| Path::new(""));
    Ok(parent.join(stem))
}

pub fn report_path(output_dir: &Path) -> PathBuf {
    output_dir.join(REPORT_FILE)
}

pub fn overlay_video_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(format!("{}_pose.mp4", name))
}

pub fn is_processed(video: &Path) -> bool {
    output_dir_for(video)
        .map(|dir| report_path(&dir).exists())
        .unwrap_or(false)
}
