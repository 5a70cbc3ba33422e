//! Independent per-camera localization with pose fusion.

use locus_pnp::{estimate_pose_robust, ransac::MINIMAL_SAMPLE_SIZE};

use crate::types::{RigCameraObservations, RigCameraResult, RigError, RigResectionParams, RigResult};

/// Localize a rig by resecting every camera independently.
///
/// Each camera runs the single-camera robust resection on its own
/// correspondences; cameras that fail are excluded. The camera with the
/// largest inlier count anchors the rig: its pose composed with the inverse
/// of its sub-pose gives the rig pose. The call fails only when every
/// camera fails.
pub fn localize_rig_naive(
    cameras: &[RigCameraObservations],
    params: &RigResectionParams,
) -> Result<RigResult, RigError> {
    if cameras.is_empty() {
        return Err(RigError::NoCameras);
    }

    let mut per_camera: Vec<Option<RigCameraResult>> = Vec::with_capacity(cameras.len());
    for (index, cam) in cameras.iter().enumerate() {
        if cam.world.len() < MINIMAL_SAMPLE_SIZE {
            log::debug!(
                "rig camera {index}: {} correspondences, skipping",
                cam.world.len()
            );
            per_camera.push(None);
            continue;
        }
        match estimate_pose_robust(&cam.world, &cam.pixels, &cam.camera, &params.resection, None) {
            Ok(result) => {
                per_camera.push(Some(RigCameraResult {
                    pose: result.pose,
                    inliers: result.inliers,
                }));
            }
            Err(e) => {
                log::debug!("rig camera {index} failed to localize: {e}");
                per_camera.push(None);
            }
        }
    }

    let contributing = per_camera.iter().filter(|c| c.is_some()).count();
    if contributing == 0 {
        return Err(RigError::AllCamerasFailed {
            total: cameras.len(),
        });
    }

    // anchor on the camera with the strongest support
    let anchor = per_camera
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.as_ref().map(|c| (i, c.inliers.len())))
        .max_by_key(|&(_, inliers)| inliers)
        .map(|(i, _)| i)
        .expect("at least one camera localized");

    let anchor_result = per_camera[anchor].as_ref().expect("anchor localized");
    let rig_pose = cameras[anchor]
        .sub_pose
        .inverse()
        .compose(&anchor_result.pose);

    log::debug!(
        "naive rig fusion: anchor camera {anchor} with {} inliers, {contributing}/{} cameras contributing",
        anchor_result.inliers.len(),
        cameras.len()
    );

    Ok(RigResult {
        pose: rig_pose,
        per_camera,
        contributing_cameras: contributing,
    })
}
