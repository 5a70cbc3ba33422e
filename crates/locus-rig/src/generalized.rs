//! Generalized (non-central) rig resection.
//!
//! All cameras' correspondences are pooled into one resection problem.
//! Minimal samples are drawn within a single camera, solved with EPnP in
//! that camera's frame and mapped to a rig pose through the camera's
//! sub-pose. Candidate rig poses are scored on every correspondence of
//! every camera by the angle between the observed bearing and the
//! predicted ray, which stays comparable across cameras with different
//! intrinsics and fields of view.

use glam::DVec3;
use locus_geometry::{bearing_angle, Pose};
use locus_pnp::epnp::{solve_epnp, EpnpParams};
use locus_pnp::ransac::MINIMAL_SAMPLE_SIZE;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{rngs::StdRng, SeedableRng};

use crate::refine::{refine_rig_pose, AngularObservation};
use crate::types::{RigCameraObservations, RigCameraResult, RigError, RigResectionParams, RigResult};

struct PooledObservation {
    camera_index: usize,
    local_index: usize,
    world: DVec3,
    bearing: DVec3,
}

struct RigCandidate {
    pose: Pose,
    inliers: Vec<usize>, // indices into the pooled observation list
    total_residual: f64,
}

impl RigCandidate {
    fn beats(&self, other: &RigCandidate) -> bool {
        match self.inliers.len().cmp(&other.inliers.len()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.total_residual < other.total_residual,
        }
    }
}

/// Localize a rig by joint consensus over all cameras' correspondences.
///
/// Fails when no camera carries a minimal sample, or when no candidate rig
/// pose gathers `min_inliers` angular inliers across the whole rig.
pub fn localize_rig_generalized(
    cameras: &[RigCameraObservations],
    params: &RigResectionParams,
) -> Result<RigResult, RigError> {
    if cameras.is_empty() {
        return Err(RigError::NoCameras);
    }

    // pool every observation once, with precomputed bearings
    let mut pooled: Vec<PooledObservation> = Vec::new();
    for (camera_index, cam) in cameras.iter().enumerate() {
        for (local_index, (pw, px)) in cam.world.iter().zip(cam.pixels.iter()).enumerate() {
            pooled.push(PooledObservation {
                camera_index,
                local_index,
                world: DVec3::from_array(*pw),
                bearing: cam.camera.bearing(glam::DVec2::new(px[0], px[1])),
            });
        }
    }

    let sample_cameras: Vec<usize> = cameras
        .iter()
        .enumerate()
        .filter(|(_, cam)| cam.world.len() >= MINIMAL_SAMPLE_SIZE)
        .map(|(i, _)| i)
        .collect();
    if sample_cameras.is_empty() {
        return Err(RigError::NoSampleCamera {
            required: MINIMAL_SAMPLE_SIZE,
        });
    }

    let mut rng: StdRng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    // per-camera undistorted pixels for the minimal solver
    let ideal_pixels: Vec<Vec<[f64; 2]>> = cameras
        .iter()
        .map(|cam| cam.camera.undistort_points(&cam.pixels))
        .collect();

    let epnp_params = EpnpParams::default();
    let mut best: Option<RigCandidate> = None;
    let mut required_iters = params.max_iterations;
    let mut iter = 0usize;

    while iter < required_iters {
        iter += 1;

        // draw the minimal sample inside one camera
        let &cam_idx = sample_cameras
            .as_slice()
            .choose(&mut rng)
            .expect("sample camera list non-empty");
        let cam = &cameras[cam_idx];
        let n_cam = cam.world.len();
        let mut local: Vec<usize> = (0..n_cam).collect();
        local.shuffle(&mut rng);
        let sample = &local[..MINIMAL_SAMPLE_SIZE];

        let sample_world: Vec<[f64; 3]> = sample.iter().map(|&i| cam.world[i]).collect();
        if is_collinear(&sample_world) {
            continue;
        }
        let sample_pixels: Vec<[f64; 2]> = sample.iter().map(|&i| ideal_pixels[cam_idx][i]).collect();

        let Ok(solution) = solve_epnp(
            &sample_world,
            &sample_pixels,
            &cam.camera.intrinsics,
            &epnp_params,
        ) else {
            continue;
        };
        // camera pose -> rig pose through the fixed mounting transform
        let rig_pose = cam.sub_pose.inverse().compose(&solution.pose);

        let candidate = score_rig_pose(&pooled, cameras, &rig_pose, params.angular_threshold);
        if candidate.inliers.len() < MINIMAL_SAMPLE_SIZE {
            continue;
        }

        if best.as_ref().map_or(true, |b| candidate.beats(b)) {
            let inlier_ratio = candidate.inliers.len() as f64 / pooled.len() as f64;
            required_iters = required_iters.min(adapt_iterations(
                inlier_ratio,
                params.confidence,
                params.max_iterations,
            ));
            best = Some(candidate);
        }
    }

    let min_required = params.min_inliers.max(MINIMAL_SAMPLE_SIZE);
    let best = best.ok_or(RigError::InsufficientInliers {
        required: min_required,
        actual: 0,
    })?;
    if best.inliers.len() < min_required {
        return Err(RigError::InsufficientInliers {
            required: min_required,
            actual: best.inliers.len(),
        });
    }

    // joint angular refinement over the inlier union
    let observations: Vec<AngularObservation> = best
        .inliers
        .iter()
        .map(|&i| {
            let obs = &pooled[i];
            AngularObservation {
                world: obs.world,
                bearing: obs.bearing,
                sub_pose: cameras[obs.camera_index].sub_pose,
            }
        })
        .collect();
    let refined_pose = refine_rig_pose(&observations, &best.pose);

    // final classification against the refined pose
    let final_candidate = score_rig_pose(&pooled, cameras, &refined_pose, params.angular_threshold);
    let winner = if final_candidate.beats(&best) {
        final_candidate
    } else {
        best
    };

    let mut per_camera: Vec<Option<RigCameraResult>> = cameras
        .iter()
        .map(|cam| {
            Some(RigCameraResult {
                pose: cam.sub_pose.compose(&refined_pose),
                inliers: Vec::new(),
            })
        })
        .collect();
    for &i in &winner.inliers {
        let obs = &pooled[i];
        if let Some(entry) = per_camera[obs.camera_index].as_mut() {
            entry.inliers.push(obs.local_index);
        }
    }
    // cameras without a single angular inlier did not contribute
    for entry in per_camera.iter_mut() {
        if entry.as_ref().is_some_and(|c| c.inliers.is_empty()) {
            *entry = None;
        }
    }
    let contributing = per_camera.iter().filter(|c| c.is_some()).count();

    log::debug!(
        "generalized rig resection: {}/{} angular inliers over {contributing}/{} cameras after {iter} iterations",
        winner.inliers.len(),
        pooled.len(),
        cameras.len()
    );

    Ok(RigResult {
        pose: refined_pose,
        per_camera,
        contributing_cameras: contributing,
    })
}

fn score_rig_pose(
    pooled: &[PooledObservation],
    cameras: &[RigCameraObservations],
    rig_pose: &Pose,
    angular_threshold: f64,
) -> RigCandidate {
    let camera_poses: Vec<Pose> = cameras
        .iter()
        .map(|cam| cam.sub_pose.compose(rig_pose))
        .collect();

    let mut inliers = Vec::new();
    let mut total_residual = 0.0;
    for (i, obs) in pooled.iter().enumerate() {
        let predicted = camera_poses[obs.camera_index].transform(obs.world);
        let angle = bearing_angle(predicted, obs.bearing);
        if angle < angular_threshold {
            inliers.push(i);
            total_residual += angle * angle;
        }
    }

    RigCandidate {
        pose: *rig_pose,
        inliers,
        total_residual,
    }
}

fn is_collinear(points: &[[f64; 3]]) -> bool {
    if points.len() < 3 {
        return true;
    }
    let a = DVec3::from_array(points[0]);
    let mut direction: Option<DVec3> = None;
    let mut max_extent = 0.0f64;
    for p in &points[1..] {
        let d = DVec3::from_array(*p) - a;
        max_extent = max_extent.max(d.length());
        if direction.is_none() && d.length() > 1e-12 {
            direction = Some(d.normalize());
        }
    }
    let Some(dir) = direction else {
        return true;
    };
    points[1..].iter().all(|p| {
        let d = DVec3::from_array(*p) - a;
        d.cross(dir).length() < 1e-9 * max_extent.max(1.0)
    })
}

fn adapt_iterations(inlier_ratio: f64, confidence: f64, ceiling: usize) -> usize {
    if inlier_ratio <= 0.0 {
        return ceiling;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let ws = inlier_ratio.powi(MINIMAL_SAMPLE_SIZE as i32);
    if ws <= 1e-12 {
        return ceiling;
    }
    if ws >= 1.0 - 1e-12 {
        return 1;
    }
    let est = ((1.0 - confidence).max(1e-12).ln() / (1.0 - ws).ln()).ceil();
    if est.is_finite() && est > 0.0 {
        (est as usize).min(ceiling)
    } else {
        ceiling
    }
}
