use std::collections::HashSet;

use locus_geometry::Pose;
use locus_map::{CameraModel, Map, PinholeIntrinsics};
use locus_match::{match_features, Correspondence, OccurrenceMap, QueryFeatures};
use locus_pnp::ransac::MINIMAL_SAMPLE_SIZE;
use locus_pnp::{estimate_pose_robust, RefineParams, ResectionParams};
use locus_rig::{
    localize_rig_generalized, localize_rig_naive, RigCameraObservations, RigResectionParams,
};
use rayon::prelude::*;

use crate::config::LocalizerParameters;
use crate::debug::dump_matches;
use crate::describer::{FeatureDescriber, QueryImage};
use crate::result::{LocalizationResult, RigLocalizationResult};

/// Polymorphic localization entry point.
///
/// Implementations are selected at construction time; all entry points
/// report failure through the `valid` flag of their result and never panic
/// or propagate errors past this boundary. An uninitialized localizer
/// fails every call without side effects.
pub trait Localizer {
    /// Whether the localizer holds a usable map.
    fn is_initialized(&self) -> bool;

    /// The reconstructed scene being localized against.
    fn map(&self) -> &Map;

    /// Localize one raw grayscale image, extracting features through the
    /// configured describer first.
    ///
    /// `prior` supplies known query intrinsics; without it the intrinsics
    /// are initialized from the image size and estimated jointly with the
    /// pose.
    fn localize_image(
        &self,
        image: &QueryImage,
        params: &LocalizerParameters,
        prior: Option<&CameraModel>,
    ) -> LocalizationResult;

    /// Localize from pre-extracted features, skipping extraction.
    fn localize_features(
        &self,
        features: &QueryFeatures,
        image_size: (usize, usize),
        params: &LocalizerParameters,
        prior: Option<&CameraModel>,
    ) -> LocalizationResult;

    /// Localize a rigid multi-camera rig from raw images.
    ///
    /// `cameras` and `sub_poses` describe each rig camera's calibration and
    /// its fixed rig-to-camera transform, aligned with `images`.
    fn localize_rig_images(
        &self,
        images: &[QueryImage],
        params: &LocalizerParameters,
        cameras: &[CameraModel],
        sub_poses: &[Pose],
    ) -> RigLocalizationResult;

    /// Localize a rig from per-camera pre-extracted features.
    fn localize_rig_features(
        &self,
        features: &[QueryFeatures],
        params: &LocalizerParameters,
        cameras: &[CameraModel],
        sub_poses: &[Pose],
    ) -> RigLocalizationResult;
}

/// Feature-driven localizer over a reconstructed map.
///
/// Owns the read-only map and the external describer; holds no other
/// state, so one instance serves concurrent localization calls.
pub struct MapLocalizer {
    map: Map,
    describer: Box<dyn FeatureDescriber>,
    initialized: bool,
}

impl MapLocalizer {
    /// Build a localizer over `map`, delegating raw-image feature
    /// extraction to `describer`.
    ///
    /// A map without landmarks leaves the localizer uninitialized: it is
    /// constructible but every localization call fails.
    pub fn new(map: Map, describer: Box<dyn FeatureDescriber>) -> Self {
        let initialized = map.landmark_count() > 0;
        if !initialized {
            log::warn!("localizer constructed over a map without landmarks");
        }
        Self {
            map,
            describer,
            initialized,
        }
    }

    fn resection_params(
        &self,
        params: &LocalizerParameters,
        estimate_intrinsics: bool,
    ) -> ResectionParams {
        ResectionParams {
            estimator: params.resection_estimator,
            error_max: params.error_max,
            refine: RefineParams {
                refine_intrinsics: params.refine_intrinsics || estimate_intrinsics,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn localize_features_impl(
        &self,
        features: &QueryFeatures,
        image_size: (usize, usize),
        params: &LocalizerParameters,
        prior: Option<&CameraModel>,
        image: Option<&QueryImage>,
    ) -> LocalizationResult {
        if !self.initialized {
            log::debug!("localize called on an uninitialized localizer");
            return LocalizationResult::invalid();
        }
        if features.is_empty() {
            log::debug!("query carries no features");
            return LocalizationResult::invalid();
        }

        let correspondences = match match_features(features, &self.map, params.dist_ratio) {
            Ok(c) => c,
            Err(e) => {
                log::debug!("matching failed: {e}");
                return LocalizationResult::invalid();
            }
        };
        let mut occurrences = OccurrenceMap::new();
        occurrences.record_pass(&correspondences);

        if correspondences.len() < MINIMAL_SAMPLE_SIZE {
            log::debug!(
                "only {} putative correspondences, {} needed",
                correspondences.len(),
                MINIMAL_SAMPLE_SIZE
            );
            self.dump_debug(params, "matches", image, image_size, &correspondences, &[]);
            return LocalizationResult::invalid();
        }

        let (camera, estimate_intrinsics) = match prior {
            Some(cam) => (cam.clone(), false),
            None => match default_camera(image_size) {
                Some(cam) => (cam, true),
                None => {
                    log::debug!("cannot build an intrinsics guess for a zero-sized image");
                    return LocalizationResult::invalid();
                }
            },
        };

        let world: Vec<[f64; 3]> = correspondences.iter().map(|c| c.world).collect();
        let pixels: Vec<[f64; 2]> = correspondences.iter().map(|c| c.pixel).collect();
        let weights = occurrences.weights(&correspondences);

        let resection = self.resection_params(params, estimate_intrinsics);
        match estimate_pose_robust(&world, &pixels, &camera, &resection, Some(&weights)) {
            Ok(res) => {
                let inliers: Vec<Correspondence> = res
                    .inliers
                    .iter()
                    .map(|&i| correspondences[i].clone())
                    .collect();
                self.dump_debug(
                    params,
                    "matches",
                    image,
                    image_size,
                    &correspondences,
                    &inliers,
                );
                LocalizationResult {
                    valid: true,
                    pose: res.pose,
                    inliers,
                    camera: Some(res.camera),
                    reproj_rmse: Some(res.reproj_rmse),
                }
            }
            Err(e) => {
                log::debug!("resection failed: {e}");
                self.dump_debug(params, "matches", image, image_size, &correspondences, &[]);
                LocalizationResult::invalid()
            }
        }
    }

    fn localize_rig_features_impl(
        &self,
        features: &[QueryFeatures],
        params: &LocalizerParameters,
        cameras: &[CameraModel],
        sub_poses: &[Pose],
        images: Option<&[QueryImage]>,
    ) -> RigLocalizationResult {
        let camera_count = features.len();
        if !self.initialized {
            log::debug!("rig localize called on an uninitialized localizer");
            return RigLocalizationResult::invalid(camera_count);
        }
        if camera_count == 0 || cameras.len() != camera_count || sub_poses.len() != camera_count {
            log::debug!(
                "inconsistent rig inputs: {} feature sets, {} cameras, {} sub-poses",
                camera_count,
                cameras.len(),
                sub_poses.len()
            );
            return RigLocalizationResult::invalid(camera_count);
        }

        // per-camera matching is independent; fusion below is the join
        let matches: Vec<Vec<Correspondence>> = features
            .par_iter()
            .map(|f| match match_features(f, &self.map, params.dist_ratio) {
                Ok(c) => c,
                Err(e) => {
                    log::debug!("rig camera matching failed: {e}");
                    Vec::new()
                }
            })
            .collect();

        let observations: Vec<RigCameraObservations> = matches
            .iter()
            .zip(cameras.iter())
            .zip(sub_poses.iter())
            .map(|((m, cam), &sub_pose)| RigCameraObservations {
                world: m.iter().map(|c| c.world).collect(),
                pixels: m.iter().map(|c| c.pixel).collect(),
                camera: cam.clone(),
                sub_pose,
            })
            .collect();

        let rig_params = RigResectionParams {
            angular_threshold: params.angular_threshold,
            resection: self.resection_params(params, false),
            ..Default::default()
        };
        let outcome = if params.use_naive_rig {
            localize_rig_naive(&observations, &rig_params)
        } else {
            localize_rig_generalized(&observations, &rig_params)
        };

        let rig = match outcome {
            Ok(rig) => rig,
            Err(e) => {
                log::debug!("rig localization failed: {e}");
                return RigLocalizationResult::invalid(camera_count);
            }
        };

        let mut camera_results = Vec::with_capacity(camera_count);
        for (index, entry) in rig.per_camera.iter().enumerate() {
            let result = match entry {
                Some(per_camera) => {
                    let inliers: Vec<Correspondence> = per_camera
                        .inliers
                        .iter()
                        .map(|&i| matches[index][i].clone())
                        .collect();
                    LocalizationResult {
                        valid: true,
                        pose: per_camera.pose,
                        inliers,
                        camera: Some(cameras[index].clone()),
                        reproj_rmse: None,
                    }
                }
                None => LocalizationResult::invalid(),
            };
            self.dump_debug(
                params,
                &format!("rig_cam{index}"),
                images.and_then(|imgs| imgs.get(index)),
                (cameras[index].width, cameras[index].height),
                &matches[index],
                &result.inliers,
            );
            camera_results.push(result);
        }

        RigLocalizationResult {
            valid: true,
            pose: rig.pose,
            cameras: camera_results,
            contributing_cameras: rig.contributing_cameras,
        }
    }

    fn dump_debug(
        &self,
        params: &LocalizerParameters,
        name: &str,
        image: Option<&QueryImage>,
        size: (usize, usize),
        correspondences: &[Correspondence],
        inliers: &[Correspondence],
    ) {
        let Some(dir) = params.visual_debug.as_deref() else {
            return;
        };
        let inlier_features: HashSet<usize> = inliers.iter().map(|c| c.feature).collect();
        dump_matches(dir, name, image, size, correspondences, &inlier_features);
    }
}

impl Localizer for MapLocalizer {
    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn map(&self) -> &Map {
        &self.map
    }

    fn localize_image(
        &self,
        image: &QueryImage,
        params: &LocalizerParameters,
        prior: Option<&CameraModel>,
    ) -> LocalizationResult {
        if !self.initialized {
            log::debug!("localize called on an uninitialized localizer");
            return LocalizationResult::invalid();
        }
        let features = match self.describer.describe(image, params.feature_preset) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("feature extraction failed: {e}");
                return LocalizationResult::invalid();
            }
        };
        self.localize_features_impl(&features, image.size(), params, prior, Some(image))
    }

    fn localize_features(
        &self,
        features: &QueryFeatures,
        image_size: (usize, usize),
        params: &LocalizerParameters,
        prior: Option<&CameraModel>,
    ) -> LocalizationResult {
        self.localize_features_impl(features, image_size, params, prior, None)
    }

    fn localize_rig_images(
        &self,
        images: &[QueryImage],
        params: &LocalizerParameters,
        cameras: &[CameraModel],
        sub_poses: &[Pose],
    ) -> RigLocalizationResult {
        if !self.initialized {
            log::debug!("rig localize called on an uninitialized localizer");
            return RigLocalizationResult::invalid(images.len());
        }
        let features: Vec<QueryFeatures> = images
            .iter()
            .map(|image| {
                self.describer
                    .describe(image, params.feature_preset)
                    .unwrap_or_else(|e| {
                        log::debug!("rig camera feature extraction failed: {e}");
                        QueryFeatures::default()
                    })
            })
            .collect();
        self.localize_rig_features_impl(&features, params, cameras, sub_poses, Some(images))
    }

    fn localize_rig_features(
        &self,
        features: &[QueryFeatures],
        params: &LocalizerParameters,
        cameras: &[CameraModel],
        sub_poses: &[Pose],
    ) -> RigLocalizationResult {
        self.localize_rig_features_impl(features, params, cameras, sub_poses, None)
    }
}

/// Intrinsics guess for a camera that supplied no calibration: principal
/// point at the image center, focal length from a wide default field of
/// view. Only usable together with intrinsic refinement.
fn default_camera(image_size: (usize, usize)) -> Option<CameraModel> {
    let (width, height) = image_size;
    let focal = 1.2 * width.max(height) as f64;
    CameraModel::pinhole(
        PinholeIntrinsics::new(focal, focal, width as f64 / 2.0, height as f64 / 2.0),
        width,
        height,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DVec3;
    use locus_geometry::So3;
    use locus_map::{Descriptor, Landmark, View};
    use std::collections::BTreeMap;

    const WIDTH: usize = 800;
    const HEIGHT: usize = 600;

    fn camera_model() -> CameraModel {
        CameraModel::pinhole(
            PinholeIntrinsics::new(800.0, 800.0, 400.0, 300.0),
            WIDTH,
            HEIGHT,
        )
        .unwrap()
    }

    fn landmark_positions() -> Vec<[f64; 3]> {
        vec![
            [0.4, -0.3, 4.1],
            [-0.6, 0.2, 5.3],
            [0.8, 0.7, 4.7],
            [-0.2, -0.8, 6.0],
            [0.1, 0.5, 5.5],
            [0.9, -0.6, 4.4],
            [-0.7, -0.1, 4.9],
            [0.3, 0.9, 5.8],
        ]
    }

    fn landmark_descriptor(i: usize) -> Descriptor {
        let mut d = vec![0.0f32; 16];
        d[i % 16] = 10.0;
        d[(i + 5) % 16] = 4.0 + i as f32;
        Descriptor::Float(d)
    }

    fn build_map() -> Map {
        let mut views = BTreeMap::new();
        views.insert(
            0,
            View {
                view_id: 0,
                intrinsic_id: 0,
                image_name: "seed.jpg".to_string(),
            },
        );
        let mut intrinsics = BTreeMap::new();
        intrinsics.insert(0, camera_model());
        let mut poses = BTreeMap::new();
        poses.insert(0, Pose::IDENTITY);
        let mut landmarks = BTreeMap::new();
        for (i, position) in landmark_positions().into_iter().enumerate() {
            landmarks.insert(
                i as u64,
                Landmark {
                    position,
                    descriptor: landmark_descriptor(i),
                    observations: vec![0],
                },
            );
        }
        Map::new(views, intrinsics, poses, landmarks).unwrap()
    }

    fn query_pose() -> Pose {
        Pose::new(
            So3::from_axis_angle(DVec3::new(0.1, 0.9, -0.2), 0.3),
            DVec3::new(0.15, -0.1, 0.35),
        )
    }

    fn query_for_pose(pose: &Pose, cam: &CameraModel) -> QueryFeatures {
        let mut keypoints = Vec::new();
        let mut descriptors = Vec::new();
        for (i, position) in landmark_positions().into_iter().enumerate() {
            let px = cam
                .project(pose.transform(DVec3::from_array(position)))
                .unwrap();
            keypoints.push([px.x, px.y]);
            descriptors.push(landmark_descriptor(i));
        }
        QueryFeatures {
            keypoints,
            descriptors,
        }
    }

    fn localizer() -> MapLocalizer {
        MapLocalizer::new(build_map(), Box::new(crate::describer::NullDescriber))
    }

    #[test]
    fn test_localize_features_recovers_pose() {
        let loc = localizer();
        let cam = camera_model();
        let pose_true = query_pose();
        let features = query_for_pose(&pose_true, &cam);

        let result = loc.localize_features(
            &features,
            (WIDTH, HEIGHT),
            &LocalizerParameters::default(),
            Some(&cam),
        );
        assert!(result.valid);
        assert_eq!(result.inlier_count(), 8);
        assert!(result.pose.translation_distance_to(&pose_true) < 1e-6);
        assert!(result.pose.rotation_angle_to(&pose_true) < 1e-6);
        assert_relative_eq!(result.reproj_rmse.unwrap(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_uninitialized_localizer_fails_all_calls() {
        let empty = Map::new(
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeMap::new(),
        )
        .unwrap();
        let loc = MapLocalizer::new(empty, Box::new(crate::describer::NullDescriber));
        assert!(!loc.is_initialized());

        let cam = camera_model();
        let features = query_for_pose(&query_pose(), &cam);
        let params = LocalizerParameters::default();

        assert!(!loc
            .localize_features(&features, (WIDTH, HEIGHT), &params, Some(&cam))
            .valid);
        let rig = loc.localize_rig_features(
            std::slice::from_ref(&features),
            &params,
            std::slice::from_ref(&cam),
            &[Pose::IDENTITY],
        );
        assert!(!rig.valid);
    }

    #[test]
    fn test_empty_query_fails() {
        let loc = localizer();
        let result = loc.localize_features(
            &QueryFeatures::default(),
            (WIDTH, HEIGHT),
            &LocalizerParameters::default(),
            Some(&camera_model()),
        );
        assert!(!result.valid);
    }

    #[test]
    fn test_incompatible_descriptors_fail_cleanly() {
        let loc = localizer();
        let features = QueryFeatures {
            keypoints: vec![[100.0, 100.0]; 5],
            descriptors: vec![Descriptor::Binary(vec![0xAB; 32]); 5],
        };
        let result = loc.localize_features(
            &features,
            (WIDTH, HEIGHT),
            &LocalizerParameters::default(),
            Some(&camera_model()),
        );
        assert!(!result.valid);
    }

    #[test]
    fn test_localize_without_prior_estimates_intrinsics() {
        let loc = localizer();
        let cam = camera_model();
        let pose_true = query_pose();
        let features = query_for_pose(&pose_true, &cam);

        let result = loc.localize_features(
            &features,
            (WIDTH, HEIGHT),
            &LocalizerParameters::default(),
            None,
        );
        assert!(result.valid);
        let refined = result.camera.unwrap();
        // the focal guess starts 20% off; joint refinement must pull it
        // towards the true calibration
        assert!(
            (refined.intrinsics.fx - 800.0).abs() < 40.0,
            "fx {}",
            refined.intrinsics.fx
        );
        assert!(result.reproj_rmse.unwrap() < 0.5);
    }

    #[test]
    fn test_localize_image_without_describer_fails() {
        let loc = localizer();
        let image = QueryImage::new(vec![0; WIDTH * HEIGHT], WIDTH, HEIGHT).unwrap();
        let result = loc.localize_image(
            &image,
            &LocalizerParameters::default(),
            Some(&camera_model()),
        );
        assert!(!result.valid);
    }

    #[test]
    fn test_rig_features_two_cameras() {
        let loc = localizer();
        let cam = camera_model();
        let rig_pose = query_pose();
        let sub_poses = [
            Pose::IDENTITY,
            Pose::new(So3::IDENTITY, DVec3::new(-0.2, 0.0, 0.0)),
        ];
        let features: Vec<QueryFeatures> = sub_poses
            .iter()
            .map(|sub| query_for_pose(&sub.compose(&rig_pose), &cam))
            .collect();

        let result = loc.localize_rig_features(
            &features,
            &LocalizerParameters::default(),
            &[cam.clone(), cam.clone()],
            &sub_poses,
        );
        assert!(result.valid);
        assert_eq!(result.contributing_cameras, 2);
        assert!(result.pose.translation_distance_to(&rig_pose) < 1e-6);
        assert!(result.cameras.iter().all(|c| c.valid));
    }

    #[test]
    fn test_rig_naive_strategy() {
        let loc = localizer();
        let cam = camera_model();
        let rig_pose = query_pose();
        let sub_poses = [
            Pose::IDENTITY,
            Pose::new(So3::IDENTITY, DVec3::new(-0.2, 0.0, 0.0)),
        ];
        let features: Vec<QueryFeatures> = sub_poses
            .iter()
            .map(|sub| query_for_pose(&sub.compose(&rig_pose), &cam))
            .collect();

        let params = LocalizerParameters {
            use_naive_rig: true,
            ..Default::default()
        };
        let result =
            loc.localize_rig_features(&features, &params, &[cam.clone(), cam.clone()], &sub_poses);
        assert!(result.valid);
        assert_eq!(result.contributing_cameras, 2);
        assert!(result.pose.translation_distance_to(&rig_pose) < 1e-6);
    }

    #[test]
    fn test_rig_mismatched_inputs_fail() {
        let loc = localizer();
        let cam = camera_model();
        let features = vec![query_for_pose(&query_pose(), &cam)];
        let result = loc.localize_rig_features(
            &features,
            &LocalizerParameters::default(),
            &[cam],
            &[Pose::IDENTITY, Pose::IDENTITY],
        );
        assert!(!result.valid);
    }

    #[test]
    fn test_visual_debug_dump() {
        let dir = tempfile::tempdir().unwrap();
        let loc = localizer();
        let cam = camera_model();
        let features = query_for_pose(&query_pose(), &cam);
        let params = LocalizerParameters {
            visual_debug: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let result = loc.localize_features(&features, (WIDTH, HEIGHT), &params, Some(&cam));
        assert!(result.valid);
        assert!(dir.path().join("matches.ppm").exists());
    }
}
