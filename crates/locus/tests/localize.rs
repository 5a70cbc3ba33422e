//! End-to-end localization scenarios against a synthetic reconstruction.

use std::collections::BTreeMap;

use glam::DVec3;
use locus::describer::{DescribeError, FeatureDescriber, NullDescriber, QueryImage};
use locus::geometry::{Pose, So3};
use locus::map::{CameraModel, Descriptor, Landmark, Map, PinholeIntrinsics, View};
use locus::matching::QueryFeatures;
use locus::{DescriberPreset, Localizer, LocalizerParameters, MapLocalizer};

const WIDTH: usize = 800;
const HEIGHT: usize = 600;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn camera_model() -> CameraModel {
    CameraModel::pinhole(
        PinholeIntrinsics::new(800.0, 800.0, 400.0, 300.0),
        WIDTH,
        HEIGHT,
    )
    .unwrap()
}

fn scene_points() -> Vec<[f64; 3]> {
    vec![
        [0.4, -0.3, 4.1],
        [-0.6, 0.2, 5.3],
        [0.8, 0.7, 4.7],
        [-0.2, -0.8, 6.0],
        [0.1, 0.5, 5.5],
        [0.9, -0.6, 4.4],
    ]
}

fn descriptor(i: usize) -> Descriptor {
    let mut d = vec![0.0f32; 8];
    d[i % 8] = 10.0;
    d[(i + 3) % 8] = 3.0 + i as f32;
    Descriptor::Float(d)
}

fn build_map(positions: &[[f64; 3]]) -> Map {
    let mut views = BTreeMap::new();
    views.insert(
        0,
        View {
            view_id: 0,
            intrinsic_id: 0,
            image_name: "keyframe_000.jpg".to_string(),
        },
    );
    let mut intrinsics = BTreeMap::new();
    intrinsics.insert(0, camera_model());
    let mut poses = BTreeMap::new();
    poses.insert(0, Pose::IDENTITY);
    let mut landmarks = BTreeMap::new();
    for (i, &position) in positions.iter().enumerate() {
        landmarks.insert(
            i as u64,
            Landmark {
                position,
                descriptor: descriptor(i),
                observations: vec![0],
            },
        );
    }
    Map::new(views, intrinsics, poses, landmarks).unwrap()
}

fn query_pose() -> Pose {
    Pose::new(
        So3::from_axis_angle(DVec3::new(0.2, 1.0, -0.3), 0.35),
        DVec3::new(0.1, -0.2, 0.4),
    )
}

/// Features observed at the exact projections of the true scene points.
fn exact_query(pose: &Pose, cam: &CameraModel) -> QueryFeatures {
    let mut keypoints = Vec::new();
    let mut descriptors = Vec::new();
    for (i, p) in scene_points().into_iter().enumerate() {
        let px = cam.project(pose.transform(DVec3::from_array(p))).unwrap();
        keypoints.push([px.x, px.y]);
        descriptors.push(descriptor(i));
    }
    QueryFeatures {
        keypoints,
        descriptors,
    }
}

struct CannedDescriber(QueryFeatures);

impl FeatureDescriber for CannedDescriber {
    fn describe(
        &self,
        _image: &QueryImage,
        _preset: DescriberPreset,
    ) -> Result<QueryFeatures, DescribeError> {
        Ok(self.0.clone())
    }
}

#[test]
fn six_point_scenario_recovers_exact_pose() {
    init_logger();
    let cam = camera_model();
    let pose_true = query_pose();
    let map = build_map(&scene_points());
    let localizer = MapLocalizer::new(map, Box::new(NullDescriber));

    let result = localizer.localize_features(
        &exact_query(&pose_true, &cam),
        (WIDTH, HEIGHT),
        &LocalizerParameters::default(),
        Some(&cam),
    );

    assert!(result.valid);
    assert_eq!(result.inlier_count(), 6);
    assert!(result.pose.translation_distance_to(&pose_true) < 1e-6);
    assert!(result.pose.rotation_angle_to(&pose_true) < 1e-6);
}

#[test]
fn two_swapped_landmarks_leave_four_inliers() {
    init_logger();
    let cam = camera_model();
    let pose_true = query_pose();

    // landmarks 1 and 4 of the map point at wrong 3D positions, so their
    // descriptor matches become gross outlier associations
    let mut corrupted = scene_points();
    corrupted[1] = [2.5, -1.8, 9.0];
    corrupted[4] = [-3.0, 2.2, 8.0];
    let map = build_map(&corrupted);
    let localizer = MapLocalizer::new(map, Box::new(NullDescriber));

    let result = localizer.localize_features(
        &exact_query(&pose_true, &cam),
        (WIDTH, HEIGHT),
        &LocalizerParameters::default(),
        Some(&cam),
    );

    assert!(result.valid);
    assert_eq!(result.inlier_count(), 4);
    let mut inlier_landmarks: Vec<u64> = result.inliers.iter().map(|c| c.landmark).collect();
    inlier_landmarks.sort_unstable();
    assert_eq!(inlier_landmarks, vec![0, 2, 3, 5]);
    assert!(result.pose.translation_distance_to(&pose_true) < 1e-6);
    assert!(result.pose.rotation_angle_to(&pose_true) < 1e-6);
}

#[test]
fn raw_image_entry_point_delegates_to_describer() {
    let cam = camera_model();
    let pose_true = query_pose();
    let map = build_map(&scene_points());
    let features = exact_query(&pose_true, &cam);
    let localizer = MapLocalizer::new(map, Box::new(CannedDescriber(features)));

    let image = QueryImage::new(vec![128; WIDTH * HEIGHT], WIDTH, HEIGHT).unwrap();
    let result = localizer.localize_image(&image, &LocalizerParameters::default(), Some(&cam));

    assert!(result.valid);
    assert!(result.pose.translation_distance_to(&pose_true) < 1e-6);
}

#[test]
fn rig_single_camera_identity_subpose_matches_single_camera() {
    let cam = camera_model();
    let pose_true = query_pose();
    let map = build_map(&scene_points());
    let localizer = MapLocalizer::new(map, Box::new(NullDescriber));
    let features = exact_query(&pose_true, &cam);
    let params = LocalizerParameters::default();

    let single = localizer.localize_features(&features, (WIDTH, HEIGHT), &params, Some(&cam));
    let rig = localizer.localize_rig_features(
        std::slice::from_ref(&features),
        &params,
        std::slice::from_ref(&cam),
        &[Pose::IDENTITY],
    );

    assert!(single.valid && rig.valid);
    assert_eq!(rig.contributing_cameras, 1);
    assert!(rig.pose.translation_distance_to(&single.pose) < 1e-6);
    assert!(rig.pose.rotation_angle_to(&single.pose) < 1e-6);
}

#[test]
fn rig_excludes_corrupted_camera_and_reports_count() {
    let cam = camera_model();
    let rig_pose = query_pose();
    let map = build_map(&scene_points());
    let localizer = MapLocalizer::new(map, Box::new(NullDescriber));

    let sub_poses = [
        Pose::IDENTITY,
        Pose::new(So3::IDENTITY, DVec3::new(-0.2, 0.0, 0.0)),
    ];
    let good = exact_query(&sub_poses[0].compose(&rig_pose), &cam);
    let mut bad = exact_query(&sub_poses[1].compose(&rig_pose), &cam);
    // drag every keypoint of the second camera far from its projection
    for (i, kp) in bad.keypoints.iter_mut().enumerate() {
        kp[0] = 40.0 + 90.0 * i as f64;
        kp[1] = 560.0 - 70.0 * i as f64;
    }

    let result = localizer.localize_rig_features(
        &[good, bad],
        &LocalizerParameters::default(),
        &[cam.clone(), cam.clone()],
        &sub_poses,
    );

    assert!(result.valid);
    assert_eq!(result.contributing_cameras, 1);
    assert!(result.cameras[0].valid);
    assert!(!result.cameras[1].valid);
    assert!(result.pose.translation_distance_to(&rig_pose) < 1e-6);
}

#[test]
fn rig_naive_and_generalized_agree_on_clean_data() {
    let cam = camera_model();
    let rig_pose = query_pose();
    let map = build_map(&scene_points());
    let localizer = MapLocalizer::new(map, Box::new(NullDescriber));

    let sub_poses = [
        Pose::IDENTITY,
        Pose::new(
            So3::from_axis_angle(DVec3::Y, 0.05),
            DVec3::new(-0.2, 0.0, 0.0),
        ),
    ];
    let features: Vec<QueryFeatures> = sub_poses
        .iter()
        .map(|sub| exact_query(&sub.compose(&rig_pose), &cam))
        .collect();
    let cameras = [cam.clone(), cam.clone()];

    let generalized = localizer.localize_rig_features(
        &features,
        &LocalizerParameters::default(),
        &cameras,
        &sub_poses,
    );
    let naive = localizer.localize_rig_features(
        &features,
        &LocalizerParameters {
            use_naive_rig: true,
            ..Default::default()
        },
        &cameras,
        &sub_poses,
    );

    assert!(generalized.valid && naive.valid);
    assert!(generalized.pose.translation_distance_to(&rig_pose) < 1e-6);
    assert!(naive.pose.translation_distance_to(&rig_pose) < 1e-6);
    assert!(generalized.pose.translation_distance_to(&naive.pose) < 1e-5);
}
