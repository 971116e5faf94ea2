mod common;

use landmarks_core::{
    prepare, train_simple, FolderReport, ForestConfig, Labels, LandmarkDataset, LandmarkError,
    ModelInfo, PrepareConfig, PredictConfig, Predictor, SimpleTrainingConfig, FOREST_FILE,
    LABELS_FILE, MODEL_INFO_FILE,
};

const SIZE: u32 = 32;

#[test]
fn prepare_pads_every_readable_image() {
    let root = tempfile::tempdir().unwrap();
    common::raw_folder(root.path(), "brandenburg_gate", [30, 30, 140], 3);
    std::fs::create_dir(root.path().join("berlin_zoo")).unwrap();
    std::fs::write(root.path().join("brandenburg_gate/broken.jpg"), b"not a jpeg").unwrap();

    let config = PrepareConfig::new(
        root.path().to_path_buf(),
        vec!["brandenburg_gate".into(), "berlin_zoo".into(), "museum_island".into()],
    )
    .with_size(SIZE);
    let report = prepare(&config).unwrap();

    assert_eq!(
        report.folders,
        vec![
            FolderReport::Done {
                name: "brandenburg_gate".into(),
                found: 4,
                processed: 3
            },
            FolderReport::Done {
                name: "berlin_zoo".into(),
                found: 0,
                processed: 0
            },
            FolderReport::Missing {
                name: "museum_island".into()
            },
        ]
    );
    assert_eq!(report.total(), 3);

    let out = root.path().join("brandenburg_gate_processed");
    for i in 0..3 {
        let img = image::open(out.join(format!("photo_{i:02}.jpg"))).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (SIZE, SIZE));
        // landscape input: the top row is padding
        assert!(img.get_pixel(SIZE / 2, 0).0.iter().all(|&c| c > 200));
    }
    assert!(root.path().join("berlin_zoo_processed").is_dir());
}

#[test]
fn forest_predicts_its_training_images() {
    let root = tempfile::tempdir().unwrap();
    common::raw_folder(root.path(), "brandenburg_gate", [20, 20, 120], 10);
    common::raw_folder(root.path(), "berlin_zoo", [210, 180, 40], 10);
    let folders = vec!["brandenburg_gate".to_string(), "berlin_zoo".to_string()];
    prepare(&PrepareConfig::new(root.path().to_path_buf(), folders).with_size(SIZE)).unwrap();

    let artifacts = root.path().join("artifacts");
    let report = train_simple(
        &artifacts,
        SimpleTrainingConfig::new(
            ForestConfig::new().with_n_trees(15).with_max_depth(6),
            root.path().to_path_buf(),
        )
        .with_image_size(SIZE),
    )
    .unwrap();
    assert!(report.test_accuracy > 0.9);
    for file in [FOREST_FILE, LABELS_FILE, MODEL_INFO_FILE] {
        assert!(artifacts.join(file).exists(), "{file} missing");
    }

    let labels = Labels::load(artifacts.join(LABELS_FILE)).unwrap();
    assert_eq!(labels.names(), ["berlin_zoo", "brandenburg_gate"]);
    let info = ModelInfo::load(artifacts.join(MODEL_INFO_FILE)).unwrap();
    assert_eq!(info.framework, "Random Forest");
    assert_eq!(info.input_shape, vec![(SIZE * SIZE) as usize]);
    assert_eq!(info.labels, labels.names());

    let predictor =
        Predictor::load(&PredictConfig::new(artifacts).with_image_size(SIZE)).unwrap();
    for (name, file) in [("berlin_zoo", "photo_03.jpg"), ("brandenburg_gate", "photo_07.jpg")] {
        let path = root.path().join(format!("{name}_processed")).join(file);
        let prediction = predictor.predict(&path).unwrap();
        assert_eq!(prediction.label, name);
        assert!(prediction.confidence > 0.);
    }
}

#[test]
fn predictor_without_forest_is_graceful() {
    let dir = tempfile::tempdir().unwrap();
    let err = Predictor::load(&PredictConfig::new(dir.path().to_path_buf())).unwrap_err();
    assert!(matches!(err, LandmarkError::MissingInput { .. }));
    assert!(err.is_graceful());
}

#[test]
fn empty_data_dir_is_graceful() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("berlin_zoo_processed")).unwrap();
    let err = train_simple(
        &dir.path().join("artifacts"),
        SimpleTrainingConfig::new(ForestConfig::new(), dir.path().to_path_buf()),
    )
    .unwrap_err();
    assert!(matches!(err, LandmarkError::EmptyDataset { .. }));
    assert!(err.is_graceful());
}

#[test]
fn removing_a_folder_shifts_later_indices() {
    let root = tempfile::tempdir().unwrap();
    for (name, colour) in [
        ("berlin_zoo", [200, 0, 0]),
        ("checkpoint_charlie", [0, 200, 0]),
        ("victory_column", [0, 0, 200]),
    ] {
        common::processed_folder(root.path(), name, colour, 2, 8);
    }
    let before = LandmarkDataset::discover(root.path(), 8).unwrap();
    assert_eq!(before.labels.position("victory_column"), Some(2));

    std::fs::remove_dir_all(root.path().join("checkpoint_charlie_processed")).unwrap();
    let after = LandmarkDataset::discover(root.path(), 8).unwrap();
    assert_eq!(after.labels.position("berlin_zoo"), Some(0));
    assert_eq!(after.labels.position("victory_column"), Some(1));
    assert_eq!(after.len(), 4);
}
