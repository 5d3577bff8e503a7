use approx::assert_relative_eq;
use tempfile::TempDir;
use touchcal_core::{Pt2, Transform};
use touchcal_pipeline::{
    format_matrix_property, parse_matrix_property, run_activate, run_calibration, AutoConfirm,
    CalibrateOptions, CalibrationOutcome, CalibrationRecord, DeviceError, MemoryBackend,
    SamplerEvent, ScriptedSampler, SessionConfig, StoreError,
};

const IDENTITY: &str = "1, 0, 0, 0, 1, 0, 0, 0, 1";

// Panel that reports half-scale, offset by a quarter: raw = 0.5 * screen + 0.25.
fn half_scale_taps() -> Vec<Pt2> {
    vec![
        Pt2::new(0.3, 0.3),
        Pt2::new(0.7, 0.3),
        Pt2::new(0.3, 0.7),
        Pt2::new(0.7, 0.7),
    ]
}

fn expected_matrix() -> [f64; 9] {
    [2.0, 0.0, -0.5, 0.0, 2.0, -0.5, 0.0, 0.0, 1.0]
}

fn assert_matrix_eq(actual: [f64; 9], expected: [f64; 9]) {
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_relative_eq!(a, e, epsilon = 1e-9);
    }
}

fn options(dir: &TempDir) -> CalibrateOptions {
    CalibrateOptions {
        record_path: Some(dir.path().join("calibration.toml")),
        ..CalibrateOptions::default()
    }
}

#[test]
fn confirmed_calibration_is_applied_and_saved() {
    let dir = TempDir::new().unwrap();
    let opts = options(&dir);
    let mut backend = MemoryBackend::new()
        .with_device(9, "USB Mouse", Some(IDENTITY))
        .with_device(10, "ELAN Touchscreen", Some(IDENTITY));
    let mut sampler = ScriptedSampler::from_taps(half_scale_taps());

    let outcome =
        run_calibration(&mut backend, &mut sampler, &mut AutoConfirm(true), &opts).unwrap();

    let CalibrationOutcome::Confirmed {
        record,
        fit,
        applied,
    } = outcome
    else {
        panic!("expected a confirmed calibration, got {outcome:?}");
    };
    assert!(applied);
    assert!(fit.quality > 6.0);
    assert_eq!(record.device_name, "ELAN Touchscreen");
    assert_matrix_eq(record.transform.to_row_major(), expected_matrix());

    assert_eq!(backend.write_count(), 1);
    assert_eq!(backend.property(9), Some(IDENTITY));
    let written = parse_matrix_property(backend.property(10).unwrap()).unwrap();
    assert_matrix_eq(written, expected_matrix());

    let saved = CalibrationRecord::load(opts.record_path.as_deref().unwrap()).unwrap();
    assert_eq!(saved.device_name, "ELAN Touchscreen");
    assert_matrix_eq(saved.transform.to_row_major(), expected_matrix());
}

#[test]
fn recalibrating_removes_the_active_transform_first() {
    let active = Transform::from_row_major(expected_matrix());
    let mut backend = MemoryBackend::new().with_device(
        10,
        "ELAN Touchscreen",
        Some(&format_matrix_property(&active.to_row_major())),
    );
    // Taps already land on target under the active calibration.
    let opts = CalibrateOptions::default();
    let targets = [
        Pt2::new(0.1, 0.1),
        Pt2::new(0.9, 0.1),
        Pt2::new(0.1, 0.9),
        Pt2::new(0.9, 0.9),
    ];
    let mut sampler = ScriptedSampler::from_taps(targets);

    let outcome =
        run_calibration(&mut backend, &mut sampler, &mut AutoConfirm(true), &opts).unwrap();

    let CalibrationOutcome::Confirmed { record, .. } = outcome else {
        panic!("expected a confirmed calibration, got {outcome:?}");
    };
    assert_matrix_eq(record.transform.to_row_major(), expected_matrix());
}

#[test]
fn cancel_leaves_device_and_disk_untouched() {
    let dir = TempDir::new().unwrap();
    let opts = options(&dir);
    let mut backend = MemoryBackend::new().with_device(10, "ELAN Touchscreen", Some(IDENTITY));
    let mut sampler = ScriptedSampler::new([
        SamplerEvent::Tap(Pt2::new(0.3, 0.3)),
        SamplerEvent::Tap(Pt2::new(0.7, 0.3)),
        SamplerEvent::Cancel,
    ]);

    let outcome =
        run_calibration(&mut backend, &mut sampler, &mut AutoConfirm(true), &opts).unwrap();

    assert_eq!(outcome, CalibrationOutcome::Cancelled);
    assert_eq!(backend.write_count(), 0);
    assert_eq!(backend.property(10), Some(IDENTITY));
    assert!(!opts.record_path.unwrap().exists());
}

#[test]
fn rejected_fit_is_not_applied() {
    let dir = TempDir::new().unwrap();
    let opts = options(&dir);
    let mut backend = MemoryBackend::new().with_device(10, "ELAN Touchscreen", None);
    let mut sampler = ScriptedSampler::from_taps(half_scale_taps());

    let outcome =
        run_calibration(&mut backend, &mut sampler, &mut AutoConfirm(false), &opts).unwrap();

    assert_eq!(outcome, CalibrationOutcome::Rejected);
    assert_eq!(backend.write_count(), 0);
    assert_eq!(backend.property(10), None);
    assert!(!opts.record_path.unwrap().exists());
}

#[test]
fn dry_run_fits_without_writing() {
    let dir = TempDir::new().unwrap();
    let opts = CalibrateOptions {
        dry_run: true,
        ..options(&dir)
    };
    let mut backend = MemoryBackend::new().with_device(10, "ELAN Touchscreen", Some(IDENTITY));
    let mut sampler = ScriptedSampler::from_taps(half_scale_taps());

    let outcome =
        run_calibration(&mut backend, &mut sampler, &mut AutoConfirm(true), &opts).unwrap();

    assert!(matches!(
        outcome,
        CalibrationOutcome::Confirmed { applied: false, .. }
    ));
    assert_eq!(backend.write_count(), 0);
    assert!(!opts.record_path.unwrap().exists());
}

#[test]
fn test_taps_are_previewed_before_confirmation() {
    let opts = CalibrateOptions {
        session: SessionConfig {
            test_points: 1,
            ..SessionConfig::default()
        },
        ..CalibrateOptions::default()
    };
    let mut backend = MemoryBackend::new().with_device(10, "ELAN Touchscreen", None);
    let mut taps = half_scale_taps();
    taps.push(Pt2::new(0.5, 0.5));
    let mut sampler = ScriptedSampler::from_taps(taps);

    let outcome =
        run_calibration(&mut backend, &mut sampler, &mut AutoConfirm(true), &opts).unwrap();

    assert!(matches!(outcome, CalibrationOutcome::Confirmed { applied: true, .. }));
    assert_eq!(sampler.remaining(), 0);
}

#[test]
fn degenerate_taps_restart_collection() {
    let mut backend = MemoryBackend::new().with_device(10, "ELAN Touchscreen", None);
    // First round is collinear; the second round is usable.
    let mut taps = vec![
        Pt2::new(0.1, 0.1),
        Pt2::new(0.2, 0.2),
        Pt2::new(0.3, 0.3),
        Pt2::new(0.4, 0.4),
    ];
    taps.extend(half_scale_taps());
    let mut sampler = ScriptedSampler::from_taps(taps);

    let outcome = run_calibration(
        &mut backend,
        &mut sampler,
        &mut AutoConfirm(true),
        &CalibrateOptions::default(),
    )
    .unwrap();

    let CalibrationOutcome::Confirmed { record, .. } = outcome else {
        panic!("expected a confirmed calibration, got {outcome:?}");
    };
    assert_matrix_eq(record.transform.to_row_major(), expected_matrix());
}

#[test]
fn missing_devices_are_reported() {
    let mut backend = MemoryBackend::new();
    let mut sampler = ScriptedSampler::from_taps(half_scale_taps());

    let err = run_calibration(
        &mut backend,
        &mut sampler,
        &mut AutoConfirm(true),
        &CalibrateOptions::default(),
    )
    .unwrap_err();

    assert_eq!(
        err.downcast_ref::<DeviceError>(),
        Some(&DeviceError::NoDevicesFound)
    );
}

#[test]
fn failed_write_is_surfaced_and_nothing_is_saved() {
    let dir = TempDir::new().unwrap();
    let opts = options(&dir);
    let mut backend = MemoryBackend::new()
        .with_device(10, "ELAN Touchscreen", Some(IDENTITY))
        .failing_writes();
    let mut sampler = ScriptedSampler::from_taps(half_scale_taps());

    let err = run_calibration(&mut backend, &mut sampler, &mut AutoConfirm(true), &opts)
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::PropertyWriteFailed { .. })
    ));
    assert!(!opts.record_path.unwrap().exists());
}

#[test]
fn activate_reapplies_the_saved_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calibration.toml");
    let saved = CalibrationRecord::new(
        "ELAN Touchscreen",
        Transform::from_row_major(expected_matrix()),
    );
    saved.save(&path).unwrap();
    let mut backend = MemoryBackend::new()
        .with_device(9, "USB Mouse", Some(IDENTITY))
        .with_device(10, "ELAN Touchscreen", Some(IDENTITY));

    let record = run_activate(&mut backend, &path).unwrap();

    assert_eq!(record, saved);
    assert_eq!(backend.property(9), Some(IDENTITY));
    let written = parse_matrix_property(backend.property(10).unwrap()).unwrap();
    assert_matrix_eq(written, expected_matrix());
}

#[test]
fn activate_without_a_record_fails() {
    let dir = TempDir::new().unwrap();
    let mut backend = MemoryBackend::new().with_device(10, "ELAN Touchscreen", Some(IDENTITY));

    let err = run_activate(&mut backend, &dir.path().join("absent.toml")).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Read { .. })
    ));
    assert_eq!(backend.write_count(), 0);
}

#[test]
fn activate_requires_the_property_on_the_device() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calibration.toml");
    CalibrationRecord::new("ELAN Touchscreen", Transform::identity())
        .save(&path)
        .unwrap();

    let mut unset = MemoryBackend::new().with_device(10, "ELAN Touchscreen", None);
    let err = run_activate(&mut unset, &path).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::PropertyUnset { .. })
    ));

    let mut other = MemoryBackend::new().with_device(3, "Another Panel", Some(IDENTITY));
    let err = run_activate(&mut other, &path).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::DeviceNotFound(_))
    ));
}
