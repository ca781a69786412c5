//! End-to-end scans against in-process device servers backed by sim
//! hardware with recorded histories.

use std::sync::Arc;
use std::time::Duration;

use std::path::Path;
use std::sync::Mutex;

use actor::{
    focus_sweep, run_single_exposure, scan_targets, Adjust, AlwaysAccept, ExposureTuning,
    ImageQuality, Rig, RigConfig, RigError, ScanTarget, Scripted, SweepParams, Verdict,
};
use approx::assert_abs_diff_eq;
use device_server::{CameraService, CommandServer, DeviceService, FilterService, StageService};
use hardware::sim::{SimCamera, SimFilter, SimStage, StageEvent};
use hardware::Axis;
use protocol::FrameType;

async fn serve<S: DeviceService>(service: S) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(CommandServer::new(service).serve_on(listener));
    addr.to_string()
}

struct TestRig {
    rig: Arc<Rig>,
    camera: Arc<SimCamera>,
    filter: Arc<SimFilter>,
    stage: Arc<SimStage>,
    _dir: tempfile::TempDir,
}

async fn start_rig() -> TestRig {
    let dir = tempfile::tempdir().unwrap();
    let camera = Arc::new(SimCamera::new().with_time_scale(0.001));
    let filter = Arc::new(SimFilter::new().with_move_time(Duration::from_millis(5)));
    let stage = Arc::new(SimStage::new().with_move_time(Duration::from_millis(5)));

    let camera_addr = serve(CameraService::new(Arc::clone(&camera), dir.path()).unwrap()).await;
    let filter_addr = serve(FilterService::new(Arc::clone(&filter))).await;
    let stage_addr = serve(StageService::new(Arc::clone(&stage))).await;

    let rig = Rig::new(RigConfig {
        camera_addr,
        filter_addr,
        stage_addr,
        poll_interval: Duration::from_millis(5),
        idle_timeout: Duration::from_secs(30),
        command_timeout: Duration::from_secs(30),
    });
    TestRig {
        rig,
        camera,
        filter,
        stage,
        _dir: dir,
    }
}

/// Scripted verdicts that also record the exposure time each assessment
/// was handed.
struct RecordingQuality {
    verdicts: Vec<Verdict>,
    seen_seconds: Arc<Mutex<Vec<f64>>>,
}

impl RecordingQuality {
    fn new(verdicts: Vec<Verdict>) -> (Self, Arc<Mutex<Vec<f64>>>) {
        let seen_seconds = Arc::new(Mutex::new(Vec::new()));
        (
            RecordingQuality {
                verdicts,
                seen_seconds: Arc::clone(&seen_seconds),
            },
            seen_seconds,
        )
    }
}

impl ImageQuality for RecordingQuality {
    fn assess(&mut self, _image: &Path, seconds: f64) -> Verdict {
        self.seen_seconds.lock().unwrap().push(seconds);
        if self.verdicts.is_empty() {
            Verdict::Accept
        } else {
            self.verdicts.remove(0)
        }
    }
}

fn target() -> ScanTarget {
    ScanTarget {
        r: 10.0,
        t: 0.0,
        z: 0.0,
        exp_time: 2.0,
        filter_slot: 1,
    }
}

/// Z positions of every absolute focus move, in command order, in mm.
fn z_moves(stage: &SimStage) -> Vec<f64> {
    stage
        .history()
        .into_iter()
        .filter_map(|event| match event {
            StageEvent::MoveAbs {
                axis: Axis::Z,
                target,
            } => Some(target.as_units(Axis::Z)),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn single_target_scan_accepts_first_exposure() {
    let t = start_rig().await;
    let rig = Arc::clone(&t.rig);
    let targets = vec![target()];

    tokio::task::spawn_blocking(move || {
        let mut quality = AlwaysAccept;
        scan_targets(
            &rig,
            &mut quality,
            ExposureTuning::default(),
            &targets,
            FrameType::Light,
            None,
            false,
        )
    })
    .await
    .unwrap()
    .unwrap();

    let exposures = t.camera.history();
    assert_eq!(exposures.len(), 1);
    assert_eq!(exposures[0].frame, FrameType::Light);
    assert_eq!(exposures[0].seconds, 2.0);
    assert_eq!(t.filter.history(), vec![1]);

    // The stage was sent to r=10 mm.
    let r_move = t
        .stage
        .history()
        .into_iter()
        .find_map(|event| match event {
            StageEvent::MoveAbs {
                axis: Axis::R,
                target,
            } => Some(target.as_units(Axis::R)),
            _ => None,
        })
        .expect("stage saw an R move");
    assert_abs_diff_eq!(r_move, 10.0, epsilon = 1e-6);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_exposures_halve_the_time_until_accepted() {
    let t = start_rig().await;
    let rig = Arc::clone(&t.rig);

    let (quality, seen_seconds) = RecordingQuality::new(vec![
        Verdict::Reject(Adjust::Decrease),
        Verdict::Reject(Adjust::Decrease),
        Verdict::Accept,
    ]);
    let accepted = tokio::task::spawn_blocking(move || {
        let mut quality = quality;
        run_single_exposure(
            &rig,
            &mut quality,
            ExposureTuning::default(),
            &target(),
            FrameType::Light,
            2.0,
        )
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(accepted, 0.5);
    let times: Vec<f64> = t.camera.history().iter().map(|e| e.seconds).collect();
    assert_eq!(times, vec![2.0, 1.0, 0.5]);
    // Each assessment sees the time that produced its frame.
    assert_eq!(*seen_seconds.lock().unwrap(), vec![2.0, 1.0, 0.5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn underexposure_lengthens_the_next_attempt() {
    let t = start_rig().await;
    let rig = Arc::clone(&t.rig);

    tokio::task::spawn_blocking(move || {
        let mut quality = Scripted::new(vec![Verdict::Reject(Adjust::Increase)]);
        run_single_exposure(
            &rig,
            &mut quality,
            ExposureTuning::default(),
            &target(),
            FrameType::Light,
            2.0,
        )
    })
    .await
    .unwrap()
    .unwrap();

    let times: Vec<f64> = t.camera.history().iter().map(|e| e.seconds).collect();
    assert_eq!(times, vec![2.0, 3.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn focus_sweep_visits_positive_then_negative_offsets() {
    let t = start_rig().await;
    let rig = Arc::clone(&t.rig);
    let center = ScanTarget {
        z: 5.0,
        ..target()
    };

    tokio::task::spawn_blocking(move || {
        let mut quality = AlwaysAccept;
        focus_sweep(
            &rig,
            &mut quality,
            ExposureTuning::default(),
            &center,
            FrameType::Light,
            SweepParams {
                offset_step: 1.0,
                offset_count: 2,
            },
            1.0,
        )
    })
    .await
    .unwrap()
    .unwrap();

    let visited = z_moves(&t.stage);
    assert_eq!(visited.len(), 4);
    for (got, want) in visited.iter().zip([6.0, 7.0, 4.0, 3.0]) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
    }
    // The sweep never re-exposes the center position.
    assert!(visited.iter().all(|z| (z - 5.0).abs() > 1e-6));
    assert_eq!(t.camera.history().len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn sweep_scan_exposes_the_center_before_sweeping() {
    let t = start_rig().await;
    let rig = Arc::clone(&t.rig);
    let targets = vec![ScanTarget {
        z: 5.0,
        ..target()
    }];

    tokio::task::spawn_blocking(move || {
        let mut quality = AlwaysAccept;
        scan_targets(
            &rig,
            &mut quality,
            ExposureTuning::default(),
            &targets,
            FrameType::Light,
            Some(SweepParams {
                offset_step: 1.0,
                offset_count: 2,
            }),
            false,
        )
    })
    .await
    .unwrap()
    .unwrap();

    // Center exposure first, then the sweep positions.
    let visited = z_moves(&t.stage);
    assert_eq!(visited.len(), 5, "visited z = {visited:?}");
    for (got, want) in visited.iter().zip([5.0, 6.0, 7.0, 4.0, 3.0]) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
    }
    // The center's accepted time carries into every sweep exposure.
    let times: Vec<f64> = t.camera.history().iter().map(|e| e.seconds).collect();
    assert_eq!(times, vec![2.0; 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_exhaustion_skips_the_target_and_continues() {
    let t = start_rig().await;
    let rig = Arc::clone(&t.rig);
    let targets = vec![target(), target().with_z(0.5)];

    tokio::task::spawn_blocking(move || {
        // Three rejections exhaust target one; target two accepts.
        let mut quality = Scripted::new(vec![
            Verdict::Reject(Adjust::Decrease),
            Verdict::Reject(Adjust::Decrease),
            Verdict::Reject(Adjust::Decrease),
        ]);
        scan_targets(
            &rig,
            &mut quality,
            ExposureTuning::default(),
            &targets,
            FrameType::Light,
            None,
            false,
        )
    })
    .await
    .unwrap()
    .unwrap();

    // 3 exhausted attempts plus 1 accepted exposure for the second target.
    assert_eq!(t.camera.history().len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_range_ccd_temperature_aborts_the_run() {
    let t = start_rig().await;
    t.camera.force_temperature(35.0);
    let rig = Arc::clone(&t.rig);
    let targets = vec![target()];

    let err = tokio::task::spawn_blocking(move || {
        let mut quality = AlwaysAccept;
        scan_targets(
            &rig,
            &mut quality,
            ExposureTuning::default(),
            &targets,
            FrameType::Light,
            None,
            false,
        )
    })
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, RigError::TemperatureOutOfRange { celsius } if celsius == 35.0));
    assert!(!err.is_soft());
    assert!(t.camera.history().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_stops_the_scan_before_the_next_checkpoint() {
    let t = start_rig().await;
    t.rig.cancel();
    let rig = Arc::clone(&t.rig);
    let targets = vec![target()];

    let err = tokio::task::spawn_blocking(move || {
        let mut quality = AlwaysAccept;
        scan_targets(
            &rig,
            &mut quality,
            ExposureTuning::default(),
            &targets,
            FrameType::Light,
            None,
            false,
        )
    })
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, RigError::Cancelled));
    assert!(t.camera.history().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_movers_do_not_double_dispatch() {
    let slow_stage = Arc::new(SimStage::new().with_move_time(Duration::from_millis(500)));
    let addr = serve(StageService::new(Arc::clone(&slow_stage))).await;

    let client = protocol::DeviceClient::new(addr).with_timeout(Duration::from_secs(30));
    let (c1, c2) = (client.clone(), client);
    let a = tokio::task::spawn_blocking(move || c1.send_line("move z=1.0"));
    let b = tokio::task::spawn_blocking(move || c2.send_line("move z=2.0"));
    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

    let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(oks, 1, "{a:?} / {b:?}");
    // Only the winner's move reached the hardware.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(slow_stage.history().len(), 1);
}
