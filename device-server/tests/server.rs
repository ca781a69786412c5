//! End-to-end tests over real TCP sockets: one in-process server per test,
//! bound to port 0, driven by the blocking protocol client.

use std::time::{Duration, Instant};

use device_server::{
    CameraService, CommandServer, DeviceService, FilterService, StageService,
};
use hardware::sim::{SimCamera, SimFilter, SimStage};
use protocol::{BusyState, DeviceClient};

async fn start<S: DeviceService>(service: S) -> DeviceClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(CommandServer::new(service).serve_on(listener));
    DeviceClient::new(addr.to_string()).with_timeout(Duration::from_secs(60))
}

/// Block on one request from inside a tokio test.
async fn send(client: &DeviceClient, line: &str) -> protocol::Response {
    let client = client.clone();
    let line = line.to_string();
    tokio::task::spawn_blocking(move || client.send_line(&line))
        .await
        .unwrap()
        .unwrap()
}

async fn poll_until(client: &DeviceClient, want: BusyState) -> protocol::StatusReport {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let c = client.clone();
        let status = tokio::task::spawn_blocking(move || c.status())
            .await
            .unwrap()
            .unwrap();
        if status.busy == want {
            return status;
        }
        assert!(Instant::now() < deadline, "device never reached {want}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_moves_yield_one_ok_one_busy() {
    let stage = SimStage::new().with_move_time(Duration::from_millis(500));
    let client = start(StageService::new(stage)).await;

    let (a, b) = {
        let (c1, c2) = (client.clone(), client.clone());
        let t1 = tokio::task::spawn_blocking(move || c1.send_line("move z=1.0"));
        let t2 = tokio::task::spawn_blocking(move || c2.send_line("move z=2.0"));
        (t1.await.unwrap().unwrap(), t2.await.unwrap().unwrap())
    };

    let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(oks, 1, "exactly one move wins: {a:?} / {b:?}");
    let loser = if a.is_ok() { &b } else { &a };
    assert_eq!(loser.bad_reason(), Some("busy"));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_stays_responsive_during_exposure() {
    let dir = tempfile::tempdir().unwrap();
    let camera = SimCamera::new().with_time_scale(0.2);
    let client = start(CameraService::new(camera, dir.path()).unwrap()).await;

    let exposer = {
        let c = client.clone();
        tokio::task::spawn_blocking(move || c.send_line("expose light 2.0"))
    };

    // While the 400 ms simulated exposure runs, status answers promptly.
    let status = poll_until(&client, BusyState::Busy).await;
    assert_eq!(status.busy, BusyState::Busy);
    assert!(status.get("ccd_temp").is_some());

    let response = exposer.await.unwrap().unwrap();
    assert!(response.is_ok(), "{response:?}");
    let filename = response.payload_value("filename").unwrap().to_string();
    assert!(filename.ends_with("raw-00000001.fits"));

    let status = poll_until(&client, BusyState::Idle).await;
    assert_eq!(status.get("last_image"), Some(filename.as_str()));
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_while_idle_reports_bad_idle() {
    let client = start(StageService::new(SimStage::new())).await;
    let response = send(&client, "stop").await;
    assert_eq!(response.bad_reason(), Some("idle"));
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_aborts_inflight_move() {
    let stage = SimStage::new().with_move_time(Duration::from_secs(30));
    let client = start(StageService::new(stage)).await;

    let mover = {
        let c = client.clone();
        tokio::task::spawn_blocking(move || c.send_line("move r=5.0"))
    };
    poll_until(&client, BusyState::Busy).await;

    let response = send(&client, "stop").await;
    assert!(response.is_ok());
    assert_eq!(
        response.encode().trim(),
        "OK: aborting move",
        "stop acknowledges receipt with the operation name"
    );

    let response = mover.await.unwrap().unwrap();
    assert_eq!(response.bad_reason(), Some("move aborted"));
    poll_until(&client, BusyState::Idle).await;

    // The abort never bleeds into the next command.
    let response = send(&client, "move r=0.1").await;
    assert!(response.is_ok(), "{response:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn camera_set_is_gated_while_exposing() {
    let dir = tempfile::tempdir().unwrap();
    let camera = SimCamera::new().with_time_scale(1.0);
    let client = start(CameraService::new(camera, dir.path()).unwrap()).await;

    let exposer = {
        let c = client.clone();
        tokio::task::spawn_blocking(move || c.send_line("expose light 2.0"))
    };
    poll_until(&client, BusyState::Busy).await;

    let response = send(&client, "set bin=2").await;
    assert_eq!(response.bad_reason(), Some("busy"));
    let response = send(&client, "set cooler=off").await;
    assert!(response.is_ok());

    send(&client, "stop").await;
    let _ = exposer.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_slot_change_reports_busy_then_new_slot() {
    let wheel = SimFilter::new().with_move_time(Duration::from_millis(400));
    let client = start(FilterService::new(wheel)).await;

    let mover = {
        let c = client.clone();
        tokio::task::spawn_blocking(move || c.send_line("set slot=3"))
    };
    let status = poll_until(&client, BusyState::Busy).await;
    assert_eq!(status.get("slot"), Some("1"), "wheel still travelling");

    let response = mover.await.unwrap().unwrap();
    assert_eq!(response.payload_value("slot"), Some("3"));
    let status = poll_until(&client, BusyState::Idle).await;
    assert_eq!(status.get("slot"), Some("3"));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_commands_get_bad_reasons() {
    let client = start(StageService::new(SimStage::new())).await;

    for (line, reason) in [
        ("wiggle", "Invalid Command"),
        ("move q=1.0", "Invalid axis q"),
        ("move r=fast", "Invalid value for r"),
        ("expose light 1.0", "Invalid Command"),
    ] {
        let response = send(&client, line).await;
        assert_eq!(response.bad_reason(), Some(reason), "{line}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn quit_closes_without_a_response() {
    let client = start(StageService::new(SimStage::new())).await;
    let c = client.clone();
    let result = tokio::task::spawn_blocking(move || c.send_line("quit"))
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(protocol::ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_verb_works_case_insensitively() {
    let client = start(StageService::new(SimStage::new())).await;
    let response = send(&client, "STATUS").await;
    assert!(response.is_ok());
    let report = protocol::StatusReport::from_response(&response).unwrap();
    assert_eq!(report.busy, BusyState::Idle);
}
