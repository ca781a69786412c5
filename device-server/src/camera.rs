//! CCD camera command service.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hardware::{AbortToken, AdapterError, CameraAdapter};
use protocol::{BusyState, Command, FrameType, ParseError, Response, StatusReport};
use tracing::{info, warn};

/// Image numbering/naming state: `raw-NNNNNNNN.fits` in the output dir.
#[derive(Debug, Clone)]
struct ImageStore {
    file_dir: PathBuf,
    img_num: u64,
    last_image: Option<PathBuf>,
}

impl ImageStore {
    /// Scan a directory for the highest existing `raw-*.fits` number so
    /// numbering resumes across server restarts.
    fn scan(file_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(file_dir)?;
        let mut img_num = 0;
        let mut last_image = None;
        for entry in std::fs::read_dir(file_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(number) = name
                .strip_prefix("raw-")
                .and_then(|rest| rest.strip_suffix(".fits"))
                .and_then(|digits| digits.parse::<u64>().ok())
            else {
                continue;
            };
            if number > img_num {
                img_num = number;
                last_image = Some(path);
            }
        }
        Ok(ImageStore {
            file_dir: file_dir.to_path_buf(),
            img_num,
            last_image,
        })
    }

    fn next_path(&self) -> PathBuf {
        self.file_dir
            .join(format!("raw-{:08}.fits", self.img_num + 1))
    }
}

/// State and command handling for the camera server.
pub struct CameraService<C: CameraAdapter> {
    camera: C,
    store: Mutex<ImageStore>,
    frame: Mutex<FrameType>,
}

impl<C: CameraAdapter> CameraService<C> {
    /// Create the service, scanning `file_dir` to resume image numbering.
    pub fn new(camera: C, file_dir: &Path) -> std::io::Result<Self> {
        let store = ImageStore::scan(file_dir)?;
        info!(
            file_dir = %store.file_dir.display(),
            resume_from = store.img_num,
            "camera image store ready"
        );
        Ok(CameraService {
            camera,
            store: Mutex::new(store),
            frame: Mutex::new(FrameType::Light),
        })
    }

    fn expose(&self, frame: FrameType, seconds: f64, abort: &AbortToken) -> Response {
        *self.frame.lock().unwrap_or_else(|e| e.into_inner()) = frame;

        let bytes = match self.camera.expose(frame, seconds, abort) {
            Ok(bytes) => bytes,
            Err(AdapterError::Aborted) => return Response::bad("exposure aborted"),
            Err(e) => {
                warn!(error = %e, "exposure failed");
                return Response::bad("exposure failed");
            }
        };

        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let path = store.next_path();
        if let Err(e) = std::fs::write(&path, &bytes) {
            warn!(error = %e, path = %path.display(), "image write failed");
            return Response::bad("exposure failed");
        }
        store.img_num += 1;
        store.last_image = Some(path.clone());
        info!(path = %path.display(), seconds, "exposure complete");
        Response::ok().with_payload([format!("filename = {}", path.display())])
    }

    fn set_params(&self, params: &[(String, String)], busy: BusyState) -> Response {
        let mut applied = Vec::with_capacity(params.len());
        for (key, value) in params {
            // The cooler is independent of the exposure path; everything
            // else reconfigures state an in-flight exposure reads.
            if busy.is_busy() && key != "cooler" {
                return Response::bad("busy");
            }
            match key.as_str() {
                "bin" => match value.parse::<u8>() {
                    Ok(bin @ 1..=2) => {
                        if let Err(e) = self.camera.set_bin(bin) {
                            warn!(error = %e, "set bin failed");
                            return Response::bad("set failed");
                        }
                        applied.push(format!("bin = {bin}x{bin}"));
                    }
                    _ => return Response::bad("Invalid bin mode"),
                },
                "cooler" => match value.to_ascii_lowercase().as_str() {
                    "on" => match self.camera.set_cooler(true) {
                        Ok(()) => applied.push("cooler = on".to_string()),
                        Err(_) => return Response::bad("set failed"),
                    },
                    "off" => match self.camera.set_cooler(false) {
                        Ok(()) => applied.push("cooler = off".to_string()),
                        Err(_) => return Response::bad("set failed"),
                    },
                    _ => return Response::bad("Invalid cooler setting"),
                },
                "temp" => match value.parse::<f64>() {
                    Ok(temp) if (-40.0..=0.0).contains(&temp) => {
                        if self.camera.set_temperature(temp).is_err() {
                            return Response::bad("set failed");
                        }
                        applied.push(format!("temp = {temp}"));
                    }
                    _ => return Response::bad("Invalid temperature setpoint"),
                },
                "frameType" => match value.parse::<FrameType>() {
                    Ok(frame) => {
                        *self.frame.lock().unwrap_or_else(|e| e.into_inner()) = frame;
                        applied.push(format!("frame_type = {frame}"));
                    }
                    Err(_) => return Response::bad("Invalid frame type"),
                },
                "fileDir" => {
                    let dir = PathBuf::from(value);
                    match ImageStore::scan(&dir) {
                        Ok(store) => {
                            applied.push(format!("file_dir = {}", store.file_dir.display()));
                            *self.store.lock().unwrap_or_else(|e| e.into_inner()) = store;
                        }
                        Err(e) => {
                            warn!(error = %e, dir = %dir.display(), "fileDir rejected");
                            return Response::bad("Invalid fileDir");
                        }
                    }
                }
                other => return Response::bad(format!("Invalid {other}")),
            }
        }
        Response::ok().with_payload(applied)
    }
}

impl<C: CameraAdapter> crate::service::DeviceService for CameraService<C> {
    fn name(&self) -> &'static str {
        "camera"
    }

    fn classify(&self, command: &Command) -> crate::service::Dispatch {
        use crate::service::Dispatch;
        match command {
            Command::Expose { .. } => Dispatch::LongRunning("exposure"),
            Command::Set(_) => Dispatch::Sync,
            _ => Dispatch::Invalid,
        }
    }

    fn status(&self, busy: BusyState) -> StatusReport {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let frame = *self.frame.lock().unwrap_or_else(|e| e.into_inner());
        let mut report = StatusReport::new(busy);
        report = match self.camera.bin() {
            Ok(bin) => report.field("bin", format!("{bin}x{bin}")),
            Err(_) => report.field("bin", "unknown"),
        };
        report = match self.camera.temperature() {
            Ok(temp) => report.field("ccd_temp", temp),
            Err(_) => report.field("ccd_temp", "unknown"),
        };
        report
            .field("frame_type", frame)
            .field("file_dir", store.file_dir.display())
            .field(
                "last_image",
                store
                    .last_image
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "none".to_string()),
            )
    }

    fn handle_sync(&self, command: &Command, busy: BusyState) -> Response {
        match command {
            Command::Set(params) => self.set_params(params, busy),
            _ => Response::bad(ParseError::InvalidCommand),
        }
    }

    fn execute(&self, command: Command, abort: &AbortToken) -> Response {
        match command {
            Command::Expose { frame, seconds } => self.expose(frame, seconds, abort),
            _ => Response::bad(ParseError::InvalidCommand),
        }
    }

    fn abort_hardware(&self) {
        self.camera.abort();
    }
}
