//! Per-camera pipelines: capture, decode and process stages chained so that
//! each stage pulls the previous stage's newest output.
//!
//! Two topologies exist. The parallel one gives every stage its own thread;
//! the sequential one keeps only the capture thread and runs decode and
//! process inline in the consumer's pull, for hosts where three threads per
//! camera are not worth it.

pub mod fps;
pub mod process;
pub mod stage;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::capture::decode::{Decoder, FormatDecoder};
use crate::capture::frame::{DecodedFrame, DisplayFrame, RawFrame};
use crate::capture::sensor::{
    Sensor, FETCH_BLOCKING_CONTROL, MASTER_MODE_ENTRY, OPERATION_MODE_CONTROL,
};
use crate::error::{PipelineError, StageError};
use fps::FpsCounter;
use process::{ProcessControls, Processor, ResizeOptions, SoftwareProcessor};
use stage::{Stage, StageControl, StageHooks};

/// Hardware synchronization role, decided once at pipeline construction.
/// Slaves wait on a sync signal from a running master, so master pipelines
/// must start first and stop last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    Master,
    Slave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Parallel,
    Sequential,
}

/// Per-camera processing configuration applied at construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraOptions {
    pub debayer: bool,
    pub resize: ResizeOptions,
}

/// Start every stage front to back; on failure the already-started prefix
/// is stopped again, back to front.
fn start_in_order(stages: &mut [&mut dyn StageControl]) -> Result<(), StageError> {
    for i in 0..stages.len() {
        if let Err(e) = stages[i].start_stage() {
            for started in stages[..i].iter_mut().rev() {
                started.stop_stage();
            }
            return Err(e);
        }
    }
    Ok(())
}

fn stop_in_reverse(stages: &mut [&mut dyn StageControl]) {
    for s in stages.iter_mut().rev() {
        s.stop_stage();
    }
}

// Field order doubles as drop order: the capture stage dies first so a
// downstream producer blocked on it wakes instead of deadlocking the join.
enum Chain {
    Parallel {
        capture: Stage<RawFrame>,
        decode: Stage<DecodedFrame>,
        process: Stage<DisplayFrame>,
    },
    Sequential {
        capture: Stage<RawFrame>,
        decoder: Arc<dyn Decoder>,
        processor: Arc<dyn Processor>,
        scratch: DecodedFrame,
    },
}

/// One camera's capture-to-displayable path.
pub struct Pipeline {
    chain: Chain,
    controls: Arc<ProcessControls>,
    acquisition_fps: Arc<FpsCounter>,
    display_fps: FpsCounter,
    name: String,
    clean_name: String,
    role: SyncRole,
}

impl Pipeline {
    pub fn new(sensor: Arc<dyn Sensor>, options: CameraOptions, topology: Topology) -> Self {
        Self::with_collaborators(
            sensor,
            options,
            topology,
            Arc::new(FormatDecoder),
            Arc::new(SoftwareProcessor),
        )
    }

    pub fn with_collaborators(
        sensor: Arc<dyn Sensor>,
        options: CameraOptions,
        topology: Topology,
        decoder: Arc<dyn Decoder>,
        processor: Arc<dyn Processor>,
    ) -> Self {
        let name = format!("{} - {}", sensor.name(), sensor.driver_name());
        let clean_name = clean_name(&name);
        let role = detect_role(sensor.as_ref());
        debug!(pipeline = %name, ?role, ?topology, "constructing pipeline");

        let controls = Arc::new(ProcessControls::default());
        controls.set_debayer(options.debayer);
        controls.set_resize_options(options.resize);

        let acquisition_fps = Arc::new(FpsCounter::new());
        let capture = capture_stage(&name, sensor, Arc::clone(&acquisition_fps));

        let chain = match topology {
            Topology::Parallel => {
                let decode = decode_stage(&name, capture.output(), Arc::clone(&decoder));
                let process = process_stage(
                    &name,
                    decode.output(),
                    Arc::clone(&processor),
                    Arc::clone(&controls),
                );
                Chain::Parallel {
                    capture,
                    decode,
                    process,
                }
            }
            Topology::Sequential => Chain::Sequential {
                capture,
                decoder,
                processor,
                scratch: DecodedFrame::default(),
            },
        };

        Self {
            chain,
            controls,
            acquisition_fps,
            display_fps: FpsCounter::new(),
            name,
            clean_name,
            role,
        }
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        match &mut self.chain {
            Chain::Parallel {
                capture,
                decode,
                process,
            } => start_in_order(&mut [capture, decode, process])?,
            Chain::Sequential { capture, .. } => start_in_order(&mut [capture])?,
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        match &mut self.chain {
            Chain::Parallel {
                capture,
                decode,
                process,
            } => stop_in_reverse(&mut [capture, decode, process]),
            Chain::Sequential { capture, .. } => stop_in_reverse(&mut [capture]),
        }
    }

    /// Pull the newest displayable frame, blocking until one exists.
    ///
    /// `None` means the pipeline is being torn down.
    pub fn get_frame(&mut self) -> Option<DisplayFrame> {
        match &mut self.chain {
            Chain::Parallel { process, .. } => process.get_output_blocking(),
            Chain::Sequential {
                capture,
                decoder,
                processor,
                scratch,
            } => {
                // Inline decode+process; invalid raw frames are skipped
                // here rather than downstream.
                loop {
                    let raw = capture.get_output_blocking()?;
                    if !raw.is_valid() {
                        capture.return_output(raw);
                        continue;
                    }
                    decoder.decode(&raw, scratch);
                    capture.return_output(raw);

                    let mut frame = DisplayFrame::default();
                    let options = self.controls.snapshot();
                    processor.process(scratch, &options, &mut frame);
                    return Some(frame);
                }
            }
        }
    }

    /// Hand a frame back after presentation and refresh the fps readings.
    pub fn return_frame(&mut self, frame: DisplayFrame) {
        match &self.chain {
            Chain::Parallel { process, .. } => process.return_output(frame),
            Chain::Sequential { .. } => drop(frame),
        }
        self.display_fps.record_frame();
        self.controls
            .set_fps(self.acquisition_fps.rate(), self.display_fps.rate());
    }

    pub fn set_debayer(&self, enable: bool) {
        self.controls.set_debayer(enable);
    }

    pub fn set_resize_options(&self, options: ResizeOptions) {
        self.controls.set_resize_options(options);
    }

    pub fn toggle_crosshair(&self) {
        self.controls.toggle_crosshair();
    }

    pub fn toggle_show_fps(&self) {
        self.controls.toggle_show_fps();
    }

    /// Display name: `<sensor> - <driver>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File-safe variant of the display name, used for snapshot filenames.
    pub fn clean_name(&self) -> &str {
        &self.clean_name
    }

    pub fn role(&self) -> SyncRole {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == SyncRole::Master
    }

    pub(crate) fn controls(&self) -> &ProcessControls {
        &self.controls
    }
}

fn capture_stage(
    pipeline: &str,
    sensor: Arc<dyn Sensor>,
    fps: Arc<FpsCounter>,
) -> Stage<RawFrame> {
    let produce = {
        let sensor = Arc::clone(&sensor);
        move |out: &mut RawFrame| {
            *out = sensor.acquire_frame();
            fps.record_frame();
        }
    };
    let release = {
        let sensor = Arc::clone(&sensor);
        Arc::new(move |frame: RawFrame| sensor.release_frame(frame))
    };
    let hooks = StageHooks {
        on_start: {
            let sensor = Arc::clone(&sensor);
            let stage = format!("{pipeline}/capture");
            Box::new(move || {
                // Switch the driver to blocking fetch when it offers the
                // control; absence is fine.
                sensor.set_control(FETCH_BLOCKING_CONTROL, 1);
                if !sensor.start_stream() {
                    return Err(StageError::StartHook {
                        stage: stage.clone(),
                        reason: "sensor refused to start streaming".into(),
                    });
                }
                Ok(())
            })
        },
        on_stop: {
            let sensor = Arc::clone(&sensor);
            let stage = format!("{pipeline}/capture");
            Box::new(move || {
                if !sensor.stop_stream() {
                    warn!(%stage, "sensor refused to stop streaming");
                }
            })
        },
    };
    Stage::with_parts(format!("{pipeline}/capture"), produce, release, hooks)
}

fn decode_stage(
    pipeline: &str,
    upstream: stage::StageOutput<RawFrame>,
    decoder: Arc<dyn Decoder>,
) -> Stage<DecodedFrame> {
    Stage::new(format!("{pipeline}/decode"), move |out: &mut DecodedFrame| {
        match upstream.get_output_blocking() {
            Some(raw) => {
                if raw.is_valid() {
                    decoder.decode(&raw, out);
                } else {
                    out.clear();
                }
                upstream.return_output(raw);
            }
            None => out.clear(),
        }
    })
}

fn process_stage(
    pipeline: &str,
    upstream: stage::StageOutput<DecodedFrame>,
    processor: Arc<dyn Processor>,
    controls: Arc<ProcessControls>,
) -> Stage<DisplayFrame> {
    Stage::new(format!("{pipeline}/process"), move |out: &mut DisplayFrame| {
        match upstream.get_output_blocking() {
            Some(decoded) => {
                let options = controls.snapshot();
                processor.process(&decoded, &options, out);
                upstream.return_output(decoded);
            }
            None => out.clear(),
        }
    })
}

/// Master unless the sensor positively reports a non-master operation mode.
/// Missing control, non-menu control, empty menu and an out-of-range index
/// all fall back to master: an unsynchronized sensor needs nobody to drive
/// its sync signal.
fn detect_role(sensor: &dyn Sensor) -> SyncRole {
    let Some(control) = sensor.control(OPERATION_MODE_CONTROL) else {
        return SyncRole::Master;
    };
    if control.menu.is_empty() {
        return SyncRole::Master;
    }
    let Ok(index) = usize::try_from(control.value) else {
        return SyncRole::Master;
    };
    let Some(entry) = control.menu.get(index) else {
        return SyncRole::Master;
    };
    if entry == MASTER_MODE_ENTRY {
        SyncRole::Master
    } else {
        SyncRole::Slave
    }
}

fn clean_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '/' || c == '-' { '_' } else { c })
        .collect();
    cleaned.trim_start_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMeta, PixelFormat};
    use crate::capture::sensor::ControlInfo;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct FakeSensor {
        control: Option<ControlInfo>,
        refuse_start: bool,
        sequence: AtomicU64,
        acquired: AtomicUsize,
        released: AtomicUsize,
        streaming: AtomicBool,
        events: Mutex<Vec<&'static str>>,
    }

    impl FakeSensor {
        fn new() -> Self {
            Self {
                control: None,
                refuse_start: false,
                sequence: AtomicU64::new(0),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                streaming: AtomicBool::new(false),
                events: Mutex::new(Vec::new()),
            }
        }

        fn with_control(control: ControlInfo) -> Self {
            Self {
                control: Some(control),
                ..Self::new()
            }
        }
    }

    impl Sensor for FakeSensor {
        fn name(&self) -> &str {
            "/dev/video9 - Fake Sensor"
        }

        fn driver_name(&self) -> &str {
            "fakedrv"
        }

        fn start_stream(&self) -> bool {
            self.events.lock().unwrap().push("start_stream");
            if self.refuse_start {
                return false;
            }
            self.streaming.store(true, Ordering::SeqCst);
            true
        }

        fn stop_stream(&self) -> bool {
            self.events.lock().unwrap().push("stop_stream");
            self.streaming.store(false, Ordering::SeqCst);
            true
        }

        fn acquire_frame(&self) -> RawFrame {
            if !self.streaming.load(Ordering::SeqCst) {
                return RawFrame::default();
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
            RawFrame {
                data: Bytes::from(vec![seq as u8; 12]),
                meta: FrameMeta {
                    sequence: seq,
                    width: 2,
                    height: 2,
                    stride: 2,
                    format: PixelFormat::Rgb24,
                },
                timestamp: Instant::now(),
            }
        }

        fn release_frame(&self, frame: RawFrame) {
            if frame.is_valid() {
                self.released.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn control(&self, name: &str) -> Option<ControlInfo> {
            (name == OPERATION_MODE_CONTROL)
                .then(|| self.control.clone())
                .flatten()
        }

        fn set_control(&self, _name: &str, _value: i64) -> bool {
            false
        }
    }

    fn menu(value: i64, entries: &[&str]) -> ControlInfo {
        ControlInfo {
            value,
            menu: entries.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn role_defaults_to_master_on_every_parse_failure() {
        let missing = FakeSensor::new();
        assert_eq!(detect_role(&missing), SyncRole::Master);

        let not_menu = FakeSensor::with_control(menu(0, &[]));
        assert_eq!(detect_role(&not_menu), SyncRole::Master);

        let out_of_range = FakeSensor::with_control(menu(5, &["Master Mode", "Slave Mode"]));
        assert_eq!(detect_role(&out_of_range), SyncRole::Master);

        let negative = FakeSensor::with_control(menu(-1, &["Master Mode"]));
        assert_eq!(detect_role(&negative), SyncRole::Master);
    }

    #[test]
    fn role_follows_the_selected_menu_entry() {
        let master = FakeSensor::with_control(menu(0, &["Master Mode", "Slave Mode"]));
        assert_eq!(detect_role(&master), SyncRole::Master);

        let slave = FakeSensor::with_control(menu(1, &["Master Mode", "Slave Mode"]));
        assert_eq!(detect_role(&slave), SyncRole::Slave);
    }

    #[test]
    fn clean_name_is_file_safe() {
        assert_eq!(
            clean_name("/dev/video9 - Fake Sensor - fakedrv"),
            "dev_video9_FakeSensor_fakedrv"
        );
    }

    #[test]
    fn chain_starts_front_to_back_and_stops_reversed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = |tag: &'static str, log: &Arc<Mutex<Vec<String>>>| {
            let start_log = Arc::clone(log);
            let stop_log = Arc::clone(log);
            Stage::<u64>::with_parts(
                tag,
                |_| {},
                Arc::new(drop),
                StageHooks {
                    on_start: Box::new(move || {
                        start_log.lock().unwrap().push(format!("start-{tag}"));
                        Ok(())
                    }),
                    on_stop: Box::new(move || {
                        stop_log.lock().unwrap().push(format!("stop-{tag}"));
                    }),
                },
            )
        };
        let mut a = make("a", &log);
        let mut b = make("b", &log);
        let mut c = make("c", &log);

        start_in_order(&mut [&mut a, &mut b, &mut c]).unwrap();
        stop_in_reverse(&mut [&mut a, &mut b, &mut c]);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start-a", "start-b", "start-c", "stop-c", "stop-b", "stop-a"]
        );
    }

    #[test]
    fn failed_chain_start_rolls_back_started_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ok = |tag: &'static str, log: &Arc<Mutex<Vec<String>>>| {
            let start_log = Arc::clone(log);
            let stop_log = Arc::clone(log);
            Stage::<u64>::with_parts(
                tag,
                |_| {},
                Arc::new(drop),
                StageHooks {
                    on_start: Box::new(move || {
                        start_log.lock().unwrap().push(format!("start-{tag}"));
                        Ok(())
                    }),
                    on_stop: Box::new(move || {
                        stop_log.lock().unwrap().push(format!("stop-{tag}"));
                    }),
                },
            )
        };
        let mut a = ok("a", &log);
        let mut b: Stage<u64> = Stage::with_parts(
            "b",
            |_| {},
            Arc::new(drop),
            StageHooks {
                on_start: Box::new(|| {
                    Err(StageError::StartHook {
                        stage: "b".into(),
                        reason: "nope".into(),
                    })
                }),
                on_stop: Box::new(|| {}),
            },
        );

        assert!(start_in_order(&mut [&mut a, &mut b]).is_err());
        assert_eq!(*log.lock().unwrap(), vec!["start-a", "stop-a"]);
    }

    #[test]
    fn parallel_pipeline_delivers_processed_frames() {
        let sensor = Arc::new(FakeSensor::new());
        let mut pipeline = Pipeline::new(
            Arc::clone(&sensor) as Arc<dyn Sensor>,
            CameraOptions::default(),
            Topology::Parallel,
        );

        pipeline.start().unwrap();
        let frame = loop {
            let frame = pipeline.get_frame().expect("pipeline alive");
            if frame.is_valid() {
                break frame;
            }
            pipeline.return_frame(frame);
        };
        assert_eq!((frame.width, frame.height), (2, 2));
        pipeline.return_frame(frame);
        pipeline.stop();

        let events = sensor.events.lock().unwrap().clone();
        assert_eq!(events.first(), Some(&"start_stream"));
        assert_eq!(events.last(), Some(&"stop_stream"));
    }

    #[test]
    fn sequential_pipeline_delivers_processed_frames() {
        let sensor = Arc::new(FakeSensor::new());
        let mut pipeline = Pipeline::new(
            Arc::clone(&sensor) as Arc<dyn Sensor>,
            CameraOptions::default(),
            Topology::Sequential,
        );

        pipeline.start().unwrap();
        let frame = pipeline.get_frame().expect("pipeline alive");
        // The sequential pull loops past invalid frames itself.
        assert!(frame.is_valid());
        pipeline.return_frame(frame);
        pipeline.stop();
    }

    #[test]
    fn refused_stream_start_aborts_pipeline_startup() {
        let sensor = Arc::new(FakeSensor {
            refuse_start: true,
            ..FakeSensor::new()
        });
        let mut pipeline = Pipeline::new(
            Arc::clone(&sensor) as Arc<dyn Sensor>,
            CameraOptions::default(),
            Topology::Parallel,
        );
        assert!(pipeline.start().is_err());
    }

    #[test]
    fn dropped_pipeline_returns_upstream_frames_to_the_sensor() {
        let sensor = Arc::new(FakeSensor::new());
        let mut pipeline = Pipeline::new(
            Arc::clone(&sensor) as Arc<dyn Sensor>,
            CameraOptions::default(),
            Topology::Parallel,
        );
        pipeline.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        pipeline.stop();
        drop(pipeline);

        let acquired = sensor.acquired.load(Ordering::SeqCst);
        let released = sensor.released.load(Ordering::SeqCst);
        assert!(acquired > 0);
        // The producer-held active slot and an unclaimed ready slot may
        // still be in flight at teardown; everything else went back.
        assert!(
            released + 2 >= acquired,
            "released {released} of {acquired} acquired frames"
        );
    }
}
