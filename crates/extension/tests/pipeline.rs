use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use lumix_capture::{
    CameraEvent, CameraInfo,
    memory::MemoryProvider,
    pattern::BAR_COLORS,
};
use lumix_core::prelude::*;
use lumix_extension::prelude::*;

struct Pipeline {
    host: InProcessHost,
    registrar: VirtualDeviceRegistrar,
    selection: SharedSelection,
}

fn pipeline(store: Arc<MemoryStore>, provider: MemoryProvider) -> Pipeline {
    HostClock::init();
    let selection = SharedSelection::new(store);
    let format = StreamFormat::bgra(selection.selected_resolution(), DEFAULT_FRAME_RATE)
        .with_description(FORMAT_NAME, FORMAT_VENDOR);
    let router = Arc::new(
        FrameRouter::new(RouterConfig::new(format), selection.clone(), Arc::new(provider))
            .expect("pool"),
    );
    let host = InProcessHost::new();
    let registrar = VirtualDeviceRegistrar::register(&host, router, VirtualDeviceDescriptor::lumix());
    Pipeline {
        host,
        registrar,
        selection,
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn pattern_stream_at_persisted_720p() {
    let store = Arc::new(MemoryStore::new());
    SharedSelection::new(store.clone())
        .set_selected_resolution(Resolution::new(1280, 720).unwrap())
        .unwrap();
    let p = pipeline(store, MemoryProvider::new());
    assert_eq!(p.registrar.format().resolution, Resolution::new(1280, 720).unwrap());
    assert_eq!(p.registrar.format().name, "Lumix S5 Video");

    let client = p.host.connect_client().unwrap();
    p.host.start_stream(client).unwrap();
    let sink = p.host.sink();
    assert!(sink.wait_for(1, Duration::from_secs(5)));
    p.host.stop_stream().unwrap();

    let first = &sink.samples()[0];
    assert_eq!(first.resolution, Resolution::new(1280, 720).unwrap());
    assert_eq!(first.timing.duration, Interval::from_fps(30));
    assert_eq!(first.timing.decode_ns, None);
    let stats = p.registrar.router().stats();
    assert_eq!(stats.baseline_ns, Some(first.timing.presentation_ns));
    // The clock epoch is this process; the first frame lands well inside a minute.
    assert!(first.timing.presentation_ns < 60_000_000_000);

    let bar_width = 1280 / 8;
    for (i, color) in BAR_COLORS.iter().enumerate() {
        for x in [i * bar_width, i * bar_width + bar_width / 2, (i + 1) * bar_width - 1] {
            assert_eq!(&first.first_row[x * 4..x * 4 + 4], color, "bar {i} at x={x}");
        }
    }
}

#[test]
fn pattern_timestamps_advance_by_one_interval() {
    let p = pipeline(Arc::new(MemoryStore::new()), MemoryProvider::new());
    let client = p.host.connect_client().unwrap();
    p.host.start_stream(client).unwrap();
    let sink = p.host.sink();
    assert!(sink.wait_for(4, Duration::from_secs(5)));
    p.host.stop_stream().unwrap();

    let samples = sink.samples();
    let step = Interval::from_fps(30).as_nanos();
    for pair in samples.windows(2) {
        let delta = pair[1].timing.presentation_ns - pair[0].timing.presentation_ns;
        assert_eq!(delta % step, 0, "pts must sit on the tick grid");
        assert!(delta >= step);
    }
}

#[test]
fn repeated_start_and_stop_keep_one_source() {
    let provider = MemoryProvider::new();
    provider.attach(CameraInfo::new("cam-1", "LUMIX", "Panasonic", "DC-S5"));
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(store, provider.clone());
    p.selection.set_selected_camera_id(Some("cam-1")).unwrap();

    let client = p.host.connect_client().unwrap();
    p.host.start_stream(client).unwrap();
    p.host.start_stream(client).unwrap();
    assert!(wait_for(|| provider.is_running("cam-1")));
    assert_eq!(provider.open_count(), 1);
    assert_eq!(provider.running_count(), 1);

    p.host.stop_stream().unwrap();
    p.host.stop_stream().unwrap();
    assert_eq!(p.registrar.router().state(), RouterState::Stopped);
    assert!(wait_for(|| provider.running_count() == 0));
}

#[test]
fn selecting_a_camera_switches_source_on_next_start() {
    let provider = MemoryProvider::new();
    provider.attach(CameraInfo::new("cam-7", "DC-S5M2", "Panasonic", "S5II"));
    let p = pipeline(Arc::new(MemoryStore::new()), provider.clone());
    let router = p.registrar.router().clone();
    let client = p.host.connect_client().unwrap();

    p.host.start_stream(client).unwrap();
    assert_eq!(router.state(), RouterState::Streaming(ActiveSource::Pattern));
    p.host.stop_stream().unwrap();

    p.selection.set_selected_camera_id(Some("cam-7")).unwrap();
    p.host.start_stream(client).unwrap();
    assert_eq!(
        router.state(),
        RouterState::Streaming(ActiveSource::Camera("cam-7".into()))
    );
    assert!(wait_for(|| provider.is_running("cam-7")));

    let sink = p.host.sink();
    sink.clear();
    let pool = PixelBufferPool::create(Resolution::new(32, 16).unwrap(), FourCc::BGRA, 3).unwrap();
    let frame = pool.acquire_buffer().unwrap().with_timing(1_000, Interval::from_fps(30));
    assert!(provider.emit("cam-7", CameraEvent::Frame(frame)));
    assert!(wait_for(|| sink
        .samples()
        .iter()
        .any(|s| s.resolution == Resolution::new(32, 16).unwrap())));
}

#[test]
fn rejected_sends_do_not_stop_the_stream() {
    let p = pipeline(Arc::new(MemoryStore::new()), MemoryProvider::new());
    let sink = p.host.sink();
    sink.fail_next(3);
    let client = p.host.connect_client().unwrap();
    p.host.start_stream(client).unwrap();
    assert!(sink.wait_for(2, Duration::from_secs(5)));
    p.host.stop_stream().unwrap();
    let stats = p.registrar.router().stats();
    assert_eq!(stats.send_failures, 3);
    assert!(stats.sequence >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streaming_notifications_drive_the_router() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(Arc::new(MemoryStore::new()), MemoryProvider::new());
    let router = p.registrar.router().clone();
    let notifier = SocketNotifier::new(dir.path());

    let start_router = router.clone();
    let _start = notifier
        .subscribe(START_STREAMING_TOPIC, move || start_router.start())
        .unwrap();
    let stop_router = router.clone();
    let _stop = notifier
        .subscribe(STOP_STREAMING_TOPIC, move || stop_router.stop())
        .unwrap();

    assert_eq!(notifier.publish(START_STREAMING_TOPIC).unwrap(), 1);
    let deadline = Instant::now() + Duration::from_secs(5);
    while router.state() == RouterState::Stopped && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(router.state(), RouterState::Streaming(ActiveSource::Pattern));

    assert_eq!(notifier.publish(STOP_STREAMING_TOPIC).unwrap(), 1);
    let deadline = Instant::now() + Duration::from_secs(5);
    while router.state() != RouterState::Stopped && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(router.state(), RouterState::Stopped);
}
