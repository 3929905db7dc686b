//! End-to-end loopback: a frontend and a backend sharing one ring, an
//! in-memory page store standing in for the page-sharing primitive, and a
//! recording mock standing in for the host audio device.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use vsnd::directory::{self, PageAllocator, PageMapper, PageStore, PageWriter, StorePage};
use vsnd::negotiation::{LogFaultHandler, StreamConfig, StreamEnvelope};
use vsnd::packet::encode_volume_page;
use vsnd::{
    event_channel_pair, Codec, DescribedBuffer, DeviceError, DirectoryLayout, GrantRef, OpenParams,
    PcmDevice, PcmFormat, Ring, SndBackend, SndError, SndFrontend, Status, StreamDirection,
};

const PAGE_SIZE: usize = vsnd::constants::PAGE_SIZE;

/// Page store shared between both endpoints, as the real shared memory
/// would be.
#[derive(Clone, Debug)]
struct SharedPages(Arc<StdMutex<PageStore>>);

impl SharedPages {
    fn new() -> Self {
        Self(Arc::new(StdMutex::new(PageStore::new())))
    }
}

impl PageAllocator for SharedPages {
    fn alloc_page(&mut self) -> GrantRef {
        self.0.lock().unwrap().alloc_page()
    }

    fn write_page(&mut self, gref: GrantRef, data: &[u8]) {
        self.0.lock().unwrap().write_page(gref, data)
    }
}

impl PageMapper for SharedPages {
    type Page = StorePage;

    fn map_page(&mut self, gref: GrantRef) -> Option<StorePage> {
        self.0.lock().unwrap().map_page(gref)
    }
}

impl PageWriter for SharedPages {
    fn write_into(&mut self, gref: GrantRef, offset: usize, data: &[u8]) -> bool {
        self.0.lock().unwrap().write_into(gref, offset, data)
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    opened: Vec<(u8, OpenParams)>,
    closed: Vec<u8>,
    written: Vec<(u8, Vec<u8>)>,
    volumes: Vec<(u8, Vec<i32>)>,
    muted: Vec<u8>,
    capture_byte: u8,
}

#[derive(Clone, Debug)]
struct MockDevice {
    state: Arc<StdMutex<DeviceState>>,
    /// Opens with this rate are refused, to exercise Error-status responses.
    refuse_rate: u32,
}

impl MockDevice {
    fn new() -> (Self, Arc<StdMutex<DeviceState>>) {
        let state = Arc::new(StdMutex::new(DeviceState {
            capture_byte: 0x5a,
            ..DeviceState::default()
        }));
        (
            Self {
                state: state.clone(),
                refuse_rate: 666,
            },
            state,
        )
    }
}

impl PcmDevice for MockDevice {
    fn open(&mut self, stream_idx: u8, params: OpenParams) -> Result<(), DeviceError> {
        if params.rate == self.refuse_rate {
            return Err(DeviceError("unsupported rate".into()));
        }
        self.state.lock().unwrap().opened.push((stream_idx, params));
        Ok(())
    }

    fn close(&mut self, stream_idx: u8) -> Result<(), DeviceError> {
        self.state.lock().unwrap().closed.push(stream_idx);
        Ok(())
    }

    fn write(&mut self, stream_idx: u8, data: &[u8]) -> Result<(), DeviceError> {
        self.state
            .lock()
            .unwrap()
            .written
            .push((stream_idx, data.to_vec()));
        Ok(())
    }

    fn read(&mut self, _stream_idx: u8, data: &mut [u8]) -> Result<(), DeviceError> {
        let byte = self.state.lock().unwrap().capture_byte;
        data.fill(byte);
        Ok(())
    }

    fn set_volume(&mut self, stream_idx: u8, gains: &[i32]) -> Result<(), DeviceError> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .push((stream_idx, gains.to_vec()));
        Ok(())
    }

    fn get_volume(&mut self, _stream_idx: u8) -> Result<Vec<i32>, DeviceError> {
        Ok(vec![-1500, 300])
    }

    fn mute(&mut self, stream_idx: u8) -> Result<(), DeviceError> {
        self.state.lock().unwrap().muted.push(stream_idx);
        Ok(())
    }

    fn unmute(&mut self, _stream_idx: u8) -> Result<(), DeviceError> {
        Ok(())
    }
}

fn stream_configs() -> Vec<StreamConfig> {
    vec![
        StreamConfig {
            index: 0,
            direction: StreamDirection::Playback,
            envelope: StreamEnvelope {
                channels_min: Some(1),
                channels_max: Some(2),
                sample_rates: vec![44100, 48000, 666],
                sample_formats: vec![PcmFormat::S16Le, PcmFormat::U8],
            },
        },
        StreamConfig {
            index: 1,
            direction: StreamDirection::Capture,
            envelope: StreamEnvelope::default(),
        },
    ]
}

struct Loopback {
    frontend: SndFrontend,
    ring: Arc<Mutex<Ring>>,
    pages: SharedPages,
    device_state: Arc<StdMutex<DeviceState>>,
}

fn connect(ring_capacity: u32) -> Loopback {
    let ring = Arc::new(Mutex::new(Ring::new(ring_capacity)));
    let (front_evt, back_evt) = event_channel_pair();
    let codec = Codec::default();
    let configs = stream_configs();
    let pages = SharedPages::new();
    let (device, device_state) = MockDevice::new();

    let backend = SndBackend::new(
        ring.clone(),
        back_evt,
        codec,
        &configs,
        device,
        pages.clone(),
    );
    tokio::spawn(backend.run());

    let frontend = SndFrontend::new(
        ring.clone(),
        front_evt,
        codec,
        &configs,
        Arc::new(LogFaultHandler),
    );
    frontend.spawn_event_loop();

    Loopback {
        frontend,
        ring,
        pages,
        device_state,
    }
}

fn describe_filled(pages: &mut SharedPages, length: u32, fill: u8) -> DescribedBuffer {
    let buf = directory::describe(length, pages, DirectoryLayout::default());
    let mut remaining = length as usize;
    for gref in &buf.data_grefs {
        let n = remaining.min(PAGE_SIZE);
        pages.write_page(*gref, &vec![fill; n]);
        remaining -= n;
    }
    buf
}

#[tokio::test]
async fn open_write_volume_close() {
    let mut lb = connect(32);
    let fe = &lb.frontend;

    assert_eq!(
        fe.open(0, PcmFormat::S16Le, 2, 44100).await.unwrap(),
        Status::Okay
    );

    // 12000 bytes: 3 pages, carried as 3 inline references.
    let buf = describe_filled(&mut lb.pages, 12000, 0x11);
    assert_eq!(buf.data_grefs.len(), 3);
    assert_eq!(fe.write(0, &buf).await.unwrap(), Status::Okay);

    // Volume exchange through a shared page.
    let mut page = vec![0u8; PAGE_SIZE];
    encode_volume_page(&[-600, -600], &mut page);
    let gref = lb.pages.alloc_page();
    lb.pages.write_page(gref, &page);
    assert_eq!(fe.set_volume(0, gref).await.unwrap(), Status::Okay);

    assert_eq!(fe.get_volume(0, gref).await.unwrap(), Status::Okay);
    let fetched = lb.pages.map_page(gref).unwrap();
    assert_eq!(vsnd::packet::decode_volume_page(&fetched, 2), vec![-1500, 300]);

    assert_eq!(fe.mute(0).await.unwrap(), Status::Okay);
    assert_eq!(fe.close(0).await.unwrap(), Status::Okay);

    let state = lb.device_state.lock().unwrap();
    assert_eq!(state.opened.len(), 1);
    assert_eq!(state.opened[0].0, 0);
    assert_eq!(state.written.len(), 1);
    assert_eq!(state.written[0].1, vec![0x11; 12000]);
    assert_eq!(state.volumes, vec![(0, vec![-600, -600])]);
    assert_eq!(state.muted, vec![0]);
    assert_eq!(state.closed, vec![0]);
}

#[tokio::test]
async fn caller_errors_never_reach_the_wire() {
    let lb = connect(32);
    let fe = &lb.frontend;

    // Volume on a stream that was never opened.
    assert!(matches!(
        fe.get_volume(1, 5).await,
        Err(SndError::InvalidState { stream: 1, .. })
    ));

    // Write on a capture stream.
    assert_eq!(fe.open(1, PcmFormat::U8, 1, 8000).await.unwrap(), Status::Okay);
    let mut pages = lb.pages.clone();
    let buf = directory::describe(100, &mut pages, DirectoryLayout::default());
    assert!(matches!(
        fe.write(1, &buf).await,
        Err(SndError::WrongDirection { stream: 1 })
    ));

    // Open parameters outside the negotiated envelope.
    assert!(matches!(
        fe.open(0, PcmFormat::F32Le, 2, 44100).await,
        Err(SndError::OutsideEnvelope { stream: 0 })
    ));

    // Nothing was submitted for any of these.
    let stats = fe.stats().await;
    assert_eq!(stats.requests_tx, 1);
}

#[tokio::test]
async fn capture_reads_into_shared_pages() {
    let mut lb = connect(32);
    let fe = &lb.frontend;

    assert_eq!(fe.open(1, PcmFormat::U8, 1, 8000).await.unwrap(), Status::Okay);
    let buf = describe_filled(&mut lb.pages, 5000, 0);
    assert_eq!(fe.read(1, &buf).await.unwrap(), Status::Okay);

    let first = lb.pages.map_page(buf.data_grefs[0]).unwrap();
    assert!(first.iter().all(|&b| b == 0x5a));
    let second = lb.pages.map_page(buf.data_grefs[1]).unwrap();
    // Only the first 5000 bytes belong to the buffer.
    assert!(second[..5000 - PAGE_SIZE].iter().all(|&b| b == 0x5a));
}

#[tokio::test]
async fn large_write_goes_through_a_directory_chain() {
    let mut lb = connect(32);
    let fe = &lb.frontend;

    assert_eq!(
        fe.open(0, PcmFormat::S16Le, 2, 48000).await.unwrap(),
        Status::Okay
    );

    // 25 pages: too many for inline references.
    let length = (PAGE_SIZE * 25) as u32;
    let buf = describe_filled(&mut lb.pages, length, 0x22);
    assert_eq!(buf.data_grefs.len(), 25);
    assert!(!buf.dir_grefs.is_empty());

    assert_eq!(fe.write(0, &buf).await.unwrap(), Status::Okay);
    let state = lb.device_state.lock().unwrap();
    assert_eq!(state.written[0].1.len(), length as usize);
    assert!(state.written[0].1.iter().all(|&b| b == 0x22));
}

#[tokio::test]
async fn failed_open_and_dangling_buffer_do_not_kill_the_connection() {
    let mut lb = connect(32);
    let fe = &lb.frontend;

    // The device refuses this rate: Error status, stream back to Closed.
    assert_eq!(
        fe.open(0, PcmFormat::S16Le, 2, 666).await.unwrap(),
        Status::Error
    );

    // Retry with a good rate.
    assert_eq!(
        fe.open(0, PcmFormat::S16Le, 2, 44100).await.unwrap(),
        Status::Okay
    );

    // A buffer with a revoked page: Error status on that request only.
    let buf = describe_filled(&mut lb.pages, 12000, 0x33);
    lb.pages.0.lock().unwrap().drop_page(buf.data_grefs[1]);
    assert_eq!(fe.write(0, &buf).await.unwrap(), Status::Error);
    assert!(!fe.is_failed());

    // The connection still services requests.
    let good = describe_filled(&mut lb.pages, 4096, 0x44);
    assert_eq!(fe.write(0, &good).await.unwrap(), Status::Okay);
}

#[tokio::test]
async fn stream_state_is_rechecked_at_submission() {
    let mut lb = connect(32);
    let fe = lb.frontend.clone();

    assert_eq!(
        fe.open(0, PcmFormat::S16Le, 2, 44100).await.unwrap(),
        Status::Okay
    );
    let buf = describe_filled(&mut lb.pages, 4096, 0x55);

    // Park a close and then a write on the ring lock. Both see an Open
    // stream when they are spawned; the write must be validated against the
    // state the close leaves behind, not against the stale snapshot.
    let guard = lb.ring.lock().await;
    let close = {
        let fe = fe.clone();
        tokio::spawn(async move { fe.close(0).await })
    };
    tokio::task::yield_now().await;
    let write = {
        let fe = fe.clone();
        let buf = buf.clone();
        tokio::spawn(async move { fe.write(0, &buf).await })
    };
    tokio::task::yield_now().await;
    drop(guard);

    assert_eq!(close.await.unwrap().unwrap(), Status::Okay);
    assert!(matches!(
        write.await.unwrap(),
        Err(SndError::InvalidState { stream: 0, .. })
    ));
    // A caller error, not a transport fault: the connection stays up.
    assert!(!fe.is_failed());
    let state = lb.device_state.lock().unwrap();
    assert!(state.written.is_empty());
}

#[tokio::test]
async fn backpressure_resolves_as_the_ring_drains() {
    let lb = connect(4);
    let fe = lb.frontend.clone();

    assert_eq!(fe.open(0, PcmFormat::U8, 1, 44100).await.unwrap(), Status::Okay);

    // Far more concurrent requests than ring slots; every one completes.
    let mut tasks = Vec::new();
    for _ in 0..32 {
        let fe = fe.clone();
        tasks.push(tokio::spawn(async move { fe.mute(0).await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), Status::Okay);
    }
    let state = lb.device_state.lock().unwrap();
    assert_eq!(state.muted.len(), 32);
}
