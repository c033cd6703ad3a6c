//! Tests for the log events emitted while selecting, restricting and waiting.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::Level;

use gpu_reserve::gpu::device::GIB;
use gpu_reserve::gpu::stub::StubRegistry;
use gpu_reserve::gpu::{await_memory, restrict, select_freeest, Sleeper};

/// Shared buffer the fmt subscriber writes into.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a subscriber capturing plain-text logs, and return them.
fn capture_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(Level::DEBUG)
        .finish();

    tracing::subscriber::with_default(subscriber, f);
    buffer.contents()
}

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&mut self, _duration: Duration) {}
}

#[test]
fn test_out_of_range_logs_error_with_physical_devices() {
    let mut reg = StubRegistry::with_free_memory(&[GIB, GIB]);
    let logs = capture_logs(|| {
        assert!(restrict(&mut reg, 5i64).is_err());
    });

    assert!(logs.contains("ERROR"), "{logs}");
    assert!(logs.contains("index is out of range"), "{logs}");
    assert!(logs.contains("out_of_range=[5]"), "{logs}");
    assert!(logs.contains("GPU:0 (Stub GPU 0)"), "{logs}");
    assert!(logs.contains("GPU:1 (Stub GPU 1)"), "{logs}");
}

#[test]
fn test_restrict_logs_memory_growth_per_device() {
    let mut reg = StubRegistry::with_free_memory(&[GIB, GIB, GIB]);
    let logs = capture_logs(|| {
        restrict(&mut reg, vec![0, 2]).unwrap();
    });

    assert_eq!(logs.matches("Using and enabling memory growth").count(), 2, "{logs}");
    assert!(logs.contains("GPU:2 (Stub GPU 2)"), "{logs}");
}

#[test]
fn test_select_logs_choice_in_gib() {
    let reg = StubRegistry::with_free_memory(&[GIB, 3 * GIB / 2]);
    let logs = capture_logs(|| {
        select_freeest(&reg).unwrap();
    });

    assert!(logs.contains("INFO"), "{logs}");
    assert!(logs.contains("found GPU 1 to be the most free with 1.50 GiB"), "{logs}");
}

#[test]
fn test_waiter_warns_on_each_short_reading() {
    let mut reg = StubRegistry::with_free_memory(&[0]);
    reg.script_readings(0, [GIB / 2, GIB, 2 * GIB]);
    let logs = capture_logs(|| {
        await_memory(&reg, &mut NoSleep, 0i64, 2 * GIB, Duration::from_secs(30)).unwrap();
    });

    assert_eq!(logs.matches("WARN").count(), 2, "{logs}");
    assert!(logs.contains("Device 0 has 0.50 GiB left, but at least 2.00 GiB"), "{logs}");
    assert!(logs.contains("Waiting 30s"), "{logs}");
}
