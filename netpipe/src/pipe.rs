use crate::chunk::ChunkReader;
use crate::config::{Hints, PipeConfig};
use crate::error::{PipeError, PipeResult};
use crate::objects::PipeObject;
use crate::packet::PacketBuffer;
use crate::transport::Transport;
use slog::Logger;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// The minimum any blocking call actually waits, regardless of the caller's requested timeout.
/// Mirrors the worker's own poll cadence: waiting less than one poll cycle couldn't possibly see
/// a freshly arrived record anyway.
const MIN_WAIT: Duration = Duration::from_millis(100);

/// Record-type tag prefixing every record on the wire, ahead of its channel string.
const RECORD_TYPE_DATA: u8 = 0;
const RECORD_TYPE_MESSAGE: u8 = 1;

enum RecordKind {
    /// The reassembled message's own payload bytes, one entry per fragment, copied out of the
    /// transport's buffers before they were released back to the pool.
    Unparsed(Vec<Vec<u8>>),
    Data(String, PipeObject),
    Message(String, String, String),
    /// Reassembled but could not be parsed as either shape; garbage-collected on sight.
    Malformed,
}

struct Record {
    kind: RecordKind,
}

struct Inbox {
    records: VecDeque<Record>,
}

struct Shared {
    inbox: Mutex<Inbox>,
    arrived: Condvar,
}

/// The pipe dispatcher: classifies reassembled messages into channeled data or control-message
/// records on demand, and exposes blocking put/get calls over them.
pub struct Pipe {
    transport: Transport,
    shared: Arc<Shared>,
    #[allow(dead_code)]
    logger: Logger,
}

impl Pipe {
    /// Bind to `uri` and wait to learn a peer from the first inbound datagram.
    pub fn pipe_create(uri: &str, config: PipeConfig, logger: Logger, _hints: &Hints) -> PipeResult<Pipe> {
        let shared = Arc::new(Shared {
            inbox: Mutex::new(Inbox {
                records: VecDeque::new(),
            }),
            arrived: Condvar::new(),
        });
        let callback_shared = Arc::clone(&shared);
        let transport = Transport::create(uri, config, logger.clone(), move |fragments| {
            on_message(&callback_shared, fragments);
        })?;
        Ok(Pipe { transport, shared, logger })
    }

    /// Resolve `uri` as a remote peer and dial it.
    pub fn pipe_open(uri: &str, config: PipeConfig, logger: Logger, _hints: &Hints) -> PipeResult<Pipe> {
        let shared = Arc::new(Shared {
            inbox: Mutex::new(Inbox {
                records: VecDeque::new(),
            }),
            arrived: Condvar::new(),
        });
        let callback_shared = Arc::clone(&shared);
        let transport = Transport::open(uri, config, logger.clone(), move |fragments| {
            on_message(&callback_shared, fragments);
        })?;
        Ok(Pipe { transport, shared, logger })
    }

    /// Put a data object on `channel`: a Data record of `u8(0) | channel | object_type |
    /// object_payload`. Blocks until the message's last packet has been handed to the socket, or
    /// `timeout_ms` (floored to `MIN_WAIT`) elapses.
    pub fn pipe_put(&self, channel: &str, object: &PipeObject, timeout_ms: u32, _hints: &Hints) -> PipeResult<()> {
        let channel = channel.to_string();
        let object = object.clone();
        self.send_and_wait(timeout_ms, move |writer| {
            writer.write(&RECORD_TYPE_DATA) && writer.write(&channel) && object.write(writer)
        })
    }

    /// Block for the next Data record on `channel`. `timeout_ms` is floored at `MIN_WAIT`.
    pub fn pipe_get(&self, channel: &str, timeout_ms: u32, _hints: &Hints) -> PipeResult<PipeObject> {
        self.wait_for(timeout_ms, |records| {
            let index = records.iter().position(|record| match &record.kind {
                RecordKind::Data(ch, _) => ch == channel,
                _ => false,
            })?;
            match records.remove(index).unwrap().kind {
                RecordKind::Data(_, object) => Some(object),
                _ => unreachable!(),
            }
        })
    }

    /// Put a control message on `channel`: a Message record of `u8(1) | channel | event_name |
    /// event_param`. Blocks until the message's last packet has been handed to the socket, or
    /// `timeout_ms` (floored to `MIN_WAIT`) elapses.
    pub fn pipe_message_put(&self, channel: &str, name: &str, param: &str, timeout_ms: u32) -> PipeResult<()> {
        let channel = channel.to_string();
        let name = name.to_string();
        let param = param.to_string();
        self.send_and_wait(timeout_ms, move |writer| {
            writer.write(&RECORD_TYPE_MESSAGE) && writer.write(&channel) && writer.write(&name) && writer.write(&param)
        })
    }

    /// Block for the next Message record on `channel`, returning `(event_name, event_param)`.
    /// `timeout_ms` is floored at `MIN_WAIT`.
    pub fn pipe_message_get(&self, channel: &str, timeout_ms: u32) -> PipeResult<(String, String)> {
        self.wait_for(timeout_ms, |records| {
            let index = records.iter().position(|record| match &record.kind {
                RecordKind::Message(ch, _, _) => ch == channel,
                _ => false,
            })?;
            match records.remove(index).unwrap().kind {
                RecordKind::Message(_, name, param) => Some((name, param)),
                _ => unreachable!(),
            }
        })
    }

    /// Reserved: flush is not implemented.
    pub fn pipe_flush(&self) -> PipeResult<()> {
        Err(PipeError::NotImplemented)
    }

    /// Reserved: non-destructive inspection of pending records is not implemented.
    pub fn pipe_peek(&self) -> PipeResult<()> {
        Err(PipeError::NotImplemented)
    }

    /// Reserved: structured pipe statistics are not implemented.
    pub fn pipe_info_get(&self) -> PipeResult<()> {
        Err(PipeError::NotImplemented)
    }

    pub fn pipe_close(&self) {
        self.transport.close();
    }

    /// Compose a record via `build`, then block until the transport reports the message's last
    /// packet sent (or failed), or `timeout_ms` (floored to `MIN_WAIT`) elapses.
    ///
    /// `timeout_ms == 0` suppresses the `Timeout` error on elapse rather than reporting it: the
    /// wait still happens in `MIN_WAIT`-sized increments, it simply never gives up.
    fn send_and_wait(
        &self,
        timeout_ms: u32,
        build: impl FnOnce(&mut crate::chunk::ChunkWriter<crate::transport::MessageSink>) -> bool + Send + 'static,
    ) -> PipeResult<()> {
        let completion = Arc::new((Mutex::new(None::<PipeResult<()>>), Condvar::new()));
        let callback_completion = Arc::clone(&completion);

        self.transport.compose_msg(build, move |result| {
            let (slot, signal) = &*callback_completion;
            *slot.lock().unwrap() = Some(result);
            signal.notify_all();
        })?;

        let (slot, signal) = &*completion;
        let mut guard = slot.lock().unwrap();
        let deadline = Deadline::new(timeout_ms);
        while guard.is_none() {
            let remaining = match deadline.remaining() {
                Some(remaining) => remaining,
                None => return Err(PipeError::Timeout),
            };
            let (next_guard, _timeout_result) = signal.wait_timeout(guard, remaining).unwrap();
            guard = next_guard;
        }
        guard.take().unwrap()
    }

    /// `timeout_ms == 0` suppresses the `Timeout` error on elapse rather than reporting it: the
    /// wait still happens in `MIN_WAIT`-sized increments, it simply never gives up.
    fn wait_for<T>(&self, timeout_ms: u32, mut extract: impl FnMut(&mut VecDeque<Record>) -> Option<T>) -> PipeResult<T> {
        let deadline = Deadline::new(timeout_ms);

        let mut inbox = self.shared.inbox.lock().unwrap();
        loop {
            classify(&mut inbox);

            if let Some(value) = extract(&mut inbox.records) {
                return Ok(value);
            }

            let remaining = match deadline.remaining() {
                Some(remaining) => remaining,
                None => return Err(PipeError::Timeout),
            };

            let (guard, _timeout_result) = self.shared.arrived.wait_timeout(inbox, remaining).unwrap();
            inbox = guard;
        }
    }
}

/// The effective wait for one blocking call: `max(100ms, requested_ms)`, polled in `MIN_WAIT`
/// chunks. A `requested_ms` of zero never actually expires — each chunk's elapse is treated as
/// "not yet", not as a timeout — matching the rule that a zero requested timeout suppresses the
/// `Timeout` report while still performing a non-trivial wait.
struct Deadline {
    unbounded: bool,
    at: Instant,
}

impl Deadline {
    fn new(timeout_ms: u32) -> Deadline {
        let wait = Duration::from_millis(u64::from(timeout_ms)).max(MIN_WAIT);
        Deadline {
            unbounded: timeout_ms == 0,
            at: Instant::now() + wait,
        }
    }

    /// Time left to wait this chunk, or `None` once the caller should give up and report
    /// `Timeout`. An unbounded deadline renews itself by another `MIN_WAIT` chunk instead.
    fn remaining(&mut self) -> Option<Duration> {
        let now = Instant::now();
        if now < self.at {
            return Some(self.at - now);
        }
        if !self.unbounded {
            return None;
        }
        self.at = now + MIN_WAIT;
        Some(MIN_WAIT)
    }
}

fn on_message(shared: &Shared, fragments: &[PacketBuffer]) {
    let payloads = fragments.iter().map(|buf| buf.payload().to_vec()).collect();
    let mut inbox = shared.inbox.lock().unwrap();
    inbox.records.push_back(Record {
        kind: RecordKind::Unparsed(payloads),
    });
    drop(inbox);
    shared.arrived.notify_all();
}

/// Parse every still-unparsed record into `Data` or `Message`, and drop whatever parses as
/// neither. Run under the inbox lock on every lookup, so malformed records never accumulate.
fn classify(inbox: &mut Inbox) {
    for record in inbox.records.iter_mut() {
        if let RecordKind::Unparsed(fragments) = &record.kind {
            let views: Vec<&[u8]> = fragments.iter().map(|payload| payload.as_slice()).collect();
            let mut reader = ChunkReader::new(&views);
            record.kind = parse_record(&mut reader).unwrap_or(RecordKind::Malformed);
        }
    }

    inbox.records.retain(|record| !matches!(record.kind, RecordKind::Malformed));
}

fn parse_record(reader: &mut ChunkReader) -> Option<RecordKind> {
    let record_type = reader.read::<u8>()?;
    let channel = reader.read::<String>()?;
    match record_type {
        RECORD_TYPE_DATA => {
            let object = PipeObject::read(reader)?;
            Some(RecordKind::Data(channel, object))
        }
        RECORD_TYPE_MESSAGE => {
            let name = reader.read::<String>()?;
            let param = reader.read::<String>()?;
            Some(RecordKind::Message(channel, name, param))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Buffer;
    use slog::Discard;
    use std::time::Duration as StdDuration;

    fn test_logger() -> Logger {
        Logger::root(Discard, slog::o!())
    }

    fn test_config() -> PipeConfig {
        let mut config = PipeConfig::default();
        config.worker_poll_interval = StdDuration::from_millis(10);
        config
    }

    fn free_local_udp() -> String {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        format!("udp://{}", socket.local_addr().unwrap())
    }

    #[test]
    fn test_put_and_get_roundtrip() {
        let uri = free_local_udp();
        let server = Pipe::pipe_create(&uri, test_config(), test_logger(), &Hints::default()).unwrap();
        let client = Pipe::pipe_open(&uri, test_config(), test_logger(), &Hints::default()).unwrap();

        let object = PipeObject::Buffer(Buffer {
            flags: 7,
            data: b"hello".to_vec(),
        });
        client.pipe_put("ch1", &object, 2000, &Hints::default()).unwrap();
        let received = server.pipe_get("ch1", 2000, &Hints::default()).unwrap();
        assert_eq!(received, object);

        client.pipe_close();
        server.pipe_close();
    }

    #[test]
    fn test_get_ignores_other_channels() {
        let uri = free_local_udp();
        let server = Pipe::pipe_create(&uri, test_config(), test_logger(), &Hints::default()).unwrap();
        let client = Pipe::pipe_open(&uri, test_config(), test_logger(), &Hints::default()).unwrap();

        let object = PipeObject::Buffer(Buffer {
            flags: 0,
            data: vec![1, 2, 3],
        });
        client.pipe_put("ch2", &object, 2000, &Hints::default()).unwrap();

        let err = server.pipe_get("ch1", 150, &Hints::default()).unwrap_err();
        assert!(matches!(err, PipeError::Timeout));

        let received = server.pipe_get("ch2", 2000, &Hints::default()).unwrap();
        assert_eq!(received, object);

        client.pipe_close();
        server.pipe_close();
    }

    #[test]
    fn test_message_put_and_get_roundtrip_on_matching_channel() {
        let uri = free_local_udp();
        let server = Pipe::pipe_create(&uri, test_config(), test_logger(), &Hints::default()).unwrap();
        let client = Pipe::pipe_open(&uri, test_config(), test_logger(), &Hints::default()).unwrap();

        client.pipe_message_put("control", "event0", "message0", 100).unwrap();

        let (name, param) = server.pipe_message_get("control", 2000).unwrap();
        assert_eq!(name, "event0");
        assert_eq!(param, "message0");

        client.pipe_close();
        server.pipe_close();
    }

    #[test]
    fn test_get_times_out_with_no_traffic() {
        let uri = free_local_udp();
        let pipe = Pipe::pipe_create(&uri, test_config(), test_logger(), &Hints::default()).unwrap();

        let err = pipe.pipe_get("anything", 1, &Hints::default()).unwrap_err();
        assert!(matches!(err, PipeError::Timeout));

        pipe.pipe_close();
    }

    #[test]
    fn test_zero_timeout_suppresses_the_timeout_error() {
        let uri = free_local_udp();
        let server = Pipe::pipe_create(&uri, test_config(), test_logger(), &Hints::default()).unwrap();
        let client = Pipe::pipe_open(&uri, test_config(), test_logger(), &Hints::default()).unwrap();

        let object = PipeObject::Buffer(Buffer {
            flags: 1,
            data: vec![9],
        });

        std::thread::scope(|scope| {
            let getter = scope.spawn(|| {
                // timeout_ms == 0: must never observe a Timeout, however long the match takes to
                // arrive, and must still return once the put lands.
                server.pipe_get("ch1", 0, &Hints::default())
            });

            // Give the getter a head start waiting before anything has been put, so it would
            // have reported Timeout by now under the old always-Err behavior.
            std::thread::sleep(StdDuration::from_millis(250));
            client.pipe_put("ch1", &object, 2000, &Hints::default()).unwrap();

            let result = getter.join().expect("getter thread panicked");
            assert_eq!(result.unwrap(), object);
        });

        client.pipe_close();
        server.pipe_close();
    }

    #[test]
    fn test_reserved_operations_are_not_implemented() {
        let uri = free_local_udp();
        let pipe = Pipe::pipe_create(&uri, test_config(), test_logger(), &Hints::default()).unwrap();

        assert!(matches!(pipe.pipe_flush(), Err(PipeError::NotImplemented)));
        assert!(matches!(pipe.pipe_peek(), Err(PipeError::NotImplemented)));
        assert!(matches!(pipe.pipe_info_get(), Err(PipeError::NotImplemented)));

        pipe.pipe_close();
    }

    #[test]
    fn test_malformed_record_is_garbage_collected() {
        let mut inbox = Inbox {
            records: VecDeque::new(),
        };

        // one stray byte: not a valid chunk header (needs at least 5 bytes), so it parses as
        // neither a Data nor a Message record.
        inbox.records.push_back(Record {
            kind: RecordKind::Unparsed(vec![vec![0xFFu8]]),
        });

        classify(&mut inbox);
        assert!(inbox.records.is_empty());
    }

    #[test]
    fn test_unknown_record_type_is_garbage_collected() {
        let uri = free_local_udp();
        let pipe = Pipe::pipe_create(&uri, test_config(), test_logger(), &Hints::default()).unwrap();

        // A chunk carrying record-type byte 77: matches neither RECORD_TYPE_DATA nor
        // RECORD_TYPE_MESSAGE, so it should parse as Malformed and vanish on the next lookup.
        let chunk_bytes: [u8; 6] = [5, 0, 0, 0, /* tag u8 */ 2, /* value */ 77];

        {
            let mut inbox = pipe.shared.inbox.lock().unwrap();
            inbox.records.push_back(Record {
                kind: RecordKind::Unparsed(vec![chunk_bytes.to_vec()]),
            });
        }

        let err = pipe.pipe_get("anything", 100, &Hints::default()).unwrap_err();
        assert!(matches!(err, PipeError::Timeout));
        assert!(pipe.shared.inbox.lock().unwrap().records.is_empty());

        pipe.pipe_close();
    }
}
