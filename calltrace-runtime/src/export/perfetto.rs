//! Perfetto track-event protobuf writer.
//!
//! The schema subset below mirrors the field numbers of
//! `perfetto.protos.Trace` so the output loads directly in ui.perfetto.dev.
//! Only the handful of fields this exporter populates are declared; protobuf
//! readers skip the rest by design of the wire format.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use prost::Message;
use tempfile::NamedTempFile;

use crate::entry::{format_values, TraceEntry};
use crate::export::ExportError;
use crate::tracer::Tracer;

#[derive(Clone, PartialEq, Message)]
pub struct Trace {
    #[prost(message, repeated, tag = "1")]
    pub packet: Vec<TracePacket>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TracePacket {
    #[prost(uint64, optional, tag = "8")]
    pub timestamp: Option<u64>,
    #[prost(uint32, optional, tag = "10")]
    pub trusted_packet_sequence_id: Option<u32>,
    #[prost(message, optional, tag = "11")]
    pub track_event: Option<TrackEvent>,
    #[prost(message, optional, tag = "60")]
    pub track_descriptor: Option<TrackDescriptor>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TrackDescriptor {
    #[prost(uint64, optional, tag = "1")]
    pub uuid: Option<u64>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub process: Option<ProcessDescriptor>,
    #[prost(message, optional, tag = "4")]
    pub thread: Option<ThreadDescriptor>,
    #[prost(uint64, optional, tag = "5")]
    pub parent_uuid: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProcessDescriptor {
    #[prost(int32, optional, tag = "1")]
    pub pid: Option<i32>,
    #[prost(string, optional, tag = "6")]
    pub process_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ThreadDescriptor {
    #[prost(int32, optional, tag = "1")]
    pub pid: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub tid: Option<i32>,
    #[prost(string, optional, tag = "5")]
    pub thread_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TrackEvent {
    #[prost(message, repeated, tag = "4")]
    pub debug_annotations: Vec<DebugAnnotation>,
    #[prost(enumeration = "TrackEventType", optional, tag = "9")]
    pub r#type: Option<i32>,
    #[prost(uint64, optional, tag = "11")]
    pub track_uuid: Option<u64>,
    #[prost(string, optional, tag = "23")]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DebugAnnotation {
    #[prost(string, optional, tag = "6")]
    pub string_value: Option<String>,
    #[prost(string, optional, tag = "10")]
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum TrackEventType {
    Unspecified = 0,
    SliceBegin = 1,
    SliceEnd = 2,
}

const SEQUENCE_ID: u32 = 1;
const PROCESS_TRACK_UUID: u64 = 1;
// Thread track uuids live above the process uuid so they never collide.
const THREAD_TRACK_BASE: u64 = 1000;

/// Builds and writes a Perfetto trace from a tracer's recorded entries.
///
/// Timestamps are microseconds relative to tracer start, one track per
/// traced thread, nested slices reconstructed from the entry brackets.
pub struct PerfettoExporter<'a> {
    tracer: &'a Tracer,
    process_name: String,
}

impl<'a> PerfettoExporter<'a> {
    #[must_use]
    pub fn new(tracer: &'a Tracer) -> Self {
        Self {
            tracer,
            process_name: std::env::args()
                .next()
                .unwrap_or_else(|| "traced".to_string()),
        }
    }

    #[must_use]
    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    /// Serializes the trace into `out`.
    pub fn export<W: Write>(&self, out: &mut W) -> Result<(), ExportError> {
        let trace = self.build_trace();
        let mut buf = Vec::with_capacity(trace.encoded_len());
        // Encoding into a Vec cannot fail; the buffer grows as needed.
        trace
            .encode(&mut buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        out.write_all(&buf)?;
        Ok(())
    }

    /// Writes the trace to `path` atomically: a sibling temp file is
    /// populated first and renamed into place, so readers never observe a
    /// half-written trace.
    pub fn export_to_file(&self, path: &Path) -> Result<(), ExportError> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        self.export(&mut tmp)?;
        tmp.flush()?;
        let _: File = tmp.persist(path).map_err(|e| ExportError::Persist {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }

    pub(crate) fn build_trace(&self) -> Trace {
        let entries = self.tracer.get_traces();
        let start_ns = self.tracer.start_ns();
        let pid = pid_i32();

        let mut threads: Vec<u64> = entries.iter().map(|e| e.thread).collect();
        threads.sort_unstable();
        threads.dedup();

        let mut packets = Vec::new();
        packets.push(TracePacket {
            trusted_packet_sequence_id: Some(SEQUENCE_ID),
            track_descriptor: Some(TrackDescriptor {
                uuid: Some(PROCESS_TRACK_UUID),
                process: Some(ProcessDescriptor {
                    pid: Some(pid),
                    process_name: Some(self.process_name.clone()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        for &thread in &threads {
            packets.push(TracePacket {
                trusted_packet_sequence_id: Some(SEQUENCE_ID),
                track_descriptor: Some(TrackDescriptor {
                    uuid: Some(THREAD_TRACK_BASE + thread),
                    parent_uuid: Some(PROCESS_TRACK_UUID),
                    thread: Some(ThreadDescriptor {
                        pid: Some(pid),
                        tid: Some(tid_for(thread)),
                        thread_name: Some(format!("thread {thread}")),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }

        for &thread in &threads {
            emit_thread_slices(&mut packets, &entries, thread, start_ns);
        }

        Trace { packet: packets }
    }
}

/// Emits begin/end slice packets for one thread's entries.
///
/// Entries arrive in completion order; replaying them in preorder (start
/// ascending, with the longer bracket first on ties) against a stack of open
/// end times reconstructs the original nesting.
fn emit_thread_slices(packets: &mut Vec<TracePacket>, entries: &[TraceEntry], thread: u64, start_ns: u64) {
    let track_uuid = THREAD_TRACK_BASE + thread;
    let mut ordered: Vec<&TraceEntry> = entries.iter().filter(|e| e.thread == thread).collect();
    ordered.sort_by(|a, b| {
        a.start_ns
            .cmp(&b.start_ns)
            .then(b.end_ns.cmp(&a.end_ns))
    });

    let mut open_ends: Vec<u64> = Vec::new();
    for entry in ordered {
        while open_ends.last().is_some_and(|&end| end <= entry.start_ns) {
            let end = open_ends.pop().unwrap_or_default();
            packets.push(slice_end(track_uuid, micros_since(end, start_ns)));
        }
        packets.push(slice_begin(track_uuid, micros_since(entry.start_ns, start_ns), entry));
        open_ends.push(entry.end_ns);
    }
    while let Some(end) = open_ends.pop() {
        packets.push(slice_end(track_uuid, micros_since(end, start_ns)));
    }
}

fn slice_begin(track_uuid: u64, timestamp_us: u64, entry: &TraceEntry) -> TracePacket {
    let mut annotations = Vec::new();
    if !entry.args.is_empty() {
        annotations.push(annotation("args", format_values(&entry.args)));
    }
    if !entry.returns.is_empty() {
        annotations.push(annotation("returns", format_values(&entry.returns)));
    }
    if entry.panicked {
        let payload = entry.panic_payload.clone().unwrap_or_else(|| "panic".to_string());
        annotations.push(annotation("panic", payload));
    }
    annotations.push(annotation("source", format!("{}:{}", entry.file, entry.line)));

    TracePacket {
        timestamp: Some(timestamp_us),
        trusted_packet_sequence_id: Some(SEQUENCE_ID),
        track_event: Some(TrackEvent {
            debug_annotations: annotations,
            r#type: Some(TrackEventType::SliceBegin as i32),
            track_uuid: Some(track_uuid),
            name: Some(entry.name.clone()),
        }),
        ..Default::default()
    }
}

fn slice_end(track_uuid: u64, timestamp_us: u64) -> TracePacket {
    TracePacket {
        timestamp: Some(timestamp_us),
        trusted_packet_sequence_id: Some(SEQUENCE_ID),
        track_event: Some(TrackEvent {
            r#type: Some(TrackEventType::SliceEnd as i32),
            track_uuid: Some(track_uuid),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn annotation(name: &str, value: String) -> DebugAnnotation {
    DebugAnnotation {
        string_value: Some(value),
        name: Some(name.to_string()),
    }
}

fn micros_since(ns: u64, start_ns: u64) -> u64 {
    ns.saturating_sub(start_ns) / 1_000
}

fn pid_i32() -> i32 {
    i32::try_from(std::process::id()).unwrap_or(i32::MAX)
}

fn tid_for(thread: u64) -> i32 {
    i32::try_from(thread).unwrap_or(i32::MAX)
}
