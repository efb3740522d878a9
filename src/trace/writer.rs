//! Trace recorder.

use std::{
    collections::HashMap,
    io::{BufWriter, Write},
};

use anyhow::Result;
use perfetto_protos::trace::Trace;
use perfetto_protos::trace_packet::TracePacket;
use perfetto_protos::track_descriptor::TrackDescriptor;
use perfetto_protos::track_event::TrackEvent;
use protobuf::Message;

use super::perfetto;
use super::{Track, TraceRecord};

/// Output format for trace records
#[derive(Debug, Default, Clone, Copy, clap::ValueEnum, PartialEq, Eq)]
pub enum TraceFormat {
    /// Perfetto protobuf trace, loadable in ui.perfetto.dev
    #[default]
    Perfetto,
    /// JSON array of records
    Json,
}

impl TraceFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TraceFormat::Perfetto => "perfetto-trace",
            TraceFormat::Json => "json",
        }
    }
}

/// Tracks that are not counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SliceTrack {
    LoadBalance(i32),
    Ipi(i32),
}

const SEQUENCE_ID: u32 = 1;

/// Assigns a perfetto track uuid to every distinct time series.
#[derive(Default)]
struct TrackInterner {
    next_uuid: u64,
    counters: HashMap<Track, u64>,
    named: HashMap<String, u64>,
    slices: HashMap<SliceTrack, u64>,
}

impl TrackInterner {
    fn next(&mut self) -> u64 {
        self.next_uuid += 1;
        self.next_uuid
    }

    /// Returns the uuid of `track`, and its descriptor when seen for the
    /// first time.
    fn counter(&mut self, track: &Track) -> (u64, Option<TrackDescriptor>) {
        if let Some(uuid) = self.counters.get(track) {
            return (*uuid, None);
        }

        let uuid = self.next();
        self.counters.insert(track.clone(), uuid);

        (uuid, Some(perfetto::counter_track(uuid, track.to_string())))
    }

    fn named_counter(&mut self, name: String) -> (u64, Option<TrackDescriptor>) {
        if let Some(uuid) = self.named.get(&name) {
            return (*uuid, None);
        }

        let uuid = self.next();
        self.named.insert(name.clone(), uuid);

        (uuid, Some(perfetto::counter_track(uuid, name)))
    }

    fn slices(&mut self, track: SliceTrack) -> (u64, Option<TrackDescriptor>) {
        if let Some(uuid) = self.slices.get(&track) {
            return (*uuid, None);
        }

        let uuid = self.next();
        let name = match &track {
            SliceTrack::LoadBalance(cpu) => format!("CPU{} load_balance", cpu),
            SliceTrack::Ipi(cpu) => format!("CPU{} ipi", cpu),
        };
        self.slices.insert(track, uuid);

        (uuid, Some(perfetto::slice_track(uuid, name)))
    }
}

pub struct TraceEventWriter<W: Write> {
    file: BufWriter<W>,
    count: usize,
    format: TraceFormat,
    tracks: TrackInterner,
}

impl<W: Write> TraceEventWriter<W> {
    pub fn new(out: W, format: TraceFormat) -> Self {
        Self {
            file: BufWriter::with_capacity(64 * 1024, out),
            count: 0,
            format,
            tracks: TrackInterner::default(),
        }
    }

    /// Number of records written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn start(&mut self) -> Result<()> {
        match self.format {
            TraceFormat::Json => self.file.write_all(b"[")?,
            TraceFormat::Perfetto => self.write_packet(perfetto::sequence_start(SEQUENCE_ID))?,
        }

        Ok(())
    }

    pub fn write(&mut self, record: &TraceRecord) -> Result<()> {
        match self.format {
            TraceFormat::Json => self.write_json(record)?,
            TraceFormat::Perfetto => self.write_perfetto(record)?,
        }

        self.count += 1;
        Ok(())
    }

    #[inline]
    fn write_json(&mut self, record: &TraceRecord) -> Result<()> {
        if self.count == 0 {
            self.file.write_all(b"\n    ")?;
        } else {
            self.file.write_all(b",\n    ")?;
        }

        serde_json::to_writer(&mut self.file, record)?;
        Ok(())
    }

    /// Appends one `Trace.packet` entry. Concatenated single packet traces
    /// decode as one trace.
    #[inline]
    fn write_packet(&mut self, packet: TracePacket) -> Result<()> {
        let mut trace = Trace::default();
        trace.packet.push(packet);

        trace.write_to_writer(&mut self.file)?;
        Ok(())
    }

    fn write_event(
        &mut self,
        ts: u64,
        descriptor: Option<TrackDescriptor>,
        event: TrackEvent,
    ) -> Result<()> {
        if let Some(desc) = descriptor {
            self.write_packet(perfetto::descriptor_packet(SEQUENCE_ID, desc))?;
        }

        self.write_packet(perfetto::event_packet(SEQUENCE_ID, ts, event))
    }

    fn write_perfetto(&mut self, record: &TraceRecord) -> Result<()> {
        match record {
            TraceRecord::Counter { ts, track, value } => {
                let (uuid, desc) = self.tracks.counter(track);
                self.write_event(*ts, desc, perfetto::counter(uuid, *value))
            }

            TraceRecord::LbEntry {
                ts,
                this_cpu,
                lb_cpu,
                phase,
            } => {
                let (uuid, desc) = self.tracks.slices(SliceTrack::LoadBalance(*this_cpu));
                let mut ev = perfetto::slice_begin(uuid, phase);
                ev.debug_annotations
                    .push(perfetto::int_annotation("lb_cpu", *lb_cpu as i64));

                self.write_event(*ts, desc, ev)
            }

            TraceRecord::LbExit { ts, this_cpu, .. } => {
                let (uuid, desc) = self.tracks.slices(SliceTrack::LoadBalance(*this_cpu));
                self.write_event(*ts, desc, perfetto::slice_end(uuid))
            }

            TraceRecord::LbSdStats { ts, stats } => {
                for level in stats.levels.iter() {
                    let name = format!("CPU{} {} balance_interval", stats.cpu, level.name);
                    let (uuid, desc) = self.tracks.named_counter(name);
                    let ev = perfetto::counter(uuid, level.balance_interval as i64);

                    self.write_event(*ts, desc, ev)?;
                }

                Ok(())
            }

            TraceRecord::Ipi {
                ts,
                from_cpu,
                target_cpu,
                callsite,
                callback,
            } => {
                let (uuid, desc) = self.tracks.slices(SliceTrack::Ipi(*from_cpu));
                let mut ev = perfetto::instant(uuid, format!("ipi -> CPU{}", target_cpu));

                ev.debug_annotations.extend([
                    perfetto::int_annotation("target_cpu", *target_cpu as i64),
                    perfetto::string_annotation("callsite", callsite.name.as_deref().unwrap_or("")),
                    perfetto::pointer_annotation("callsite_addr", callsite.addr),
                    perfetto::string_annotation("callback", callback.name.as_deref().unwrap_or("")),
                    perfetto::pointer_annotation("callback_addr", callback.addr),
                ]);

                self.write_event(*ts, desc, ev)
            }
        }
    }

    pub fn close(&mut self) -> Result<()> {
        if self.format == TraceFormat::Json {
            self.file.write_all(b"\n]\n")?;
        }

        self.file.flush()?;
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        match self.file.into_inner() {
            Ok(w) => w,
            Err(_) => panic!("flush failed"),
        }
    }
}
