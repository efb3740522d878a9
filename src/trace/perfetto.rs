//! Builders for the Perfetto packets sched-analyzer emits.
//!
//! Counters go to one counter track per time series, load balance phases are
//! slices and IPIs are instant events. Every event packet is stamped with
//! CLOCK_MONOTONIC, the clock `bpf_ktime_get_ns()` reads.

use perfetto_protos::builtin_clock::BuiltinClock;
use perfetto_protos::counter_descriptor::counter_descriptor::Unit;
use perfetto_protos::counter_descriptor::CounterDescriptor;
use perfetto_protos::debug_annotation::DebugAnnotation;
use perfetto_protos::trace_packet::trace_packet::SequenceFlags;
use perfetto_protos::trace_packet::TracePacket;
use perfetto_protos::track_descriptor::TrackDescriptor;
use perfetto_protos::track_event::track_event::Type;
use perfetto_protos::track_event::TrackEvent;

/// First packet of a sequence.
pub fn sequence_start(seq: u32) -> TracePacket {
    let mut packet = TracePacket::default();
    packet.set_trusted_packet_sequence_id(seq);
    packet.set_sequence_flags(SequenceFlags::SEQ_INCREMENTAL_STATE_CLEARED as u32);
    packet
}

pub fn descriptor_packet(seq: u32, desc: TrackDescriptor) -> TracePacket {
    let mut packet = TracePacket::default();
    packet.set_trusted_packet_sequence_id(seq);
    packet.set_track_descriptor(desc);
    packet
}

pub fn event_packet(seq: u32, ts: u64, event: TrackEvent) -> TracePacket {
    let mut packet = TracePacket::default();
    packet.set_timestamp(ts);
    packet.set_timestamp_clock_id(BuiltinClock::BUILTIN_CLOCK_MONOTONIC as u32);
    packet.set_trusted_packet_sequence_id(seq);
    packet.set_track_event(event);
    packet
}

pub fn counter_track(uuid: u64, name: String) -> TrackDescriptor {
    let mut counter = CounterDescriptor::default();
    counter.set_unit(Unit::UNIT_COUNT);
    counter.set_is_incremental(false);

    let mut desc = slice_track(uuid, name);
    desc.counter = Some(counter).into();
    desc
}

pub fn slice_track(uuid: u64, name: String) -> TrackDescriptor {
    let mut desc = TrackDescriptor::default();
    desc.set_uuid(uuid);
    desc.set_name(name);
    desc
}

pub fn counter(track_uuid: u64, value: i64) -> TrackEvent {
    let mut event = TrackEvent::default();
    event.set_type(Type::TYPE_COUNTER);
    event.set_track_uuid(track_uuid);
    event.set_counter_value(value);
    event
}

pub fn slice_begin(track_uuid: u64, name: &str) -> TrackEvent {
    let mut event = TrackEvent::default();
    event.set_type(Type::TYPE_SLICE_BEGIN);
    event.set_track_uuid(track_uuid);
    event.set_name(name.to_string());
    event
}

pub fn slice_end(track_uuid: u64) -> TrackEvent {
    let mut event = TrackEvent::default();
    event.set_type(Type::TYPE_SLICE_END);
    event.set_track_uuid(track_uuid);
    event
}

pub fn instant(track_uuid: u64, name: String) -> TrackEvent {
    let mut event = TrackEvent::default();
    event.set_type(Type::TYPE_INSTANT);
    event.set_track_uuid(track_uuid);
    event.set_name(name);
    event
}

pub fn int_annotation(name: &str, value: i64) -> DebugAnnotation {
    let mut a = DebugAnnotation::default();
    a.set_name(name.to_string());
    a.set_int_value(value);
    a
}

pub fn string_annotation(name: &str, value: &str) -> DebugAnnotation {
    let mut a = DebugAnnotation::default();
    a.set_name(name.to_string());
    a.set_string_value(value.to_string());
    a
}

pub fn pointer_annotation(name: &str, value: u64) -> DebugAnnotation {
    let mut a = DebugAnnotation::default();
    a.set_name(name.to_string());
    a.set_pointer_value(value);
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use protobuf::Message;

    #[test]
    fn test_counter_packet() {
        let p = event_packet(1, 1000, counter(7, 42));
        let decoded = TracePacket::parse_from_bytes(&p.write_to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.timestamp(), 1000);
        assert_eq!(decoded.timestamp_clock_id(), 3);
        assert_eq!(decoded.trusted_packet_sequence_id(), 1);
        assert_eq!(decoded.track_event().type_(), Type::TYPE_COUNTER);
        assert_eq!(decoded.track_event().track_uuid(), 7);
        assert_eq!(decoded.track_event().counter_value(), 42);
    }

    #[test]
    fn test_counter_track() {
        let desc = counter_track(3, "CPU0 util_avg".into());

        assert_eq!(desc.uuid(), 3);
        assert_eq!(desc.name(), "CPU0 util_avg");
        assert!(desc.counter.is_some());
        assert!(slice_track(4, "CPU0 ipi".into()).counter.is_none());
    }
}
