//! libbpf backed event source.
//!
//! The probes live in a precompiled BPF object. Before the object is loaded,
//! its options global is filled in and programs are switched on or off
//! according to a `ProbePlan`, so disabled programs are neither verified nor
//! attached.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use libbpf_rs::{
    Link, MapCore, MapHandle, Object, ObjectBuilder, OpenObject, PrintLevel, RingBuffer,
    RingBufferBuilder,
};
use log::{debug, info, warn};

use super::options::RawOptions;
use super::probes::ProbePlan;
use super::{ChannelHandle, EventChannel, EventKind, EventSourceBinding, PollError, RecordCallback};

fn libbpf_log(level: PrintLevel, msg: String) {
    let msg = msg.trim_end();

    match level {
        PrintLevel::Warn => warn!("libbpf: {}", msg),
        PrintLevel::Info => info!("libbpf: {}", msg),
        PrintLevel::Debug => debug!("libbpf: {}", msg),
    }
}

/// Copies `opts` to the start of the `.bss` initial image.
fn write_options(open_obj: &mut OpenObject, opts: &RawOptions) -> Result<()> {
    let mut bss = open_obj
        .maps_mut()
        .find(|m| m.name().to_string_lossy().ends_with(".bss"))
        .context("No .bss section in the BPF object")?;

    let bytes = opts.as_bytes();
    let data = bss
        .initial_value_mut()
        .context("The .bss section has no initial value")?;

    if data.len() < bytes.len() {
        bail!(
            ".bss section too small for the probe options: {} < {} bytes",
            data.len(),
            bytes.len()
        );
    }

    data[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Loaded and attached scheduler probes.
pub struct BpfSource {
    // Links go first, so that programs are detached before the object is
    // closed.
    links: Vec<Link>,
    obj: Object,
}

impl BpfSource {
    /// Opens the object at `path`, hands it `opts`, loads the programs of
    /// `plan` and attaches them. Failing to attach any of them is fatal.
    pub fn open(path: &Path, opts: &RawOptions, plan: &ProbePlan) -> Result<Self> {
        libbpf_rs::set_print(Some((PrintLevel::Debug, libbpf_log)));

        let mut open_obj = ObjectBuilder::default()
            .open_file(path)
            .with_context(|| format!("Failed to open BPF object {}", path.display()))?;

        write_options(&mut open_obj, opts)?;

        for mut prog in open_obj.progs_mut() {
            let name = prog.name().to_string_lossy().into_owned();

            if !ProbePlan::is_known(&name) {
                debug!("Leaving unknown program {} inactive", name);
            }

            prog.set_autoload(plan.is_enabled(&name));
        }

        let mut obj = open_obj
            .load()
            .with_context(|| format!("Failed to load BPF object {}", path.display()))?;

        let mut links = Vec::with_capacity(plan.len());
        let mut attached = Vec::with_capacity(plan.len());

        for prog in obj.progs_mut() {
            let name = prog.name().to_string_lossy().into_owned();

            if !plan.is_enabled(&name) {
                continue;
            }

            let link = prog
                .attach()
                .with_context(|| format!("Failed to attach {}", name))?;

            links.push(link);
            attached.push(name);
        }

        for p in plan.programs() {
            if !attached.iter().any(|a| a == p) {
                warn!("{} not found in {}", p, path.display());
            }
        }

        debug!("{} BPF programs attached", links.len());

        Ok(Self { links, obj })
    }
}

impl EventSourceBinding for BpfSource {
    type Handle = BpfChannelHandle;

    fn channel(&self, kind: EventKind) -> Result<BpfChannelHandle> {
        let map_name = kind.map_name();

        let map = self
            .obj
            .maps()
            .find(|m| m.name().to_string_lossy() == map_name)
            .with_context(|| format!("Ring buffer {} not found", map_name))?;

        let map = MapHandle::try_from(&map)
            .with_context(|| format!("Failed to duplicate {}", map_name))?;

        Ok(BpfChannelHandle { map })
    }
}

impl Drop for BpfSource {
    fn drop(&mut self) {
        debug!("Detaching {} BPF programs", self.links.len());
    }
}

/// Owned ring buffer map descriptor.
pub struct BpfChannelHandle {
    map: MapHandle,
}

impl ChannelHandle for BpfChannelHandle {
    type Channel = BpfChannel;

    fn open(self, mut on_record: RecordCallback) -> Result<BpfChannel> {
        let mut builder = RingBufferBuilder::new();

        builder.add(&self.map as &dyn MapCore, move |data: &[u8]| {
            on_record(data);
            0
        })?;

        let rb = builder.build()?;

        Ok(BpfChannel { rb, _map: self.map })
    }
}

pub struct BpfChannel {
    rb: RingBuffer<'static>,
    _map: MapHandle,
}

impl EventChannel for BpfChannel {
    fn poll(&mut self, timeout: Duration) -> Result<(), PollError> {
        match self.rb.poll(timeout) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == libbpf_rs::ErrorKind::Interrupted => Err(PollError::Interrupted),
            Err(e) => Err(PollError::Transport(e.into())),
        }
    }
}
