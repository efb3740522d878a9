//! Trace session.
//!
//! A session owns the output file and a writer thread. Every channel worker
//! gets its own `TraceRecorder`, which batches records locally and sends full
//! batches to the writer thread, so workers never contend on a lock.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};

use super::writer::TraceEventWriter;
use super::{TraceRecord, TraceSink};

const SESSION_QUEUE_DEPTH: usize = 128;

/// Per-worker sink batching records for the writer thread.
pub struct TraceRecorder {
    tx: SyncSender<Vec<TraceRecord>>,
    batch: Vec<TraceRecord>,
    batch_size: usize,
}

impl TraceRecorder {
    /// Sends the pending records, if any.
    pub fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        if self.tx.send(batch).is_err() {
            warn!("trace writer is gone, dropping records");
        }
    }
}

impl TraceSink for TraceRecorder {
    fn emit(&mut self, record: TraceRecord) {
        self.batch.push(record);

        if self.batch.len() >= self.batch_size {
            self.flush();
        }
    }
}

impl Drop for TraceRecorder {
    fn drop(&mut self) {
        self.flush();
    }
}

/// A running trace collection.
pub struct TraceSession {
    tx: Option<SyncSender<Vec<TraceRecord>>>,
    writer: Option<JoinHandle<Result<usize>>>,
    batch_size: usize,
}

impl TraceSession {
    /// Writes the trace header and starts the writer thread.
    pub fn start<W: Write + Send + 'static>(
        mut writer: TraceEventWriter<W>,
        batch_size: usize,
    ) -> Result<Self> {
        writer.start().context("Failed to write trace header")?;

        let (tx, rx) = mpsc::sync_channel::<Vec<TraceRecord>>(SESSION_QUEUE_DEPTH);

        let handle = std::thread::Builder::new()
            .name("trace-writer".to_string())
            .spawn(move || Self::writer_loop(writer, rx))?;

        Ok(Self {
            tx: Some(tx),
            writer: Some(handle),
            batch_size: batch_size.max(1),
        })
    }

    fn writer_loop<W: Write>(
        mut writer: TraceEventWriter<W>,
        rx: Receiver<Vec<TraceRecord>>,
    ) -> Result<usize> {
        // Ends once every recorder and the session sender are dropped.
        for batch in rx.iter() {
            for record in batch.iter() {
                writer.write(record)?;
            }
        }

        writer.close()?;
        Ok(writer.count())
    }

    /// Returns a new sink feeding this session.
    pub fn recorder(&self) -> Result<TraceRecorder> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("trace session already stopped"))?
            .clone();

        Ok(TraceRecorder {
            tx,
            batch: Vec::with_capacity(self.batch_size),
            batch_size: self.batch_size,
        })
    }

    /// Waits for all the records sent so far to be written and closes the
    /// output. Recorders must have been dropped beforehand, otherwise this
    /// blocks until they are.
    pub fn stop(mut self) -> Result<usize> {
        self.tx.take();

        let handle = self
            .writer
            .take()
            .ok_or_else(|| anyhow!("trace session already stopped"))?;

        let written = handle
            .join()
            .map_err(|_| anyhow!("trace writer thread panicked"))??;

        debug!("{} trace records written", written);

        Ok(written)
    }
}
