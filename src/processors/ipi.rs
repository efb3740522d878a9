//! IPI processor.

use std::sync::Arc;

use crate::context::SignalSwitches;
use crate::events::IpiEvent;
use crate::symbols::SymbolResolver;
use crate::trace::{CodeAddress, TraceRecord, TraceSink};
use crate::tracer::raw::RawIpi;

use super::EventHandler;

pub struct IpiHandler {
    signals: SignalSwitches,
    symbols: Arc<dyn SymbolResolver>,
}

impl IpiHandler {
    pub fn new(signals: SignalSwitches, symbols: Arc<dyn SymbolResolver>) -> Self {
        Self { signals, symbols }
    }

    fn lookup(&self, addr: u64) -> CodeAddress {
        CodeAddress {
            addr,
            name: self.symbols.resolve(addr).map(str::to_string),
        }
    }
}

impl EventHandler for IpiHandler {
    type Raw = RawIpi;
    type Event = IpiEvent;

    const RECORD: &'static str = "ipi";

    fn handle(&mut self, e: &IpiEvent, sink: &mut dyn TraceSink) {
        if !self.signals.ipi {
            return;
        }

        sink.emit(TraceRecord::Ipi {
            ts: e.ts,
            from_cpu: e.from_cpu,
            target_cpu: e.target_cpu,
            callsite: self.lookup(e.callsite),
            callback: self.lookup(e.callback),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::Kallsyms;

    #[test]
    fn test_ipi_resolution() {
        let syms = Kallsyms::from_reader(&b"ffffffff81000100 T send_call_function_ipi\n"[..]).unwrap();
        let mut h = IpiHandler::new(
            SignalSwitches {
                ipi: true,
                ..Default::default()
            },
            Arc::new(syms),
        );
        let mut out: Vec<TraceRecord> = Vec::new();

        h.handle(
            &IpiEvent {
                ts: 7,
                from_cpu: 0,
                target_cpu: 2,
                callsite: 0xffffffff81000110,
                callback: 0x10,
            },
            &mut out,
        );

        assert_eq!(
            out,
            vec![TraceRecord::Ipi {
                ts: 7,
                from_cpu: 0,
                target_cpu: 2,
                callsite: CodeAddress {
                    addr: 0xffffffff81000110,
                    name: Some("send_call_function_ipi".into()),
                },
                callback: CodeAddress {
                    addr: 0x10,
                    name: None,
                },
            }]
        );
    }
}
