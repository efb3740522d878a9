//! Kernel symbol resolution for IPI callsites and callbacks.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

/// Maps a kernel address to the name of the function containing it.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, addr: u64) -> Option<&str>;
}

/// Resolver that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
    fn resolve(&self, _addr: u64) -> Option<&str> {
        None
    }
}

/// Largest distance from the last symbol still attributed to it.
const MAX_LAST_SYMBOL_SPAN: u64 = 64 * 1024;

/// Symbol table loaded from `/proc/kallsyms`.
#[derive(Debug, Default, Clone)]
pub struct Kallsyms {
    // Sorted by address.
    syms: Vec<(u64, String)>,
}

impl Kallsyms {
    pub const PATH: &'static str = "/proc/kallsyms";

    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(Self::PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let syms = Self::from_reader(BufReader::new(f))?;

        debug!("{} kernel symbols loaded from {}", syms.len(), path.display());

        Ok(syms)
    }

    /// Parses `<addr> <type> <name> [module]` lines. Malformed lines and zero
    /// addresses (kptr_restrict) are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut syms = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let mut fields = line.split_whitespace();

            let (Some(addr), Some(_), Some(name)) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };

            match u64::from_str_radix(addr, 16) {
                Ok(0) | Err(_) => continue,
                Ok(a) => syms.push((a, name.to_string())),
            }
        }

        syms.sort_by_key(|(a, _)| *a);

        Ok(Self { syms })
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }
}

impl SymbolResolver for Kallsyms {
    fn resolve(&self, addr: u64) -> Option<&str> {
        let idx = self.syms.partition_point(|(a, _)| *a <= addr);

        if idx == 0 {
            return None;
        }

        let (start, name) = &self.syms[idx - 1];

        // Nothing bounds the last symbol.
        if idx == self.syms.len() && addr - start >= MAX_LAST_SYMBOL_SPAN {
            return None;
        }

        Some(name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KALLSYMS: &str = "\
ffffffff81000000 T _stext
ffffffff810f1230 T generic_smp_call_function_single_interrupt
0000000000000000 A fixed_percpu_data
ffffffff810f0000 t smp_call_function_many_cond
garbage
ffffffffc0a01000 t nvme_irq\t[nvme]
";

    #[test]
    fn test_nearest_preceding_symbol() {
        let syms = Kallsyms::from_reader(KALLSYMS.as_bytes()).unwrap();

        assert_eq!(syms.len(), 4);
        assert_eq!(syms.resolve(0xffffffff810f0000), Some("smp_call_function_many_cond"));
        assert_eq!(syms.resolve(0xffffffff810f0042), Some("smp_call_function_many_cond"));
        assert_eq!(
            syms.resolve(0xffffffff810f1240),
            Some("generic_smp_call_function_single_interrupt")
        );
        assert_eq!(syms.resolve(0xffffffffc0a01010), Some("nvme_irq"));
    }

    #[test]
    fn test_miss() {
        let syms = Kallsyms::from_reader(KALLSYMS.as_bytes()).unwrap();

        assert_eq!(syms.resolve(0x1000), None);
        assert_eq!(syms.resolve(0xffffffffc0a01000 + MAX_LAST_SYMBOL_SPAN), None);
        assert_eq!(syms.resolve(u64::MAX), None);
        assert_eq!(NoSymbols.resolve(0xffffffff81000000), None);
        assert!(Kallsyms::default().resolve(42).is_none());
    }
}
