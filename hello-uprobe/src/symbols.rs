//! Symbol resolution in the target binary.
//!
//! Uprobes are attached at a file offset inside the binary, so a symbol's
//! virtual address has to be translated through the section that contains
//! it: `st_value - sh_addr + sh_offset`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use elf::{
    ElfBytes, ParseError,
    abi::{STT_FILE, STT_SECTION},
    endian::AnyEndian,
};
use log::debug;

/// Section indices from here on are reserved (`SHN_ABS`, `SHN_COMMON`, ...)
/// and do not name a section header.
const SHN_LORESERVE: u16 = 0xff00;

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("cannot open target binary {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {} as ELF", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    /// Emitted for stripped binaries.
    #[error("{} has no symbol table", path.display())]
    NoSymbols { path: PathBuf },
    #[error("symbol `{symbol}` not found in {}", path.display())]
    NotFound { symbol: String, path: PathBuf },
    #[error("symbol `{symbol}` is ambiguous in {}: found at {addresses:x?}", path.display())]
    Ambiguous {
        symbol: String,
        path: PathBuf,
        addresses: Vec<u64>,
    },
    #[error("symbol `{symbol}` in {} is not inside a file-backed section", path.display())]
    Unmapped { symbol: String, path: PathBuf },
}

/// A resolved symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    /// Link-time virtual address (`st_value`).
    pub address: u64,
    pub size: u64,
    /// Offset of the symbol inside the file, as expected by the uprobe API.
    pub file_offset: u64,
}

/// An opened target binary, ready for symbol lookups.
#[derive(Debug)]
pub struct Executable {
    path: PathBuf,
    data: Vec<u8>,
}

impl Executable {
    /// Open and validate an ELF binary. The stored path is canonical, as the
    /// kernel attach call needs an absolute path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ResolveError> {
        let path = path.as_ref();
        let open_err = |source| ResolveError::Open {
            path: path.to_path_buf(),
            source,
        };

        let path = fs::canonicalize(path).map_err(open_err)?;
        let data = fs::read(&path).map_err(open_err)?;
        ElfBytes::<AnyEndian>::minimal_parse(&data).map_err(|source| ResolveError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve `name` to a single symbol, looking at both `.symtab` and
    /// `.dynsym`. Entries sharing an address are the same symbol; entries at
    /// different addresses make the name ambiguous.
    pub fn resolve(&self, name: &str) -> Result<Symbol, ResolveError> {
        let file = ElfBytes::<AnyEndian>::minimal_parse(&self.data).map_err(|e| self.parse_err(e))?;

        let mut found_table = false;
        let mut candidates: Vec<Symbol> = Vec::new();

        for table in [file.symbol_table(), file.dynamic_symbol_table()] {
            let Some((symtab, strtab)) = table.map_err(|e| self.parse_err(e))? else {
                continue;
            };
            found_table = true;

            for sym in symtab.iter() {
                if sym.is_undefined() || matches!(sym.st_symtype(), STT_SECTION | STT_FILE) {
                    continue;
                }
                let sym_name = strtab
                    .get_raw(sym.st_name as usize)
                    .map_err(|e| self.parse_err(e))?;
                if sym_name != name.as_bytes() {
                    continue;
                }
                if candidates.iter().any(|c| c.address == sym.st_value) {
                    continue;
                }

                let file_offset = self.file_offset(&file, name, sym.st_shndx, sym.st_value)?;
                candidates.push(Symbol {
                    name: name.to_string(),
                    address: sym.st_value,
                    size: sym.st_size,
                    file_offset,
                });
            }
        }

        if !found_table {
            return Err(ResolveError::NoSymbols {
                path: self.path.clone(),
            });
        }

        let symbol = select_unique(name, &self.path, candidates)?;
        debug!(
            "Resolved {} in {} to {:#x} (file offset {:#x})",
            name,
            self.path.display(),
            symbol.address,
            symbol.file_offset
        );
        Ok(symbol)
    }

    fn file_offset(
        &self,
        file: &ElfBytes<'_, AnyEndian>,
        name: &str,
        shndx: u16,
        value: u64,
    ) -> Result<u64, ResolveError> {
        let unmapped = || ResolveError::Unmapped {
            symbol: name.to_string(),
            path: self.path.clone(),
        };

        if shndx >= SHN_LORESERVE {
            return Err(unmapped());
        }
        let shdr = file
            .section_headers()
            .ok_or_else(unmapped)?
            .get(shndx as usize)
            .map_err(|e| self.parse_err(e))?;

        value
            .checked_sub(shdr.sh_addr)
            .and_then(|rel| rel.checked_add(shdr.sh_offset))
            .ok_or_else(unmapped)
    }

    fn parse_err(&self, source: ParseError) -> ResolveError {
        ResolveError::Parse {
            path: self.path.clone(),
            source,
        }
    }
}

fn select_unique(name: &str, path: &Path, mut candidates: Vec<Symbol>) -> Result<Symbol, ResolveError> {
    match candidates.len() {
        0 => Err(ResolveError::NotFound {
            symbol: name.to_string(),
            path: path.to_path_buf(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(ResolveError::Ambiguous {
            symbol: name.to_string(),
            path: path.to_path_buf(),
            addresses: candidates.iter().map(|c| c.address).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use elf::abi::{SHN_ABS, SHT_DYNSYM, SHT_PROGBITS, SHT_SYMTAB};

    use super::*;
    use crate::test_support::{MARKER_SYMBOL, current_exe};

    // Elf64_Sym field offsets.
    const ST_SHNDX: usize = 6;
    const ST_VALUE: usize = 8;

    fn sym(address: u64) -> Symbol {
        Symbol {
            name: "f".to_string(),
            address,
            size: 8,
            file_offset: address,
        }
    }

    /// Offset of `.symtab`, its entry size, and the index of the marker in it.
    fn symtab_layout(data: &[u8]) -> (usize, usize, usize) {
        let file = ElfBytes::<AnyEndian>::minimal_parse(data).unwrap();
        let shdr = file.section_header_by_name(".symtab").unwrap().expect(".symtab");
        let (symtab, strtab) = file.symbol_table().unwrap().unwrap();
        let marker = symtab
            .iter()
            .position(|s| strtab.get_raw(s.st_name as usize).unwrap() == MARKER_SYMBOL.as_bytes())
            .expect("marker in .symtab");
        (shdr.sh_offset as usize, shdr.sh_entsize as usize, marker)
    }

    /// Write an edited copy of the test binary and open it.
    fn open_edited(tag: &str, data: &[u8]) -> Executable {
        let path = std::env::temp_dir().join(format!("hello-uprobe-{}-{}", tag, std::process::id()));
        fs::write(&path, data).unwrap();
        Executable::open(&path).unwrap()
    }

    /// Copy the marker's `.symtab` entry over another entry, returning the
    /// edited binary and the copy's position.
    fn duplicate_marker() -> (Vec<u8>, usize) {
        let mut data = fs::read(current_exe()).unwrap();
        let (table, entsize, marker) = symtab_layout(&data);
        // Entry 0 is the reserved null symbol.
        let other = if marker == 1 { 2 } else { 1 };

        let entry = data[table + marker * entsize..][..entsize].to_vec();
        data[table + other * entsize..][..entsize].copy_from_slice(&entry);
        (data, table + other * entsize)
    }

    #[test]
    fn test_resolve_marker_in_test_binary() {
        let exe = Executable::open(current_exe()).expect("open test binary");
        let symbol = exe.resolve(MARKER_SYMBOL).expect("resolve marker");

        assert_eq!(symbol.name, MARKER_SYMBOL);
        assert!(symbol.file_offset > 0);
        assert!(symbol.file_offset < fs::metadata(exe.path()).unwrap().len());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let first = Executable::open(current_exe()).unwrap().resolve(MARKER_SYMBOL).unwrap();
        let second = Executable::open(current_exe()).unwrap().resolve(MARKER_SYMBOL).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_missing_symbol() {
        let exe = Executable::open(current_exe()).unwrap();
        let err = exe.resolve("no_such_symbol_in_this_binary").unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { ref symbol, .. } if symbol == "no_such_symbol_in_this_binary"));
    }

    #[test]
    fn test_open_missing_binary() {
        let err = Executable::open("/nonexistent/helloworld").unwrap_err();
        match err {
            ResolveError::Open { path, .. } => assert_eq!(path, PathBuf::from("/nonexistent/helloworld")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_open_non_elf() {
        let path = std::env::temp_dir().join(format!("hello-uprobe-not-elf-{}", std::process::id()));
        fs::write(&path, b"#!/bin/sh\necho hi\n").unwrap();

        let err = Executable::open(&path).unwrap_err();
        fs::remove_file(&path).ok();

        assert!(matches!(err, ResolveError::Parse { .. }));
    }

    #[test]
    fn test_select_unique() {
        let path = Path::new("/bin/true");

        assert!(matches!(
            select_unique("f", path, vec![]),
            Err(ResolveError::NotFound { .. })
        ));
        assert_eq!(select_unique("f", path, vec![sym(0x1000)]).unwrap().address, 0x1000);

        match select_unique("f", path, vec![sym(0x1000), sym(0x2000)]) {
            Err(ResolveError::Ambiguous { addresses, .. }) => assert_eq!(addresses, vec![0x1000, 0x2000]),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_same_address_entries_are_one_symbol() {
        let expected = Executable::open(current_exe()).unwrap().resolve(MARKER_SYMBOL).unwrap();

        let (data, _) = duplicate_marker();
        let exe = open_edited("dup-symbol", &data);
        let resolved = exe.resolve(MARKER_SYMBOL).unwrap();
        fs::remove_file(exe.path()).ok();

        assert_eq!(resolved, expected);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_resolve_ambiguous_symbol() {
        let expected = Executable::open(current_exe()).unwrap().resolve(MARKER_SYMBOL).unwrap();

        let (mut data, copy) = duplicate_marker();
        let moved = expected.address + 1;
        data[copy + ST_VALUE..][..8].copy_from_slice(&moved.to_ne_bytes());
        let exe = open_edited("ambiguous-symbol", &data);
        let err = exe.resolve(MARKER_SYMBOL).unwrap_err();
        fs::remove_file(exe.path()).ok();

        match err {
            ResolveError::Ambiguous { mut addresses, .. } => {
                addresses.sort_unstable();
                assert_eq!(addresses, vec![expected.address, moved]);
            }
            other => panic!("expected ambiguity, got {other}"),
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_resolve_absolute_symbol_is_unmapped() {
        let mut data = fs::read(current_exe()).unwrap();
        let (table, entsize, marker) = symtab_layout(&data);
        data[table + marker * entsize + ST_SHNDX..][..2].copy_from_slice(&SHN_ABS.to_ne_bytes());

        let exe = open_edited("abs-symbol", &data);
        let err = exe.resolve(MARKER_SYMBOL).unwrap_err();
        fs::remove_file(exe.path()).ok();

        assert!(matches!(err, ResolveError::Unmapped { ref symbol, .. } if symbol == MARKER_SYMBOL));
    }

    #[test]
    fn test_resolve_in_stripped_binary() {
        let mut data = fs::read(current_exe()).unwrap();
        let headers: Vec<usize> = {
            let file = ElfBytes::<AnyEndian>::minimal_parse(&data).unwrap();
            let (shoff, shentsize) = (file.ehdr.e_shoff as usize, file.ehdr.e_shentsize as usize);
            file.section_headers()
                .unwrap()
                .iter()
                .enumerate()
                .filter(|(_, shdr)| matches!(shdr.sh_type, SHT_SYMTAB | SHT_DYNSYM))
                .map(|(i, _)| shoff + i * shentsize)
                .collect()
        };
        assert!(!headers.is_empty());
        // sh_type follows sh_name in both ELF classes.
        for header in headers {
            data[header + 4..][..4].copy_from_slice(&SHT_PROGBITS.to_ne_bytes());
        }

        let exe = open_edited("stripped", &data);
        let err = exe.resolve(MARKER_SYMBOL).unwrap_err();
        fs::remove_file(exe.path()).ok();

        assert!(matches!(err, ResolveError::NoSymbols { .. }));
    }
}
