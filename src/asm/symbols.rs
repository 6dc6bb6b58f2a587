//! Symbol and debug tables produced by the assembler.
//!
//! This module consists of:
//! - [`SymbolTable`]: every label and value symbol, keyed by its fully-scoped name
//! - [`Scopes`]: where each top-level label opens a scope, per file
//! - [`LineMap`]: the mapping between instruction addresses and source lines

use std::collections::{BTreeMap, HashMap};

use super::source::{FileId, SourceLocation};

/// The kind of a symbol.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SymbolKind {
    /// A code label, bound to the write address where it was defined.
    Label,
    /// A value symbol, defined with `name = expr`.
    Value,
    /// A symbol predefined by the assembler (e.g., the trap addresses).
    Builtin,
}

/// A symbol's value and definition site.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Symbol {
    /// The value of the symbol.
    pub value: i32,
    /// The kind of symbol.
    pub kind: SymbolKind,
    /// Where the symbol was (last) defined, if it was defined in source.
    pub location: Option<SourceLocation>,
}

/// The outcome of defining a symbol in a [`SymbolTable`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Definition {
    /// The symbol did not exist.
    New,
    /// The symbol existed with the same value.
    Same,
    /// The symbol existed with a different value.
    Changed {
        /// The previous value.
        old: i32
    },
}

/// A table of symbols, keyed by fully-scoped name
/// (local labels are keyed as `scope.local`).
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    map: HashMap<String, Symbol>,
}
impl SymbolTable {
    /// Creates an empty symbol table.
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn define(&mut self, name: &str, symbol: Symbol) -> Definition {
        match self.map.insert(name.to_string(), symbol.clone()) {
            None => Definition::New,
            Some(old) if old.value == symbol.value => Definition::Same,
            Some(old) => Definition::Changed { old: old.value },
        }
    }

    /// Gets a symbol by its fully-scoped name.
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.map.get(name)
    }

    /// Gets the value of a symbol by its fully-scoped name.
    pub fn lookup(&self, name: &str) -> Option<i32> {
        self.get(name).map(|s| s.value)
    }

    /// Finds the labels defined at a given address.
    pub fn rev_lookup(&self, addr: u16) -> impl Iterator<Item=&str> + '_ {
        self.map.iter()
            .filter(move |(_, s)| s.kind == SymbolKind::Label && s.value == i32::from(addr))
            .map(|(name, _)| &**name)
    }

    /// Iterates over all symbols (in no particular order).
    pub fn iter(&self) -> impl Iterator<Item=(&str, &Symbol)> + '_ {
        self.map.iter().map(|(k, v)| (&**k, v))
    }

    /// The number of symbols.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the table has no symbols.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Completes a partial identifier to the longest prefix shared by every matching symbol.
    ///
    /// If the partial identifier is local (starts with `.`), it is matched against
    /// the locals of `scope` (and the result is also local).
    /// Otherwise, it is matched against every symbol.
    ///
    /// This returns `None` if nothing matches.
    pub fn complete(&self, scope: Option<&str>, partial: &str) -> Option<String> {
        let prefix = match (partial.starts_with('.'), scope) {
            (true, Some(scope)) => format!("{scope}{partial}"),
            _ => partial.to_string(),
        };
        let strip = prefix.len() - partial.len();

        let mut candidates = self.map.keys()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| &k[strip..]);

        let first = candidates.next()?;
        let common = candidates.fold(first, |acc, k| {
            let len = acc.char_indices()
                .zip(k.chars())
                .find(|((_, a), b)| a != b)
                .map_or_else(|| acc.len().min(k.len()), |((i, _), _)| i);
            &acc[..len]
        });
        Some(common.to_string())
    }
}

/// The scopes opened in each file.
///
/// A label not starting with `.` opens a scope at its line
/// that lasts until the next such label in the same file.
#[derive(Debug, Default, Clone)]
pub struct Scopes {
    by_file: HashMap<FileId, Vec<(usize, String)>>,
}
impl Scopes {
    pub(crate) fn open(&mut self, file: FileId, line: usize, name: &str) {
        let scopes = self.by_file.entry(file).or_default();

        // Lines are visited in order, but a file's lines repeat if it's included again
        // in a later pass; keep the list sorted and unique by line.
        match scopes.binary_search_by_key(&line, |(l, _)| *l) {
            Ok(i) => scopes[i].1 = name.to_string(),
            Err(i) => scopes.insert(i, (line, name.to_string())),
        }
    }

    /// The name of the scope that the given line is in, if any.
    pub fn scope_at(&self, file: FileId, line: usize) -> Option<&str> {
        let scopes = self.by_file.get(&file)?;
        let end = scopes.partition_point(|&(l, _)| l <= line);
        scopes[..end].last().map(|(_, name)| &**name)
    }
}

/// A mapping from instruction addresses to source lines (and vice-versa).
///
/// Every emitted instruction maps its first byte's address to the line that produced it.
/// This is held in address order, so it is strictly increasing by address.
#[derive(PartialEq, Eq, Default, Clone)]
pub struct LineMap(BTreeMap<u16, SourceLocation>);
impl LineMap {
    /// Records an instruction, returning the location previously recorded at that address.
    pub(crate) fn insert(&mut self, addr: u16, loc: SourceLocation) -> Option<SourceLocation> {
        self.0.insert(addr, loc)
    }

    /// Gets the source location of the instruction at this address.
    pub fn get(&self, addr: u16) -> Option<&SourceLocation> {
        self.0.get(&addr)
    }

    /// Finds the address of the instruction generated by the given line.
    ///
    /// If `exact` is false and that line generated no instruction,
    /// this finds the first instruction in the same file after the line.
    pub fn find(&self, file: FileId, line: usize, exact: bool) -> Option<u16> {
        let in_file = || self.0.iter().filter(move |(_, loc)| loc.file == file);

        match exact {
            true  => in_file().find(|(_, loc)| loc.line == line),
            false => in_file()
                .filter(|(_, loc)| loc.line >= line)
                .min_by_key(|&(&addr, loc)| (loc.line, addr)),
        }
        .map(|(&addr, _)| addr)
    }

    /// Iterates over every (address, location) pair, in address order.
    pub fn iter(&self) -> impl Iterator<Item=(u16, &SourceLocation)> + '_ {
        self.0.iter().map(|(&addr, loc)| (addr, loc))
    }

    /// The number of instructions recorded.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no instructions are recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks the map is strictly increasing by address.
    pub(crate) fn is_strictly_increasing(&self) -> bool {
        let addrs: Vec<_> = self.0.keys().collect();
        addrs.windows(2).all(|w| w[0] < w[1])
    }
}
impl std::fmt::Debug for LineMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct Addr(u16);
        impl std::fmt::Debug for Addr {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "${:04X}", self.0)
            }
        }

        f.debug_map()
            .entries(self.iter().map(|(addr, loc)| (Addr(addr), loc.line)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(value: i32) -> Symbol {
        Symbol { value, kind: SymbolKind::Label, location: None }
    }

    #[test]
    fn test_define() {
        let mut table = SymbolTable::new();
        assert_eq!(table.define("a", sym(1)), Definition::New);
        assert_eq!(table.define("a", sym(1)), Definition::Same);
        assert_eq!(table.define("a", sym(2)), Definition::Changed { old: 1 });
        assert_eq!(table.lookup("a"), Some(2));
        assert_eq!(table.lookup("b"), None);

        // only labels are found by address
        table.define("b", sym(2));
        table.define("c", Symbol { value: 2, kind: SymbolKind::Value, location: None });
        let mut at_2: Vec<_> = table.rev_lookup(2).collect();
        at_2.sort_unstable();
        assert_eq!(at_2, ["a", "b"]);
        assert_eq!(table.rev_lookup(1).count(), 0);
    }

    #[test]
    fn test_complete() {
        let mut table = SymbolTable::new();
        for (name, v) in [("print_char", 0), ("print_str", 1), ("main", 2), ("main.loop", 3), ("main.load", 4), ("other.loop", 5)] {
            table.define(name, sym(v));
        }

        assert_eq!(table.complete(None, "pr").as_deref(), Some("print_"));
        assert_eq!(table.complete(None, "print_c").as_deref(), Some("print_char"));
        assert_eq!(table.complete(None, "ma").as_deref(), Some("main"));
        assert_eq!(table.complete(None, "zzz"), None);

        assert_eq!(table.complete(Some("main"), ".l").as_deref(), Some(".lo"));
        assert_eq!(table.complete(Some("main"), ".loo").as_deref(), Some(".loop"));
        assert_eq!(table.complete(Some("other"), ".l").as_deref(), Some(".loop"));
        assert_eq!(table.complete(Some("nothing"), ".l"), None);
    }

    #[test]
    fn test_scopes() {
        let (f, g) = (FileId(0), FileId(1));
        let mut scopes = Scopes::default();
        scopes.open(f, 3, "main");
        scopes.open(f, 10, "helper");
        scopes.open(g, 0, "lib");

        assert_eq!(scopes.scope_at(f, 0), None);
        assert_eq!(scopes.scope_at(f, 3), Some("main"));
        assert_eq!(scopes.scope_at(f, 9), Some("main"));
        assert_eq!(scopes.scope_at(f, 10), Some("helper"));
        assert_eq!(scopes.scope_at(f, 500), Some("helper"));
        assert_eq!(scopes.scope_at(g, 5), Some("lib"));
        assert_eq!(scopes.scope_at(FileId(2), 5), None);
    }

    #[test]
    fn test_line_map() {
        let (f, g) = (FileId(0), FileId(1));
        let loc = |file, line| SourceLocation::new(file, "x", line);

        let mut map = LineMap::default();
        map.insert(0x200, loc(f, 1));
        map.insert(0x202, loc(f, 2));
        map.insert(0x205, loc(f, 5));
        map.insert(0x203, loc(g, 0));

        assert!(map.is_strictly_increasing());
        assert_eq!(map.get(0x202).map(|l| l.line), Some(2));
        assert_eq!(map.get(0x201), None);

        assert_eq!(map.find(f, 2, true), Some(0x202));
        assert_eq!(map.find(f, 3, true), None);
        assert_eq!(map.find(f, 3, false), Some(0x205));
        assert_eq!(map.find(f, 0, false), Some(0x200));
        assert_eq!(map.find(f, 6, false), None);
        assert_eq!(map.find(g, 0, true), Some(0x203));
    }
}
