//! Display demangling for Rust and C++ (Itanium) symbol names.
//!
//! Used only for labels shown next to decoded instructions; symbol lookup by
//! name always works on the raw (mangled) name.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Rust,
    Itanium,
    Unknown,
}

fn looks_itanium(s: &str) -> bool {
    s.starts_with("_Z") || s.starts_with("__Z")
}

pub fn detect_flavor(s: &str) -> SymbolFlavor {
    if rustc_demangle::try_demangle(s).is_ok() {
        return SymbolFlavor::Rust;
    }
    if looks_itanium(s) && cpp_demangle::Symbol::new(s).is_ok() {
        return SymbolFlavor::Itanium;
    }
    SymbolFlavor::Unknown
}

/// Demangle a single symbol. Returns None when it is not a recognised
/// mangling.
pub fn demangle_one(s: &str) -> Option<String> {
    match detect_flavor(s) {
        // `{:#}` drops the trailing hash of legacy Rust names
        SymbolFlavor::Rust => rustc_demangle::try_demangle(s)
            .ok()
            .map(|dm| format!("{:#}", dm)),
        SymbolFlavor::Itanium => cpp_demangle::Symbol::new(s).ok().map(|sym| sym.to_string()),
        SymbolFlavor::Unknown => None,
    }
}

/// The demangled form of `s`, or `s` itself.
pub fn display_name(s: &str) -> String {
    demangle_one(s).unwrap_or_else(|| s.to_string())
}
