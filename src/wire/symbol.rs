//! Interned protocol symbols.
//!
//! Lichat names its update kinds and field keys with symbols. Every symbol is
//! interned once per process into a global registry and handed out as a small
//! `Copy` handle, so equality is a handle comparison rather than a string
//! comparison. Names are case-insensitive and normalised to lower case.
//! Reading a symbol the registry has never seen interns a new one, up to
//! [`MAX_SYMBOLS`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, PoisonError, RwLock};

/// The package a symbol lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Package {
    /// `:name`, used for field keys.
    Keyword,
    /// Bare `name`, used for update kinds and protocol vocabulary.
    Lichat,
    /// `#:name`.
    Uninterned,
    /// `package:name` for any other package.
    Other(&'static str),
}

/// Handle to an interned symbol.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

struct Registry {
    entries: Vec<(Package, &'static str)>,
    index: HashMap<(Package, &'static str), u32>,
    packages: HashMap<String, &'static str>,
}

static REGISTRY: LazyLock<RwLock<Registry>> = LazyLock::new(|| {
    RwLock::new(Registry {
        entries: Vec::new(),
        index: HashMap::new(),
        packages: HashMap::new(),
    })
});

/// How many distinct symbols names read off the wire may grow the registry
/// to. Interned names live for the rest of the process, so this is the most
/// memory a peer can pin by sending made-up symbols.
pub const MAX_SYMBOLS: usize = 1 << 16;

/// How many foreign package names the wire may introduce.
pub const MAX_PACKAGES: usize = 256;

/// Intern `name` in `package`, returning the existing handle when present.
/// Unbounded; meant for names the program itself uses.
pub fn intern(package: Package, name: &str) -> Symbol {
    let name = name.to_lowercase();
    {
        let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(&id) = registry.index.get(&(package, name.as_str())) {
            return Symbol(id);
        }
    }
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    registry.symbol(package, name)
}

/// Like [`intern`], but refuses to add a new symbol once the registry holds
/// `limit` of them. Existing symbols always resolve.
pub(crate) fn intern_within(package: Package, name: &str, limit: usize) -> Option<Symbol> {
    let name = name.to_lowercase();
    {
        let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(&id) = registry.index.get(&(package, name.as_str())) {
            return Some(Symbol(id));
        }
    }
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if registry.entries.len() >= limit && !registry.index.contains_key(&(package, name.as_str())) {
        return None;
    }
    Some(registry.symbol(package, name))
}

impl Registry {
    fn symbol(&mut self, package: Package, name: String) -> Symbol {
        // Another caller may have interned it between the two locks.
        if let Some(&id) = self.index.get(&(package, name.as_str())) {
            return Symbol(id);
        }
        let name: &'static str = Box::leak(name.into_boxed_str());
        let id = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push((package, name));
        self.index.insert((package, name), id);
        Symbol(id)
    }

    fn package(&mut self, name: String, limit: usize) -> Option<Package> {
        match name.as_str() {
            "keyword" | "" => return Some(Package::Keyword),
            "lichat" => return Some(Package::Lichat),
            _ => {}
        }
        if let Some(&interned) = self.packages.get(&name) {
            return Some(Package::Other(interned));
        }
        if self.packages.len() >= limit {
            return None;
        }
        let interned: &'static str = Box::leak(name.clone().into_boxed_str());
        self.packages.insert(name, interned);
        Some(Package::Other(interned))
    }
}

/// Resolve a package name to a [`Package`], interning foreign package names.
pub fn package(name: &str) -> Package {
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    registry
        .package(name.to_lowercase(), usize::MAX)
        .unwrap_or(Package::Keyword)
}

/// Like [`package`], bounded by `limit` foreign packages.
pub(crate) fn package_within(name: &str, limit: usize) -> Option<Package> {
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    registry.package(name.to_lowercase(), limit)
}

/// Shorthand for a keyword symbol such as `:channel`.
pub fn kw(name: &str) -> Symbol {
    intern(Package::Keyword, name)
}

/// Shorthand for a symbol in the lichat package such as `message`.
pub fn li(name: &str) -> Symbol {
    intern(Package::Lichat, name)
}

impl Symbol {
    fn entry(self) -> (Package, &'static str) {
        let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
        registry.entries[self.0 as usize]
    }

    /// The symbol's name, lower case.
    pub fn name(self) -> &'static str {
        self.entry().1
    }

    pub fn package(self) -> Package {
        self.entry().0
    }

    pub fn is_keyword(self) -> bool {
        self.package() == Package::Keyword
    }
}

impl Ord for Symbol {
    // Ordered by name so encoded field lists come out in a stable order.
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0 == other.0 {
            return Ordering::Equal;
        }
        let (lp, ln) = self.entry();
        let (rp, rn) = other.entry();
        ln.cmp(rn).then(lp.cmp(&rp))
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (package, name) = self.entry();
        match package {
            Package::Keyword => write!(f, ":{}", name),
            Package::Lichat => write!(f, "{}", name),
            Package::Uninterned => write!(f, "#:{}", name),
            Package::Other(pkg) => write!(f, "{}:{}", pkg, name),
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_symbol() {
        assert_eq!(kw("topic"), kw("topic"));
        assert_eq!(kw("TOPIC"), kw("topic"));
        assert_eq!(li("join"), intern(Package::Lichat, "Join"));
    }

    #[test]
    fn package_distinguishes_symbols() {
        assert_ne!(kw("join"), li("join"));
        assert_eq!(kw("join").name(), li("join").name());
        assert!(kw("join").is_keyword());
        assert!(!li("join").is_keyword());
    }

    #[test]
    fn unknown_names_are_interned() {
        let fresh = li("some-server-specific-thing");
        assert_eq!(fresh.name(), "some-server-specific-thing");
        assert_eq!(fresh, li("some-server-specific-thing"));
    }

    #[test]
    fn foreign_packages_are_shared() {
        let a = intern(package("shirakumo"), "x");
        let b = intern(package("SHIRAKUMO"), "x");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "shirakumo:x");
    }

    #[test]
    fn bounded_interning_refuses_only_new_names() {
        let known = li("join");
        assert_eq!(intern_within(Package::Lichat, "JOIN", 0), Some(known));
        assert_eq!(intern_within(Package::Lichat, "never-seen-before-xyzzy", 0), None);
        assert_eq!(package_within("lichat", 0), Some(Package::Lichat));
        assert_eq!(package_within("some-unheard-of-package", 0), None);
        assert!(intern_within(Package::Lichat, "roomy-enough", usize::MAX).is_some());
    }

    #[test]
    fn display_by_package() {
        assert_eq!(kw("channel").to_string(), ":channel");
        assert_eq!(li("message").to_string(), "message");
        assert_eq!(intern(Package::Uninterned, "g1").to_string(), "#:g1");
    }
}
