//! Address-to-symbol resolution through an external resolver.
//!
//! One subprocess per cache miss, at most one outstanding at a time: the
//! resolver (eu-addr2line by default) is handed either the core file or the
//! executable plus one address, and answers with one line. Every result is
//! cached forever, unresolved ones included: the analyzer is a single
//! short-lived run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use log::debug;

pub enum ResolveTarget {
    /// `--core <file>`: addresses are resolved against a core image.
    Core(PathBuf),
    /// `-e <file>`: addresses are resolved against the executable.
    Exe(PathBuf),
}

pub struct SymbolResolver {
    resolver: PathBuf,
    target: Option<ResolveTarget>,
    cache: HashMap<u64, String>,
}

impl SymbolResolver {
    pub fn new(resolver: PathBuf, target: Option<ResolveTarget>) -> Self {
        Self {
            resolver,
            target,
            cache: HashMap::new(),
        }
    }

    /// A resolver that renders every address as hex.
    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), None)
    }

    /// Resolve one address to a human string, consulting the cache first.
    pub fn resolve(&mut self, addr: u64) -> &str {
        if addr == 0 {
            return "(nil)";
        }
        let Self {
            resolver,
            target,
            cache,
        } = self;
        cache
            .entry(addr)
            .or_insert_with(|| lookup(resolver, target.as_ref(), addr))
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn lookup(resolver: &std::path::Path, target: Option<&ResolveTarget>, addr: u64) -> String {
    let fallback = || format!("{addr:#x}");

    let Some(target) = target else {
        return fallback();
    };

    let mut cmd = Command::new(resolver);
    match target {
        ResolveTarget::Core(core) => cmd.arg("--core").arg(core),
        ResolveTarget::Exe(exe) => cmd.arg("-e").arg(exe),
    };
    cmd.arg(format!("{addr:#x}"));

    let output = match cmd.output() {
        Ok(o) => o,
        Err(e) => {
            debug!("resolver failed for {addr:#x}: {e}");
            return fallback();
        }
    };

    let line = String::from_utf8_lossy(&output.stdout);
    let line = line.lines().next().unwrap_or("").trim();
    if line.is_empty() || line == "??:0" {
        fallback()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn fake_resolver(body: &str) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new()
            .prefix("resolver")
            .suffix(".sh")
            .tempfile()
            .unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let path = file.into_temp_path();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn no_target_renders_hex() {
        let mut resolver = SymbolResolver::disabled();
        assert_eq!(resolver.resolve(0x1234), "0x1234");
        assert_eq!(resolver.resolve(0), "(nil)");
    }

    #[test]
    fn resolver_output_is_used_and_cached() {
        let script = fake_resolver("echo \"main.c:42 $$\"");
        let mut resolver = SymbolResolver::new(
            script.to_path_buf(),
            Some(ResolveTarget::Exe(PathBuf::from("/bin/true"))),
        );

        let first = resolver.resolve(0x1000).to_string();
        assert!(first.starts_with("main.c:42"));

        // Same answer including the shell's pid: the subprocess ran once.
        let second = resolver.resolve(0x1000).to_string();
        assert_eq!(first, second);
        assert_eq!(resolver.cache_len(), 1);
    }

    #[test]
    fn unresolved_marker_falls_back_to_hex() {
        let script = fake_resolver("echo \"??:0\"");
        let mut resolver = SymbolResolver::new(
            script.to_path_buf(),
            Some(ResolveTarget::Core(PathBuf::from("/dev/null"))),
        );
        assert_eq!(resolver.resolve(0xdead), "0xdead");
    }

    #[test]
    fn missing_resolver_binary_falls_back_to_hex() {
        let mut resolver = SymbolResolver::new(
            PathBuf::from("/nonexistent/resolver"),
            Some(ResolveTarget::Exe(PathBuf::from("/bin/true"))),
        );
        assert_eq!(resolver.resolve(0xbeef), "0xbeef");
    }
}
