//! Dot output for the analysis graphs.
//!
//! Each condensation phase can dump the working graph as a dot file; the
//! dumper is threaded explicitly through the passes and does nothing unless
//! a target directory is configured.

use crate::entity::EntityRef;
use crate::seg::{Seg, SegNode};
use log::warn;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

/// A payload that can label its node in dot output.
pub trait DotLabel {
    /// The label text for this node.
    fn dot_label(&self) -> String;
}

/// Writes dot files for graphs when enabled.
pub struct DotDumper {
    dir: Option<PathBuf>,
}

impl DotDumper {
    /// A dumper writing into `dir`, or disabled when `dir` is `None`.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// A dumper that never writes anything.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Write `seg` to `name` in the configured directory. Failures are
    /// logged, not propagated; graph dumps are best-effort debug output.
    pub fn dump<K, N>(&self, name: &str, seg: &Seg<K, N>)
    where
        K: EntityRef + Ord + fmt::Display,
        N: SegNode + DotLabel,
    {
        let dir = match &self.dir {
            Some(d) => d,
            None => return,
        };
        let path = dir.join(name);
        let result = File::create(&path).and_then(|mut f| write_dot(&mut f, seg));
        if let Err(err) = result {
            warn!("failed to write {}: {}", path.display(), err);
        }
    }
}

/// Write `seg` as a dot digraph.
pub fn write_dot<K, N, W>(w: &mut W, seg: &Seg<K, N>) -> io::Result<()>
where
    K: EntityRef + Ord + fmt::Display,
    N: SegNode + DotLabel,
    W: Write,
{
    writeln!(w, "digraph seg {{")?;
    for (id, node) in seg.nodes() {
        writeln!(
            w,
            "  \"{}\" [label=\"{}: {}\"];",
            id,
            id,
            node.dot_label()
        )?;
    }
    // Predecessor sets are the source of truth during condensation, so the
    // arrows come from them.
    for (id, _) in seg.nodes() {
        for pred in seg.pred_reps(id) {
            writeln!(w, "  \"{}\" -> \"{}\";", pred, id)?;
        }
    }
    writeln!(w, "}}")
}
